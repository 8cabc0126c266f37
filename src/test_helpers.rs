//! In-memory backend for exercising the orchestration without root.
//!
//! [`MockBackend`] records every call, keeps per-bridge flow tables and
//! OpenFlow port numbers like Open vSwitch would, and tracks spawned
//! processes so tests can assert what is still running. Stopping the
//! backend does not reap tracked processes, so a leaked function or receiver
//! stays visible after the network is down. Clones share state, so a test
//! can keep a handle after moving the backend into a session.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use anyhow::{Result, bail};
use network_sim::{
    Backend, CommandOutput, HostConfig, Invocation, LinkConfig, LogTarget, ManagedProcess,
    ProcessState, SwitchConfig,
};

pub const CLIENT_REPORT: &str = "[  3]  0.0-30.0 sec   183 KBytes  50.0 Kbits/sec\n";
pub const SERVER_REPORT: &str =
    "[  3]  0.0-30.0 sec   146 KBytes  39.9 Kbits/sec   2.1 ms  148/ 740 (20%)\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    AddController(String),
    AddHost(String),
    AddSwitch(String),
    AddLink(String, String),
    Start,
    Stop,
    Run(String),
    Exec(String, String),
    Spawn(String, String),
    StopProcess(String),
}

/// How a spawned process matching a pattern behaves.
#[derive(Debug, Clone)]
struct ExitRule {
    pattern: String,
    /// `None` keeps the process running until stopped.
    exit: Option<Option<i32>>,
    logs: String,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<Call>,
    switches: Vec<String>,
    ofports: HashMap<String, u32>,
    ports_per_bridge: HashMap<String, u32>,
    flows: BTreeMap<String, Vec<String>>,
    files: HashMap<String, String>,
    running: Vec<(u64, String, String)>,
    running_at_stop: Option<usize>,
    next_pid: u64,
    links_added: usize,
    ss_output: String,
    fail_link: Option<usize>,
    fail_run: Option<String>,
    fail_spawn: Option<String>,
    exit_rules: Vec<ExitRule>,
}

#[derive(Clone, Default)]
pub struct MockBackend {
    state: Rc<RefCell<MockState>>,
}

impl MockBackend {
    /// Traffic clients exit immediately with [`CLIENT_REPORT`]; everything
    /// else runs until stopped.
    pub fn new() -> Self {
        let backend = Self::default();
        backend.exit_on_spawn(" -c ", Some(0), CLIENT_REPORT);
        backend
    }

    /// Fail the `nth` (0-based) `add_link` call.
    pub fn fail_link(&self, nth: usize) -> &Self {
        self.state.borrow_mut().fail_link = Some(nth);
        self
    }

    /// Fail every root-namespace command whose text contains `pattern`.
    pub fn fail_run(&self, pattern: &str) -> &Self {
        self.state.borrow_mut().fail_run = Some(pattern.to_string());
        self
    }

    /// Refuse to spawn processes whose command contains `pattern`.
    pub fn fail_spawn(&self, pattern: &str) -> &Self {
        self.state.borrow_mut().fail_spawn = Some(pattern.to_string());
        self
    }

    /// Processes whose command contains `pattern` exit right after spawn.
    pub fn exit_on_spawn(&self, pattern: &str, code: Option<i32>, logs: &str) -> &Self {
        self.add_rule(pattern, Some(code), logs)
    }

    /// Processes whose command contains `pattern` never exit on their own.
    pub fn hang_on_spawn(&self, pattern: &str) -> &Self {
        self.add_rule(pattern, None, "")
    }

    fn add_rule(&self, pattern: &str, exit: Option<Option<i32>>, logs: &str) -> &Self {
        self.state.borrow_mut().exit_rules.insert(
            0,
            ExitRule {
                pattern: pattern.to_string(),
                exit,
                logs: logs.to_string(),
            },
        );
        self
    }

    /// Output returned for `ss -uln` on every host.
    pub fn set_ss_output(&self, output: &str) -> &Self {
        self.state.borrow_mut().ss_output = output.to_string();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Root-namespace command lines, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Run(cmd) => Some(cmd.clone()),
                _ => None,
            })
            .collect()
    }

    /// `(host, command)` of every spawn, in order.
    pub fn spawns(&self) -> Vec<(String, String)> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Spawn(host, cmd) => Some((host.clone(), cmd.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn stop_calls(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|c| **c == Call::Stop)
            .count()
    }

    pub fn flows(&self, bridge: &str) -> Vec<String> {
        self.state
            .borrow()
            .flows
            .get(bridge)
            .cloned()
            .unwrap_or_default()
    }

    pub fn total_flows(&self) -> usize {
        self.state.borrow().flows.values().map(Vec::len).sum()
    }

    pub fn ofport(&self, iface: &str) -> Option<u32> {
        self.state.borrow().ofports.get(iface).copied()
    }

    pub fn running(&self) -> usize {
        self.state.borrow().running.len()
    }

    /// Processes still running when the backend was first stopped.
    pub fn running_at_stop(&self) -> Option<usize> {
        self.state.borrow().running_at_stop
    }

    pub fn running_on(&self, host: &str) -> Vec<String> {
        self.state
            .borrow()
            .running
            .iter()
            .filter(|(_, h, _)| h == host)
            .map(|(_, _, label)| label.clone())
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.borrow_mut().calls.push(call);
    }

    fn attach_port(&self, node: &str, iface: &str) {
        let mut st = self.state.borrow_mut();
        if !st.switches.iter().any(|s| s == node) {
            return;
        }
        let next = st.ports_per_bridge.entry(node.to_string()).or_insert(0);
        *next += 1;
        let port = *next;
        st.ofports.insert(iface.to_string(), port);
    }

    fn handle_ovs(&self, argv: &[&str]) -> CommandOutput {
        let mut st = self.state.borrow_mut();
        match argv {
            ["ovs-vsctl", "get", "Interface", iface, "ofport"] => match st.ofports.get(*iface) {
                Some(port) => CommandOutput::ok(format!("{port}\n")),
                None => CommandOutput::failed(1, format!("no row \"{iface}\" in table Interface")),
            },
            ["ovs-ofctl", "del-flows", bridge] => {
                st.flows.entry(bridge.to_string()).or_default().clear();
                CommandOutput::ok("")
            }
            ["ovs-ofctl", "add-flow", bridge, flow] => {
                st.flows
                    .entry(bridge.to_string())
                    .or_default()
                    .push(flow.to_string());
                CommandOutput::ok("")
            }
            ["ovs-ofctl", "dump-flows", bridge] => {
                let table = st
                    .flows
                    .get(*bridge)
                    .map(|flows| {
                        flows
                            .iter()
                            .map(|f| format!(" cookie=0x0, n_packets=0, {f}\n"))
                            .collect::<String>()
                    })
                    .unwrap_or_default();
                CommandOutput::ok(table)
            }
            _ => CommandOutput::ok(""),
        }
    }
}

impl Backend for MockBackend {
    fn add_controller(&mut self, name: &str) -> Result<()> {
        self.record(Call::AddController(name.to_string()));
        Ok(())
    }

    fn add_host(&mut self, host: &HostConfig) -> Result<()> {
        self.record(Call::AddHost(host.name.clone()));
        Ok(())
    }

    fn add_switch(&mut self, switch: &SwitchConfig) -> Result<()> {
        self.record(Call::AddSwitch(switch.name.clone()));
        self.state.borrow_mut().switches.push(switch.name.clone());
        Ok(())
    }

    fn add_link(&mut self, link: &LinkConfig) -> Result<()> {
        self.record(Call::AddLink(link.iface_a.clone(), link.iface_b.clone()));
        {
            let mut st = self.state.borrow_mut();
            let nth = st.links_added;
            st.links_added += 1;
            if st.fail_link == Some(nth) {
                bail!("RTNETLINK answers: File exists");
            }
        }
        self.attach_port(&link.node_a, &link.iface_a);
        self.attach_port(&link.node_b, &link.iface_b);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.record(Call::Start);
        Ok(())
    }

    fn stop(&mut self) {
        self.record(Call::Stop);
        let mut st = self.state.borrow_mut();
        if st.running_at_stop.is_none() {
            st.running_at_stop = Some(st.running.len());
        }
    }

    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput> {
        invocation.validate()?;
        let line = invocation.to_string();
        self.record(Call::Run(line.clone()));
        if let Some(pattern) = &self.state.borrow().fail_run
            && line.contains(pattern.as_str())
        {
            return Ok(CommandOutput::failed(1, "injected failure"));
        }
        Ok(self.handle_ovs(&invocation.argv()))
    }

    fn exec(&mut self, host: &str, invocation: &Invocation) -> Result<CommandOutput> {
        invocation.validate()?;
        self.record(Call::Exec(host.to_string(), invocation.to_string()));
        let st = self.state.borrow();
        let out = match invocation.argv().as_slice() {
            ["cat", path] => match st.files.get(*path) {
                Some(content) => CommandOutput::ok(content.clone()),
                None => CommandOutput::failed(1, format!("cat: {path}: No such file or directory")),
            },
            ["ss", "-uln"] => CommandOutput::ok(st.ss_output.clone()),
            _ => CommandOutput::ok(""),
        };
        Ok(out)
    }

    fn spawn(
        &mut self,
        host: &str,
        invocation: &Invocation,
        log: LogTarget,
    ) -> Result<Box<dyn ManagedProcess>> {
        invocation.validate()?;
        let line = invocation.to_string();
        self.record(Call::Spawn(host.to_string(), line.clone()));

        let mut st = self.state.borrow_mut();
        if let Some(pattern) = &st.fail_spawn
            && line.contains(pattern.as_str())
        {
            bail!("No such file or directory: {}", invocation.program());
        }

        let rule = st
            .exit_rules
            .iter()
            .find(|r| line.contains(r.pattern.as_str()))
            .cloned();
        let logs = match &rule {
            Some(rule) => rule.logs.clone(),
            None => format!("{} started\n", invocation.program()),
        };
        if let LogTarget::File(path) = &log {
            st.files
                .insert(path.display().to_string(), SERVER_REPORT.to_string());
        }

        st.next_pid += 1;
        let pid = st.next_pid;
        let label = format!("{line} on {host}");
        let exited = rule.and_then(|r| r.exit);
        if exited.is_none() {
            st.running.push((pid, host.to_string(), label.clone()));
        }

        Ok(Box::new(MockProcess {
            pid,
            label,
            state: Rc::clone(&self.state),
            exited,
            logs,
        }))
    }
}

struct MockProcess {
    pid: u64,
    label: String,
    state: Rc<RefCell<MockState>>,
    exited: Option<Option<i32>>,
    logs: String,
}

impl ManagedProcess for MockProcess {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) -> ProcessState {
        match self.exited {
            Some(code) => ProcessState::Exited(code),
            None => ProcessState::Running,
        }
    }

    fn stop(&mut self) {
        let mut st = self.state.borrow_mut();
        st.calls.push(Call::StopProcess(self.label.clone()));
        st.running.retain(|(pid, _, _)| *pid != self.pid);
        if self.exited.is_none() {
            self.exited = Some(None);
        }
    }

    fn logs(&mut self) -> String {
        self.logs.clone()
    }
}
