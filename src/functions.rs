//! Lifecycle of the encoder, decoder and relay functions of one variant.
//!
//! Functions start downstream first: relays, then the decoder, then the
//! encoder, so nothing is sent before its receivers exist. Each started
//! function is recorded; if a later one fails, the recorded ones are
//! stopped in reverse order before the error is returned.

use std::time::Duration;

use anyhow::anyhow;
use network_sim::{
    Backend, Invocation, LogTarget, ManagedProcess, ProcessState, wait_for_udp_listener,
};
use tracing::{debug, info, warn};

use crate::chain::validate_relay_range;
use crate::error::{Error, Result};
use crate::role::{ActionMap, FunctionRole};
use crate::topology::Topology;

/// Command prefixes of the three network function executables.
///
/// The host-facing interface (and `--action` for relays) is appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionBinaries {
    pub encoder: Invocation,
    pub decoder: Invocation,
    pub recoder: Invocation,
}

impl Default for FunctionBinaries {
    fn default() -> Self {
        Self {
            encoder: Invocation::new("python3").arg("./encoder.py"),
            decoder: Invocation::new("python3").arg("./decoder.py"),
            recoder: Invocation::new("python3").arg("./recoder.py"),
        }
    }
}

/// What to do when a function is not ready after its settle interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NotReadyAction {
    /// Abort the deployment.
    Fail,
    /// Log and continue.
    #[default]
    Warn,
}

impl std::str::FromStr for NotReadyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fail" => Ok(NotReadyAction::Fail),
            "warn" => Ok(NotReadyAction::Warn),
            _ => Err(format!("invalid policy '{s}': use fail or warn")),
        }
    }
}

impl std::fmt::Display for NotReadyAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotReadyAction::Fail => write!(f, "fail"),
            NotReadyAction::Warn => write!(f, "warn"),
        }
    }
}

impl clap::ValueEnum for NotReadyAction {
    fn value_variants<'a>() -> &'a [Self] {
        &[NotReadyAction::Fail, NotReadyAction::Warn]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            NotReadyAction::Fail => Some(clap::builder::PossibleValue::new("fail")),
            NotReadyAction::Warn => Some(clap::builder::PossibleValue::new("warn")),
        }
    }
}

/// Readiness policy applied after each deployment step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Readiness {
    /// Wait after launching the relays, before checking them.
    pub relay_settle: Duration,
    /// Wait after launching the decoder and after launching the encoder.
    pub function_settle: Duration,
    /// UDP port a ready function listens on, if it listens on one.
    pub listen_port: Option<u16>,
    /// Upper bound for the listener probe.
    pub max_wait: Duration,
    pub on_not_ready: NotReadyAction,
}

impl Default for Readiness {
    fn default() -> Self {
        Self {
            relay_settle: Duration::from_secs(3),
            function_settle: Duration::from_secs(3),
            listen_port: None,
            max_wait: Duration::from_secs(10),
            on_not_ready: NotReadyAction::Warn,
        }
    }
}

impl Readiness {
    /// No waiting at all; for in-memory backends.
    pub fn immediate() -> Self {
        Self {
            relay_settle: Duration::ZERO,
            function_settle: Duration::ZERO,
            max_wait: Duration::ZERO,
            ..Default::default()
        }
    }
}

/// A deployed function instance.
pub struct RunningFunction {
    pub name: String,
    pub host: String,
    pub role: FunctionRole,
    pub command: Invocation,
    process: Box<dyn ManagedProcess>,
}

impl RunningFunction {
    pub fn state(&mut self) -> ProcessState {
        self.process.poll()
    }

    pub fn logs(&mut self) -> String {
        self.process.logs()
    }

    fn stop(&mut self) {
        debug!(name = self.name, host = self.host, "stopping function");
        self.process.stop();
    }
}

impl std::fmt::Debug for RunningFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningFunction")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("role", &self.role)
            .field("command", &self.command.to_string())
            .finish()
    }
}

/// All functions of one sweep variant.
#[derive(Debug)]
pub struct FunctionSet {
    pub encoder: RunningFunction,
    pub decoder: RunningFunction,
    pub relays: Vec<RunningFunction>,
}

impl FunctionSet {
    /// Number of functions still running.
    pub fn running(&mut self) -> usize {
        let mut n = 0;
        for f in std::iter::once(&mut self.encoder)
            .chain(std::iter::once(&mut self.decoder))
            .chain(self.relays.iter_mut())
        {
            if f.state() == ProcessState::Running {
                n += 1;
            }
        }
        n
    }
}

/// Which function logs to collect.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LogSelection {
    pub encoder: bool,
    pub decoder: bool,
    pub recoder: bool,
}

impl LogSelection {
    pub fn all() -> Self {
        Self {
            encoder: true,
            decoder: true,
            recoder: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.encoder || self.decoder || self.recoder)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FunctionLogs {
    pub encoder: Option<String>,
    pub decoder: Option<String>,
    /// `(function name, log)` per relay, in chain order.
    pub recoders: Vec<(String, String)>,
}

impl FunctionLogs {
    pub fn is_empty(&self) -> bool {
        self.encoder.is_none() && self.decoder.is_none() && self.recoders.is_empty()
    }

    /// Print the collected logs the way the run reports them.
    pub fn print(&self) {
        if !self.recoders.is_empty() {
            info!("*** Log of recoders:");
            for (_, log) in &self.recoders {
                println!("{log}");
            }
        }
        if let Some(log) = &self.decoder {
            info!("*** Log of decoder:");
            println!("{log}");
        }
        if let Some(log) = &self.encoder {
            info!("*** Log of the encoder:");
            println!("{log}");
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FunctionManager {
    binaries: FunctionBinaries,
    readiness: Readiness,
}

impl FunctionManager {
    pub fn new(binaries: FunctionBinaries, readiness: Readiness) -> Self {
        Self {
            binaries,
            readiness,
        }
    }

    /// Start `relay_count` relays on hosts `[relay_start, relay_start +
    /// relay_count)`, then the decoder on the second-to-last host, then the
    /// encoder on the second host.
    pub fn deploy<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
        relay_start: usize,
        relay_count: usize,
        action_map: &ActionMap,
    ) -> Result<FunctionSet> {
        if action_map.len() != relay_count {
            return Err(Error::config(format!(
                "action map has {} entries for {relay_count} relays",
                action_map.len()
            )));
        }
        let decoder_idx = validate_relay_range(topo.len(), relay_start, relay_count)?;

        let mut saga = Saga::default();
        let started = self.deploy_steps(
            backend,
            topo,
            relay_start,
            action_map,
            decoder_idx,
            &mut saga,
        );
        match started {
            Ok(()) => saga.into_set().ok_or_else(|| Error::Deployment {
                function: "function set".into(),
                source: anyhow!("encoder or decoder missing after deployment"),
            }),
            Err(err) => {
                warn!("deployment failed, rolling back: {err}");
                saga.compensate();
                Err(err)
            }
        }
    }

    fn deploy_steps<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
        relay_start: usize,
        action_map: &ActionMap,
        decoder_idx: usize,
        saga: &mut Saga,
    ) -> Result<()> {
        if !action_map.is_empty() {
            let hosts: Vec<&str> = (relay_start..relay_start + action_map.len())
                .map(|i| topo.hosts()[i].name.as_str())
                .collect();
            info!("*** Run NC recoder(s) in the middle, on hosts {}...", hosts.join(", "));
        }
        for (offset, role) in action_map.roles().iter().enumerate() {
            let idx = relay_start + offset;
            let name = format!("recoder_on_{}", topo.hosts()[idx].name);
            let command = self
                .binaries
                .recoder
                .clone()
                .arg(topo.host_iface(idx))
                .arg("--action")
                .args(role.action());
            let f = self.launch(backend, topo, idx, &name, *role, command)?;
            saga.relays.push(f);
        }
        if !saga.relays.is_empty() {
            std::thread::sleep(self.readiness.relay_settle);
            for i in 0..saga.relays.len() {
                self.check_ready(backend, &mut saga.relays[i])?;
            }
        }

        info!("*** Run NC decoder on host {}", topo.hosts()[decoder_idx].name);
        let command = self.binaries.decoder.clone().arg(topo.host_iface(decoder_idx));
        let decoder =
            self.launch(backend, topo, decoder_idx, "decoder", FunctionRole::Decoder, command)?;
        let decoder = saga.decoder.insert(decoder);
        std::thread::sleep(self.readiness.function_settle);
        self.check_ready(backend, decoder)?;

        info!("*** Run NC encoder on host {}", topo.hosts()[1].name);
        let command = self.binaries.encoder.clone().arg(topo.host_iface(1));
        let encoder = self.launch(backend, topo, 1, "encoder", FunctionRole::Encoder, command)?;
        let encoder = saga.encoder.insert(encoder);
        std::thread::sleep(self.readiness.function_settle);
        self.check_ready(backend, encoder)?;

        Ok(())
    }

    fn launch<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
        host_idx: usize,
        name: &str,
        role: FunctionRole,
        command: Invocation,
    ) -> Result<RunningFunction> {
        let host = topo.hosts()[host_idx].name.clone();
        let process = backend
            .spawn(&host, &command, LogTarget::Capture)
            .map_err(|source| Error::Deployment {
                function: name.to_string(),
                source,
            })?;
        debug!(name, host, %command, "function launched");
        Ok(RunningFunction {
            name: name.to_string(),
            host,
            role,
            command,
            process,
        })
    }

    /// Liveness check, plus a listener probe when a port is configured.
    fn check_ready<B: Backend>(&self, backend: &mut B, f: &mut RunningFunction) -> Result<()> {
        let problem = match f.state() {
            ProcessState::Exited(code) => Some(anyhow!(
                "exited during settle ({})\n{}",
                code.map_or_else(|| "killed".to_string(), |c| format!("exit {c}")),
                f.logs().trim()
            )),
            ProcessState::Running => self.readiness.listen_port.and_then(|port| {
                wait_for_udp_listener(backend, &f.host, port, self.readiness.max_wait).err()
            }),
        };

        let Some(source) = problem else {
            return Ok(());
        };
        match self.readiness.on_not_ready {
            NotReadyAction::Fail => Err(Error::Deployment {
                function: f.name.clone(),
                source,
            }),
            NotReadyAction::Warn => {
                warn!(function = f.name, host = f.host, "not ready: {source:#}");
                Ok(())
            }
        }
    }

    /// Stop encoder, decoder and relays, in that order. A function that
    /// already exited is not an error.
    pub fn teardown(&self, set: FunctionSet) {
        let FunctionSet {
            mut encoder,
            mut decoder,
            relays,
        } = set;
        encoder.stop();
        decoder.stop();
        for mut relay in relays {
            relay.stop();
        }
    }

    /// Captured output of the selected functions. Read-only.
    pub fn collect_logs(&self, set: &mut FunctionSet, which: LogSelection) -> FunctionLogs {
        FunctionLogs {
            encoder: which.encoder.then(|| set.encoder.logs()),
            decoder: which.decoder.then(|| set.decoder.logs()),
            recoders: if which.recoder {
                set.relays
                    .iter_mut()
                    .map(|r| (r.name.clone(), r.logs()))
                    .collect()
            } else {
                Vec::new()
            },
        }
    }
}

/// Functions started so far, in start order.
#[derive(Default)]
struct Saga {
    relays: Vec<RunningFunction>,
    decoder: Option<RunningFunction>,
    encoder: Option<RunningFunction>,
}

impl Saga {
    fn into_set(self) -> Option<FunctionSet> {
        Some(FunctionSet {
            encoder: self.encoder?,
            decoder: self.decoder?,
            relays: self.relays,
        })
    }

    /// Undo in reverse start order: encoder, decoder, last relay first.
    fn compensate(mut self) {
        if let Some(mut f) = self.encoder.take() {
            f.stop();
        }
        if let Some(mut f) = self.decoder.take() {
            f.stop();
        }
        while let Some(mut f) = self.relays.pop() {
            f.stop();
        }
    }
}
