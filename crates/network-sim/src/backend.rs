//! The emulation backend: the only place hosts, switches and links touch
//! the operating system.

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::command::{CommandOutput, Invocation, sudo, sudo_checked};
use crate::impairment::apply_impairment;
use crate::node::{HostConfig, LinkConfig, SwitchConfig};
use crate::ovs::OvsCommand;
use crate::process::{LogTarget, ManagedProcess, NamespaceProcess};
use crate::topology::{Namespace, create_veth, delete_link, link_up};

/// Operations an emulated network must provide.
///
/// Node-creating calls happen before [`Backend::start`]; `run`, `exec`
/// and `spawn` only make sense after it.
pub trait Backend {
    fn add_controller(&mut self, name: &str) -> Result<()>;
    fn add_host(&mut self, host: &HostConfig) -> Result<()>;
    fn add_switch(&mut self, switch: &SwitchConfig) -> Result<()>;
    fn add_link(&mut self, link: &LinkConfig) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    /// Tear everything down. Must tolerate partially built networks.
    fn stop(&mut self);

    /// Run a command in the root namespace (OVS, sysctl, ethtool).
    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput>;

    /// Run a command inside `host` and wait for it.
    fn exec(&mut self, host: &str, invocation: &Invocation) -> Result<CommandOutput>;

    /// Start a command inside `host` without waiting for it.
    fn spawn(
        &mut self,
        host: &str,
        invocation: &Invocation,
        log: LogTarget,
    ) -> Result<Box<dyn ManagedProcess>>;
}

#[derive(Debug, Clone)]
pub struct NetnsOptions {
    /// Reference OpenFlow controller binary.
    pub controller_bin: String,
    pub controller_port: u16,
    /// Pre-populate ARP tables on every host.
    pub static_arp: bool,
}

impl Default for NetnsOptions {
    fn default() -> Self {
        Self {
            controller_bin: "ovs-testcontroller".to_string(),
            controller_port: 6653,
            static_arp: true,
        }
    }
}

struct EmulatedHost {
    config: HostConfig,
    ns: Namespace,
    /// First interface attached, used for static ARP entries.
    iface: Option<String>,
}

/// Hosts as network namespaces, switches as Open vSwitch bridges, links as
/// veth pairs shaped with `tc netem`.
pub struct NetnsBackend {
    options: NetnsOptions,
    controller: Option<(String, NamespaceProcess)>,
    wants_controller: Option<String>,
    hosts: Vec<EmulatedHost>,
    bridges: Vec<String>,
    root_ifaces: Vec<String>,
    stopped: bool,
}

impl NetnsBackend {
    pub fn new(options: NetnsOptions) -> Self {
        Self {
            options,
            controller: None,
            wants_controller: None,
            hosts: Vec::new(),
            bridges: Vec::new(),
            root_ifaces: Vec::new(),
            stopped: false,
        }
    }

    fn host_mut(&mut self, name: &str) -> Option<&mut EmulatedHost> {
        self.hosts.iter_mut().find(|h| h.config.name == name)
    }

    fn host(&self, name: &str) -> Result<&EmulatedHost> {
        self.hosts
            .iter()
            .find(|h| h.config.name == name)
            .with_context(|| format!("unknown host '{name}'"))
    }

    fn is_bridge(&self, name: &str) -> bool {
        self.bridges.iter().any(|b| b == name)
    }

    fn ovs(&self, cmd: OvsCommand) -> Result<CommandOutput> {
        sudo_checked(&cmd.invocation()?)
    }

    /// Attach one end of a freshly created veth pair to its node.
    fn attach(&mut self, node: &str, iface: &str) -> Result<()> {
        if self.is_bridge(node) {
            self.ovs(OvsCommand::AddPort {
                bridge: node.to_string(),
                port: iface.to_string(),
            })?;
            link_up(iface)?;
            return Ok(());
        }

        let Some(host) = self.host_mut(node) else {
            bail!("link endpoint '{node}' is neither a host nor a switch");
        };
        host.ns
            .adopt_interface(iface, host.config.ip, host.config.prefix_len, &host.config.mac)?;
        host.iface.get_or_insert_with(|| iface.to_string());
        Ok(())
    }

    fn shape(&self, node: &str, iface: &str, link: &LinkConfig) -> Result<()> {
        let ns = self
            .hosts
            .iter()
            .find(|h| h.config.name == node)
            .map(|h| &h.ns);
        apply_impairment(ns, iface, &link.impairment)
            .with_context(|| format!("impair {iface} on {node}"))
    }

    fn install_static_arp(&self) -> Result<()> {
        for host in &self.hosts {
            let Some(iface) = &host.iface else { continue };
            for peer in self.hosts.iter().filter(|p| p.config.name != host.config.name) {
                host.ns.add_static_arp(iface, peer.config.ip, &peer.config.mac)?;
            }
        }
        Ok(())
    }
}

impl Backend for NetnsBackend {
    fn add_controller(&mut self, name: &str) -> Result<()> {
        let target = format!("ptcp:{}", self.options.controller_port);
        let inv = Invocation::new(&self.options.controller_bin).arg(target);
        let process = NamespaceProcess::spawn(None, &inv, LogTarget::Capture)
            .with_context(|| format!("start controller '{name}'"))?;
        self.controller = Some((name.to_string(), process));
        self.wants_controller = Some(format!("tcp:127.0.0.1:{}", self.options.controller_port));
        debug!(controller = name, "controller started");
        Ok(())
    }

    fn add_host(&mut self, host: &HostConfig) -> Result<()> {
        let ns = Namespace::new(&host.name)?;
        self.hosts.push(EmulatedHost {
            config: host.clone(),
            ns,
            iface: None,
        });
        Ok(())
    }

    fn add_switch(&mut self, switch: &SwitchConfig) -> Result<()> {
        // Register before creating so a half-created bridge is still removed.
        self.bridges.push(switch.name.clone());
        self.ovs(OvsCommand::AddBridge {
            bridge: switch.name.clone(),
        })
        .with_context(|| format!("create bridge '{}'", switch.name))?;
        Ok(())
    }

    fn add_link(&mut self, link: &LinkConfig) -> Result<()> {
        create_veth(&link.iface_a, &link.iface_b)?;
        // Root-side ends are tracked even before attach so stop() can remove them.
        self.root_ifaces.push(link.iface_a.clone());

        self.attach(&link.node_a, &link.iface_a)?;
        self.attach(&link.node_b, &link.iface_b)?;
        self.shape(&link.node_a, &link.iface_a, link)?;
        self.shape(&link.node_b, &link.iface_b, link)?;

        debug!(a = link.iface_a, b = link.iface_b, "link up");
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if let Some(target) = self.wants_controller.clone() {
            for bridge in &self.bridges {
                self.ovs(OvsCommand::SetController {
                    bridge: bridge.clone(),
                    target: target.clone(),
                })?;
            }
        }
        if self.options.static_arp {
            self.install_static_arp()?;
        }
        info!(
            hosts = self.hosts.len(),
            switches = self.bridges.len(),
            "emulated network started"
        );
        Ok(())
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if let Some((name, mut controller)) = self.controller.take() {
            debug!(controller = name, "stopping controller");
            controller.stop();
        }
        for bridge in self.bridges.drain(..) {
            if let Ok(inv) = (OvsCommand::DelBridge { bridge: bridge.clone() }).invocation()
                && let Err(err) = sudo(&inv)
            {
                warn!(bridge, "failed to delete bridge: {err:#}");
            }
        }
        for iface in self.root_ifaces.drain(..) {
            delete_link(&iface);
        }
        // Dropping the namespaces deletes them.
        self.hosts.clear();
    }

    fn run(&mut self, invocation: &Invocation) -> Result<CommandOutput> {
        sudo(invocation)
    }

    fn exec(&mut self, host: &str, invocation: &Invocation) -> Result<CommandOutput> {
        self.host(host)?.ns.exec(invocation)
    }

    fn spawn(
        &mut self,
        host: &str,
        invocation: &Invocation,
        log: LogTarget,
    ) -> Result<Box<dyn ManagedProcess>> {
        let ns = &self.host(host)?.ns;
        let process = NamespaceProcess::spawn(Some(ns), invocation, log)?;
        Ok(Box::new(process))
    }
}

impl Drop for NetnsBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
