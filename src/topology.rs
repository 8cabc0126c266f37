//! Chain topology assembly and the network session that owns the backend.

use anyhow::Context;
use network_sim::{Backend, HostConfig, KernelCommand, LinkConfig, SwitchConfig};
use tracing::{debug, error, info, warn};

use crate::chain::{ChainSpec, LinkProfile, iface_name, relay_count};
use crate::error::{Error, Result};

/// Name of the single OpenFlow controller.
pub const CONTROLLER_NAME: &str = "c0";

/// An assembled chain. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    spec: ChainSpec,
}

impl Topology {
    pub fn len(&self) -> usize {
        self.spec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spec.is_empty()
    }

    pub fn hosts(&self) -> &[HostConfig] {
        &self.spec.hosts
    }

    pub fn switches(&self) -> &[SwitchConfig] {
        &self.spec.switches
    }

    pub fn host_links(&self) -> &[LinkConfig] {
        &self.spec.host_links
    }

    pub fn switch_links(&self) -> &[LinkConfig] {
        &self.spec.switch_links
    }

    pub fn host(&self, index: usize) -> Option<&HostConfig> {
        self.spec.hosts.get(index)
    }

    pub fn relay_count(&self) -> usize {
        relay_count(self.len())
    }

    /// Port of switch `i` facing its host.
    pub fn host_port(&self, index: usize) -> String {
        iface_name(&self.spec.switches[index].name, &self.spec.hosts[index].name)
    }

    /// Port of switch `i` facing switch `i + 1`.
    pub fn upstream_port(&self, index: usize) -> Option<String> {
        let next = self.spec.switches.get(index + 1)?;
        Some(iface_name(&self.spec.switches[index].name, &next.name))
    }

    /// Port of switch `i` facing switch `i - 1`.
    pub fn downstream_port(&self, index: usize) -> Option<String> {
        let prev = self.spec.switches.get(index.checked_sub(1)?)?;
        Some(iface_name(&self.spec.switches[index].name, &prev.name))
    }

    /// Host-side interface of host `i`, the one network functions bind to.
    pub fn host_iface(&self, index: usize) -> String {
        iface_name(&self.spec.hosts[index].name, &self.spec.switches[index].name)
    }
}

/// One emulated network for the duration of one run.
///
/// Owns the backend; [`Network::stop`] is idempotent and also runs on drop,
/// so every exit path tears the network down exactly once.
pub struct Network<B: Backend> {
    backend: B,
    ipv6_disabled: bool,
    stopped: bool,
}

impl<B: Backend> Network<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            ipv6_disabled: false,
            stopped: false,
        }
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Disable IPv6 host-wide for the run; re-enabled by [`Network::stop`].
    pub fn disable_ipv6(&mut self) -> Result<()> {
        // Marked first so a partial toggle is still reverted.
        self.ipv6_disabled = true;
        set_ipv6(&mut self.backend, true).map_err(Error::TopologyBuild)
    }

    /// Materialize a chain of `host_num` hops and start it.
    ///
    /// The host count is checked before any backend call. On a backend
    /// failure the partial network is stopped before the error is returned.
    pub fn build(&mut self, host_num: usize, profile: &LinkProfile) -> Result<Topology> {
        let spec = ChainSpec::with_profile(host_num, profile)?;
        if self.stopped {
            return Err(Error::TopologyBuild(anyhow::anyhow!(
                "network session already stopped"
            )));
        }

        match self.assemble(&spec) {
            Ok(()) => Ok(Topology { spec }),
            Err(err) => {
                error!("topology assembly failed: {err:#}");
                self.stop();
                Err(Error::TopologyBuild(err))
            }
        }
    }

    fn assemble(&mut self, spec: &ChainSpec) -> anyhow::Result<()> {
        info!("*** Adding controller");
        self.backend.add_controller(CONTROLLER_NAME)?;

        info!("*** Adding hosts and switches in a multi-hop chain topo");
        for i in 0..spec.len() {
            let host = &spec.hosts[i];
            let switch = &spec.switches[i];
            self.backend
                .add_host(host)
                .with_context(|| format!("add host {}", host.name))?;
            self.backend
                .add_switch(switch)
                .with_context(|| format!("add switch {}", switch.name))?;
            self.backend
                .add_link(&spec.host_links[i])
                .with_context(|| format!("link {} <-> {}", switch.name, host.name))?;
            if i > 0 {
                let link = &spec.switch_links[i - 1];
                self.backend
                    .add_link(link)
                    .with_context(|| format!("link {} <-> {}", link.node_a, link.node_b))?;
            }
            debug!(hop = i, host = host.name, switch = switch.name, "hop added");
        }

        info!("*** Starting network");
        self.backend.start().context("start network")?;
        Ok(())
    }

    /// Tear the network down and restore IPv6 if this session disabled it.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        info!("*** Stopping network");
        self.backend.stop();
        if self.ipv6_disabled {
            self.ipv6_disabled = false;
            if let Err(err) = set_ipv6(&mut self.backend, false) {
                warn!("failed to re-enable IPv6: {err:#}");
            }
        }
    }
}

impl<B: Backend> Drop for Network<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn set_ipv6<B: Backend>(backend: &mut B, disabled: bool) -> anyhow::Result<()> {
    let toggle = KernelCommand::SetIpv6 { disabled };
    for inv in toggle.invocations()? {
        backend.run(&inv)?.checked(&inv)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockBackend;

    #[test]
    fn test_port_names() {
        let mut net = Network::new(MockBackend::new());
        let topo = net.build(5, &LinkProfile::default()).unwrap();
        assert_eq!(topo.host_port(0), "s1-h1");
        assert_eq!(topo.upstream_port(0).as_deref(), Some("s1-s2"));
        assert_eq!(topo.downstream_port(0), None);
        assert_eq!(topo.downstream_port(2).as_deref(), Some("s3-s2"));
        assert_eq!(topo.upstream_port(4), None);
        assert_eq!(topo.host_iface(3), "h4-s4");
        assert_eq!(topo.relay_count(), 1);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let backend = MockBackend::new();
        let mut net = Network::new(backend.clone());
        net.stop();
        net.stop();
        drop(net);
        assert_eq!(backend.stop_calls(), 1);
    }
}
