//! Explicit OpenFlow rules pinning traffic to the single chain path.
//!
//! Without them the switches would fall back to the controller's learning
//! behavior; with them every packet follows one deterministic path, so
//! loss and reordering come only from the emulated links.

use anyhow::Context;
use network_sim::ovs::parse_ofport;
use network_sim::{Backend, FlowSpec, KernelCommand, OvsCommand, Protocol};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::topology::Topology;

/// One exact-match rule, expressed with interface names.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardingRule {
    pub switch: String,
    pub protocol: Protocol,
    pub in_port: String,
    pub out_port: String,
}

/// Rules for every switch `i` in `[0, len - 1)`: host to upstream, and for
/// `i >= 1` also downstream to host. The last switch gets none.
pub fn derive_rules(topo: &Topology, protocol: Protocol) -> Vec<ForwardingRule> {
    let mut rules = Vec::new();
    for i in 0..topo.len().saturating_sub(1) {
        let switch = &topo.switches()[i].name;
        if let Some(upstream) = topo.upstream_port(i) {
            rules.push(ForwardingRule {
                switch: switch.clone(),
                protocol,
                in_port: topo.host_port(i),
                out_port: upstream,
            });
        }
        if let Some(downstream) = topo.downstream_port(i) {
            rules.push(ForwardingRule {
                switch: switch.clone(),
                protocol,
                in_port: downstream,
                out_port: topo.host_port(i),
            });
        }
    }
    rules
}

/// Flow table of one switch as reported by `ovs-ofctl dump-flows`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowTable {
    pub switch: String,
    pub dump: String,
}

impl FlowTable {
    /// Number of flow entries in the dump.
    pub fn entries(&self) -> usize {
        self.dump
            .lines()
            .filter(|l| l.contains("actions="))
            .count()
    }
}

#[derive(Clone, Debug)]
pub struct FlowProgrammer {
    protocol: Protocol,
}

impl FlowProgrammer {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol }
    }

    /// Flush and reinstall the rules of every programmed switch.
    ///
    /// Always flushes first, so repeated calls converge to the same tables.
    /// Any failure is fatal; no partial path is left for traffic to use.
    pub fn install<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
    ) -> Result<Vec<ForwardingRule>> {
        info!("*** Adding OpenFlow rules");
        let rules = derive_rules(topo, self.protocol);

        for switch in topo.switches().iter().take(topo.len().saturating_sub(1)) {
            let fail = |source: anyhow::Error| Error::FlowProgramming {
                switch: switch.name.clone(),
                source,
            };
            run_ovs(
                backend,
                OvsCommand::DelFlows {
                    bridge: switch.name.clone(),
                },
            )
            .map_err(fail)?;

            for rule in rules.iter().filter(|r| r.switch == switch.name) {
                let flow = self.resolve(backend, rule).map_err(fail)?;
                run_ovs(
                    backend,
                    OvsCommand::AddFlow {
                        bridge: switch.name.clone(),
                        flow,
                    },
                )
                .map_err(fail)?;
                debug!(switch = switch.name, %flow, "flow installed");
            }
        }

        Ok(rules)
    }

    fn resolve<B: Backend>(
        &self,
        backend: &mut B,
        rule: &ForwardingRule,
    ) -> anyhow::Result<FlowSpec> {
        Ok(FlowSpec {
            protocol: rule.protocol,
            in_port: ofport(backend, &rule.in_port)?,
            out_port: ofport(backend, &rule.out_port)?,
        })
    }

    /// Read the flow tables of the first `switch_count` switches.
    pub fn dump<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
        switch_count: usize,
    ) -> Result<Vec<FlowTable>> {
        topo.switches()
            .iter()
            .take(switch_count)
            .map(|switch| {
                let out = run_ovs(
                    backend,
                    OvsCommand::DumpFlows {
                        bridge: switch.name.clone(),
                    },
                )
                .map_err(|source| Error::FlowProgramming {
                    switch: switch.name.clone(),
                    source,
                })?;
                Ok(FlowTable {
                    switch: switch.name.clone(),
                    dump: out,
                })
            })
            .collect()
    }

    /// Turn off RX/TX checksum offload on every switch port facing a host.
    pub fn disable_checksum_offload<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
    ) -> Result<()> {
        info!("*** Disable checksum offloading");
        for i in 0..topo.len() {
            let iface = topo.host_port(i);
            let cmd = KernelCommand::SetOffload {
                iface: iface.clone(),
                enabled: false,
            };
            let result: anyhow::Result<()> = cmd.invocations().and_then(|invs| {
                for inv in invs {
                    backend.run(&inv)?.checked(&inv)?;
                }
                Ok(())
            });
            result
                .with_context(|| format!("disable offload on {iface}"))
                .map_err(Error::TopologyBuild)?;
        }
        Ok(())
    }
}

fn run_ovs<B: Backend>(backend: &mut B, cmd: OvsCommand) -> anyhow::Result<String> {
    let inv = cmd.invocation()?;
    let out = backend.run(&inv)?.checked(&inv)?;
    Ok(out.stdout)
}

fn ofport<B: Backend>(backend: &mut B, iface: &str) -> anyhow::Result<u32> {
    let stdout = run_ovs(
        backend,
        OvsCommand::GetOfport {
            iface: iface.to_string(),
        },
    )
    .with_context(|| format!("resolve OpenFlow port of {iface}"))?;
    parse_ofport(iface, &stdout)
}
