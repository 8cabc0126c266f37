//! The experiment loop: one network, one variant per active-recoder position.

use std::fmt;

use network_sim::Backend;
use tracing::{error, info, warn};

use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::flows::{FlowProgrammer, FlowTable};
use crate::functions::{FunctionLogs, FunctionManager};
use crate::role::ActionMap;
use crate::topology::{Network, Topology};
use crate::traffic::{TrafficDriver, TrafficReport};

/// States of a run. Per-variant states carry the variant index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepState {
    Idle,
    NetworkUp,
    Deployed(usize),
    Measuring(usize),
    Collected(usize),
    TornDown(usize),
    NetworkDown,
}

impl fmt::Display for SweepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SweepState::Idle => write!(f, "idle"),
            SweepState::NetworkUp => write!(f, "network-up"),
            SweepState::Deployed(k) => write!(f, "deployed[{k}]"),
            SweepState::Measuring(k) => write!(f, "measuring[{k}]"),
            SweepState::Collected(k) => write!(f, "collected[{k}]"),
            SweepState::TornDown(k) => write!(f, "torn-down[{k}]"),
            SweepState::NetworkDown => write!(f, "network-down"),
        }
    }
}

/// Action maps in execution order: relay `k` recodes in variant `k`, or a
/// single all-forward variant.
pub fn plan_variants(relay_count: usize, all_forward: bool) -> Result<Vec<ActionMap>> {
    if all_forward {
        return Ok(vec![ActionMap::all_forward(relay_count)]);
    }
    (0..relay_count)
        .map(|k| ActionMap::single_recoder(relay_count, k))
        .collect()
}

#[derive(Debug, Clone)]
pub struct VariantOutcome {
    pub index: usize,
    pub action_map: ActionMap,
    pub traffic: Option<TrafficReport>,
    pub logs: FunctionLogs,
    /// Measurement failure, reported but not fatal to the sweep.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub transitions: Vec<SweepState>,
    pub flow_tables: Vec<FlowTable>,
    pub variants: Vec<VariantOutcome>,
}

impl SweepReport {
    pub fn action_maps(&self) -> Vec<String> {
        self.variants.iter().map(|v| v.action_map.compact()).collect()
    }

    fn enter(&mut self, state: SweepState) {
        tracing::debug!(%state, "sweep state");
        self.transitions.push(state);
    }
}

pub struct Sweep {
    config: ExperimentConfig,
    flows: FlowProgrammer,
    functions: FunctionManager,
    traffic: TrafficDriver,
}

impl Sweep {
    pub fn new(config: ExperimentConfig) -> Self {
        Self {
            flows: FlowProgrammer::new(config.protocol),
            functions: FunctionManager::new(config.binaries.clone(), config.readiness.clone()),
            traffic: TrafficDriver::new(config.traffic.clone()),
            config,
        }
    }

    pub fn run<B: Backend>(&self, backend: B) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        self.run_recorded(backend, &mut report)?;
        Ok(report)
    }

    /// Like [`Sweep::run`], but the report survives a failed run.
    ///
    /// The network is stopped on every path, after which the report ends
    /// in [`SweepState::NetworkDown`].
    pub fn run_recorded<B: Backend>(&self, backend: B, report: &mut SweepReport) -> Result<()> {
        report.enter(SweepState::Idle);
        let variants = self.config.validate().and_then(|()| {
            plan_variants(self.config.relay_count(), self.config.all_forward)
        });
        let variants = match variants {
            Ok(v) => v,
            Err(err) => {
                error!(kind = err.kind(), "*** Emulation has errors:\n{err}");
                return Err(err);
            }
        };

        let mut net = Network::new(backend);
        let result = self.run_network(&mut net, &variants, report);
        if let Err(err) = &result {
            error!(kind = err.kind(), "*** Emulation has errors:\n{err}");
        } else {
            info!("*** Emulation stops...");
        }
        net.stop();
        report.enter(SweepState::NetworkDown);
        result
    }

    fn run_network<B: Backend>(
        &self,
        net: &mut Network<B>,
        variants: &[ActionMap],
        report: &mut SweepReport,
    ) -> Result<()> {
        net.disable_ipv6()?;
        let topo = net.build(self.config.host_num, &self.config.links)?;
        let backend = net.backend_mut();
        self.flows.install(backend, &topo)?;
        if self.config.dump_flows {
            report.flow_tables = self.flows.dump(backend, &topo, topo.len())?;
            for table in &report.flow_tables {
                info!("### Flow table of the switch {} after adding flows:", table.switch);
                println!("{}", table.dump);
            }
        }
        self.flows.disable_checksum_offload(backend, &topo)?;
        report.enter(SweepState::NetworkUp);

        info!("*** Run mobile recoder experiment.");
        for (k, action_map) in variants.iter().enumerate() {
            let outcome = self.run_variant(backend, &topo, k, action_map, report)?;
            report.variants.push(outcome);
        }
        Ok(())
    }

    fn run_variant<B: Backend>(
        &self,
        backend: &mut B,
        topo: &Topology,
        k: usize,
        action_map: &ActionMap,
        report: &mut SweepReport,
    ) -> Result<VariantOutcome> {
        info!(
            "Number of recoders: {}, the action map: {action_map}",
            action_map.len()
        );
        let mut set = self.functions.deploy(
            backend,
            topo,
            self.config.relay_start,
            action_map.len(),
            action_map,
        )?;
        report.enter(SweepState::Deployed(k));

        std::thread::sleep(self.config.pre_traffic_settle);
        report.enter(SweepState::Measuring(k));
        let (client, server) = (&topo.hosts()[0], &topo.hosts()[topo.len() - 1]);
        let measured = self.traffic.run(
            backend,
            client,
            server,
            self.config.protocol,
            self.config.duration,
            self.config.show_client_log,
        );
        let (traffic, error) = match measured {
            Ok(r) => (Some(r), None),
            Err(err) => {
                warn!(variant = k, "{err}");
                (None, Some(err.to_string()))
            }
        };

        let logs = self.functions.collect_logs(&mut set, self.config.coder_logs);
        logs.print();
        report.enter(SweepState::Collected(k));

        self.functions.teardown(set);
        report.enter(SweepState::TornDown(k));

        Ok(VariantOutcome {
            index: k,
            action_map: action_map.clone(),
            traffic,
            logs,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_variants() {
        let plan = plan_variants(3, false).unwrap();
        let compact: Vec<_> = plan.iter().map(ActionMap::compact).collect();
        assert_eq!(compact, ["[R,F,F]", "[F,R,F]", "[F,F,R]"]);

        let plan = plan_variants(3, true).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].compact(), "[F,F,F]");

        assert_eq!(plan_variants(1, false).unwrap()[0].compact(), "[R]");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SweepState::Deployed(2).to_string(), "deployed[2]");
        assert_eq!(SweepState::NetworkDown.to_string(), "network-down");
    }
}
