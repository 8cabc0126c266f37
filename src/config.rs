//! Experiment configuration.
//!
//! Defaults reproduce the reference experiment: a 7-hop chain, UDP at
//! 50 Kbit/s for 30 seconds, one active recoder per variant.

use std::time::Duration;

use network_sim::{Invocation, NetnsOptions, Protocol};

use crate::chain::{LinkProfile, relay_count, validate_host_num, validate_relay_range};
use crate::error::{Error, Result};
use crate::functions::{FunctionBinaries, LogSelection, Readiness};
use crate::traffic::{TrafficSettings, payload_len};

/// Size of one coded symbol on the wire, in bytes.
pub const SYMBOL_SIZE: usize = 256;
/// Coding metadata carried in front of every symbol, in bytes.
pub const META_DATA_LEN: usize = 2;

pub const DEFAULT_HOSTS: usize = 7;
/// Index of the first relay host; hosts 0 and 1 are source and encoder.
pub const RELAY_START: usize = 2;
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

#[derive(Clone, Debug)]
pub struct ExperimentConfig {
    pub host_num: usize,
    /// Run a single variant with every relay forwarding.
    pub all_forward: bool,
    pub relay_start: usize,
    pub protocol: Protocol,
    pub duration: Duration,
    pub links: LinkProfile,
    pub traffic: TrafficSettings,
    pub binaries: FunctionBinaries,
    pub readiness: Readiness,
    /// Wait between deployment and the start of traffic.
    pub pre_traffic_settle: Duration,
    pub coder_logs: LogSelection,
    pub show_client_log: bool,
    /// Print every switch's flow table after installation.
    pub dump_flows: bool,
    pub controller_bin: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            host_num: DEFAULT_HOSTS,
            all_forward: false,
            relay_start: RELAY_START,
            protocol: Protocol::Udp,
            duration: Duration::from_secs(30),
            links: LinkProfile::default(),
            traffic: TrafficSettings::default(),
            binaries: FunctionBinaries::default(),
            readiness: Readiness::default(),
            pre_traffic_settle: DEFAULT_SETTLE,
            coder_logs: LogSelection::default(),
            show_client_log: false,
            dump_flows: false,
            controller_bin: NetnsOptions::default().controller_bin,
        }
    }
}

impl ExperimentConfig {
    /// Defaults with every wait removed, for in-memory backends.
    pub fn immediate(host_num: usize) -> Self {
        Self {
            host_num,
            duration: Duration::ZERO,
            readiness: Readiness::immediate(),
            pre_traffic_settle: Duration::ZERO,
            ..Default::default()
        }
    }

    pub fn relay_count(&self) -> usize {
        relay_count(self.host_num)
    }

    pub fn validate(&self) -> Result<()> {
        validate_host_num(self.host_num)?;
        payload_len(self.traffic.symbol_size, self.traffic.meta_data_len)?;
        for (name, inv) in [
            ("encoder", &self.binaries.encoder),
            ("decoder", &self.binaries.decoder),
            ("recoder", &self.binaries.recoder),
        ] {
            check_command(name, inv)?;
        }
        if self.traffic.tool.trim().is_empty() {
            return Err(Error::config("traffic tool is empty"));
        }
        validate_relay_range(self.host_num, self.relay_start, self.relay_count())?;
        Ok(())
    }

    pub fn netns_options(&self) -> NetnsOptions {
        NetnsOptions {
            controller_bin: self.controller_bin.clone(),
            ..Default::default()
        }
    }
}

fn check_command(name: &str, inv: &Invocation) -> Result<()> {
    inv.validate()
        .map_err(|e| Error::config(format!("{name} command: {e:#}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.host_num, 7);
        assert_eq!(config.relay_count(), 3);
        assert_eq!(config.traffic.port, 9999);
        assert_eq!(config.traffic.bandwidth, "50K");
        assert!(config.coder_logs.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.host_num = 4;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = ExperimentConfig::default();
        config.traffic.meta_data_len = config.traffic.symbol_size;
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.binaries.decoder = Invocation::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_relays_outside_the_coders() {
        for relay_start in [0, 1, 3] {
            let config = ExperimentConfig {
                relay_start,
                ..ExperimentConfig::immediate(7)
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "start={relay_start}");
        }

        let config = ExperimentConfig {
            relay_start: 2,
            ..ExperimentConfig::immediate(5)
        };
        config.validate().unwrap();
    }
}
