//! Node names, addresses and link impairment for a linear chain of hops.
//!
//! Hop `i` (0-based) is host `h{i+1}` at `10.0.0.{i+1}` attached to switch
//! `s{i+1}`; switch `s{i+1}` connects to `s{i}` for every hop after the first.

use std::net::Ipv4Addr;

use network_sim::{HostConfig, ImpairmentConfig, LinkConfig, SwitchConfig};

use crate::error::{Error, Result};

/// Encoder, decoder, the two end hosts and at least one relay.
pub const MIN_HOSTS: usize = 5;
/// `10.0.0.{i+1}` leaves no room for more.
pub const MAX_HOSTS: usize = 254;
/// Hosts that never run a relay: source, encoder, decoder, sink.
pub const NON_RELAY_HOSTS: usize = 4;

pub const HOST_LINK_DELAY_MS: u32 = 20;
pub const SWITCH_LINK_DELAY_MS: u32 = 20;
pub const SWITCH_LINK_LOSS_PERCENT: f32 = 20.0;

/// Impairment of the two link classes in the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkProfile {
    /// Host to its own switch; carries control traffic, so lossless.
    pub host_link: ImpairmentConfig,
    /// Between consecutive switches; where losses are emulated.
    pub switch_link: ImpairmentConfig,
}

impl Default for LinkProfile {
    fn default() -> Self {
        Self {
            host_link: ImpairmentConfig::delay(HOST_LINK_DELAY_MS),
            switch_link: ImpairmentConfig::lossy(SWITCH_LINK_DELAY_MS, SWITCH_LINK_LOSS_PERCENT),
        }
    }
}

pub fn host_name(index: usize) -> String {
    format!("h{}", index + 1)
}

pub fn switch_name(index: usize) -> String {
    format!("s{}", index + 1)
}

pub fn host_ip(index: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, (index + 1) as u8)
}

pub fn host_mac(index: usize) -> String {
    format!("00:00:00:00:00:{:02x}", index + 1)
}

/// Interface on `from` facing `to`, e.g. `s2-s3`.
pub fn iface_name(from: &str, to: &str) -> String {
    format!("{from}-{to}")
}

/// Number of relay hops in a chain of `host_num` hosts.
pub fn relay_count(host_num: usize) -> usize {
    host_num.saturating_sub(NON_RELAY_HOSTS)
}

pub fn validate_host_num(host_num: usize) -> Result<()> {
    if host_num < MIN_HOSTS {
        return Err(Error::config(format!(
            "require at least {MIN_HOSTS} hosts, got {host_num}"
        )));
    }
    if host_num > MAX_HOSTS {
        return Err(Error::config(format!(
            "at most {MAX_HOSTS} hosts fit the 10.0.0.0/24 addressing, got {host_num}"
        )));
    }
    Ok(())
}

/// Relays occupy hosts `[relay_start, relay_start + relay_count)`, strictly
/// between the encoder (index 1) and the decoder (index `host_num - 2`).
/// Returns the decoder index.
pub fn validate_relay_range(
    host_num: usize,
    relay_start: usize,
    relay_count: usize,
) -> Result<usize> {
    let decoder_idx = host_num.checked_sub(2).filter(|d| *d > 1).ok_or_else(|| {
        Error::config(format!("a chain of {host_num} hosts has no room for coders"))
    })?;
    if relay_count > 0 && (relay_start <= 1 || relay_start + relay_count > decoder_idx) {
        return Err(Error::config(format!(
            "relays [{relay_start}, {}) must lie strictly between encoder h2 and decoder h{}",
            relay_start + relay_count,
            decoder_idx + 1
        )));
    }
    Ok(decoder_idx)
}

/// Everything the assembler needs to materialize a chain, computed without
/// touching any backend.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainSpec {
    pub hosts: Vec<HostConfig>,
    pub switches: Vec<SwitchConfig>,
    /// `host_links[i]` joins `s{i+1}` and `h{i+1}`.
    pub host_links: Vec<LinkConfig>,
    /// `switch_links[i]` joins `s{i+2}` and `s{i+1}`.
    pub switch_links: Vec<LinkConfig>,
}

impl ChainSpec {
    pub fn new(host_num: usize) -> Result<Self> {
        Self::with_profile(host_num, &LinkProfile::default())
    }

    pub fn with_profile(host_num: usize, profile: &LinkProfile) -> Result<Self> {
        validate_host_num(host_num)?;
        profile
            .host_link
            .validate()
            .and_then(|()| profile.switch_link.validate())
            .map_err(|e| Error::config(format!("link profile: {e:#}")))?;

        let hosts = (0..host_num)
            .map(|i| HostConfig {
                name: host_name(i),
                ip: host_ip(i),
                prefix_len: 8,
                mac: host_mac(i),
            })
            .collect();
        let switches = (0..host_num)
            .map(|i| SwitchConfig {
                name: switch_name(i),
            })
            .collect();
        let host_links = (0..host_num)
            .map(|i| LinkConfig::named(&switch_name(i), &host_name(i), profile.host_link.clone()))
            .collect();
        let switch_links = (1..host_num)
            .map(|i| {
                LinkConfig::named(&switch_name(i), &switch_name(i - 1), profile.switch_link.clone())
            })
            .collect();

        Ok(Self {
            hosts,
            switches,
            host_links,
            switch_links,
        })
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}
