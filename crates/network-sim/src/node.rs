//! Plain descriptions of the nodes and links handed to a [`Backend`].
//!
//! [`Backend`]: crate::backend::Backend

use std::net::Ipv4Addr;

use crate::impairment::ImpairmentConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub name: String,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchConfig {
    pub name: String,
}

/// A point-to-point link; `iface_a` lives on `node_a`, `iface_b` on `node_b`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    pub node_a: String,
    pub iface_a: String,
    pub node_b: String,
    pub iface_b: String,
    pub impairment: ImpairmentConfig,
}

impl LinkConfig {
    /// Link with interfaces named after their endpoints: `a-b` and `b-a`.
    pub fn named(node_a: &str, node_b: &str, impairment: ImpairmentConfig) -> Self {
        Self {
            node_a: node_a.to_string(),
            iface_a: format!("{node_a}-{node_b}"),
            node_b: node_b.to_string(),
            iface_b: format!("{node_b}-{node_a}"),
            impairment,
        }
    }
}
