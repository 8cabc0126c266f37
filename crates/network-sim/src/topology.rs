use std::net::Ipv4Addr;

use anyhow::{Context, Result};
use tracing::debug;

use crate::command::{CommandOutput, Invocation, sudo, sudo_checked};
use crate::ovs::validate_ifname;

/// A Linux network namespace standing in for one emulated host.
///
/// Creates the namespace on construction, brings up loopback, and deletes
/// it on drop. All commands inside the namespace run via `sudo ip netns exec`.
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        validate_ifname(name)?;

        // Clean up stale namespace with same name (idempotent)
        let _ = sudo(&ip(["netns", "del", name]));

        sudo_checked(&ip(["netns", "add", name]))
            .with_context(|| format!("create netns '{name}'"))?;

        debug!(ns = name, "created network namespace");

        let ns = Self {
            name: name.to_string(),
        };
        // Loopback is optional; a failure here is ignored.
        let _ = ns.exec(&ip(["link", "set", "lo", "up"]));

        Ok(ns)
    }

    /// Wrap `invocation` so it runs inside this namespace.
    pub fn wrap(&self, invocation: &Invocation) -> Invocation {
        Invocation::new("ip")
            .args(["netns", "exec", &self.name, invocation.program()])
            .args(invocation.arguments().iter().cloned())
    }

    /// Run a command inside this namespace, returning raw output.
    pub fn exec(&self, invocation: &Invocation) -> Result<CommandOutput> {
        sudo(&self.wrap(invocation))
            .with_context(|| format!("exec '{}' in ns '{}'", invocation.program(), self.name))
    }

    /// Run a command inside this namespace, failing if it exits non-zero.
    pub fn exec_checked(&self, invocation: &Invocation) -> Result<CommandOutput> {
        self.exec(invocation)?.checked(invocation)
    }

    /// Move `iface` (created in the root namespace) into this namespace,
    /// address it and bring it up.
    pub fn adopt_interface(
        &self,
        iface: &str,
        addr: Ipv4Addr,
        prefix_len: u8,
        mac: &str,
    ) -> Result<()> {
        sudo_checked(&ip(["link", "set", iface, "netns", &self.name]))
            .with_context(|| format!("move '{iface}' into ns '{}'", self.name))?;
        self.exec_checked(&ip(["link", "set", "dev", iface, "address", mac]))
            .context("set MAC")?;
        self.exec_checked(&ip(["addr", "add", &format!("{addr}/{prefix_len}"), "dev", iface]))
            .context("set IP")?;
        self.exec_checked(&ip(["link", "set", iface, "up"]))
            .context("bring link up")?;

        debug!(ns = self.name, iface, %addr, "interface configured");
        Ok(())
    }

    /// Pin `peer` to `mac` so no ARP resolution crosses the emulated links.
    pub fn add_static_arp(&self, iface: &str, peer: Ipv4Addr, mac: &str) -> Result<()> {
        self.exec_checked(&ip([
            "neigh",
            "replace",
            &peer.to_string(),
            "lladdr",
            mac,
            "dev",
            iface,
            "nud",
            "permanent",
        ]))
        .with_context(|| format!("static ARP for {peer} in ns '{}'", self.name))?;
        Ok(())
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(ns = self.name, "deleting network namespace");
        let _ = sudo(&ip(["netns", "del", &self.name]));
    }
}

/// Create a veth pair `a`/`b` in the root namespace.
pub fn create_veth(a: &str, b: &str) -> Result<()> {
    validate_ifname(a)?;
    validate_ifname(b)?;

    // Clean up stale veth (idempotent)
    let _ = sudo(&ip(["link", "del", a]));

    sudo_checked(&ip(["link", "add", a, "type", "veth", "peer", "name", b]))
        .context("create veth pair")?;
    debug!(a, b, "created veth pair");
    Ok(())
}

/// Bring up an interface that stays in the root namespace.
pub fn link_up(iface: &str) -> Result<()> {
    sudo_checked(&ip(["link", "set", iface, "up"]))
        .with_context(|| format!("bring '{iface}' up"))?;
    Ok(())
}

/// Delete a root-namespace interface; deleting one end removes its peer.
pub fn delete_link(iface: &str) {
    let _ = sudo(&ip(["link", "del", iface]));
}

fn ip<const N: usize>(args: [&str; N]) -> Invocation {
    Invocation::new("ip").args(args)
}
