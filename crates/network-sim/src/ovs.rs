//! Typed Open vSwitch and kernel tuning commands.
//!
//! Each command is validated before it is turned into an [`Invocation`],
//! so a malformed interface name fails here instead of inside `ovs-ofctl`.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};

use crate::command::Invocation;

/// Linux netdev name limit, also enforced for bridge names.
pub const IFNAMSIZ_MAX: usize = 15;

/// Transport protocol matched by flow rules and used by the traffic tool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    #[default]
    Udp,
    Tcp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
        }
    }

    pub const fn is_udp(self) -> bool {
        matches!(self, Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            _ => Err(format!("invalid protocol '{s}': use udp or tcp")),
        }
    }
}

/// Exact-match flow: `<proto>,in_port=<n>,actions=output=<m>`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowSpec {
    pub protocol: Protocol,
    pub in_port: u32,
    pub out_port: u32,
}

impl fmt::Display for FlowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},in_port={},actions=output={}",
            self.protocol, self.in_port, self.out_port
        )
    }
}

/// Check a bridge or interface name before it reaches the command line.
pub fn validate_ifname(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("empty interface name");
    }
    if name.len() > IFNAMSIZ_MAX {
        bail!("interface name '{name}' exceeds {IFNAMSIZ_MAX} bytes");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        bail!("interface name '{name}' contains invalid characters");
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OvsCommand {
    /// Create a bridge that drops anything no flow or controller handles.
    AddBridge { bridge: String },
    DelBridge { bridge: String },
    AddPort { bridge: String, port: String },
    SetController { bridge: String, target: String },
    GetOfport { iface: String },
    DelFlows { bridge: String },
    AddFlow { bridge: String, flow: FlowSpec },
    DumpFlows { bridge: String },
}

impl OvsCommand {
    pub fn invocation(&self) -> Result<Invocation> {
        let inv = match self {
            OvsCommand::AddBridge { bridge } => {
                validate_ifname(bridge)?;
                Invocation::new("ovs-vsctl").args([
                    "--may-exist",
                    "add-br",
                    bridge,
                    "--",
                    "set-fail-mode",
                    bridge,
                    "secure",
                ])
            }
            OvsCommand::DelBridge { bridge } => {
                validate_ifname(bridge)?;
                Invocation::new("ovs-vsctl").args(["--if-exists", "del-br", bridge])
            }
            OvsCommand::AddPort { bridge, port } => {
                validate_ifname(bridge)?;
                validate_ifname(port)?;
                Invocation::new("ovs-vsctl").args(["--may-exist", "add-port", bridge, port])
            }
            OvsCommand::SetController { bridge, target } => {
                validate_ifname(bridge)?;
                if target.is_empty() || target.contains(char::is_whitespace) {
                    bail!("invalid controller target '{target}'");
                }
                Invocation::new("ovs-vsctl").args(["set-controller", bridge, target])
            }
            OvsCommand::GetOfport { iface } => {
                validate_ifname(iface)?;
                Invocation::new("ovs-vsctl").args(["get", "Interface", iface, "ofport"])
            }
            OvsCommand::DelFlows { bridge } => {
                validate_ifname(bridge)?;
                Invocation::new("ovs-ofctl").args(["del-flows", bridge])
            }
            OvsCommand::AddFlow { bridge, flow } => {
                validate_ifname(bridge)?;
                Invocation::new("ovs-ofctl")
                    .args(["add-flow", bridge])
                    .arg(flow.to_string())
            }
            OvsCommand::DumpFlows { bridge } => {
                validate_ifname(bridge)?;
                Invocation::new("ovs-ofctl").args(["dump-flows", bridge])
            }
        };
        Ok(inv)
    }
}

/// Parse the output of `ovs-vsctl get Interface <iface> ofport`.
///
/// OVS reports `-1` (or `[]`) for an interface it failed to attach.
pub fn parse_ofport(iface: &str, stdout: &str) -> Result<u32> {
    let raw = stdout.trim();
    match raw.parse::<i64>() {
        Ok(port) if port > 0 && port < i64::from(u16::MAX) => Ok(port as u32),
        _ => bail!("interface '{iface}' has no usable OpenFlow port (got '{raw}')"),
    }
}

/// Host-wide kernel knobs toggled around an experiment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KernelCommand {
    /// Toggle RX/TX checksum offload on one interface.
    SetOffload { iface: String, enabled: bool },
    /// Toggle IPv6 on all and default interfaces.
    SetIpv6 { disabled: bool },
}

impl KernelCommand {
    pub fn invocations(&self) -> Result<Vec<Invocation>> {
        match self {
            KernelCommand::SetOffload { iface, enabled } => {
                validate_ifname(iface)?;
                let state = if *enabled { "on" } else { "off" };
                Ok(vec![Invocation::new("ethtool").args([
                    "--offload",
                    iface,
                    "rx",
                    state,
                    "tx",
                    state,
                ])])
            }
            KernelCommand::SetIpv6 { disabled } => {
                let value = u8::from(*disabled);
                Ok(["all", "default"]
                    .iter()
                    .map(|scope| {
                        Invocation::new("sysctl")
                            .arg("-w")
                            .arg(format!("net.ipv6.conf.{scope}.disable_ipv6={value}"))
                    })
                    .collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_spec_format() {
        let flow = FlowSpec {
            protocol: Protocol::Udp,
            in_port: 1,
            out_port: 3,
        };
        assert_eq!(flow.to_string(), "udp,in_port=1,actions=output=3");
    }

    #[test]
    fn test_add_flow_keeps_match_as_single_argument() {
        let cmd = OvsCommand::AddFlow {
            bridge: "s2".into(),
            flow: FlowSpec {
                protocol: Protocol::Tcp,
                in_port: 2,
                out_port: 1,
            },
        };
        let inv = cmd.invocation().unwrap();
        assert_eq!(
            inv.argv(),
            ["ovs-ofctl", "add-flow", "s2", "tcp,in_port=2,actions=output=1"]
        );
    }

    #[test]
    fn test_invalid_names_rejected() {
        assert!(validate_ifname("s1-h1").is_ok());
        assert!(validate_ifname("").is_err());
        assert!(validate_ifname("a-very-long-interface").is_err());
        assert!(validate_ifname("s1;reboot").is_err());
        let cmd = OvsCommand::DelFlows {
            bridge: "s1 s2".into(),
        };
        assert!(cmd.invocation().is_err());
    }

    #[test]
    fn test_parse_ofport() {
        assert_eq!(parse_ofport("s1-h1", "3\n").unwrap(), 3);
        assert!(parse_ofport("s1-h1", "-1\n").is_err());
        assert!(parse_ofport("s1-h1", "[]").is_err());
    }

    #[test]
    fn test_ipv6_toggle_touches_all_and_default() {
        let invs = KernelCommand::SetIpv6 { disabled: true }
            .invocations()
            .unwrap();
        let lines: Vec<String> = invs.iter().map(ToString::to_string).collect();
        assert_eq!(
            lines,
            [
                "sysctl -w net.ipv6.conf.all.disable_ipv6=1",
                "sysctl -w net.ipv6.conf.default.disable_ipv6=1",
            ]
        );
    }

    #[test]
    fn test_offload_command() {
        let invs = KernelCommand::SetOffload {
            iface: "s3-h3".into(),
            enabled: false,
        }
        .invocations()
        .unwrap();
        assert_eq!(invs[0].to_string(), "ethtool --offload s3-h3 rx off tx off");
    }

    #[test]
    fn test_protocol_parse() {
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert!("sctp".parse::<Protocol>().is_err());
    }
}
