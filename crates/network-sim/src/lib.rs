//! Emulation substrate for multi-hop network experiments.
//!
//! Uses Linux network namespaces as hosts, Open vSwitch bridges as
//! switches and `tc netem` on veth pairs as impaired links.
//!
//! # Modules
//!
//! - [`backend`]: The [`Backend`] trait and the namespace/OVS implementation
//! - [`command`]: Typed argv invocations and `sudo` helpers
//! - [`ovs`]: Typed `ovs-vsctl`/`ovs-ofctl`/kernel tuning commands
//! - [`impairment`]: `tc netem` configuration and application
//! - [`process`]: Managed long-running processes with captured logs
//! - [`probe`]: Readiness probes
//! - [`topology`]: Namespace and veth management (RAII cleanup on drop)
//! - [`test_util`]: Privilege checks and unique name generation for tests

pub mod backend;
pub mod command;
pub mod impairment;
pub mod node;
pub mod ovs;
pub mod probe;
pub mod process;
pub mod test_util;
pub mod topology;

pub use backend::{Backend, NetnsBackend, NetnsOptions};
pub use command::{CommandOutput, Invocation};
pub use impairment::{ImpairmentConfig, apply_impairment};
pub use node::{HostConfig, LinkConfig, SwitchConfig};
pub use ovs::{FlowSpec, KernelCommand, OvsCommand, Protocol};
pub use probe::wait_for_udp_listener;
pub use process::{LogTarget, ManagedProcess, NamespaceProcess, ProcessState};
pub use test_util::{check_chain_deps, check_privileges, unique_ns_name};
pub use topology::Namespace;
