//! Multi-hop network coding testbed.
//!
//! Builds a linear chain of hosts and switches, pins UDP traffic to the
//! single path with explicit OpenFlow rules, places an encoder, a decoder
//! and a chain of relays along it, and measures a traffic flow for every
//! placement of the single active recoder.
//!
//! The emulation itself lives in the `network-sim` crate; everything here
//! talks to it through [`network_sim::Backend`].

// Use mimalloc as the global allocator for tests (non-Windows only)
#[cfg(not(windows))]
#[cfg(test)]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod chain;
pub mod config;
pub mod error;
pub mod flows;
pub mod functions;
pub mod role;
pub mod sweep;
pub mod topology;
pub mod traffic;

// Test helpers module - available when test-internals feature is enabled
#[cfg(any(test, feature = "test-internals"))]
pub mod test_helpers;

#[cfg(test)]
pub mod tests;

pub use config::ExperimentConfig;
pub use error::{Error, Result};
pub use role::{ActionMap, FunctionRole};
pub use sweep::{Sweep, SweepReport, SweepState};
pub use topology::{Network, Topology};
