//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::sync::{Mutex, MutexGuard};

use network_sim::test_util::check_binary;
use network_sim::{Invocation, check_chain_deps};

/// Chains use fixed node names (`h1`, `s1`, ...), so only one may exist at
/// a time on the machine.
static CHAIN_LOCK: Mutex<()> = Mutex::new(());

/// Check all integration test dependencies. Returns `true` if tests should
/// be skipped (prints the reason to stderr). Use at the top of every test.
pub fn skip_without_deps() -> bool {
    match check_chain_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Like `skip_without_deps` but also requires the given tools.
pub fn skip_without_tools(tools: &[&str]) -> bool {
    if skip_without_deps() {
        return true;
    }
    for tool in tools {
        if check_binary(tool).is_none() {
            eprintln!("Skipping: system tool '{tool}' not found");
            return true;
        }
    }
    false
}

pub fn chain_lock() -> MutexGuard<'static, ()> {
    CHAIN_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A network function stand-in that ignores its arguments and idles.
pub fn idle_function() -> Invocation {
    Invocation::new("sh").args(["-c", "sleep 120", "function"])
}

/// True if an OVS bridge with this name exists.
pub fn bridge_exists(name: &str) -> bool {
    std::process::Command::new("sudo")
        .args(["-n", "ovs-vsctl", "br-exists", name])
        .status()
        .is_ok_and(|s| s.success())
}
