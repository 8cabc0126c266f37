//! Readiness probes for processes running inside emulated hosts.

use std::time::{Duration, Instant};

use anyhow::{Result, bail};

use crate::backend::Backend;
use crate::command::Invocation;

/// Poll interval shared by all probes.
pub const PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// True if `ss -uln` output lists a UDP listener on `port`.
pub fn has_udp_listener(ss_output: &str, port: u16) -> bool {
    let suffix = format!(":{port}");
    ss_output.lines().any(|line| {
        line.split_whitespace()
            .any(|field| field.ends_with(&suffix))
    })
}

/// Poll `ss -uln` inside `host` until `port` appears as a UDP listener.
pub fn wait_for_udp_listener<B: Backend + ?Sized>(
    backend: &mut B,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<()> {
    let start = Instant::now();
    let ss = Invocation::new("ss").arg("-uln");
    let mut last_ss_output;

    loop {
        let out = backend.exec(host, &ss)?;
        if has_udp_listener(&out.stdout, port) {
            return Ok(());
        }
        last_ss_output = out.stdout;

        if start.elapsed() >= timeout {
            bail!(
                "timeout waiting for UDP listener on port {port} in {host}\nlast ss -uln \
                 output:\n{last_ss_output}"
            );
        }
        std::thread::sleep(PROBE_INTERVAL.min(timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SS: &str = "\
State  Recv-Q Send-Q Local Address:Port Peer Address:Port
UNCONN 0      0            0.0.0.0:9999      0.0.0.0:*
UNCONN 0      0          127.0.0.1:19999     0.0.0.0:*
";

    #[test]
    fn test_listener_matches_exact_port() {
        assert!(has_udp_listener(SS, 9999));
        assert!(has_udp_listener(SS, 19999));
        assert!(!has_udp_listener(SS, 999));
        assert!(!has_udp_listener(SS, 5000));
    }
}
