//! Traffic generation across the chain and collection of its reports.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use network_sim::{
    Backend, HostConfig, Invocation, LogTarget, ManagedProcess, ProcessState, Protocol,
};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Report interval passed to both ends, in seconds.
pub const REPORT_INTERVAL_SECS: u32 = 1;
/// How long a client may overrun its duration before it is stopped.
pub const CLIENT_GRACE: Duration = Duration::from_secs(5);

const CLIENT_POLL: Duration = Duration::from_millis(100);

/// Payload length that makes every generated datagram exactly one coded
/// symbol: the symbol size minus the coding metadata header.
pub fn payload_len(symbol_size: usize, meta_data_len: usize) -> Result<usize> {
    symbol_size
        .checked_sub(meta_data_len)
        .filter(|len| *len > 0)
        .ok_or_else(|| {
            Error::config(format!(
                "symbol size {symbol_size} leaves no payload after {meta_data_len} metadata bytes"
            ))
        })
}

/// `<tool> -s -p <port> -i <interval> [-u]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IperfServer {
    pub tool: String,
    pub port: u16,
    pub interval_secs: u32,
    pub protocol: Protocol,
}

impl IperfServer {
    pub fn invocation(&self) -> Invocation {
        let inv = Invocation::new(&self.tool)
            .arg("-s")
            .args(["-p".to_string(), self.port.to_string()])
            .args(["-i".to_string(), self.interval_secs.to_string()]);
        udp_flag(inv, self.protocol)
    }
}

/// `<tool> -c <ip> -p <port> -t <secs> -i <interval> -b <bw> -l <len> [-u]`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IperfClient {
    pub tool: String,
    pub server_ip: Ipv4Addr,
    pub port: u16,
    pub duration: Duration,
    pub interval_secs: u32,
    pub bandwidth: String,
    pub payload_len: usize,
    pub protocol: Protocol,
}

impl IperfClient {
    pub fn invocation(&self) -> Invocation {
        let inv = Invocation::new(&self.tool).args([
            "-c".to_string(),
            self.server_ip.to_string(),
            "-p".to_string(),
            self.port.to_string(),
            "-t".to_string(),
            self.duration.as_secs().to_string(),
            "-i".to_string(),
            self.interval_secs.to_string(),
            "-b".to_string(),
            self.bandwidth.clone(),
            "-l".to_string(),
            self.payload_len.to_string(),
        ]);
        udp_flag(inv, self.protocol)
    }
}

fn udp_flag(inv: Invocation, protocol: Protocol) -> Invocation {
    if protocol.is_udp() { inv.arg("-u") } else { inv }
}

/// Fixed parameters of every measurement in a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrafficSettings {
    pub tool: String,
    pub port: u16,
    pub bandwidth: String,
    pub symbol_size: usize,
    pub meta_data_len: usize,
    pub server_log: PathBuf,
    pub grace: Duration,
}

impl Default for TrafficSettings {
    fn default() -> Self {
        Self {
            tool: "iperf".into(),
            port: 9999,
            bandwidth: "50K".into(),
            symbol_size: crate::config::SYMBOL_SIZE,
            meta_data_len: crate::config::META_DATA_LEN,
            server_log: PathBuf::from("/tmp/iperf_server.log"),
            grace: CLIENT_GRACE,
        }
    }
}

/// Textual outcome of one measurement; not parsed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrafficReport {
    pub client_cmd: String,
    pub server_log: String,
    /// Empty for detached (TCP) clients.
    pub client_log: String,
    /// The client exited with status 0 before its deadline.
    pub client_ok: bool,
    /// The client overran `duration + grace` and was stopped.
    pub timed_out: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TrafficDriver {
    settings: TrafficSettings,
}

impl TrafficDriver {
    pub fn new(settings: TrafficSettings) -> Self {
        Self { settings }
    }

    pub fn server(&self, protocol: Protocol) -> IperfServer {
        IperfServer {
            tool: self.settings.tool.clone(),
            port: self.settings.port,
            interval_secs: REPORT_INTERVAL_SECS,
            protocol,
        }
    }

    pub fn client(
        &self,
        server_ip: Ipv4Addr,
        protocol: Protocol,
        duration: Duration,
    ) -> Result<IperfClient> {
        Ok(IperfClient {
            tool: self.settings.tool.clone(),
            server_ip,
            port: self.settings.port,
            duration,
            interval_secs: REPORT_INTERVAL_SECS,
            bandwidth: self.settings.bandwidth.clone(),
            payload_len: payload_len(self.settings.symbol_size, self.settings.meta_data_len)?,
            protocol,
        })
    }

    /// Start a receiver on `server`, drive a time-bounded sender from
    /// `client`, then print the receiver's report (and the sender's if
    /// `show_client_log`).
    pub fn run<B: Backend>(
        &self,
        backend: &mut B,
        client: &HostConfig,
        server: &HostConfig,
        protocol: Protocol,
        duration: Duration,
        show_client_log: bool,
    ) -> Result<TrafficReport> {
        info!(
            "Run Iperf test between {} (Client) and {} (Server), protocol: {protocol}",
            client.name, server.name
        );
        let client_inv = self.client(server.ip, protocol, duration)?.invocation();
        let server_inv = self.server(protocol).invocation();

        let mut receiver = backend
            .spawn(
                &server.name,
                &server_inv,
                LogTarget::File(self.settings.server_log.clone()),
            )
            .with_context(|| format!("start receiver on {}", server.name))
            .map_err(Error::Measurement)?;

        let result = self.drive(backend, client, protocol, duration, &client_inv);
        let server_log = self.read_server_log(backend, server);
        receiver.stop();

        let (client_log, client_ok, timed_out) = result?;
        let report = TrafficReport {
            client_cmd: client_inv.to_string(),
            server_log: server_log?,
            client_log,
            client_ok,
            timed_out,
        };

        info!("*** Output of Iperf server:");
        println!("{}", report.server_log);
        if show_client_log {
            info!("*** Output of Iperf client:");
            println!("{}", report.client_log);
        }
        Ok(report)
    }

    fn drive<B: Backend>(
        &self,
        backend: &mut B,
        client: &HostConfig,
        protocol: Protocol,
        duration: Duration,
        inv: &Invocation,
    ) -> Result<(String, bool, bool)> {
        println!("Iperf client command: {inv}");
        // TCP clients are detached; only the receiver reports.
        let log = if protocol.is_udp() {
            LogTarget::Capture
        } else {
            LogTarget::Discard
        };
        let mut sender = backend
            .spawn(&client.name, inv, log)
            .with_context(|| format!("start sender on {}", client.name))
            .map_err(Error::Measurement)?;

        let deadline = Instant::now() + duration + self.settings.grace;
        let (ok, timed_out) = wait_until(sender.as_mut(), deadline);
        if timed_out {
            warn!(client = client.name, "traffic client overran its duration, stopping it");
        }
        sender.stop();
        let logs = if protocol.is_udp() {
            sender.logs()
        } else {
            String::new()
        };
        debug!(ok, timed_out, "traffic client finished");
        Ok((logs, ok, timed_out))
    }

    fn read_server_log<B: Backend>(&self, backend: &mut B, server: &HostConfig) -> Result<String> {
        let cat = Invocation::new("cat").arg(self.settings.server_log.display().to_string());
        let out = backend
            .exec(&server.name, &cat)
            .and_then(|out| out.checked(&cat))
            .map_err(|e| {
                Error::Measurement(anyhow!("read receiver log on {}: {e:#}", server.name))
            })?;
        Ok(out.stdout)
    }
}

/// Poll until the process exits or `deadline` passes. Returns
/// `(exited with 0, timed out)`.
fn wait_until(process: &mut dyn ManagedProcess, deadline: Instant) -> (bool, bool) {
    loop {
        if let ProcessState::Exited(code) = process.poll() {
            return (code == Some(0), false);
        }
        let now = Instant::now();
        if now >= deadline {
            return (false, true);
        }
        std::thread::sleep(CLIENT_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_len() {
        assert_eq!(payload_len(256, 2).unwrap(), 254);
        assert_eq!(payload_len(1500, 0).unwrap(), 1500);
        assert!(payload_len(2, 2).is_err());
        assert!(payload_len(1, 2).is_err());
    }

    #[test]
    fn test_server_invocation() {
        let driver = TrafficDriver::default();
        assert_eq!(
            driver.server(Protocol::Udp).invocation().to_string(),
            "iperf -s -p 9999 -i 1 -u"
        );
        assert_eq!(
            driver.server(Protocol::Tcp).invocation().to_string(),
            "iperf -s -p 9999 -i 1"
        );
    }

    #[test]
    fn test_client_invocation() {
        let driver = TrafficDriver::default();
        let client = driver
            .client(Ipv4Addr::new(10, 0, 0, 7), Protocol::Udp, Duration::from_secs(30))
            .unwrap();
        assert_eq!(
            client.invocation().to_string(),
            "iperf -c 10.0.0.7 -p 9999 -t 30 -i 1 -b 50K -l 254 -u"
        );
    }
}
