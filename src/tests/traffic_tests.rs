#![cfg(test)]

use std::time::Duration;

use network_sim::Protocol;

use crate::chain::LinkProfile;
use crate::error::Error;
use crate::test_helpers::{CLIENT_REPORT, MockBackend, SERVER_REPORT};
use crate::topology::{Network, Topology};
use crate::traffic::{TrafficDriver, TrafficSettings, payload_len};

fn network() -> (MockBackend, Network<MockBackend>, Topology) {
    let backend = MockBackend::new();
    let mut net = Network::new(backend.clone());
    let topo = net.build(5, &LinkProfile::default()).unwrap();
    (backend, net, topo)
}

fn run(
    driver: &TrafficDriver,
    net: &mut Network<MockBackend>,
    topo: &Topology,
    protocol: Protocol,
) -> crate::error::Result<crate::traffic::TrafficReport> {
    let (client, server) = (&topo.hosts()[0], &topo.hosts()[4]);
    driver.run(net.backend_mut(), client, server, protocol, Duration::ZERO, true)
}

#[test]
fn test_udp_run_reports_both_ends() {
    let (backend, mut net, topo) = network();
    let report = run(&TrafficDriver::default(), &mut net, &topo, Protocol::Udp).unwrap();

    assert_eq!(report.client_cmd, "iperf -c 10.0.0.5 -p 9999 -t 0 -i 1 -b 50K -l 254 -u");
    assert_eq!(report.server_log, SERVER_REPORT);
    assert_eq!(report.client_log, CLIENT_REPORT);
    assert!(report.client_ok);
    assert!(!report.timed_out);

    let spawns = backend.spawns();
    assert_eq!(spawns[0], ("h5".to_string(), "iperf -s -p 9999 -i 1 -u".to_string()));
    assert_eq!(spawns[1].0, "h1");
    assert_eq!(backend.running(), 0, "receiver must be stopped");
}

#[test]
fn test_payload_length_independent_of_protocol() {
    for (symbol, meta) in [(256, 2), (1024, 8), (64, 63)] {
        let settings = TrafficSettings {
            symbol_size: symbol,
            meta_data_len: meta,
            ..Default::default()
        };
        let driver = TrafficDriver::new(settings);
        let expected = format!("-l {}", payload_len(symbol, meta).unwrap());
        for protocol in [Protocol::Udp, Protocol::Tcp] {
            let (_, mut net, topo) = network();
            let report = run(&driver, &mut net, &topo, protocol).unwrap();
            assert!(report.client_cmd.contains(&expected), "{}", report.client_cmd);
            assert_eq!(report.client_cmd.ends_with(" -u"), protocol == Protocol::Udp);
        }
    }
}

#[test]
fn test_tcp_client_is_detached() {
    let (backend, mut net, topo) = network();
    let report = run(&TrafficDriver::default(), &mut net, &topo, Protocol::Tcp).unwrap();
    assert!(report.client_log.is_empty());
    assert_eq!(report.server_log, SERVER_REPORT);
    assert_eq!(backend.spawns()[0].1, "iperf -s -p 9999 -i 1");
}

#[test]
fn test_hung_client_is_stopped_after_grace() {
    let (backend, mut net, topo) = network();
    backend.hang_on_spawn(" -c ");
    let driver = TrafficDriver::new(TrafficSettings {
        grace: Duration::from_millis(50),
        ..Default::default()
    });
    let report = run(&driver, &mut net, &topo, Protocol::Udp).unwrap();
    assert!(report.timed_out);
    assert!(!report.client_ok);
    assert_eq!(backend.running(), 0);
}

#[test]
fn test_receiver_start_failure_is_measurement_error() {
    let (backend, mut net, topo) = network();
    backend.fail_spawn(" -s ");
    let err = run(&TrafficDriver::default(), &mut net, &topo, Protocol::Udp).unwrap_err();
    assert!(matches!(err, Error::Measurement(_)), "{err}");
    assert_eq!(backend.spawns().len(), 1);
}

#[test]
fn test_failed_client_is_reported_not_raised() {
    let (backend, mut net, topo) = network();
    backend.exit_on_spawn(" -c ", Some(1), "connect failed: Connection refused\n");
    let report = run(&TrafficDriver::default(), &mut net, &topo, Protocol::Udp).unwrap();
    assert!(!report.client_ok);
    assert!(report.client_log.contains("Connection refused"));
    assert_eq!(backend.running(), 0);
}
