#![cfg(test)]

use network_sim::{Backend, Invocation, LogTarget};

use crate::chain::{LinkProfile, MIN_HOSTS};
use crate::error::Error;
use crate::test_helpers::{Call, MockBackend};
use crate::topology::{CONTROLLER_NAME, Network};

fn count(calls: &[Call], pred: impl Fn(&Call) -> bool) -> usize {
    calls.iter().filter(|c| pred(c)).count()
}

#[test]
fn test_build_materializes_every_node_and_link() {
    for n in MIN_HOSTS..=12 {
        let backend = MockBackend::new();
        let mut net = Network::new(backend.clone());
        let topo = net.build(n, &LinkProfile::default()).unwrap();

        assert_eq!(topo.hosts().len(), n);
        assert_eq!(topo.switches().len(), n);
        assert_eq!(topo.host_links().len(), n);
        assert_eq!(topo.switch_links().len(), n - 1);

        let calls = backend.calls();
        assert_eq!(calls[0], Call::AddController(CONTROLLER_NAME.into()));
        assert_eq!(count(&calls, |c| matches!(c, Call::AddHost(_))), n);
        assert_eq!(count(&calls, |c| matches!(c, Call::AddSwitch(_))), n);
        assert_eq!(count(&calls, |c| matches!(c, Call::AddLink(..))), 2 * n - 1);
        assert_eq!(calls.last(), Some(&Call::Start));
    }
}

#[test]
fn test_hop_order_links_each_switch_to_previous() {
    let backend = MockBackend::new();
    let mut net = Network::new(backend.clone());
    net.build(5, &LinkProfile::default()).unwrap();

    let links: Vec<_> = backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::AddLink(a, b) => Some(format!("{a}/{b}")),
            _ => None,
        })
        .collect();
    assert_eq!(
        links,
        [
            "s1-h1/h1-s1",
            "s2-h2/h2-s2",
            "s2-s1/s1-s2",
            "s3-h3/h3-s3",
            "s3-s2/s2-s3",
            "s4-h4/h4-s4",
            "s4-s3/s3-s4",
            "s5-h5/h5-s5",
            "s5-s4/s4-s5",
        ]
    );
}

#[test]
fn test_short_chain_rejected_before_backend_calls() {
    for n in 0..MIN_HOSTS {
        let backend = MockBackend::new();
        let mut net = Network::new(backend.clone());
        let err = net.build(n, &LinkProfile::default()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err}");
        assert!(backend.calls().is_empty());
    }
}

#[test]
fn test_assembly_failure_stops_network_once() {
    let backend = MockBackend::new();
    backend.fail_link(4);
    let mut net = Network::new(backend.clone());

    let err = net.build(7, &LinkProfile::default()).unwrap_err();
    assert!(matches!(err, Error::TopologyBuild(_)), "{err}");
    assert!(err.to_string().contains("File exists"), "{err}");
    assert!(net.is_stopped());
    assert_eq!(backend.stop_calls(), 1);
    assert!(!backend.calls().contains(&Call::Start));

    drop(net);
    assert_eq!(backend.stop_calls(), 1);
}

#[test]
fn test_stop_reenables_ipv6() {
    let backend = MockBackend::new();
    let mut net = Network::new(backend.clone());
    net.disable_ipv6().unwrap();
    net.build(5, &LinkProfile::default()).unwrap();
    drop(net);

    let commands = backend.commands();
    assert_eq!(
        commands,
        [
            "sysctl -w net.ipv6.conf.all.disable_ipv6=1",
            "sysctl -w net.ipv6.conf.default.disable_ipv6=1",
            "sysctl -w net.ipv6.conf.all.disable_ipv6=0",
            "sysctl -w net.ipv6.conf.default.disable_ipv6=0",
        ]
    );
    assert_eq!(backend.stop_calls(), 1);
}

#[test]
fn test_stopped_session_refuses_to_build() {
    let backend = MockBackend::new();
    let mut net = Network::new(backend.clone());
    net.stop();
    assert!(matches!(
        net.build(5, &LinkProfile::default()),
        Err(Error::TopologyBuild(_))
    ));
    assert_eq!(backend.calls(), [Call::Stop]);
}

#[test]
fn test_stop_leaves_stray_processes_visible() {
    let backend = MockBackend::new();
    let mut net = Network::new(backend.clone());
    net.build(5, &LinkProfile::default()).unwrap();
    let _stray = net
        .backend_mut()
        .spawn("h3", &Invocation::new("sleep").arg("60"), LogTarget::Discard)
        .unwrap();

    net.stop();
    assert_eq!(backend.running_at_stop(), Some(1));
    assert_eq!(backend.running_on("h3"), ["sleep 60 on h3"]);
}
