#![cfg(test)]

use crate::config::ExperimentConfig;
use crate::error::Error;
use crate::sweep::{Sweep, SweepReport, SweepState};
use crate::test_helpers::{Call, MockBackend};

fn sweep(host_num: usize, all_forward: bool) -> Sweep {
    Sweep::new(ExperimentConfig {
        all_forward,
        ..ExperimentConfig::immediate(host_num)
    })
}

fn recoder_actions(backend: &MockBackend) -> Vec<String> {
    backend
        .spawns()
        .into_iter()
        .filter(|(_, cmd)| cmd.contains("recoder.py"))
        .map(|(host, cmd)| format!("{host}:{}", cmd.rsplit(' ').next().unwrap_or_default()))
        .collect()
}

#[test]
fn test_seven_hosts_sweep_every_recoder_position() {
    let backend = MockBackend::new();
    let report = sweep(7, false).run(backend.clone()).unwrap();

    assert_eq!(report.action_maps(), ["[R,F,F]", "[F,R,F]", "[F,F,R]"]);
    let per_variant: Vec<String> = recoder_actions(&backend)
        .chunks(3)
        .map(|c| c.join(" "))
        .collect();
    assert_eq!(
        per_variant,
        [
            "h3:recode h4:forward h5:forward",
            "h3:forward h4:recode h5:forward",
            "h3:forward h4:forward h5:recode",
        ]
    );
    assert!(report.variants.iter().all(|v| v.error.is_none()));
    assert_eq!(backend.running_at_stop(), Some(0));
    assert_eq!(backend.running(), 0);
    assert_eq!(backend.stop_calls(), 1);
}

#[test]
fn test_five_hosts_single_variant() {
    let backend = MockBackend::new();
    let report = sweep(5, false).run(backend.clone()).unwrap();
    assert_eq!(report.action_maps(), ["[R]"]);
    assert_eq!(recoder_actions(&backend), ["h3:recode"]);
}

#[test]
fn test_all_forward_runs_once() {
    let backend = MockBackend::new();
    let report = sweep(7, true).run(backend.clone()).unwrap();
    assert_eq!(report.action_maps(), ["[F,F,F]"]);
    assert_eq!(report.variants[0].action_map.recoders(), Vec::<usize>::new());
    assert_eq!(recoder_actions(&backend), ["h3:forward", "h4:forward", "h5:forward"]);
}

#[test]
fn test_state_sequence() {
    let report = sweep(6, false).run(MockBackend::new()).unwrap();
    use SweepState::*;
    assert_eq!(
        report.transitions,
        [
            Idle,
            NetworkUp,
            Deployed(0),
            Measuring(0),
            Collected(0),
            TornDown(0),
            Deployed(1),
            Measuring(1),
            Collected(1),
            TornDown(1),
            NetworkDown,
        ]
    );
}

#[test]
fn test_variants_never_overlap() {
    let backend = MockBackend::new();
    sweep(7, false).run(backend.clone()).unwrap();

    // Every variant spawns 3 relays, decoder, encoder, receiver and sender;
    // each must be stopped before the next variant's first relay starts.
    let calls = backend.calls();
    let relay_starts: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| {
            matches!(c, Call::Spawn(h, cmd) if h == "h3" && cmd.contains("recoder.py"))
        })
        .map(|(i, _)| i)
        .collect();
    assert_eq!(relay_starts.len(), 3);
    for window in relay_starts.windows(2) {
        let between = &calls[window[0]..window[1]];
        let spawned = between
            .iter()
            .filter(|c| matches!(c, Call::Spawn(..)))
            .count();
        let stopped = between
            .iter()
            .filter(|c| matches!(c, Call::StopProcess(_)))
            .count();
        assert_eq!(spawned, 7);
        assert_eq!(stopped, 7);
    }
}

#[test]
fn test_traffic_runs_end_to_end_over_udp() {
    let backend = MockBackend::new();
    let report = sweep(5, false).run(backend.clone()).unwrap();
    let traffic = report.variants[0].traffic.as_ref().unwrap();
    assert!(traffic.client_cmd.starts_with("iperf -c 10.0.0.5 -p 9999 -t 0"));
    assert!(traffic.client_cmd.ends_with("-l 254 -u"));

    let clients: Vec<_> = backend
        .spawns()
        .into_iter()
        .filter(|(_, cmd)| cmd.contains(" -c "))
        .collect();
    assert_eq!(clients.len(), 1);
    assert_eq!(clients[0].0, "h1");
}

#[test]
fn test_network_setup_precedes_functions() {
    let backend = MockBackend::new();
    sweep(5, false).run(backend.clone()).unwrap();

    let commands = backend.commands();
    assert_eq!(commands[0], "sysctl -w net.ipv6.conf.all.disable_ipv6=1");
    assert!(commands.iter().any(|c| c.starts_with("ovs-ofctl add-flow s1")));
    assert!(commands.iter().any(|c| c == "ethtool --offload s1-h1 rx off tx off"));
    assert_eq!(
        commands.last().map(String::as_str),
        Some("sysctl -w net.ipv6.conf.default.disable_ipv6=0")
    );
}

#[test]
fn test_build_failure_skips_flows_and_functions() {
    let backend = MockBackend::new();
    backend.fail_link(2);
    let mut report = SweepReport::default();
    let err = sweep(7, false)
        .run_recorded(backend.clone(), &mut report)
        .unwrap_err();

    assert!(matches!(err, Error::TopologyBuild(_)), "{err}");
    assert_eq!(backend.stop_calls(), 1);
    assert!(!backend.commands().iter().any(|c| c.starts_with("ovs-ofctl")));
    assert!(backend.spawns().is_empty());
    assert_eq!(report.transitions, [SweepState::Idle, SweepState::NetworkDown]);
    // IPv6 is restored even though the build failed.
    assert!(
        backend
            .commands()
            .contains(&"sysctl -w net.ipv6.conf.all.disable_ipv6=0".to_string())
    );
}

#[test]
fn test_invalid_host_count_touches_nothing() {
    let backend = MockBackend::new();
    let err = sweep(4, false).run(backend.clone()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
    assert!(backend.calls().is_empty());
}

#[test]
fn test_relays_overlapping_decoder_touch_nothing() {
    let backend = MockBackend::new();
    let config = ExperimentConfig {
        relay_start: 3,
        ..ExperimentConfig::immediate(7)
    };
    let err = Sweep::new(config).run(backend.clone()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err}");
    assert!(backend.calls().is_empty());
}

#[test]
fn test_flow_failure_aborts_before_functions() {
    let backend = MockBackend::new();
    backend.fail_run("add-flow s3");
    let err = sweep(6, false).run(backend.clone()).unwrap_err();
    assert!(matches!(err, Error::FlowProgramming { ref switch, .. } if switch == "s3"));
    assert!(backend.spawns().is_empty());
    assert_eq!(backend.stop_calls(), 1);
}

#[test]
fn test_deployment_failure_cleans_up() {
    let backend = MockBackend::new();
    backend.fail_spawn("decoder.py");
    let mut report = SweepReport::default();
    let err = sweep(7, false)
        .run_recorded(backend.clone(), &mut report)
        .unwrap_err();

    assert!(matches!(err, Error::Deployment { ref function, .. } if function == "decoder"));
    assert_eq!(backend.running_at_stop(), Some(0));
    assert_eq!(backend.running(), 0);
    assert_eq!(backend.stop_calls(), 1);
    assert!(report.variants.is_empty());
    assert_eq!(
        report.transitions,
        [SweepState::Idle, SweepState::NetworkUp, SweepState::NetworkDown]
    );
}

#[test]
fn test_measurement_failure_is_recorded_and_sweep_continues() {
    let backend = MockBackend::new();
    backend.fail_spawn(" -c ");
    let report = sweep(7, false).run(backend.clone()).unwrap();

    assert_eq!(report.variants.len(), 3);
    for variant in &report.variants {
        assert!(variant.traffic.is_none());
        let msg = variant.error.as_deref().unwrap_or_default();
        assert!(msg.starts_with("traffic measurement failed"), "{msg}");
    }
    assert_eq!(backend.running_at_stop(), Some(0));
    assert_eq!(backend.running(), 0);
}

#[test]
fn test_selected_coder_logs_are_collected() {
    let backend = MockBackend::new();
    let mut config = ExperimentConfig::immediate(5);
    config.coder_logs.decoder = true;
    let report = Sweep::new(config).run(backend).unwrap();

    let logs = &report.variants[0].logs;
    assert_eq!(logs.decoder.as_deref(), Some("python3 started\n"));
    assert!(logs.encoder.is_none());
    assert!(logs.recoders.is_empty());
}
