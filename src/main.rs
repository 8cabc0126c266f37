use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use nc_multihop::config::{DEFAULT_HOSTS, META_DATA_LEN, SYMBOL_SIZE};
use nc_multihop::functions::{FunctionBinaries, LogSelection, NotReadyAction, Readiness};
use nc_multihop::{Error, ExperimentConfig, Sweep};
use network_sim::{Invocation, NetnsBackend, Protocol};
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use mimalloc as the global allocator for the binary (non-Windows only)
#[cfg(not(windows))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "nc_multihop",
    author,
    version,
    disable_version_flag = true,
    about = "Network coding for transport on a multi-hop chain topology"
)]
struct Cli {
    /// Print the version and exit
    #[arg(short = 'v', long = "version", action = clap::ArgAction::SetTrue)]
    print_version: bool,

    /// All relays perform only store and forward. Used to test encoder and
    /// decoder.
    #[arg(long = "all_forward")]
    all_forward: bool,

    /// Number of hosts in the chain (at least 5)
    #[arg(long = "hosts", default_value_t = DEFAULT_HOSTS)]
    hosts: usize,
    /// Transport protocol of the traffic flow and the OpenFlow match: udp or tcp
    #[arg(long = "protocol", default_value = "udp")]
    protocol: Protocol,
    /// Traffic duration per variant, in seconds
    #[arg(long = "duration", default_value_t = 30)]
    duration: u64,
    /// Sender bandwidth, in iperf notation
    #[arg(long = "bandwidth", default_value = "50K")]
    bandwidth: String,
    /// Traffic port
    #[arg(long = "port", default_value_t = 9999)]
    port: u16,
    /// Coded symbol size in bytes
    #[arg(long = "symbol-size", default_value_t = SYMBOL_SIZE)]
    symbol_size: usize,
    /// Coding metadata length in bytes
    #[arg(long = "meta-data-len", default_value_t = META_DATA_LEN)]
    meta_data_len: usize,

    /// Encoder command; the host interface is appended
    #[arg(long = "encoder", default_value = "python3 ./encoder.py")]
    encoder: String,
    /// Decoder command; the host interface is appended
    #[arg(long = "decoder", default_value = "python3 ./decoder.py")]
    decoder: String,
    /// Recoder command; the host interface and --action are appended
    #[arg(long = "recoder", default_value = "python3 ./recoder.py")]
    recoder: String,

    /// Settle interval after each deployment step and before traffic, in ms
    #[arg(long = "settle-ms", default_value_t = 3000)]
    settle_ms: u64,
    /// UDP port a ready function listens on; enables the listener probe
    #[arg(long = "ready-port")]
    ready_port: Option<u16>,
    /// Upper bound for the listener probe, in ms
    #[arg(long = "ready-timeout-ms", default_value_t = 10_000)]
    ready_timeout_ms: u64,
    /// What to do when a function is not ready: fail or warn
    #[arg(long = "on-not-ready", value_enum, default_value = "warn")]
    on_not_ready: NotReadyAction,

    /// Print the encoder log after each variant
    #[arg(long = "log-encoder")]
    log_encoder: bool,
    /// Print the decoder log after each variant
    #[arg(long = "log-decoder")]
    log_decoder: bool,
    /// Print the recoder logs after each variant
    #[arg(long = "log-recoder")]
    log_recoder: bool,
    /// Print the traffic client report as well
    #[arg(long = "show-client-log")]
    show_client_log: bool,
    /// Print every switch's flow table after installation
    #[arg(long = "dump-flows")]
    dump_flows: bool,

    /// Traffic generator binary
    #[arg(long = "traffic-tool", default_value = "iperf")]
    traffic_tool: String,
    /// OpenFlow controller binary
    #[arg(long = "controller", default_value = "ovs-testcontroller")]
    controller: String,
}

impl Cli {
    fn into_config(self) -> Result<ExperimentConfig, Error> {
        let settle = Duration::from_millis(self.settle_ms);
        let mut config = ExperimentConfig {
            host_num: self.hosts,
            all_forward: self.all_forward,
            protocol: self.protocol,
            duration: Duration::from_secs(self.duration),
            binaries: FunctionBinaries {
                encoder: command("encoder", &self.encoder)?,
                decoder: command("decoder", &self.decoder)?,
                recoder: command("recoder", &self.recoder)?,
            },
            readiness: Readiness {
                relay_settle: settle,
                function_settle: settle,
                listen_port: self.ready_port,
                max_wait: Duration::from_millis(self.ready_timeout_ms),
                on_not_ready: self.on_not_ready,
            },
            pre_traffic_settle: settle,
            coder_logs: LogSelection {
                encoder: self.log_encoder,
                decoder: self.log_decoder,
                recoder: self.log_recoder,
            },
            show_client_log: self.show_client_log,
            dump_flows: self.dump_flows,
            controller_bin: self.controller,
            ..Default::default()
        };
        config.traffic.tool = self.traffic_tool;
        config.traffic.port = self.port;
        config.traffic.bandwidth = self.bandwidth;
        config.traffic.symbol_size = self.symbol_size;
        config.traffic.meta_data_len = self.meta_data_len;
        config.validate()?;
        Ok(config)
    }
}

fn command(name: &str, line: &str) -> Result<Invocation, Error> {
    Invocation::from_command_line(line)
        .ok_or_else(|| Error::config(format!("{name} command is empty")))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Cli::parse();
    if args.print_version {
        let version = env!("CARGO_PKG_VERSION");
        let git_hash = env!("GIT_HASH");
        let git_branch = env!("GIT_BRANCH");
        let git_dirty = env!("GIT_DIRTY");

        println!(
            "{} ({}@{}{}) [{}]",
            version,
            git_branch,
            git_hash,
            git_dirty,
            env!("CARGO_PKG_NAME")
        );
        return ExitCode::SUCCESS;
    }

    let config = match args.into_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let backend = NetnsBackend::new(config.netns_options());
    match Sweep::new(config).run(backend) {
        Ok(report) => {
            for variant in report.variants.iter().filter(|v| v.error.is_some()) {
                error!(
                    "variant {} ({}) had measurement errors",
                    variant.index,
                    variant.action_map.compact()
                );
            }
            ExitCode::SUCCESS
        }
        // Reported by the sweep before the network went down.
        Err(_) => ExitCode::FAILURE,
    }
}
