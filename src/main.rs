// Copy forwarder binary
//
// Runs the forwarder against the in-process software runtime: a traffic generator feeds the
// input interfaces, a loopback sink takes the forwarded copies and offloaded copies are
// executed by the software offload engine. Prints the per-worker report when the time limit
// expires or Ctrl+C is received.

use clap::error::ErrorKind;
use clap::Parser;
use dma_forwarder::buffer_pool::PacketPool;
use dma_forwarder::error::EXIT_FAILURE;
use dma_forwarder::io::OffloadEngine;
use dma_forwarder::sim::{ChannelScheduler, FaultPlan, LoopbackSink, SoftOffloadEngine, TrafficGenerator};
use dma_forwarder::{
    Capabilities, Collaborators, ConfigError, CopyMode, Forwarder, ForwarderConfig, ForwarderError,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Packet copy-and-forward benchmark comparing CPU copies with offloaded copies.
#[derive(Parser, Debug)]
#[command(name = "dmafwd", version, about, long_about = None)]
struct Cli {
    /// Interfaces to forward between (comma-separated, at most 2)
    #[arg(short, long, value_delimiter = ',', required = true)]
    interfaces: Vec<String>,

    /// Copy type: 0 = local CPU copy, 1 = offloaded copy
    #[arg(short = 't', long = "copy-type", default_value_t = 0)]
    copy_type: u8,

    /// Packets per copy burst [default: largest supported]
    #[arg(short, long)]
    burst_size: Option<usize>,

    /// Buffers in each packet pool [default: 32768]
    #[arg(short, long)]
    num_pkts: Option<usize>,

    /// Buffer length of each packet pool [default: 1024]
    #[arg(short = 'l', long)]
    pkt_len: Option<usize>,

    /// Worker threads
    #[arg(short = 'c', long = "worker-count", default_value_t = 1)]
    workers: usize,

    /// Packet pool cache size [default: runtime default]
    #[arg(short = 'C', long)]
    cache_size: Option<usize>,

    /// Run time in seconds, 0 runs until interrupted
    #[arg(short = 'T', long = "time-sec", default_value_t = 0)]
    time_sec: u64,

    /// Pin worker N to core N
    #[arg(long)]
    pin: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn into_config(self, capabilities: &Capabilities) -> Result<(ForwarderConfig, bool), ConfigError> {
        let copy_mode =
            CopyMode::from_type_id(self.copy_type).ok_or(ConfigError::CopyType(self.copy_type))?;
        let defaults = ForwarderConfig::defaults_for(capabilities);
        let run_time = match self.time_sec {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let config = ForwarderConfig {
            interfaces: self.interfaces,
            copy_mode,
            burst_size: self.burst_size.unwrap_or(defaults.burst_size),
            num_pkts: self.num_pkts.unwrap_or(defaults.num_pkts),
            pkt_len: self.pkt_len.unwrap_or(defaults.pkt_len),
            workers: self.workers,
            cache_size: self.cache_size.unwrap_or(defaults.cache_size),
            run_time,
            pin_workers: self.pin,
            ..defaults
        };
        Ok((config, self.json))
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli) -> Result<(), ForwarderError> {
    let capabilities = Capabilities::default();
    let (config, json) = cli.into_config(&capabilities)?;
    let forwarder = Forwarder::new(config, &capabilities)?;
    let config = forwarder.config();

    let run_flag = forwarder.run_flag();
    ctrlc::set_handler(move || run_flag.stop())?;

    let scheduler = Arc::new(ChannelScheduler::new(config.workers));
    let sink = Arc::new(LoopbackSink::new());
    let engine = match config.copy_mode {
        CopyMode::Local => None,
        CopyMode::Offloaded => Some(Arc::new(
            SoftOffloadEngine::start(
                forwarder.transfer_table().clone(),
                scheduler.clone(),
                FaultPlan::default(),
            )
            .map_err(ForwarderError::Engine)?,
        )),
    };

    let rx_pool = PacketPool::new("rx", config.num_pkts, config.pkt_len);
    let mut ingress = TrafficGenerator::new(
        rx_pool,
        scheduler.clone(),
        forwarder.interfaces().len(),
        config.pkt_len,
    );

    let collaborators = Collaborators {
        scheduler,
        sink: sink.clone(),
        engine: engine
            .clone()
            .map(|engine| engine as Arc<dyn OffloadEngine>),
    };
    let report = forwarder.run(collaborators, &mut ingress)?;

    if let Some(engine) = engine {
        engine.shutdown();
    }
    info!(
        generated = ingress.generated(),
        accepted = sink.accepted(),
        "run complete"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{report}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(EXIT_FAILURE as u8),
            };
        }
    };

    init_tracing();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "forwarder failed");
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
