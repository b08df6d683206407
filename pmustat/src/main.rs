//! # pmustat - Main Entry Point
//!
//! Supports two operational modes:
//! - **Live** (default): runs perf, with the NMI watchdog disabled and the
//!   device multiplexing interval overridden for the duration of the run
//! - **Replay** (`--replay perfstat.json --topology topo.json`): plays back
//!   recorded perf output, no privileges needed

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use pmustat::cli::Args;
use pmustat::collection::{replay_file, FrameContext, Orchestrator, ProcfsDiscovery, RunSummary};
use pmustat::config::CollectionConfig;
use pmustat::definitions::load_event_groups;
use pmustat::domain::ConfigError;
use pmustat::preflight::run_preflight_checks;
use pmustat::sink::{FrameConsumer, JsonLinesWriter};
use pmustat::topology::Topology;
use pmustat::tunables::{MuxIntervalGuard, WatchdogGuard};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);
    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

/// `-v` debug, `-vv` trace; `RUST_LOG` wins when set
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some_and(|e| *e != ConfigError::NoTargets) {
        return EXIT_USAGE;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") || msg.contains("requires root") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

fn consumer_for(args: &Args) -> Result<Box<dyn FrameConsumer>> {
    Ok(match &args.export {
        Some(path) => Box::new(JsonLinesWriter::create(path)?),
        None => Box::new(JsonLinesWriter::stdout()),
    })
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let mut config = CollectionConfig::from_args(&args)?;
    let definitions = Arc::new(load_event_groups(&config.event_file)?);
    info!("Loaded {} event groups from {}", definitions.len(), config.event_file.display());
    let consumer = consumer_for(&args)?;

    // Replay: no perf, no kernel settings
    if let (Some(recording), Some(topology_file)) = (&args.replay, &args.topology) {
        let ctx = FrameContext {
            scope: config.scope,
            granularity: config.granularity,
            definitions,
            topology: Arc::new(Topology::load(topology_file)?),
        };
        let summary = replay_file(recording, ctx, consumer).await?;
        report(&summary, args.quiet);
        return Ok(());
    }

    config.perf_path = run_preflight_checks(args.perf.as_deref())?;
    let topology = Topology::detect().context("Failed to read processor topology")?;
    info!(
        "{} socket(s), {} cores per socket, {} threads per core",
        topology.socket_count(),
        topology.cores_per_socket(),
        topology.threads_per_core()
    );
    let ctx = FrameContext {
        scope: config.scope,
        granularity: config.granularity,
        definitions,
        topology: Arc::new(topology),
    };

    let watchdog = WatchdogGuard::disable().context("Failed to disable NMI watchdog")?;
    let mux = MuxIntervalGuard::apply(config.mux_interval_ms)
        .with_context(|| format!("Failed to set perf mux intervals to {}", config.mux_interval_ms))?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, waiting for perf to report its last interval");
                cancel.cancel();
            }
        })
    };

    if !args.quiet {
        eprintln!(
            "pmustat v{}: reporting {} scope every {} ms",
            env!("CARGO_PKG_VERSION"),
            config.scope,
            config.interval.as_millis()
        );
    }

    let orchestrator = Orchestrator::new(config, ctx, Arc::new(ProcfsDiscovery::new()));
    let result = orchestrator.run(consumer, cancel).await;
    ctrl_c.abort();

    // restore kernel settings before reporting how the run went
    if let Err(e) = mux.restore() {
        warn!("Failed to restore perf mux intervals: {e}");
    }
    if let Some(watchdog) = watchdog {
        if let Err(e) = watchdog.restore() {
            warn!("Failed to restore NMI watchdog: {e}");
        }
    }

    report(&result?, args.quiet);
    Ok(())
}

fn report(summary: &RunSummary, quiet: bool) {
    if !quiet {
        eprintln!("Collected {} frames in {} cycle(s)", summary.frames, summary.cycles);
    }
}
