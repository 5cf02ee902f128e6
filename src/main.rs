//! BeaconFlow - proximity beacon stream processor
//!
//! Reads beacon observations, aggregates RSSI per beacon, fires cooldown
//! locked actions and periodically ships heatmap reports to a collector.
//!
//! # Usage
//!
//! ```bash
//! # Run with synthetic beacons
//! cargo run --release
//!
//! # Run with simulator input from stdin
//! ./beacon-simulator | ./beaconflow --stdin
//!
//! # Replay a recorded JSON-lines file against a collector
//! ./beaconflow --replay scans.jsonl --collector http://collector:8080
//! ```
//!
//! # Environment Variables
//!
//! - `BEACONFLOW_CONFIG`: Path to the TOML configuration file
//! - `BEACONFLOW_COLLECTOR`: Collector base URL (overrides the config file)
//! - `RUST_LOG`: Logging level (default: info)

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use beaconflow::actions::{ActionLockTable, ActionTrigger, LoggingActionHandler};
use beaconflow::aggregation::Aggregator;
use beaconflow::config::{self, defaults, BeaconConfig};
use beaconflow::pipeline::{
    BeaconSimulator, ObservationSource, ProcessingLoop, ReplaySource, StdinSource,
    SyntheticSource,
};
use beaconflow::reporting::{
    HeatmapReport, HeatmapReportBuilder, HttpReportSender, LogWriterNode, LoggingReportSender,
    MemoryMessageLog, MessageLog, ReportSender, Reporter, SledMessageLog,
};
use beaconflow::stream::{FilterNode, NodeId, PassingNode, StreamGraph};
use beaconflow::types::Observation;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "beaconflow")]
#[command(about = "BeaconFlow proximity beacon stream processor")]
#[command(version)]
struct CliArgs {
    /// Read JSON observations from stdin instead of synthetic data
    /// Use with simulator: ./beacon-simulator | ./beaconflow --stdin
    #[arg(long, conflicts_with = "replay")]
    stdin: bool,

    /// Replay observations from a JSON-lines file
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,

    /// Delay between replayed observations in milliseconds (0 = no delay)
    #[arg(long, default_value = "0")]
    replay_delay_ms: u64,

    /// Path to the TOML configuration file (overrides BEACONFLOW_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Collector base URL; without one, reports are only logged
    #[arg(long, env = "BEACONFLOW_COLLECTOR")]
    collector: Option<String>,

    /// Sled directory for the message log (overrides storage.log_path)
    #[arg(long)]
    log_path: Option<String>,

    /// Number of synthetic beacons
    #[arg(long, default_value_t = defaults::SYNTHETIC_BEACONS)]
    beacons: u16,

    /// Random seed for the synthetic source
    #[arg(long)]
    seed: Option<u64>,
}

// ============================================================================
// Task Supervision
// ============================================================================

#[derive(Debug, Clone, Copy)]
enum TaskName {
    ObservationProcessor,
    LockSweeper,
    Reporter,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::ObservationProcessor => write!(f, "ObservationProcessor"),
            TaskName::LockSweeper => write!(f, "LockSweeper"),
            TaskName::Reporter => write!(f, "Reporter"),
        }
    }
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    info!("Supervisor: all tasks spawned, monitoring");

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Supervisor: shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!(task = %task_name, "Supervisor: task completed normally");
                    }
                    Some(Ok(Err(e))) => {
                        error!(error = %e, "Supervisor: task failed");
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Supervisor: task panicked");
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => {
                        info!("Supervisor: all tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Let background loops observe the cancellation before returning
    while let Some(result) = task_set.join_next().await {
        if let Ok(Ok(task_name)) = result {
            info!(task = %task_name, "Supervisor: task stopped");
        }
    }

    Ok(())
}

// ============================================================================
// Graph Construction
// ============================================================================

/// The assembled stream graph and the handles the tasks need.
struct Pipeline {
    graph: Arc<Mutex<StreamGraph<Observation>>>,
    scanner: NodeId,
    locks: ActionLockTable,
}

/// Wire the observation graph:
///
/// ```text
/// scanner ──► rssi-filter ──► aggregator ──► log-writer
///                  │
///                  └────────► action-trigger
/// ```
fn build_graph(config: &BeaconConfig, log: Arc<dyn MessageLog<Observation>>) -> Result<Pipeline> {
    let mut graph = StreamGraph::new();

    let min_rssi = config.scan.min_rssi;
    let scanner = graph.add_node(PassingNode::new("scanner"));
    let rssi_filter = graph.add_node(FilterNode::new("rssi-filter", move |o: &Observation| {
        o.rssi >= min_rssi
    }));

    let filter = config
        .aggregation
        .filter
        .build(config.aggregation.min_weight);
    let aggregator = graph.add_node(Aggregator::new(
        "aggregator",
        config.aggregation.mode,
        config.aggregation.window_ms,
        filter,
    ));
    let log_writer = graph.add_node(LogWriterNode::new("log-writer", log));

    let locks = ActionLockTable::new(Duration::from_millis(config.locks.polling_interval_ms));
    let trigger = graph.add_node(ActionTrigger::new(
        "action-trigger",
        config.actions.clone(),
        locks.clone(),
        Arc::new(LoggingActionHandler),
    ));

    graph.connect(scanner, rssi_filter)?;
    graph.connect(rssi_filter, aggregator)?;
    graph.connect(aggregator, log_writer)?;
    graph.connect(rssi_filter, trigger)?;

    info!(
        nodes = graph.len(),
        mode = %config.aggregation.mode,
        filter = %config.aggregation.filter,
        window_ms = config.aggregation.window_ms,
        min_rssi,
        rules = config.actions.len(),
        "Stream graph assembled"
    );

    Ok(Pipeline {
        graph: Arc::new(Mutex::new(graph)),
        scanner,
        locks,
    })
}

fn build_sender(config: &BeaconConfig) -> Result<Arc<dyn ReportSender<HeatmapReport>>> {
    match &config.reporter.collector_url {
        Some(url) => {
            let sender = HttpReportSender::new(
                url,
                &config.device.id,
                Duration::from_secs(config.reporter.http_timeout_secs),
            )
            .context("Failed to build collector HTTP client")?;
            info!(collector = %sender.collector_url(), "Reports go to collector");
            Ok(Arc::new(sender))
        }
        None => {
            info!("No collector configured, reports are logged only");
            Ok(Arc::new(LoggingReportSender))
        }
    }
}

// ============================================================================
// Unified Pipeline Runner
// ============================================================================

/// Run the beacon pipeline with any observation source.
async fn run_pipeline<S: ObservationSource>(
    mut source: S,
    config: &'static BeaconConfig,
    cancel_token: CancellationToken,
) -> Result<()> {
    let sled_log = if config.storage.log_path.is_empty() {
        None
    } else {
        let log = SledMessageLog::<Observation>::open(&config.storage.log_path)
            .with_context(|| format!("Failed to open message log at {}", config.storage.log_path))?;
        info!(
            path = %config.storage.log_path,
            pending = log.len(),
            "Message log opened"
        );
        Some(Arc::new(log))
    };
    let log: Arc<dyn MessageLog<Observation>> = match &sled_log {
        Some(log) => Arc::clone(log) as Arc<dyn MessageLog<Observation>>,
        None => Arc::new(MemoryMessageLog::new()),
    };

    let pipeline = build_graph(config, Arc::clone(&log))?;
    let sender = build_sender(config)?;

    let reporter = Reporter::new(
        HeatmapReportBuilder::new(config.device.id.clone(), config.reporter.heatmap_interval_ms),
        log,
        sender,
        config.reporter_config(),
    );
    let reporter_stats = reporter.stats_handle();

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task 1: Observation processor
    let processing = ProcessingLoop::new(
        Arc::clone(&pipeline.graph),
        pipeline.scanner,
        cancel_token.clone(),
    );
    task_set.spawn(async move {
        let stats = processing.run(&mut source).await;
        info!(
            observations = stats.observations,
            "Source finished; reporting continues until shutdown"
        );
        Ok(TaskName::ObservationProcessor)
    });

    // Task 2: Lock sweeper
    let sweeper = pipeline.locks.spawn_sweeper(cancel_token.clone());
    task_set.spawn(async move {
        sweeper.await?;
        Ok(TaskName::LockSweeper)
    });

    // Task 3: Reporter
    let reporter_cancel = cancel_token.clone();
    task_set.spawn(async move {
        reporter.run(reporter_cancel).await;
        Ok(TaskName::Reporter)
    });

    let result = run_supervisor(&mut task_set, cancel_token).await;

    let stats = reporter_stats.read().await.clone();
    info!(
        cycles = stats.cycles,
        reports_sent = stats.reports_sent,
        messages_reported = stats.messages_reported,
        send_failures = stats.send_failures,
        build_failures = stats.build_failures,
        "Reporter summary"
    );

    if let Some(log) = sled_log {
        if let Err(e) = log.flush() {
            warn!(error = %e, "Failed to flush message log");
        }
    }

    result
}

fn load_replay(path: &Path) -> Result<Vec<Observation>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay file {}", path.display()))?;
    let mut observations = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Observation>(line) {
            Ok(o) => observations.push(o),
            Err(e) => warn!(line = line_no + 1, error = %e, "Skipping malformed replay line"),
        }
    }
    Ok(observations)
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let mut beacon_config = match &args.config {
        Some(path) => BeaconConfig::load_from_file(path)?,
        None => BeaconConfig::load(),
    };
    if let Some(url) = args.collector {
        beacon_config.reporter.collector_url = Some(url);
    }
    if let Some(path) = args.log_path {
        beacon_config.storage.log_path = path;
    }
    beacon_config.validate()?;

    info!(
        device = %beacon_config.device.id,
        report_every_ms = beacon_config.reporter.time_between_reports_ms,
        "BeaconFlow starting"
    );
    config::init(beacon_config);
    let config = config::get();

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received Ctrl+C, initiating shutdown");
        shutdown_token.cancel();
    });

    if args.stdin {
        info!("Input: stdin (JSON observations)");
        run_pipeline(StdinSource::new(), config, cancel_token).await?;
    } else if let Some(path) = args.replay {
        let observations = load_replay(&path)?;
        info!(file = %path.display(), observations = observations.len(), "Input: replay");
        let source = ReplaySource::new(observations, Duration::from_millis(args.replay_delay_ms));
        run_pipeline(source, config, cancel_token).await?;
    } else {
        let simulator = BeaconSimulator::new(args.beacons, 4.0, args.seed)
            .context("Invalid synthetic noise parameters")?;
        info!(beacons = simulator.beacon_count(), "Input: synthetic beacons");
        let source = SyntheticSource::new(
            simulator,
            Duration::from_millis(defaults::SYNTHETIC_INTERVAL_MS),
        );
        run_pipeline(source, config, cancel_token).await?;
    }

    info!("BeaconFlow shutdown complete");
    Ok(())
}
