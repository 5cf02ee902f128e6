//! Pipeline Regression Tests
//!
//! Drives recorded observations through the full graph
//! (scanner → rssi filter → aggregator → message log, plus the action
//! trigger) and one reporter cycle, asserting on what reaches the collector.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use beaconflow::actions::{ActionHandler, ActionLockTable, ActionTrigger, TriggerRule};
use beaconflow::aggregation::{AggregationMode, Aggregator, FilterKind};
use beaconflow::pipeline::{ProcessingLoop, ReplaySource, StopReason};
use beaconflow::reporting::{
    CycleOutcome, HeatmapReport, HeatmapReportBuilder, LogWriterNode, MemoryMessageLog,
    MessageLog, ReportSender, Reporter, ReporterConfig, SendError,
};
use beaconflow::stream::{FilterNode, NodeId, PassingNode, StreamGraph};
use beaconflow::types::{Action, BeaconIdentity, Observation};

// ============================================================================
// Fixtures
// ============================================================================

fn beacon(address: &str) -> BeaconIdentity {
    BeaconIdentity::Device {
        address: address.to_string(),
    }
}

fn obs(address: &str, rssi: i32, timestamp: u64) -> Observation {
    Observation::new(beacon(address), rssi, timestamp)
}

#[derive(Default)]
struct RecordingSender {
    reports: Mutex<Vec<HeatmapReport>>,
}

#[async_trait]
impl ReportSender<HeatmapReport> for RecordingSender {
    async fn is_receiver_available(&self) -> bool {
        true
    }

    async fn send(&self, report: &HeatmapReport) -> Result<(), SendError> {
        self.reports.lock().unwrap().push(report.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHandler {
    fired: Mutex<Vec<(String, i32)>>,
}

impl ActionHandler for RecordingHandler {
    fn fire(&self, action: &Action, observation: &Observation) {
        self.fired
            .lock()
            .unwrap()
            .push((action.action_id.clone(), observation.rssi));
    }
}

struct Fixture {
    graph: Arc<Mutex<StreamGraph<Observation>>>,
    scanner: NodeId,
    log: Arc<MemoryMessageLog<Observation>>,
    handler: Arc<RecordingHandler>,
}

fn assemble(rules: Vec<TriggerRule>) -> Fixture {
    let log = Arc::new(MemoryMessageLog::new());
    let handler = Arc::new(RecordingHandler::default());

    let mut graph = StreamGraph::new();
    let scanner = graph.add_node(PassingNode::new("scanner"));
    let rssi_filter = graph.add_node(FilterNode::new("rssi-filter", |o: &Observation| {
        o.rssi >= -100
    }));
    let aggregator = graph.add_node(Aggregator::new(
        "aggregator",
        AggregationMode::Tumbling,
        2_000,
        FilterKind::Simple.build(0.2),
    ));
    let writer = graph.add_node(LogWriterNode::new(
        "log-writer",
        Arc::clone(&log) as Arc<dyn MessageLog<Observation>>,
    ));
    let trigger = graph.add_node(ActionTrigger::new(
        "action-trigger",
        rules,
        ActionLockTable::default(),
        Arc::clone(&handler) as Arc<dyn ActionHandler>,
    ));

    graph.connect(scanner, rssi_filter).unwrap();
    graph.connect(rssi_filter, aggregator).unwrap();
    graph.connect(aggregator, writer).unwrap();
    graph.connect(rssi_filter, trigger).unwrap();

    Fixture {
        graph: Arc::new(Mutex::new(graph)),
        scanner,
        log,
        handler,
    }
}

fn recording() -> Vec<Observation> {
    vec![
        obs("A", -50, 0),
        obs("A", -60, 500),
        obs("A", -70, 1_000),
        // Below the scan floor, never aggregated
        obs("C", -110, 1_200),
        obs("B", -80, 1_500),
        obs("A", -40, 2_000),
    ]
}

async fn replay(fixture: &Fixture, observations: Vec<Observation>) {
    let processing = ProcessingLoop::new(
        Arc::clone(&fixture.graph),
        fixture.scanner,
        CancellationToken::new(),
    );
    let mut source = ReplaySource::new(observations, Duration::ZERO);
    let stats = processing.run(&mut source).await;
    assert_eq!(stats.stop_reason, StopReason::SourceExhausted);
    assert_eq!(stats.delivery_failures, 0);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn aggregates_land_in_the_log_in_emission_order() {
    let fixture = assemble(Vec::new());
    replay(&fixture, recording()).await;

    let logged = fixture.log.messages().unwrap();
    let summary: Vec<_> = logged
        .iter()
        .map(|o| (o.identity.clone(), o.rssi, o.timestamp))
        .collect();

    // A closes on the identity change, B on A's return, A's tail on end of input
    assert_eq!(
        summary,
        vec![
            (beacon("A"), -60, 1_000),
            (beacon("B"), -80, 1_500),
            (beacon("A"), -40, 2_000),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reporter_ships_heatmap_and_drains_log() {
    let fixture = assemble(Vec::new());
    replay(&fixture, recording()).await;

    let sender = Arc::new(RecordingSender::default());
    let mut reporter = Reporter::new(
        HeatmapReportBuilder::new("device-7", 30_000),
        Arc::clone(&fixture.log) as Arc<dyn MessageLog<Observation>>,
        Arc::clone(&sender) as Arc<dyn ReportSender<HeatmapReport>>,
        ReporterConfig::default(),
    );

    let outcome = reporter
        .run_cycle(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, CycleOutcome::Sent { messages: 3 });
    assert!(fixture.log.is_empty());

    let reports = sender.reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.report_id, "device-7");
    assert_eq!(report.intervals.len(), 1);

    let interval = &report.intervals[0];
    assert_eq!(interval.start_time, 1_000);
    assert_eq!(interval.end_time, 2_000);
    assert_eq!(interval.beacons.len(), 2);
    assert_eq!(interval.beacons[0].identity, beacon("A"));
    assert_eq!(interval.beacons[0].packet_count, 2);
    assert!((interval.beacons[0].avg_rssi - -50.0).abs() < f64::EPSILON);
    assert_eq!(interval.beacons[1].identity, beacon("B"));
    assert_eq!(interval.beacons[1].packet_count, 1);
    assert_eq!(report.packet_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_cycle_after_drain_sends_nothing() {
    let fixture = assemble(Vec::new());
    replay(&fixture, recording()).await;

    let sender = Arc::new(RecordingSender::default());
    let mut reporter = Reporter::new(
        HeatmapReportBuilder::new("device-7", 30_000),
        Arc::clone(&fixture.log) as Arc<dyn MessageLog<Observation>>,
        Arc::clone(&sender) as Arc<dyn ReportSender<HeatmapReport>>,
        ReporterConfig::default(),
    );
    let cancel = CancellationToken::new();

    reporter.run_cycle(&cancel).await.unwrap();
    let outcome = reporter.run_cycle(&cancel).await.unwrap();
    assert_eq!(outcome, CycleOutcome::Empty);
    assert_eq!(sender.reports.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn trigger_fires_once_per_lock() {
    let rule = TriggerRule {
        action_id: "open-door".to_string(),
        identity: Some(beacon("A")),
        min_rssi: -65,
        release_lock_after_ms: 60_000,
    };
    let fixture = assemble(vec![rule]);
    replay(&fixture, recording()).await;

    // -50 fires and locks; -60 and -40 are suppressed; -70 is too weak
    let fired = fixture.handler.fired.lock().unwrap();
    assert_eq!(*fired, vec![("open-door".to_string(), -50)]);
}
