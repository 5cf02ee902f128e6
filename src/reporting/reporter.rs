//! Periodic, failure-tolerant reporter
//!
//! One cycle walks the state machine
//!
//! ```text
//! Idle → WaitingForTimer → WaitingForReceiver → Building → Sending → Idle
//! ```
//!
//! A cancelled token interrupts any wait and ends the loop. Nothing a single
//! cycle does (errors or panics included) can terminate the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::builder::{BuildError, ReportBuilder};
use super::message_log::MessageLog;
use super::sender::{ReportSender, SendError};
use crate::background::sleep_or_cancel;
use crate::config::defaults;

// ============================================================================
// Configuration & Statistics
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ReporterConfig {
    pub time_between_reports: Duration,
    pub receiver_polling: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            time_between_reports: Duration::from_millis(defaults::TIME_BETWEEN_REPORTS_MS),
            receiver_polling: Duration::from_millis(defaults::RECEIVER_POLLING_MS),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReporterState {
    #[default]
    Idle,
    WaitingForTimer,
    WaitingForReceiver,
    Building,
    Sending,
}

impl std::fmt::Display for ReporterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReporterState::Idle => write!(f, "IDLE"),
            ReporterState::WaitingForTimer => write!(f, "WAITING_FOR_TIMER"),
            ReporterState::WaitingForReceiver => write!(f, "WAITING_FOR_RECEIVER"),
            ReporterState::Building => write!(f, "BUILDING"),
            ReporterState::Sending => write!(f, "SENDING"),
        }
    }
}

/// Reporter counters, shared with whoever holds
/// [`Reporter::stats_handle`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReporterStats {
    pub state: ReporterState,
    pub cycles: u64,
    pub reports_sent: u64,
    pub messages_reported: u64,
    /// Cycles abandoned because the log was empty
    pub skipped_empty: u64,
    pub build_failures: u64,
    pub send_failures: u64,
    /// Errors and panics caught at the cycle boundary
    pub unexpected_errors: u64,
    pub last_report_at: Option<DateTime<Utc>>,
}

/// How one reporting cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Sent { messages: usize },
    /// Log was empty, nothing built or sent
    Empty,
    BuildFailed,
    SendFailed,
    Cancelled,
}

// ============================================================================
// Reporter
// ============================================================================

pub struct Reporter<B: ReportBuilder> {
    builder: B,
    log: Arc<dyn MessageLog<B::Message>>,
    sender: Arc<dyn ReportSender<B::Report>>,
    config: ReporterConfig,
    stats: Arc<RwLock<ReporterStats>>,
}

impl<B> Reporter<B>
where
    B: ReportBuilder + 'static,
    B::Message: Send + Sync + 'static,
    B::Report: Send + Sync + 'static,
{
    pub fn new(
        builder: B,
        log: Arc<dyn MessageLog<B::Message>>,
        sender: Arc<dyn ReportSender<B::Report>>,
        config: ReporterConfig,
    ) -> Self {
        Self {
            builder,
            log,
            sender,
            config,
            stats: Arc::new(RwLock::new(ReporterStats::default())),
        }
    }

    pub fn stats_handle(&self) -> Arc<RwLock<ReporterStats>> {
        Arc::clone(&self.stats)
    }

    /// Run cycles until `cancel` fires (call from `tokio::spawn`).
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_ms = self.config.time_between_reports.as_millis() as u64,
            receiver_polling_ms = self.config.receiver_polling.as_millis() as u64,
            "Reporter started"
        );

        while !cancel.is_cancelled() {
            let cycle = AssertUnwindSafe(self.run_cycle(&cancel)).catch_unwind().await;
            match cycle {
                Ok(Ok(CycleOutcome::Cancelled)) => break,
                Ok(Ok(outcome)) => debug!(?outcome, "Reporting cycle finished"),
                Ok(Err(e)) => {
                    error!(error = %e, "Reporting cycle failed unexpectedly");
                    self.stats.write().await.unexpected_errors += 1;
                }
                Err(panic) => {
                    let reason = panic_reason(panic.as_ref());
                    error!(reason = %reason, "Reporting cycle panicked");
                    self.stats.write().await.unexpected_errors += 1;
                }
            }
        }

        let cycles = {
            let mut stats = self.stats.write().await;
            stats.state = ReporterState::Idle;
            stats.cycles
        };
        info!(cycles, "Reporter stopped");
    }

    /// One pass through the state machine.
    pub async fn run_cycle(&mut self, cancel: &CancellationToken) -> anyhow::Result<CycleOutcome> {
        self.enter(ReporterState::WaitingForTimer).await;
        if !sleep_or_cancel(cancel, self.config.time_between_reports).await {
            return Ok(CycleOutcome::Cancelled);
        }

        self.enter(ReporterState::WaitingForReceiver).await;
        if !self.wait_for_receiver(cancel).await {
            return Ok(CycleOutcome::Cancelled);
        }

        self.enter(ReporterState::Building).await;
        self.stats.write().await.cycles += 1;
        let messages = self.log.messages()?;
        if messages.is_empty() {
            debug!("Message log empty, skipping report");
            self.stats.write().await.skipped_empty += 1;
            self.enter(ReporterState::Idle).await;
            return Ok(CycleOutcome::Empty);
        }

        let built = self.build(&messages);
        // Consumed whether or not the build worked; newer entries stay.
        let cleared = self.log.clear_consumed(messages.len())?;
        debug!(consumed = messages.len(), cleared, "Message log cleared");

        let report = match built {
            Ok(report) => report,
            Err(BuildError::NoMessages) => {
                self.stats.write().await.skipped_empty += 1;
                self.enter(ReporterState::Idle).await;
                return Ok(CycleOutcome::Empty);
            }
            Err(e) => {
                warn!(error = %e, messages = messages.len(), "Report discarded");
                self.stats.write().await.build_failures += 1;
                self.enter(ReporterState::Idle).await;
                return Ok(CycleOutcome::BuildFailed);
            }
        };

        self.enter(ReporterState::Sending).await;
        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(CycleOutcome::Cancelled),
            sent = self.sender.send(&report) => sent,
        };

        let outcome = match sent {
            Ok(()) => {
                info!(messages = messages.len(), "Report sent");
                let mut stats = self.stats.write().await;
                stats.reports_sent += 1;
                stats.messages_reported += messages.len() as u64;
                stats.last_report_at = Some(Utc::now());
                CycleOutcome::Sent {
                    messages: messages.len(),
                }
            }
            Err(e) => {
                match &e {
                    SendError::Recoverable(_) => warn!(error = %e, "Report send failed, dropped"),
                    SendError::Unresolvable(_) => error!(error = %e, "Report rejected, dropped"),
                }
                self.stats.write().await.send_failures += 1;
                CycleOutcome::SendFailed
            }
        };
        self.enter(ReporterState::Idle).await;
        Ok(outcome)
    }

    /// Poll the sender until it reports available. `false` on cancellation.
    async fn wait_for_receiver(&self, cancel: &CancellationToken) -> bool {
        loop {
            let available = tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                available = self.sender.is_receiver_available() => available,
            };
            if available {
                return true;
            }
            debug!(
                retry_ms = self.config.receiver_polling.as_millis() as u64,
                "Receiver unavailable"
            );
            if !sleep_or_cancel(cancel, self.config.receiver_polling).await {
                return false;
            }
        }
    }

    /// A panicking builder counts as a failed build, so the consumed
    /// messages are still cleared.
    fn build(&mut self, messages: &[B::Message]) -> Result<B::Report, BuildError> {
        let builder = &mut self.builder;
        std::panic::catch_unwind(AssertUnwindSafe(|| {
            builder.new_report();
            for message in messages {
                builder.add_message(message)?;
            }
            builder.build_report()
        }))
        .unwrap_or_else(|panic| Err(BuildError::Failed(panic_reason(panic.as_ref()))))
    }

    async fn enter(&self, state: ReporterState) {
        let mut stats = self.stats.write().await;
        if stats.state != state {
            info!(from = %stats.state, to = %state, "Reporter state");
            stats.state = state;
        }
    }
}

fn panic_reason(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporting::{HeatmapReport, HeatmapReportBuilder, MemoryMessageLog};
    use crate::types::{BeaconIdentity, Observation};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sender scripted with a fixed result and a number of unavailable probes
    struct ScriptedSender {
        unavailable_probes: AtomicUsize,
        fail_with: Option<fn() -> SendError>,
        probes: AtomicUsize,
        sent: AtomicUsize,
    }

    impl ScriptedSender {
        fn ok() -> Self {
            Self {
                unavailable_probes: AtomicUsize::new(0),
                fail_with: None,
                probes: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
            }
        }

        fn failing(fail_with: fn() -> SendError) -> Self {
            Self {
                fail_with: Some(fail_with),
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl ReportSender<HeatmapReport> for ScriptedSender {
        async fn is_receiver_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.unavailable_probes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
        }

        async fn send(&self, _report: &HeatmapReport) -> Result<(), SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            match self.fail_with {
                Some(fail) => Err(fail()),
                None => Ok(()),
            }
        }
    }

    fn obs(rssi: i32, timestamp: u64) -> Observation {
        Observation::new(
            BeaconIdentity::Device {
                address: "AA".to_string(),
            },
            rssi,
            timestamp,
        )
    }

    fn config() -> ReporterConfig {
        ReporterConfig {
            time_between_reports: Duration::from_millis(100),
            receiver_polling: Duration::from_millis(1000),
        }
    }

    fn reporter(
        log: &Arc<MemoryMessageLog<Observation>>,
        sender: &Arc<ScriptedSender>,
    ) -> Reporter<HeatmapReportBuilder> {
        Reporter::new(
            HeatmapReportBuilder::new("device-1", 30_000),
            Arc::clone(log) as Arc<dyn MessageLog<Observation>>,
            Arc::clone(sender) as Arc<dyn ReportSender<HeatmapReport>>,
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn empty_log_never_calls_sender() {
        let log = Arc::new(MemoryMessageLog::new());
        let sender = Arc::new(ScriptedSender::ok());
        let mut reporter = reporter(&log, &sender);

        let outcome = reporter.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Empty);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert_eq!(reporter.stats_handle().read().await.skipped_empty, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logged_messages_are_sent_and_cleared() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-50, 0)).unwrap();
        log.append(&obs(-60, 10)).unwrap();
        let sender = Arc::new(ScriptedSender::ok());
        let mut reporter = reporter(&log, &sender);

        let outcome = reporter.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Sent { messages: 2 });
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
        assert!(log.is_empty());

        let stats = reporter.stats_handle().read().await.clone();
        assert_eq!(stats.reports_sent, 1);
        assert_eq!(stats.messages_reported, 2);
        assert_eq!(stats.state, ReporterState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn build_failure_discards_report_and_clears_log() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-50, 5000)).unwrap();
        log.append(&obs(-55, 1000)).unwrap(); // clock went backwards
        let sender = Arc::new(ScriptedSender::ok());
        let mut reporter = reporter(&log, &sender);

        let outcome = reporter.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::BuildFailed);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_are_dropped_without_retry() {
        let log = Arc::new(MemoryMessageLog::new());
        let sender = Arc::new(ScriptedSender::failing(|| {
            SendError::Recoverable("503".to_string())
        }));
        let mut reporter = reporter(&log, &sender);
        let cancel = CancellationToken::new();

        log.append(&obs(-50, 0)).unwrap();
        assert_eq!(reporter.run_cycle(&cancel).await.unwrap(), CycleOutcome::SendFailed);
        assert!(log.is_empty());

        // Next cycle has nothing new, so the failed report is not resent.
        assert_eq!(reporter.run_cycle(&cancel).await.unwrap(), CycleOutcome::Empty);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 1);
        assert_eq!(reporter.stats_handle().read().await.send_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_receiver_before_building() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-50, 0)).unwrap();
        let sender = Arc::new(ScriptedSender {
            unavailable_probes: AtomicUsize::new(2),
            ..ScriptedSender::ok()
        });
        let mut reporter = reporter(&log, &sender);

        let started = tokio::time::Instant::now();
        let outcome = reporter.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Sent { messages: 1 });
        assert_eq!(sender.probes.load(Ordering::SeqCst), 3);
        // Timer plus two polling sleeps
        assert!(started.elapsed() >= Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_timer_wait() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-50, 0)).unwrap();
        let sender = Arc::new(ScriptedSender::ok());
        let reporter = Reporter::new(
            HeatmapReportBuilder::new("device-1", 30_000),
            Arc::clone(&log) as Arc<dyn MessageLog<Observation>>,
            Arc::clone(&sender) as Arc<dyn ReportSender<HeatmapReport>>,
            ReporterConfig {
                time_between_reports: Duration::from_secs(3600),
                receiver_polling: Duration::from_secs(60),
            },
        );
        let stats = reporter.stats_handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert_eq!(log.len(), 1);
        assert_eq!(stats.read().await.state, ReporterState::Idle);
    }

    /// Builder that panics on a corrupt (-99 dBm) message
    struct PanicsOnCorrupt {
        inner: HeatmapReportBuilder,
    }

    impl PanicsOnCorrupt {
        fn new() -> Self {
            Self {
                inner: HeatmapReportBuilder::new("device-1", 30_000),
            }
        }
    }

    impl ReportBuilder for PanicsOnCorrupt {
        type Message = Observation;
        type Report = HeatmapReport;

        fn new_report(&mut self) {
            self.inner.new_report();
        }

        fn add_message(&mut self, message: &Observation) -> Result<(), BuildError> {
            if message.rssi == -99 {
                panic!("corrupt message");
            }
            self.inner.add_message(message)
        }

        fn build_report(&mut self) -> Result<HeatmapReport, BuildError> {
            self.inner.build_report()
        }
    }

    fn panicking_reporter(
        log: &Arc<MemoryMessageLog<Observation>>,
        sender: &Arc<ScriptedSender>,
    ) -> Reporter<PanicsOnCorrupt> {
        Reporter::new(
            PanicsOnCorrupt::new(),
            Arc::clone(log) as Arc<dyn MessageLog<Observation>>,
            Arc::clone(sender) as Arc<dyn ReportSender<HeatmapReport>>,
            config(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_build_still_clears_the_log() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-99, 0)).unwrap();
        log.append(&obs(-50, 10)).unwrap();
        let sender = Arc::new(ScriptedSender::ok());
        let mut reporter = panicking_reporter(&log, &sender);
        let cancel = CancellationToken::new();

        let outcome = reporter.run_cycle(&cancel).await.unwrap();
        assert_eq!(outcome, CycleOutcome::BuildFailed);
        assert!(log.is_empty());
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);

        log.append(&obs(-60, 20)).unwrap();
        let outcome = reporter.run_cycle(&cancel).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Sent { messages: 1 });
        assert_eq!(reporter.stats_handle().read().await.build_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn corrupt_message_does_not_stall_the_loop() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-99, 0)).unwrap();
        let sender = Arc::new(ScriptedSender::ok());
        let reporter = panicking_reporter(&log, &sender);
        let stats = reporter.stats_handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));

        // Cycles run at 100ms and 200ms; the first drops the corrupt entry.
        tokio::time::sleep(Duration::from_millis(150)).await;
        log.append(&obs(-50, 10)).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        let stats = stats.read().await.clone();
        assert_eq!(stats.build_failures, 1);
        assert_eq!(stats.unexpected_errors, 0);
        assert_eq!(stats.reports_sent, 1);
        assert!(log.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_while_waiting_for_receiver_sends_nothing() {
        let log = Arc::new(MemoryMessageLog::new());
        log.append(&obs(-50, 0)).unwrap();
        let sender = Arc::new(ScriptedSender {
            unavailable_probes: AtomicUsize::new(usize::MAX),
            ..ScriptedSender::ok()
        });
        let reporter = reporter(&log, &sender);
        let stats = reporter.stats_handle();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reporter.run(cancel.clone()));

        // Timer fires at 100ms, then probes at 100, 1100 and 2100ms.
        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(stats.read().await.state, ReporterState::WaitingForReceiver);
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(sender.probes.load(Ordering::SeqCst), 3);
        assert_eq!(sender.sent.load(Ordering::SeqCst), 0);
        assert_eq!(log.len(), 1);
        let stats = stats.read().await.clone();
        assert_eq!(stats.cycles, 0);
        assert_eq!(stats.state, ReporterState::Idle);
    }
}
