//! Report delivery contract

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

/// Delivery failures. Neither kind is retried: the next cycle's report
/// supersedes the failed one.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// Transient failure (timeout, overload, server error)
    #[error("recoverable send failure: {0}")]
    Recoverable(String),
    /// The receiver rejected the report; resending it would fail again
    #[error("unresolvable send failure: {0}")]
    Unresolvable(String),
}

/// Delivers finished reports to a collector.
#[async_trait]
pub trait ReportSender<R>: Send + Sync {
    /// Cheap reachability probe polled before building a report.
    async fn is_receiver_available(&self) -> bool;

    async fn send(&self, report: &R) -> Result<(), SendError>;
}

/// Dry-run sender: always available, logs the report as JSON.
#[derive(Debug, Default)]
pub struct LoggingReportSender;

#[async_trait]
impl<R: Serialize + Sync> ReportSender<R> for LoggingReportSender {
    async fn is_receiver_available(&self) -> bool {
        true
    }

    async fn send(&self, report: &R) -> Result<(), SendError> {
        let json = serde_json::to_string(report)
            .map_err(|e| SendError::Unresolvable(format!("report not serializable: {e}")))?;
        info!(bytes = json.len(), report = %json, "Report (dry run)");
        Ok(())
    }
}
