//! Periodic reporting: message log → report builder → sender
//!
//! - [`MessageLog`]: ordered store the aggregator output is written to
//! - [`ReportBuilder`]: folds logged messages into a report ([`HeatmapReportBuilder`])
//! - [`ReportSender`]: delivers the report ([`HttpReportSender`], [`LoggingReportSender`])
//! - [`Reporter`]: the background loop tying them together

mod builder;
mod heatmap;
mod http_sender;
mod message_log;
mod reporter;
mod sender;

pub use builder::{BuildError, ReportBuilder};
pub use heatmap::{BeaconSummary, HeatmapInterval, HeatmapReport, HeatmapReportBuilder};
pub use http_sender::HttpReportSender;
pub use message_log::{LogError, LogWriterNode, MemoryMessageLog, MessageLog, SledMessageLog};
pub use reporter::{CycleOutcome, Reporter, ReporterConfig, ReporterState, ReporterStats};
pub use sender::{LoggingReportSender, ReportSender, SendError};
