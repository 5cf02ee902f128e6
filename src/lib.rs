//! BeaconFlow: proximity beacon stream processing
//!
//! Scanner observations are pushed through a graph of stream nodes that
//! filter, aggregate and log them, fire cooldown-locked actions, and are
//! periodically turned into heatmap reports for a collector.
//!
//! ## Architecture
//!
//! - **Stream**: push-based node graph (passing, filtering, queued nodes)
//! - **Aggregation**: tumbling/sliding RSSI windows with averaging filters
//! - **Actions**: trigger rules guarded by the action lock table
//! - **Reporting**: message log, heatmap builder and the reporter state machine
//! - **Pipeline**: observation sources and the processing loop

pub mod actions;
pub mod aggregation;
pub mod background;
pub mod config;
pub mod pipeline;
pub mod reporting;
pub mod stream;
pub mod types;

// Re-export configuration
pub use config::BeaconConfig;

// Re-export commonly used types
pub use types::{Action, BeaconIdentity, Observation};

pub use actions::{ActionLockTable, ActionTrigger, TriggerRule};
pub use aggregation::{AggregationMode, Aggregator, AverageFilter, FilterKind};
pub use reporting::{HeatmapReport, HeatmapReportBuilder, Reporter, ReporterConfig};
pub use stream::{NodeId, StreamError, StreamGraph, StreamNode};
