//! Temporal aggregation of beacon observations
//!
//! The [`Aggregator`] node windows observations per beacon identity and emits
//! one representative RSSI per window, computed by a pluggable
//! [`AverageFilter`].

mod aggregator;
mod filter;

pub use aggregator::{AggregationMode, Aggregator};
pub use filter::{AverageFilter, FilterKind, LinearWeightedAverage, SimpleAverage};
