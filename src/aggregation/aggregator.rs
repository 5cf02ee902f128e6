//! Windowed RSSI aggregation keyed by beacon identity
//!
//! Two policies:
//! - **Tumbling**: buffer same-identity samples and emit one aggregate when the
//!   window closes (identity change, duration elapsed, or upstream inactive)
//! - **Sliding**: emit on every sample, averaged over the trailing window
//!
//! Time is message time: durations are measured between observation
//! timestamps, never against the wall clock.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::filter::AverageFilter;
use crate::stream::{NodeId, Outlet, StreamError, StreamNode};
use crate::types::{BeaconIdentity, Observation};

/// Window policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    Tumbling,
    Sliding,
}

impl std::fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationMode::Tumbling => write!(f, "tumbling"),
            AggregationMode::Sliding => write!(f, "sliding"),
        }
    }
}

// ============================================================================
// Window State
// ============================================================================

/// Open tumbling window for a single identity
struct TumblingWindow {
    /// Most recent observation; its metadata is carried by the aggregate
    latest: Observation,
    start: u64,
    timestamps: Vec<u64>,
    values: Vec<f64>,
}

impl TumblingWindow {
    fn open(observation: Observation) -> Self {
        Self {
            start: observation.timestamp,
            timestamps: vec![observation.timestamp],
            values: vec![f64::from(observation.rssi)],
            latest: observation,
        }
    }

    fn push(&mut self, observation: Observation) {
        self.timestamps.push(observation.timestamp);
        self.values.push(f64::from(observation.rssi));
        self.latest = observation;
    }

    fn end(&self) -> u64 {
        self.timestamps.last().copied().unwrap_or(self.start)
    }
}

enum WindowState {
    Tumbling(Option<TumblingWindow>),
    Sliding(HashMap<BeaconIdentity, VecDeque<(u64, f64)>>),
}

// ============================================================================
// Aggregator
// ============================================================================

/// Stream node collapsing bursts of same-identity observations.
///
/// The emitted observation is the most recent buffered one with its RSSI
/// replaced by the filter value, rounded to the nearest integer.
pub struct Aggregator {
    name: String,
    window_ms: u64,
    filter: Box<dyn AverageFilter>,
    state: WindowState,
    emitted: u64,
}

impl Aggregator {
    pub fn new(
        name: impl Into<String>,
        mode: AggregationMode,
        window_ms: u64,
        filter: Box<dyn AverageFilter>,
    ) -> Self {
        let state = match mode {
            AggregationMode::Tumbling => WindowState::Tumbling(None),
            AggregationMode::Sliding => WindowState::Sliding(HashMap::new()),
        };
        Self {
            name: name.into(),
            window_ms,
            filter,
            state,
            emitted: 0,
        }
    }

    pub fn mode(&self) -> AggregationMode {
        match self.state {
            WindowState::Tumbling(_) => AggregationMode::Tumbling,
            WindowState::Sliding(_) => AggregationMode::Sliding,
        }
    }

    /// Aggregates emitted so far
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Identities with buffered samples: the open window in tumbling mode,
    /// every identity heard within the last window in sliding mode.
    pub fn tracked_identities(&self) -> usize {
        match &self.state {
            WindowState::Tumbling(slot) => usize::from(slot.is_some()),
            WindowState::Sliding(history) => history.len(),
        }
    }

    /// Fold one observation in, returning the aggregate it releases, if any.
    fn ingest(&mut self, observation: Observation) -> Option<Observation> {
        let window_ms = self.window_ms;
        match &mut self.state {
            WindowState::Tumbling(slot) => {
                let Some(window) = slot.as_mut() else {
                    *slot = Some(TumblingWindow::open(observation));
                    return None;
                };

                let identity_changed = window.latest.identity != observation.identity;
                let elapsed = observation.timestamp.saturating_sub(window.start) >= window_ms;
                if identity_changed || elapsed {
                    trace!(
                        identity = %window.latest.identity,
                        identity_changed,
                        samples = window.values.len(),
                        "Tumbling window closed"
                    );
                    let closed = slot.replace(TumblingWindow::open(observation));
                    return closed.and_then(|w| summarize(self.filter.as_ref(), &w));
                }

                window.push(observation);
                None
            }
            WindowState::Sliding(history) => {
                let now = observation.timestamp;
                // Identities that went quiet for a whole window hold nothing
                // that could still be averaged.
                history.retain(|_, samples| {
                    samples
                        .back()
                        .is_some_and(|(ts, _)| now.saturating_sub(*ts) < window_ms)
                });
                let samples = history.entry(observation.identity.clone()).or_default();
                while samples
                    .front()
                    .is_some_and(|(ts, _)| now.saturating_sub(*ts) >= window_ms)
                {
                    samples.pop_front();
                }
                samples.push_back((now, f64::from(observation.rssi)));

                let timestamps: Vec<u64> = samples.iter().map(|(ts, _)| *ts).collect();
                let values: Vec<f64> = samples.iter().map(|(_, v)| *v).collect();
                let start = timestamps.first().copied().unwrap_or(now);
                let value = self.filter.average(start, now, &timestamps, &values)?;
                Some(observation.with_rssi(round_rssi(value)))
            }
        }
    }

    fn emit(&mut self, aggregate: Observation, outlet: &mut Outlet<'_, Observation>) {
        self.emitted += 1;
        debug!(
            node = %self.name,
            identity = %aggregate.identity,
            rssi = aggregate.rssi,
            filter = self.filter.name(),
            "Aggregate emitted"
        );
        outlet.forward(aggregate);
    }
}

fn summarize(filter: &dyn AverageFilter, window: &TumblingWindow) -> Option<Observation> {
    let value = filter.average(window.start, window.end(), &window.timestamps, &window.values)?;
    Some(window.latest.with_rssi(round_rssi(value)))
}

fn round_rssi(value: f64) -> i32 {
    value.round() as i32
}

impl StreamNode<Observation> for Aggregator {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_received_message(
        &mut self,
        _sender: NodeId,
        message: Observation,
        outlet: &mut Outlet<'_, Observation>,
    ) -> Result<(), StreamError> {
        if let Some(aggregate) = self.ingest(message) {
            self.emit(aggregate, outlet);
        }
        Ok(())
    }

    fn on_upstream_inactive(
        &mut self,
        outlet: &mut Outlet<'_, Observation>,
    ) -> Result<(), StreamError> {
        match &mut self.state {
            WindowState::Tumbling(slot) => {
                let pending = slot.take();
                if let Some(aggregate) = pending.and_then(|w| summarize(self.filter.as_ref(), &w)) {
                    self.emit(aggregate, outlet);
                }
            }
            WindowState::Sliding(history) => history.clear(),
        }
        Ok(())
    }
}
