//! Interval-bucketed heatmap report
//!
//! Messages are grouped into consecutive intervals of `interval_duration_ms`,
//! each anchored at the first message that did not fit the previous one.
//! Inside an interval every beacon gets a packet count and the mean RSSI of
//! all its packets.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::builder::{BuildError, ReportBuilder};
use crate::types::{BeaconIdentity, Observation};

// ============================================================================
// Report Types
// ============================================================================

/// Per-beacon summary inside one interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconSummary {
    pub identity: BeaconIdentity,
    pub packet_count: u32,
    pub avg_rssi: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapInterval {
    /// Timestamp of the message that opened the interval (ms)
    pub start_time: u64,
    /// Timestamp of the last message folded in (ms)
    pub end_time: u64,
    /// Beacons in first-seen order
    pub beacons: Vec<BeaconSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapReport {
    pub report_id: String,
    /// Intervals in the order they were opened
    pub intervals: Vec<HeatmapInterval>,
}

impl HeatmapReport {
    pub fn packet_count(&self) -> u64 {
        self.intervals
            .iter()
            .flat_map(|i| &i.beacons)
            .map(|b| u64::from(b.packet_count))
            .sum()
    }
}

// ============================================================================
// Builder
// ============================================================================

struct BeaconAccumulator {
    identity: BeaconIdentity,
    rssi_history: Vec<i32>,
    avg_rssi: f64,
}

impl BeaconAccumulator {
    fn record(&mut self, rssi: i32) {
        self.rssi_history.push(rssi);
        // Full recompute keeps rounding identical to a batch mean.
        let sum: f64 = self.rssi_history.iter().copied().map(f64::from).sum();
        self.avg_rssi = sum / self.rssi_history.len() as f64;
    }

    fn summary(&self) -> BeaconSummary {
        BeaconSummary {
            identity: self.identity.clone(),
            packet_count: u32::try_from(self.rssi_history.len()).unwrap_or(u32::MAX),
            avg_rssi: self.avg_rssi,
        }
    }
}

struct OpenInterval {
    start_time: u64,
    end_time: u64,
    beacons: Vec<BeaconAccumulator>,
    index: HashMap<BeaconIdentity, usize>,
}

impl OpenInterval {
    fn anchored_at(timestamp: u64) -> Self {
        Self {
            start_time: timestamp,
            end_time: timestamp,
            beacons: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn fold(&mut self, observation: &Observation) {
        self.end_time = observation.timestamp;
        let slot = match self.index.get(&observation.identity) {
            Some(slot) => *slot,
            None => {
                self.beacons.push(BeaconAccumulator {
                    identity: observation.identity.clone(),
                    rssi_history: Vec::new(),
                    avg_rssi: 0.0,
                });
                let slot = self.beacons.len() - 1;
                self.index.insert(observation.identity.clone(), slot);
                slot
            }
        };
        self.beacons[slot].record(observation.rssi);
    }

    fn seal(self) -> HeatmapInterval {
        HeatmapInterval {
            start_time: self.start_time,
            end_time: self.end_time,
            beacons: self.beacons.iter().map(BeaconAccumulator::summary).collect(),
        }
    }
}

/// Builds a [`HeatmapReport`] from observations.
pub struct HeatmapReportBuilder {
    interval_duration_ms: u64,
    report_id: String,
    intervals: Vec<HeatmapInterval>,
    open: Option<OpenInterval>,
}

impl HeatmapReportBuilder {
    pub fn new(report_id: impl Into<String>, interval_duration_ms: u64) -> Self {
        Self {
            interval_duration_ms,
            report_id: report_id.into(),
            intervals: Vec::new(),
            open: None,
        }
    }

    pub fn interval_duration_ms(&self) -> u64 {
        self.interval_duration_ms
    }
}

impl ReportBuilder for HeatmapReportBuilder {
    type Message = Observation;
    type Report = HeatmapReport;

    fn new_report(&mut self) {
        self.intervals.clear();
        self.open = None;
    }

    fn add_message(&mut self, message: &Observation) -> Result<(), BuildError> {
        let timestamp = message.timestamp;
        let interval = match self.open.take() {
            None => OpenInterval::anchored_at(timestamp),
            Some(open) if timestamp < open.start_time => {
                let start = open.start_time;
                self.open = Some(open);
                return Err(BuildError::Failed(format!(
                    "message at {timestamp} precedes interval start {start}"
                )));
            }
            Some(open) if timestamp - open.start_time >= self.interval_duration_ms => {
                self.intervals.push(open.seal());
                OpenInterval::anchored_at(timestamp)
            }
            Some(open) => open,
        };
        self.open.insert(interval).fold(message);
        Ok(())
    }

    fn build_report(&mut self) -> Result<HeatmapReport, BuildError> {
        if let Some(open) = self.open.take() {
            self.intervals.push(open.seal());
        }
        if self.intervals.is_empty() {
            return Err(BuildError::NoMessages);
        }
        Ok(HeatmapReport {
            report_id: self.report_id.clone(),
            intervals: std::mem::take(&mut self.intervals),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(minor: u16) -> BeaconIdentity {
        BeaconIdentity::IBeacon {
            uuid: uuid::Uuid::nil(),
            major: 1,
            minor,
        }
    }

    fn obs(minor: u16, rssi: i32, timestamp: u64) -> Observation {
        Observation::new(beacon(minor), rssi, timestamp)
    }

    fn build(messages: &[Observation]) -> Result<HeatmapReport, BuildError> {
        let mut builder = HeatmapReportBuilder::new("device-1", 30_000);
        builder.new_report();
        for m in messages {
            builder.add_message(m)?;
        }
        builder.build_report()
    }

    #[test]
    fn same_interval_averages_rssi() {
        let report = build(&[obs(1, -50, 0), obs(1, -100, 0)]).unwrap();
        assert_eq!(report.report_id, "device-1");
        assert_eq!(report.intervals.len(), 1);
        let beacon = &report.intervals[0].beacons[0];
        assert_eq!(beacon.packet_count, 2);
        assert!((beacon.avg_rssi - -75.0).abs() < f64::EPSILON);
    }

    #[test]
    fn elapsed_duration_opens_independent_interval() {
        let report = build(&[obs(1, -50, 0), obs(1, -100, 0), obs(1, -60, 30_000)]).unwrap();
        assert_eq!(report.intervals.len(), 2);

        let second = &report.intervals[1];
        assert_eq!(second.start_time, 30_000);
        assert_eq!(second.beacons.len(), 1);
        assert_eq!(second.beacons[0].packet_count, 1);
        assert!((second.beacons[0].avg_rssi - -60.0).abs() < f64::EPSILON);
        assert_eq!(report.packet_count(), 3);
    }

    #[test]
    fn beacons_keep_first_seen_order() {
        let report = build(&[obs(3, -50, 0), obs(1, -60, 10), obs(3, -70, 20)]).unwrap();
        let interval = &report.intervals[0];
        let minors: Vec<_> = interval
            .beacons
            .iter()
            .map(|b| match &b.identity {
                BeaconIdentity::IBeacon { minor, .. } => *minor,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(minors, vec![3, 1]);
        assert_eq!(interval.end_time, 20);
        assert_eq!(interval.beacons[0].packet_count, 2);
    }

    #[test]
    fn empty_report_is_no_messages() {
        assert!(matches!(build(&[]), Err(BuildError::NoMessages)));
    }

    #[test]
    fn backwards_timestamp_fails() {
        let result = build(&[obs(1, -50, 5000), obs(1, -55, 4000)]);
        assert!(matches!(result, Err(BuildError::Failed(_))));
    }

    #[test]
    fn new_report_resets_state() {
        let mut builder = HeatmapReportBuilder::new("device-1", 30_000);
        builder.add_message(&obs(1, -50, 0)).unwrap();
        builder.new_report();
        assert!(matches!(builder.build_report(), Err(BuildError::NoMessages)));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = build(&[obs(1, -50, 0)]).unwrap();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["report_id"], "device-1");
        assert_eq!(json["intervals"][0]["beacons"][0]["packet_count"], 1);
        assert_eq!(json["intervals"][0]["beacons"][0]["identity"]["family"], "ibeacon");
    }
}
