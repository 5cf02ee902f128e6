//! Averaging filters: one representative value from a weighted time series

use serde::{Deserialize, Serialize};

/// Strategy turning the samples of one window into a single value.
///
/// `timestamps` and `values` are parallel and ordered oldest first.
/// Returns `None` for an empty window.
pub trait AverageFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn average(
        &self,
        window_start: u64,
        window_end: u64,
        timestamps: &[u64],
        values: &[f64],
    ) -> Option<f64>;
}

/// Arithmetic mean, every sample weighs 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleAverage;

impl AverageFilter for SimpleAverage {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn average(&self, _start: u64, _end: u64, _timestamps: &[u64], values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Linearly time-weighted mean.
///
/// `weight(t) = (1 - c) * (t - start) / (end - start) + c`, so the oldest
/// sample weighs `c` and the newest weighs 1. Weights are normalized before
/// summing.
#[derive(Debug, Clone, Copy)]
pub struct LinearWeightedAverage {
    min_weight: f64,
}

impl LinearWeightedAverage {
    /// `min_weight` is clamped into `[0, 1]`.
    pub fn new(min_weight: f64) -> Self {
        Self {
            min_weight: min_weight.clamp(0.0, 1.0),
        }
    }

    pub fn min_weight(&self) -> f64 {
        self.min_weight
    }

    fn weight(&self, timestamp: u64, start: u64, span: f64) -> f64 {
        let position = (timestamp.saturating_sub(start) as f64 / span).clamp(0.0, 1.0);
        (1.0 - self.min_weight) * position + self.min_weight
    }
}

impl Default for LinearWeightedAverage {
    fn default() -> Self {
        Self::new(crate::config::defaults::MIN_WEIGHT)
    }
}

impl AverageFilter for LinearWeightedAverage {
    fn name(&self) -> &'static str {
        "linear_weighted"
    }

    fn average(
        &self,
        window_start: u64,
        window_end: u64,
        timestamps: &[u64],
        values: &[f64],
    ) -> Option<f64> {
        match values {
            [] => None,
            [single] => Some(*single),
            _ if window_end <= window_start => {
                SimpleAverage.average(window_start, window_end, timestamps, values)
            }
            _ => {
                let span = (window_end - window_start) as f64;
                let weights: Vec<f64> = timestamps
                    .iter()
                    .map(|ts| self.weight(*ts, window_start, span))
                    .collect();
                let total: f64 = weights.iter().sum();
                if total <= f64::EPSILON {
                    return SimpleAverage.average(window_start, window_end, timestamps, values);
                }
                Some(
                    weights
                        .iter()
                        .zip(values)
                        .map(|(w, v)| (w / total) * v)
                        .sum(),
                )
            }
        }
    }
}

/// Filter selection as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    Simple,
    #[default]
    LinearWeighted,
}

impl FilterKind {
    pub fn build(self, min_weight: f64) -> Box<dyn AverageFilter> {
        match self {
            FilterKind::Simple => Box::new(SimpleAverage),
            FilterKind::LinearWeighted => Box::new(LinearWeightedAverage::new(min_weight)),
        }
    }
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::Simple => write!(f, "simple"),
            FilterKind::LinearWeighted => write!(f, "linear_weighted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_sample_is_returned_for_any_min_weight() {
        for c in [0.0, 0.1, 0.5, 1.0] {
            let filter = LinearWeightedAverage::new(c);
            assert_eq!(filter.average(100, 100, &[100], &[-63.0]), Some(-63.0));
        }
        assert_eq!(SimpleAverage.average(5, 5, &[5], &[-40.0]), Some(-40.0));
    }

    #[test]
    fn zero_min_weight_ignores_oldest_sample() {
        let filter = LinearWeightedAverage::new(0.0);
        let avg = filter.average(0, 1, &[0, 1], &[-90.0, -50.0]).unwrap();
        assert!(close(avg, -50.0));
    }

    #[test]
    fn full_min_weight_is_arithmetic_mean() {
        let filter = LinearWeightedAverage::new(1.0);
        let avg = filter.average(0, 1000, &[0, 400, 1000], &[-50.0, -60.0, -70.0]).unwrap();
        assert!(close(avg, -60.0));
    }

    #[test]
    fn weights_are_normalized() {
        // Weights 0.5 and 1.0 -> normalized 1/3 and 2/3
        let filter = LinearWeightedAverage::new(0.5);
        let avg = filter.average(0, 10, &[0, 10], &[-30.0, -60.0]).unwrap();
        assert!(close(avg, -50.0));
    }

    #[test]
    fn zero_span_falls_back_to_equal_weights() {
        let filter = LinearWeightedAverage::new(0.0);
        let avg = filter.average(7, 7, &[7, 7], &[-50.0, -100.0]).unwrap();
        assert!(close(avg, -75.0));
    }

    #[test]
    fn empty_window_has_no_value() {
        assert_eq!(SimpleAverage.average(0, 0, &[], &[]), None);
        assert_eq!(LinearWeightedAverage::new(0.3).average(0, 0, &[], &[]), None);
    }

    #[test]
    fn min_weight_is_clamped() {
        assert!(close(LinearWeightedAverage::new(1.7).min_weight(), 1.0));
        assert!(close(LinearWeightedAverage::new(-0.2).min_weight(), 0.0));
    }
}
