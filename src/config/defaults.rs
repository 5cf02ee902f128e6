//! System-wide default constants.
//!
//! Every `#[serde(default)]` in [`BeaconConfig`](super::BeaconConfig) points
//! here, so an empty config file behaves exactly like no config file.

// ============================================================================
// Device & Scan
// ============================================================================

/// Report-level identifier used when none is configured.
pub const DEVICE_ID: &str = "beaconflow-device";

/// Observations weaker than this (dBm) never enter the graph.
pub const MIN_RSSI: i32 = -100;

/// Accepted range for `scan.min_rssi` (dBm).
pub const RSSI_FLOOR: i32 = -127;
pub const RSSI_CEILING: i32 = 20;

// ============================================================================
// Aggregation
// ============================================================================

/// Aggregation window (ms).
pub const AGGREGATION_WINDOW_MS: u64 = 2_000;

/// Weight of the oldest sample in the linear-weighted filter.
pub const MIN_WEIGHT: f64 = 0.2;

// ============================================================================
// Action Locks
// ============================================================================

/// Lock-table sweep interval (ms).
pub const LOCK_POLLING_INTERVAL_MS: u64 = 500;

// ============================================================================
// Reporter
// ============================================================================

/// Sleep between reporting cycles (ms).
pub const TIME_BETWEEN_REPORTS_MS: u64 = 20_000;

/// Retry interval while the collector is unavailable (ms).
pub const RECEIVER_POLLING_MS: u64 = 60_000;

/// Heatmap interval length (ms).
pub const HEATMAP_INTERVAL_MS: u64 = 30_000;

/// HTTP client timeout for collector requests (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Synthetic Source
// ============================================================================

/// Number of simulated beacons.
pub const SYNTHETIC_BEACONS: u16 = 4;

/// Delay between synthetic observations (ms).
pub const SYNTHETIC_INTERVAL_MS: u64 = 100;
