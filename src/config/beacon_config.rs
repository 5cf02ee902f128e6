//! Beacon Configuration - deployment settings as TOML values
//!
//! Each section implements `Default` with the values from
//! [`defaults`](super::defaults), so a missing file, a missing section and a
//! missing key all behave the same.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::actions::TriggerRule;
use crate::aggregation::{AggregationMode, FilterKind};
use crate::reporting::ReporterConfig;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "BEACONFLOW_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "beaconflow.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration.
///
/// Load with `BeaconConfig::load()` which searches:
/// 1. `$BEACONFLOW_CONFIG` env var
/// 2. `./beaconflow.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BeaconConfig {
    #[serde(default)]
    pub device: DeviceConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub aggregation: AggregationConfig,

    #[serde(default)]
    pub locks: LockConfig,

    #[serde(default)]
    pub reporter: ReporterSettings,

    #[serde(default)]
    pub storage: StorageConfig,

    /// Action trigger rules
    #[serde(default)]
    pub actions: Vec<TriggerRule>,
}

impl BeaconConfig {
    /// Load configuration using the standard search order.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), device = %config.device.id, "Loaded config from {CONFIG_ENV_VAR}");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {CONFIG_ENV_VAR}, falling back");
                    }
                }
            } else {
                warn!(path = %path, "{CONFIG_ENV_VAR} points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(device = %config.device.id, "Loaded config from ./{LOCAL_CONFIG_FILE}");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{LOCAL_CONFIG_FILE}, using defaults");
                }
            }
        }

        info!("No {LOCAL_CONFIG_FILE} found, using built-in defaults");
        Self::default()
    }

    /// Load and validate a specific TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config = Self::from_toml(&contents).map_err(|e| match e {
            ConfigError::Parse(_, e) => ConfigError::Parse(path.to_path_buf(), e),
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(PathBuf::new(), e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Check every section, collecting all violations.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();

        if self.device.id.trim().is_empty() {
            errors.push("device.id: must not be empty".to_string());
        }

        let rssi_range = defaults::RSSI_FLOOR..=defaults::RSSI_CEILING;
        if !rssi_range.contains(&self.scan.min_rssi) {
            errors.push(format!(
                "scan.min_rssi: {} outside [{}, {}]",
                self.scan.min_rssi,
                defaults::RSSI_FLOOR,
                defaults::RSSI_CEILING
            ));
        }

        let a = &self.aggregation;
        Self::check_positive(a.window_ms, "aggregation.window_ms", &mut errors);
        if !(0.0..=1.0).contains(&a.min_weight) {
            errors.push(format!(
                "aggregation.min_weight: {} must be within [0, 1]",
                a.min_weight
            ));
        }

        Self::check_positive(self.locks.polling_interval_ms, "locks.polling_interval_ms", &mut errors);

        let r = &self.reporter;
        Self::check_positive(r.time_between_reports_ms, "reporter.time_between_reports_ms", &mut errors);
        Self::check_positive(r.receiver_polling_ms, "reporter.receiver_polling_ms", &mut errors);
        Self::check_positive(r.heatmap_interval_ms, "reporter.heatmap_interval_ms", &mut errors);
        Self::check_positive(r.http_timeout_secs, "reporter.http_timeout_secs", &mut errors);
        if let Some(url) = &r.collector_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                errors.push(format!(
                    "reporter.collector_url: '{url}' must start with http:// or https://"
                ));
            }
        }

        let mut seen = HashSet::new();
        for (i, rule) in self.actions.iter().enumerate() {
            if rule.action_id.trim().is_empty() {
                errors.push(format!("actions[{i}].action_id: must not be empty"));
            } else if !seen.insert(rule.action_id.as_str()) {
                errors.push(format!("actions[{i}].action_id: duplicate '{}'", rule.action_id));
            }
            if rule.release_lock_after_ms == 0 {
                errors.push(format!("actions[{i}].release_lock_after_ms: must be > 0"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_positive(value: u64, name: &str, errors: &mut Vec<String>) {
        if value == 0 {
            errors.push(format!("{name}: must be > 0"));
        }
    }

    pub fn reporter_config(&self) -> ReporterConfig {
        ReporterConfig {
            time_between_reports: Duration::from_millis(self.reporter.time_between_reports_ms),
            receiver_polling: Duration::from_millis(self.reporter.receiver_polling_ms),
        }
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed:\n  - {}", .0.join("\n  - "))]
    Validation(Vec<String>),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Fixed identifier stamped on every report
    #[serde(default = "default_device_id")]
    pub id: String,
}

fn default_device_id() -> String {
    defaults::DEVICE_ID.to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Admission filter (dBm)
    #[serde(default = "default_min_rssi")]
    pub min_rssi: i32,
}

fn default_min_rssi() -> i32 {
    defaults::MIN_RSSI
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            min_rssi: default_min_rssi(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default)]
    pub mode: AggregationMode,
    #[serde(default)]
    pub filter: FilterKind,
    /// Minimum weight `c` of the linear-weighted filter
    #[serde(default = "default_min_weight")]
    pub min_weight: f64,
}

fn default_window_ms() -> u64 {
    defaults::AGGREGATION_WINDOW_MS
}
fn default_min_weight() -> f64 {
    defaults::MIN_WEIGHT
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            mode: AggregationMode::default(),
            filter: FilterKind::default(),
            min_weight: default_min_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
}

fn default_polling_interval_ms() -> u64 {
    defaults::LOCK_POLLING_INTERVAL_MS
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            polling_interval_ms: default_polling_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReporterSettings {
    #[serde(default = "default_time_between_reports_ms")]
    pub time_between_reports_ms: u64,
    #[serde(default = "default_receiver_polling_ms")]
    pub receiver_polling_ms: u64,
    #[serde(default = "default_heatmap_interval_ms")]
    pub heatmap_interval_ms: u64,
    /// Collector base URL; reports are only logged when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector_url: Option<String>,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_time_between_reports_ms() -> u64 {
    defaults::TIME_BETWEEN_REPORTS_MS
}
fn default_receiver_polling_ms() -> u64 {
    defaults::RECEIVER_POLLING_MS
}
fn default_heatmap_interval_ms() -> u64 {
    defaults::HEATMAP_INTERVAL_MS
}
fn default_http_timeout_secs() -> u64 {
    defaults::HTTP_TIMEOUT_SECS
}

impl Default for ReporterSettings {
    fn default() -> Self {
        Self {
            time_between_reports_ms: default_time_between_reports_ms(),
            receiver_polling_ms: default_receiver_polling_ms(),
            heatmap_interval_ms: default_heatmap_interval_ms(),
            collector_url: None,
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Sled directory for the message log; empty keeps the log in memory
    #[serde(default)]
    pub log_path: String,
}
