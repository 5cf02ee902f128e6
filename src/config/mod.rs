//! Beacon Configuration Module
//!
//! Deployment settings loaded from TOML.
//!
//! ## Loading Order
//!
//! 1. `BEACONFLOW_CONFIG` environment variable (path to TOML file)
//! 2. `beaconflow.toml` in the current working directory
//! 3. Built-in defaults
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(BeaconConfig::load());
//! let window = config::get().aggregation.window_ms;
//! ```

mod beacon_config;
pub mod defaults;

pub use beacon_config::*;

use std::sync::OnceLock;

/// Global configuration, initialized once at startup.
static BEACON_CONFIG: OnceLock<BeaconConfig> = OnceLock::new();

/// Initialize the global configuration. Later calls are ignored.
pub fn init(config: BeaconConfig) {
    if BEACON_CONFIG.set(config).is_err() {
        tracing::warn!("config::init() called more than once, ignoring");
    }
}

/// Global configuration; falls back to defaults if `init()` was never called.
pub fn get() -> &'static BeaconConfig {
    BEACON_CONFIG.get_or_init(|| {
        tracing::warn!("config::get() called before config::init(), using defaults");
        BeaconConfig::default()
    })
}

pub fn is_initialized() -> bool {
    BEACON_CONFIG.get().is_some()
}
