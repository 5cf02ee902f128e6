//! Observation source abstraction.
//!
//! Provides a unified trait for reading beacon observations from different
//! sources: a recorded list (replay), stdin (JSON lines), and a synthetic
//! beacon generator.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rand::prelude::*;
use rand_distr::{Normal, NormalError};
use uuid::Uuid;

use crate::types::{BeaconIdentity, Observation};

/// Events produced by an observation source.
pub enum SourceEvent {
    Observation(Observation),
    /// No more data (EOF for stdin, exhausted replay or simulation)
    Eof,
}

/// Trait abstracting where observations come from.
///
/// The processing loop calls [`next_observation`](Self::next_observation) in
/// a `select!` with cancellation.
#[async_trait]
pub trait ObservationSource: Send + 'static {
    /// Returns `Err` only on unrecoverable errors; malformed input is skipped.
    async fn next_observation(&mut self) -> Result<SourceEvent>;

    /// Human-readable name for logging
    fn source_name(&self) -> &str;
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

// ============================================================================
// Replay Source
// ============================================================================

/// Replays pre-loaded observations with optional inter-observation delay.
pub struct ReplaySource {
    observations: std::vec::IntoIter<Observation>,
    delay: Duration,
    yielded_first: bool,
}

impl ReplaySource {
    pub fn new(observations: Vec<Observation>, delay: Duration) -> Self {
        Self {
            observations: observations.into_iter(),
            delay,
            yielded_first: false,
        }
    }
}

#[async_trait]
impl ObservationSource for ReplaySource {
    async fn next_observation(&mut self) -> Result<SourceEvent> {
        if self.yielded_first && !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.observations.next() {
            Some(o) => {
                self.yielded_first = true;
                Ok(SourceEvent::Observation(o))
            }
            None => Ok(SourceEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "replay"
    }
}

// ============================================================================
// Stdin Source (JSON observations, one per line)
// ============================================================================

/// Reads JSON-formatted observations from stdin.
///
/// Used with the simulator:
/// `beacon-simulator | beaconflow --stdin`
pub struct StdinSource {
    reader: tokio::io::BufReader<tokio::io::Stdin>,
    line_buffer: String,
    skipped: u64,
}

impl StdinSource {
    pub fn new() -> Self {
        Self {
            reader: tokio::io::BufReader::new(tokio::io::stdin()),
            line_buffer: String::with_capacity(512),
            skipped: 0,
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObservationSource for StdinSource {
    async fn next_observation(&mut self) -> Result<SourceEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(SourceEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Observation>(line) {
                Ok(observation) => return Ok(SourceEvent::Observation(observation)),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(error = %e, skipped = self.skipped, "Skipping malformed observation line");
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}

// ============================================================================
// Synthetic beacons
// ============================================================================

/// Proximity UUID shared by all simulated iBeacons
pub const SIMULATED_UUID: Uuid = Uuid::from_u128(0x5a4b_c3d2_e1f0_4a5b_8c6d_7e8f_9a0b_1c2d);

struct SimulatedBeacon {
    identity: BeaconIdentity,
    /// Mean signal strength, drifting as the observer moves (dBm)
    level: f64,
}

/// Random-walk model of a handful of iBeacons around a moving observer.
///
/// Every call picks one beacon, nudges its mean level and adds Gaussian
/// measurement noise.
pub struct BeaconSimulator {
    rng: StdRng,
    beacons: Vec<SimulatedBeacon>,
    noise: Normal<f64>,
    drift: Normal<f64>,
}

impl BeaconSimulator {
    pub fn new(count: u16, noise_std_dbm: f64, seed: Option<u64>) -> Result<Self, NormalError> {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        let beacons = (1..=count.max(1))
            .map(|minor| SimulatedBeacon {
                identity: BeaconIdentity::IBeacon {
                    uuid: SIMULATED_UUID,
                    major: 1,
                    minor,
                },
                level: rng.gen_range(-90.0..-50.0),
            })
            .collect();

        Ok(Self {
            rng,
            beacons,
            noise: Normal::new(0.0, noise_std_dbm)?,
            drift: Normal::new(0.0, 0.5)?,
        })
    }

    pub fn beacon_count(&self) -> usize {
        self.beacons.len()
    }

    pub fn next_observation(&mut self, timestamp: u64) -> Observation {
        let index = self.rng.gen_range(0..self.beacons.len());
        let drift = self.drift.sample(&mut self.rng);
        let noise = self.noise.sample(&mut self.rng);

        let beacon = &mut self.beacons[index];
        beacon.level = (beacon.level + drift).clamp(-100.0, -35.0);
        let rssi = (beacon.level + noise).round().clamp(-127.0, 0.0) as i32;
        Observation::new(beacon.identity.clone(), rssi, timestamp)
    }
}

/// Endless (or bounded) stream of simulated observations stamped with
/// wall-clock time.
pub struct SyntheticSource {
    simulator: BeaconSimulator,
    interval: Duration,
    remaining: Option<u64>,
}

impl SyntheticSource {
    pub fn new(simulator: BeaconSimulator, interval: Duration) -> Self {
        Self {
            simulator,
            interval,
            remaining: None,
        }
    }

    /// Stop after `count` observations.
    pub fn with_limit(mut self, count: u64) -> Self {
        self.remaining = Some(count);
        self
    }
}

#[async_trait]
impl ObservationSource for SyntheticSource {
    async fn next_observation(&mut self) -> Result<SourceEvent> {
        match self.remaining.as_mut() {
            Some(0) => return Ok(SourceEvent::Eof),
            Some(n) => *n -= 1,
            None => {}
        }
        if !self.interval.is_zero() {
            tokio::time::sleep(self.interval).await;
        }
        Ok(SourceEvent::Observation(
            self.simulator.next_observation(now_millis()),
        ))
    }

    fn source_name(&self) -> &str {
        "synthetic"
    }
}
