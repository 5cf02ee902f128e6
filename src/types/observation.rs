//! Beacon observation types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one physical beacon.
///
/// Two observations aggregate together iff their identities are equal, so
/// every field that distinguishes one transmitter from another lives here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "family", rename_all = "snake_case")]
pub enum BeaconIdentity {
    /// Apple iBeacon frame: proximity UUID + major + minor
    #[serde(rename = "ibeacon")]
    IBeacon { uuid: Uuid, major: u16, minor: u16 },
    /// Eddystone-UID frame: 10-byte namespace + 6-byte instance, hex encoded
    EddystoneUid { namespace: String, instance: String },
    /// Any other advertiser, keyed by hardware address
    Device { address: String },
}

impl std::fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeaconIdentity::IBeacon { uuid, major, minor } => {
                write!(f, "ibeacon:{}:{}:{}", uuid, major, minor)
            }
            BeaconIdentity::EddystoneUid { namespace, instance } => {
                write!(f, "eddystone:{}:{}", namespace, instance)
            }
            BeaconIdentity::Device { address } => write!(f, "device:{}", address),
        }
    }
}

/// A single signal-strength reading of a beacon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub identity: BeaconIdentity,
    /// Received signal strength (dBm)
    pub rssi: i32,
    /// Observation time (milliseconds since the Unix epoch)
    pub timestamp: u64,
    /// Raw advertisement bytes, if the scanner kept them
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub payload: Vec<u8>,
}

impl Observation {
    pub fn new(identity: BeaconIdentity, rssi: i32, timestamp: u64) -> Self {
        Self {
            identity,
            rssi,
            timestamp,
            payload: Vec::new(),
        }
    }

    /// Same observation with the signal value replaced.
    pub fn with_rssi(&self, rssi: i32) -> Self {
        Self {
            rssi,
            ..self.clone()
        }
    }
}
