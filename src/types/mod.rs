//! Shared data structures for the beacon pipeline
//!
//! - `Observation` / `BeaconIdentity`: what the scanner produces and the
//!   aggregator consumes
//! - `Action`: what trigger rules fire and the lock table tracks

mod action;
mod observation;

pub use action::*;
pub use observation::*;
