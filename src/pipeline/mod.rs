//! Observation ingestion
//!
//! ```text
//! ObservationSource ──► ProcessingLoop ──► scanner node ──► StreamGraph
//! (replay / stdin /       select! with
//!  synthetic)             cancellation
//! ```

pub mod processing_loop;
pub mod source;

pub use processing_loop::{LoopStats, ProcessingLoop, SharedGraph, StopReason};
pub use source::{
    now_millis, BeaconSimulator, ObservationSource, ReplaySource, SourceEvent, StdinSource,
    SyntheticSource,
};
