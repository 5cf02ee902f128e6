//! Background services: cancellable periodic tasks
//!
//! The lock-table sweeper and the reporter loop both run as tokio tasks that
//! observe a shared `CancellationToken`.

pub mod periodic;

pub use periodic::{sleep_or_cancel, spawn_periodic};
