//! Push-based stream graph
//!
//! Every processing stage of the beacon pipeline is a [`StreamNode`]
//! registered in a [`StreamGraph`]:
//!
//! ```text
//! scanner ──► min-rssi filter ──┬──► aggregator ──► log writer
//!                               └──► action trigger
//! ```
//!
//! - **PassingNode**: forwards unchanged, with pre/post hooks
//! - **FilterNode**: forwards what its predicate accepts
//! - **QueuedNode**: parks messages for a pull-based consumer
//!
//! Registration is bidirectional and lives in the registry, not in the
//! nodes, so a node can be removed without leaving dangling edges behind.

mod filter;
mod graph;
mod node;
mod passing;
mod queued;

pub use filter::FilterNode;
pub use graph::{Outlet, StreamGraph};
pub use node::{Delivery, NodeFailure, NodeId, StreamError, StreamNode};
pub use passing::{PassingHooks, PassingNode};
pub use queued::{MessageQueue, QueuedNode};
