//! Node handles, the node capability trait and delivery bookkeeping

use super::graph::Outlet;

/// Handle of a node registered in a [`StreamGraph`](super::StreamGraph).
///
/// The generation makes a handle of a removed node unusable even after its
/// slot has been reused by a newer node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn slot(self) -> usize {
        self.index as usize
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}.{}", self.index, self.generation)
    }
}

/// Stream graph errors
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("unknown or removed node {0}")]
    UnknownNode(NodeId),
    #[error("{sender} is not a registered sender of {receiver}")]
    NotRegistered { sender: NodeId, receiver: NodeId },
    #[error("delivery cycle: {0} is already handling a message")]
    Reentrant(NodeId),
    #[error("handler failed: {0}")]
    Handler(String),
}

/// A node of the push-based stream graph.
///
/// `on_received_message` is the single inbound entry point. It runs
/// synchronously on the producer's thread, once per delivered message, in the
/// order the upstream node processed them. Whatever the node passes to
/// [`Outlet::forward`] is delivered to its receivers before `forward` returns.
pub trait StreamNode<M>: Send {
    /// Name used in logs
    fn name(&self) -> &str;

    fn on_received_message(
        &mut self,
        sender: NodeId,
        message: M,
        outlet: &mut Outlet<'_, M>,
    ) -> Result<(), StreamError>;

    /// Upstream reported end of activity. Nodes holding partial state may
    /// flush it through the outlet.
    fn on_upstream_inactive(&mut self, _outlet: &mut Outlet<'_, M>) -> Result<(), StreamError> {
        Ok(())
    }
}

/// A receiver that failed to handle a message
#[derive(Debug)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: StreamError,
}

/// Outcome of pushing one message (or signal) through the graph.
///
/// Receivers are isolated from each other: a failing handler is recorded
/// here and delivery to the remaining receivers continues.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Handler invocations that returned `Ok`, nested deliveries included
    pub delivered: usize,
    pub failures: Vec<NodeFailure>,
}

impl Delivery {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, node: NodeId, error: StreamError) {
        self.failures.push(NodeFailure { node, error });
    }
}
