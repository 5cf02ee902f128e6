//! Queue-backed node: the boundary between push-based producers and
//! pull-based consumers

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tracing::debug;

use super::graph::Outlet;
use super::node::{NodeId, StreamError, StreamNode};

/// FIFO shared between a [`QueuedNode`] and its consumers.
///
/// Producers never block: once `maximum_size` messages are queued, newly
/// arriving messages are dropped.
pub struct MessageQueue<M> {
    messages: Mutex<VecDeque<M>>,
    maximum_size: Option<usize>,
    available: Notify,
    dropped: AtomicU64,
}

impl<M> MessageQueue<M> {
    pub fn unbounded() -> Self {
        Self::with_maximum_size(None)
    }

    pub fn bounded(maximum_size: usize) -> Self {
        Self::with_maximum_size(Some(maximum_size))
    }

    fn with_maximum_size(maximum_size: Option<usize>) -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            maximum_size,
            available: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a message. Returns `false` if the queue was full and the
    /// message was dropped.
    pub fn push(&self, message: M) -> bool {
        {
            let mut messages = self.lock();
            if self.maximum_size.is_some_and(|max| messages.len() >= max) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            messages.push_back(message);
        }
        self.available.notify_one();
        true
    }

    /// Remove the oldest message, waiting until one is available.
    pub async fn pull(&self) -> M {
        loop {
            if let Some(message) = self.try_pull() {
                return message;
            }
            self.available.notified().await;
        }
    }

    /// Remove the oldest message if there is one.
    pub fn try_pull(&self) -> Option<M> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn maximum_size(&self) -> Option<usize> {
        self.maximum_size
    }

    /// Messages dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<M>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Node that parks received messages in a [`MessageQueue`] instead of
/// forwarding them.
pub struct QueuedNode<M> {
    name: String,
    queue: Arc<MessageQueue<M>>,
}

impl<M> QueuedNode<M> {
    /// Unbounded queue
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(MessageQueue::unbounded()),
        }
    }

    pub fn bounded(name: impl Into<String>, maximum_size: usize) -> Self {
        Self {
            name: name.into(),
            queue: Arc::new(MessageQueue::bounded(maximum_size)),
        }
    }

    /// Consumer side of the queue; grab it before handing the node to a graph.
    pub fn handle(&self) -> Arc<MessageQueue<M>> {
        Arc::clone(&self.queue)
    }
}

impl<M: Send + 'static> StreamNode<M> for QueuedNode<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_received_message(
        &mut self,
        sender: NodeId,
        message: M,
        _outlet: &mut Outlet<'_, M>,
    ) -> Result<(), StreamError> {
        if !self.queue.push(message) {
            debug!(
                node = %self.name,
                sender = %sender,
                dropped = self.queue.dropped(),
                "Queue full, message dropped"
            );
        }
        Ok(())
    }
}
