//! Message log between the stream graph and the reporter
//!
//! The graph appends through [`LogWriterNode`]; the reporter snapshots the
//! log once per cycle and then clears exactly the entries it consumed, so
//! messages appended while a report is being built are kept for the next
//! cycle.

use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::stream::{NodeId, Outlet, StreamError, StreamNode};

/// Message log errors
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("log storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("log serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Ordered, re-iterable message store.
///
/// Implementations must tolerate `append` from one thread while another
/// reads or clears.
pub trait MessageLog<M>: Send + Sync {
    fn append(&self, message: &M) -> Result<(), LogError>;

    /// Snapshot of every stored message, oldest first
    fn messages(&self) -> Result<Vec<M>, LogError>;

    /// Remove the `count` oldest messages; returns how many were removed.
    fn clear_consumed(&self, count: usize) -> Result<usize, LogError>;

    fn clear(&self) -> Result<(), LogError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// In-memory log
// ============================================================================

/// Mutex-guarded vector; contents are lost on restart.
pub struct MemoryMessageLog<M> {
    messages: Mutex<Vec<M>>,
}

impl<M> Default for MemoryMessageLog<M> {
    fn default() -> Self {
        Self {
            messages: Mutex::new(Vec::new()),
        }
    }
}

impl<M> MemoryMessageLog<M> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<M>> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: Clone + Send> MessageLog<M> for MemoryMessageLog<M> {
    fn append(&self, message: &M) -> Result<(), LogError> {
        self.lock().push(message.clone());
        Ok(())
    }

    fn messages(&self) -> Result<Vec<M>, LogError> {
        Ok(self.lock().clone())
    }

    fn clear_consumed(&self, count: usize) -> Result<usize, LogError> {
        let mut messages = self.lock();
        let removed = count.min(messages.len());
        messages.drain(..removed);
        Ok(removed)
    }

    fn clear(&self) -> Result<(), LogError> {
        self.lock().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

// ============================================================================
// Sled-backed log
// ============================================================================

/// Persistent log in a sled tree.
///
/// Key: id from `sled::Db::generate_id` as u64 big-endian bytes, so tree
/// order is insertion order. Value: JSON-serialized message.
pub struct SledMessageLog<M> {
    db: sled::Db,
    tree: sled::Tree,
    _message: PhantomData<fn() -> M>,
}

impl<M> SledMessageLog<M> {
    const TREE: &'static str = "messages";

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LogError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(Self::TREE)?;
        Ok(Self {
            db,
            tree,
            _message: PhantomData,
        })
    }

    pub fn flush(&self) -> Result<(), LogError> {
        self.tree.flush()?;
        Ok(())
    }

    pub fn size_bytes(&self) -> u64 {
        self.db.size_on_disk().unwrap_or(0)
    }
}

impl<M> MessageLog<M> for SledMessageLog<M>
where
    M: Serialize + DeserializeOwned,
{
    fn append(&self, message: &M) -> Result<(), LogError> {
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(message)?;
        self.tree.insert(key, value)?;
        Ok(())
    }

    /// Entries that no longer decode are removed with a warning so the
    /// consumed count keeps matching the stored entries.
    fn messages(&self) -> Result<Vec<M>, LogError> {
        let mut messages = Vec::with_capacity(self.tree.len());
        for item in self.tree.iter() {
            let (key, value) = item?;
            match serde_json::from_slice::<M>(&value) {
                Ok(message) => messages.push(message),
                Err(e) => {
                    warn!(error = %e, "Dropping undecodable log entry");
                    self.tree.remove(key)?;
                }
            }
        }
        Ok(messages)
    }

    fn clear_consumed(&self, count: usize) -> Result<usize, LogError> {
        let keys: Vec<_> = self
            .tree
            .iter()
            .keys()
            .take(count)
            .collect::<Result<_, _>>()?;
        for key in &keys {
            self.tree.remove(key)?;
        }
        Ok(keys.len())
    }

    fn clear(&self) -> Result<(), LogError> {
        self.tree.clear()?;
        self.tree.flush()?;
        Ok(())
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}

// ============================================================================
// Log writer node
// ============================================================================

/// Appends every received message to a log, then passes it on.
///
/// An append failure is reported to the graph after forwarding, so the live
/// stream is never held back by storage.
pub struct LogWriterNode<M> {
    name: String,
    log: Arc<dyn MessageLog<M>>,
}

impl<M> LogWriterNode<M> {
    pub fn new(name: impl Into<String>, log: Arc<dyn MessageLog<M>>) -> Self {
        Self {
            name: name.into(),
            log,
        }
    }
}

impl<M: Clone + 'static> StreamNode<M> for LogWriterNode<M> {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_received_message(
        &mut self,
        _sender: NodeId,
        message: M,
        outlet: &mut Outlet<'_, M>,
    ) -> Result<(), StreamError> {
        let appended = self.log.append(&message);
        outlet.forward(message);
        appended.map_err(|e| StreamError::Handler(format!("log append failed: {e}")))?;
        debug!(node = %self.name, size = self.log.len(), "Message logged");
        Ok(())
    }
}
