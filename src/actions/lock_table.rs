//! Action cooldown locks
//!
//! A fired action is tracked until its release date passes; while tracked,
//! re-firing is suppressed. Expired locks are only removed by the sweeper, so
//! `is_locked` can stay true for up to one polling interval past the release
//! date. Callers needing finer precision check
//! [`Action::is_lock_expired`] themselves.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::background::spawn_periodic;
use crate::types::Action;

/// Shared set of active action locks.
///
/// Cloning is cheap; every clone refers to the same table. All reads and
/// mutations, the sweep included, go through a single mutex.
#[derive(Clone)]
pub struct ActionLockTable {
    locks: Arc<Mutex<Vec<Action>>>,
    polling_interval: Duration,
}

impl Default for ActionLockTable {
    fn default() -> Self {
        Self::new(Duration::from_millis(
            crate::config::defaults::LOCK_POLLING_INTERVAL_MS,
        ))
    }
}

impl ActionLockTable {
    pub fn new(polling_interval: Duration) -> Self {
        Self {
            locks: Arc::new(Mutex::new(Vec::new())),
            polling_interval,
        }
    }

    pub fn polling_interval(&self) -> Duration {
        self.polling_interval
    }

    /// True while any lock with the same action id is tracked, expired or not.
    pub fn is_locked(&self, action: &Action) -> bool {
        self.lock()
            .iter()
            .any(|tracked| tracked.action_id == action.action_id)
    }

    /// Copy the tracked lock window onto `action`, if one exists.
    ///
    /// With duplicate entries the oldest one wins, so a re-fire never
    /// extends what the caller sees.
    pub fn remember_lock(&self, action: &mut Action) -> bool {
        let locks = self.lock();
        match locks.iter().find(|tracked| tracked.action_id == action.action_id) {
            Some(tracked) => {
                action.start_lock_date = tracked.start_lock_date;
                action.lock_release_date = tracked.lock_release_date;
                true
            }
            None => false,
        }
    }

    /// Lock `action` starting now.
    pub fn add_lock(&self, action: &mut Action) {
        self.add_lock_at(action, Utc::now());
    }

    /// Stamp `action` with a lock window starting at `now` and track it.
    /// No dedup: an existing lock for the same id is kept alongside.
    pub fn add_lock_at(&self, action: &mut Action, now: DateTime<Utc>) {
        action.lock_from(now);
        debug!(
            action_id = %action.action_id,
            release = ?action.lock_release_date,
            "Action lock added"
        );
        self.lock().push(action.clone());
    }

    /// Drop every lock whose release date is at or before `now`.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> usize {
        let mut locks = self.lock();
        let before = locks.len();
        locks.retain(|tracked| !tracked.is_lock_expired_at(now));
        let removed = before - locks.len();
        if removed > 0 {
            debug!(removed, remaining = locks.len(), "Expired action locks swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Start the background sweeper. It stops when `cancel` fires.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let table = self.clone();
        info!(
            interval_ms = self.polling_interval.as_millis() as u64,
            "Action lock sweeper starting"
        );
        spawn_periodic("lock-sweeper", self.polling_interval, cancel, move || {
            table.remove_expired(Utc::now());
        })
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Action>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
