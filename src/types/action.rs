//! Triggerable action with cooldown lock dates

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An action that may be fired by a trigger rule.
///
/// Two actions with the same `action_id` share one cooldown lock. The lock
/// dates are filled in by the lock table when the action fires, or copied from
/// the original lock when a re-fire is suppressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub action_id: String,
    /// Cooldown after firing, in milliseconds
    pub release_lock_after_ms: u64,
    #[serde(default)]
    pub start_lock_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub lock_release_date: Option<DateTime<Utc>>,
}

impl Action {
    pub fn new(action_id: impl Into<String>, release_lock_after_ms: u64) -> Self {
        Self {
            action_id: action_id.into(),
            release_lock_after_ms,
            start_lock_date: None,
            lock_release_date: None,
        }
    }

    /// Stamp the lock window starting at `now`.
    pub fn lock_from(&mut self, now: DateTime<Utc>) {
        let cooldown = i64::try_from(self.release_lock_after_ms)
            .ok()
            .and_then(Duration::try_milliseconds)
            .unwrap_or(Duration::MAX);
        self.start_lock_date = Some(now);
        self.lock_release_date = Some(
            now.checked_add_signed(cooldown)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
    }

    pub fn is_lock_expired(&self) -> bool {
        self.is_lock_expired_at(Utc::now())
    }

    /// An action that was never locked counts as expired.
    pub fn is_lock_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.lock_release_date.map_or(true, |release| now >= release)
    }
}
