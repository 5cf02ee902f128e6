//! Rule-based action triggering with cooldown locks

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::lock_table::ActionLockTable;
use crate::stream::{NodeId, Outlet, StreamError, StreamNode};
use crate::types::{Action, BeaconIdentity, Observation};

/// Fires `action_id` when a matching beacon is seen at or above `min_rssi`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerRule {
    pub action_id: String,
    /// Beacon to watch; `None` matches any beacon
    #[serde(default)]
    pub identity: Option<BeaconIdentity>,
    pub min_rssi: i32,
    pub release_lock_after_ms: u64,
}

impl TriggerRule {
    pub fn matches(&self, observation: &Observation) -> bool {
        self.identity
            .as_ref()
            .map_or(true, |identity| *identity == observation.identity)
            && observation.rssi >= self.min_rssi
    }

    fn action(&self) -> Action {
        Action::new(self.action_id.clone(), self.release_lock_after_ms)
    }
}

/// Executes fired actions.
pub trait ActionHandler: Send + Sync {
    fn fire(&self, action: &Action, observation: &Observation);
}

/// Handler that only logs; used when no notification layer is wired in.
#[derive(Debug, Default)]
pub struct LoggingActionHandler;

impl ActionHandler for LoggingActionHandler {
    fn fire(&self, action: &Action, observation: &Observation) {
        info!(
            action_id = %action.action_id,
            identity = %observation.identity,
            rssi = observation.rssi,
            release = ?action.lock_release_date,
            "Action fired"
        );
    }
}

/// Stream node evaluating trigger rules against every observation.
///
/// Observations are forwarded unchanged, whether or not a rule fired.
pub struct ActionTrigger {
    name: String,
    rules: Vec<TriggerRule>,
    locks: ActionLockTable,
    handler: Arc<dyn ActionHandler>,
    fired: u64,
    suppressed: u64,
}

impl ActionTrigger {
    pub fn new(
        name: impl Into<String>,
        rules: Vec<TriggerRule>,
        locks: ActionLockTable,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            rules,
            locks,
            handler,
            fired: 0,
            suppressed: 0,
        }
    }

    pub fn fired(&self) -> u64 {
        self.fired
    }

    pub fn suppressed(&self) -> u64 {
        self.suppressed
    }

    fn evaluate(&mut self, observation: &Observation) {
        for rule in self.rules.iter().filter(|r| r.matches(observation)) {
            let mut action = rule.action();
            if self.locks.is_locked(&action) {
                self.locks.remember_lock(&mut action);
                self.suppressed += 1;
                debug!(
                    action_id = %action.action_id,
                    release = ?action.lock_release_date,
                    "Action locked, trigger suppressed"
                );
                continue;
            }
            self.locks.add_lock(&mut action);
            self.fired += 1;
            self.handler.fire(&action, observation);
        }
    }
}

impl StreamNode<Observation> for ActionTrigger {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_received_message(
        &mut self,
        _sender: NodeId,
        message: Observation,
        outlet: &mut Outlet<'_, Observation>,
    ) -> Result<(), StreamError> {
        self.evaluate(&message);
        outlet.forward(message);
        Ok(())
    }
}
