//! Action triggering and cooldown locking

mod lock_table;
mod trigger;

pub use lock_table::ActionLockTable;
pub use trigger::{ActionHandler, ActionTrigger, LoggingActionHandler, TriggerRule};
