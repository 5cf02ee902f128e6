//! Cancellable sleep and periodic task helpers
//!
//! Every background loop (lock sweeper, reporter) waits through
//! [`sleep_or_cancel`], so a stop request interrupts an in-progress sleep
//! instead of waiting for it to elapse.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Sleep for `duration` unless `token` is cancelled first.
///
/// Returns `true` if the full duration elapsed, `false` on cancellation.
/// Cancellation wins when both are ready.
pub async fn sleep_or_cancel(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Spawn a task calling `tick` every `interval` until `token` is cancelled.
///
/// The first tick happens after one full interval. A cancellation observed
/// during the sleep ends the task without running `tick` again.
pub fn spawn_periodic<F>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        info!(task = name, interval_ms = interval.as_millis() as u64, "Periodic task started");
        let mut ticks = 0u64;
        while sleep_or_cancel(&token, interval).await {
            tick();
            ticks += 1;
        }
        debug!(task = name, ticks, "Periodic task stopped");
    })
}
