//! Timeout sweeper — pauses digests for users who started the survey but
//! went dormant before finishing it.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::notify::Notifier;
use crate::store::UserStore;
use crate::survey::messages::templates;

/// Tally of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct SweepOutcome {
    /// Users successfully paused and notified.
    pub processed: usize,
    /// Users where the pause or the notification failed.
    pub errors: usize,
}

/// Scans for dormant incomplete surveys and pauses their digests.
pub struct TimeoutSweeper {
    users: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
}

impl TimeoutSweeper {
    pub fn new(users: Arc<dyn UserStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { users, notifier }
    }

    /// Run one sweep. A user counts as processed only when both the pause
    /// write and the notification succeed; any failure increments `errors`
    /// and the sweep moves on. Idempotent: paused users are not re-selected.
    pub async fn sweep(&self, threshold_days: i64) -> SweepOutcome {
        let candidates = match self.users.find_dormant(threshold_days).await {
            Ok(users) => users,
            Err(e) => {
                tracing::error!("Dormant-user query failed, skipping sweep: {e}");
                return SweepOutcome::default();
            }
        };

        let mut outcome = SweepOutcome::default();
        for user in candidates {
            if let Err(e) = self.users.pause_digest(user.id).await {
                tracing::warn!(user_id = %user.id, "Failed to pause digest: {e}");
                outcome.errors += 1;
                continue;
            }

            let delivery = self.notifier.send(&user.phone_number, templates::PAUSE).await;
            if delivery.success {
                outcome.processed += 1;
            } else {
                tracing::warn!(
                    user_id = %user.id,
                    error = delivery.error.as_deref().unwrap_or("unknown"),
                    "Failed to send pause message"
                );
                outcome.errors += 1;
            }
        }

        tracing::info!(
            processed = outcome.processed,
            errors = outcome.errors,
            "Timeout sweep finished"
        );
        outcome
    }
}

/// Spawn the periodic sweep task. Returns the task handle; dropping it does
/// not stop the loop (abort explicitly if needed).
pub fn spawn_sweep_task(
    sweeper: Arc<TimeoutSweeper>,
    threshold_days: i64,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup is quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweeper.sweep(threshold_days).await;
        }
    })
}
