use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::session::SessionManager;

/// Periodically purge expired sessions from both stores.
///
/// Several replicas may run this at once; deletes are keyed by token and
/// idempotent. Returns `None` when `every` is zero.
pub fn spawn_expiry_sweeper(manager: SessionManager, every: Duration) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        tracing::info!("Session expiry sweep disabled");
        return None;
    }

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let removed = manager.delete_expired().await;
            if removed > 0 {
                tracing::info!(removed, "Expired sessions swept");
            } else {
                tracing::debug!("Expiry sweep found nothing to remove");
            }
        }
    }))
}
