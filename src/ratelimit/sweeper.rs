//! Background purge of idle identities.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::decider::RateDecider;
use super::store::WindowStore;

/// Periodically purge expired attempts so identities that stop sending
/// requests do not keep their records forever.
///
/// The task runs until the returned handle is aborted or the runtime shuts
/// down. A failed purge is logged and retried on the next tick.
pub fn spawn_sweeper<S>(decider: Arc<RateDecider<S>>, every: Duration) -> JoinHandle<()>
where
    S: WindowStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing to purge yet.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            match decider.purge_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed = removed, "Purged idle identities"),
                Err(e) => warn!(error = %e, "Failed to purge expired attempts"),
            }
        }
    })
}
