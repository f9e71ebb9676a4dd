use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{storage::StorageError, tag_store::TagStore},
    services::promotion_scheduler::PromotionScheduler,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a storage backend installed in the shared state, flipping degraded
/// mode while it is unreachable.
///
/// After every successful install or reconnect the promotion scheduler
/// reconciles its jobs, so pending root tags that accumulated while storage
/// was away get their timers back.
pub async fn run<F, Fut>(state: SharedState, scheduler: PromotionScheduler, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn TagStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let store = match connect().await {
            Ok(store) => store,
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        state.install_tag_store(store.clone()).await;
        info!("storage connection established; leaving degraded mode");
        reconcile_jobs(&scheduler).await;
        delay = INITIAL_DELAY;

        supervise_health(&state, &scheduler, store).await;

        // Health supervision gave up on this connection; back off and dial
        // a fresh one.
        state.clear_tag_store().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// Poll the installed store and try bounded in-place reconnects when a
/// health check fails. Returns when the connection is beyond saving.
async fn supervise_health(
    state: &SharedState,
    scheduler: &PromotionScheduler,
    store: Arc<dyn TagStore>,
) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded().await {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                    reconcile_jobs(scheduler).await;
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true);

                if !reconnect_with_backoff(&store).await {
                    warn!("exhausted storage reconnect attempts; dropping the connection");
                    return;
                }

                state.update_degraded(false);
                reconcile_jobs(scheduler).await;
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn reconnect_with_backoff(store: &Arc<dyn TagStore>) -> bool {
    let mut delay = INITIAL_DELAY;
    for attempt in 1..=MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "storage reconnection succeeded");
                return true;
            }
            Err(err) => {
                warn!(attempt, error = %err, "storage reconnect attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

async fn reconcile_jobs(scheduler: &PromotionScheduler) {
    if let Err(err) = scheduler.reconcile().await {
        warn!(error = %err, "promotion job reconciliation failed; will retry on next reconnect");
    }
}
