use std::{collections::HashSet, sync::Arc, time::Duration};

use dashmap::DashMap;
use time::{OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    dao::models::{PromotionJobEntity, PromotionJobStatus},
    error::ServiceError,
    services::{self, game_service},
    state::SharedState,
};

/// Durable delayed-job queue promoting pending root tags, one job per game.
///
/// Jobs are recorded through the tag store so they outlive the process; the
/// in-process timer tasks are rebuilt from those records by
/// [`PromotionScheduler::reconcile`] on startup and after reconnects. A job
/// never fires before its trigger, may fire arbitrarily later when the
/// worker was offline, and tolerates redelivery because the promotion
/// handler treats a game without a pending tag as a no-op.
#[derive(Clone)]
pub struct PromotionScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    state: SharedState,
    tasks: DashMap<Uuid, JoinHandle<()>>,
}

impl PromotionScheduler {
    /// Construct the scheduler over the shared state. The handle is cheap to
    /// clone and is injected wherever root tags are created.
    pub fn new(state: SharedState) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                state,
                tasks: DashMap::new(),
            }),
        }
    }

    /// Record a promotion job for the game and arm its timer.
    ///
    /// The trigger defaults to the end of the tag's posting day; an explicit
    /// override exists for accelerated testing.
    pub async fn schedule(
        &self,
        game_id: Uuid,
        posted_at: OffsetDateTime,
        override_trigger: Option<OffsetDateTime>,
    ) -> Result<(), ServiceError> {
        let trigger_at = override_trigger.unwrap_or_else(|| {
            end_of_posting_day(posted_at, self.inner.state.config().chain_offset)
        });

        let store = services::require_store(&self.inner.state).await?;
        store
            .save_promotion_job(PromotionJobEntity {
                game_id,
                trigger_at,
                status: PromotionJobStatus::Scheduled,
                attempts: 0,
            })
            .await?;

        info!(%game_id, %trigger_at, "promotion scheduled");
        self.arm_timer(game_id, trigger_at);
        Ok(())
    }

    /// Rebuild timers from durable state: every recorded job without a live
    /// task gets one, and every game holding a pending tag without a job
    /// record gets its job re-created at the original trigger time. Past-due
    /// triggers fire immediately.
    pub async fn reconcile(&self) -> Result<(), ServiceError> {
        let store = services::require_store(&self.inner.state).await?;

        let mut recorded = HashSet::new();
        for job in store.list_promotion_jobs().await? {
            recorded.insert(job.game_id);
            if !self.inner.tasks.contains_key(&job.game_id) {
                debug!(
                    game_id = %job.game_id,
                    trigger_at = %job.trigger_at,
                    "re-arming recorded promotion job"
                );
                self.arm_timer(job.game_id, job.trigger_at);
            }
        }

        for game in store.find_games_with_pending().await? {
            if recorded.contains(&game.id) {
                continue;
            }
            let Some(pending_id) = game.pending_root_tag_id else {
                continue;
            };
            // Lost job record: recompute the original trigger from the
            // pending tag itself; a vanished tag degenerates to "now" and
            // lets the idempotent handler clean up.
            let trigger_at = match store.find_tag(pending_id).await? {
                Some(tag) => {
                    end_of_posting_day(tag.posted_at, self.inner.state.config().chain_offset)
                }
                None => self.inner.state.clock().now(),
            };
            warn!(
                game_id = %game.id,
                %trigger_at,
                "pending root tag had no promotion job; rescheduling"
            );
            store
                .save_promotion_job(PromotionJobEntity {
                    game_id: game.id,
                    trigger_at,
                    status: PromotionJobStatus::Scheduled,
                    attempts: 0,
                })
                .await?;
            self.arm_timer(game.id, trigger_at);
        }

        Ok(())
    }

    /// Abort every armed timer. Durable job records stay behind for the next
    /// process to reconcile.
    pub fn shutdown(&self) {
        for entry in self.inner.tasks.iter() {
            entry.value().abort();
        }
        self.inner.tasks.clear();
    }

    /// Whether any timer task is currently armed or firing.
    pub fn is_idle(&self) -> bool {
        self.inner.tasks.is_empty()
    }

    fn arm_timer(&self, game_id: Uuid, trigger_at: OffsetDateTime) {
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let delay = delay_until(scheduler.inner.state.clock().as_ref(), trigger_at);
            if !delay.is_zero() {
                sleep(delay).await;
            }
            scheduler.run_job(game_id).await;
            // May drop a just-armed replacement in a narrow race; the next
            // reconcile pass re-arms it.
            scheduler.inner.tasks.remove(&game_id);
        });

        if let Some(previous) = self.inner.tasks.insert(game_id, handle) {
            previous.abort();
        }
    }

    async fn run_job(&self, game_id: Uuid) {
        let retry = self.inner.state.config().scheduler;
        let mut job = self.load_job(game_id).await;
        job.status = PromotionJobStatus::Fired;

        let mut delay = retry.initial_backoff;
        for attempt in 1..=retry.max_attempts {
            job.attempts = attempt;
            self.persist_job(&job).await;

            match game_service::update_pending_tag(&self.inner.state, game_id).await {
                Ok(_) => {
                    if let Some(store) = self.inner.state.tag_store().await {
                        if let Err(err) = store.delete_promotion_job(game_id).await {
                            warn!(%game_id, error = %err, "failed to delete completed promotion job");
                        }
                    }
                    info!(%game_id, attempt, "promotion job completed");
                    return;
                }
                Err(err) if err.is_transient() && attempt < retry.max_attempts => {
                    warn!(%game_id, attempt, error = %err, "promotion attempt failed; backing off");
                    sleep(delay).await;
                    delay = (delay * 2).min(retry.max_backoff);
                }
                Err(err) if err.is_transient() => {
                    // Not silently dropped: the job record stays behind with
                    // its attempt count so a stuck pending tag is visible.
                    error!(
                        %game_id,
                        attempts = attempt,
                        error = %err,
                        "promotion job exhausted its retry budget; leaving it recorded for operators"
                    );
                    return;
                }
                Err(err) => {
                    error!(
                        %game_id,
                        error = %err,
                        "promotion job failed fatally; leaving it recorded for operators"
                    );
                    return;
                }
            }
        }
    }

    async fn load_job(&self, game_id: Uuid) -> PromotionJobEntity {
        if let Some(store) = self.inner.state.tag_store().await {
            if let Ok(Some(job)) = store.find_promotion_job(game_id).await {
                return job;
            }
        }
        // The record vanished or storage is flapping: synthesize one so the
        // attempt bookkeeping still lands once storage is back.
        PromotionJobEntity {
            game_id,
            trigger_at: self.inner.state.clock().now(),
            status: PromotionJobStatus::Fired,
            attempts: 0,
        }
    }

    async fn persist_job(&self, job: &PromotionJobEntity) {
        let Some(store) = self.inner.state.tag_store().await else {
            return;
        };
        if let Err(err) = store.save_promotion_job(job.clone()).await {
            warn!(game_id = %job.game_id, error = %err, "failed to persist promotion job state");
        }
    }
}

/// Midnight following the posting instant, in the chain's offset.
pub fn end_of_posting_day(posted_at: OffsetDateTime, offset: UtcOffset) -> OffsetDateTime {
    let local = posted_at.to_offset(offset);
    match local.date().next_day() {
        Some(next_day) => PrimitiveDateTime::new(next_day, Time::MIDNIGHT).assume_offset(offset),
        // Calendar overflow, only reachable at the far end of the supported
        // range: fall back to firing immediately.
        None => posted_at,
    }
}

fn delay_until(clock: &dyn Clock, trigger_at: OffsetDateTime) -> Duration {
    Duration::try_from(trigger_at - clock.now()).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::{AppConfig, SchedulerConfig},
        dao::tag_store::{TagStore, memory::MemoryTagStore},
        dto::{game::CreateGameParams, tag::CreateTagParams},
        services::tag_service,
        state::AppState,
    };

    struct Harness {
        state: SharedState,
        scheduler: PromotionScheduler,
        store: MemoryTagStore,
        clock: Arc<ManualClock>,
    }

    async fn harness() -> Harness {
        harness_with_config(AppConfig::default()).await
    }

    async fn harness_with_config(config: AppConfig) -> Harness {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 08:00 UTC)));
        let state = AppState::with_clock(config, clock.clone());
        let store = MemoryTagStore::new();
        state.install_tag_store(Arc::new(store.clone())).await;
        let scheduler = PromotionScheduler::new(state.clone());
        Harness {
            state,
            scheduler,
            store,
            clock,
        }
    }

    async fn new_game(h: &Harness, creator: Uuid) -> Uuid {
        h.store.add_user(creator);
        crate::services::game_service::create_game(
            &h.state,
            CreateGameParams {
                name: "city rally".into(),
                creator_id: creator,
                creator_name: "creator".into(),
                members: Vec::new(),
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn post_root(
        h: &Harness,
        creator: Uuid,
        game_id: Uuid,
        posted_at: OffsetDateTime,
        promote_at: Option<OffsetDateTime>,
    ) -> Uuid {
        tag_service::create_tag(
            &h.state,
            &h.scheduler,
            CreateTagParams {
                creator_id: creator,
                game_id,
                is_root: true,
                content: "round".into(),
                root_tag_id: None,
                posted_at: Some(posted_at),
                promote_at,
            },
        )
        .await
        .unwrap()
        .id
    }

    async fn wait_until_idle(scheduler: &PromotionScheduler) {
        for _ in 0..400 {
            if scheduler.is_idle() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("promotion scheduler never drained its timer tasks");
    }

    #[test]
    fn end_of_posting_day_is_the_next_midnight() {
        assert_eq!(
            end_of_posting_day(datetime!(2024-01-01 10:00 UTC), UtcOffset::UTC),
            datetime!(2024-01-02 00:00 UTC)
        );
        // Just before midnight still rolls to the next day.
        assert_eq!(
            end_of_posting_day(datetime!(2024-01-01 23:59:59 UTC), UtcOffset::UTC),
            datetime!(2024-01-02 00:00 UTC)
        );
    }

    #[test]
    fn end_of_posting_day_respects_the_chain_offset() {
        let offset = UtcOffset::from_hms(2, 0, 0).unwrap();
        // 23:30 UTC is already 01:30 on day two in UTC+2, so the posting day
        // ends at day-three midnight local time.
        assert_eq!(
            end_of_posting_day(datetime!(2024-01-01 23:30 UTC), offset),
            datetime!(2024-01-03 00:00 +02:00)
        );
    }

    #[tokio::test]
    async fn past_trigger_promotes_immediately() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let a = post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC), None).await;
        h.clock.set(datetime!(2024-01-02 09:00 UTC));
        let b = post_root(
            &h,
            creator,
            game_id,
            datetime!(2024-01-02 09:00 UTC),
            Some(datetime!(2024-01-02 08:59 UTC)),
        )
        .await;

        wait_until_idle(&h.scheduler).await;

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.latest_root_tag_id, Some(b));
        assert_eq!(game.pending_root_tag_id, None);

        let stored_a = h.store.find_tag(a).await.unwrap().unwrap();
        assert_eq!(stored_a.next_root_tag_id, Some(b));

        // Completed jobs leave no record behind.
        assert!(h.store.find_promotion_job(game_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reconcile_restores_a_lost_job_record() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC), None).await;
        let b = post_root(&h, creator, game_id, datetime!(2024-01-02 09:00 UTC), None).await;

        // Simulate a crash: timers gone, job record gone, pending tag left.
        h.scheduler.shutdown();
        h.store.delete_promotion_job(game_id).await.unwrap();

        // Restart past the original trigger: reconciliation must fire now.
        h.clock.set(datetime!(2024-01-04 07:00 UTC));
        h.scheduler.reconcile().await.unwrap();
        wait_until_idle(&h.scheduler).await;

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.latest_root_tag_id, Some(b));
        assert_eq!(game.pending_root_tag_id, None);
    }

    #[tokio::test]
    async fn reconcile_rearms_a_recorded_job() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC), None).await;
        let b = post_root(&h, creator, game_id, datetime!(2024-01-02 09:00 UTC), None).await;

        // Crash with the record intact.
        h.scheduler.shutdown();
        assert!(h.store.find_promotion_job(game_id).await.unwrap().is_some());

        h.clock.set(datetime!(2024-01-03 00:01 UTC));
        h.scheduler.reconcile().await.unwrap();
        wait_until_idle(&h.scheduler).await;

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.latest_root_tag_id, Some(b));
    }

    #[tokio::test]
    async fn redelivered_job_is_a_no_op_and_scores_once() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let other = Uuid::new_v4();
        h.store.add_user(other);
        let game_id = new_game(&h, creator).await;

        post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC), None).await;
        h.clock.set(datetime!(2024-01-02 09:00 UTC));
        post_root(
            &h,
            other,
            game_id,
            datetime!(2024-01-02 09:00 UTC),
            Some(datetime!(2024-01-02 08:00 UTC)),
        )
        .await;
        wait_until_idle(&h.scheduler).await;

        // Redeliver by hand: the pending slot is empty, so nothing changes.
        h.scheduler
            .arm_timer(game_id, datetime!(2024-01-02 08:00 UTC));
        wait_until_idle(&h.scheduler).await;

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        let card = game.scores.get(&other).unwrap();
        assert_eq!(card.points, h.state.config().score.new_chain_points);
        assert_eq!(card.tags_posted, 1);
    }

    #[tokio::test]
    async fn job_for_a_vanished_game_stays_recorded() {
        let h = harness().await;
        let ghost_game = Uuid::new_v4();

        h.scheduler
            .schedule(
                ghost_game,
                datetime!(2024-01-01 10:00 UTC),
                Some(datetime!(2024-01-01 07:00 UTC)),
            )
            .await
            .unwrap();
        wait_until_idle(&h.scheduler).await;

        // NotFound is fatal, never retried, and the record is kept so the
        // failure stays observable.
        let job = h
            .store
            .find_promotion_job(ghost_game)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(job.status, PromotionJobStatus::Fired);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn degraded_storage_exhausts_the_retry_budget_without_dropping_the_job() {
        let mut config = AppConfig::default();
        config.scheduler = SchedulerConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(2),
            max_backoff: Duration::from_millis(4),
        };
        let h = harness_with_config(config).await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC), None).await;
        post_root(&h, creator, game_id, datetime!(2024-01-02 09:00 UTC), None).await;
        h.scheduler.shutdown();

        // Storage drops before the job fires; every attempt hits degraded
        // mode until the budget runs out, and the record survives.
        h.state.clear_tag_store().await;
        h.clock.set(datetime!(2024-01-02 08:30 UTC));
        h.scheduler
            .arm_timer(game_id, datetime!(2024-01-02 08:00 UTC));
        wait_until_idle(&h.scheduler).await;

        h.state.install_tag_store(Arc::new(h.store.clone())).await;
        assert!(h.store.find_promotion_job(game_id).await.unwrap().is_some());

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert!(game.pending_root_tag_id.is_some());

        // The next reconcile pass picks the stuck game back up.
        h.clock.set(datetime!(2024-01-03 00:05 UTC));
        h.scheduler.reconcile().await.unwrap();
        wait_until_idle(&h.scheduler).await;
        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert!(game.pending_root_tag_id.is_none());
    }
}
