/// Always-available volatile adapter used by tests and degraded deployments.
pub mod memory;
#[cfg(feature = "mongo-store")]
/// MongoDB-backed adapter.
pub mod mongodb;

use crate::dao::models::{
    GameEntity, GamePatch, PromotionJobEntity, ScoreDelta, TagEntity, TagPatch,
};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

/// Abstraction over the persistence layer for tags, games and promotion jobs.
///
/// Every document is keyed by an opaque ID and assumed strongly consistent on
/// its own; nothing here is transactional across documents. The two
/// race-sensitive operations ([`TagStore::link_chain_tail`] and
/// [`TagStore::promote_pending_tag`]) are compare-and-swap shaped so callers
/// can detect a concurrent writer instead of overwriting it.
pub trait TagStore: Send + Sync {
    /// Persist a freshly created tag.
    fn create_tag(&self, tag: TagEntity) -> BoxFuture<'static, StorageResult<TagEntity>>;
    /// Fetch a tag by ID.
    fn find_tag(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TagEntity>>>;
    /// Apply a partial update to a tag, returning the updated entity.
    fn update_tag(
        &self,
        id: Uuid,
        patch: TagPatch,
    ) -> BoxFuture<'static, StorageResult<Option<TagEntity>>>;
    /// Return every tag of the subchain owned by `root_tag_id` (the root tag
    /// itself included) that has no `next_tag_id`. A healthy chain yields
    /// exactly one element.
    fn find_chain_tails(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TagEntity>>>;
    /// Set `next_tag_id` on the tail if and only if it is still unset.
    /// Returns `false` when the tail already advanced (or vanished).
    fn link_chain_tail(
        &self,
        tail_id: Uuid,
        next_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    /// Bulk-write `next_root_tag_id` onto every subtag of a closing chain.
    /// Returns the number of patched documents.
    fn propagate_next_root(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
        next_root_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>>;

    /// Persist a freshly created game.
    fn create_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<GameEntity>>;
    /// Fetch a game by ID.
    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Apply a pointer update to a game, returning the updated entity.
    fn update_game(
        &self,
        id: Uuid,
        patch: GamePatch,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Atomically flip `latest_root_tag_id` to the pending tag and clear the
    /// pending slot, guarded on the pending slot still holding `pending_id`.
    /// Returns the updated game, or `None` when the guard did not match.
    fn promote_pending_tag(
        &self,
        game_id: Uuid,
        pending_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>>;
    /// Atomically increment a player's aggregate counters for a game.
    fn apply_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Games whose pending slot is occupied, used for startup reconciliation.
    fn find_games_with_pending(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>>;

    /// Whether a player with this ID exists.
    fn user_exists(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Upsert the promotion job for its game.
    fn save_promotion_job(
        &self,
        job: PromotionJobEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Fetch the promotion job recorded for a game.
    fn find_promotion_job(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PromotionJobEntity>>>;
    /// Delete the promotion job recorded for a game once it completed.
    fn delete_promotion_job(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>>;
    /// Every recorded promotion job, used for startup reconciliation.
    fn list_promotion_jobs(&self) -> BoxFuture<'static, StorageResult<Vec<PromotionJobEntity>>>;

    /// Cheap liveness probe against the backend.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Re-establish the backend connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
