use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{GameEntity, GamePatch, PromotionJobEntity, ScoreDelta, TagEntity, TagPatch},
    storage::StorageResult,
    tag_store::TagStore,
};

/// Volatile [`TagStore`] keeping every collection in process memory.
///
/// Used as the test double for the service layer and as a last-resort
/// fallback when no durable backend is configured. Per-document atomicity
/// comes from the shard locks of the underlying maps.
#[derive(Clone, Default)]
pub struct MemoryTagStore {
    inner: Arc<MemoryCollections>,
}

#[derive(Default)]
struct MemoryCollections {
    tags: DashMap<Uuid, TagEntity>,
    games: DashMap<Uuid, GameEntity>,
    jobs: DashMap<Uuid, PromotionJobEntity>,
    users: DashMap<Uuid, ()>,
}

impl MemoryTagStore {
    /// Fresh store with empty collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a player ID so existence preconditions pass. User management
    /// itself lives outside this crate.
    pub fn add_user(&self, id: Uuid) {
        self.inner.users.insert(id, ());
    }

    fn apply_tag_patch(tag: &mut TagEntity, patch: TagPatch) {
        if let Some(parent) = patch.parent_tag_id {
            tag.parent_tag_id = parent;
        }
        if let Some(next_root) = patch.next_root_tag_id {
            tag.next_root_tag_id = next_root;
        }
        if let Some(previous_root) = patch.previous_root_tag_id {
            tag.previous_root_tag_id = previous_root;
        }
        if let Some(stats) = patch.stats {
            tag.stats = stats;
        }
    }

    fn apply_game_patch(game: &mut GameEntity, patch: GamePatch) {
        if let Some(first) = patch.first_root_tag_id {
            game.first_root_tag_id = Some(first);
        }
        if let Some(latest) = patch.latest_root_tag_id {
            game.latest_root_tag_id = Some(latest);
        }
        if let Some(pending) = patch.pending_root_tag_id {
            game.pending_root_tag_id = pending;
        }
    }
}

impl TagStore for MemoryTagStore {
    fn create_tag(&self, tag: TagEntity) -> BoxFuture<'static, StorageResult<TagEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.tags.insert(tag.id, tag.clone());
            Ok(tag)
        })
    }

    fn find_tag(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.tags.get(&id).map(|entry| entry.clone())) })
    }

    fn update_tag(
        &self,
        id: Uuid,
        patch: TagPatch,
    ) -> BoxFuture<'static, StorageResult<Option<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(mut entry) = store.inner.tags.get_mut(&id) else {
                return Ok(None);
            };
            Self::apply_tag_patch(entry.value_mut(), patch);
            Ok(Some(entry.clone()))
        })
    }

    fn find_chain_tails(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let tails = store
                .inner
                .tags
                .iter()
                .filter(|entry| {
                    let tag = entry.value();
                    tag.game_id == game_id
                        && tag.next_tag_id.is_none()
                        && (tag.root_tag_id == Some(root_tag_id)
                            || (tag.id == root_tag_id && tag.is_root))
                })
                .map(|entry| entry.clone())
                .collect();
            Ok(tails)
        })
    }

    fn link_chain_tail(
        &self,
        tail_id: Uuid,
        next_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            // The shard lock held by get_mut makes the check-then-set atomic.
            let Some(mut entry) = store.inner.tags.get_mut(&tail_id) else {
                return Ok(false);
            };
            if entry.next_tag_id.is_some() {
                return Ok(false);
            }
            entry.next_tag_id = Some(next_tag_id);
            Ok(true)
        })
    }

    fn propagate_next_root(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
        next_root_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let mut patched = 0;
            for mut entry in store.inner.tags.iter_mut() {
                let tag = entry.value_mut();
                if tag.game_id == game_id && tag.root_tag_id == Some(root_tag_id) {
                    tag.next_root_tag_id = Some(next_root_tag_id);
                    patched += 1;
                }
            }
            Ok(patched)
        })
    }

    fn create_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<GameEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.games.insert(game.id, game.clone());
            Ok(game)
        })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.games.get(&id).map(|entry| entry.clone())) })
    }

    fn update_game(
        &self,
        id: Uuid,
        patch: GamePatch,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(mut entry) = store.inner.games.get_mut(&id) else {
                return Ok(None);
            };
            Self::apply_game_patch(entry.value_mut(), patch);
            Ok(Some(entry.clone()))
        })
    }

    fn promote_pending_tag(
        &self,
        game_id: Uuid,
        pending_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let Some(mut entry) = store.inner.games.get_mut(&game_id) else {
                return Ok(None);
            };
            if entry.pending_root_tag_id != Some(pending_id) {
                return Ok(None);
            }
            entry.latest_root_tag_id = Some(pending_id);
            entry.pending_root_tag_id = None;
            Ok(Some(entry.clone()))
        })
    }

    fn apply_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            if let Some(mut entry) = store.inner.games.get_mut(&game_id) {
                entry.scores.entry(player_id).or_default().apply(delta);
            }
            Ok(())
        })
    }

    fn find_games_with_pending(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let games = store
                .inner
                .games
                .iter()
                .filter(|entry| entry.pending_root_tag_id.is_some())
                .map(|entry| entry.clone())
                .collect();
            Ok(games)
        })
    }

    fn user_exists(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.users.contains_key(&id)) })
    }

    fn save_promotion_job(
        &self,
        job: PromotionJobEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.jobs.insert(job.game_id, job);
            Ok(())
        })
    }

    fn find_promotion_job(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PromotionJobEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.inner.jobs.get(&game_id).map(|entry| entry.clone())) })
    }

    fn delete_promotion_job(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.inner.jobs.remove(&game_id);
            Ok(())
        })
    }

    fn list_promotion_jobs(&self) -> BoxFuture<'static, StorageResult<Vec<PromotionJobEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let jobs = store
                .inner
                .jobs
                .iter()
                .map(|entry| entry.clone())
                .collect();
            Ok(jobs)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    fn tag(game_id: Uuid, root: Option<Uuid>) -> TagEntity {
        let id = Uuid::new_v4();
        match root {
            Some(root_id) => TagEntity::new_subtag(
                id,
                Uuid::new_v4(),
                game_id,
                root_id,
                "reply".into(),
                datetime!(2024-01-01 12:00 UTC),
            ),
            None => TagEntity::new_root(
                id,
                Uuid::new_v4(),
                game_id,
                "challenge".into(),
                datetime!(2024-01-01 10:00 UTC),
            ),
        }
    }

    #[tokio::test]
    async fn link_chain_tail_is_compare_and_swap() {
        let store = MemoryTagStore::new();
        let game_id = Uuid::new_v4();
        let root = tag(game_id, None);
        let root_id = root.id;
        store.create_tag(root).await.unwrap();

        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        assert!(store.link_chain_tail(root_id, first).await.unwrap());
        // The tail moved: a second link against the same tail must fail.
        assert!(!store.link_chain_tail(root_id, second).await.unwrap());

        let stored = store.find_tag(root_id).await.unwrap().unwrap();
        assert_eq!(stored.next_tag_id, Some(first));
    }

    #[tokio::test]
    async fn propagate_next_root_patches_whole_subchain() {
        let store = MemoryTagStore::new();
        let game_id = Uuid::new_v4();
        let root = tag(game_id, None);
        let root_id = root.id;
        store.create_tag(root).await.unwrap();
        for _ in 0..3 {
            store.create_tag(tag(game_id, Some(root_id))).await.unwrap();
        }
        // A subtag of a different chain must not be touched.
        let other_root_id = Uuid::new_v4();
        let other = tag(game_id, Some(other_root_id));
        let other_id = other.id;
        store.create_tag(other).await.unwrap();

        let successor = Uuid::new_v4();
        let patched = store
            .propagate_next_root(game_id, root_id, successor)
            .await
            .unwrap();
        assert_eq!(patched, 3);

        let untouched = store.find_tag(other_id).await.unwrap().unwrap();
        assert_eq!(untouched.next_root_tag_id, None);
    }

    #[tokio::test]
    async fn apply_score_accumulates_per_player() {
        let store = MemoryTagStore::new();
        let game_id = Uuid::new_v4();
        let player = Uuid::new_v4();
        let game = GameEntity {
            id: game_id,
            name: "weekend rally".into(),
            creator_id: player,
            created_at: datetime!(2024-01-01 00:00 UTC),
            updated_at: datetime!(2024-01-01 00:00 UTC),
            roster: indexmap::IndexMap::new(),
            scores: indexmap::IndexMap::new(),
            first_root_tag_id: None,
            latest_root_tag_id: None,
            pending_root_tag_id: None,
        };
        store.create_game(game).await.unwrap();

        let delta = ScoreDelta {
            points: 3,
            tags_posted: 1,
            tags_won: 0,
            on_time: 1,
        };
        store.apply_score(game_id, player, delta).await.unwrap();
        store.apply_score(game_id, player, delta).await.unwrap();

        let stored = store.find_game(game_id).await.unwrap().unwrap();
        let card = stored.scores.get(&player).unwrap();
        assert_eq!(card.points, 6);
        assert_eq!(card.tags_posted, 2);
        assert_eq!(card.on_time, 2);
    }

    #[tokio::test]
    async fn promote_pending_tag_requires_matching_guard() {
        let store = MemoryTagStore::new();
        let game_id = Uuid::new_v4();
        let pending = Uuid::new_v4();
        let game = GameEntity {
            id: game_id,
            name: "rally".into(),
            creator_id: Uuid::new_v4(),
            created_at: datetime!(2024-01-01 00:00 UTC),
            updated_at: datetime!(2024-01-01 00:00 UTC),
            roster: indexmap::IndexMap::new(),
            scores: indexmap::IndexMap::new(),
            first_root_tag_id: Some(Uuid::new_v4()),
            latest_root_tag_id: Some(Uuid::new_v4()),
            pending_root_tag_id: Some(pending),
        };
        store.create_game(game).await.unwrap();

        assert!(
            store
                .promote_pending_tag(game_id, Uuid::new_v4())
                .await
                .unwrap()
                .is_none()
        );

        let promoted = store
            .promote_pending_tag(game_id, pending)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(promoted.latest_root_tag_id, Some(pending));
        assert_eq!(promoted.pending_root_tag_id, None);

        // Second promotion of the same tag is a guard mismatch.
        assert!(
            store
                .promote_pending_tag(game_id, pending)
                .await
                .unwrap()
                .is_none()
        );
    }
}
