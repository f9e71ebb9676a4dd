use std::{collections::HashSet, sync::Arc};

use indexmap::IndexMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    dao::{
        models::{
            GameEntity, GamePatch, PlayerRole, RosterEntry, ScoreCard, ScoreDelta, TagEntity,
            TagPatch,
        },
        tag_store::TagStore,
    },
    dto::game::{CreateGameParams, GameSummary, PendingTagMarker},
    error::ServiceError,
    services,
    state::SharedState,
};

/// Bootstrap a fresh game with its roster and zeroed score table.
pub async fn create_game(
    state: &SharedState,
    params: CreateGameParams,
) -> Result<GameSummary, ServiceError> {
    let store = services::require_store(state).await?;

    if params.name.trim().is_empty() {
        return Err(ServiceError::InvalidInput(
            "game name must not be empty".into(),
        ));
    }
    if !store.user_exists(params.creator_id).await? {
        return Err(ServiceError::NotFound(format!(
            "player `{}` not found",
            params.creator_id
        )));
    }

    let mut roster: IndexMap<Uuid, RosterEntry> = IndexMap::new();
    roster.insert(
        params.creator_id,
        RosterEntry {
            name: params.creator_name,
            role: PlayerRole::Owner,
        },
    );

    let mut seen = HashSet::from([params.creator_id]);
    for member in params.members {
        if member.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput(
                "player name must not be empty".into(),
            ));
        }
        if !seen.insert(member.player_id) {
            return Err(ServiceError::InvalidInput(format!(
                "duplicate roster member `{}`",
                member.player_id
            )));
        }
        roster.insert(
            member.player_id,
            RosterEntry {
                name: member.name,
                role: PlayerRole::Member,
            },
        );
    }

    let scores = roster
        .keys()
        .map(|player_id| (*player_id, ScoreCard::default()))
        .collect::<IndexMap<_, _>>();

    let now = state.clock().now();
    let game = GameEntity {
        id: Uuid::new_v4(),
        name: params.name,
        creator_id: params.creator_id,
        created_at: now,
        updated_at: now,
        roster,
        scores,
        first_root_tag_id: None,
        latest_root_tag_id: None,
        pending_root_tag_id: None,
    };

    let created = store.create_game(game).await?;
    info!(game_id = %created.id, "game created");
    Ok(GameSummary::from_parts(created, None, None, None))
}

/// Fetch a game with its root-chain endpoints resolved. The pending slot is
/// reduced to a marker so callers never see a not-yet-promoted tag in full.
pub async fn get_game(state: &SharedState, game_id: Uuid) -> Result<GameSummary, ServiceError> {
    let store = services::require_store(state).await?;

    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "game `{game_id}` not found"
        )));
    };

    let first = resolve_endpoint(&store, game_id, game.first_root_tag_id).await?;
    let latest = resolve_endpoint(&store, game_id, game.latest_root_tag_id).await?;

    let pending = match game.pending_root_tag_id {
        Some(pending_id) => {
            let tag = store.find_tag(pending_id).await?.ok_or_else(|| {
                ServiceError::InvalidChainState(format!(
                    "game `{game_id}` points at missing pending tag `{pending_id}`"
                ))
            })?;
            let job = store.find_promotion_job(game_id).await?;
            Some(PendingTagMarker::new(&tag, job.as_ref()))
        }
        None => None,
    };

    Ok(GameSummary::from_parts(game, first, latest, pending))
}

async fn resolve_endpoint(
    store: &Arc<dyn TagStore>,
    game_id: Uuid,
    pointer: Option<Uuid>,
) -> Result<Option<TagEntity>, ServiceError> {
    let Some(tag_id) = pointer else {
        return Ok(None);
    };
    let tag = store.find_tag(tag_id).await?.ok_or_else(|| {
        ServiceError::InvalidChainState(format!(
            "game `{game_id}` points at missing root tag `{tag_id}`"
        ))
    })?;
    Ok(Some(tag))
}

/// Attach a root tag to the game's chain pointers.
///
/// The first root tag ever attached becomes both first and latest at once;
/// asking to park it as pending is rejected because there is nothing for it
/// to wait behind. Later root tags either occupy the pending slot or, at
/// promotion time, the latest slot.
pub async fn set_tag_in_game(
    state: &SharedState,
    game_id: Uuid,
    tag_id: Uuid,
    is_root: bool,
    is_pending: bool,
) -> Result<GameEntity, ServiceError> {
    if !is_root {
        return Err(ServiceError::InvalidInput(
            "only root tags can occupy game chain pointers".into(),
        ));
    }

    let store = services::require_store(state).await?;
    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "game `{game_id}` not found"
        )));
    };

    let patch = if game.first_root_tag_id.is_none() {
        if is_pending {
            return Err(ServiceError::InvalidPromotion(format!(
                "the first root tag of game `{game_id}` must become latest immediately"
            )));
        }
        GamePatch {
            first_root_tag_id: Some(tag_id),
            latest_root_tag_id: Some(tag_id),
            pending_root_tag_id: None,
        }
    } else if is_pending {
        GamePatch {
            first_root_tag_id: None,
            latest_root_tag_id: None,
            pending_root_tag_id: Some(Some(tag_id)),
        }
    } else {
        GamePatch {
            first_root_tag_id: None,
            latest_root_tag_id: Some(tag_id),
            pending_root_tag_id: None,
        }
    };

    store.update_game(game_id, patch).await?.ok_or_else(|| {
        ServiceError::NotFound(format!("game `{game_id}` vanished while updating"))
    })
}

/// Promote a game's pending root tag to latest.
///
/// Idempotent by construction: a game without a pending tag is returned
/// unchanged, which is how duplicate job deliveries and already-promoted
/// races resolve. The pending tag's precomputed score is applied here, not
/// at creation time, so points only count once the round is visible.
pub async fn update_pending_tag(
    state: &SharedState,
    game_id: Uuid,
) -> Result<GameEntity, ServiceError> {
    let store = services::require_store(state).await?;

    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "game `{game_id}` not found"
        )));
    };
    let Some(pending_id) = game.pending_root_tag_id else {
        debug!(%game_id, "no pending root tag; promotion is a no-op");
        return Ok(game);
    };

    let Some(pending) = store.find_tag(pending_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "pending root tag `{pending_id}` of game `{game_id}` not found"
        )));
    };

    if let Some(latest_id) = game.latest_root_tag_id {
        // Completes the forward link recorded at creation time; harmless to
        // re-assert on redelivery.
        let patched = store
            .update_tag(
                latest_id,
                TagPatch {
                    next_root_tag_id: Some(Some(pending_id)),
                    ..TagPatch::default()
                },
            )
            .await?;
        if patched.is_none() {
            return Err(ServiceError::NotFound(format!(
                "latest root tag `{latest_id}` of game `{game_id}` not found"
            )));
        }
    }

    store
        .apply_score(
            game_id,
            pending.creator_id,
            ScoreDelta::from_stats(&pending.stats),
        )
        .await?;

    match store.promote_pending_tag(game_id, pending_id).await? {
        Some(updated) => {
            info!(%game_id, tag_id = %pending_id, "pending root tag promoted to latest");
            Ok(updated)
        }
        None => {
            // A concurrent promotion won the pointer swap; report the state
            // it left behind.
            store.find_game(game_id).await?.ok_or_else(|| {
                ServiceError::NotFound(format!("game `{game_id}` vanished during promotion"))
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use time::macros::datetime;

    use super::*;
    use crate::{
        clock::ManualClock,
        config::AppConfig,
        dao::tag_store::memory::MemoryTagStore,
        dto::{game::RosterMemberInput, tag::CreateTagParams},
        services::{promotion_scheduler::PromotionScheduler, tag_service},
    };

    struct Harness {
        state: SharedState,
        scheduler: PromotionScheduler,
        store: MemoryTagStore,
    }

    async fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(datetime!(2024-01-01 08:00 UTC)));
        let state = crate::state::AppState::with_clock(AppConfig::default(), clock);
        let store = MemoryTagStore::new();
        state.install_tag_store(Arc::new(store.clone())).await;
        let scheduler = PromotionScheduler::new(state.clone());
        Harness {
            state,
            scheduler,
            store,
        }
    }

    async fn new_game(h: &Harness, creator: Uuid) -> Uuid {
        h.store.add_user(creator);
        create_game(
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
        posted_at: time::OffsetDateTime,
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
                promote_at: None,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn create_game_rejects_duplicate_members() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        h.store.add_user(creator);

        let err = create_game(
            &h.state,
            CreateGameParams {
                name: "rally".into(),
                creator_id: creator,
                creator_name: "creator".into(),
                members: vec![RosterMemberInput {
                    player_id: creator,
                    name: "also creator".into(),
                }],
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn first_root_tag_cannot_be_parked_as_pending() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let err = set_tag_in_game(&h.state, game_id, Uuid::new_v4(), true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidPromotion(_)));
    }

    #[tokio::test]
    async fn subtags_cannot_occupy_game_pointers() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let err = set_tag_in_game(&h.state, game_id, Uuid::new_v4(), false, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn promotion_links_the_chain_and_applies_the_score() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let other = Uuid::new_v4();
        h.store.add_user(other);
        let game_id = new_game(&h, creator).await;

        let a = post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC)).await;
        let b = post_root(&h, other, game_id, datetime!(2024-01-02 09:00 UTC)).await;

        let updated = update_pending_tag(&h.state, game_id).await.unwrap();
        assert_eq!(updated.latest_root_tag_id, Some(b));
        assert_eq!(updated.pending_root_tag_id, None);

        let stored_a = h.store.find_tag(a).await.unwrap().unwrap();
        assert_eq!(stored_a.next_root_tag_id, Some(b));

        let card = updated.scores.get(&other).unwrap();
        assert_eq!(card.points, h.state.config().score.new_chain_points);
        assert_eq!(card.tags_posted, 1);
    }

    #[tokio::test]
    async fn promotion_is_idempotent() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC)).await;
        let b = post_root(&h, creator, game_id, datetime!(2024-01-02 09:00 UTC)).await;

        let once = update_pending_tag(&h.state, game_id).await.unwrap();
        let twice = update_pending_tag(&h.state, game_id).await.unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.latest_root_tag_id, Some(b));

        // The deferred score landed exactly once despite the redelivery.
        let card = twice.scores.get(&creator).unwrap();
        assert_eq!(
            card.points,
            2 * h.state.config().score.new_chain_points
        );
        assert_eq!(card.tags_posted, 2);
    }

    #[tokio::test]
    async fn promotion_of_empty_game_is_a_no_op() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let game = update_pending_tag(&h.state, game_id).await.unwrap();
        assert_eq!(game.latest_root_tag_id, None);
        assert_eq!(game.pending_root_tag_id, None);
    }

    #[tokio::test]
    async fn root_chain_stays_walkable_across_promotions() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let mut expected = Vec::new();
        for day in [
            datetime!(2024-01-01 10:00 UTC),
            datetime!(2024-01-02 10:00 UTC),
            datetime!(2024-01-03 10:00 UTC),
            datetime!(2024-01-04 10:00 UTC),
        ] {
            expected.push(post_root(&h, creator, game_id, day).await);
            update_pending_tag(&h.state, game_id).await.unwrap();
        }

        let game = h.store.find_game(game_id).await.unwrap().unwrap();
        assert_eq!(game.first_root_tag_id, Some(expected[0]));
        assert_eq!(game.latest_root_tag_id, Some(*expected.last().unwrap()));

        // Walking forward from the first root reaches latest in exactly
        // (promoted roots - 1) hops, with consistent back pointers.
        let mut walked = vec![expected[0]];
        let mut cursor = expected[0];
        while let Some(next) = h
            .store
            .find_tag(cursor)
            .await
            .unwrap()
            .unwrap()
            .next_root_tag_id
        {
            let tag = h.store.find_tag(next).await.unwrap().unwrap();
            assert_eq!(tag.previous_root_tag_id, Some(cursor));
            walked.push(next);
            cursor = next;
            assert!(walked.len() <= expected.len(), "root chain has a cycle");
        }
        assert_eq!(walked, expected);
    }

    #[tokio::test]
    async fn get_game_reduces_the_pending_tag_to_a_marker() {
        let h = harness().await;
        let creator = Uuid::new_v4();
        let game_id = new_game(&h, creator).await;

        let a = post_root(&h, creator, game_id, datetime!(2024-01-01 10:00 UTC)).await;
        let b = post_root(&h, creator, game_id, datetime!(2024-01-02 09:00 UTC)).await;

        let summary = get_game(&h.state, game_id).await.unwrap();
        assert_eq!(summary.latest_root_tag.as_ref().unwrap().id, a);
        assert_eq!(summary.first_root_tag.as_ref().unwrap().id, a);

        let marker = summary.pending_root_tag.unwrap();
        assert_eq!(marker.id, b);
        assert_eq!(marker.promotes_at.as_deref(), Some("2024-01-03T00:00:00Z"));

        update_pending_tag(&h.state, game_id).await.unwrap();
        let summary = get_game(&h.state, game_id).await.unwrap();
        assert!(summary.pending_root_tag.is_none());
        assert_eq!(summary.latest_root_tag.unwrap().id, b);
    }
}
