use std::sync::Arc;

use time::OffsetDateTime;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameEntity, ScoreDelta, TagEntity, TagPatch},
        tag_store::TagStore,
    },
    dto::tag::{CreateTagParams, TagSummary},
    error::ServiceError,
    services::{
        self, game_service,
        promotion_scheduler::PromotionScheduler,
        score::{self, SubtagContext},
    },
    state::SharedState,
};

/// Post a tag into a game, linking it into the root chain or the addressed
/// subchain and scoring it.
///
/// Root tags park in the game's pending slot and stay invisible until the
/// scheduler promotes them at the end of their posting day; the very first
/// root tag of a game becomes latest immediately. Subtags are appended to
/// the current chain tail with compare-and-swap semantics and retried once
/// when a concurrent reply moves the tail.
pub async fn create_tag(
    state: &SharedState,
    scheduler: &PromotionScheduler,
    params: CreateTagParams,
) -> Result<TagSummary, ServiceError> {
    let store = services::require_store(state).await?;

    if !store.user_exists(params.creator_id).await? {
        return Err(ServiceError::NotFound(format!(
            "player `{}` not found",
            params.creator_id
        )));
    }
    let Some(game) = store.find_game(params.game_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "game `{}` not found",
            params.game_id
        )));
    };

    let posted_at = params.posted_at.unwrap_or_else(|| state.clock().now());

    if params.is_root {
        create_root_tag(state, scheduler, &store, game, params, posted_at).await
    } else {
        create_subtag(state, &store, game, params, posted_at).await
    }
}

async fn create_root_tag(
    state: &SharedState,
    scheduler: &PromotionScheduler,
    store: &Arc<dyn TagStore>,
    game: GameEntity,
    params: CreateTagParams,
    posted_at: OffsetDateTime,
) -> Result<TagSummary, ServiceError> {
    if game.pending_root_tag_id.is_some() {
        return Err(ServiceError::PendingTagConflict { game_id: game.id });
    }

    // The ID is minted before any write so the closing chain can point
    // forward to a tag that does not exist yet.
    let tag_id = Uuid::new_v4();
    let mut tag = TagEntity::new_root(
        tag_id,
        params.creator_id,
        game.id,
        params.content,
        posted_at,
    );
    tag.stats = score::score_root_tag(&state.config().score);

    if let Some(latest_id) = game.latest_root_tag_id {
        tag.previous_root_tag_id = Some(latest_id);

        let patched = store
            .update_tag(
                latest_id,
                TagPatch {
                    next_root_tag_id: Some(Some(tag_id)),
                    ..TagPatch::default()
                },
            )
            .await?;
        if patched.is_none() {
            return Err(ServiceError::InvalidChainState(format!(
                "game `{}` points at missing latest root tag `{latest_id}`",
                game.id
            )));
        }
        // Every subtag of the closing chain learns its forward neighbour so
        // read-side navigation works from any link. Not transactional with
        // the patch above; promotion only relies on the game pointers.
        store
            .propagate_next_root(game.id, latest_id, tag_id)
            .await?;
    }

    let created = store.create_tag(tag).await?;

    let is_pending = game.latest_root_tag_id.is_some();
    game_service::set_tag_in_game(state, game.id, tag_id, true, is_pending).await?;

    if is_pending {
        scheduler
            .schedule(game.id, posted_at, params.promote_at)
            .await?;
    } else {
        // No predecessor to wait behind: the tag is visible already, so its
        // score lands now instead of at promotion time.
        store
            .apply_score(
                game.id,
                created.creator_id,
                ScoreDelta::from_stats(&created.stats),
            )
            .await?;
    }

    Ok(created.into())
}

async fn create_subtag(
    state: &SharedState,
    store: &Arc<dyn TagStore>,
    game: GameEntity,
    params: CreateTagParams,
    posted_at: OffsetDateTime,
) -> Result<TagSummary, ServiceError> {
    let Some(root_id) = params.root_tag_id else {
        return Err(ServiceError::InvalidInput(
            "a subtag requires root_tag_id".into(),
        ));
    };
    let Some(root) = store.find_tag(root_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "root tag `{root_id}` not found"
        )));
    };
    if !root.is_root || root.game_id != game.id {
        return Err(ServiceError::NotFound(format!(
            "root tag `{root_id}` not found in game `{}`",
            game.id
        )));
    }

    let config = state.config();
    let tag_id = Uuid::new_v4();
    let mut persisted: Option<TagEntity> = None;
    let mut moved_tail = root_id;

    // One automatic retry: a concurrent reply may take the tail between
    // resolution and the link write.
    for attempt in 0..2 {
        let tail = resolve_chain_tail(store, game.id, root_id).await?;

        let parent_tag_id = (!tail.is_root).then_some(tail.id);
        let stats = score::score_subtag(
            &config.score,
            SubtagContext {
                posted_at,
                root_posted_at: root.posted_at,
                chain_had_replies: !tail.is_root,
            },
            config.chain_offset,
        );

        let tag = match persisted.take() {
            None => {
                let mut tag = TagEntity::new_subtag(
                    tag_id,
                    params.creator_id,
                    game.id,
                    root_id,
                    params.content.clone(),
                    posted_at,
                );
                tag.parent_tag_id = parent_tag_id;
                // Subtags carry their root's chain neighbours so any link of
                // an open chain can navigate to the adjacent rounds.
                tag.previous_root_tag_id = tail.previous_root_tag_id;
                tag.next_root_tag_id = tail.next_root_tag_id;
                tag.stats = stats;
                store.create_tag(tag).await?
            }
            Some(_) => {
                let repointed = store
                    .update_tag(
                        tag_id,
                        TagPatch {
                            parent_tag_id: Some(parent_tag_id),
                            previous_root_tag_id: Some(tail.previous_root_tag_id),
                            next_root_tag_id: Some(tail.next_root_tag_id),
                            stats: Some(stats),
                        },
                    )
                    .await?;
                repointed.ok_or_else(|| {
                    ServiceError::InvalidChainState(format!(
                        "subtag `{tag_id}` vanished while retrying its link"
                    ))
                })?
            }
        };

        if store.link_chain_tail(tail.id, tag_id).await? {
            store
                .apply_score(
                    game.id,
                    tag.creator_id,
                    ScoreDelta::from_stats(&tag.stats),
                )
                .await?;
            return Ok(tag.into());
        }

        warn!(
            game_id = %game.id,
            root_tag_id = %root_id,
            tail_id = %tail.id,
            attempt,
            "chain tail moved before linking; re-resolving"
        );
        moved_tail = tail.id;
        persisted = Some(tag);
    }

    Err(ServiceError::ChainTailMoved {
        tail_id: moved_tail,
    })
}

/// Resolve the single open end of a subchain. Zero or several candidates
/// mean the chain is structurally corrupted and no retry can help.
async fn resolve_chain_tail(
    store: &Arc<dyn TagStore>,
    game_id: Uuid,
    root_tag_id: Uuid,
) -> Result<TagEntity, ServiceError> {
    let mut tails = store.find_chain_tails(game_id, root_tag_id).await?;
    match tails.len() {
        1 => Ok(tails.remove(0)),
        0 => Err(ServiceError::InvalidChainState(format!(
            "chain of root tag `{root_tag_id}` has no open tail"
        ))),
        count => Err(ServiceError::InvalidChainState(format!(
            "chain of root tag `{root_tag_id}` has {count} open tails"
        ))),
    }
}

/// Whether `user_id` may open a new daily round: nothing pending, and either
/// no round exists yet or the visible round predates `as_of`.
pub async fn can_user_add_root_tag(
    state: &SharedState,
    user_id: Uuid,
    game_id: Uuid,
    as_of: OffsetDateTime,
) -> Result<bool, ServiceError> {
    let store = services::require_store(state).await?;

    if !store.user_exists(user_id).await? {
        return Err(ServiceError::NotFound(format!(
            "player `{user_id}` not found"
        )));
    }
    let Some(game) = store.find_game(game_id).await? else {
        return Err(ServiceError::NotFound(format!(
            "game `{game_id}` not found"
        )));
    };

    if game.pending_root_tag_id.is_some() {
        return Ok(false);
    }
    let Some(latest_id) = game.latest_root_tag_id else {
        return Ok(true);
    };
    let Some(latest) = store.find_tag(latest_id).await? else {
        return Err(ServiceError::InvalidChainState(format!(
            "game `{game_id}` points at missing latest root tag `{latest_id}`"
        )));
    };

    let offset = state.config().chain_offset;
    Ok(latest.posted_at.to_offset(offset).date() < as_of.to_offset(offset).date())
}

/// Whether `user_id` may reply to the chain `tag_id` belongs to: the chain
/// tail must be open and must not be the user's own tag.
pub async fn can_user_add_subtag(
    state: &SharedState,
    user_id: Uuid,
    tag_id: Uuid,
) -> Result<bool, ServiceError> {
    let store = services::require_store(state).await?;

    let Some(tag) = store.find_tag(tag_id).await? else {
        return Err(ServiceError::NotFound(format!("tag `{tag_id}` not found")));
    };
    let root_id = if tag.is_root {
        tag.id
    } else {
        tag.root_tag_id.ok_or_else(|| {
            ServiceError::InvalidChainState(format!("subtag `{tag_id}` has no root reference"))
        })?
    };

    let tail = resolve_chain_tail(&store, tag.game_id, root_id).await?;
    Ok(tail.creator_id != user_id)
}
