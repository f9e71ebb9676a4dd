use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    dao::models::TagEntity,
    dto::format_datetime,
};

/// Parameters accepted when posting a tag.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTagParams {
    /// Player posting the tag.
    pub creator_id: Uuid,
    /// Game the tag is posted into.
    pub game_id: Uuid,
    /// Whether the tag opens a new daily chain.
    pub is_root: bool,
    /// Free-form content payload.
    pub content: String,
    /// Root chain replied to; required when `is_root` is false.
    #[serde(default)]
    pub root_tag_id: Option<Uuid>,
    /// Posting instant override; defaults to the current clock reading.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub posted_at: Option<OffsetDateTime>,
    /// Promotion trigger override used for accelerated testing; defaults to
    /// the end of the posting day.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub promote_at: Option<OffsetDateTime>,
}

/// Full projection of a persisted tag returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct TagSummary {
    /// Tag identifier.
    pub id: Uuid,
    /// Player that posted the tag.
    pub creator_id: Uuid,
    /// Owning game.
    pub game_id: Uuid,
    /// Whether this is a root tag.
    pub is_root: bool,
    /// RFC 3339 posting timestamp.
    pub posted_at: String,
    /// Content payload.
    pub content: String,
    /// Preceding subtag in the subchain, if any.
    pub parent_tag_id: Option<Uuid>,
    /// Following subtag in the subchain, if any.
    pub next_tag_id: Option<Uuid>,
    /// Root tag owning the subchain, unset for root tags.
    pub root_tag_id: Option<Uuid>,
    /// Root-chain predecessor.
    pub previous_root_tag_id: Option<Uuid>,
    /// Root-chain successor.
    pub next_root_tag_id: Option<Uuid>,
    /// Points this tag is worth.
    pub points: i32,
    /// Whether the tag opened a new chain.
    pub new_tag: bool,
    /// Whether the tag was posted within its root's posting day.
    pub posted_on_time: bool,
    /// Whether the tag took the chain lead when scored.
    pub won_tag: bool,
}

impl From<TagEntity> for TagSummary {
    fn from(tag: TagEntity) -> Self {
        Self {
            id: tag.id,
            creator_id: tag.creator_id,
            game_id: tag.game_id,
            is_root: tag.is_root,
            posted_at: format_datetime(tag.posted_at),
            content: tag.content,
            parent_tag_id: tag.parent_tag_id,
            next_tag_id: tag.next_tag_id,
            root_tag_id: tag.root_tag_id,
            previous_root_tag_id: tag.previous_root_tag_id,
            next_root_tag_id: tag.next_root_tag_id,
            points: tag.stats.points,
            new_tag: tag.stats.new_tag,
            posted_on_time: tag.stats.posted_on_time,
            won_tag: tag.stats.won_tag,
        }
    }
}
