use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    dao::models::{GameEntity, PlayerRole, PromotionJobEntity, ScoreCard, TagEntity},
    dto::{format_datetime, tag::TagSummary},
};

/// Parameters accepted when bootstrapping a game.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateGameParams {
    /// Display name of the competition.
    pub name: String,
    /// Player creating the game; becomes the roster owner.
    pub creator_id: Uuid,
    /// Display name the creator joins the roster under.
    pub creator_name: String,
    /// Additional roster members.
    #[serde(default)]
    pub members: Vec<RosterMemberInput>,
}

/// Incoming roster member definition.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterMemberInput {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name chosen by the player.
    pub name: String,
}

/// Roster slot projection.
#[derive(Debug, Clone, Serialize)]
pub struct RosterMemberView {
    /// Player identifier.
    pub player_id: Uuid,
    /// Display name.
    pub name: String,
    /// Role held within the game.
    pub role: PlayerRole,
}

/// Per-player aggregate counters projection.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreCardView {
    /// Player identifier.
    pub player_id: Uuid,
    /// Accumulated point total.
    pub points: i32,
    /// Number of tags posted.
    pub tags_posted: u32,
    /// Number of tags that took the chain lead when scored.
    pub tags_won: u32,
    /// Number of tags posted within their root's posting day.
    pub on_time: u32,
}

impl From<(Uuid, ScoreCard)> for ScoreCardView {
    fn from((player_id, card): (Uuid, ScoreCard)) -> Self {
        Self {
            player_id,
            points: card.points,
            tags_posted: card.tags_posted,
            tags_won: card.tags_won,
            on_time: card.on_time,
        }
    }
}

/// Placeholder for a root tag that exists but is not yet visible as the
/// game's latest round. Callers only learn that something is pending and
/// when it will surface; the full tag stays hidden until promotion.
#[derive(Debug, Clone, Serialize)]
pub struct PendingTagMarker {
    /// Identifier of the pending root tag.
    pub id: Uuid,
    /// RFC 3339 posting timestamp.
    pub posted_at: String,
    /// RFC 3339 promotion trigger, when a job is recorded.
    pub promotes_at: Option<String>,
}

impl PendingTagMarker {
    /// Build the marker from the pending tag and its recorded job.
    pub fn new(tag: &TagEntity, job: Option<&PromotionJobEntity>) -> Self {
        Self {
            id: tag.id,
            posted_at: format_datetime(tag.posted_at),
            promotes_at: job.map(|job| format_datetime(job.trigger_at)),
        }
    }
}

/// Game projection returned to callers, with the root-chain endpoints
/// resolved. The pending slot is deliberately a [`PendingTagMarker`] rather
/// than a full tag: pending-versus-visible is discriminated once here, not
/// re-checked throughout the codebase.
#[derive(Debug, Clone, Serialize)]
pub struct GameSummary {
    /// Game identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Creating player.
    pub creator_id: Uuid,
    /// RFC 3339 creation timestamp.
    pub created_at: String,
    /// RFC 3339 last-update timestamp.
    pub updated_at: String,
    /// Roster in join order.
    pub roster: Vec<RosterMemberView>,
    /// Aggregate score table.
    pub scores: Vec<ScoreCardView>,
    /// First root tag ever attached.
    pub first_root_tag: Option<TagSummary>,
    /// Currently visible head of the root chain.
    pub latest_root_tag: Option<TagSummary>,
    /// Marker for a posted-but-not-yet-visible root tag.
    pub pending_root_tag: Option<PendingTagMarker>,
}

impl GameSummary {
    /// Assemble the projection from the game entity and its resolved
    /// root-chain endpoints.
    pub fn from_parts(
        game: GameEntity,
        first_root_tag: Option<TagEntity>,
        latest_root_tag: Option<TagEntity>,
        pending_root_tag: Option<PendingTagMarker>,
    ) -> Self {
        Self {
            id: game.id,
            name: game.name,
            creator_id: game.creator_id,
            created_at: format_datetime(game.created_at),
            updated_at: format_datetime(game.updated_at),
            roster: game
                .roster
                .into_iter()
                .map(|(player_id, entry)| RosterMemberView {
                    player_id,
                    name: entry.name,
                    role: entry.role,
                })
                .collect(),
            scores: game.scores.into_iter().map(Into::into).collect(),
            first_root_tag: first_root_tag.map(Into::into),
            latest_root_tag: latest_root_tag.map(Into::into),
            pending_root_tag,
        }
    }
}
