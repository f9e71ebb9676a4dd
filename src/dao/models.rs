use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// The atomic posted unit: a root tag opening a daily chain, or a subtag
/// replying inside one.
///
/// Chain membership is expressed through ID pointers only; neighbouring tags
/// are never held as live references so concurrent writers can re-validate
/// pointers against storage before patching them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagEntity {
    /// Primary key of the tag.
    pub id: Uuid,
    /// Player that posted the tag.
    pub creator_id: Uuid,
    /// Game the tag belongs to.
    pub game_id: Uuid,
    /// Whether this tag opens a daily chain (root) or replies to one (subtag).
    pub is_root: bool,
    /// Instant the tag was posted.
    #[serde(with = "time::serde::rfc3339")]
    pub posted_at: OffsetDateTime,
    /// Free-form content payload (location hint, caption, media reference).
    pub content: String,
    /// Subtag this tag follows within its subchain. Unset for root tags and
    /// for the first subtag of a root.
    pub parent_tag_id: Option<Uuid>,
    /// Next link of the subchain. Unset while this tag is the chain tail.
    pub next_tag_id: Option<Uuid>,
    /// Root tag owning this subtag's chain. Unset for root tags.
    pub root_tag_id: Option<Uuid>,
    /// Predecessor in the root chain. Only meaningful for root tags, copied
    /// onto subtags so any link can navigate to the neighbouring round.
    pub previous_root_tag_id: Option<Uuid>,
    /// Successor in the root chain, populated when the chain closes.
    pub next_root_tag_id: Option<Uuid>,
    /// Point value and flags computed at creation time.
    pub stats: TagStats,
}

/// Derived point value and flags assigned to a tag when it is scored.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagStats {
    /// Points this tag is worth.
    pub points: i32,
    /// Whether the tag opened a new chain.
    pub new_tag: bool,
    /// Whether the tag was posted within its root's posting day.
    pub posted_on_time: bool,
    /// Whether the tag took the chain lead at the moment it was scored.
    pub won_tag: bool,
}

impl TagEntity {
    /// Build an unscored root tag with no chain neighbours.
    pub fn new_root(
        id: Uuid,
        creator_id: Uuid,
        game_id: Uuid,
        content: String,
        posted_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            creator_id,
            game_id,
            is_root: true,
            posted_at,
            content,
            parent_tag_id: None,
            next_tag_id: None,
            root_tag_id: None,
            previous_root_tag_id: None,
            next_root_tag_id: None,
            stats: TagStats::default(),
        }
    }

    /// Build an unscored subtag owned by the given root chain.
    pub fn new_subtag(
        id: Uuid,
        creator_id: Uuid,
        game_id: Uuid,
        root_tag_id: Uuid,
        content: String,
        posted_at: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            creator_id,
            game_id,
            is_root: false,
            posted_at,
            content,
            parent_tag_id: None,
            next_tag_id: None,
            root_tag_id: Some(root_tag_id),
            previous_root_tag_id: None,
            next_root_tag_id: None,
            stats: TagStats::default(),
        }
    }
}

/// Partial update applied to an already persisted tag.
///
/// Outer `None` leaves the field untouched; `Some(None)` clears it and
/// `Some(Some(id))` overwrites it.
#[derive(Debug, Clone, Default)]
pub struct TagPatch {
    /// New parent link for the tag.
    pub parent_tag_id: Option<Option<Uuid>>,
    /// New root-chain successor.
    pub next_root_tag_id: Option<Option<Uuid>>,
    /// New root-chain predecessor.
    pub previous_root_tag_id: Option<Option<Uuid>>,
    /// Replacement stats, written whole.
    pub stats: Option<TagStats>,
}

/// Role a player holds in a game roster.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlayerRole {
    /// Game creator with administrative rights.
    Owner,
    /// Regular participant.
    Member,
}

/// Roster slot for a participating player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    /// Display name chosen by the player.
    pub name: String,
    /// Role held within this game.
    pub role: PlayerRole,
}

/// Per-player aggregate counters maintained by atomic increments.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScoreCard {
    /// Accumulated point total.
    pub points: i32,
    /// Number of tags posted.
    pub tags_posted: u32,
    /// Number of tags that took the chain lead when scored.
    pub tags_won: u32,
    /// Number of tags posted within their root's posting day.
    pub on_time: u32,
}

/// Increment applied to a [`ScoreCard`] when a tag's score lands.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoreDelta {
    /// Points to add.
    pub points: i32,
    /// Posted-counter increment.
    pub tags_posted: u32,
    /// Won-counter increment.
    pub tags_won: u32,
    /// On-time-counter increment.
    pub on_time: u32,
}

impl ScoreDelta {
    /// Derive the aggregate increment produced by a scored tag.
    pub fn from_stats(stats: &TagStats) -> Self {
        Self {
            points: stats.points,
            tags_posted: 1,
            tags_won: stats.won_tag as u32,
            on_time: stats.posted_on_time as u32,
        }
    }
}

impl ScoreCard {
    /// Fold an increment into the card.
    pub fn apply(&mut self, delta: ScoreDelta) {
        self.points += delta.points;
        self.tags_posted += delta.tags_posted;
        self.tags_won += delta.tags_won;
        self.on_time += delta.on_time;
    }
}

/// A named competition with a roster and the three root-chain pointers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameEntity {
    /// Primary key of the game.
    pub id: Uuid,
    /// Display name of the competition.
    pub name: String,
    /// Player that created the game.
    pub creator_id: Uuid,
    /// Creation timestamp for auditing/debugging.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last time the game entity was updated.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Participating players, keyed by player ID, in join order.
    pub roster: IndexMap<Uuid, RosterEntry>,
    /// Per-player aggregate score table.
    pub scores: IndexMap<Uuid, ScoreCard>,
    /// First root tag ever attached. Set once, immutable thereafter.
    pub first_root_tag_id: Option<Uuid>,
    /// Currently visible head of the root chain.
    pub latest_root_tag_id: Option<Uuid>,
    /// Most recently posted root tag, not yet visible as latest.
    pub pending_root_tag_id: Option<Uuid>,
}

/// Partial pointer update applied to a persisted game.
///
/// `pending_root_tag_id` uses the double-option convention of [`TagPatch`];
/// the other pointers are only ever set, never cleared.
#[derive(Debug, Clone, Default)]
pub struct GamePatch {
    /// First root-chain link, set exactly once.
    pub first_root_tag_id: Option<Uuid>,
    /// New visible head of the root chain.
    pub latest_root_tag_id: Option<Uuid>,
    /// Pending slot update; `Some(None)` clears it.
    pub pending_root_tag_id: Option<Option<Uuid>>,
}

/// Lifecycle state of a durable promotion job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PromotionJobStatus {
    /// Recorded and waiting for its trigger time.
    Scheduled,
    /// Handed to the promotion handler at least once. A job that stays in
    /// this state with exhausted attempts is stuck and needs an operator.
    Fired,
}

/// Durable instruction to promote a game's pending root tag at a trigger
/// time. Completed jobs are deleted rather than kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromotionJobEntity {
    /// Target game; also the job key, valid because at most one root tag may
    /// be pending per game.
    pub game_id: Uuid,
    /// Earliest instant the job may fire.
    #[serde(with = "time::serde::rfc3339")]
    pub trigger_at: OffsetDateTime,
    /// Current lifecycle state.
    pub status: PromotionJobStatus,
    /// Delivery attempts performed so far.
    pub attempts: u32,
}
