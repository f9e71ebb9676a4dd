use std::time::SystemTime;

use indexmap::IndexMap;
use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{
    GameEntity, PlayerRole, PromotionJobEntity, PromotionJobStatus, RosterEntry, ScoreCard,
    TagEntity, TagStats,
};

/// Tag document persisted in the `tags` collection, with stats flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoTagDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    creator_id: Uuid,
    game_id: Uuid,
    is_root: bool,
    posted_at: DateTime,
    content: String,
    parent_tag_id: Option<Uuid>,
    next_tag_id: Option<Uuid>,
    root_tag_id: Option<Uuid>,
    previous_root_tag_id: Option<Uuid>,
    next_root_tag_id: Option<Uuid>,
    points: i32,
    new_tag: bool,
    posted_on_time: bool,
    won_tag: bool,
}

impl From<TagEntity> for MongoTagDocument {
    fn from(value: TagEntity) -> Self {
        Self {
            id: value.id,
            creator_id: value.creator_id,
            game_id: value.game_id,
            is_root: value.is_root,
            posted_at: to_bson_datetime(value.posted_at),
            content: value.content,
            parent_tag_id: value.parent_tag_id,
            next_tag_id: value.next_tag_id,
            root_tag_id: value.root_tag_id,
            previous_root_tag_id: value.previous_root_tag_id,
            next_root_tag_id: value.next_root_tag_id,
            points: value.stats.points,
            new_tag: value.stats.new_tag,
            posted_on_time: value.stats.posted_on_time,
            won_tag: value.stats.won_tag,
        }
    }
}

impl From<MongoTagDocument> for TagEntity {
    fn from(value: MongoTagDocument) -> Self {
        Self {
            id: value.id,
            creator_id: value.creator_id,
            game_id: value.game_id,
            is_root: value.is_root,
            posted_at: from_bson_datetime(value.posted_at),
            content: value.content,
            parent_tag_id: value.parent_tag_id,
            next_tag_id: value.next_tag_id,
            root_tag_id: value.root_tag_id,
            previous_root_tag_id: value.previous_root_tag_id,
            next_root_tag_id: value.next_root_tag_id,
            stats: TagStats {
                points: value.points,
                new_tag: value.new_tag,
                posted_on_time: value.posted_on_time,
                won_tag: value.won_tag,
            },
        }
    }
}

/// Roster slot stored inside the game document. The entity keys its roster
/// by player ID; BSON documents require string keys, so the ID moves into
/// the array element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRosterSlot {
    pub player_id: Uuid,
    pub name: String,
    pub role: PlayerRole,
}

/// Score card element stored inside the game document's `scores` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreCard {
    pub player_id: Uuid,
    pub points: i32,
    pub tags_posted: u32,
    pub tags_won: u32,
    pub on_time: u32,
}

/// Game document persisted in the `games` collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoGameDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    name: String,
    creator_id: Uuid,
    created_at: DateTime,
    updated_at: DateTime,
    roster: Vec<MongoRosterSlot>,
    scores: Vec<MongoScoreCard>,
    first_root_tag_id: Option<Uuid>,
    latest_root_tag_id: Option<Uuid>,
    pending_root_tag_id: Option<Uuid>,
}

impl From<GameEntity> for MongoGameDocument {
    fn from(value: GameEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
            creator_id: value.creator_id,
            created_at: to_bson_datetime(value.created_at),
            updated_at: to_bson_datetime(value.updated_at),
            roster: value
                .roster
                .into_iter()
                .map(|(player_id, entry)| MongoRosterSlot {
                    player_id,
                    name: entry.name,
                    role: entry.role,
                })
                .collect(),
            scores: value
                .scores
                .into_iter()
                .map(|(player_id, card)| MongoScoreCard {
                    player_id,
                    points: card.points,
                    tags_posted: card.tags_posted,
                    tags_won: card.tags_won,
                    on_time: card.on_time,
                })
                .collect(),
            first_root_tag_id: value.first_root_tag_id,
            latest_root_tag_id: value.latest_root_tag_id,
            pending_root_tag_id: value.pending_root_tag_id,
        }
    }
}

impl From<MongoGameDocument> for GameEntity {
    fn from(value: MongoGameDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
            creator_id: value.creator_id,
            created_at: from_bson_datetime(value.created_at),
            updated_at: from_bson_datetime(value.updated_at),
            roster: value
                .roster
                .into_iter()
                .map(|slot| {
                    (
                        slot.player_id,
                        RosterEntry {
                            name: slot.name,
                            role: slot.role,
                        },
                    )
                })
                .collect::<IndexMap<_, _>>(),
            scores: value
                .scores
                .into_iter()
                .map(|card| {
                    (
                        card.player_id,
                        ScoreCard {
                            points: card.points,
                            tags_posted: card.tags_posted,
                            tags_won: card.tags_won,
                            on_time: card.on_time,
                        },
                    )
                })
                .collect::<IndexMap<_, _>>(),
            first_root_tag_id: value.first_root_tag_id,
            latest_root_tag_id: value.latest_root_tag_id,
            pending_root_tag_id: value.pending_root_tag_id,
        }
    }
}

/// Promotion job document keyed by its game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoPromotionJobDocument {
    #[serde(rename = "_id")]
    game_id: Uuid,
    trigger_at: DateTime,
    status: PromotionJobStatus,
    attempts: u32,
}

impl From<PromotionJobEntity> for MongoPromotionJobDocument {
    fn from(value: PromotionJobEntity) -> Self {
        Self {
            game_id: value.game_id,
            trigger_at: to_bson_datetime(value.trigger_at),
            status: value.status,
            attempts: value.attempts,
        }
    }
}

impl From<MongoPromotionJobDocument> for PromotionJobEntity {
    fn from(value: MongoPromotionJobDocument) -> Self {
        Self {
            game_id: value.game_id,
            trigger_at: from_bson_datetime(value.trigger_at),
            status: value.status,
            attempts: value.attempts,
        }
    }
}

/// Minimal user document; user management lives outside this crate, only
/// existence checks read the collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoUserDocument {
    #[serde(rename = "_id")]
    pub id: Uuid,
}

pub fn to_bson_datetime(value: OffsetDateTime) -> DateTime {
    DateTime::from_system_time(SystemTime::from(value))
}

pub fn from_bson_datetime(value: DateTime) -> OffsetDateTime {
    OffsetDateTime::from(value.to_system_time())
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}
