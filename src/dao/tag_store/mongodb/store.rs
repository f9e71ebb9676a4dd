use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::{Bson, DateTime, Document, doc},
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoGameDocument, MongoPromotionJobDocument, MongoTagDocument, MongoUserDocument,
        doc_id, uuid_as_binary,
    },
};
use crate::dao::{
    models::{GameEntity, GamePatch, PromotionJobEntity, ScoreDelta, TagEntity, TagPatch},
    storage::StorageResult,
    tag_store::TagStore,
};

const TAG_COLLECTION_NAME: &str = "tags";
const GAME_COLLECTION_NAME: &str = "games";
const USER_COLLECTION_NAME: &str = "users";
const JOB_COLLECTION_NAME: &str = "promotion_jobs";

/// MongoDB-backed [`TagStore`].
#[derive(Clone)]
pub struct MongoTagStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoTagStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        // Chain-tail resolution filters on (game_id, root_tag_id, next_tag_id).
        let tags = database.collection::<MongoTagDocument>(TAG_COLLECTION_NAME);
        let chain_index = mongodb::IndexModel::builder()
            .keys(doc! {"game_id": 1, "root_tag_id": 1, "next_tag_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("tag_chain_idx".to_owned()))
                    .build(),
            )
            .build();
        tags.create_index(chain_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: TAG_COLLECTION_NAME,
                index: "game_id,root_tag_id,next_tag_id",
                source,
            })?;

        // Reconciliation scans for games with an occupied pending slot.
        let games = database.collection::<MongoGameDocument>(GAME_COLLECTION_NAME);
        let pending_index = mongodb::IndexModel::builder()
            .keys(doc! {"pending_root_tag_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("game_pending_idx".to_owned()))
                    .build(),
            )
            .build();
        games
            .create_index(pending_index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: GAME_COLLECTION_NAME,
                index: "pending_root_tag_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn tag_collection(&self) -> Collection<MongoTagDocument> {
        self.database()
            .await
            .collection::<MongoTagDocument>(TAG_COLLECTION_NAME)
    }

    async fn game_collection(&self) -> Collection<MongoGameDocument> {
        self.database()
            .await
            .collection::<MongoGameDocument>(GAME_COLLECTION_NAME)
    }

    async fn user_collection(&self) -> Collection<MongoUserDocument> {
        self.database()
            .await
            .collection::<MongoUserDocument>(USER_COLLECTION_NAME)
    }

    async fn job_collection(&self) -> Collection<MongoPromotionJobDocument> {
        self.database()
            .await
            .collection::<MongoPromotionJobDocument>(JOB_COLLECTION_NAME)
    }

    async fn create_tag(&self, tag: TagEntity) -> MongoResult<TagEntity> {
        let id = tag.id;
        let document: MongoTagDocument = tag.into();
        self.tag_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::TagOperation {
                operation: "insert",
                id,
                source,
            })?;
        Ok(document.into())
    }

    async fn find_tag(&self, id: Uuid) -> MongoResult<Option<TagEntity>> {
        let document = self
            .tag_collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::TagOperation {
                operation: "find",
                id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn update_tag(&self, id: Uuid, patch: TagPatch) -> MongoResult<Option<TagEntity>> {
        let update = tag_patch_update(&patch);
        if update.is_empty() {
            return self.find_tag(id).await;
        }

        let document = self
            .tag_collection()
            .await
            .find_one_and_update(doc_id(id), update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::TagOperation {
                operation: "update",
                id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn find_chain_tails(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
    ) -> MongoResult<Vec<TagEntity>> {
        let filter = doc! {
            "game_id": uuid_as_binary(game_id),
            "next_tag_id": Bson::Null,
            "$or": [
                {"root_tag_id": uuid_as_binary(root_tag_id)},
                {"_id": uuid_as_binary(root_tag_id), "is_root": true},
            ],
        };

        let documents: Vec<MongoTagDocument> = self
            .tag_collection()
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: TAG_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: TAG_COLLECTION_NAME,
                source,
            })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn link_chain_tail(&self, tail_id: Uuid, next_tag_id: Uuid) -> MongoResult<bool> {
        // Guarding the filter on an unset pointer makes this a compare-and-
        // swap: a concurrently linked tail no longer matches.
        let result = self
            .tag_collection()
            .await
            .update_one(
                doc! {"_id": uuid_as_binary(tail_id), "next_tag_id": Bson::Null},
                doc! {"$set": {"next_tag_id": uuid_as_binary(next_tag_id)}},
            )
            .await
            .map_err(|source| MongoDaoError::TagOperation {
                operation: "link tail",
                id: tail_id,
                source,
            })?;
        Ok(result.matched_count > 0)
    }

    async fn propagate_next_root(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
        next_root_tag_id: Uuid,
    ) -> MongoResult<u64> {
        let result = self
            .tag_collection()
            .await
            .update_many(
                doc! {
                    "game_id": uuid_as_binary(game_id),
                    "root_tag_id": uuid_as_binary(root_tag_id),
                },
                doc! {"$set": {"next_root_tag_id": uuid_as_binary(next_root_tag_id)}},
            )
            .await
            .map_err(|source| MongoDaoError::TagOperation {
                operation: "propagate next root",
                id: root_tag_id,
                source,
            })?;
        Ok(result.modified_count)
    }

    async fn create_game(&self, game: GameEntity) -> MongoResult<GameEntity> {
        let id = game.id;
        let document: MongoGameDocument = game.into();
        self.game_collection()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::GameOperation {
                operation: "insert",
                id,
                source,
            })?;
        Ok(document.into())
    }

    async fn find_game(&self, id: Uuid) -> MongoResult<Option<GameEntity>> {
        let document = self
            .game_collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::GameOperation {
                operation: "find",
                id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn update_game(&self, id: Uuid, patch: GamePatch) -> MongoResult<Option<GameEntity>> {
        let update = game_patch_update(&patch);
        let document = self
            .game_collection()
            .await
            .find_one_and_update(doc_id(id), update)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::GameOperation {
                operation: "update",
                id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn promote_pending_tag(
        &self,
        game_id: Uuid,
        pending_id: Uuid,
    ) -> MongoResult<Option<GameEntity>> {
        let document = self
            .game_collection()
            .await
            .find_one_and_update(
                doc! {
                    "_id": uuid_as_binary(game_id),
                    "pending_root_tag_id": uuid_as_binary(pending_id),
                },
                doc! {
                    "$set": {
                        "latest_root_tag_id": uuid_as_binary(pending_id),
                        "updated_at": DateTime::now(),
                    },
                    "$unset": {"pending_root_tag_id": ""},
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::GameOperation {
                operation: "promote pending",
                id: game_id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn apply_score(
        &self,
        game_id: Uuid,
        player_id: Uuid,
        delta: ScoreDelta,
    ) -> MongoResult<()> {
        let collection = self.game_collection().await;

        // $inc against the positional score card keeps concurrent tag
        // creation from losing increments to read-modify-write races.
        let result = collection
            .update_one(
                doc! {
                    "_id": uuid_as_binary(game_id),
                    "scores.player_id": uuid_as_binary(player_id),
                },
                doc! {"$inc": {
                    "scores.$.points": delta.points,
                    "scores.$.tags_posted": delta.tags_posted as i64,
                    "scores.$.tags_won": delta.tags_won as i64,
                    "scores.$.on_time": delta.on_time as i64,
                }},
            )
            .await
            .map_err(|source| MongoDaoError::GameOperation {
                operation: "apply score",
                id: game_id,
                source,
            })?;

        if result.matched_count == 0 {
            // First score for this player: seed the card with the delta.
            collection
                .update_one(
                    doc_id(game_id),
                    doc! {"$push": {"scores": {
                        "player_id": uuid_as_binary(player_id),
                        "points": delta.points,
                        "tags_posted": delta.tags_posted as i64,
                        "tags_won": delta.tags_won as i64,
                        "on_time": delta.on_time as i64,
                    }}},
                )
                .await
                .map_err(|source| MongoDaoError::GameOperation {
                    operation: "seed score card",
                    id: game_id,
                    source,
                })?;
        }

        Ok(())
    }

    async fn find_games_with_pending(&self) -> MongoResult<Vec<GameEntity>> {
        let documents: Vec<MongoGameDocument> = self
            .game_collection()
            .await
            .find(doc! {"pending_root_tag_id": {"$ne": Bson::Null}})
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: GAME_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: GAME_COLLECTION_NAME,
                source,
            })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn user_exists(&self, id: Uuid) -> MongoResult<bool> {
        let document = self
            .user_collection()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: USER_COLLECTION_NAME,
                source,
            })?;
        Ok(document.is_some())
    }

    async fn save_promotion_job(&self, job: PromotionJobEntity) -> MongoResult<()> {
        let game_id = job.game_id;
        let document: MongoPromotionJobDocument = job.into();
        self.job_collection()
            .await
            .replace_one(doc_id(game_id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::JobOperation {
                operation: "save",
                game_id,
                source,
            })?;
        Ok(())
    }

    async fn find_promotion_job(&self, game_id: Uuid) -> MongoResult<Option<PromotionJobEntity>> {
        let document = self
            .job_collection()
            .await
            .find_one(doc_id(game_id))
            .await
            .map_err(|source| MongoDaoError::JobOperation {
                operation: "find",
                game_id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn delete_promotion_job(&self, game_id: Uuid) -> MongoResult<()> {
        self.job_collection()
            .await
            .delete_one(doc_id(game_id))
            .await
            .map_err(|source| MongoDaoError::JobOperation {
                operation: "delete",
                game_id,
                source,
            })?;
        Ok(())
    }

    async fn list_promotion_jobs(&self) -> MongoResult<Vec<PromotionJobEntity>> {
        let documents: Vec<MongoPromotionJobDocument> = self
            .job_collection()
            .await
            .find(doc! {})
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: JOB_COLLECTION_NAME,
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::Scan {
                collection: JOB_COLLECTION_NAME,
                source,
            })?;

        Ok(documents.into_iter().map(Into::into).collect())
    }
}

fn tag_patch_update(patch: &TagPatch) -> Document {
    let mut set = Document::new();
    let mut unset = Document::new();

    let mut pointer = |field: &str, value: &Option<Option<Uuid>>| match value {
        Some(Some(id)) => {
            set.insert(field, uuid_as_binary(*id));
        }
        Some(None) => {
            unset.insert(field, "");
        }
        None => {}
    };

    pointer("parent_tag_id", &patch.parent_tag_id);
    pointer("next_root_tag_id", &patch.next_root_tag_id);
    pointer("previous_root_tag_id", &patch.previous_root_tag_id);

    if let Some(stats) = patch.stats {
        set.insert("points", stats.points);
        set.insert("new_tag", stats.new_tag);
        set.insert("posted_on_time", stats.posted_on_time);
        set.insert("won_tag", stats.won_tag);
    }

    let mut update = Document::new();
    if !set.is_empty() {
        update.insert("$set", set);
    }
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    update
}

fn game_patch_update(patch: &GamePatch) -> Document {
    let mut set = Document::new();
    let mut unset = Document::new();

    if let Some(first) = patch.first_root_tag_id {
        set.insert("first_root_tag_id", uuid_as_binary(first));
    }
    if let Some(latest) = patch.latest_root_tag_id {
        set.insert("latest_root_tag_id", uuid_as_binary(latest));
    }
    match patch.pending_root_tag_id {
        Some(Some(pending)) => {
            set.insert("pending_root_tag_id", uuid_as_binary(pending));
        }
        Some(None) => {
            unset.insert("pending_root_tag_id", "");
        }
        None => {}
    }
    set.insert("updated_at", DateTime::now());

    let mut update = Document::new();
    update.insert("$set", set);
    if !unset.is_empty() {
        update.insert("$unset", unset);
    }
    update
}

impl TagStore for MongoTagStore {
    fn create_tag(&self, tag: TagEntity) -> BoxFuture<'static, StorageResult<TagEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_tag(tag).await.map_err(Into::into) })
    }

    fn find_tag(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_tag(id).await.map_err(Into::into) })
    }

    fn update_tag(
        &self,
        id: Uuid,
        patch: TagPatch,
    ) -> BoxFuture<'static, StorageResult<Option<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.update_tag(id, patch).await.map_err(Into::into) })
    }

    fn find_chain_tails(
        &self,
        game_id: Uuid,
        root_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<TagEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_chain_tails(game_id, root_tag_id)
                .await
                .map_err(Into::into)
        })
    }

    fn link_chain_tail(
        &self,
        tail_id: Uuid,
        next_tag_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .link_chain_tail(tail_id, next_tag_id)
                .await
                .map_err(Into::into)
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
            store
                .propagate_next_root(game_id, root_tag_id, next_root_tag_id)
                .await
                .map_err(Into::into)
        })
    }

    fn create_game(&self, game: GameEntity) -> BoxFuture<'static, StorageResult<GameEntity>> {
        let store = self.clone();
        Box::pin(async move { store.create_game(game).await.map_err(Into::into) })
    }

    fn find_game(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_game(id).await.map_err(Into::into) })
    }

    fn update_game(
        &self,
        id: Uuid,
        patch: GamePatch,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.update_game(id, patch).await.map_err(Into::into) })
    }

    fn promote_pending_tag(
        &self,
        game_id: Uuid,
        pending_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .promote_pending_tag(game_id, pending_id)
                .await
                .map_err(Into::into)
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
            store
                .apply_score(game_id, player_id, delta)
                .await
                .map_err(Into::into)
        })
    }

    fn find_games_with_pending(&self) -> BoxFuture<'static, StorageResult<Vec<GameEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_games_with_pending().await.map_err(Into::into) })
    }

    fn user_exists(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.user_exists(id).await.map_err(Into::into) })
    }

    fn save_promotion_job(
        &self,
        job: PromotionJobEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_promotion_job(job).await.map_err(Into::into) })
    }

    fn find_promotion_job(
        &self,
        game_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<PromotionJobEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_promotion_job(game_id).await.map_err(Into::into) })
    }

    fn delete_promotion_job(&self, game_id: Uuid) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.delete_promotion_job(game_id).await.map_err(Into::into) })
    }

    fn list_promotion_jobs(&self) -> BoxFuture<'static, StorageResult<Vec<PromotionJobEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_promotion_jobs().await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
