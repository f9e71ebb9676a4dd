use thiserror::Error;
use uuid::Uuid;

use crate::dao::storage::StorageError;

/// Result alias for MongoDB DAO operations.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Errors raised by the MongoDB tag store.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection URI could not be parsed.
    #[error("invalid MongoDB URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A required environment variable is missing.
    #[error("missing environment variable `{var}`")]
    MissingEnvVar {
        /// Variable name.
        var: &'static str,
    },
    /// The client could not be constructed from parsed options.
    #[error("failed to construct MongoDB client")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// The deployment never answered the initial ping.
    #[error("MongoDB did not answer the initial ping after {attempts} attempts")]
    InitialPing {
        /// Attempts performed.
        attempts: u32,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A periodic health ping failed.
    #[error("MongoDB health ping failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// Index creation failed during connection setup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index description.
        index: &'static str,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A tag read or write failed.
    #[error("tag operation `{operation}` failed for `{id}`")]
    TagOperation {
        /// Operation label.
        operation: &'static str,
        /// Tag primary key.
        id: Uuid,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A game read or write failed.
    #[error("game operation `{operation}` failed for `{id}`")]
    GameOperation {
        /// Operation label.
        operation: &'static str,
        /// Game primary key.
        id: Uuid,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A promotion job read or write failed.
    #[error("promotion job operation `{operation}` failed for game `{game_id}`")]
    JobOperation {
        /// Operation label.
        operation: &'static str,
        /// Game key of the job.
        game_id: Uuid,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
    /// A collection scan failed.
    #[error("scan of collection `{collection}` failed")]
    Scan {
        /// Target collection.
        collection: &'static str,
        /// Driver error.
        #[source]
        source: mongodb::error::Error,
    },
}

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}
