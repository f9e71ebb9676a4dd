//! Service-layer error taxonomy.

use thiserror::Error;
use uuid::Uuid;

use crate::dao::storage::StorageError;

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// A root tag was posted while another one is still awaiting promotion.
    #[error("game `{game_id}` already has a pending root tag")]
    PendingTagConflict {
        /// Game whose pending slot is occupied.
        game_id: Uuid,
    },
    /// The resolved chain tail gained a successor before it could be linked.
    #[error("chain tail `{tail_id}` was linked by a concurrent writer")]
    ChainTailMoved {
        /// Tail tag that moved under us.
        tail_id: Uuid,
    },
    /// Structural chain corruption that cannot be healed by a retry.
    #[error("invalid chain state: {0}")]
    InvalidChainState(String),
    /// A game pointer transition that the state rules forbid.
    #[error("invalid promotion: {0}")]
    InvalidPromotion(String),
    /// Invalid input provided by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl ServiceError {
    /// Whether the error is worth retrying (transient storage trouble) as
    /// opposed to a client or structural failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, ServiceError::Unavailable(_) | ServiceError::Degraded)
    }
}
