//! Service layer: the chain manager, game state manager, score calculator
//! and promotion scheduler, plus the storage supervisor keeping the backend
//! installed.

use std::sync::Arc;

/// Game pointer transitions and per-player aggregates.
pub mod game_service;
/// Durable delayed promotion of pending root tags.
pub mod promotion_scheduler;
/// Pure scoring rules.
pub mod score;
/// Storage connection supervision and degraded mode.
pub mod storage_supervisor;
/// Tag creation and chain linking.
pub mod tag_service;

use crate::{dao::tag_store::TagStore, error::ServiceError, state::SharedState};

/// Fetch the installed tag store or fail with the degraded-mode error.
pub(crate) async fn require_store(
    state: &SharedState,
) -> Result<Arc<dyn TagStore>, ServiceError> {
    state.tag_store().await.ok_or(ServiceError::Degraded)
}
