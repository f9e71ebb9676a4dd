//! Shared application state wiring the persistence adapter, configuration
//! and clock into the service layer.

use std::sync::Arc;

use tokio::sync::{RwLock, watch};

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    dao::tag_store::TagStore,
};

/// Cheaply cloneable handle on the application state.
pub type SharedState = Arc<AppState>;

/// Central application state storing the installed storage backend, runtime
/// configuration and the injectable clock.
pub struct AppState {
    tag_store: RwLock<Option<Arc<dyn TagStore>>>,
    degraded: watch::Sender<bool>,
    config: AppConfig,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned
    /// cheaply. The application starts in degraded mode until a storage
    /// backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Variant of [`AppState::new`] with an explicit clock, used by tests to
    /// control promotion timing.
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            tag_store: RwLock::new(None),
            degraded: degraded_tx,
            config,
            clock,
        })
    }

    /// Obtain a handle to the current tag store, if one is installed.
    pub async fn tag_store(&self) -> Option<Arc<dyn TagStore>> {
        let guard = self.tag_store.read().await;
        guard.as_ref().cloned()
    }

    /// Install a new tag store implementation and leave degraded mode.
    pub async fn install_tag_store(&self, store: Arc<dyn TagStore>) {
        {
            let mut guard = self.tag_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current tag store and enter degraded mode.
    pub async fn clear_tag_store(&self) {
        {
            let mut guard = self.tag_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.tag_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            let changed = *current != value;
            *current = value;
            changed
        });
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Injectable time source.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}
