//! Promotion worker entrypoint wiring storage supervision, the promotion
//! scheduler and graceful shutdown.

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tag_rally_back::{
    config::AppConfig,
    services::promotion_scheduler::PromotionScheduler,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let state = AppState::new(config);
    let scheduler = PromotionScheduler::new(state.clone());

    spawn_storage(state.clone(), scheduler.clone());

    info!("promotion worker running");
    shutdown_signal().await;

    info!("shutting down; aborting armed promotion timers");
    scheduler.shutdown();

    Ok(())
}

#[cfg(feature = "mongo-store")]
fn spawn_storage(state: SharedState, scheduler: PromotionScheduler) {
    use std::sync::Arc;

    use tag_rally_back::{
        dao::tag_store::{
            TagStore,
            mongodb::{MongoConfig, MongoTagStore},
        },
        services::storage_supervisor,
    };

    tokio::spawn(storage_supervisor::run(state, scheduler, || async {
        let config = MongoConfig::from_env().await?;
        let store = MongoTagStore::connect(config).await?;
        Ok(Arc::new(store) as Arc<dyn TagStore>)
    }));
}

#[cfg(not(feature = "mongo-store"))]
fn spawn_storage(state: SharedState, scheduler: PromotionScheduler) {
    use std::sync::Arc;

    use tag_rally_back::dao::tag_store::memory::MemoryTagStore;
    use tracing::warn;

    tokio::spawn(async move {
        warn!("no durable storage backend compiled in; promotion jobs will not survive restarts");
        state
            .install_tag_store(Arc::new(MemoryTagStore::new()))
            .await;
        if let Err(err) = scheduler.reconcile().await {
            warn!(error = %err, "promotion job reconciliation failed");
        }
    });
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the worker down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
