//! donebell server
//!
//! Turns noisy "task finished" signals from background agents into one
//! deduplicated, enriched notification per unit of work, broadcast to every
//! connected observer over WebSocket.

mod api;
mod broadcast_hub;
mod completion;
mod config;
mod debounce;
mod dedup;
mod enrichment;
mod error;
mod fingerprint;
mod health;
mod kv_store;
mod logging;
mod normalize;
mod paths;
mod pending;
mod pubsub;
mod relay;
mod state;
mod websocket;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::{Args, DedupStoreKind, NotifierConfig};
use crate::enrichment::{EnrichmentDispatcher, HttpEnrichmentDispatcher, UnconfiguredDispatcher};
use crate::kv_store::{KeyValueStore, MemoryStore, SqliteStore};
use crate::paths::DataPaths;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = NotifierConfig::from(&args);

    let paths = DataPaths::resolve(args.data_dir.as_deref())?;
    paths.ensure_dirs()?;
    let logging = logging::init_logging(&paths.log_dir())?;

    info!(
        component = "server",
        event = "server.starting",
        run_id = %logging.run_id,
        data_dir = %paths.root().display(),
        debounce_secs = config.debounce_window.as_secs(),
        dedup_ttl_secs = config.dedup_ttl.as_secs(),
        "Starting donebell"
    );

    let store = build_store(&config, &paths)?;
    let dispatcher = build_dispatcher(&config)?;
    let state = Arc::new(AppState::new(&config, store, dispatcher));

    let started = state.supervisor.ensure_started().await;
    info!(
        component = "server",
        event = "server.relay_started",
        generation = started.generation(),
        "Result relay started"
    );

    let app = router(state.clone());

    info!(
        component = "server",
        event = "server.listening",
        bind = %config.bind,
        "Listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.supervisor.stop().await;
    info!(
        component = "server",
        event = "server.stopped",
        "donebell stopped"
    );
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(health::health_handler))
        .route("/api/completion", post(api::completion_handler))
        .route("/api/commands", post(api::record_command_handler))
        .route(
            "/api/commands/{group}/{member}",
            get(api::peek_command_handler),
        )
        .route("/api/results", post(api::publish_result_handler))
        .route("/api/relay/start", post(api::relay_start_handler))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

fn build_store(
    config: &NotifierConfig,
    paths: &DataPaths,
) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    Ok(match config.dedup_store {
        DedupStoreKind::Memory => {
            let store = Arc::new(MemoryStore::new());
            spawn_purge_task(Arc::clone(&store), config.dedup_ttl);
            store
        }
        DedupStoreKind::Sqlite => Arc::new(SqliteStore::open(&paths.dedup_db_path())?),
    })
}

/// Expired dedup keys are otherwise only dropped when read again.
fn spawn_purge_task(store: Arc<MemoryStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let purged = store.purge_expired();
            if purged > 0 {
                debug!(
                    component = "kv_store",
                    event = "kv_store.purged",
                    purged,
                    "Purged expired keys"
                );
            }
        }
    });
}

fn build_dispatcher(config: &NotifierConfig) -> anyhow::Result<Arc<dyn EnrichmentDispatcher>> {
    match config.enrichment_url.as_deref() {
        Some(url) => {
            let dispatcher = HttpEnrichmentDispatcher::new(url, config.enrichment_timeout)?;
            info!(
                component = "server",
                event = "server.enrichment_configured",
                tasks_url = %dispatcher.tasks_url(),
                "Enrichment pipeline configured"
            );
            Ok(Arc::new(dispatcher))
        }
        None => {
            warn!(
                component = "server",
                event = "server.enrichment_unconfigured",
                "No enrichment URL configured; completions will be reported as failed"
            );
            Ok(Arc::new(UnconfiguredDispatcher))
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(
            component = "server",
            event = "server.signal_failed",
            error = %e,
            "Failed to listen for shutdown signal"
        );
        std::future::pending::<()>().await;
    }
    info!(
        component = "server",
        event = "server.shutdown_requested",
        "Shutdown requested"
    );
}
