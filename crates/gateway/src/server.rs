//! Server assembly and lifecycle: build the store, security service,
//! engine, and orchestrator from config, then serve HTTP + WebSocket until
//! shutdown.

use std::{sync::Arc, time::Duration};

use {
    axum::{Router, extract::DefaultBodyLimit, routing::get},
    tower_http::{cors::CorsLayer, trace::TraceLayer},
    tracing::{info, warn},
};

use {
    parley_common::{Error, Result},
    parley_config::{DatabaseType, ParleyConfig, StorageType},
    parley_security::SecurityService,
    parley_store::{BlobStore, LocalBlobStore, MemoryStore, SqliteStore, Store},
};

use crate::{chat::ChatService, connections::ConnectionEngine, routes, ws};

/// Shared application state handed to every handler.
pub struct AppState {
    pub chat: Arc<ChatService>,
}

/// Build the full router: REST surface, WebSocket endpoint, body limit,
/// CORS, and request tracing.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = state.chat.config().max_file_size_bytes() as usize + 1024;
    Router::new()
        .merge(routes::router())
        .route("/ws/{user_id}", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Construct every subsystem from a validated config.
pub async fn build_state(config: ParleyConfig) -> Result<Arc<AppState>> {
    let security = Arc::new(SecurityService::new(&config)?);

    let store: Arc<dyn Store> = match config.database_type {
        DatabaseType::Memory => Arc::new(MemoryStore::new()),
        DatabaseType::Sql => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| Error::config("database_type 'sql' requires database_url"))?;
            Arc::new(SqliteStore::connect(url).await?)
        },
        DatabaseType::Document => {
            return Err(Error::config("no document-store driver is available"));
        },
    };
    store.init().await?;

    let blobs: Arc<dyn BlobStore> = match config.storage_type {
        StorageType::Local => Arc::new(LocalBlobStore::new(&config.storage_path)),
        StorageType::S3 => return Err(Error::config("no s3 driver is available")),
    };

    let engine = Arc::new(ConnectionEngine::new());
    let chat = Arc::new(ChatService::new(store, security, engine, blobs, config));
    Ok(Arc::new(AppState { chat }))
}

/// Spawn the keepalive tick: ping every session each interval, close
/// sessions idle for more than twice the interval.
pub fn spawn_keepalive(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    let interval = Duration::from_secs(state.chat.config().websocket_ping_interval);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // immediate first tick
        loop {
            ticker.tick().await;
            state.chat.engine().keepalive_sweep(interval * 2).await;
        }
    })
}

/// Run the gateway until ctrl-c. `init → serve → close`.
pub async fn serve(config: ParleyConfig) -> Result<()> {
    let host = config.host.clone();
    let port = config.port;
    let state = build_state(config).await?;

    let keepalive = spawn_keepalive(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .map_err(|e| Error::Persistence(format!("failed to bind {host}:{port}: {e}")))?;
    info!(host = %host, port = port, "gateway listening");

    let result = axum::serve(listener, build_router(Arc::clone(&state)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Persistence(format!("server error: {e}")));

    keepalive.abort();
    if let Err(e) = state.chat.store().close().await {
        warn!(error = %e, "failed to close store cleanly");
    }
    info!("gateway stopped");
    result
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("failed to install ctrl-c handler");
    }
}
