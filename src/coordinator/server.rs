use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use super::api::{self, AppState};
use super::checkpoints::CheckpointStore;
use super::hub::BroadcastHub;
use super::locks::LockManager;
use super::memory::MemoryStore;
use super::process::ProcessRunner;
use super::sessions::CollaborationTracker;
use super::ws;

/// Configuration for the coordinator server.
pub struct ServerConfig {
    pub port: u16,
    pub workspace: PathBuf,
    pub shell: String,
    pub hub_capacity: usize,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4100,
            workspace: PathBuf::from("."),
            shell: "/bin/bash".to_string(),
            hub_capacity: 256,
            dev_mode: false,
        }
    }
}

/// Assemble application state from config. Every store starts empty;
/// state lives only as long as the process.
pub fn build_state(config: &ServerConfig) -> Arc<AppState> {
    let hub = Arc::new(BroadcastHub::new(config.hub_capacity));
    let runner = ProcessRunner::new(hub.clone(), &config.shell, config.workspace.clone());

    Arc::new(AppState {
        locks: LockManager::new(),
        checkpoints: CheckpointStore::new(),
        tracker: CollaborationTracker::new(),
        memory: MemoryStore::new(),
        hub,
        runner,
    })
}

/// Build the full application router with API and WebSocket endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}

/// Start the coordinator server.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let state = build_state(&config);
    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, "coordinator listening");
    println!("Atelier coordinator running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}
