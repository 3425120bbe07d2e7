//! Tidemark Server - local index daemon.
//!
//! Hosts the change journal for one sync root. The remote-sync component
//! talks to it over local HTTP/JSON; UI components follow its notifications
//! over a WebSocket.

mod auth;
mod config;
mod error;
mod handlers;
mod persist;
mod routes;
mod websocket;

use crate::config::Config;
use crate::error::AppError;
use crate::persist::StateStore;
use crate::websocket::ConnectionManager;
use axum::Router;
use std::sync::Arc;
use tidemark_engine::{MemoryStorage, SharedJournal};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub journal: SharedJournal<MemoryStorage>,
    pub store: Arc<StateStore>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
}

impl AppState {
    /// Open the journal described by `config`.
    pub fn open(config: Config) -> Result<Self, AppError> {
        let store = StateStore::new(&config.state_path);
        let journal = persist::open_journal(&config, &store)?;
        Ok(Self {
            journal: SharedJournal::new(journal),
            store: Arc::new(store),
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tidemark_server=debug,tidemark_engine=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        root = %config.sync_root,
        state = %config.state_path.display(),
        "Starting Tidemark Server on {}:{}",
        config.host,
        config.port
    );

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::open(config)?;

    // Build router
    let app = Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
