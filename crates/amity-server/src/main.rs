//! # amity-server
//!
//! Direct-messaging backend for the Amity social app.
//!
//! This binary provides:
//! - **REST API** (axum) for message history, unread summaries, read
//!   acknowledgements, presence listing and visibility settings
//! - **WebSocket endpoint** delivering realtime message, unread and presence
//!   events, and accepting send / mark-read commands
//! - **Presence tracking** counted per live connection, announced only for
//!   users who allow it
//!
//! Persistence is a pooled SQLite database (`amity-store`).

mod api;
mod config;
mod error;
mod fanout;
mod messenger;
mod presence;
mod ws;

use amity_shared::constants::APP_NAME;
use amity_store::Store;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::messenger::Messenger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,amity_server=debug")),
        )
        .init();

    info!("Starting {} server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Store (creates the database file and runs migrations if needed)
    let store = Store::open(&config.database_path, config.db_pool_size)?;

    // Presence and fan-out start empty on every boot
    let messenger = Messenger::new(store, &config);

    let http_addr = config.http_addr;
    let app_state = AppState { messenger };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
