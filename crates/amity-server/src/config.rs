//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use amity_shared::constants::{
    DEFAULT_CONNECTION_BUFFER, DEFAULT_HTTP_PORT, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE, MIN_PAGE_SIZE,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./amity.db`
    pub database_path: PathBuf,

    /// Number of pooled SQLite connections.
    /// Env: `DB_POOL_SIZE`
    /// Default: `8`
    pub db_pool_size: usize,

    /// Deadline for read-path store calls.
    /// Env: `QUERY_TIMEOUT_MS`
    /// Default: `5000`
    pub query_timeout: Duration,

    /// Outbound event queue length per realtime connection.
    /// Env: `CONNECTION_BUFFER`
    /// Default: `256`
    pub connection_buffer: usize,

    /// Page size used when a history request gives no `take`.
    /// Env: `DEFAULT_PAGE_SIZE`
    /// Default: `50`
    pub default_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./amity.db"),
            db_pool_size: 8,
            query_timeout: Duration::from_millis(5000),
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = parsed(&lookup, "HTTP_ADDR") {
            config.http_addr = addr;
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(n) = parsed::<usize>(&lookup, "DB_POOL_SIZE") {
            config.db_pool_size = n.max(1);
        }

        if let Some(ms) = parsed::<u64>(&lookup, "QUERY_TIMEOUT_MS") {
            config.query_timeout = Duration::from_millis(ms.max(1));
        }

        if let Some(n) = parsed::<usize>(&lookup, "CONNECTION_BUFFER") {
            config.connection_buffer = n.max(1);
        }

        if let Some(n) = parsed::<u32>(&lookup, "DEFAULT_PAGE_SIZE") {
            config.default_page_size = n.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Invalid setting, using default");
            None
        }
    }
}
