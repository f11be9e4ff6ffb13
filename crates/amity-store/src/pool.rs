//! Async access to a pool of [`Database`] connections.
//!
//! `rusqlite` is synchronous, so every call is shipped to tokio's blocking
//! pool together with a connection borrowed from the idle list. The
//! connection goes back to the idle list from inside the blocking task, so
//! a caller that stops waiting (timeout, dropped request) never leaks it and
//! the statement it started still runs to completion.

use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Semaphore;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Cloneable handle to the pooled store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Database>>,
    permits: Arc<Semaphore>,
}

impl Store {
    /// Open `size` connections to the database at `path`.
    pub fn open(path: &Path, size: usize) -> Result<Self> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(Database::open_at(path)?);
        }

        tracing::info!(path = %path.display(), connections = size, "store opened");

        Ok(Self::from_connections(connections))
    }

    /// Wrap already-open connections. They must all point at the same
    /// database.
    pub fn from_connections(connections: Vec<Database>) -> Self {
        let size = connections.len();
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(connections),
                permits: Arc::new(Semaphore::new(size)),
            }),
        }
    }

    /// Run `f` against a pooled connection on the blocking thread pool.
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|e| StoreError::Pool(e.to_string()))?;
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let db = inner
                .idle
                .lock()
                .pop()
                .ok_or_else(|| StoreError::Pool("no idle connection".into()))?;
            let result = f(&db);
            inner.idle.lock().push(db);
            result
        })
        .await
        .map_err(|e| StoreError::Pool(e.to_string()))?
    }
}
