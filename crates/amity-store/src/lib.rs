//! # amity-store
//!
//! SQLite storage for the Amity messaging core.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for every domain model:
//! the dialog registry, the append-only message log with its two paging
//! modes, per-participant read cursors and unread accounting. [`Store`]
//! pools several handles for use from async code.

pub mod database;
pub mod dialogs;
pub mod friendships;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod unread;
pub mod users;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
pub use pool::Store;
