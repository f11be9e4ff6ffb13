use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// An insert collided with a uniqueness constraint.
    #[error("Unique constraint violated")]
    UniqueViolation,

    /// The user is not one of the dialog's two participants.
    #[error("User is not a participant of this dialog")]
    NotParticipant,

    /// Message text was empty after trimming.
    #[error("Message text is empty")]
    EmptyMessage,

    /// Invalid identifier pair (e.g. a user paired with themself).
    #[error("Invalid input: {0}")]
    Invalid(#[from] amity_shared::SharedError),

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Connection pool failure (closed pool or a panicked worker).
    #[error("Connection pool error: {0}")]
    Pool(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Whether `err` is SQLite reporting a UNIQUE / PRIMARY KEY collision.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
        }
        _ => false,
    }
}

/// Map a timestamp column that failed to decode.
pub(crate) fn bad_micros(col: usize, micros: i64) -> rusqlite::Error {
    rusqlite::Error::IntegralValueOutOfRange(col, micros)
}
