//! CRUD operations for [`User`] records.

use amity_shared::types::UserId;
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::User;

impl Database {
    /// Insert (or replace) a user row.
    pub fn upsert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, show_online, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET
                 username = excluded.username,
                 show_online = excluded.show_online",
            params![
                user.id.0,
                user.username,
                user.show_online,
                user.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn user_exists(&self, id: UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row("SELECT 1 FROM users WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// Presence visibility flag. Unknown users are treated as hidden.
    pub fn show_online(&self, id: UserId) -> Result<bool> {
        let flag: Option<bool> = self
            .conn()
            .query_row(
                "SELECT show_online FROM users WHERE id = ?1",
                params![id.0],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(false))
    }

    /// Update the visibility flag. Returns `true` if the stored value changed.
    pub fn set_show_online(&self, id: UserId, visible: bool) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE users SET show_online = ?2 WHERE id = ?1 AND show_online <> ?2",
            params![id.0, visible],
        )?;
        if affected == 0 && !self.user_exists(id)? {
            return Err(StoreError::NotFound);
        }
        Ok(affected > 0)
    }
}
