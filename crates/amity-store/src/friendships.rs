//! Accepted friendships.
//!
//! The request/accept lifecycle lives in the friend subsystem; this table
//! only records relationships that reached the accepted state, which is all
//! the messaging core needs to gate access.

use amity_shared::types::{DialogPair, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Record an accepted friendship. Idempotent.
    pub fn add_friendship(&self, a: UserId, b: UserId) -> Result<()> {
        let pair = DialogPair::new(a, b)?;
        self.conn().execute(
            "INSERT OR IGNORE INTO friendships (user_low, user_high, created_at)
             VALUES (?1, ?2, ?3)",
            params![
                pair.low().0,
                pair.high().0,
                amity_shared::time::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn are_friends(&self, a: UserId, b: UserId) -> Result<bool> {
        let Ok(pair) = DialogPair::new(a, b) else {
            return Ok(false);
        };
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM friendships WHERE user_low = ?1 AND user_high = ?2",
                params![pair.low().0, pair.high().0],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// All accepted friends of `user`, ascending by id.
    pub fn list_friends(&self, user: UserId) -> Result<Vec<UserId>> {
        let mut stmt = self.conn().prepare(
            "SELECT user_high FROM friendships WHERE user_low = ?1
             UNION
             SELECT user_low FROM friendships WHERE user_high = ?1
             ORDER BY 1",
        )?;

        let rows = stmt.query_map(params![user.0], |row| row.get::<_, i64>(0))?;

        let mut friends = Vec::new();
        for row in rows {
            friends.push(UserId(row?));
        }
        Ok(friends)
    }
}
