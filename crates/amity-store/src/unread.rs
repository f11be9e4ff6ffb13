//! Unread accounting.
//!
//! A message is unread for participant P when P did not send it and its
//! `(sent_at, id)` lies strictly after P's read cursor. The two sides of a
//! dialog are counted independently.

use amity_shared::time::{from_micros, to_micros};
use amity_shared::types::{DialogId, MessageId, MessageKey, UserId};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{bad_micros, Result};
use crate::models::Unread;

impl Database {
    /// Unread state of `participant` in `dialog_id`, against the cursor
    /// stored right now.
    ///
    /// The cursor read and both counting queries share one read
    /// transaction so they observe the same snapshot.
    pub fn unread(&self, dialog_id: DialogId, participant: UserId) -> Result<Unread> {
        let tx = self.conn().unchecked_transaction()?;
        let cursor = self.get_dialog(dialog_id)?.read_cursor(participant);

        let cursor_at = to_micros(cursor.at);
        let count: i64 = tx.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE dialog_id = ?1 AND sender_id <> ?2
               AND (sent_at > ?3 OR (sent_at = ?3 AND id > ?4))",
            params![dialog_id.0, participant.0, cursor_at, cursor.id.0],
            |row| row.get(0),
        )?;

        let first = if count == 0 {
            None
        } else {
            let row: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT id, sent_at FROM messages
                     WHERE dialog_id = ?1 AND sender_id <> ?2
                       AND (sent_at > ?3 OR (sent_at = ?3 AND id > ?4))
                     ORDER BY sent_at ASC, id ASC
                     LIMIT 1",
                    params![dialog_id.0, participant.0, cursor_at, cursor.id.0],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            match row {
                Some((id, micros)) => Some(MessageKey::new(
                    from_micros(micros).ok_or(bad_micros(1, micros))?,
                    MessageId(id),
                )),
                None => None,
            }
        };

        tx.commit()?;

        Ok(Unread {
            count: count as u64,
            first,
        })
    }
}
