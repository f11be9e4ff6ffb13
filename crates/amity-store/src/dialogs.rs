//! Dialog registry and read-cursor ledger.
//!
//! A dialog is keyed by its canonical `(user_low, user_high)` pair and a
//! UNIQUE index on that pair is the only thing that keeps two concurrent
//! first contacts from creating two dialogs: [`Database::resolve_dialog`]
//! inserts optimistically and, if another connection won the race, re-reads
//! the row that connection committed.
//!
//! Each dialog row carries both participants' read cursors. Cursor updates
//! are a single conditional `UPDATE` that only matches when the new
//! `(at, id)` is strictly greater than the stored one, so concurrent
//! mark-read calls settle on the greatest value no matter how they
//! interleave.

use amity_shared::time::{from_micros, to_micros};
use amity_shared::types::{DialogId, DialogPair, MessageId, ReadCursor, Slot, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::database::Database;
use crate::error::{bad_micros, is_unique_violation, Result, StoreError};
use crate::models::Dialog;

const DIALOG_COLUMNS: &str = "id, user_low, user_high, created_at, \
     low_read_at, low_read_id, high_read_at, high_read_id";

impl Database {
    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Return the dialog between `a` and `b`, creating it on first contact.
    ///
    /// Idempotent and safe to call concurrently from both sides.
    pub fn resolve_dialog(&self, a: UserId, b: UserId) -> Result<Dialog> {
        let pair = DialogPair::new(a, b)?;

        if let Some(dialog) = self.find_dialog(pair)? {
            return Ok(dialog);
        }

        match self.insert_dialog(pair, amity_shared::time::now()) {
            Ok(dialog) => {
                tracing::debug!(
                    dialog = %dialog.id,
                    low = %pair.low(),
                    high = %pair.high(),
                    "dialog created"
                );
                Ok(dialog)
            }
            Err(StoreError::UniqueViolation) => {
                tracing::debug!(
                    low = %pair.low(),
                    high = %pair.high(),
                    "lost dialog creation race, re-reading"
                );
                self.find_dialog(pair)?.ok_or(StoreError::NotFound)
            }
            Err(other) => Err(other),
        }
    }

    pub fn find_dialog(&self, pair: DialogPair) -> Result<Option<Dialog>> {
        let sql = format!(
            "SELECT {DIALOG_COLUMNS} FROM dialogs WHERE user_low = ?1 AND user_high = ?2"
        );
        let dialog = self
            .conn()
            .query_row(&sql, params![pair.low().0, pair.high().0], row_to_dialog)
            .optional()?;
        Ok(dialog)
    }

    pub fn get_dialog(&self, id: DialogId) -> Result<Dialog> {
        let sql = format!("SELECT {DIALOG_COLUMNS} FROM dialogs WHERE id = ?1");
        self.conn()
            .query_row(&sql, params![id.0], row_to_dialog)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Insert a fresh dialog with both cursors at "nothing read".
    ///
    /// Fails with [`StoreError::UniqueViolation`] if the pair already has one.
    pub fn insert_dialog(&self, pair: DialogPair, created_at: DateTime<Utc>) -> Result<Dialog> {
        let unread = ReadCursor::MIN;
        let inserted = self.conn().execute(
            "INSERT INTO dialogs (user_low, user_high, created_at,
                                  low_read_at, low_read_id, high_read_at, high_read_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?4, ?5)",
            params![
                pair.low().0,
                pair.high().0,
                created_at.to_rfc3339(),
                to_micros(unread.at),
                unread.id.0,
            ],
        );

        match inserted {
            Ok(_) => Ok(Dialog {
                id: DialogId(self.conn().last_insert_rowid()),
                pair,
                created_at,
                low_cursor: unread,
                high_cursor: unread,
            }),
            Err(e) if is_unique_violation(&e) => Err(StoreError::UniqueViolation),
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    pub fn count_dialogs(&self) -> Result<u64> {
        let n: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM dialogs", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    // ------------------------------------------------------------------
    // Read-cursor ledger
    // ------------------------------------------------------------------

    /// Current cursor of `user` in `dialog`. Non-participants get the
    /// "nothing read" cursor.
    pub fn read_cursor(&self, dialog: DialogId, user: UserId) -> Result<ReadCursor> {
        Ok(self.get_dialog(dialog)?.read_cursor(user))
    }

    /// Move `user`'s cursor forward to `cursor`.
    ///
    /// Returns `true` if the cursor moved, `false` if the stored cursor was
    /// already at or past `cursor` (a silent no-op).
    pub fn advance_read_cursor(
        &self,
        dialog: &Dialog,
        user: UserId,
        cursor: ReadCursor,
    ) -> Result<bool> {
        let slot = dialog.pair.slot_of(user).ok_or(StoreError::NotParticipant)?;
        let (at_col, id_col) = cursor_columns(slot);

        let sql = format!(
            "UPDATE dialogs SET {at_col} = ?2, {id_col} = ?3
             WHERE id = ?1
               AND ({at_col} < ?2 OR ({at_col} = ?2 AND {id_col} < ?3))"
        );
        let affected = self.conn().execute(
            &sql,
            params![dialog.id.0, to_micros(cursor.at), cursor.id.0],
        )?;
        Ok(affected > 0)
    }
}

fn cursor_columns(slot: Slot) -> (&'static str, &'static str) {
    match slot {
        Slot::Low => ("low_read_at", "low_read_id"),
        Slot::High => ("high_read_at", "high_read_id"),
    }
}

fn row_to_dialog(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dialog> {
    let id: i64 = row.get(0)?;
    let low: i64 = row.get(1)?;
    let high: i64 = row.get(2)?;
    let created_str: String = row.get(3)?;
    let low_at: i64 = row.get(4)?;
    let low_id: i64 = row.get(5)?;
    let high_at: i64 = row.get(6)?;
    let high_id: i64 = row.get(7)?;

    let pair = DialogPair::new(UserId(low), UserId(high)).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Integer, Box::new(e))
    })?;

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&created_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let low_cursor = ReadCursor::new(
        from_micros(low_at).ok_or_else(|| bad_micros(4, low_at))?,
        MessageId(low_id),
    );
    let high_cursor = ReadCursor::new(
        from_micros(high_at).ok_or_else(|| bad_micros(6, high_at))?,
        MessageId(high_id),
    );

    Ok(Dialog {
        id: DialogId(id),
        pair,
        created_at,
        low_cursor,
        high_cursor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, secs).unwrap()
    }

    #[test]
    fn resolve_is_idempotent_and_direction_free() {
        let db = Database::open_in_memory().unwrap();

        let first = db.resolve_dialog(UserId(1), UserId(2)).unwrap();
        let again = db.resolve_dialog(UserId(2), UserId(1)).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(first.pair.low(), UserId(1));
        assert_eq!(db.count_dialogs().unwrap(), 1);
        assert_eq!(first.low_cursor, ReadCursor::MIN);
        assert_eq!(again.high_cursor, ReadCursor::MIN);
    }

    #[test]
    fn resolve_rejects_self() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.resolve_dialog(UserId(3), UserId(3)),
            Err(StoreError::Invalid(_))
        ));
    }

    #[test]
    fn duplicate_insert_is_a_unique_violation() {
        let db = Database::open_in_memory().unwrap();
        let pair = DialogPair::new(UserId(4), UserId(8)).unwrap();

        db.insert_dialog(pair, at(0)).unwrap();
        assert!(matches!(
            db.insert_dialog(pair, at(1)),
            Err(StoreError::UniqueViolation)
        ));
    }

    #[test]
    fn cursor_only_moves_forward() {
        let db = Database::open_in_memory().unwrap();
        let dialog = db.resolve_dialog(UserId(1), UserId(2)).unwrap();
        let user = UserId(2);

        assert!(db
            .advance_read_cursor(&dialog, user, ReadCursor::new(at(10), MessageId(5)))
            .unwrap());
        // Same value: no-op.
        assert!(!db
            .advance_read_cursor(&dialog, user, ReadCursor::new(at(10), MessageId(5)))
            .unwrap());
        // Earlier timestamp with a larger id: still older.
        assert!(!db
            .advance_read_cursor(&dialog, user, ReadCursor::new(at(9), MessageId(50)))
            .unwrap());
        // Same timestamp, larger id: newer.
        assert!(db
            .advance_read_cursor(&dialog, user, ReadCursor::new(at(10), MessageId(6)))
            .unwrap());

        assert_eq!(
            db.read_cursor(dialog.id, user).unwrap(),
            ReadCursor::new(at(10), MessageId(6))
        );
        // The other side is untouched.
        assert_eq!(db.read_cursor(dialog.id, UserId(1)).unwrap(), ReadCursor::MIN);
    }

    #[test]
    fn stored_cursor_is_the_maximum_submitted() {
        let submissions = [
            ReadCursor::new(at(3), MessageId(7)),
            ReadCursor::new(at(5), MessageId(2)),
            ReadCursor::new(at(1), MessageId(9)),
            ReadCursor::new(at(5), MessageId(4)),
            ReadCursor::new(at(5), MessageId(3)),
            ReadCursor::new(at(4), MessageId(11)),
        ];
        let expected = *submissions.iter().max().unwrap();

        // Every rotation of the submission order ends on the same cursor.
        for shift in 0..submissions.len() {
            let db = Database::open_in_memory().unwrap();
            let dialog = db.resolve_dialog(UserId(1), UserId(2)).unwrap();

            let mut order = submissions.to_vec();
            order.rotate_left(shift);
            for cursor in order {
                db.advance_read_cursor(&dialog, UserId(1), cursor).unwrap();
            }
            assert_eq!(db.read_cursor(dialog.id, UserId(1)).unwrap(), expected);
        }
    }

    #[test]
    fn non_participants() {
        let db = Database::open_in_memory().unwrap();
        let dialog = db.resolve_dialog(UserId(1), UserId(2)).unwrap();

        assert_eq!(db.read_cursor(dialog.id, UserId(3)).unwrap(), ReadCursor::MIN);
        assert!(matches!(
            db.advance_read_cursor(&dialog, UserId(3), ReadCursor::new(at(1), MessageId(1))),
            Err(StoreError::NotParticipant)
        ));
    }
}
