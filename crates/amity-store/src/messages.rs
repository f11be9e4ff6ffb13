//! Message log: append and page.

use amity_shared::paging::{PageRequest, SortOrder};
use amity_shared::time::{from_micros, to_micros};
use amity_shared::types::{DialogId, MessageId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::params;
use rusqlite::types::Value;

use crate::database::Database;
use crate::error::{bad_micros, Result, StoreError};
use crate::models::Message;

const MESSAGE_COLUMNS: &str = "id, dialog_id, sender_id, text, sent_at";

impl Database {
    /// Append a message to a dialog.
    ///
    /// `sent_at` is assigned by the caller (the server clock); it is stored
    /// at microsecond precision. Text that is empty after trimming is
    /// rejected.
    pub fn append_message(
        &self,
        dialog_id: DialogId,
        sender_id: UserId,
        text: &str,
        sent_at: DateTime<Utc>,
    ) -> Result<Message> {
        if text.trim().is_empty() {
            return Err(StoreError::EmptyMessage);
        }

        let sent_at = amity_shared::time::normalize(sent_at);
        self.conn().execute(
            "INSERT INTO messages (dialog_id, sender_id, text, sent_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![dialog_id.0, sender_id.0, text, to_micros(sent_at)],
        )?;

        Ok(Message {
            id: MessageId(self.conn().last_insert_rowid()),
            dialog_id,
            sender_id,
            text: text.to_string(),
            sent_at,
        })
    }

    /// Read one page of a dialog's history.
    ///
    /// Bounds are exclusive and compare on `(sent_at, id)`. The `take` rows
    /// are picked walking in `page.window` and returned in `page.order`.
    pub fn page_messages(&self, dialog_id: DialogId, page: &PageRequest) -> Result<Vec<Message>> {
        let mut sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE dialog_id = ?");
        let mut values: Vec<Value> = vec![Value::Integer(dialog_id.0)];

        if let Some(before) = page.before {
            let at = Value::Integer(to_micros(before.at));
            match before.id {
                Some(id) => {
                    sql.push_str(" AND (sent_at < ? OR (sent_at = ? AND id < ?))");
                    values.extend([at.clone(), at, Value::Integer(id.0)]);
                }
                None => {
                    sql.push_str(" AND sent_at < ?");
                    values.push(at);
                }
            }
        }

        if let Some(after) = page.after {
            let at = Value::Integer(to_micros(after.at));
            match after.id {
                Some(id) => {
                    sql.push_str(" AND (sent_at > ? OR (sent_at = ? AND id > ?))");
                    values.extend([at.clone(), at, Value::Integer(id.0)]);
                }
                None => {
                    sql.push_str(" AND sent_at > ?");
                    values.push(at);
                }
            }
        }

        sql.push_str(match page.window {
            SortOrder::Ascending => " ORDER BY sent_at ASC, id ASC",
            SortOrder::Descending => " ORDER BY sent_at DESC, id DESC",
        });
        sql.push_str(" LIMIT ? OFFSET ?");
        values.push(Value::Integer(i64::from(page.take)));
        values.push(Value::Integer(i64::from(page.skip)));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(values.iter()), row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        if page.window != page.order {
            messages.reverse();
        }
        Ok(messages)
    }
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: i64 = row.get(0)?;
    let dialog_id: i64 = row.get(1)?;
    let sender_id: i64 = row.get(2)?;
    let text: String = row.get(3)?;
    let sent_micros: i64 = row.get(4)?;

    let sent_at = from_micros(sent_micros).ok_or_else(|| bad_micros(4, sent_micros))?;

    Ok(Message {
        id: MessageId(id),
        dialog_id: DialogId(dialog_id),
        sender_id: UserId(sender_id),
        text,
        sent_at,
    })
}
