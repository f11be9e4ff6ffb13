//! Domain model structs persisted in the SQLite database.

use amity_shared::protocol::{MessageView, UnreadSummary};
use amity_shared::types::{DialogId, DialogPair, MessageId, MessageKey, ReadCursor, Slot, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// The slice of a user account the messaging core needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Whether the user's online/offline status may be shown to others.
    pub show_online: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Dialog
// ---------------------------------------------------------------------------

/// The single conversation between two users, with one read cursor per
/// canonical slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialog {
    pub id: DialogId,
    pub pair: DialogPair,
    pub created_at: DateTime<Utc>,
    pub low_cursor: ReadCursor,
    pub high_cursor: ReadCursor,
}

impl Dialog {
    /// Cursor of `user`, or "nothing read" when `user` is not a participant.
    pub fn read_cursor(&self, user: UserId) -> ReadCursor {
        match self.pair.slot_of(user) {
            Some(Slot::Low) => self.low_cursor,
            Some(Slot::High) => self.high_cursor,
            None => ReadCursor::MIN,
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single direct message. Messages are immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub dialog_id: DialogId,
    pub sender_id: UserId,
    pub text: String,
    /// Server-assigned, microsecond precision, UTC.
    pub sent_at: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.sent_at, self.id)
    }

    pub fn view(&self) -> MessageView {
        MessageView {
            id: self.id,
            sender_id: self.sender_id,
            text: self.text.clone(),
            sent_at: self.sent_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Unread
// ---------------------------------------------------------------------------

/// Unread state of one side of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Unread {
    pub count: u64,
    /// Earliest unread message, absent when `count` is 0.
    pub first: Option<MessageKey>,
}

impl Unread {
    pub fn summary(&self, peer_id: UserId) -> UnreadSummary {
        UnreadSummary {
            peer_id,
            unread_count: self.count,
            first_unread_id: self.first.map(|k| k.id),
            first_unread_at: self.first.map(|k| k.at),
        }
    }
}
