use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::paging::{Bound, PageRequest};
use crate::time::lenient;
use crate::types::{MessageId, UserId};

// ---------------------------------------------------------------------------
// Realtime channel: server -> client
// ---------------------------------------------------------------------------

/// Every event pushed over a realtime connection.
///
/// Serialized as JSON with a kebab-case `type` tag, e.g.
/// `{"type":"user-online","userId":7}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A direct message, framed for the receiving user
    MessageReceived(MessageReceived),

    /// Fresh unread state for one dialog
    UnreadChanged(UnreadSummary),

    /// A visible friend came online
    UserOnline(PresenceChange),

    /// A visible friend went offline
    UserOffline(PresenceChange),

    /// Reply to a client `ping`
    Pong,

    /// A client command was rejected
    Error(ErrorEvent),
}

/// A message as seen by one side of the dialog. `peer_id` is always the
/// *other* participant relative to the recipient of the event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceived {
    pub peer_id: UserId,
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Unread state of the dialog with `peer_id`, from the caller's side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnreadSummary {
    pub peer_id: UserId,
    pub unread_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_unread_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_unread_at: Option<DateTime<Utc>>,
}

impl UnreadSummary {
    pub fn empty(peer_id: UserId) -> Self {
        Self {
            peer_id,
            unread_count: 0,
            first_unread_id: None,
            first_unread_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    pub user_id: UserId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorEvent {
    pub message: String,
}

// ---------------------------------------------------------------------------
// Realtime channel: client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientCommand {
    SendDirectMessage(SendDirectMessage),
    MarkRead(MarkReadCommand),
    Ping,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SendDirectMessage {
    pub target_user_id: UserId,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadCommand {
    pub peer_id: UserId,
    #[serde(flatten)]
    pub read: MarkReadRequest,
}

// ---------------------------------------------------------------------------
// HTTP bodies and queries
// ---------------------------------------------------------------------------

/// One history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Body of a mark-read call. Both fields are required; they are optional
/// here so that a missing one is reported as a validation error rather than
/// a generic decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub last_read_message_id: Option<MessageId>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub last_read_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarkReadResponse {
    pub ok: bool,
}

/// Query string of a history request.
///
/// Supplying `before` or `after` selects cursor paging (newest first);
/// otherwise `skip`/`take` offset paging (oldest first) applies. An id
/// without its timestamp is meaningless and is rejected by
/// [`HistoryQuery::page_request`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub skip: Option<u32>,
    #[serde(default)]
    pub take: Option<u32>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before_id: Option<MessageId>,
    #[serde(default, deserialize_with = "lenient::option")]
    pub after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub after_id: Option<MessageId>,
}

impl HistoryQuery {
    pub fn page_request(&self, default_take: u32) -> Result<PageRequest, &'static str> {
        if self.before.is_none() && self.before_id.is_some() {
            return Err("beforeId requires before");
        }
        if self.after.is_none() && self.after_id.is_some() {
            return Err("afterId requires after");
        }

        let take = self.take.unwrap_or(default_take);
        let before = self.before.map(|at| Bound::new(at, self.before_id));
        let after = self.after.map(|at| Bound::new(at, self.after_id));

        if before.is_some() || after.is_some() {
            Ok(PageRequest::cursor(before, after, take))
        } else {
            Ok(PageRequest::offset(self.skip.unwrap_or(0), take))
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VisibilityRequest {
    pub visible: bool,
}
