use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SharedError;

// User identity = numeric account id issued by the profile subsystem
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let id = s
            .trim()
            .parse::<i64>()
            .map_err(|_| SharedError::InvalidUserId(s.to_string()))?;
        if id <= 0 {
            return Err(SharedError::InvalidUserId(s.to_string()));
        }
        Ok(Self(id))
    }
}

/// Store-assigned message identifier. Ids grow with insertion order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct DialogId(pub i64);

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One live realtime connection (a tab or a device).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Canonical dialog pair
// ---------------------------------------------------------------------------

/// Which of the two canonical participants a user is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Low,
    High,
}

/// An unordered pair of distinct users, stored as `(low, high)`.
///
/// Both `DialogPair::new(a, b)` and `DialogPair::new(b, a)` produce the same
/// value, which is what makes it usable as the natural key of a dialog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DialogPair {
    low: UserId,
    high: UserId,
}

impl DialogPair {
    pub fn new(a: UserId, b: UserId) -> Result<Self, SharedError> {
        match a.cmp(&b) {
            std::cmp::Ordering::Less => Ok(Self { low: a, high: b }),
            std::cmp::Ordering::Greater => Ok(Self { low: b, high: a }),
            std::cmp::Ordering::Equal => Err(SharedError::SelfDialog(a)),
        }
    }

    pub fn low(&self) -> UserId {
        self.low
    }

    pub fn high(&self) -> UserId {
        self.high
    }

    pub fn slot_of(&self, user: UserId) -> Option<Slot> {
        if user == self.low {
            Some(Slot::Low)
        } else if user == self.high {
            Some(Slot::High)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Composite order key
// ---------------------------------------------------------------------------

/// `(at, id)` position inside a dialog's message log.
///
/// Field order matters: the derived `Ord` compares `at` first and falls back
/// to `id`, which gives the total order used for paging, read cursors and
/// unread accounting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageKey {
    pub at: DateTime<Utc>,
    pub id: MessageId,
}

impl MessageKey {
    /// Sorts below every real message; the "nothing read" cursor.
    pub const MIN: MessageKey = MessageKey {
        at: DateTime::<Utc>::MIN_UTC,
        id: MessageId(0),
    };

    pub fn new(at: DateTime<Utc>, id: MessageId) -> Self {
        Self { at, id }
    }
}

impl Default for MessageKey {
    fn default() -> Self {
        Self::MIN
    }
}

/// A participant's "read up to" position.
pub type ReadCursor = MessageKey;
