//! History paging.
//!
//! A single [`PageRequest`] primitive (direction + optional exclusive bounds +
//! window) describes every history read. Offset paging and composite-cursor
//! paging are two constructors over it.

use chrono::{DateTime, Utc};

use crate::constants::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::types::MessageId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Exclusive bound on the `(sentAt, id)` order.
///
/// Without an id the bound only looks at the timestamp, so every message
/// sharing `at` is excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bound {
    pub at: DateTime<Utc>,
    pub id: Option<MessageId>,
}

impl Bound {
    pub fn new(at: DateTime<Utc>, id: Option<MessageId>) -> Self {
        Self { at, id }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Order of the returned rows.
    pub order: SortOrder,
    /// Direction in which `take` rows are picked. Differs from `order` when
    /// only an `after` bound is given: the rows right after the bound are
    /// selected, then returned newest first.
    pub window: SortOrder,
    pub before: Option<Bound>,
    pub after: Option<Bound>,
    pub skip: u32,
    pub take: u32,
}

impl PageRequest {
    /// Legacy paging: ascending, `skip` then `take`.
    pub fn offset(skip: u32, take: u32) -> Self {
        Self {
            order: SortOrder::Ascending,
            window: SortOrder::Ascending,
            before: None,
            after: None,
            skip,
            take: clamp_take(take),
        }
    }

    /// Cursor paging: newest first between the given bounds.
    pub fn cursor(before: Option<Bound>, after: Option<Bound>, take: u32) -> Self {
        let window = if before.is_none() && after.is_some() {
            SortOrder::Ascending
        } else {
            SortOrder::Descending
        };
        Self {
            order: SortOrder::Descending,
            window,
            before,
            after,
            skip: 0,
            take: clamp_take(take),
        }
    }
}

pub fn clamp_take(take: u32) -> u32 {
    take.clamp(MIN_PAGE_SIZE, MAX_PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, secs).unwrap()
    }

    #[test]
    fn take_is_clamped() {
        assert_eq!(PageRequest::offset(0, 0).take, 1);
        assert_eq!(PageRequest::offset(0, 10_000).take, 200);
        assert_eq!(PageRequest::cursor(None, None, 25).take, 25);
    }

    #[test]
    fn forward_only_cursor_windows_from_the_bound() {
        let after = Bound::new(at(1), Some(MessageId(4)));
        let req = PageRequest::cursor(None, Some(after), 10);
        assert_eq!(req.order, SortOrder::Descending);
        assert_eq!(req.window, SortOrder::Ascending);

        let before = Bound::new(at(9), None);
        let req = PageRequest::cursor(Some(before), Some(after), 10);
        assert_eq!(req.window, SortOrder::Descending);
        let req = PageRequest::cursor(Some(before), None, 10);
        assert_eq!(req.window, SortOrder::Descending);
    }

    #[test]
    fn offset_mode_windows_ascending() {
        let req = PageRequest::offset(3, 10);
        assert_eq!((req.order, req.window), (SortOrder::Ascending, SortOrder::Ascending));
        assert!(req.before.is_none() && req.after.is_none());
    }
}
