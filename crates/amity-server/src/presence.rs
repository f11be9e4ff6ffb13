//! Connection-counted presence.
//!
//! Tracks, per user, the set of live realtime connections. A user is online
//! while that set is non-empty. Only the empty -> non-empty and
//! non-empty -> empty transitions are reported, so a second tab or device
//! never re-announces a user who is already online.
//!
//! The tracker knows nothing about visibility; callers decide whether a
//! transition is broadcast. State is process-local and starts empty.

use std::collections::HashSet;
use std::sync::Arc;

use amity_shared::types::{ConnectionId, UserId};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

#[derive(Clone, Default)]
pub struct PresenceTracker {
    // Sharded map: each user's set is mutated under its shard lock only.
    entries: Arc<DashMap<UserId, HashSet<ConnectionId>>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection. Returns `true` if this made the user online.
    pub fn connect(&self, user: UserId, connection: ConnectionId) -> bool {
        let mut connections = self.entries.entry(user).or_default();
        let was_offline = connections.is_empty();
        connections.insert(connection) && was_offline
    }

    /// Drop a connection. Returns `true` if this made the user offline.
    pub fn disconnect(&self, user: UserId, connection: ConnectionId) -> bool {
        match self.entries.entry(user) {
            Entry::Occupied(mut entry) => {
                let removed = entry.get_mut().remove(&connection);
                if removed && entry.get().is_empty() {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.entries
            .get(&user)
            .map_or(false, |connections| !connections.is_empty())
    }

    pub fn online_users(&self) -> HashSet<UserId> {
        self.entries
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn connections_of(&self, user: UserId) -> Vec<ConnectionId> {
        self.entries
            .get(&user)
            .map(|connections| connections.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_connections_one_transition_each_way() {
        let tracker = PresenceTracker::new();
        let user = UserId(1);
        let connections: Vec<_> = (0..5).map(|_| ConnectionId::new()).collect();

        let online_transitions = connections
            .iter()
            .filter(|c| tracker.connect(user, **c))
            .count();
        assert_eq!(online_transitions, 1);
        assert!(tracker.is_online(user));
        assert_eq!(tracker.connections_of(user).len(), 5);

        let offline_transitions = connections
            .iter()
            .filter(|c| tracker.disconnect(user, **c))
            .count();
        assert_eq!(offline_transitions, 1);
        assert!(!tracker.is_online(user));
        assert!(tracker.online_users().is_empty());
    }

    #[test]
    fn first_connect_and_last_disconnect_are_the_transitions() {
        let tracker = PresenceTracker::new();
        let user = UserId(9);
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert!(tracker.connect(user, a));
        assert!(!tracker.connect(user, b));
        assert!(!tracker.disconnect(user, a));
        assert!(tracker.disconnect(user, b));
    }

    #[test]
    fn duplicate_and_unknown_connections_are_ignored() {
        let tracker = PresenceTracker::new();
        let user = UserId(2);
        let c = ConnectionId::new();

        assert!(!tracker.disconnect(user, c));
        assert!(tracker.connect(user, c));
        assert!(!tracker.connect(user, c));
        assert!(!tracker.disconnect(user, ConnectionId::new()));
        assert!(tracker.is_online(user));
        assert!(tracker.disconnect(user, c));
        assert!(!tracker.disconnect(user, c));
    }

    #[test]
    fn online_users_lists_each_user_once() {
        let tracker = PresenceTracker::new();
        tracker.connect(UserId(1), ConnectionId::new());
        tracker.connect(UserId(1), ConnectionId::new());
        tracker.connect(UserId(2), ConnectionId::new());

        let online = tracker.online_users();
        assert_eq!(online.len(), 2);
        assert!(online.contains(&UserId(1)) && online.contains(&UserId(2)));
    }

    #[test]
    fn concurrent_connects_report_a_single_transition() {
        let tracker = PresenceTracker::new();
        let user = UserId(5);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || tracker.connect(user, ConnectionId::new()))
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|first| *first)
            .count();

        assert_eq!(firsts, 1);
        assert_eq!(tracker.connections_of(user).len(), 8);
    }
}
