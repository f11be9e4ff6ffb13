//! Direct-messaging service.
//!
//! [`Messenger`] ties the store, the presence tracker and the fan-out
//! together. HTTP handlers and the WebSocket loop call into it; it owns the
//! access rules (peer must exist and be a friend), the degradation policy of
//! the read paths, and the framing of realtime events.
//!
//! Read paths (history, unread, mark-read, online listing) run under the
//! configured query timeout and turn store failures into neutral results.
//! The send path surfaces store failures. Fan-out never fails a request.

use std::sync::Arc;
use std::time::Duration;

use amity_shared::protocol::{
    HistoryQuery, MarkReadRequest, MessageReceived, MessageView, PresenceChange, ServerEvent,
    UnreadSummary,
};
use amity_shared::time;
use amity_shared::types::{ConnectionId, ReadCursor, UserId};
use amity_store::{Database, Message, Store, StoreError};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::fanout::Fanout;
use crate::presence::PresenceTracker;

#[derive(Debug, Error)]
pub enum MessengerError {
    #[error("{0}")]
    Validation(String),

    #[error("user {0} is not a friend")]
    Forbidden(UserId),

    #[error("user {0} not found")]
    NotFound(UserId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store query timed out")]
    Timeout,
}

impl MessengerError {
    /// Failures of the store itself rather than of the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, MessengerError::Store(_) | MessengerError::Timeout)
    }
}

type Result<T> = std::result::Result<T, MessengerError>;

enum Access {
    Granted,
    UnknownPeer,
    NotFriends,
}

/// A live realtime connection handed to the socket loop.
pub struct Connected {
    pub connection: ConnectionId,
    pub events: mpsc::Receiver<ServerEvent>,
}

#[derive(Clone)]
pub struct Messenger {
    store: Store,
    presence: PresenceTracker,
    fanout: Fanout,
    /// Last presence each user was announced with. The lock is held for the
    /// whole announcement so friends see one user's changes in order.
    announced: Arc<DashMap<UserId, Arc<Mutex<bool>>>>,
    query_timeout: Duration,
    default_page_size: u32,
}

impl Messenger {
    pub fn new(store: Store, config: &ServerConfig) -> Self {
        let presence = PresenceTracker::new();
        let fanout = Fanout::new(presence.clone(), config.connection_buffer);
        Self {
            store,
            presence,
            fanout,
            announced: Arc::new(DashMap::new()),
            query_timeout: config.query_timeout,
            default_page_size: config.default_page_size,
        }
    }

    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Send `text` from `sender` to `target`.
    ///
    /// Whitespace-only text is dropped and yields `Ok(None)`. Otherwise the
    /// dialog is resolved (created on first contact), the message appended,
    /// and both sides notified.
    pub async fn send_direct_message(
        &self,
        sender: UserId,
        target: UserId,
        text: &str,
    ) -> Result<Option<Message>> {
        if text.trim().is_empty() {
            debug!(sender = %sender, target = %target, "Ignoring empty message");
            return Ok(None);
        }

        self.check_access(sender, target).await?;

        let text = text.to_string();
        let sent_at = time::now();
        let message = self
            .store
            .run(move |db| {
                let dialog = db.resolve_dialog(sender, target)?;
                db.append_message(dialog.id, sender, &text, sent_at)
            })
            .await?;

        debug!(
            message = %message.id,
            dialog = %message.dialog_id,
            sender = %sender,
            "Message stored"
        );

        self.announce_message(&message, target).await;
        Ok(Some(message))
    }

    /// `message-received` to both sides, then the receiver's fresh unread
    /// state to the receiver only.
    async fn announce_message(&self, message: &Message, receiver: UserId) {
        let sender = message.sender_id;
        let framed = |peer_id: UserId| {
            ServerEvent::MessageReceived(MessageReceived {
                peer_id,
                message_id: message.id,
                sender_id: sender,
                text: message.text.clone(),
                sent_at: message.sent_at,
            })
        };

        self.fanout.send_to_user(sender, &framed(receiver));
        self.fanout.send_to_user(receiver, &framed(sender));

        let dialog_id = message.dialog_id;
        match self
            .read(move |db| db.unread(dialog_id, receiver))
            .await
        {
            Ok(unread) => {
                self.fanout
                    .send_to_user(receiver, &ServerEvent::UnreadChanged(unread.summary(sender)));
            }
            Err(e) => {
                warn!(error = %e, user = %receiver, "Skipping unread-changed after send");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Reading
    // -----------------------------------------------------------------------

    /// One page of the dialog between `caller` and `peer`.
    pub async fn history(
        &self,
        caller: UserId,
        peer: UserId,
        query: &HistoryQuery,
    ) -> Result<Vec<MessageView>> {
        let page = query
            .page_request(self.default_page_size)
            .map_err(|e| MessengerError::Validation(e.to_string()))?;

        let fetched = match self.check_access(caller, peer).await {
            Ok(()) => {
                self.read(move |db| {
                    let dialog = db.resolve_dialog(caller, peer)?;
                    db.page_messages(dialog.id, &page)
                })
                .await
            }
            Err(e) => Err(e),
        };

        match fetched {
            Ok(messages) => Ok(messages.iter().map(Message::view).collect()),
            Err(e) if e.is_transient() => {
                warn!(error = %e, user = %caller, peer = %peer, "History degraded to empty");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Unread state of every dialog `caller` may have, one entry per friend.
    pub async fn unread_summary(&self, caller: UserId) -> Vec<UnreadSummary> {
        let friends = match self.read(move |db| db.list_friends(caller)).await {
            Ok(friends) => friends,
            Err(e) => {
                warn!(error = %e, user = %caller, "Unread summary degraded to empty");
                return Vec::new();
            }
        };

        let peers = friends.clone();
        let summaries = self
            .read(move |db| {
                Ok(peers
                    .into_iter()
                    .map(|peer| match unread_with(db, caller, peer) {
                        Ok(summary) => summary,
                        Err(e) => {
                            warn!(error = %e, user = %caller, peer = %peer, "Unread count degraded to zero");
                            UnreadSummary::empty(peer)
                        }
                    })
                    .collect::<Vec<_>>())
            })
            .await;

        summaries.unwrap_or_else(|e| {
            warn!(error = %e, user = %caller, "Unread summary degraded to zero");
            friends.into_iter().map(UnreadSummary::empty).collect()
        })
    }

    /// Acknowledge everything in the dialog with `peer` up to the given
    /// position. Stale positions are ignored; store failures are logged.
    /// When the cursor moved, the caller's own connections get the new
    /// unread state.
    pub async fn mark_read(
        &self,
        caller: UserId,
        peer: UserId,
        request: &MarkReadRequest,
    ) -> Result<()> {
        let (Some(id), Some(at)) = (request.last_read_message_id, request.last_read_at) else {
            return Err(MessengerError::Validation(
                "lastReadMessageId and lastReadAt are required".into(),
            ));
        };
        if id.0 <= 0 {
            return Err(MessengerError::Validation(format!(
                "invalid lastReadMessageId: {id}"
            )));
        }

        match self.check_access(caller, peer).await {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                warn!(error = %e, user = %caller, "Mark-read skipped");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let cursor = ReadCursor::new(time::normalize(at), id);
        let outcome = self
            .read(move |db| {
                let dialog = db.resolve_dialog(caller, peer)?;
                if db.advance_read_cursor(&dialog, caller, cursor)? {
                    Ok(Some(db.unread(dialog.id, caller)?))
                } else {
                    Ok(None)
                }
            })
            .await;

        match outcome {
            Ok(Some(unread)) => {
                debug!(user = %caller, peer = %peer, cursor = %cursor.id, "Read cursor advanced");
                self.fanout
                    .send_to_user(caller, &ServerEvent::UnreadChanged(unread.summary(peer)));
            }
            Ok(None) => debug!(user = %caller, peer = %peer, "Stale mark-read ignored"),
            Err(e) => warn!(error = %e, user = %caller, peer = %peer, "Mark-read not persisted"),
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Register a realtime connection for `user`. The first connection of a
    /// visible user announces them to their friends.
    pub async fn connect(&self, user: UserId) -> Connected {
        let (connection, events) = self.fanout.open();
        if self.presence.connect(user, connection) {
            info!(user = %user, "User online");
            self.announce_presence(user).await;
        }
        Connected { connection, events }
    }

    /// Drop a realtime connection. The last one going away announces the
    /// user as offline.
    pub async fn disconnect(&self, user: UserId, connection: ConnectionId) {
        self.fanout.close(connection);
        if self.presence.disconnect(user, connection) {
            info!(user = %user, "User offline");
            self.announce_presence(user).await;
        }
    }

    /// Friends of `caller` that are online and let others see it.
    pub async fn online_friends(&self, caller: UserId) -> Vec<UserId> {
        let online = self.presence.online_users();
        let listed = self
            .read(move |db| {
                let mut visible = Vec::new();
                for friend in db.list_friends(caller)? {
                    if online.contains(&friend) && db.show_online(friend)? {
                        visible.push(friend);
                    }
                }
                Ok(visible)
            })
            .await;

        listed.unwrap_or_else(|e| {
            warn!(error = %e, user = %caller, "Online listing degraded to empty");
            Vec::new()
        })
    }

    /// Persist the visibility flag of `user`. Toggling it while online
    /// tells friends the user appeared or vanished.
    pub async fn set_visibility(&self, user: UserId, visible: bool) -> Result<()> {
        let changed = self
            .store
            .run(move |db| db.set_show_online(user, visible))
            .await
            .map_err(|e| match e {
                StoreError::NotFound => MessengerError::NotFound(user),
                other => MessengerError::Store(other),
            })?;

        if changed {
            self.announce_presence(user).await;
        }
        Ok(())
    }

    /// Tell friends what they should currently see of `user`: online when
    /// connected and visible, offline otherwise. Nothing is sent when that
    /// matches the last announcement.
    async fn announce_presence(&self, user: UserId) {
        let slot = self.announced.entry(user).or_default().clone();
        let mut announced = slot.lock().await;

        let visible = match self.read(move |db| db.show_online(user)).await {
            Ok(visible) => visible,
            Err(e) => {
                warn!(error = %e, user = %user, "Presence not announced");
                return;
            }
        };
        let online = visible && self.presence.is_online(user);
        if online == *announced {
            debug!(user = %user, online, "Presence unchanged for friends");
            return;
        }

        if self.notify_friends(user, presence_event(user, online)).await {
            *announced = online;
        }
    }

    async fn notify_friends(&self, user: UserId, event: ServerEvent) -> bool {
        match self.read(move |db| db.list_friends(user)).await {
            Ok(friends) => {
                for friend in friends {
                    self.fanout.send_to_user(friend, &event);
                }
                true
            }
            Err(e) => {
                warn!(error = %e, user = %user, "Friends not notified");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn check_access(&self, caller: UserId, peer: UserId) -> Result<()> {
        if caller == peer {
            return Err(MessengerError::Validation(
                "cannot open a dialog with yourself".into(),
            ));
        }

        let access = self
            .read(move |db| {
                if !db.user_exists(peer)? {
                    return Ok(Access::UnknownPeer);
                }
                if !db.are_friends(caller, peer)? {
                    return Ok(Access::NotFriends);
                }
                Ok(Access::Granted)
            })
            .await?;

        match access {
            Access::Granted => Ok(()),
            Access::UnknownPeer => Err(MessengerError::NotFound(peer)),
            Access::NotFriends => Err(MessengerError::Forbidden(peer)),
        }
    }

    /// Run a store call under the query timeout. A call that times out
    /// still finishes on its worker; only the wait is abandoned.
    async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> amity_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        match tokio::time::timeout(self.query_timeout, self.store.run(f)).await {
            Ok(result) => result.map_err(MessengerError::from),
            Err(_) => Err(MessengerError::Timeout),
        }
    }
}

fn unread_with(db: &Database, caller: UserId, peer: UserId) -> amity_store::Result<UnreadSummary> {
    let dialog = db.resolve_dialog(caller, peer)?;
    Ok(db.unread(dialog.id, caller)?.summary(peer))
}

fn presence_event(user: UserId, online: bool) -> ServerEvent {
    let change = PresenceChange { user_id: user };
    if online {
        ServerEvent::UserOnline(change)
    } else {
        ServerEvent::UserOffline(change)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use amity_shared::types::MessageId;
    use chrono::Utc;

    const A: UserId = test_support::A;
    const B: UserId = test_support::B;
    const C: UserId = test_support::C;

    async fn setup() -> (Messenger, tempfile::TempDir) {
        test_support::seeded().await
    }

    use test_support::drain;

    fn read_request(message: &Message) -> MarkReadRequest {
        MarkReadRequest {
            last_read_message_id: Some(message.id),
            last_read_at: Some(message.sent_at),
        }
    }

    #[tokio::test]
    async fn send_frames_message_for_both_sides() {
        let (messenger, _dir) = setup().await;
        let mut a = messenger.connect(A).await;
        let mut b1 = messenger.connect(B).await;
        let mut b2 = messenger.connect(B).await;
        drain(&mut a.events);

        let message = messenger
            .send_direct_message(A, B, "hi")
            .await
            .unwrap()
            .unwrap();

        let to_a = drain(&mut a.events);
        assert_eq!(to_a.len(), 1);
        let ServerEvent::MessageReceived(seen_by_a) = &to_a[0] else {
            panic!("expected message-received, got {to_a:?}");
        };
        assert_eq!(seen_by_a.peer_id, B);
        assert_eq!(seen_by_a.sender_id, A);

        for conn in [&mut b1, &mut b2] {
            let to_b = drain(&mut conn.events);
            assert_eq!(to_b.len(), 2, "{to_b:?}");
            let ServerEvent::MessageReceived(seen_by_b) = &to_b[0] else {
                panic!("expected message-received first");
            };
            assert_eq!(seen_by_b.peer_id, A);
            assert_eq!(seen_by_b.message_id, message.id);
            let ServerEvent::UnreadChanged(unread) = &to_b[1] else {
                panic!("expected unread-changed second");
            };
            assert_eq!(unread.peer_id, A);
            assert_eq!(unread.unread_count, 1);
            assert_eq!(unread.first_unread_id, Some(message.id));
        }
    }

    #[tokio::test]
    async fn whitespace_message_is_a_silent_no_op() {
        let (messenger, _dir) = setup().await;
        let mut b = messenger.connect(B).await;
        drain(&mut b.events);

        assert!(messenger.send_direct_message(A, B, "  \n\t").await.unwrap().is_none());
        assert!(drain(&mut b.events).is_empty());
        assert!(messenger
            .history(B, A, &HistoryQuery::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn access_rules_on_send() {
        let (messenger, _dir) = setup().await;

        let err = messenger.send_direct_message(A, C, "hey").await.unwrap_err();
        assert!(matches!(err, MessengerError::Forbidden(UserId(3))));

        let err = messenger
            .send_direct_message(A, UserId(404), "hey")
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::NotFound(UserId(404))));

        let err = messenger.send_direct_message(A, A, "me").await.unwrap_err();
        assert!(matches!(err, MessengerError::Validation(_)));

        let dialogs = messenger.store.run(|db| db.count_dialogs()).await.unwrap();
        assert_eq!(dialogs, 0);
    }

    #[tokio::test]
    async fn history_pages_both_ways() {
        let (messenger, _dir) = setup().await;
        let mut sent = Vec::new();
        for text in ["one", "two", "three"] {
            sent.push(messenger.send_direct_message(A, B, text).await.unwrap().unwrap());
        }

        let offset = messenger
            .history(B, A, &HistoryQuery { skip: Some(1), ..Default::default() })
            .await
            .unwrap();
        let texts: Vec<_> = offset.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["two", "three"]);

        let last = &sent[2];
        let cursor = messenger
            .history(
                A,
                B,
                &HistoryQuery {
                    before: Some(last.sent_at),
                    before_id: Some(last.id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let texts: Vec<_> = cursor.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, ["two", "one"]);
    }

    #[tokio::test]
    async fn history_rejects_id_without_timestamp() {
        let (messenger, _dir) = setup().await;
        let query = HistoryQuery {
            before_id: Some(MessageId(3)),
            ..Default::default()
        };
        let err = messenger.history(A, B, &query).await.unwrap_err();
        assert!(matches!(err, MessengerError::Validation(_)));

        let err = messenger
            .history(A, C, &HistoryQuery::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MessengerError::Forbidden(_)));
    }

    #[tokio::test]
    async fn mark_read_requires_both_fields() {
        let (messenger, _dir) = setup().await;
        let request = MarkReadRequest {
            last_read_message_id: Some(MessageId(1)),
            last_read_at: None,
        };
        let err = messenger.mark_read(B, A, &request).await.unwrap_err();
        assert!(matches!(err, MessengerError::Validation(_)));
    }

    #[tokio::test]
    async fn mark_read_syncs_own_connections_and_ignores_stale() {
        let (messenger, _dir) = setup().await;
        let first = messenger.send_direct_message(A, B, "a").await.unwrap().unwrap();
        let second = messenger.send_direct_message(A, B, "b").await.unwrap().unwrap();

        let mut phone = messenger.connect(B).await;
        let mut laptop = messenger.connect(B).await;
        drain(&mut phone.events);
        drain(&mut laptop.events);

        messenger.mark_read(B, A, &read_request(&second)).await.unwrap();
        for conn in [&mut phone, &mut laptop] {
            let events = drain(&mut conn.events);
            assert_eq!(
                events,
                vec![ServerEvent::UnreadChanged(UnreadSummary::empty(A))]
            );
        }

        // Going backwards is acknowledged but changes nothing.
        messenger.mark_read(B, A, &read_request(&first)).await.unwrap();
        assert!(drain(&mut phone.events).is_empty());

        let summary = messenger.unread_summary(B).await;
        assert_eq!(summary, vec![UnreadSummary::empty(A)]);
    }

    #[tokio::test]
    async fn unread_summary_covers_every_friend() {
        let (messenger, _dir) = setup().await;
        messenger
            .store
            .run(|db| db.add_friendship(B, C))
            .await
            .unwrap();
        let hi = messenger.send_direct_message(A, B, "hi").await.unwrap().unwrap();

        let summary = messenger.unread_summary(B).await;
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].peer_id, A);
        assert_eq!(summary[0].unread_count, 1);
        assert_eq!(summary[0].first_unread_id, Some(hi.id));
        assert_eq!(summary[0].first_unread_at, Some(hi.sent_at));
        assert_eq!(summary[1], UnreadSummary::empty(C));

        assert_eq!(messenger.unread_summary(A).await, vec![UnreadSummary::empty(B)]);
    }

    #[tokio::test]
    async fn presence_transitions_reach_friends_once() {
        let (messenger, _dir) = setup().await;
        let mut a = messenger.connect(A).await;
        let mut c = messenger.connect(C).await;

        let b1 = messenger.connect(B).await;
        let b2 = messenger.connect(B).await;
        assert_eq!(
            drain(&mut a.events),
            vec![ServerEvent::UserOnline(PresenceChange { user_id: B })]
        );
        assert!(drain(&mut c.events).is_empty());
        assert_eq!(messenger.online_friends(A).await, vec![B]);

        messenger.disconnect(B, b1.connection).await;
        assert!(drain(&mut a.events).is_empty());
        messenger.disconnect(B, b2.connection).await;
        assert_eq!(
            drain(&mut a.events),
            vec![ServerEvent::UserOffline(PresenceChange { user_id: B })]
        );
        assert!(!messenger.presence.is_online(B));
    }

    #[tokio::test]
    async fn hidden_users_are_not_announced() {
        let (messenger, _dir) = setup().await;
        let mut a = messenger.connect(A).await;
        messenger.set_visibility(B, false).await.unwrap();

        let b = messenger.connect(B).await;
        assert!(drain(&mut a.events).is_empty());
        assert!(messenger.online_friends(A).await.is_empty());

        messenger.set_visibility(B, true).await.unwrap();
        assert_eq!(
            drain(&mut a.events),
            vec![ServerEvent::UserOnline(PresenceChange { user_id: B })]
        );

        messenger.set_visibility(B, false).await.unwrap();
        assert_eq!(
            drain(&mut a.events),
            vec![ServerEvent::UserOffline(PresenceChange { user_id: B })]
        );

        messenger.disconnect(B, b.connection).await;
        assert!(drain(&mut a.events).is_empty());

        let err = messenger.set_visibility(UserId(99), true).await.unwrap_err();
        assert!(matches!(err, MessengerError::NotFound(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reconnect_racing_disconnect_ends_online() {
        let (messenger, _dir) = setup().await;
        let mut a = messenger.connect(A).await;

        for _ in 0..50 {
            let old = messenger.connect(B).await;
            drain(&mut a.events);

            let leaving = {
                let messenger = messenger.clone();
                tokio::spawn(async move { messenger.disconnect(B, old.connection).await })
            };
            let joining = {
                let messenger = messenger.clone();
                tokio::spawn(async move { messenger.connect(B).await })
            };
            leaving.await.unwrap();
            let fresh = joining.await.unwrap();

            let seen = drain(&mut a.events);
            let offline = ServerEvent::UserOffline(PresenceChange { user_id: B });
            let online = ServerEvent::UserOnline(PresenceChange { user_id: B });
            assert!(
                seen.is_empty() || seen == vec![offline.clone(), online],
                "{seen:?}"
            );

            messenger.disconnect(B, fresh.connection).await;
            assert_eq!(drain(&mut a.events), vec![offline]);
        }
    }

    #[tokio::test]
    async fn read_paths_degrade_when_store_is_unavailable() {
        // No connections at all: every store call waits until the timeout.
        let config = ServerConfig {
            query_timeout: Duration::from_millis(50),
            ..ServerConfig::default()
        };
        let messenger = Messenger::new(Store::from_connections(Vec::new()), &config);

        let history = messenger.history(A, B, &HistoryQuery::default()).await;
        assert!(history.unwrap().is_empty());
        assert!(messenger.unread_summary(A).await.is_empty());
        assert!(messenger.online_friends(A).await.is_empty());

        let request = MarkReadRequest {
            last_read_message_id: Some(MessageId(1)),
            last_read_at: Some(Utc::now()),
        };
        assert!(messenger.mark_read(A, B, &request).await.is_ok());

        // Sending does not degrade.
        let err = messenger.send_direct_message(A, B, "hi").await.unwrap_err();
        assert!(err.is_transient());
    }
}
