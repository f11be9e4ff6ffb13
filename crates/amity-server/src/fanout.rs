//! Realtime fan-out.
//!
//! Each live connection owns a bounded outbound queue drained by its socket
//! writer. Delivery never waits. A connection whose queue is full has fallen
//! behind: its queue is closed, which ends the socket so the client
//! reconnects and resyncs instead of silently missing events.

use std::sync::Arc;

use amity_shared::protocol::ServerEvent;
use amity_shared::types::{ConnectionId, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::presence::PresenceTracker;

#[derive(Clone)]
pub struct Fanout {
    presence: PresenceTracker,
    queues: Arc<DashMap<ConnectionId, mpsc::Sender<ServerEvent>>>,
    buffer: usize,
}

impl Fanout {
    pub fn new(presence: PresenceTracker, buffer: usize) -> Self {
        Self {
            presence,
            queues: Arc::new(DashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Allocate a queue for a new connection.
    pub fn open(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let connection = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.queues.insert(connection, tx);
        (connection, rx)
    }

    /// Drop a connection's queue; its receiver then drains and ends.
    pub fn close(&self, connection: ConnectionId) {
        self.queues.remove(&connection);
    }

    /// Push `event` to one connection. Returns whether it was queued.
    pub fn send_to_connection(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        let Some(tx) = self.queues.get(&connection).map(|q| q.value().clone()) else {
            debug!(%connection, "no queue for connection, dropping event");
            return false;
        };

        match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(%connection, "outbound queue full, closing lagging connection");
                self.queues.remove(&connection);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(%connection, "outbound queue closed, dropping event");
                false
            }
        }
    }

    /// Push `event` to every live connection of `user`. Returns how many
    /// connections accepted it; 0 when the user is offline.
    pub fn send_to_user(&self, user: UserId, event: &ServerEvent) -> usize {
        self.presence
            .connections_of(user)
            .into_iter()
            .filter(|connection| self.send_to_connection(*connection, event.clone()))
            .count()
    }
}
