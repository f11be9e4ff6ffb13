//! Realtime WebSocket endpoint.
//!
//! One socket per client device. The caller id comes from the upgrade
//! request headers. Events queued by the fan-out are written out as JSON
//! text frames; text frames from the client are parsed as commands.

use std::time::Duration;

use amity_shared::protocol::{ClientCommand, ErrorEvent, ServerEvent};
use amity_shared::types::{ConnectionId, UserId};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::api::{caller_id, AppState};
use crate::error::ServerError;
use crate::messenger::{Connected, Messenger};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ServerError> {
    let user = caller_id(&headers)?;
    let messenger = state.messenger.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user, messenger)))
}

async fn handle_socket(socket: WebSocket, user: UserId, messenger: Messenger) {
    let Connected {
        connection,
        mut events,
    } = messenger.connect(user).await;
    debug!(user = %user, %connection, "Socket opened");

    let (mut sink, mut incoming) = socket.split();
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!(user = %user, %connection, "Outbound queue closed");
                    break;
                };
                match serde_json::to_string(&event) {
                    Ok(payload) => {
                        if sink.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode event"),
                }
            }
            frame = incoming.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_command(&messenger, user, connection, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, user = %user, "Socket read failed");
                        break;
                    }
                }
            }
            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    messenger.disconnect(user, connection).await;
    debug!(user = %user, %connection, "Socket closed");
}

/// Execute one client command. Rejections are reported to the issuing
/// connection only.
pub(crate) async fn handle_command(
    messenger: &Messenger,
    user: UserId,
    connection: ConnectionId,
    raw: &str,
) {
    let command = match serde_json::from_str::<ClientCommand>(raw) {
        Ok(command) => command,
        Err(e) => {
            debug!(error = %e, user = %user, "Unparseable command");
            reply_error(messenger, connection, format!("invalid command: {e}"));
            return;
        }
    };

    let result = match command {
        ClientCommand::SendDirectMessage(cmd) => messenger
            .send_direct_message(user, cmd.target_user_id, &cmd.text)
            .await
            .map(|_| ()),
        ClientCommand::MarkRead(cmd) => messenger.mark_read(user, cmd.peer_id, &cmd.read).await,
        ClientCommand::Ping => {
            messenger.fanout().send_to_connection(connection, ServerEvent::Pong);
            Ok(())
        }
    };

    if let Err(e) = result {
        let message = if e.is_transient() {
            warn!(error = %e, user = %user, "Command failed");
            "internal error".to_string()
        } else {
            e.to_string()
        };
        reply_error(messenger, connection, message);
    }
}

fn reply_error(messenger: &Messenger, connection: ConnectionId, message: String) {
    messenger
        .fanout()
        .send_to_connection(connection, ServerEvent::Error(ErrorEvent { message }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::test_support::{drain, seeded, A, B, C};

    #[tokio::test]
    async fn ping_gets_pong_on_the_same_connection() {
        let (messenger, _dir) = seeded().await;
        let mut first = messenger.connect(A).await;
        let mut second = messenger.connect(A).await;

        handle_command(&messenger, A, first.connection, r#"{"type":"ping"}"#).await;

        assert_eq!(drain(&mut first.events), vec![ServerEvent::Pong]);
        assert!(drain(&mut second.events).is_empty());
    }

    #[tokio::test]
    async fn malformed_command_is_reported() {
        let (messenger, _dir) = seeded().await;
        let mut conn = messenger.connect(A).await;

        handle_command(&messenger, A, conn.connection, r#"{"type":"shout"}"#).await;

        let events = drain(&mut conn.events);
        assert!(matches!(events.as_slice(), [ServerEvent::Error(_)]));
    }

    #[tokio::test]
    async fn send_command_reaches_the_friend() {
        let (messenger, _dir) = seeded().await;
        let mut a = messenger.connect(A).await;
        let mut b = messenger.connect(B).await;
        drain(&mut a.events);

        handle_command(
            &messenger,
            A,
            a.connection,
            r#"{"type":"send-direct-message","targetUserId":2,"text":"hi"}"#,
        )
        .await;

        let to_a = drain(&mut a.events);
        assert!(matches!(to_a.as_slice(), [ServerEvent::MessageReceived(m)] if m.text == "hi"));
        let to_b = drain(&mut b.events);
        assert!(matches!(
            to_b.as_slice(),
            [ServerEvent::MessageReceived(_), ServerEvent::UnreadChanged(u)] if u.unread_count == 1
        ));
    }

    #[tokio::test]
    async fn send_to_stranger_is_rejected() {
        let (messenger, _dir) = seeded().await;
        let mut a = messenger.connect(A).await;
        let mut c = messenger.connect(C).await;

        handle_command(
            &messenger,
            A,
            a.connection,
            r#"{"type":"send-direct-message","targetUserId":3,"text":"hello?"}"#,
        )
        .await;

        let events = drain(&mut a.events);
        let [ServerEvent::Error(err)] = events.as_slice() else {
            panic!("expected one error, got {events:?}");
        };
        assert!(err.message.contains("not a friend"));
        assert!(drain(&mut c.events).is_empty());
    }

    #[tokio::test]
    async fn mark_read_command_clears_unread() {
        let (messenger, _dir) = seeded().await;
        let message = messenger
            .send_direct_message(A, B, "hi")
            .await
            .unwrap()
            .unwrap();
        let mut b = messenger.connect(B).await;

        let raw = serde_json::json!({
            "type": "mark-read",
            "peerId": 1,
            "lastReadMessageId": message.id,
            "lastReadAt": message.sent_at,
        })
        .to_string();
        handle_command(&messenger, B, b.connection, &raw).await;

        let events = drain(&mut b.events);
        assert!(matches!(
            events.as_slice(),
            [ServerEvent::UnreadChanged(u)] if u.unread_count == 0
        ));
    }
}
