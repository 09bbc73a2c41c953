//! Realtime WebSocket transport.
//!
//! Route: GET /ws
//!
//! Lifecycle of one socket:
//!   1. Upgrade; the socket is inert until it sends `authenticate`
//!   2. Empty `userId` or no handshake within the grace period → close 1008
//!   3. Register in the `ConnectionRegistry`, ack with `connected`
//!   4. Outbound frames flow through a per-connection queue drained by a
//!      writer task (FIFO), which also pings every 30s
//!   5. On close or socket error the connection is unregistered

use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use dashmap::DashMap;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::protocol::{ClientMessage, Connected, ServerMessage};
use super::registry::{ConnectionId, ConnectionRegistry};
use crate::metrics::METRICS;
use crate::notification::format::FormattedNotification;

const PING_INTERVAL: Duration = Duration::from_secs(30);

/// Outbound queue of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Queued on this many sockets.
    Delivered(usize),
    /// The user has no live socket on this process. Not an error.
    NotDelivered,
}

impl Delivery {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered(_))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("userId is required")]
    MissingUserId,

    #[error("no authenticate message within {0:?}")]
    Timeout(Duration),

    #[error("connection closed before authenticating")]
    Closed,
}

pub struct RealtimeServer {
    registry: Arc<ConnectionRegistry>,
    outboxes: DashMap<ConnectionId, Outbox>,
    handshake_timeout: Duration,
}

impl RealtimeServer {
    pub fn new(registry: Arc<ConnectionRegistry>, handshake_timeout: Duration) -> Self {
        Self {
            registry,
            outboxes: DashMap::new(),
            handshake_timeout,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Bind `connection` to `user_id`. Nothing is registered when the id is
    /// missing.
    pub fn authenticate(
        &self,
        connection: &ConnectionId,
        user_id: &str,
        outbox: Outbox,
    ) -> Result<String, HandshakeError> {
        let user_id = validate_user_id(user_id)?;
        if self.outboxes.insert(connection.clone(), outbox).is_none() {
            METRICS.connections_active.inc();
        }
        self.registry.register(&user_id, connection.clone());
        Ok(user_id)
    }

    /// Unconditional; safe to call for connections that never authenticated.
    pub fn disconnect(&self, user_id: &str, connection: &ConnectionId) {
        self.registry.unregister(user_id, connection);
        if self.outboxes.remove(connection).is_some() {
            METRICS.connections_active.dec();
        }
    }

    /// Queue `payload` as a `notification` frame on every socket of `user_id`.
    ///
    /// At-most-once per socket: a socket that closed between lookup and send
    /// is skipped silently.
    pub fn push_to_user(&self, user_id: &str, payload: &FormattedNotification) -> Delivery {
        let connections = self.registry.connections(user_id);
        if connections.is_empty() {
            debug!(user_id, "push: user offline on this process");
            return Delivery::NotDelivered;
        }

        let mut queued = 0;
        for connection in &connections {
            let Some(outbox) = self.outboxes.get(connection) else {
                continue;
            };
            if outbox
                .send(ServerMessage::Notification(payload.clone()))
                .is_ok()
            {
                queued += 1;
            } else {
                debug!(user_id, connection_id = %connection, "push: socket already closed");
            }
        }

        if queued == 0 {
            Delivery::NotDelivered
        } else {
            debug!(user_id, sockets = queued, notification_id = %payload.id, "push: queued");
            Delivery::Delivered(queued)
        }
    }

    /// Drive one upgraded socket until it closes.
    pub async fn serve(self: Arc<Self>, mut socket: WebSocket) {
        let connection = ConnectionId::new();
        debug!(connection_id = %connection, "realtime: socket opened");

        let mut user_id = match self.handshake(&mut socket).await {
            Ok(user_id) => user_id,
            Err(HandshakeError::Closed) => {
                debug!(connection_id = %connection, "realtime: closed before handshake");
                return;
            }
            Err(e) => {
                warn!(connection_id = %connection, error = %e, "realtime: handshake rejected");
                reject(&mut socket, &e).await;
                return;
            }
        };

        let (sink, mut stream) = socket.split();
        let (outbox, inbox) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(sink, inbox, close_rx));
        let mut close_tx = Some(close_tx);

        if let Err(e) = self.authenticate(&connection, &user_id, outbox.clone()) {
            // validated by the handshake already
            warn!(connection_id = %connection, error = %e, "realtime: bind failed");
            return;
        }
        let _ = outbox.send(connected(&connection, &user_id));
        info!(user_id = %user_id, connection_id = %connection, "realtime: connection authenticated");

        while let Some(frame) = stream.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    debug!(connection_id = %connection, error = %e, "realtime: socket error");
                    break;
                }
            };
            match frame {
                Message::Text(text) => match ClientMessage::parse(&text) {
                    Ok(ClientMessage::Authenticate(auth)) => match validate_user_id(&auth.user_id) {
                        Ok(next) => {
                            if next != user_id {
                                info!(
                                    from = %user_id,
                                    to = %next,
                                    connection_id = %connection,
                                    "realtime: connection re-authenticated"
                                );
                                self.registry.register(&next, connection.clone());
                                user_id = next;
                            }
                            let _ = outbox.send(connected(&connection, &user_id));
                        }
                        Err(e) => {
                            warn!(connection_id = %connection, error = %e, "realtime: protocol violation");
                            let _ = outbox.send(ServerMessage::Error {
                                message: e.to_string(),
                            });
                            if let Some(tx) = close_tx.take() {
                                let _ = tx.send(policy_close(&e));
                            }
                            break;
                        }
                    },
                    Err(_) => {
                        debug!(connection_id = %connection, "realtime: ignoring unrecognised frame");
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }

        self.disconnect(&user_id, &connection);
        drop(outbox);
        drop(close_tx);

        let mut writer = writer;
        if tokio::time::timeout(Duration::from_secs(5), &mut writer)
            .await
            .is_err()
        {
            writer.abort();
        }
        info!(user_id = %user_id, connection_id = %connection, "realtime: connection closed");
    }

    async fn handshake(&self, socket: &mut WebSocket) -> Result<String, HandshakeError> {
        let wait = async {
            while let Some(frame) = socket.recv().await {
                match frame.map_err(|_| HandshakeError::Closed)? {
                    Message::Text(text) => match ClientMessage::parse(&text) {
                        Ok(ClientMessage::Authenticate(auth)) => {
                            return validate_user_id(&auth.user_id);
                        }
                        Err(_) => debug!("realtime: ignoring frame before authenticate"),
                    },
                    Message::Close(_) => return Err(HandshakeError::Closed),
                    _ => {}
                }
            }
            Err(HandshakeError::Closed)
        };
        tokio::time::timeout(self.handshake_timeout, wait)
            .await
            .map_err(|_| HandshakeError::Timeout(self.handshake_timeout))?
    }
}

fn validate_user_id(user_id: &str) -> Result<String, HandshakeError> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(HandshakeError::MissingUserId);
    }
    Ok(trimmed.to_string())
}

fn connected(connection: &ConnectionId, user_id: &str) -> ServerMessage {
    ServerMessage::Connected(Connected {
        connection_id: connection.clone(),
        user_id: user_id.to_string(),
    })
}

fn policy_close(err: &HandshakeError) -> CloseFrame<'static> {
    CloseFrame {
        code: close_code::POLICY,
        reason: Cow::Owned(err.to_string()),
    }
}

async fn reject(socket: &mut WebSocket, err: &HandshakeError) {
    let error = ServerMessage::Error {
        message: err.to_string(),
    };
    if let Ok(text) = error.to_json() {
        let _ = socket.send(Message::Text(text)).await;
    }
    let _ = socket.send(Message::Close(Some(policy_close(err)))).await;
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
    mut close_rx: oneshot::Receiver<CloseFrame<'static>>,
) {
    let mut ping = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut close_pending = true;

    loop {
        tokio::select! {
            // queued frames go out before a requested close
            biased;
            msg = inbox.recv() => match msg {
                Some(msg) => match msg.to_json() {
                    Ok(text) => {
                        if sink.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(error = %e, "realtime: failed to encode frame"),
                },
                None => {
                    if let Ok(frame) = close_rx.try_recv() {
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        return;
                    }
                    break;
                }
            },
            frame = &mut close_rx, if close_pending => match frame {
                Ok(frame) => {
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    return;
                }
                Err(_) => close_pending = false,
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::format::{FormattedBody, GenericDetails};
    use uuid::Uuid;

    fn server() -> RealtimeServer {
        RealtimeServer::new(Arc::new(ConnectionRegistry::new()), Duration::from_secs(5))
    }

    fn payload() -> FormattedNotification {
        FormattedNotification {
            id: Uuid::new_v4(),
            timestamp: "01/01/2026, 00:00:00".into(),
            unread: true,
            body: FormattedBody::Default(GenericDetails::default()),
        }
    }

    #[test]
    fn test_push_to_offline_user_is_not_delivered() {
        let server = server();
        assert_eq!(server.push_to_user("user-1", &payload()), Delivery::NotDelivered);
    }

    #[test]
    fn test_push_reaches_every_socket_of_user() {
        let server = server();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        server.authenticate(&ConnectionId::from("sock-A"), "user-1", tx_a).unwrap();
        server.authenticate(&ConnectionId::from("sock-B"), "user-1", tx_b).unwrap();

        let p = payload();
        assert_eq!(server.push_to_user("user-1", &p), Delivery::Delivered(2));
        assert_eq!(rx_a.try_recv().unwrap(), ServerMessage::Notification(p.clone()));
        assert_eq!(rx_b.try_recv().unwrap(), ServerMessage::Notification(p));
    }

    #[test]
    fn test_empty_user_id_is_rejected_without_registering() {
        let server = server();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = server
            .authenticate(&ConnectionId::from("sock-A"), "   ", tx)
            .unwrap_err();
        assert_eq!(err, HandshakeError::MissingUserId);
        assert_eq!(server.registry().connection_count(), 0);
    }

    #[test]
    fn test_closed_socket_is_swallowed() {
        let server = server();
        let (tx, rx) = mpsc::unbounded_channel();
        server.authenticate(&ConnectionId::from("sock-A"), "user-1", tx).unwrap();
        drop(rx);
        assert_eq!(server.push_to_user("user-1", &payload()), Delivery::NotDelivered);
    }

    #[test]
    fn test_disconnect_unregisters() {
        let server = server();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionId::from("sock-A");
        server.authenticate(&conn, "user-1", tx).unwrap();
        server.disconnect("user-1", &conn);
        assert!(!server.registry().contains_user("user-1"));
        assert_eq!(server.push_to_user("user-1", &payload()), Delivery::NotDelivered);
    }

    #[test]
    fn test_pushes_arrive_in_issue_order() {
        let server = server();
        let (tx, mut rx) = mpsc::unbounded_channel();
        server.authenticate(&ConnectionId::from("sock-A"), "user-1", tx).unwrap();

        let sent: Vec<_> = (0..5).map(|_| payload()).collect();
        for p in &sent {
            server.push_to_user("user-1", p);
        }
        for p in sent {
            assert_eq!(rx.try_recv().unwrap(), ServerMessage::Notification(p));
        }
    }
}
