//! Cross-process notification bus.
//!
//! A notification dispatched on process A must reach a socket held by
//! process B. Every process runs one supervised listener on a shared channel;
//! the dispatcher publishes each notification there, and each listener pushes
//! what it receives to its own local sockets.
//!
//! Listener states:
//!
//! ```text
//! DISCONNECTED → CONNECTING → LISTENING ─(error)→ DISCONNECTED → (fixed delay) → CONNECTING …
//!                              any state ─(stop)→ CLOSED
//! ```
//!
//! Retries are unbounded: a channel that silently stays down breaks realtime
//! delivery for every user on the process.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::METRICS;
use crate::notification::format::FormattedNotification;
use crate::realtime::server::{Delivery, RealtimeServer};

pub mod memory;
pub mod postgres;
pub mod transport;

pub use memory::MemoryTransport;
pub use postgres::PgTransport;
pub use transport::{BusSubscription, BusTransport};

pub const NEW_NOTIFICATION_EVENT: &str = "new_notification";

/// Wire payload published on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusMessage {
    pub event: String,
    pub user_id: String,
    pub notification: FormattedNotification,
    /// Instance id of the publisher. Listeners skip their own messages,
    /// which the dispatcher has already pushed locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Disconnected,
    Connecting,
    Listening,
    Closed,
}

impl BusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BusState::Disconnected => "disconnected",
            BusState::Connecting => "connecting",
            BusState::Listening => "listening",
            BusState::Closed => "closed",
        }
    }
}

pub struct NotificationBus {
    transport: Arc<dyn BusTransport>,
    channel: String,
    reconnect_delay: Duration,
    instance_id: String,
    state: watch::Sender<BusState>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationBus {
    pub fn new(
        transport: Arc<dyn BusTransport>,
        channel: impl Into<String>,
        reconnect_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(BusState::Disconnected);
        let (shutdown, _) = watch::channel(false);
        Self {
            transport,
            channel: channel.into(),
            reconnect_delay,
            instance_id: Uuid::new_v4().to_string(),
            state,
            shutdown,
            task: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn state(&self) -> BusState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<BusState> {
        self.state.subscribe()
    }

    /// Health check: true only while a subscription is live.
    pub fn is_listening(&self) -> bool {
        self.state() == BusState::Listening
    }

    /// Spawn the listener. At most one runs per bus; a stopped bus stays stopped.
    pub fn start(self: &Arc<Self>, server: Arc<RealtimeServer>) {
        let mut task = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if *self.shutdown.borrow() {
            warn!(channel = %self.channel, "bus: start after stop ignored");
            return;
        }
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!(channel = %self.channel, "bus: listener already running");
            return;
        }
        *task = Some(tokio::spawn(self.clone().run(server)));
    }

    /// Stop the listener and wait for it to release its connection.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!(channel = %self.channel, error = %e, "bus: listener task failed");
                }
            }
        }
        self.set_state(BusState::Closed);
    }

    /// Hand a notification to the channel for other processes.
    /// Does not wait for, or learn about, any receiver.
    pub async fn publish(
        &self,
        user_id: &str,
        notification: &FormattedNotification,
    ) -> anyhow::Result<()> {
        let message = BusMessage {
            event: NEW_NOTIFICATION_EVENT.to_string(),
            user_id: user_id.to_string(),
            notification: notification.clone(),
            origin: Some(self.instance_id.clone()),
        };
        let payload = serde_json::to_string(&message)?;
        self.transport.publish(&self.channel, &payload).await
    }

    async fn run(self: Arc<Self>, server: Arc<RealtimeServer>) {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            self.set_state(BusState::Connecting);
            let subscribed = tokio::select! {
                res = self.transport.subscribe(&self.channel) => res,
                _ = shutdown.changed() => break,
            };

            match subscribed {
                Ok(mut subscription) => {
                    self.set_state(BusState::Listening);
                    info!(channel = %self.channel, "bus: listening");
                    loop {
                        tokio::select! {
                            msg = subscription.recv() => match msg {
                                Ok(payload) => self.handle_payload(&payload, &server),
                                Err(e) => {
                                    warn!(channel = %self.channel, error = %e, "bus: subscription lost");
                                    break;
                                }
                            },
                            _ = shutdown.changed() => {
                                drop(subscription);
                                self.set_state(BusState::Closed);
                                info!(channel = %self.channel, "bus: closed");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(channel = %self.channel, error = %e, "bus: connect failed");
                }
            }

            self.set_state(BusState::Disconnected);
            METRICS.bus_reconnects.inc();
            info!(
                channel = %self.channel,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "bus: reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_state(BusState::Closed);
        info!(channel = %self.channel, "bus: closed");
    }

    /// Never panics on bad input: malformed payloads are logged and dropped.
    fn handle_payload(&self, payload: &str, server: &RealtimeServer) {
        let message: BusMessage = match serde_json::from_str(payload) {
            Ok(m) => m,
            Err(e) => {
                METRICS.bus_malformed.inc();
                warn!(channel = %self.channel, error = %e, "bus: dropping malformed payload");
                return;
            }
        };

        if message.event != NEW_NOTIFICATION_EVENT {
            debug!(event = %message.event, "bus: ignoring event");
            return;
        }
        if message.origin.as_deref() == Some(self.instance_id.as_str()) {
            return;
        }

        if let Delivery::Delivered(n) = server.push_to_user(&message.user_id, &message.notification) {
            METRICS
                .deliveries
                .with_label_values(&["bus"])
                .inc_by(n as u64);
        }
    }

    fn set_state(&self, next: BusState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(
                channel = %self.channel,
                from = previous.as_str(),
                to = next.as_str(),
                "bus: state change"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::format::{FormattedBody, GenericDetails};
    use crate::realtime::protocol::ServerMessage;
    use crate::realtime::registry::{ConnectionId, ConnectionRegistry};
    use tokio::sync::mpsc;

    fn payload() -> FormattedNotification {
        FormattedNotification {
            id: Uuid::new_v4(),
            timestamp: "01/01/2026, 00:00:00".into(),
            unread: true,
            body: FormattedBody::Default(GenericDetails::default()),
        }
    }

    fn server_with(user: &str) -> (Arc<RealtimeServer>, mpsc::UnboundedReceiver<ServerMessage>) {
        let server = Arc::new(RealtimeServer::new(
            Arc::new(ConnectionRegistry::new()),
            Duration::from_secs(5),
        ));
        let (tx, rx) = mpsc::unbounded_channel();
        server.authenticate(&ConnectionId::new(), user, tx).unwrap();
        (server, rx)
    }

    fn bus() -> NotificationBus {
        NotificationBus::new(
            Arc::new(MemoryTransport::new()),
            "notifications",
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_bus_message_wire_format() {
        let p = payload();
        let msg = BusMessage {
            event: NEW_NOTIFICATION_EVENT.into(),
            user_id: "user-1".into(),
            notification: p.clone(),
            origin: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["event"], "new_notification");
        assert_eq!(v["userId"], "user-1");
        assert_eq!(v["notification"]["type"], "default");
        assert!(v.get("origin").is_none());
    }

    #[test]
    fn test_foreign_message_is_pushed() {
        let bus = bus();
        let (server, mut rx) = server_with("user-1");
        let msg = BusMessage {
            event: NEW_NOTIFICATION_EVENT.into(),
            user_id: "user-1".into(),
            notification: payload(),
            origin: Some("another-process".into()),
        };
        bus.handle_payload(&serde_json::to_string(&msg).unwrap(), &server);
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Notification(_))));
    }

    #[test]
    fn test_own_message_is_skipped() {
        let bus = bus();
        let (server, mut rx) = server_with("user-1");
        let msg = BusMessage {
            event: NEW_NOTIFICATION_EVENT.into(),
            user_id: "user-1".into(),
            notification: payload(),
            origin: Some(bus.instance_id().to_string()),
        };
        bus.handle_payload(&serde_json::to_string(&msg).unwrap(), &server);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_other_events_and_garbage_are_dropped() {
        let bus = bus();
        let (server, mut rx) = server_with("user-1");
        let msg = BusMessage {
            event: "notification_deleted".into(),
            user_id: "user-1".into(),
            notification: payload(),
            origin: None,
        };
        bus.handle_payload(&serde_json::to_string(&msg).unwrap(), &server);
        bus.handle_payload("{not json", &server);
        bus.handle_payload(r#"{"event":"new_notification"}"#, &server);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_moves_to_closed() {
        let bus = Arc::new(bus());
        let (server, _rx) = server_with("user-1");
        bus.start(server);

        let mut state = bus.watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == BusState::Listening),
        )
        .await
        .unwrap()
        .unwrap();

        bus.stop().await;
        assert_eq!(bus.state(), BusState::Closed);
        assert!(!bus.is_listening());
    }
}
