//! Realtime client: the subscriber side of `/ws`.
//!
//! ```text
//! IDLE (no session) → CONNECTING → CONNECTED ─(socket lost)→ RECONNECTING → CONNECTED
//!                                         any ─(session gone)→ IDLE
//! ```
//!
//! The client authenticates with an explicit `authenticate` frame right after
//! the socket opens and counts as connected only once the server acks with
//! `connected`. Incoming notifications are kept in memory, newest first;
//! nothing is persisted client-side. Reconnects use a fixed delay, unbounded,
//! for as long as a session exists. Dropping the client or calling
//! `shutdown()` cancels any pending reconnect.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::notification::format::FormattedNotification;
use crate::realtime::protocol::{ClientMessage, Connected, ServerMessage};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// e.g. `ws://localhost:8080/ws`
    pub ws_url: String,
    /// e.g. `http://localhost:8080/api/v1`
    pub api_url: String,
    pub admin_key: Option<String>,
    pub reconnect_delay: Duration,
    /// Bound on opening the socket and on waiting for the `connected` ack.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    pub fn new(ws_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            api_url: api_url.into(),
            admin_key: None,
            reconnect_delay: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// The authenticated user the client connects as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
}

impl Session {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

struct Shared {
    state: watch::Sender<ClientState>,
    notifications: Mutex<VecDeque<FormattedNotification>>,
    last_message: watch::Sender<Option<FormattedNotification>>,
}

impl Shared {
    fn set_state(&self, next: ClientState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = ?previous, to = ?next, "client: state change");
        }
    }

    fn list(&self) -> MutexGuard<'_, VecDeque<FormattedNotification>> {
        self.notifications
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn receive(&self, notification: FormattedNotification) {
        debug!(notification_id = %notification.id, "client: notification received");
        self.list().push_front(notification.clone());
        self.last_message.send_replace(Some(notification));
    }
}

pub struct RealtimeClient {
    shared: Arc<Shared>,
    sessions: watch::Receiver<Option<Session>>,
    config: ClientConfig,
    http: reqwest::Client,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeClient {
    /// Start following `sessions`. Must be called inside a tokio runtime.
    /// Dropping the session sender counts as a permanent logout.
    pub fn spawn(config: ClientConfig, sessions: watch::Receiver<Option<Session>>) -> Self {
        let (state, _) = watch::channel(ClientState::Idle);
        let (last_message, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            state,
            notifications: Mutex::new(VecDeque::new()),
            last_message,
        });
        let (shutdown, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run(
            shared.clone(),
            config.clone(),
            sessions.clone(),
            shutdown_rx,
        ));

        Self {
            shared,
            sessions,
            config,
            http: reqwest::Client::new(),
            shutdown,
            task: Some(task),
        }
    }

    pub fn state(&self) -> ClientState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ClientState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ClientState::Connected
    }

    /// Received notifications, newest first.
    pub fn notifications(&self) -> Vec<FormattedNotification> {
        self.shared.list().iter().cloned().collect()
    }

    pub fn last_message(&self) -> Option<FormattedNotification> {
        self.shared.last_message.borrow().clone()
    }

    pub fn watch_last_message(&self) -> watch::Receiver<Option<FormattedNotification>> {
        self.shared.last_message.subscribe()
    }

    /// Local only; the server is not told.
    pub fn clear_notifications(&self) {
        self.shared.list().clear();
    }

    /// Mark one notification read in the store, then locally.
    pub async fn mark_read(&self, id: Uuid) -> anyhow::Result<()> {
        let user = self.current_user()?;
        let id_str = id.to_string();
        let url = self.api_url(&["users", &user, "notifications", &id_str, "read"])?;
        self.post(url).await?;

        for n in self.shared.list().iter_mut().filter(|n| n.id == id) {
            n.unread = false;
        }
        Ok(())
    }

    /// Mark every notification of the session user read, then locally.
    pub async fn mark_all_read(&self) -> anyhow::Result<()> {
        let user = self.current_user()?;
        let url = self.api_url(&["users", &user, "notifications", "read-all"])?;
        self.post(url).await?;

        for n in self.shared.list().iter_mut() {
            n.unread = false;
        }
        Ok(())
    }

    /// Tear down the connection and wait for the background task to exit.
    pub async fn shutdown(mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.shared.set_state(ClientState::Idle);
    }

    fn current_user(&self) -> anyhow::Result<String> {
        self.sessions
            .borrow()
            .as_ref()
            .map(|s| s.user_id.clone())
            .ok_or_else(|| anyhow!("no active session"))
    }

    fn api_url(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid api_url '{}'", self.config.api_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("api_url cannot be a base"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post(&self, url: Url) -> anyhow::Result<()> {
        let mut req = self.http.post(url.clone());
        if let Some(key) = &self.config.admin_key {
            req = req.header("x-admin-key", key);
        }
        req.send()
            .await
            .with_context(|| format!("POST {} failed", url))?
            .error_for_status()
            .with_context(|| format!("POST {} rejected", url))?;
        Ok(())
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    config: ClientConfig,
    mut sessions: watch::Receiver<Option<Session>>,
    mut shutdown: watch::Receiver<bool>,
) {
    'sessions: loop {
        if *shutdown.borrow() {
            break;
        }
        if sessions.has_changed().is_err() {
            // session source is gone: permanent logout
            break;
        }

        let current = sessions.borrow_and_update().clone();
        let session = match current {
            Some(session) => session,
            None => {
                shared.set_state(ClientState::Idle);
                tokio::select! {
                    changed = sessions.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = shutdown.changed() => break,
                }
                continue;
            }
        };

        let mut next_state = ClientState::Connecting;
        loop {
            shared.set_state(next_state);
            tokio::select! {
                result = connect_and_listen(&shared, &config, &session) => {
                    let reason = match result {
                        Ok(()) => "server closed the connection".to_string(),
                        Err(e) => format!("{:#}", e),
                    };
                    warn!(user_id = %session.user_id, reason = %reason, "client: disconnected");
                }
                _ = session_ended(&mut sessions, &session) => {
                    info!(user_id = %session.user_id, "client: session ended, closing connection");
                    continue 'sessions;
                }
                _ = shutdown.changed() => break 'sessions,
            }

            next_state = ClientState::Reconnecting;
            shared.set_state(next_state);
            debug!(
                delay_ms = config.reconnect_delay.as_millis() as u64,
                "client: reconnecting after delay"
            );
            tokio::select! {
                _ = tokio::time::sleep(config.reconnect_delay) => {}
                _ = session_ended(&mut sessions, &session) => continue 'sessions,
                _ = shutdown.changed() => break 'sessions,
            }
        }
    }

    shared.set_state(ClientState::Idle);
}

/// Resolves once the session differs from `current` (logout, user switch) or
/// the session source is dropped.
async fn session_ended(sessions: &mut watch::Receiver<Option<Session>>, current: &Session) {
    loop {
        if sessions.changed().await.is_err() {
            return;
        }
        if sessions.borrow_and_update().as_ref() != Some(current) {
            return;
        }
    }
}

/// One connection lifetime. Returns when the socket is gone.
async fn connect_and_listen(
    shared: &Shared,
    config: &ClientConfig,
    session: &Session,
) -> anyhow::Result<()> {
    let (ws, _) = tokio::time::timeout(
        config.connect_timeout,
        tokio_tungstenite::connect_async(config.ws_url.as_str()),
    )
    .await
    .map_err(|_| anyhow!("connect to {} timed out", config.ws_url))?
    .with_context(|| format!("connect to {} failed", config.ws_url))?;
    let (mut sink, mut stream) = ws.split();

    sink.send(WsMessage::Text(
        ClientMessage::authenticate(session.user_id.as_str()).to_json(),
    ))
    .await
    .context("failed to send authenticate")?;

    let ack = tokio::time::timeout(config.connect_timeout, wait_for_ack(shared, &mut stream))
        .await
        .map_err(|_| anyhow!("no connected ack within {:?}", config.connect_timeout))??;

    let Connected {
        connection_id,
        user_id,
    } = ack;
    shared.set_state(ClientState::Connected);
    info!(user_id = %user_id, connection_id = %connection_id, "client: connected");

    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => match ServerMessage::parse(&text) {
                Ok(ServerMessage::Notification(n)) => shared.receive(n),
                Ok(ServerMessage::Connected(_)) => {}
                Ok(ServerMessage::Error { message }) => {
                    warn!(error = %message, "client: server reported an error")
                }
                Err(e) => debug!(error = %e, "client: ignoring unrecognised frame"),
            },
            WsMessage::Close(frame) => {
                debug!(frame = ?frame, "client: close frame received");
                break;
            }
            _ => {}
        }
    }
    Ok(())
}

async fn wait_for_ack<S>(shared: &Shared, stream: &mut S) -> anyhow::Result<Connected>
where
    S: Stream<Item = Result<WsMessage, WsError>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        match frame? {
            WsMessage::Text(text) => match ServerMessage::parse(&text) {
                Ok(ServerMessage::Connected(ack)) => return Ok(ack),
                Ok(ServerMessage::Error { message }) => {
                    anyhow::bail!("server rejected authenticate: {}", message)
                }
                Ok(ServerMessage::Notification(n)) => shared.receive(n),
                Err(e) => debug!(error = %e, "client: ignoring unrecognised frame"),
            },
            WsMessage::Close(frame) => anyhow::bail!("closed during handshake: {:?}", frame),
            _ => {}
        }
    }
    anyhow::bail!("connection closed during handshake")
}
