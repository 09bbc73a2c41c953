//! Shared harness: real axum servers on 127.0.0.1:0 wired to in-memory
//! store and bus, plus a raw WebSocket client.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use notifier::app::{router, AppState};
use notifier::bus::{BusState, MemoryTransport, NotificationBus};
use notifier::realtime::protocol::{ClientMessage, ServerMessage};
use notifier::realtime::{ConnectionRegistry, RealtimeServer};
use notifier::store::memory::MemoryStore;

pub const ADMIN_KEY: &str = "test-admin-key";
pub const CHANNEL: &str = "notifications";

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One server "process".
pub struct Node {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub bus: Arc<NotificationBus>,
}

impl Node {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn api_url(&self) -> String {
        format!("http://{}/api/v1", self.addr)
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

pub async fn spawn_node(store: &MemoryStore, transport: &MemoryTransport) -> Node {
    spawn_node_with(store, transport, Duration::from_secs(5), None).await
}

/// `bind` reuses a known address (for clients started before the server).
pub async fn spawn_node_with(
    store: &MemoryStore,
    transport: &MemoryTransport,
    handshake_timeout: Duration,
    bind: Option<SocketAddr>,
) -> Node {
    let realtime = Arc::new(RealtimeServer::new(
        Arc::new(ConnectionRegistry::new()),
        handshake_timeout,
    ));
    let bus = Arc::new(NotificationBus::new(
        Arc::new(transport.clone()),
        CHANNEL,
        Duration::from_millis(50),
    ));
    bus.start(realtime.clone());
    wait_for_bus(&bus, BusState::Listening).await;

    let state = Arc::new(
        AppState::new(Arc::new(store.clone()), realtime, Some(bus.clone()))
            .with_admin_key(Some(ADMIN_KEY.to_string())),
    );
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind.unwrap_or_else(|| ([127, 0, 0, 1], 0).into()))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Node { addr, state, bus }
}

pub async fn wait_for_bus(bus: &NotificationBus, target: BusState) {
    let mut state = bus.watch_state();
    tokio::time::timeout(Duration::from_secs(3), state.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("bus never reached {:?}", target))
        .unwrap();
}

pub async fn open_socket(node: &Node) -> Socket {
    let (socket, _) = tokio_tungstenite::connect_async(node.ws_url())
        .await
        .unwrap();
    socket
}

/// Connect and complete the handshake as `user_id`.
pub async fn connect_as(node: &Node, user_id: &str) -> Socket {
    let mut socket = open_socket(node).await;
    send_authenticate(&mut socket, user_id).await;
    match next_server_message(&mut socket).await {
        ServerMessage::Connected(ack) => assert_eq!(ack.user_id, user_id),
        other => panic!("expected connected, got {:?}", other),
    }
    socket
}

pub async fn send_authenticate(socket: &mut Socket, user_id: &str) {
    socket
        .send(Message::Text(ClientMessage::authenticate(user_id).to_json()))
        .await
        .unwrap();
}

pub async fn next_message(socket: &mut Socket) -> Message {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

pub async fn next_server_message(socket: &mut Socket) -> ServerMessage {
    match next_message(socket).await {
        Message::Text(text) => ServerMessage::parse(&text).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

/// Asserts nothing but pings arrive within `window`.
pub async fn assert_silent(socket: &mut Socket, window: Duration) {
    let deadline = tokio::time::Instant::now() + window;
    loop {
        match tokio::time::timeout_at(deadline, socket.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {:?}", other),
        }
    }
}

pub async fn post_notification(
    node: &Node,
    user_id: &str,
    kind: &str,
    content: serde_json::Value,
) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{}/notifications", node.api_url()))
        .header("x-admin-key", ADMIN_KEY)
        .json(&serde_json::json!({ "userId": user_id, "type": kind, "content": content }))
        .send()
        .await
        .unwrap()
}

pub fn team_content() -> serde_json::Value {
    serde_json::json!({
        "teamId": "t1",
        "teamName": "Eng",
        "projectId": "p1",
        "projectName": "Acme",
        "senderName": "Ana"
    })
}
