// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Realtime channel tests against a loopback WebSocket endpoint

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use tunnel_console_core::{
    coordinator, topics, ConnectionMode, ConnectionState, ConsoleConfig, ConsoleEventHandler,
    EventChannel, SessionEvent,
};

#[derive(Clone)]
enum ServerCmd {
    Send(String),
    Drop,
}

#[derive(Clone)]
struct WsState {
    cmd_tx: broadcast::Sender<ServerCmd>,
    connections: Arc<AtomicUsize>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

impl WsState {
    fn new() -> Self {
        let (cmd_tx, _) = broadcast::channel(64);
        Self {
            cmd_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            auth_headers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn send(&self, value: Value) {
        let _ = self.cmd_tx.send(ServerCmd::Send(value.to_string()));
    }

    fn send_raw(&self, text: &str) {
        let _ = self.cmd_tx.send(ServerCmd::Send(text.to_string()));
    }

    fn drop_connection(&self) {
        let _ = self.cmd_tx.send(ServerCmd::Drop);
    }
}

async fn ws_route(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    state.auth_headers.lock().unwrap().push(auth);
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: WsState) {
    state.connections.fetch_add(1, Ordering::SeqCst);
    let mut cmds = state.cmd_tx.subscribe();

    loop {
        tokio::select! {
            cmd = cmds.recv() => match cmd {
                Ok(ServerCmd::Send(text)) => {
                    if socket.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                // dropping the socket is an abrupt close, no close frame
                Ok(ServerCmd::Drop) | Err(_) => break,
            },
            frame = socket.recv() => match frame {
                Some(Ok(_)) => {}
                Some(Err(_)) | None => break,
            },
        }
    }
}

async fn spawn_ws_server(state: WsState) -> ConsoleConfig {
    let app = Router::new().route("/ws", get(ws_route)).with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    ConsoleConfig {
        connection_mode: ConnectionMode::Http,
        server_host: "127.0.0.1".to_string(),
        server_port: port,
        reconnect_interval_ms: 200,
    }
}

#[derive(Default)]
struct RecordingHandler {
    statuses: Mutex<Vec<bool>>,
    session_ended: AtomicUsize,
}

impl ConsoleEventHandler for RecordingHandler {
    fn on_session_ended(&self) {
        self.session_ended.fetch_add(1, Ordering::SeqCst);
    }

    fn on_connection_changed(&self, connected: bool) {
        self.statuses.lock().unwrap().push(connected);
    }
}

fn recording_callback(
    log: &Arc<Mutex<Vec<String>>>,
    tag: &str,
) -> impl FnMut(&Value) + Send + 'static {
    let log = Arc::clone(log);
    let tag = tag.to_string();
    move |data: &Value| {
        log.lock().unwrap().push(format!("{tag}:{}", data["seq"]));
    }
}

async fn wait_for_state(channel: &EventChannel, target: ConnectionState) {
    let mut rx = channel.state_watch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"))
        .expect("channel task is gone");
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give the channel task a moment to drain queued subscribe commands
/// before the server starts emitting frames.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn delivers_events_in_registration_order() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler);

    let log = Arc::new(Mutex::new(Vec::new()));
    channel
        .on(topics::SERVER_STATUS, recording_callback(&log, "a"))
        .unwrap();
    channel
        .on(topics::SERVER_STATUS, recording_callback(&log, "b"))
        .unwrap();
    channel
        .on(topics::CLIENT_STATUS, recording_callback(&log, "c"))
        .unwrap();

    wait_for_state(&channel, ConnectionState::Open).await;
    settle().await;

    state.send(json!({"type": "server_status", "data": {"seq": 1}}));
    state.send(json!({"type": "server_status", "data": {"seq": 2}}));
    state.send(json!({"type": "client_status", "data": {"seq": 3}}));

    wait_until(|| log.lock().unwrap().len() == 5, "all events dispatched").await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["a:1", "b:1", "a:2", "b:2", "c:3"]
    );

    channel.shutdown();
}

#[tokio::test]
async fn malformed_payloads_are_dropped_without_closing_the_channel() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler);

    let log = Arc::new(Mutex::new(Vec::new()));
    channel
        .on(topics::SERVER_STATUS, recording_callback(&log, "a"))
        .unwrap();

    wait_for_state(&channel, ConnectionState::Open).await;
    settle().await;

    state.send_raw("this is not json");
    state.send_raw(r#"{"data": {"seq": 0}}"#);
    state.send(json!({"type": "server_status", "data": {"seq": 1}}));

    wait_until(|| log.lock().unwrap().len() == 1, "valid event dispatched").await;
    assert_eq!(*log.lock().unwrap(), vec!["a:1"]);
    assert!(channel.is_connected());
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);

    channel.shutdown();
}

#[tokio::test]
async fn reconnects_once_after_the_fixed_interval() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler.clone());

    wait_for_state(&channel, ConnectionState::Open).await;
    wait_until(|| handler.statuses.lock().unwrap().clone() == vec![true], "status true").await;

    state.drop_connection();
    wait_for_state(&channel, ConnectionState::Reconnecting).await;
    let lost_at = Instant::now();

    wait_for_state(&channel, ConnectionState::Open).await;
    assert!(
        lost_at.elapsed() >= Duration::from_millis(150),
        "reconnect fired before the fixed interval elapsed"
    );

    wait_until(
        || handler.statuses.lock().unwrap().clone() == vec![true, false, true],
        "status flipped false then true",
    )
    .await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);

    channel.shutdown();
}

#[tokio::test]
async fn rotated_token_applies_to_the_next_attempt_only() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler);

    wait_for_state(&channel, ConnectionState::Open).await;
    channel.update_token("T2".to_string()).unwrap();
    settle().await;

    // the live socket is not disturbed by the rotation
    assert!(channel.is_connected());
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);

    state.drop_connection();
    wait_for_state(&channel, ConnectionState::Reconnecting).await;
    wait_for_state(&channel, ConnectionState::Open).await;

    assert_eq!(
        *state.auth_headers.lock().unwrap(),
        vec!["Bearer T1".to_string(), "Bearer T2".to_string()]
    );

    channel.shutdown();
}

#[tokio::test]
async fn shutdown_is_terminal() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler);

    wait_for_state(&channel, ConnectionState::Open).await;
    channel.shutdown();
    wait_for_state(&channel, ConnectionState::Disconnected).await;

    // well past the reconnect interval: no further attempts
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 1);
    assert_eq!(channel.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn coordinator_wires_session_events_to_the_channel() {
    let state = WsState::new();
    let config = spawn_ws_server(state.clone()).await;
    let handler = Arc::new(RecordingHandler::default());
    let channel = EventChannel::connect(&config, Some("T1".to_string()), handler.clone());

    wait_for_state(&channel, ConnectionState::Open).await;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let coordinator = coordinator::bind(events_rx, channel.clone(), handler.clone());

    // a refresh rotates the token used by future attempts
    events_tx
        .send(SessionEvent::TokenRefreshed("T2".to_string()))
        .unwrap();
    settle().await;
    assert!(channel.is_connected());

    state.drop_connection();
    wait_for_state(&channel, ConnectionState::Reconnecting).await;
    wait_for_state(&channel, ConnectionState::Open).await;
    assert_eq!(
        *state.auth_headers.lock().unwrap(),
        vec!["Bearer T1".to_string(), "Bearer T2".to_string()]
    );

    // session end stops the reconnect loop and signals the UI once
    events_tx.send(SessionEvent::Ended).unwrap();
    wait_for_state(&channel, ConnectionState::Disconnected).await;
    coordinator.await.unwrap();

    assert_eq!(handler.session_ended.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(state.connections.load(Ordering::SeqCst), 2);
}
