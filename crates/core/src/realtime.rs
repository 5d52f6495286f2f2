// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

//! Realtime event channel
//!
//! A persistent, auto-reconnecting WebSocket to the management service's
//! `/ws` endpoint, with topic-keyed subscriber dispatch. Reconnection uses a
//! fixed interval, not exponential backoff.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::ConsoleConfig;
use crate::events::ConsoleEventHandler;
use crate::types::{ConnectionState, EventEnvelope};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Subscriber callback for one topic. Receives the envelope's `data` field.
pub type TopicCallback = Box<dyn FnMut(&Value) + Send>;

enum ChannelCmd {
    Subscribe {
        topic: String,
        callback: TopicCallback,
    },
    SetToken(String),
    Shutdown,
}

/// Topic-keyed subscriber registry with defined fan-out order.
///
/// Callbacks for a topic run in registration order; a panicking callback is
/// isolated so the rest of the fan-out still runs.
#[derive(Default)]
struct TopicRegistry {
    listeners: HashMap<String, Vec<TopicCallback>>,
}

impl TopicRegistry {
    fn add(&mut self, topic: String, callback: TopicCallback) {
        self.listeners.entry(topic).or_default().push(callback);
    }

    fn dispatch(&mut self, topic: &str, data: &Value) {
        let Some(callbacks) = self.listeners.get_mut(topic) else {
            return;
        };
        for callback in callbacks.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                tracing::warn!(topic, "Event subscriber panicked");
            }
        }
    }

    /// Parse an inbound frame and fan it out. Malformed payloads are logged
    /// and dropped; they never take the channel down.
    fn handle_message(&mut self, text: &str) {
        match serde_json::from_str::<EventEnvelope>(text) {
            Ok(envelope) => self.dispatch(&envelope.topic, &envelope.data),
            Err(e) => tracing::warn!("Failed to parse event message: {e}"),
        }
    }
}

/// Handle to the realtime event channel.
///
/// Cheap to clone. The background connection task keeps running until
/// [`shutdown`](Self::shutdown) is called or every handle is dropped.
#[derive(Clone)]
pub struct EventChannel {
    cmd_tx: mpsc::UnboundedSender<ChannelCmd>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl EventChannel {
    /// Spawn the connection task and begin connecting.
    ///
    /// `token` is the bearer credential attached to the upgrade request;
    /// rotate it with [`update_token`](Self::update_token).
    pub fn connect(
        config: &ConsoleConfig,
        token: Option<String>,
        handler: Arc<dyn ConsoleEventHandler>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let task = ChannelTask {
            ws_url: config.ws_url(),
            reconnect_interval: config.reconnect_interval(),
            token,
            registry: TopicRegistry::default(),
            handler,
            state_tx,
        };
        tokio::spawn(task.run(cmd_rx));

        Self { cmd_tx, state_rx }
    }

    /// Register a callback for a topic. Multiple registrations for the same
    /// topic accumulate and fire in registration order.
    pub fn on(&self, topic: &str, callback: impl FnMut(&Value) + Send + 'static) -> Result<()> {
        self.cmd_tx
            .send(ChannelCmd::Subscribe {
                topic: topic.to_string(),
                callback: Box::new(callback),
            })
            .map_err(|_| anyhow::anyhow!("Event channel task is not running"))
    }

    /// Update the credential used for future connection attempts.
    ///
    /// An open connection is left undisturbed; the rotated token applies
    /// from the next reconnect onward.
    pub fn update_token(&self, token: String) -> Result<()> {
        self.cmd_tx
            .send(ChannelCmd::SetToken(token))
            .map_err(|_| anyhow::anyhow!("Event channel task is not running"))
    }

    /// Stop the channel: close any open connection and cancel the reconnect
    /// loop. Terminal; create a new channel to reconnect after this.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(ChannelCmd::Shutdown);
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Watch receiver for state transitions (used by tests and status UIs)
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }
}

enum OpenOutcome {
    Lost,
    Shutdown,
}

struct ChannelTask {
    ws_url: String,
    reconnect_interval: std::time::Duration,
    token: Option<String>,
    registry: TopicRegistry,
    handler: Arc<dyn ConsoleEventHandler>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ChannelTask {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn apply_cmd_offline(&mut self, cmd: ChannelCmd) -> bool {
        match cmd {
            ChannelCmd::Subscribe { topic, callback } => {
                self.registry.add(topic, callback);
                true
            }
            ChannelCmd::SetToken(token) => {
                self.token = Some(token);
                true
            }
            ChannelCmd::Shutdown => false,
        }
    }

    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<ChannelCmd>) {
        loop {
            self.set_state(ConnectionState::Connecting);

            match Self::establish(&self.ws_url, self.token.as_deref()).await {
                Ok(mut ws) => {
                    tracing::info!("Event stream connected");
                    self.set_state(ConnectionState::Open);
                    self.handler.on_connection_changed(true);

                    let outcome = self.run_open(&mut ws, &mut cmd_rx).await;
                    self.handler.on_connection_changed(false);

                    if matches!(outcome, OpenOutcome::Shutdown) {
                        let _ = ws.close(None).await;
                        self.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    tracing::info!("Event stream disconnected");
                }
                Err(e) => {
                    tracing::warn!("Event stream connection failed: {e:#}");
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            if !self.wait_reconnect(&mut cmd_rx).await {
                self.set_state(ConnectionState::Disconnected);
                return;
            }
            tracing::info!("Attempting to reconnect event stream");
        }
    }

    /// Open the WebSocket, attaching the current bearer credential to the
    /// upgrade request.
    async fn establish(ws_url: &str, token: Option<&str>) -> Result<WsStream> {
        let mut request = ws_url
            .into_client_request()
            .map_err(|e| anyhow::anyhow!("Invalid event stream URL: {e}"))?;

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| anyhow::anyhow!("Invalid bearer token: {e}"))?;
            request.headers_mut().insert("Authorization", value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to event stream: {e}"))?;
        Ok(stream)
    }

    /// Service the open connection: dispatch inbound frames, answer pings,
    /// and keep accepting subscriber/token commands.
    async fn run_open(
        &mut self,
        ws: &mut WsStream,
        cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCmd>,
    ) -> OpenOutcome {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.apply_cmd_offline(cmd) {
                                return OpenOutcome::Shutdown;
                            }
                        }
                        // every handle dropped
                        None => return OpenOutcome::Shutdown,
                    }
                }
                frame = ws.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            self.registry.handle_message(&text);
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = ws.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_)))
                        | Some(Ok(Message::Binary(_)))
                        | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => {
                            return OpenOutcome::Lost;
                        }
                        Some(Err(e)) => {
                            tracing::warn!("Event stream error: {e}");
                            return OpenOutcome::Lost;
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the fixed reconnect interval while still servicing
    /// commands. Returns `false` if shutdown was requested.
    ///
    /// There is exactly one pending timer per connection loss: entering this
    /// wait is the only place a reconnect is ever scheduled.
    async fn wait_reconnect(&mut self, cmd_rx: &mut mpsc::UnboundedReceiver<ChannelCmd>) -> bool {
        let sleep = tokio::time::sleep(self.reconnect_interval);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if !self.apply_cmd_offline(cmd) {
                                return false;
                            }
                        }
                        None => return false,
                    }
                }
            }
        }
    }
}
