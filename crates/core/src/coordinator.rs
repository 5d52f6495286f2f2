// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Coordinator
// Binds session lifecycle events to the realtime channel and the UI signal

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::events::ConsoleEventHandler;
use crate::realtime::EventChannel;
use crate::session::SessionEvent;

/// Wire the session manager's lifecycle events to the realtime channel.
///
/// A rotated credential is handed to the channel for its future connection
/// attempts; a live socket is never force-dropped over a token rotation.
/// Session end stops the channel's reconnect loop and emits the single
/// UI-facing logged-out signal.
pub fn bind(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    channel: EventChannel,
    handler: Arc<dyn ConsoleEventHandler>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::TokenRefreshed(token) => {
                    if let Err(e) = channel.update_token(token) {
                        tracing::warn!("Could not hand rotated token to event channel: {e}");
                    }
                }
                SessionEvent::Ended => {
                    channel.shutdown();
                    handler.on_session_ended();
                    break;
                }
            }
        }
    })
}
