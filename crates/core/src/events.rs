// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

//! UI-facing signal trait

/// Framework-agnostic signal sink for the console core.
///
/// The UI collaborator (web view, TUI, CLI) implements this trait to react
/// to lifecycle changes. Topic-level events are delivered separately through
/// [`EventChannel::on`] subscriptions.
///
/// [`EventChannel::on`]: crate::realtime::EventChannel::on
pub trait ConsoleEventHandler: Send + Sync {
    /// Called exactly once when the session ends (token rejected, refresh
    /// failed, or explicit logout). The UI is expected to navigate to its
    /// login surface.
    fn on_session_ended(&self);

    /// Called when the realtime connection comes up or drops, for a
    /// status-indicator flip. Reconnection itself is automatic.
    fn on_connection_changed(&self, connected: bool);
}
