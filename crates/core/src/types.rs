// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Wire types shared between the session manager and the realtime channel

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topics carried on the realtime event stream.
///
/// Payloads are opaque to the core; subscribers interpret them.
pub mod topics {
    /// A managed server changed state (started, stopped, connection counts).
    pub const SERVER_STATUS: &str = "server_status";
    /// A managed client changed state.
    pub const CLIENT_STATUS: &str = "client_status";
    /// A tunnel connection was opened or closed.
    pub const CONNECTION_EVENT: &str = "connection_event";
    /// Server-side error broadcast.
    pub const ERROR: &str = "error";
}

/// Login request body for `POST /auth/login`.
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Login response: the bearer token plus the user profile blob.
///
/// The profile is kept opaque; the core only caches it alongside the token
/// and clears both together.
#[derive(Debug, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: Value,
}

/// Response from `POST /auth/refresh`.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub token: String,
}

/// Error body returned by the management API on failure responses.
#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

/// Envelope for every inbound realtime message: `{"type": ..., "data": ...}`.
///
/// `data` defaults to `null` for envelopes that omit it (e.g. pongs).
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

/// Realtime channel connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no reconnect pending (initial, or after shutdown).
    Disconnected,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected; inbound events are being dispatched.
    Open,
    /// Connection lost; a reconnect attempt is scheduled.
    Reconnecting,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_type_and_data() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"type": "server_status", "data": {"id": 3, "status": "running"}}"#)
                .unwrap();
        assert_eq!(env.topic, topics::SERVER_STATUS);
        assert_eq!(env.data["id"], 3);
    }

    #[test]
    fn test_envelope_data_defaults_to_null() {
        let env: EventEnvelope = serde_json::from_str(r#"{"type": "pong"}"#).unwrap();
        assert_eq!(env.topic, "pong");
        assert!(env.data.is_null());
    }

    #[test]
    fn test_envelope_rejects_missing_type() {
        assert!(serde_json::from_str::<EventEnvelope>(r#"{"data": 1}"#).is_err());
    }
}
