// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Error types surfaced by the session manager's request capability

use thiserror::Error;

/// Maximum length of a server-provided error message carried in an error
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Errors returned to callers of [`SessionManager::request`].
///
/// Only `SessionExpired` tears the session down, and that teardown happens
/// exactly once no matter how many in-flight requests observe it.
/// `Transport` and `Server` leave the session untouched.
///
/// [`SessionManager::request`]: crate::session::SessionManager::request
#[derive(Error, Debug)]
pub enum ApiError {
    /// No credential is held and the endpoint requires one.
    #[error("Not logged in")]
    Unauthenticated,

    /// The server rejected the credential (401) or a token refresh failed.
    #[error("Session expired")]
    SessionExpired,

    /// Network-level failure. The session is left intact; the next natural
    /// trigger (user action or scheduled refresh) retries.
    #[error("Network error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx, non-401 response. Carries the server's own error message
    /// when the body provides one.
    #[error("{message}")]
    Server { status: u16, message: String },
}

impl ApiError {
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            format!(
                "{}... (truncated, {} total bytes)",
                &body[..MAX_ERROR_BODY_LENGTH],
                body.len()
            )
        }
    }

    /// Build the error for a non-2xx, non-401 response.
    ///
    /// The body is expected to be `{"error": "..."}`; anything else degrades
    /// to a generic `HTTP <status>` message.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<crate::types::ErrorBody>(body)
            .map(|e| Self::truncate_body(&e.error))
            .unwrap_or_else(|_| format!("HTTP {}", status.as_u16()));

        ApiError::Server {
            status: status.as_u16(),
            message,
        }
    }
}
