// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Session manager
// Owns the bearer credential: acquisition, proactive refresh, teardown

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::config::ConsoleConfig;
use crate::error::ApiError;
use crate::store::SessionStore;
use crate::token;
use crate::types::{LoginRequest, LoginResponse, RefreshResponse};

/// Lifecycle events consumed by the coordinator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The credential was rotated; the realtime channel should use the new
    /// token on its next connection attempt.
    TokenRefreshed(String),
    /// The session ended. Emitted exactly once per session, no matter how
    /// many concurrent requests observed the expiry.
    Ended,
}

struct SessionState {
    /// The single current credential. `None` means unauthenticated; taking
    /// it is what makes teardown exactly-once.
    token: Option<Zeroizing<String>>,
    /// The one outstanding refresh timer. Re-arming always aborts the
    /// previous handle first.
    refresh_task: Option<JoinHandle<()>>,
}

struct SessionShared {
    config: ConsoleConfig,
    http: Client,
    store: SessionStore,
    state: Mutex<SessionState>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

/// Manages the session credential lifecycle and exposes the authenticated
/// request capability.
///
/// Cheap to clone; clones share the same credential slot.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionShared>,
}

impl SessionManager {
    /// Create a manager plus the lifecycle event stream the coordinator
    /// consumes.
    pub fn new(
        config: ConsoleConfig,
        store: SessionStore,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>)> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let manager = Self {
            inner: Arc::new(SessionShared {
                config,
                http,
                store,
                state: Mutex::new(SessionState {
                    token: None,
                    refresh_task: None,
                }),
                events_tx,
            }),
        };

        Ok((manager, events_rx))
    }

    /// Restore a persisted session on process start.
    ///
    /// Returns whether a credential was found. Arms the refresh timer when
    /// the restored token carries a decodable expiry.
    pub fn bootstrap(&self) -> Result<bool> {
        let Some(stored) = self.inner.store.load_token()? else {
            return Ok(false);
        };

        {
            let mut state = self.inner.state.lock().unwrap();
            state.token = Some(Zeroizing::new(stored));
        }
        self.schedule_refresh();
        Ok(true)
    }

    /// Whether a credential is currently held
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().unwrap().token.is_some()
    }

    /// Whether a proactive refresh timer is currently armed
    pub fn refresh_scheduled(&self) -> bool {
        self.inner.state.lock().unwrap().refresh_task.is_some()
    }

    /// Snapshot of the current bearer token, for seeding the realtime
    /// channel's connection attempts
    pub fn current_token(&self) -> Option<String> {
        self.inner
            .state
            .lock()
            .unwrap()
            .token
            .as_ref()
            .map(|t| t.to_string())
    }

    /// The cached user profile from the last login, if any
    pub fn cached_profile(&self) -> Option<Value> {
        self.inner.store.load_profile()
    }

    /// Authenticate against `POST /auth/login`, install the credential, and
    /// arm the refresh timer. Returns the user profile blob.
    pub async fn login(&self, username: &str, password: &str) -> Result<Value, ApiError> {
        let url = self.inner.config.api_url("/auth/login");
        let response = self
            .inner
            .http
            .post(&url)
            .json(&LoginRequest {
                username: username.to_string(),
                password: password.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let login: LoginResponse = response.json().await?;

        {
            let mut state = self.inner.state.lock().unwrap();
            state.token = Some(Zeroizing::new(login.token.clone()));
        }
        if let Err(e) = self.inner.store.save_token(&login.token) {
            tracing::warn!("Failed to persist session token: {e:#}");
        }
        if let Err(e) = self.inner.store.save_profile(&login.user) {
            tracing::warn!("Failed to cache user profile: {e:#}");
        }
        self.schedule_refresh();

        tracing::info!(username, "Logged in");
        Ok(login.user)
    }

    /// Best-effort server-side logout, then local teardown.
    pub async fn logout(&self) {
        if let Some(token) = self.current_token() {
            let url = self.inner.config.api_url("/auth/logout");
            if let Err(e) = self.inner.http.post(&url).bearer_auth(&token).send().await {
                tracing::debug!("Logout request failed: {e}");
            }
        }
        self.end_session();
    }

    /// Issue an authenticated request against the management API.
    ///
    /// `path` is relative to the API prefix. A `204` yields `Ok(None)`;
    /// any other success yields the parsed JSON body.
    ///
    /// A `401` tears the session down (exactly once across concurrent
    /// requests) and surfaces as [`ApiError::SessionExpired`]. Network
    /// failures surface as [`ApiError::Transport`] and leave the session
    /// intact.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, ApiError> {
        let token = self.current_token().ok_or(ApiError::Unauthenticated)?;

        let url = self.inner.config.api_url(path);
        let mut request = self.inner.http.request(method, &url).bearer_auth(&token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(path, "Request rejected with 401; ending session");
            self.end_session();
            return Err(ApiError::SessionExpired);
        }

        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &body));
        }

        let value = response.json().await?;
        Ok(Some(value))
    }

    /// Fetch the current user profile from `GET /auth/me` and refresh the
    /// cached copy.
    pub async fn fetch_profile(&self) -> Result<Value, ApiError> {
        let profile = self
            .request(Method::GET, "/auth/me", None)
            .await?
            .unwrap_or(Value::Null);

        if let Err(e) = self.inner.store.save_profile(&profile) {
            tracing::warn!("Failed to cache user profile: {e:#}");
        }
        Ok(profile)
    }

    /// Arm the proactive refresh timer for the current credential.
    ///
    /// Always cancels a previously armed timer first, so at most one is
    /// outstanding. A credential with no decodable expiry arms nothing.
    pub fn schedule_refresh(&self) {
        let mut state = self.inner.state.lock().unwrap();

        if let Some(handle) = state.refresh_task.take() {
            handle.abort();
        }

        let delay = state
            .token
            .as_ref()
            .and_then(|token| token::time_until_refresh(token, Utc::now()));

        let Some(delay) = delay else {
            return;
        };

        tracing::info!("Token will be refreshed in {} seconds", delay.as_secs());

        let manager = self.clone();
        state.refresh_task = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            manager.refresh().await;
        }));
    }

    /// Rotate the credential via `POST /auth/refresh`.
    ///
    /// On success the new token replaces the old one atomically, the timer
    /// is re-armed, and the coordinator is notified. Any failure, transport
    /// or non-2xx, ends the session; recovery is a fresh login.
    pub async fn refresh(&self) {
        let Some(token) = self.current_token() else {
            return;
        };

        tracing::info!("Refreshing session token");
        let url = self.inner.config.api_url("/auth/refresh");
        let result = self.inner.http.post(&url).bearer_auth(&token).send().await;

        let new_token = match result {
            Ok(response) if response.status().is_success() => {
                match response.json::<RefreshResponse>().await {
                    Ok(refreshed) => refreshed.token,
                    Err(e) => {
                        tracing::warn!("Token refresh returned an unreadable body: {e}");
                        self.end_session();
                        return;
                    }
                }
            }
            Ok(response) => {
                tracing::warn!("Token refresh failed: HTTP {}", response.status().as_u16());
                self.end_session();
                return;
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {e}");
                self.end_session();
                return;
            }
        };

        {
            let mut state = self.inner.state.lock().unwrap();
            // The session may have ended while the call was in flight;
            // a late result must not resurrect it.
            if state.token.is_none() {
                return;
            }
            state.token = Some(Zeroizing::new(new_token.clone()));
        }

        if let Err(e) = self.inner.store.save_token(&new_token) {
            tracing::warn!("Failed to persist refreshed token: {e:#}");
        }
        self.schedule_refresh();
        let _ = self
            .inner
            .events_tx
            .send(SessionEvent::TokenRefreshed(new_token));

        tracing::info!("Session token refreshed");
    }

    /// Tear the session down: drop the credential, cancel the refresh
    /// timer, clear the store, and emit [`SessionEvent::Ended`].
    ///
    /// Idempotent: taking the credential slot is the once-only gate, so
    /// concurrent 401s collapse into a single signal.
    pub fn end_session(&self) {
        let had_session = {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(handle) = state.refresh_task.take() {
                handle.abort();
            }
            state.token.take().is_some()
        };

        if !had_session {
            return;
        }

        if let Err(e) = self.inner.store.clear() {
            tracing::warn!("Failed to clear session store: {e:#}");
        }
        let _ = self.inner.events_tx.send(SessionEvent::Ended);
        tracing::info!("Session ended");
    }
}
