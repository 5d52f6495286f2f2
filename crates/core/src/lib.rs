// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

//! Framework-agnostic core for the tunnel management console
//!
//! This crate owns the session/token lifecycle (login, proactive refresh,
//! teardown) and the resilient realtime event channel that keeps a
//! management UI synchronized with server-side state changes. UI layers
//! sit on top of it: they issue authenticated requests through
//! [`SessionManager`], subscribe to named event topics on [`EventChannel`],
//! and receive lifecycle signals through [`ConsoleEventHandler`].

pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod realtime;
pub mod session;
pub mod store;
pub mod token;
pub mod types;

pub use config::{load_config, save_config, ConnectionMode, ConsoleConfig};
pub use error::ApiError;
pub use events::ConsoleEventHandler;
pub use realtime::{EventChannel, TopicCallback};
pub use session::{SessionEvent, SessionManager};
pub use store::SessionStore;
pub use types::{topics, ConnectionState, EventEnvelope};

// Re-export commonly used external types
pub use reqwest::Method;
pub use serde_json::Value;
