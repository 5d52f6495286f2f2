// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Console client configuration
// Where the management service lives and how to reach it

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// REST path prefix on the management service.
pub const API_PREFIX: &str = "/api/v1";

/// Connection mode for console to service communication
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// HTTP (testing/localhost only, no TLS)
    Http,
    /// HTTPS with TLS (network-ready, secure)
    Https,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        ConnectionMode::Http
    }
}

/// Configuration for connecting to the management service
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    /// Connection mode (Http or Https)
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// Service host (e.g., "127.0.0.1" or "tunnels.example.com")
    #[serde(default = "default_server_host")]
    pub server_host: String,

    /// Service port
    #[serde(default = "default_server_port")]
    pub server_port: u16,

    /// Delay between realtime reconnect attempts, in milliseconds.
    /// Fixed interval; there is no backoff.
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    3000
}

fn default_reconnect_interval_ms() -> u64 {
    5000
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            connection_mode: ConnectionMode::default(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

/// Format host and port, bracketing bare IPv6 addresses
fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

impl ConsoleConfig {
    /// Base URL of the management service (scheme from connection_mode)
    pub fn base_url(&self) -> String {
        let host_port = format_host_port(&self.server_host, self.server_port);
        match self.connection_mode {
            ConnectionMode::Http => format!("http://{}", host_port),
            ConnectionMode::Https => format!("https://{}", host_port),
        }
    }

    /// Full URL for a REST endpoint path (path is relative to `/api/v1`)
    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url(), API_PREFIX, path)
    }

    /// WebSocket URL for the realtime event stream.
    /// The scheme follows the REST scheme: http maps to ws, https to wss.
    pub fn ws_url(&self) -> String {
        let host_port = format_host_port(&self.server_host, self.server_port);
        match self.connection_mode {
            ConnectionMode::Http => format!("ws://{}/ws", host_port),
            ConnectionMode::Https => format!("wss://{}/ws", host_port),
        }
    }

    /// Reconnect interval as a `Duration`
    pub fn reconnect_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.reconnect_interval_ms)
    }
}

/// Get the console config file path
pub fn config_file_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join("tunnel-console").join("console.toml"))
}

/// Load console configuration from the config file.
/// Returns the default configuration if no file exists.
pub fn load_config() -> Result<ConsoleConfig> {
    let config_path = config_file_path()?;

    if !config_path.exists() {
        return Ok(ConsoleConfig::default());
    }

    let contents = std::fs::read_to_string(&config_path)
        .context("Failed to read console config file")?;

    let config: ConsoleConfig =
        toml::from_str(&contents).context("Failed to parse console config file")?;

    Ok(config)
}

/// Save console configuration to the config file
pub fn save_config(config: &ConsoleConfig) -> Result<()> {
    let config_path = config_file_path()?;

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create config directory")?;
    }

    let toml_content =
        toml::to_string_pretty(config).context("Failed to serialize configuration")?;

    std::fs::write(&config_path, toml_content).context("Failed to write configuration file")?;

    Ok(())
}
