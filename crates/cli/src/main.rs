// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Tunnel Console - CLI Client
// Command-line collaborator for the tunnel management service

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dialoguer::Password;

use tunnel_console_core::{
    config, coordinator, topics, ApiError, ConsoleEventHandler, EventChannel, Method,
    SessionManager, SessionStore, Value,
};

#[derive(Parser)]
#[command(name = "tunnel-console")]
#[command(about = "Control console for the tunnel management service", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in and store the session credential
    Login {
        /// Username on the management service
        username: String,

        /// Password (prompted interactively when omitted)
        #[arg(short, long)]
        password: Option<String>,
    },

    /// End the current session
    Logout,

    /// Show the signed-in user's profile
    Me,

    /// Issue a raw request against the management API
    Request {
        /// HTTP method (GET, POST, PUT, DELETE, ...)
        method: String,

        /// Endpoint path relative to /api/v1, e.g. /servers
        path: String,

        /// JSON request body
        #[arg(short, long)]
        body: Option<String>,
    },

    /// Stream realtime events to stdout until interrupted
    Watch {
        /// Topics to subscribe to (default: all known topics)
        #[arg(short, long)]
        topic: Vec<String>,
    },
}

/// Prints lifecycle signals to the terminal
struct ConsoleSignals;

impl ConsoleEventHandler for ConsoleSignals {
    fn on_session_ended(&self) {
        println!("{}", "Session ended - please log in again".red());
    }

    fn on_connection_changed(&self, connected: bool) {
        if connected {
            println!("{}", "event stream connected".green());
        } else {
            println!("{}", "event stream disconnected".yellow());
        }
    }
}

fn require_session(session: &SessionManager) -> Result<()> {
    if !session.bootstrap()? {
        anyhow::bail!("Not logged in. Run `tunnel-console login <username>` first.");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = config::load_config()?;
    let store = SessionStore::open_default()?;
    let (session, events) = SessionManager::new(config.clone(), store)?;

    match cli.command {
        Commands::Login { username, password } => {
            let password = match password {
                Some(p) => p,
                None => Password::new()
                    .with_prompt("Password")
                    .interact()
                    .context("Failed to read password")?,
            };

            let user = session
                .login(&username, &password)
                .await
                .map_err(|e| anyhow::anyhow!("Login failed: {e}"))?;

            let name = user
                .get("display_name")
                .and_then(|v| v.as_str())
                .unwrap_or(&username)
                .to_string();
            println!("{} Logged in as {}", "✓".green(), name.bold());
        }

        Commands::Logout => {
            if session.bootstrap()? {
                session.logout().await;
                println!("Logged out");
            } else {
                println!("No active session");
            }
        }

        Commands::Me => {
            require_session(&session)?;
            let profile = session.fetch_profile().await?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }

        Commands::Request { method, path, body } => {
            require_session(&session)?;

            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .context("Invalid HTTP method")?;
            let body: Option<Value> = body
                .map(|b| serde_json::from_str(&b))
                .transpose()
                .context("Request body is not valid JSON")?;

            match session.request(method, &path, body.as_ref()).await {
                Ok(Some(value)) => println!("{}", serde_json::to_string_pretty(&value)?),
                Ok(None) => println!("{}", "OK (no content)".dimmed()),
                Err(ApiError::SessionExpired) => {
                    anyhow::bail!("Session expired. Run `tunnel-console login <username>` again.")
                }
                Err(e) => return Err(e.into()),
            }
        }

        Commands::Watch { topic } => {
            require_session(&session)?;

            let handler: Arc<dyn ConsoleEventHandler> = Arc::new(ConsoleSignals);
            let channel = EventChannel::connect(&config, session.current_token(), handler.clone());

            let topic_list = if topic.is_empty() {
                vec![
                    topics::SERVER_STATUS.to_string(),
                    topics::CLIENT_STATUS.to_string(),
                    topics::CONNECTION_EVENT.to_string(),
                    topics::ERROR.to_string(),
                ]
            } else {
                topic
            };

            for name in &topic_list {
                let tag = name.clone();
                channel.on(name, move |data| {
                    println!("{} {}", tag.cyan(), data);
                })?;
            }

            let _coordinator = coordinator::bind(events, channel.clone(), handler);

            println!("Watching events - press Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            channel.shutdown();
        }
    }

    Ok(())
}
