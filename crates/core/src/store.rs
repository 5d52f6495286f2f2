// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Tunnel Console Contributors

// Durable session store
// Two entries, cleared together: the bearer token and the cached user profile

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::Value;

const TOKEN_FILE: &str = "session.token";
const PROFILE_FILE: &str = "profile.json";

/// On-disk store for the session credential and the cached user profile.
///
/// This is an unconditional byte store: nothing here validates the token.
/// The session manager is the only component that reads or writes it.
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Store rooted in the user's config directory
    pub fn open_default() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(Self::new(config_dir.join("tunnel-console")))
    }

    fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    fn profile_path(&self) -> PathBuf {
        self.dir.join(PROFILE_FILE)
    }

    /// Load the stored bearer token, if any
    pub fn load_token(&self) -> Result<Option<String>> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(None);
        }

        let token = std::fs::read_to_string(&path)
            .context("Failed to read session token file")?
            .trim()
            .to_string();

        if token.is_empty() {
            return Ok(None);
        }
        Ok(Some(token))
    }

    /// Save the bearer token with restrictive permissions
    pub fn save_token(&self, token: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create session store directory")?;

        let path = self.token_path();
        std::fs::write(&path, token).context("Failed to write session token file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&path, permissions)
                .context("Failed to set token file permissions")?;
        }

        Ok(())
    }

    /// Load the cached user profile blob, if present and parseable
    pub fn load_profile(&self) -> Option<Value> {
        let contents = std::fs::read_to_string(self.profile_path()).ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Cache the user profile blob alongside the token
    pub fn save_profile(&self, profile: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir).context("Failed to create session store directory")?;

        let contents =
            serde_json::to_string_pretty(profile).context("Failed to serialize user profile")?;
        std::fs::write(self.profile_path(), contents)
            .context("Failed to write user profile cache")?;

        Ok(())
    }

    /// Remove both entries. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        for path in [self.token_path(), self.profile_path()] {
            if path.exists() {
                std::fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }
}
