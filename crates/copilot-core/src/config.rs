//! Client configuration schema and loading.
//!
//! Settings live in `copilot.toml` in the data directory. Every field has a
//! default, so a missing file or a partial file is fine. A few values can be
//! overridden from the environment:
//! - `COPILOT_BACKEND_URL`
//! - `COPILOT_CLIENT_ID`
//! - `COPILOT_CLIENT_SECRET`

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use copilot_auth_bridge::OAuthConfig;

use crate::backend::DEFAULT_BACKEND_URL;

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CopilotConfig {
    /// Base URL of the ingestion/search backend.
    pub backend_url: String,

    /// Upper bound on an interactive consent flow.
    pub auth_timeout_secs: u64,

    /// Upper bound on waiting for a token bridge reply.
    pub bridge_timeout_secs: u64,

    /// OAuth client registration and identity provider endpoints.
    pub oauth: OAuthConfig,
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            auth_timeout_secs: 300,
            bridge_timeout_secs: 120,
            oauth: OAuthConfig::default(),
        }
    }
}

impl CopilotConfig {
    /// Load configuration from a TOML file, falling back to defaults if it doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load from `path` and apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Apply overrides from any key lookup (the process environment in practice).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = non_empty("COPILOT_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(client_id) = non_empty("COPILOT_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }
        if let Some(secret) = non_empty("COPILOT_CLIENT_SECRET") {
            self.oauth.client_secret = Some(secret);
        }
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}
