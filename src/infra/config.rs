// src/infra/config.rs - Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::chat::attachments::AttachmentPolicy;
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub endpoint: EndpointConfig,

    #[serde(default)]
    pub identity: IdentityConfig,

    #[serde(default)]
    pub attachments: AttachmentsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub chat_path: String,
    pub upload_path: String,
    /// `{session_id}` is substituted with the percent-safe session id.
    pub history_path: String,
    /// Connect timeout. Streaming reads are never time-limited.
    pub timeout_seconds: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".into(),
            chat_path: "/api/chat".into(),
            upload_path: "/api/upload".into(),
            history_path: "/api/sessions/{session_id}/messages".into(),
            timeout_seconds: 120,
        }
    }
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Identity handed to us by the external identity provider. We only forward it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub user_id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    pub max_size_mb: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 10,
            allowed_extensions: ["pdf", "doc", "docx", "txt", "md", "rtf", "png", "jpg", "jpeg"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl AttachmentsConfig {
    pub fn policy(&self) -> AttachmentPolicy {
        AttachmentPolicy::new(
            self.max_size_mb.saturating_mul(1024 * 1024),
            self.allowed_extensions.as_slice(),
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        let config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `CLIMATECHAT_TOKEN` / `CLIMATECHAT_USER` on top of the file.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var("CLIMATECHAT_TOKEN") {
            if !token.is_empty() {
                self.identity.token = Some(token);
            }
        }
        if let Ok(user) = std::env::var("CLIMATECHAT_USER") {
            if !user.is_empty() {
                self.identity.user_id = Some(user);
            }
        }
        self
    }
}
