//! Application configuration
//!
//! Loaded from a JSON file. Only `data_root` is required:
//!
//! ```json
//! {
//!   "data_root": "/srv/invoice",
//!   "server": { "port": 3000 },
//!   "admin_token": "change-me"
//! }
//! ```
//!
//! `INVOICE_VAULT_ADMIN_TOKEN` overrides `admin_token` when set.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::checkpoint::CheckpointPolicy;
use crate::http_server::HttpServerConfig;
use crate::layout::DataLayout;

/// Environment variable overriding `admin_token`.
pub const ADMIN_TOKEN_ENV: &str = "INVOICE_VAULT_ADMIN_TOKEN";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        "VAULT_CONFIG"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root holding `data/`, `uploads/` and `temp/` (required)
    pub data_root: PathBuf,

    /// Store file is `data/<database_name>.db` (default: "invoice")
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// Prefix of downloaded artifact names (default: "invoice")
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,

    #[serde(default)]
    pub server: HttpServerConfig,

    /// Bearer token required by every administrative route
    #[serde(default, skip_serializing)]
    pub admin_token: Option<String>,

    /// Largest accepted restore upload (default: 500 MiB)
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,

    #[serde(default = "default_checkpoint_attempts")]
    pub checkpoint_attempts: u32,

    #[serde(default = "default_checkpoint_retry_ms")]
    pub checkpoint_retry_ms: u64,
}

fn default_database_name() -> String {
    "invoice".to_string()
}
fn default_artifact_prefix() -> String {
    "invoice".to_string()
}
fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}
fn default_checkpoint_attempts() -> u32 {
    3
}
fn default_checkpoint_retry_ms() -> u64 {
    100
}

impl AppConfig {
    /// Defaults for everything but the data root.
    pub fn new(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            database_name: default_database_name(),
            artifact_prefix: default_artifact_prefix(),
            server: HttpServerConfig::default(),
            admin_token: None,
            max_upload_bytes: default_max_upload_bytes(),
            checkpoint_attempts: default_checkpoint_attempts(),
            checkpoint_retry_ms: default_checkpoint_retry_ms(),
        }
    }

    /// Load, apply the environment override and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_json(&content)?;
        config.apply_token_override(std::env::var(ADMIN_TOKEN_ENV).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(content: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_token = Some(token.into());
        self
    }

    fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.admin_token = Some(token);
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.data_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("data_root must not be empty".into()));
        }
        validate_name("database_name", &self.database_name)?;
        validate_name("artifact_prefix", &self.artifact_prefix)?;

        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be > 0".into()));
        }
        if self.checkpoint_attempts == 0 {
            return Err(ConfigError::Invalid("checkpoint_attempts must be >= 1".into()));
        }
        if matches!(&self.admin_token, Some(t) if t.trim().is_empty()) {
            return Err(ConfigError::Invalid("admin_token must not be blank".into()));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_root, &self.database_name)
    }

    pub fn checkpoint_policy(&self) -> CheckpointPolicy {
        CheckpointPolicy {
            max_attempts: self.checkpoint_attempts,
            retry_interval: Duration::from_millis(self.checkpoint_retry_ms),
        }
    }
}

fn validate_name(field: &str, value: &str) -> ConfigResult<()> {
    let valid = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} must be non-empty and contain only letters, digits, '-' or '_'",
            field
        )))
    }
}
