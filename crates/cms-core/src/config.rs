//! Gateway configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::DEFAULT_LOCALE;

pub const ENV_BIND: &str = "CMS_GATEWAY_BIND";
pub const ENV_SIGNAL_SECRET: &str = "CMS_SIGNAL_SECRET";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:4000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sqlite_path: PathBuf,
    pub default_locale: String,
    /// Every onboarded site; the publish step targets all of them.
    pub target_sites: Vec<String>,
    pub activity_timeout_secs: u64,
    pub activity_max_attempts: u32,
    pub activity_initial_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from(".cms/state.sqlite"),
            default_locale: DEFAULT_LOCALE.to_string(),
            target_sites: vec!["drupal".to_string(), "wordpress".to_string()],
            activity_timeout_secs: 60,
            activity_max_attempts: 3,
            activity_initial_backoff_ms: 1000,
        }
    }
}

impl EngineConfig {
    pub fn activity_timeout(&self) -> Duration {
        Duration::from_secs(self.activity_timeout_secs)
    }

    pub fn activity_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.activity_initial_backoff_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Enables signal token enforcement at the gateway when set.
    pub signal_secret: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl GatewayConfig {
    /// Applies `CMS_GATEWAY_BIND` and `CMS_SIGNAL_SECRET` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            self.server.bind = bind.trim().to_string();
        }
        if let Some(secret) = lookup(ENV_SIGNAL_SECRET).filter(|v| !v.is_empty()) {
            self.auth.signal_secret = Some(secret);
        }
    }
}

pub fn parse_gateway_config(contents: &str) -> Result<GatewayConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub fn load_gateway_config(path: impl AsRef<Path>) -> Result<GatewayConfig, ConfigError> {
    let path_ref = path.as_ref();
    let body = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
        path: path_ref.to_path_buf(),
        source,
    })?;
    parse_gateway_config(&body).map_err(|source| ConfigError::Parse {
        path: path_ref.to_path_buf(),
        source,
    })
}
