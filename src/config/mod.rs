use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./config.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid PORT value {0:?}")]
    Port(String),
}

/// Process-wide settings, loaded once at startup.
#[derive(Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord_webhook_url: String,
    #[serde(default = "default_save_batch_size")]
    pub save_batch_size: usize,
    #[serde(default = "default_home_url")]
    pub home_url: String,
    #[serde(default = "default_products_file")]
    pub products_file: PathBuf,
    #[serde(default)]
    pub jwt: String,
    #[serde(default = "default_catalog_push_url")]
    pub catalog_push_url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_server_enabled")]
    pub server_enabled: bool,
    #[serde(default = "default_sse_heartbeat_secs")]
    pub sse_heartbeat_secs: u64,
}

fn default_save_batch_size() -> usize {
    2
}

fn default_home_url() -> String {
    "https://store.ui.com/us/en".into()
}

fn default_products_file() -> PathBuf {
    "products.json".into()
}

fn default_catalog_push_url() -> String {
    "http://localhost:3001/api/products".into()
}

fn default_port() -> u16 {
    8080
}

fn default_server_enabled() -> bool {
    true
}

fn default_sse_heartbeat_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_webhook_url: String::new(),
            save_batch_size: default_save_batch_size(),
            home_url: default_home_url(),
            products_file: default_products_file(),
            jwt: String::new(),
            catalog_push_url: default_catalog_push_url(),
            port: default_port(),
            server_enabled: default_server_enabled(),
            sse_heartbeat_secs: default_sse_heartbeat_secs(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_webhook_url", &redact(&self.discord_webhook_url))
            .field("save_batch_size", &self.save_batch_size)
            .field("home_url", &self.home_url)
            .field("products_file", &self.products_file)
            .field("jwt", &redact(&self.jwt))
            .field("catalog_push_url", &self.catalog_push_url)
            .field("port", &self.port)
            .field("server_enabled", &self.server_enabled)
            .field("sse_heartbeat_secs", &self.sse_heartbeat_secs)
            .finish()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() { "<unset>" } else { "<redacted>" }
}

impl Config {
    /// Reads `MONITOR_CONFIG` (or `./config.yml`) and applies the
    /// `DISCORD_WEBHOOK_URL` and `PORT` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("MONITOR_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let webhook = std::env::var("DISCORD_WEBHOOK_URL").ok();
        let port = std::env::var("PORT").ok();

        Self::load_from(Path::new(&path), webhook, port)
    }

    /// The file is required unless a webhook URL arrives through the
    /// environment, in which case a missing file falls back to defaults.
    /// A file that exists but does not parse is always an error.
    pub fn load_from(
        path: &Path,
        webhook_override: Option<String>,
        port_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let webhook_override = webhook_override.filter(|url| !url.is_empty());

        let mut config = match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Self::default(),
            Ok(text) => serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?,
            Err(_) if webhook_override.is_some() => Self::default(),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        if let Some(url) = webhook_override {
            config.discord_webhook_url = url;
        }

        if let Some(port) = port_override.filter(|p| !p.is_empty()) {
            config.port = port.parse().map_err(|_| ConfigError::Port(port.clone()))?;
        }

        Ok(config)
    }

    /// `None` disables heartbeats: each stream sends one update and ends.
    pub fn sse_heartbeat(&self) -> Option<Duration> {
        (self.sse_heartbeat_secs > 0).then(|| Duration::from_secs(self.sse_heartbeat_secs))
    }
}
