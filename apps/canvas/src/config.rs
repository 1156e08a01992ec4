use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::protocol::{MAX_GRID_SIZE, MAX_PALETTE_SIZE, WireConfig};
use crate::session::ReconnectPolicy;

pub const ENV_GRID_SIZE: &str = "CANVAS_GRID_SIZE";
pub const ENV_WEBSOCKET_URL: &str = "CANVAS_WEBSOCKET_URL";
pub const ENV_API_BASE_URL: &str = "CANVAS_API_BASE_URL";
pub const ENV_AUTH_ENABLED: &str = "CANVAS_AUTH_ENABLED";
pub const ENV_MAX_RECONNECT_ATTEMPTS: &str = "CANVAS_MAX_RECONNECT_ATTEMPTS";
pub const ENV_INACTIVITY_TIMEOUT_MS: &str = "CANVAS_INACTIVITY_TIMEOUT_MS";

const DEFAULT_COLORS: [&str; 16] = [
    "#FFFFFF", "#E4E4E4", "#888888", "#222222", "#FFA7D1", "#E50000", "#E59500", "#A06A42",
    "#E5D900", "#94E044", "#02BE01", "#00D3DD", "#0083C7", "#0000EA", "#CF6EE4", "#820080",
];

/// Canvas client configuration as served by `GET {api}/config`.
///
/// Missing fields take the same defaults the server-less client falls back to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub auth_enabled: bool,
    pub google_client_id: String,
    pub api_base_url: String,
    pub websocket_url: String,
    pub grid_size: usize,
    /// Palette as CSS hex strings; its length bounds every color index.
    pub colors: Vec<String>,
    pub max_reconnect_attempts: u32,
    /// Milliseconds of inactivity before the viewer is considered idle.
    pub inactivity_timeout: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config fetch failed: {0}")]
    Fetch(#[from] reqwest::Error),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_enabled: false,
            google_client_id: String::new(),
            api_base_url: "http://localhost:8081".to_string(),
            websocket_url: "ws://localhost:8081/ws".to_string(),
            grid_size: 100,
            colors: DEFAULT_COLORS.iter().map(|c| c.to_string()).collect(),
            max_reconnect_attempts: 5,
            inactivity_timeout: 300_000,
        }
    }
}

impl AppConfig {
    /// Defaults overlaid with `CANVAS_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides(|key| env::var(key).ok())
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validated()
    }

    /// Fetches the config document from `url`.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        config.validated()
    }

    /// Like [`AppConfig::fetch`], but any failure yields the defaults.
    pub async fn fetch_or_default(client: &reqwest::Client, url: &str) -> Self {
        match Self::fetch(client, url).await {
            Ok(config) => {
                debug!(url, "loaded remote config");
                config
            }
            Err(err) => {
                warn!(url, error = %err, "failed to load config from server, using defaults");
                Self::default()
            }
        }
    }

    /// `{api_base_url}/config`.
    pub fn config_url(&self) -> String {
        format!("{}/config", self.api_base_url.trim_end_matches('/'))
    }

    /// `{api_base_url}/api/draw`.
    pub fn draw_url(&self) -> String {
        format!("{}/api/draw", self.api_base_url.trim_end_matches('/'))
    }

    pub fn with_env_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let var = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(value) = var(ENV_GRID_SIZE) {
            self.grid_size = parse_env(ENV_GRID_SIZE, value)?;
        }
        if let Some(value) = var(ENV_WEBSOCKET_URL) {
            self.websocket_url = value;
        }
        if let Some(value) = var(ENV_API_BASE_URL) {
            self.api_base_url = value;
        }
        if let Some(value) = var(ENV_AUTH_ENABLED) {
            self.auth_enabled = match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(ConfigError::InvalidEnv {
                        key: ENV_AUTH_ENABLED,
                        value,
                    });
                }
            };
        }
        if let Some(value) = var(ENV_MAX_RECONNECT_ATTEMPTS) {
            self.max_reconnect_attempts = parse_env(ENV_MAX_RECONNECT_ATTEMPTS, value)?;
        }
        if let Some(value) = var(ENV_INACTIVITY_TIMEOUT_MS) {
            self.inactivity_timeout = parse_env(ENV_INACTIVITY_TIMEOUT_MS, value)?;
        }
        self.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        if !(1..=MAX_GRID_SIZE).contains(&self.grid_size) {
            return Err(ConfigError::Invalid(format!(
                "gridSize must be within 1..={MAX_GRID_SIZE}, got {}",
                self.grid_size
            )));
        }
        if self.colors.is_empty() || self.colors.len() > MAX_PALETTE_SIZE {
            return Err(ConfigError::Invalid(format!(
                "colors must hold 1..={MAX_PALETTE_SIZE} entries, got {}",
                self.colors.len()
            )));
        }
        self.websocket_url()?;
        Ok(self)
    }

    pub fn palette_size(&self) -> usize {
        self.colors.len()
    }

    pub fn wire_config(&self) -> WireConfig {
        WireConfig::new(self.grid_size, self.palette_size())
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::default().with_max_attempts(self.max_reconnect_attempts)
    }

    pub fn websocket_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.websocket_url).map_err(|source| ConfigError::InvalidUrl {
            url: self.websocket_url.clone(),
            source,
        })
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout)
    }
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
