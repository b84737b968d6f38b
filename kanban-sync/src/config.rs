//! Engine configuration loaded with figment.
//!
//! Sources merge in precedence order, later overriding earlier:
//! 1. built-in defaults
//! 2. an optional config file (TOML, YAML or JSON, chosen by extension)
//! 3. `KANBAN_SYNC_*` environment variables, nested keys split on `__`
//!    (`KANBAN_SYNC_RECONNECT__MAX_ATTEMPTS=3`)

use crate::channel::ReconnectPolicy;
use crate::types::BoardId;
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "KANBAN_SYNC_";

/// Default authority address
pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Explicitly requested file does not exist
    #[error("configuration file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Extension is not toml, yaml, yml or json
    #[error("unsupported configuration file format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    /// Extraction failed
    #[error("failed to parse configuration: {source}")]
    Parse { source: Box<figment::Error> },

    /// A value parsed but is unusable
    #[error("invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },
}

impl From<figment::Error> for ConfigError {
    fn from(error: figment::Error) -> Self {
        ConfigError::Parse {
            source: Box::new(error),
        }
    }
}

impl ConfigError {
    fn invalid_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the REST authority
    pub api_url: String,
    /// Base URL of the push channel; derived from `api_url` when unset
    pub ws_url: Option<String>,
    pub connect_timeout_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub request_timeout_ms: u64,
    /// Capacity of the store-change and channel-event buffers
    pub event_buffer: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: None,
            connect_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            request_timeout_ms: 30_000,
            event_buffer: 256,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SyncConfig {
    /// Load from defaults, then `file` if given, then the environment
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(SyncConfig::default()));

        if let Some(path) = file {
            figment = figment.merge(Self::file_provider(path)?);
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config: SyncConfig = figment.extract()?;
        config.validate()?;
        debug!(api_url = %config.api_url, "loaded sync configuration");
        Ok(config)
    }

    fn file_provider(path: &Path) -> Result<Figment, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("toml") => Ok(Figment::from(Toml::file(path))),
            Some("yaml") | Some("yml") => Ok(Figment::from(Yaml::file(path))),
            Some("json") => Ok(Figment::from(Json::file(path))),
            _ => Err(ConfigError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    /// Check values that deserialize fine but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = Url::parse(&self.api_url)
            .map_err(|e| ConfigError::invalid_value("api_url", e.to_string()))?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(ConfigError::invalid_value(
                "api_url",
                format!("scheme must be http or https, got {}", api.scheme()),
            ));
        }
        self.ws_base()?;

        if self.event_buffer == 0 {
            return Err(ConfigError::invalid_value(
                "event_buffer",
                "must be greater than zero",
            ));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ConfigError::invalid_value(
                "heartbeat_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::invalid_value(
                "reconnect.base_delay_ms",
                "must not exceed reconnect.max_delay_ms",
            ));
        }
        Ok(())
    }

    /// Push-channel base URL, mapping `http` to `ws` and `https` to `wss`
    pub fn ws_base(&self) -> Result<Url, ConfigError> {
        if let Some(ws) = &self.ws_url {
            return Url::parse(ws).map_err(|e| ConfigError::invalid_value("ws_url", e.to_string()));
        }

        let mut url = Url::parse(&self.api_url)
            .map_err(|e| ConfigError::invalid_value("api_url", e.to_string()))?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ConfigError::invalid_value("api_url", "cannot derive a ws url"))?;
        Ok(url)
    }

    /// Address of the push channel for one board
    pub fn channel_url(&self, board_id: BoardId) -> Result<String, ConfigError> {
        let base = self.ws_base()?;
        Ok(format!(
            "{}/api/ws/boards/{board_id}",
            base.as_str().trim_end_matches('/')
        ))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

    fn clear_env() {
        for (key, _) in std::env::vars() {
            if key.starts_with(ENV_PREFIX) {
                std::env::remove_var(key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = SyncConfig::load(None).unwrap();
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect.max_attempts, 5);
    }

    #[test]
    #[serial]
    fn test_toml_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.toml");
        fs::write(
            &path,
            r#"
api_url = "https://boards.example.com"
connect_timeout_ms = 2000

[reconnect]
max_attempts = 3
"#,
        )
        .unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.api_url, "https://boards.example.com");
        assert_eq!(config.connect_timeout_ms, 2000);
        assert_eq!(config.reconnect.max_attempts, 3);
        assert_eq!(config.reconnect.base_delay_ms, 1000);
    }

    #[test]
    #[serial]
    fn test_yaml_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.yaml");
        fs::write(&path, "heartbeat_interval_ms: 5000\n").unwrap();

        let config = SyncConfig::load(Some(&path)).unwrap();
        assert_eq!(config.heartbeat_interval_ms, 5000);
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{"event_buffer": 16, "reconnect": {"max_attempts": 2}}"#).unwrap();

        std::env::set_var("KANBAN_SYNC_EVENT_BUFFER", "64");
        std::env::set_var("KANBAN_SYNC_RECONNECT__MAX_ATTEMPTS", "9");
        let config = SyncConfig::load(Some(&path));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.reconnect.max_attempts, 9);
    }

    #[test]
    #[serial]
    fn test_missing_file() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let result = SyncConfig::load(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    #[serial]
    fn test_unsupported_extension() {
        clear_env();
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sync.ini");
        fs::write(&path, "api_url=x").unwrap();
        let result = SyncConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = SyncConfig {
            api_url: "ftp://example.com".into(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "api_url"
        ));

        let mut config = SyncConfig::default();
        config.reconnect.base_delay_ms = 60_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_channel_url_derivation() {
        let board = BoardId::parse("11111111-1111-4111-8111-111111111111").unwrap();

        let config = SyncConfig {
            api_url: "https://boards.example.com".into(),
            ..Default::default()
        };
        assert_eq!(
            config.channel_url(board).unwrap(),
            "wss://boards.example.com/api/ws/boards/11111111-1111-4111-8111-111111111111"
        );

        let config = SyncConfig {
            ws_url: Some("ws://127.0.0.1:9000/".into()),
            ..Default::default()
        };
        assert_eq!(
            config.channel_url(board).unwrap(),
            "ws://127.0.0.1:9000/api/ws/boards/11111111-1111-4111-8111-111111111111"
        );
    }
}
