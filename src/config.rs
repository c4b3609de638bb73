//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Environment variables**: `DVPN_TRAY_URL`, `DVPN_NODE_PORT`,
//!    `DVPN_LOG_LEVEL`
//! 2. **Config file**: path via `--config <path>`, or `dvpn.toml` in CWD
//! 3. **Compiled defaults**: see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [tray]
//! url = "ws://localhost:8765"
//! connect_timeout_ms = 5000        # how long connect() waits for the channel
//! request_timeout_ms = 30000       # how long a command waits for its reply
//! max_reconnect_attempts = 5
//! reconnect_base_delay_ms = 1000   # doubles after every failure
//!
//! [node]
//! https_port = 8000
//! http_port = 8000
//! connect_timeout_ms = 5000
//! request_timeout_ms = 10000
//! max_attempts = 3                 # per transport
//! retry_base_delay_ms = 1000       # 1s, 2s, ...
//! accept_invalid_certs = false     # nodes with self-signed certs
//!
//! [logging]
//! level = "info"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "dvpn.toml";

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tray: TrayConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Local control channel to the tray process.
#[derive(Debug, Clone, Deserialize)]
pub struct TrayConfig {
    /// WebSocket endpoint of the tray process (default `ws://localhost:8765`).
    #[serde(default = "default_tray_url")]
    pub url: String,
    /// Ceiling for `connect()` callers waiting on the channel (default 5 000).
    #[serde(default = "default_tray_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Ceiling for a command's reply (default 30 000).
    #[serde(default = "default_tray_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Automatic reconnects before giving up (default 5).
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// First reconnect delay; doubled after every failure (default 1 000).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
}

/// Remote node HTTP API.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    /// Port for `https://` negotiation (default 8000).
    #[serde(default = "default_node_port")]
    pub https_port: u16,
    /// Port for the `http://` fallback (default 8000).
    #[serde(default = "default_node_port")]
    pub http_port: u16,
    /// TCP/TLS connect timeout per attempt (default 5 000).
    #[serde(default = "default_node_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Whole-request timeout per attempt (default 10 000).
    #[serde(default = "default_node_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Attempts per transport (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear retry backoff unit (default 1 000).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Skip TLS certificate verification (default false).
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_tray_url() -> String {
    "ws://localhost:8765".to_string()
}
fn default_tray_connect_timeout_ms() -> u64 {
    5_000
}
fn default_tray_request_timeout_ms() -> u64 {
    30_000
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}
fn default_node_port() -> u16 {
    8000
}
fn default_node_connect_timeout_ms() -> u64 {
    5_000
}
fn default_node_request_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1_000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TrayConfig {
    fn default() -> Self {
        Self {
            url: default_tray_url(),
            connect_timeout_ms: default_tray_connect_timeout_ms(),
            request_timeout_ms: default_tray_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            https_port: default_node_port(),
            http_port: default_node_port(),
            connect_timeout_ms: default_node_connect_timeout_ms(),
            request_timeout_ms: default_node_request_timeout_ms(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            accept_invalid_certs: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TrayConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }
}

impl NodeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Config {
    /// Load configuration with the precedence chain: env vars > file > defaults.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `dvpn.toml` in the
    /// current directory is used when present, falling back to compiled defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => Config::default(),
        };

        // Env var overrides
        if let Ok(url) = std::env::var("DVPN_TRAY_URL") {
            config.tray.url = url;
        }
        if let Ok(port) = std::env::var("DVPN_NODE_PORT") {
            let port: u16 = port.parse().map_err(|e| ConfigError::Invalid {
                key: "DVPN_NODE_PORT",
                message: format!("{port:?}: {e}"),
            })?;
            config.node.https_port = port;
            config.node.http_port = port;
        }
        if let Ok(level) = std::env::var("DVPN_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config from TOML text (no env overrides).
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tray.url.starts_with("ws://") || self.tray.url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                key: "tray.url",
                message: format!("expected a ws:// or wss:// URL, got {:?}", self.tray.url),
            });
        }
        if self.node.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "node.max_attempts",
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_timings() {
        let config = Config::default();
        assert_eq!(config.tray.url, "ws://localhost:8765");
        assert_eq!(config.tray.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.tray.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.tray.max_reconnect_attempts, 5);
        assert_eq!(config.tray.reconnect_base_delay(), Duration::from_secs(1));
        assert_eq!(config.node.https_port, 8000);
        assert_eq!(config.node.http_port, 8000);
        assert_eq!(config.node.max_attempts, 3);
        assert_eq!(config.node.retry_base_delay(), Duration::from_secs(1));
        assert!(!config.node.accept_invalid_certs);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let config = Config::from_toml_str(
            r#"
            [tray]
            url = "ws://127.0.0.1:9000"

            [node]
            http_port = 8080
            accept_invalid_certs = true
            "#,
        )
        .unwrap();
        assert_eq!(config.tray.url, "ws://127.0.0.1:9000");
        assert_eq!(config.tray.request_timeout_ms, 30_000);
        assert_eq!(config.node.https_port, 8000);
        assert_eq!(config.node.http_port, 8080);
        assert!(config.node.accept_invalid_certs);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.tray.max_reconnect_attempts, 5);
        assert_eq!(config.node.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn unknown_type_is_a_parse_error() {
        assert!(Config::from_toml_str("[tray]\nmax_reconnect_attempts = \"five\"").is_err());
    }

    #[test]
    fn validate_rejects_non_websocket_url() {
        let mut config = Config::default();
        config.tray.url = "http://localhost:8765".into();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "tray.url", .. })
        ));
    }

    #[test]
    fn validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.node.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_explicit_file_is_a_read_error() {
        let err = Config::load(Some(Path::new("/nonexistent/dvpn.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
