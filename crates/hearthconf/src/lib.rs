//! hearthconf - Configuration loading for the Hearth gateway
//!
//! Load order (later wins):
//! 1. Compiled defaults
//! 2. `/etc/hearth/config.toml`
//! 3. `~/.config/hearth/config.toml`
//! 4. `./hearth.toml` (or a CLI-supplied path)
//! 5. Environment variables
//!
//! Example config:
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8089
//! max_connections = 10
//!
//! [backend]
//! url = "http://localhost:8123"
//! access_token = "..."
//!
//! [tls]
//! enabled = true
//! certfile = "fullchain.pem"
//! keyfile = "privkey.pem"
//! ```
//!
//! When running supervised (a `SUPERVISOR_TOKEN` in the environment), the
//! backend URL and credential are taken from the supervisor instead of the
//! `[backend]` section.

pub mod loader;
pub mod tls;

pub use loader::{discover_config_files_with_override, ConfigSources};
pub use tls::TlsConfig;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind. Default: 0.0.0.0
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,

    /// Port for SSE, message, health, and auth endpoints. Default: 8089
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,

    /// Live-session capacity; further connects are rejected with 503.
    /// Default: 10
    #[serde(default = "ServerConfig::default_max_connections")]
    pub max_connections: usize,

    /// Idle interval before a keepalive ping is pushed to a session.
    /// Default: 30
    #[serde(default = "ServerConfig::default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8089
    }

    fn default_max_connections() -> usize {
        10
    }

    fn default_keepalive_secs() -> u64 {
        30
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            max_connections: Self::default_max_connections(),
            keepalive_secs: Self::default_keepalive_secs(),
        }
    }
}

/// Downstream backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend base URL (http/https). Default: http://localhost:8123
    #[serde(default = "BackendConfig::default_url")]
    pub url: String,

    /// Long-lived access token for the backend WebSocket handshake.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Per-command response deadline in seconds. Default: 30
    #[serde(default = "BackendConfig::default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl BackendConfig {
    fn default_url() -> String {
        "http://localhost:8123".to_string()
    }

    fn default_command_timeout_secs() -> u64 {
        30
    }

    /// Derive the WebSocket endpoint from the base URL.
    pub fn websocket_url(&self) -> String {
        let ws = self
            .url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}/api/websocket", ws.trim_end_matches('/'))
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: Self::default_url(),
            access_token: None,
            command_timeout_secs: Self::default_command_timeout_secs(),
        }
    }
}

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearthConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub backend: BackendConfig,

    #[serde(default)]
    pub tls: TlsConfig,

    /// Log filter, RUST_LOG syntax. Default: "info"
    #[serde(default = "HearthConfig::default_log_level")]
    pub log_level: String,
}

impl Default for HearthConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            backend: BackendConfig::default(),
            tls: TlsConfig::default(),
            log_level: Self::default_log_level(),
        }
    }
}

impl HearthConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, preferring a CLI-supplied file over the local
    /// override. System and user configs still load first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut table = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_table = loader::load_table(&path)?;
            loader::merge_tables(&mut table, file_table);
            sources.files.push(path);
        }

        let mut config: HearthConfig =
            toml::Value::Table(table)
                .try_into()
                .map_err(|e: toml::de::Error| ConfigError::Parse {
                    path: PathBuf::from("<merged>"),
                    message: e.to_string(),
                })?;

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// True when a supervisor credential supplies the backend connection.
    pub fn supervised(&self) -> bool {
        std::env::var("SUPERVISOR_TOKEN").is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = HearthConfig::default();
        assert_eq!(config.server.port, 8089);
        assert_eq!(config.server.max_connections, 10);
        assert_eq!(config.server.keepalive_secs, 30);
        assert_eq!(config.backend.command_timeout_secs, 30);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn test_websocket_url_derivation() {
        let backend = BackendConfig {
            url: "https://ha.example.net/".to_string(),
            ..Default::default()
        };
        assert_eq!(backend.websocket_url(), "wss://ha.example.net/api/websocket");

        let backend = BackendConfig::default();
        assert_eq!(
            backend.websocket_url(),
            "ws://localhost:8123/api/websocket"
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: HearthConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [backend]
            url = "http://hub.local:8123"
            access_token = "abc"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.backend.access_token.as_deref(), Some("abc"));
        assert_eq!(config.log_level, "info");
    }
}
