//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, HearthConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/hearth/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("hearth/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("hearth.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Parse a config file into a raw TOML table.
pub fn load_table(path: &Path) -> Result<toml::Table, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    contents
        .parse::<toml::Table>()
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

/// Merge `overlay` into `base`, recursing one level into section tables so
/// a later file can override a single key without clobbering the section.
pub fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                for (k, v) in incoming {
                    existing.insert(k, v);
                }
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Apply environment variable overrides in place.
pub fn apply_env_overrides(config: &mut HearthConfig, sources: &mut ConfigSources) {
    if let Ok(v) = env::var("HEARTH_HOST") {
        config.server.host = v;
        sources.env_overrides.push("HEARTH_HOST".to_string());
    }
    if let Ok(v) = env::var("HEARTH_PORT") {
        if let Ok(port) = v.parse() {
            config.server.port = port;
            sources.env_overrides.push("HEARTH_PORT".to_string());
        }
    }
    if let Ok(v) = env::var("HEARTH_MAX_CONNECTIONS") {
        if let Ok(n) = v.parse() {
            config.server.max_connections = n;
            sources
                .env_overrides
                .push("HEARTH_MAX_CONNECTIONS".to_string());
        }
    }

    // Supervised mode: the supervisor proxies the backend and supplies the
    // credential. Takes precedence over [backend] and HA_* variables.
    if let Ok(token) = env::var("SUPERVISOR_TOKEN") {
        config.backend.url = "http://supervisor/core".to_string();
        config.backend.access_token = Some(token);
        sources.env_overrides.push("SUPERVISOR_TOKEN".to_string());
    } else {
        if let Ok(v) = env::var("HA_URL") {
            config.backend.url = v;
            sources.env_overrides.push("HA_URL".to_string());
        }
        if let Ok(v) = env::var("HA_TOKEN") {
            config.backend.access_token = Some(v);
            sources.env_overrides.push("HA_TOKEN".to_string());
        }
    }

    if let Ok(v) = env::var("HEARTH_SSL") {
        config.tls.enabled = v.eq_ignore_ascii_case("true");
        sources.env_overrides.push("HEARTH_SSL".to_string());
    }
    if let Ok(v) = env::var("HEARTH_CERTFILE") {
        config.tls.certfile = Some(v);
        sources.env_overrides.push("HEARTH_CERTFILE".to_string());
    }
    if let Ok(v) = env::var("HEARTH_KEYFILE") {
        config.tls.keyfile = Some(v);
        sources.env_overrides.push("HEARTH_KEYFILE".to_string());
    }

    if let Ok(v) = env::var("HEARTH_LOG_LEVEL") {
        config.log_level = v;
        sources.env_overrides.push("HEARTH_LOG_LEVEL".to_string());
    }
    // Also support RUST_LOG
    if let Ok(v) = env::var("RUST_LOG") {
        config.log_level = v;
        sources.env_overrides.push("RUST_LOG".to_string());
    }
}
