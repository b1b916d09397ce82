//! TLS certificate path resolution.
//!
//! Certificate and key may be given as bare filenames; resolution checks
//! the path as given, then the supervised `/ssl/<file>` mount, then the
//! user data directory (`~/.local/share/hearth/tls`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// TLS settings for the gateway listener.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Serve HTTPS instead of HTTP. Default: false
    #[serde(default)]
    pub enabled: bool,

    /// Certificate chain file (PEM).
    #[serde(default)]
    pub certfile: Option<String>,

    /// Private key file (PEM).
    #[serde(default)]
    pub keyfile: Option<String>,
}

impl TlsConfig {
    /// Resolve the certificate path, or the default location when unset.
    pub fn resolved_cert_path(&self) -> Option<PathBuf> {
        resolve(self.certfile.as_deref(), "cert.pem")
    }

    /// Resolve the private key path, or the default location when unset.
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        resolve(self.keyfile.as_deref(), "key.pem")
    }
}

fn resolve(configured: Option<&str>, default_name: &str) -> Option<PathBuf> {
    match configured {
        Some(name) => {
            let direct = PathBuf::from(name);
            if direct.exists() {
                return Some(direct);
            }
            // Supervised installs mount certificates under /ssl
            let mounted = Path::new("/ssl").join(name);
            if mounted.exists() {
                return Some(mounted);
            }
            Some(direct)
        }
        None => directories::ProjectDirs::from("", "", "hearth")
            .map(|dirs| dirs.data_dir().join("tls").join(default_name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_path_wins() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = TlsConfig {
            enabled: true,
            certfile: Some(file.path().display().to_string()),
            keyfile: None,
        };
        assert_eq!(config.resolved_cert_path().unwrap(), file.path());
    }

    #[test]
    fn test_missing_relative_name_falls_through() {
        let config = TlsConfig {
            enabled: true,
            certfile: Some("no-such-cert.pem".to_string()),
            keyfile: None,
        };
        // Neither the bare name nor /ssl/<name> exists; the bare name is
        // returned so error messages show what was asked for.
        assert_eq!(
            config.resolved_cert_path().unwrap(),
            PathBuf::from("no-such-cert.pem")
        );
    }

    #[test]
    fn test_unset_uses_data_dir_default() {
        let config = TlsConfig::default();
        let path = config.resolved_key_path().unwrap();
        assert!(path.ends_with("tls/key.pem"));
    }
}
