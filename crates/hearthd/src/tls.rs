//! Self-signed certificate generation and rustls config loading.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use axum_server::tls_rustls::RustlsConfig;
use rcgen::{generate_simple_self_signed, CertifiedKey};
use tracing::info;

use hearthconf::TlsConfig;

/// Certificate and key locations after `/ssl` and XDG fallback
/// resolution.
pub struct CertPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl CertPaths {
    pub fn resolve(config: &TlsConfig) -> Result<Self> {
        let cert = config
            .resolved_cert_path()
            .context("Could not determine certificate path (HOME not set?)")?;
        let key = config
            .resolved_key_path()
            .context("Could not determine key path (HOME not set?)")?;
        Ok(Self { cert, key })
    }

    pub fn both_exist(&self) -> bool {
        self.cert.exists() && self.key.exists()
    }
}

/// Write a fresh self-signed certificate and key for the given hostname
/// (plus localhost and 127.0.0.1).
pub fn generate_self_signed(hostname: &str, paths: &CertPaths) -> Result<()> {
    if let Some(parent) = paths.cert.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create cert directory: {}", parent.display()))?;
    }

    let names = vec![
        hostname.to_string(),
        "localhost".to_string(),
        "127.0.0.1".to_string(),
    ];
    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(names).context("Failed to generate self-signed certificate")?;

    std::fs::write(&paths.cert, cert.pem())
        .with_context(|| format!("Failed to write certificate to {}", paths.cert.display()))?;
    std::fs::write(&paths.key, key_pair.serialize_pem())
        .with_context(|| format!("Failed to write private key to {}", paths.key.display()))?;

    info!(cert = %paths.cert.display(), key = %paths.key.display(), "wrote self-signed certificate");
    Ok(())
}

/// Load the rustls config for `axum_server::bind_rustls`.
pub async fn load_rustls_config(config: &TlsConfig) -> Result<RustlsConfig> {
    let paths = CertPaths::resolve(config)?;

    if !paths.both_exist() {
        bail!(
            "TLS enabled but certificates not found (cert: {}, key: {}). \
             Generate them with: hearthd generate-cert --hostname <your-hostname>",
            paths.cert.display(),
            paths.key.display()
        );
    }

    RustlsConfig::from_pem_file(&paths.cert, &paths.key)
        .await
        .with_context(|| {
            format!(
                "Failed to load TLS config from {} and {}",
                paths.cert.display(),
                paths.key.display()
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_writes_pem_pair() {
        let dir = tempfile::tempdir().unwrap();
        let paths = CertPaths {
            cert: dir.path().join("cert.pem"),
            key: dir.path().join("key.pem"),
        };
        assert!(!paths.both_exist());

        generate_self_signed("gateway.local", &paths).unwrap();
        assert!(paths.both_exist());

        let cert_pem = std::fs::read_to_string(&paths.cert).unwrap();
        assert!(cert_pem.contains("BEGIN CERTIFICATE"));
        let key_pem = std::fs::read_to_string(&paths.key).unwrap();
        assert!(key_pem.contains("PRIVATE KEY"));
    }
}
