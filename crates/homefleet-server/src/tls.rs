//! TLS configuration for the gRPC listener.

use std::path::PathBuf;

use tonic::transport::{Identity, ServerTlsConfig};
use tracing::info;

/// TLS configuration for the server.
#[derive(Debug, Clone)]
pub enum TlsMode {
    /// No TLS (plaintext). For development or behind a terminating proxy.
    Disabled,
    /// User-provided certificate and key files.
    Custom {
        /// Path to PEM-encoded certificate file.
        cert_path: PathBuf,
        /// Path to PEM-encoded private key file.
        key_path: PathBuf,
    },
}

impl TlsMode {
    /// Build a tonic `ServerTlsConfig` from this mode.
    ///
    /// Returns `None` if TLS is disabled.
    pub fn to_server_tls_config(&self) -> Result<Option<ServerTlsConfig>, TlsConfigError> {
        match self {
            TlsMode::Disabled => Ok(None),
            TlsMode::Custom {
                cert_path,
                key_path,
            } => {
                let cert_pem = std::fs::read_to_string(cert_path).map_err(|e| {
                    TlsConfigError::FileRead(format!(
                        "Failed to read cert {}: {}",
                        cert_path.display(),
                        e
                    ))
                })?;
                let key_pem = std::fs::read_to_string(key_path).map_err(|e| {
                    TlsConfigError::FileRead(format!(
                        "Failed to read key {}: {}",
                        key_path.display(),
                        e
                    ))
                })?;

                let identity = Identity::from_pem(cert_pem, key_pem);
                let tls_config = ServerTlsConfig::new().identity(identity);

                info!(
                    cert = %cert_path.display(),
                    key = %key_path.display(),
                    "TLS enabled"
                );
                Ok(Some(tls_config))
            }
        }
    }
}

/// TLS configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum TlsConfigError {
    #[error("File read error: {0}")]
    FileRead(String),
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn disabled_returns_none() {
        let mode = TlsMode::Disabled;
        let result = mode.to_server_tls_config().unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn custom_missing_cert_returns_error() {
        let mode = TlsMode::Custom {
            cert_path: PathBuf::from("/nonexistent/cert.pem"),
            key_path: PathBuf::from("/nonexistent/key.pem"),
        };
        assert!(mode.to_server_tls_config().is_err());
    }
}
