//! TLS configuration for the API and Web handlers

use crate::error::{RelayError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::rustls::crypto::ring;
use tracing::info;

/// Build an acceptor from PEM certificate chain and private key files.
///
/// Only `http/1.1` is offered over ALPN so relay clients can always upgrade
/// to WebSocket.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = File::open(cert_path).map_err(|e| {
        RelayError::Tls(format!(
            "Failed to open certificate {}: {e}",
            cert_path.display()
        ))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(cert_file))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(RelayError::Tls(format!(
            "No certificates in {}",
            cert_path.display()
        )));
    }

    let key_file = File::open(key_path).map_err(|e| {
        RelayError::Tls(format!(
            "Failed to open private key {}: {e}",
            key_path.display()
        ))
    })?;
    let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))?
        .ok_or_else(|| RelayError::Tls(format!("No private key in {}", key_path.display())))?;

    let mut config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    info!(cert = %cert_path.display(), "Loaded TLS certificate");
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rcgen::{CertifiedKey, generate_simple_self_signed};
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Self-signed certificate for `names`, written to temp PEM files
    pub(crate) struct TestCert {
        pub cert_der: tokio_rustls::rustls::pki_types::CertificateDer<'static>,
        pub cert_file: NamedTempFile,
        pub key_file: NamedTempFile,
    }

    pub(crate) fn test_cert(names: &[&str]) -> TestCert {
        let CertifiedKey { cert, signing_key } =
            generate_simple_self_signed(names.iter().map(|n| n.to_string()).collect::<Vec<_>>())
                .unwrap();

        let mut cert_file = NamedTempFile::new().unwrap();
        cert_file.write_all(cert.pem().as_bytes()).unwrap();
        let mut key_file = NamedTempFile::new().unwrap();
        key_file
            .write_all(signing_key.serialize_pem().as_bytes())
            .unwrap();

        TestCert {
            cert_der: cert.der().clone(),
            cert_file,
            key_file,
        }
    }

    #[test]
    fn test_loads_generated_cert() {
        let cert = test_cert(&["api.spacekit.io"]);
        assert!(load_tls_acceptor(cert.cert_file.path(), cert.key_file.path()).is_ok());
    }

    #[test]
    fn test_missing_files() {
        let result = load_tls_acceptor(Path::new("/nonexistent/cert.pem"), Path::new("/x"));
        assert!(matches!(result, Err(RelayError::Tls(_))));
    }

    #[test]
    fn test_empty_cert_file() {
        let cert = test_cert(&["api.spacekit.io"]);
        let empty = NamedTempFile::new().unwrap();
        let result = load_tls_acceptor(empty.path(), cert.key_file.path());
        assert!(matches!(result, Err(RelayError::Tls(_))));
    }
}
