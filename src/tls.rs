//! TLS termination for the inbound listener.
//!
//! Outbound connections to both backends stay plaintext; only the
//! client-facing side is wrapped.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;
use tokio_rustls::TlsAcceptor;

use crate::error::TeeError;

/// Create a TLS acceptor from PEM certificate chain and private key files.
pub fn create_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TeeError> {
    // Several crypto providers may be compiled in; pick ring explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cert_file = std::fs::File::open(cert_path).map_err(|e| {
        TeeError::Tls(format!(
            "failed to open certificate file '{}': {e}",
            cert_path.display()
        ))
    })?;
    let mut cert_reader = std::io::BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| TeeError::Tls(format!("failed to parse certificate file: {e}")))?;

    if certs.is_empty() {
        return Err(TeeError::Tls(format!(
            "no certificates found in '{}'",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path).map_err(|e| {
        TeeError::Tls(format!(
            "failed to open private key file '{}': {e}",
            key_path.display()
        ))
    })?;
    let mut key_reader = std::io::BufReader::new(key_file);

    // PKCS8, RSA or SEC1
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| TeeError::Tls(format!("failed to parse private key file: {e}")))?
        .ok_or_else(|| {
            TeeError::Tls(format!("no private key found in '{}'", key_path.display()))
        })?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TeeError::Tls(format!("failed to build TLS configuration: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
