//! TLS termination for https imposters.

use crate::imposter::ImposterError;
use rustls::pki_types::CertificateDer;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Build an acceptor from PEM text.
pub fn acceptor_from_pem(cert_pem: &str, key_pem: &str) -> Result<TlsAcceptor, ImposterError> {
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<Result<_, _>>()
        .map_err(|e| ImposterError::Tls(format!("failed to parse certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ImposterError::Tls("no certificate found in cert".to_string()));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| ImposterError::Tls(format!("failed to parse private key: {e}")))?
        .ok_or_else(|| ImposterError::Tls("no private key found in key".to_string()))?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ImposterError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ImposterError::Tls(format!("certificate and key do not match: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Self-signed pair for `localhost` used when neither the imposter nor the
/// server supplies TLS material.
pub const BUILTIN_CERT: &str = include_str!("../../certs/default-cert.pem");
pub const BUILTIN_KEY: &str = include_str!("../../certs/default-key.pem");

/// Pick the imposter's inline material, then the server-wide files, then the
/// built-in self-signed pair.
pub fn resolve_acceptor(
    cert: Option<&str>,
    key: Option<&str>,
    default_cert: Option<&Path>,
    default_key: Option<&Path>,
) -> Result<TlsAcceptor, ImposterError> {
    match (cert, key) {
        (Some(cert), Some(key)) => acceptor_from_pem(cert, key),
        (Some(_), None) | (None, Some(_)) => Err(ImposterError::MissingTlsMaterial(
            "both key and cert must be provided".to_string(),
        )),
        (None, None) => match (default_cert, default_key) {
            (Some(cert_path), Some(key_path)) => {
                let cert = read_pem(cert_path)?;
                let key = read_pem(key_path)?;
                acceptor_from_pem(&cert, &key)
            }
            (Some(_), None) | (None, Some(_)) => Err(ImposterError::MissingTlsMaterial(
                "both a default key and a default cert must be configured".to_string(),
            )),
            (None, None) => acceptor_from_pem(BUILTIN_CERT, BUILTIN_KEY),
        },
    }
}

fn read_pem(path: &Path) -> Result<String, ImposterError> {
    std::fs::read_to_string(path)
        .map_err(|e| ImposterError::Tls(format!("failed to read '{}': {e}", path.display())))
}
