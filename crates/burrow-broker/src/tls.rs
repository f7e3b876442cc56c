//! Listener TLS setup.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::info;

use burrow_config::ServerTlsConfig;

use crate::errors::BrokerError;

/// Build a TLS acceptor for a listener, or `None` when TLS is disabled.
///
/// Missing or unreadable key material is a startup-fatal error.
pub fn server_tls_acceptor(tls: &ServerTlsConfig) -> Result<Option<TlsAcceptor>, BrokerError> {
    if !tls.enabled {
        return Ok(None);
    }

    // validate() guarantees both paths when enabled.
    let key_path = tls
        .key
        .as_ref()
        .ok_or_else(|| BrokerError::Tls("ssl.enabled requires ssl.key".to_string()))?;
    let cert_path = tls
        .cert
        .as_ref()
        .ok_or_else(|| BrokerError::Tls("ssl.enabled requires ssl.cert".to_string()))?;

    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| BrokerError::Tls(format!("invalid key/cert pair: {e}")))?;

    info!(cert = %cert_path.display(), "listener TLS enabled");
    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, BrokerError> {
    let file = File::open(path)
        .map_err(|e| BrokerError::Tls(format!("cannot open cert {}: {e}", path.display())))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<_, _>>()
        .map_err(|e| BrokerError::Tls(format!("cannot parse cert {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(BrokerError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, BrokerError> {
    let file = File::open(path)
        .map_err(|e| BrokerError::Tls(format!("cannot open key {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| BrokerError::Tls(format!("cannot parse key {}: {e}", path.display())))?
        .ok_or_else(|| BrokerError::Tls(format!("no private key found in {}", path.display())))
}
