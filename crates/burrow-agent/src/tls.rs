//! Broker-facing TLS connector.

use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use tokio_rustls::TlsConnector;
use tracing::{info, warn};

use burrow_config::ClientTlsConfig;

use crate::errors::AgentError;

/// Build the TLS connector for the tunnel, or `None` when TLS is off.
///
/// With `reject_unauthorized = false` the broker certificate is accepted
/// without verification. Otherwise the configured CA bundle (or the
/// webpki roots when none is given) verifies it.
pub fn client_tls_connector(tls: &ClientTlsConfig) -> Result<Option<TlsConnector>, AgentError> {
    if !tls.enabled {
        return Ok(None);
    }

    let config = if tls.reject_unauthorized {
        let mut roots = rustls::RootCertStore::empty();
        match &tls.ca {
            Some(ca_path) => {
                let file = File::open(ca_path).map_err(|e| {
                    AgentError::Tls(format!("cannot open CA bundle {}: {e}", ca_path.display()))
                })?;
                let mut added = 0;
                for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                    let cert = cert.map_err(|e| {
                        AgentError::Tls(format!(
                            "cannot parse CA bundle {}: {e}",
                            ca_path.display()
                        ))
                    })?;
                    roots
                        .add(cert)
                        .map_err(|e| AgentError::Tls(format!("rejected CA certificate: {e}")))?;
                    added += 1;
                }
                if added == 0 {
                    return Err(AgentError::Tls(format!(
                        "no CA certificates found in {}",
                        ca_path.display()
                    )));
                }
                info!(ca = %ca_path.display(), certs = added, "tunnel TLS using configured CA");
            }
            None => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    } else {
        warn!("tunnel TLS certificate verification disabled");
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new()))
            .with_no_client_auth()
    };

    Ok(Some(TlsConnector::from(Arc::new(config))))
}

/// Verifier used when `reject_unauthorized = false`: accepts any broker
/// certificate while still checking nothing about it.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl AcceptAnyServerCert {
    fn new() -> Self {
        Self {
            provider: Arc::new(rustls::crypto::aws_lc_rs::default_provider()),
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
