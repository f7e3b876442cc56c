//! Tunnel client: dial, serve, redial.
//!
//! The loop is Disconnected → Dialing → Connected → Disconnected, forever.
//! While connected, each decoded request envelope is handled on its own
//! task so slow origins never stall the tunnel read side; responses share
//! the socket through a send lock.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use burrow_config::Config;
use burrow_protocol::{
    decode_envelope, encode_envelope, read_frame, write_frame, Envelope, ProtocolError,
    RequestEnvelope, ResponseEnvelope,
};

use crate::errors::AgentError;
use crate::rewrite::RewriteEngine;
use crate::tls::client_tls_connector;
use crate::upstream::UpstreamClient;

/// The agent side of the tunnel.
pub struct TunnelClient {
    host: String,
    addr: String,
    tls: Option<TlsConnector>,
    reconnect_delay: Duration,
    max_frame_bytes: usize,
    rewrite: Arc<RewriteEngine>,
    upstream: Arc<UpstreamClient>,
}

impl TunnelClient {
    /// Build the client from configuration. Rewrite, TLS, and upstream
    /// setup errors are startup-fatal.
    pub fn new(config: &Config) -> Result<Self, AgentError> {
        let rewrite = RewriteEngine::new(&config.client.proxy)?;
        let upstream = UpstreamClient::new(&config.client.proxy.ssl)?;
        let tls = client_tls_connector(&config.client.server.ssl)?;

        Ok(Self {
            host: config.client.server.host.clone(),
            addr: config.client.server.addr(),
            tls,
            reconnect_delay: config.reconnect_delay(),
            max_frame_bytes: config.limits.max_frame_bytes,
            rewrite: Arc::new(rewrite),
            upstream: Arc::new(upstream),
        })
    }

    /// Dial-serve-redial forever.
    pub async fn run(&self) {
        loop {
            match self.connect_and_serve().await {
                Err(AgentError::Protocol(ProtocolError::ConnectionClosed)) => {
                    info!("broker closed the tunnel");
                }
                Err(e) => {
                    warn!(addr = %self.addr, error = %e, "tunnel connection failed");
                }
                Ok(()) => {}
            }

            debug!(delay_ms = self.reconnect_delay.as_millis() as u64, "redialing after delay");
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn connect_and_serve(&self) -> Result<(), AgentError> {
        let stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|e| AgentError::ConnectionFailed(format!("{}: {e}", self.addr)))?;

        match &self.tls {
            Some(connector) => {
                let server_name = ServerName::try_from(self.host.clone())
                    .map_err(|e| AgentError::Tls(format!("invalid server name: {e}")))?;
                let tls_stream = connector
                    .connect(server_name, stream)
                    .await
                    .map_err(|e| AgentError::Tls(format!("handshake with broker failed: {e}")))?;
                info!(addr = %self.addr, tls = true, "connected to broker");
                self.serve(tls_stream).await
            }
            None => {
                info!(addr = %self.addr, tls = false, "connected to broker");
                self.serve(stream).await
            }
        }
    }

    /// Pump frames until the connection dies.
    async fn serve<S>(&self, stream: S) -> Result<(), AgentError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut reader, writer) = tokio::io::split(stream);
        let writer = Arc::new(Mutex::new(writer));

        loop {
            let payload = read_frame(&mut reader, self.max_frame_bytes).await?;

            match decode_envelope(&payload) {
                Ok(Envelope::Request(req)) => {
                    debug!(
                        request_id = %req.request_id,
                        method = %req.method,
                        url = %req.url,
                        "request received"
                    );
                    let rewrite = Arc::clone(&self.rewrite);
                    let upstream = Arc::clone(&self.upstream);
                    let writer = Arc::clone(&writer);
                    let max_frame_bytes = self.max_frame_bytes;
                    tokio::spawn(async move {
                        handle_request(req, rewrite, upstream, writer, max_frame_bytes).await;
                    });
                }
                Ok(Envelope::Response(resp)) => {
                    warn!(
                        request_id = %resp.request_id,
                        "unexpected response envelope from broker, discarding"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "malformed envelope, skipping frame");
                }
            }
        }
    }
}

/// Resolve, call upstream, and return the response envelope on the tunnel.
async fn handle_request<S>(
    req: RequestEnvelope,
    rewrite: Arc<RewriteEngine>,
    upstream: Arc<UpstreamClient>,
    writer: Arc<Mutex<WriteHalf<S>>>,
    max_frame_bytes: usize,
) where
    S: AsyncWrite + Send + Unpin,
{
    let response = match rewrite.resolve(&req.url) {
        Ok(target) => upstream.call(&req, target).await,
        Err(e) => {
            warn!(request_id = %req.request_id, url = %req.url, error = %e, "cannot resolve target URL");
            ResponseEnvelope::internal_error(req.agent_id.clone(), req.request_id.clone())
        }
    };

    let request_id = response.request_id.clone();
    match encode_envelope(&Envelope::Response(response)) {
        Ok(payload) => {
            let mut writer = writer.lock().await;
            if let Err(e) = write_frame(&mut *writer, &payload, max_frame_bytes).await {
                // Tunnel likely died mid-call; the envelope is dropped and
                // the broker fails the request on its own.
                debug!(request_id = %request_id, error = %e, "response dropped, tunnel gone");
            }
        }
        Err(e) => {
            warn!(request_id = %request_id, error = %e, "failed to encode response envelope");
        }
    }
}
