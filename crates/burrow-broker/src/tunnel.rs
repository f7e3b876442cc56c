//! Tunnel listener for agent connections.
//!
//! Each accepted socket becomes one registered agent. The read loop
//! correlates response envelopes back to pending requests; any framing
//! error, read error, or EOF tears the connection down and fails every
//! request still bound to that agent.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, ReadHalf};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use burrow_common::{AgentId, RequestId};
use burrow_protocol::{decode_envelope, read_frame, Envelope, ProtocolError};

use crate::registry::AgentRegistry;
use crate::tracker::{FailureReason, RequestTracker};

/// Framed-socket listener the agents dial into.
pub struct TunnelListener {
    registry: Arc<AgentRegistry>,
    tracker: Arc<RequestTracker>,
    max_frame_bytes: usize,
}

impl TunnelListener {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tracker: Arc<RequestTracker>,
        max_frame_bytes: usize,
    ) -> Self {
        Self {
            registry,
            tracker,
            max_frame_bytes,
        }
    }

    /// Accept loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, listener: TcpListener, tls: Option<TlsAcceptor>) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "failed to accept tunnel connection");
                    continue;
                }
            };

            debug!(peer = %peer, "tunnel connection accepted");
            let this = Arc::clone(&self);
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => this.handle_agent(tls_stream).await,
                        Err(e) => warn!(peer = %peer, error = %e, "tunnel TLS handshake failed"),
                    },
                    None => this.handle_agent(stream).await,
                }
            });
        }
    }

    /// Register one agent connection and pump its frames until it dies.
    async fn handle_agent<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let agent_id = self.registry.register(Box::new(write_half));

        let result = self.read_loop(read_half, &agent_id).await;
        match result {
            Err(ProtocolError::ConnectionClosed) => {
                info!(agent_id = %agent_id, "agent disconnected");
            }
            Err(e) => {
                warn!(agent_id = %agent_id, error = %e, "tunnel read failed, dropping agent");
            }
            Ok(()) => {}
        }

        self.registry.unregister(&agent_id);
        let failed = self
            .tracker
            .fail_by_agent(&agent_id, FailureReason::AgentDisconnected);
        if failed > 0 {
            warn!(agent_id = %agent_id, failed, "failed in-flight requests for dropped agent");
        }
    }

    async fn read_loop<S>(
        &self,
        mut reader: ReadHalf<S>,
        agent_id: &AgentId,
    ) -> Result<(), ProtocolError>
    where
        S: AsyncRead + Send + Unpin,
    {
        loop {
            let payload = read_frame(&mut reader, self.max_frame_bytes).await?;

            match decode_envelope(&payload) {
                Ok(Envelope::Response(resp)) => {
                    let request_id = RequestId::from_string(resp.request_id.clone());
                    if !self.tracker.complete(&request_id, resp) {
                        warn!(
                            agent_id = %agent_id,
                            request_id = %request_id,
                            "response without pending request, discarding"
                        );
                    }
                }
                Ok(Envelope::Request(req)) => {
                    warn!(
                        agent_id = %agent_id,
                        request_id = %req.request_id,
                        "unexpected request envelope from agent, discarding"
                    );
                }
                Err(e) => {
                    warn!(agent_id = %agent_id, error = %e, "malformed envelope, skipping frame");
                }
            }
        }
    }
}
