//! Public HTTP(S) front-end.
//!
//! One task per connection; each request is marshalled into a request
//! envelope, dispatched to a picked agent, and answered from the tracker
//! outcome. The tunnel is not HTTP-semantic-aware: headers and body are
//! carried as-is, and request bodies are read fully into memory before
//! dispatch.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, warn};

use burrow_protocol::{encode_envelope, Envelope, Headers, RequestEnvelope};

use crate::registry::AgentRegistry;
use crate::tracker::{FailureReason, RequestOutcome, RequestTracker};

type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// HTTP listener that feeds the tunnel.
pub struct HttpFrontend {
    registry: Arc<AgentRegistry>,
    tracker: Arc<RequestTracker>,
    request_timeout: Duration,
}

impl HttpFrontend {
    pub fn new(
        registry: Arc<AgentRegistry>,
        tracker: Arc<RequestTracker>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            tracker,
            request_timeout,
        }
    }

    /// Accept loop. Runs until the process exits.
    pub async fn run(self: Arc<Self>, listener: TcpListener, tls: Option<TlsAcceptor>) {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "failed to accept http connection");
                    continue;
                }
            };

            debug!(peer = %peer, "http connection accepted");
            let frontend = Arc::clone(&self);
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls {
                    Some(acceptor) => match acceptor.accept(stream).await {
                        Ok(tls_stream) => frontend.serve_connection(tls_stream).await,
                        Err(e) => warn!(peer = %peer, error = %e, "http TLS handshake failed"),
                    },
                    None => frontend.serve_connection(stream).await,
                }
            });
        }
    }

    async fn serve_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let io = TokioIo::new(stream);
        let frontend = Arc::clone(&self);
        let service = service_fn(move |req| {
            let frontend = Arc::clone(&frontend);
            async move { frontend.dispatch(req).await }
        });

        if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
            debug!(error = %e, "http connection ended with error");
        }
    }

    /// Marshal one HTTP request over the tunnel and await its resolution.
    async fn dispatch(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody>, hyper::Error> {
        let Some(agent) = self.registry.pick() else {
            return Ok(text_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "No clients available",
            ));
        };
        let agent_id = agent.id().clone();

        let (parts, body) = req.into_parts();
        let body = body.collect().await?.to_bytes();

        let url = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string());

        let mut headers = Headers::new();
        for (name, value) in parts.headers.iter() {
            headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        let (request_id, rx) = self.tracker.open(agent_id.clone());
        let envelope = Envelope::Request(RequestEnvelope {
            agent_id: agent_id.to_string(),
            request_id: request_id.to_string(),
            method: parts.method.to_string(),
            url,
            headers,
            body,
        });

        match encode_envelope(&envelope) {
            Ok(payload) => {
                if let Err(e) = self.registry.send(&agent_id, &payload).await {
                    warn!(
                        agent_id = %agent_id,
                        request_id = %request_id,
                        error = %e,
                        "dispatch to agent failed"
                    );
                    self.tracker.fail(&request_id, FailureReason::WriteFailed);
                }
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "failed to encode request envelope");
                self.tracker.fail(&request_id, FailureReason::WriteFailed);
            }
        }

        let outcome = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Tracker went away without resolving; treat as a lost agent.
            Ok(Err(_)) => RequestOutcome::Failed(FailureReason::AgentDisconnected),
            Err(_) => {
                self.tracker.fail(&request_id, FailureReason::Timeout);
                RequestOutcome::Failed(FailureReason::Timeout)
            }
        };

        Ok(render_outcome(outcome))
    }
}

fn render_outcome(outcome: RequestOutcome) -> Response<BoxBody> {
    match outcome {
        RequestOutcome::Completed(resp) => {
            let status = StatusCode::from_u16(resp.status_code).unwrap_or_else(|_| {
                warn!(status = resp.status_code, "agent returned invalid status code");
                StatusCode::BAD_GATEWAY
            });

            let mut response = Response::new(full_body(resp.body));
            *response.status_mut() = status;
            for (name, value) in resp.headers.iter_flat() {
                let Ok(name) = header::HeaderName::from_bytes(name.as_bytes()) else {
                    warn!(header = name, "dropping invalid header name from agent response");
                    continue;
                };
                let Ok(value) = header::HeaderValue::from_str(value) else {
                    warn!(header = %name, "dropping invalid header value from agent response");
                    continue;
                };
                response.headers_mut().append(name, value);
            }
            response
        }
        RequestOutcome::Failed(reason) => {
            let status = StatusCode::from_u16(reason.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            text_response(status, reason.message())
        }
    }
}

fn text_response(status: StatusCode, body: &str) -> Response<BoxBody> {
    let mut response = Response::new(full_body(Bytes::copy_from_slice(body.as_bytes())));
    *response.status_mut() = status;
    response
}

fn full_body(bytes: Bytes) -> BoxBody {
    Full::new(bytes).map_err(|never| match never {}).boxed()
}
