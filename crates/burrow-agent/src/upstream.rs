//! Upstream HTTP client.
//!
//! One shared reqwest client performs the real origin calls. Any failure
//! reaching the origin (connect, DNS, timeout, body read) is synthesized
//! as a 500 response envelope so the broker side always gets an answer.

use http::{HeaderMap, HeaderName, HeaderValue, Method};
use tracing::{debug, warn};
use url::Url;

use burrow_config::UpstreamTlsConfig;
use burrow_protocol::{Headers, RequestEnvelope, ResponseEnvelope};

use crate::errors::AgentError;

/// Shared client for origin calls.
pub struct UpstreamClient {
    client: reqwest::Client,
}

impl UpstreamClient {
    /// Build the client. `reject_unauthorized = false` accepts any
    /// upstream certificate.
    pub fn new(ssl: &UpstreamTlsConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!ssl.reject_unauthorized)
            .build()
            .map_err(|e| AgentError::Upstream(e.to_string()))?;
        Ok(Self { client })
    }

    /// Perform the origin call described by `req` against `target`.
    ///
    /// Never fails: upstream errors become a synthetic 500 envelope.
    pub async fn call(&self, req: &RequestEnvelope, target: Url) -> ResponseEnvelope {
        match self.try_call(req, target).await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    request_id = %req.request_id,
                    url = %req.url,
                    error = %e,
                    "upstream call failed"
                );
                ResponseEnvelope::internal_error(req.agent_id.clone(), req.request_id.clone())
            }
        }
    }

    async fn try_call(
        &self,
        req: &RequestEnvelope,
        target: Url,
    ) -> Result<ResponseEnvelope, AgentError> {
        let method = Method::from_bytes(req.method.as_bytes())
            .map_err(|e| AgentError::Upstream(format!("invalid method '{}': {e}", req.method)))?;

        let mut headers = HeaderMap::new();
        for (name, value) in req.headers.iter_flat() {
            // Host must come from the target URL, not the public request.
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => warn!(header = name, "dropping invalid header on upstream request"),
            }
        }

        debug!(method = %method, target = %target, "calling upstream");
        let response = self
            .client
            .request(method, target)
            .headers(headers)
            .body(req.body.clone())
            .send()
            .await
            .map_err(|e| AgentError::Upstream(e.to_string()))?;

        let status_code = response.status().as_u16();
        let mut response_headers = Headers::new();
        for (name, value) in response.headers().iter() {
            response_headers.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| AgentError::Upstream(e.to_string()))?;

        Ok(ResponseEnvelope {
            agent_id: req.agent_id.clone(),
            request_id: req.request_id.clone(),
            status_code,
            headers: response_headers,
            body,
        })
    }
}
