//! Agent error types.

use thiserror::Error;

use burrow_protocol::ProtocolError;

/// Agent-side errors.
///
/// Construction-time variants (`InvalidPattern`, `InvalidUrl`, `Tls`,
/// `Upstream` from client build) are fatal at startup. Everything hit
/// inside the tunnel loop is logged and retried; per-request upstream
/// failures never surface here at all, they become synthetic 500
/// response envelopes.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("invalid rewrite pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: regex::Error,
    },

    #[error("invalid URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("upstream client error: {0}")]
    Upstream(String),

    #[error("connection to broker failed: {0}")]
    ConnectionFailed(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
