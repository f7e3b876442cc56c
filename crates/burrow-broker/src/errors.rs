//! Broker error types.

use burrow_common::AgentId;
use burrow_protocol::ProtocolError;
use thiserror::Error;

/// Broker-side errors.
///
/// Only the startup variants (`Bind`, `Tls`) are fatal; everything else
/// resolves to a synthetic HTTP response for the affected request.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// No agents are connected. Surfaces as HTTP 503.
    #[error("no agents connected")]
    AgentUnavailable,

    /// A framed write to an agent socket failed. The agent is
    /// unregistered; affected requests get a synthetic failure.
    #[error("write to agent {agent_id} failed: {source}")]
    AgentWriteFailed {
        agent_id: AgentId,
        source: ProtocolError,
    },

    /// Send targeted an agent that is no longer registered.
    #[error("agent {0} is not registered")]
    AgentNotRegistered(AgentId),

    #[error("failed to bind {endpoint} listener on {addr}: {source}")]
    Bind {
        endpoint: &'static str,
        addr: String,
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),
}
