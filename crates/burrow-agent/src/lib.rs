//! Agent end of the burrow reverse tunnel.
//!
//! The agent dials out to the broker, receives request envelopes over the
//! framed tunnel, resolves each to a target URL (rewrite rules, then base
//! resolution), performs the real HTTP(S) call to the origin, and returns
//! the correlated response envelope. Connection loss feeds an unbounded
//! redial loop.

pub mod errors;
pub mod rewrite;
pub mod tls;
pub mod tunnel;
pub mod upstream;

pub use errors::AgentError;
pub use rewrite::RewriteEngine;
pub use tunnel::TunnelClient;
pub use upstream::UpstreamClient;
