//! Broker end of the burrow reverse tunnel.
//!
//! The broker owns two listeners: a public HTTP(S) front-end and a framed
//! tunnel socket that agents dial into. Each HTTP request is matched to a
//! connected agent, shipped over the tunnel as a request envelope, and
//! answered when the correlated response envelope returns, the agent
//! disconnects, or the per-request deadline fires, whichever comes
//! first.

pub mod errors;
pub mod http;
pub mod registry;
pub mod tls;
pub mod tracker;
pub mod tunnel;

pub use errors::BrokerError;
pub use http::HttpFrontend;
pub use registry::{AgentRecord, AgentRegistry};
pub use tracker::{FailureReason, RequestOutcome, RequestTracker};
pub use tunnel::TunnelListener;
