//! Common types shared by the burrow broker and agent.

pub mod ids;
pub mod telemetry;

pub use ids::{AgentId, RequestId};
pub use telemetry::init_tracing;
