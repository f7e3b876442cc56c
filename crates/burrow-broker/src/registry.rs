//! Connected-agent registry.
//!
//! Tracks every live tunnel connection, hands out agents round-robin for
//! new requests, and serializes frame writes per agent socket.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use burrow_common::AgentId;
use burrow_protocol::write_frame;

use crate::errors::BrokerError;

/// Write half of one agent's tunnel socket.
pub type AgentWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One registered agent connection.
///
/// The writer sits behind an async mutex: concurrent dispatches to the
/// same agent serialize here, so frames never interleave on the wire.
pub struct AgentRecord {
    id: AgentId,
    writer: Mutex<AgentWriter>,
}

impl AgentRecord {
    pub fn id(&self) -> &AgentId {
        &self.id
    }
}

/// Registry of connected agents.
pub struct AgentRegistry {
    agents: DashMap<AgentId, Arc<AgentRecord>>,
    /// Round-robin order; kept in sync with `agents`.
    order: parking_lot::Mutex<Vec<AgentId>>,
    cursor: AtomicUsize,
    max_frame_bytes: usize,
}

impl AgentRegistry {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            agents: DashMap::new(),
            order: parking_lot::Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            max_frame_bytes,
        }
    }

    /// Register a freshly accepted tunnel connection under a new ID.
    pub fn register(&self, writer: AgentWriter) -> AgentId {
        let id = AgentId::new();
        let record = Arc::new(AgentRecord {
            id: id.clone(),
            writer: Mutex::new(writer),
        });
        self.agents.insert(id.clone(), record);
        self.order.lock().push(id.clone());
        info!(agent_id = %id, connected = self.agents.len(), "agent registered");
        id
    }

    /// Remove an agent. Callers then fail its pending requests via the
    /// tracker. Returns false when the agent was already gone.
    pub fn unregister(&self, id: &AgentId) -> bool {
        let removed = self.agents.remove(id).is_some();
        if removed {
            self.order.lock().retain(|a| a != id);
            info!(agent_id = %id, connected = self.agents.len(), "agent unregistered");
        }
        removed
    }

    /// Pick an agent for a new request, round-robin over live agents.
    pub fn pick(&self) -> Option<Arc<AgentRecord>> {
        let order = self.order.lock();
        if order.is_empty() {
            return None;
        }

        // The order list and the map can briefly disagree during
        // unregistration; skip stale entries.
        for _ in 0..order.len() {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % order.len();
            if let Some(record) = self.agents.get(&order[idx]) {
                return Some(Arc::clone(record.value()));
            }
        }
        None
    }

    /// Frame and write one payload to the given agent.
    ///
    /// Takes the agent's send lock for the duration of the write. A write
    /// error unregisters the agent and propagates as
    /// [`BrokerError::AgentWriteFailed`].
    pub async fn send(&self, id: &AgentId, payload: &[u8]) -> Result<(), BrokerError> {
        let record = self
            .agents
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| BrokerError::AgentNotRegistered(id.clone()))?;

        let mut writer = record.writer.lock().await;
        match write_frame(&mut *writer, payload, self.max_frame_bytes).await {
            Ok(()) => {
                debug!(agent_id = %id, bytes = payload.len(), "frame sent to agent");
                Ok(())
            }
            Err(source) => {
                warn!(agent_id = %id, error = %source, "agent write failed, unregistering");
                drop(writer);
                self.unregister(id);
                Err(BrokerError::AgentWriteFailed {
                    agent_id: id.clone(),
                    source,
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink() -> AgentWriter {
        Box::new(tokio::io::sink())
    }

    #[tokio::test]
    async fn test_register_pick_unregister() {
        let registry = AgentRegistry::new(1024);
        assert!(registry.pick().is_none());

        let id = registry.register(sink());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.pick().unwrap().id(), &id);

        assert!(registry.unregister(&id));
        assert!(!registry.unregister(&id));
        assert!(registry.pick().is_none());
    }

    #[tokio::test]
    async fn test_pick_rotates_over_agents() {
        let registry = AgentRegistry::new(1024);
        let a = registry.register(sink());
        let b = registry.register(sink());

        let first = registry.pick().unwrap().id().clone();
        let second = registry.pick().unwrap().id().clone();
        assert_ne!(first, second);
        assert!([&a, &b].contains(&&first));
        assert!([&a, &b].contains(&&second));

        // Cycle comes back around.
        assert_eq!(registry.pick().unwrap().id(), &first);
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent() {
        let registry = AgentRegistry::new(1024);
        let ghost = AgentId::new();
        let err = registry.send(&ghost, b"payload").await.unwrap_err();
        assert!(matches!(err, BrokerError::AgentNotRegistered(_)));
    }

    #[tokio::test]
    async fn test_send_frames_payload() {
        let (client, mut server) = tokio::io::duplex(1024);
        let registry = AgentRegistry::new(1024);
        let id = registry.register(Box::new(client));

        registry.send(&id, b"hello agent").await.unwrap();

        let payload = burrow_protocol::read_frame(&mut server, 1024).await.unwrap();
        assert_eq!(&payload[..], b"hello agent");
    }

    #[tokio::test]
    async fn test_write_failure_unregisters() {
        let (client, server) = tokio::io::duplex(16);
        drop(server);
        let registry = AgentRegistry::new(1024);
        let id = registry.register(Box::new(client));

        let err = registry.send(&id, b"payload").await.unwrap_err();
        assert!(matches!(err, BrokerError::AgentWriteFailed { .. }));
        assert!(registry.is_empty());
    }
}
