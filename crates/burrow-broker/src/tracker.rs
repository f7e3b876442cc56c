//! In-flight request tracker.
//!
//! Maps request IDs to the front-end tasks waiting on them. Response
//! arrival, agent disconnect, and deadline expiry race to resolve each
//! entry; removal from the map is the atomic claim, so the responder is
//! written to exactly once and losers are silent no-ops.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use burrow_common::{AgentId, RequestId};
use burrow_protocol::ResponseEnvelope;

/// Why a pending request was resolved without a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// The agent's tunnel socket closed or errored.
    AgentDisconnected,
    /// The broker failed to write the request frame to the agent.
    WriteFailed,
    /// The per-request deadline fired.
    Timeout,
}

impl FailureReason {
    /// HTTP status the caller receives.
    pub fn status_code(&self) -> u16 {
        match self {
            FailureReason::AgentDisconnected => 503,
            FailureReason::WriteFailed => 500,
            FailureReason::Timeout => 504,
        }
    }

    /// Body text the caller receives.
    pub fn message(&self) -> &'static str {
        match self {
            FailureReason::AgentDisconnected => "Client disconnected",
            FailureReason::WriteFailed => "Client error",
            FailureReason::Timeout => "Timeout",
        }
    }
}

/// Resolution of one pending request.
#[derive(Debug)]
pub enum RequestOutcome {
    Completed(ResponseEnvelope),
    Failed(FailureReason),
}

struct Pending {
    agent_id: AgentId,
    tx: oneshot::Sender<RequestOutcome>,
}

/// Pending-request map keyed by request ID.
#[derive(Default)]
pub struct RequestTracker {
    pending: DashMap<RequestId, Pending>,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a pending entry bound to `agent_id`.
    ///
    /// Returns the minted request ID and the receiver the front-end task
    /// awaits (under its own deadline).
    pub fn open(&self, agent_id: AgentId) -> (RequestId, oneshot::Receiver<RequestOutcome>) {
        let request_id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.pending
            .insert(request_id.clone(), Pending { agent_id, tx });
        (request_id, rx)
    }

    /// Deliver a response envelope. Returns false when no entry matches
    /// (already resolved, or never opened); the caller logs and discards.
    pub fn complete(&self, request_id: &RequestId, response: ResponseEnvelope) -> bool {
        match self.pending.remove(request_id) {
            Some((_, entry)) => {
                // A dropped receiver means the waiter gave up after its
                // deadline; the response is simply discarded.
                let _ = entry.tx.send(RequestOutcome::Completed(response));
                true
            }
            None => false,
        }
    }

    /// Resolve an entry with a synthetic failure. Returns false when no
    /// entry matches.
    pub fn fail(&self, request_id: &RequestId, reason: FailureReason) -> bool {
        match self.pending.remove(request_id) {
            Some((_, entry)) => {
                debug!(request_id = %request_id, ?reason, "pending request failed");
                let _ = entry.tx.send(RequestOutcome::Failed(reason));
                true
            }
            None => false,
        }
    }

    /// Fail every entry bound to `agent_id`. Returns how many were
    /// resolved.
    pub fn fail_by_agent(&self, agent_id: &AgentId, reason: FailureReason) -> usize {
        let affected: Vec<RequestId> = self
            .pending
            .iter()
            .filter(|entry| &entry.agent_id == agent_id)
            .map(|entry| entry.key().clone())
            .collect();

        let mut failed = 0;
        for request_id in affected {
            if self.fail(&request_id, reason) {
                failed += 1;
            }
        }
        failed
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_protocol::Headers;
    use bytes::Bytes;

    fn response_for(request_id: &RequestId, body: &'static [u8]) -> ResponseEnvelope {
        ResponseEnvelope {
            agent_id: "agent".to_string(),
            request_id: request_id.to_string(),
            status_code: 200,
            headers: Headers::new(),
            body: Bytes::from_static(body),
        }
    }

    #[tokio::test]
    async fn test_complete_delivers_once() {
        let tracker = RequestTracker::new();
        let agent = AgentId::new();
        let (request_id, rx) = tracker.open(agent);

        assert!(tracker.complete(&request_id, response_for(&request_id, b"hi")));
        // Second resolution of any kind is a no-op.
        assert!(!tracker.complete(&request_id, response_for(&request_id, b"again")));
        assert!(!tracker.fail(&request_id, FailureReason::Timeout));

        match rx.await.unwrap() {
            RequestOutcome::Completed(resp) => assert_eq!(&resp.body[..], b"hi"),
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_wins_race_when_first() {
        let tracker = RequestTracker::new();
        let agent = AgentId::new();
        let (request_id, rx) = tracker.open(agent);

        assert!(tracker.fail(&request_id, FailureReason::AgentDisconnected));
        assert!(!tracker.complete(&request_id, response_for(&request_id, b"late")));

        match rx.await.unwrap() {
            RequestOutcome::Failed(reason) => {
                assert_eq!(reason, FailureReason::AgentDisconnected);
                assert_eq!(reason.status_code(), 503);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fail_by_agent_scoped() {
        let tracker = RequestTracker::new();
        let dead = AgentId::new();
        let alive = AgentId::new();

        let (_id1, rx1) = tracker.open(dead.clone());
        let (_id2, rx2) = tracker.open(dead.clone());
        let (_id3, rx3) = tracker.open(alive.clone());

        assert_eq!(
            tracker.fail_by_agent(&dead, FailureReason::AgentDisconnected),
            2
        );
        assert_eq!(tracker.len(), 1);

        assert!(matches!(rx1.await.unwrap(), RequestOutcome::Failed(_)));
        assert!(matches!(rx2.await.unwrap(), RequestOutcome::Failed(_)));

        // The survivor still completes normally.
        let ids: Vec<RequestId> = tracker.pending.iter().map(|e| e.key().clone()).collect();
        assert!(tracker.complete(&ids[0], response_for(&ids[0], b"ok")));
        assert!(matches!(rx3.await.unwrap(), RequestOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_complete_after_waiter_gave_up() {
        let tracker = RequestTracker::new();
        let (request_id, rx) = tracker.open(AgentId::new());
        drop(rx);

        // Entry still existed, so this counts as the resolution even
        // though nobody is listening.
        assert!(tracker.complete(&request_id, response_for(&request_id, b"late")));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(FailureReason::AgentDisconnected.status_code(), 503);
        assert_eq!(FailureReason::WriteFailed.status_code(), 500);
        assert_eq!(FailureReason::Timeout.status_code(), 504);
        assert_eq!(FailureReason::AgentDisconnected.message(), "Client disconnected");
        assert_eq!(FailureReason::WriteFailed.message(), "Client error");
        assert_eq!(FailureReason::Timeout.message(), "Timeout");
    }
}
