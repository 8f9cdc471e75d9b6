//! Correlation-keyed request/response tracking.
//!
//! The tracker is the only in-memory state shared between concurrent user
//! turns: a map from correlation ID to the oneshot channel on which the
//! originating turn waits for its agent reply.  The global message consumer
//! feeds responses in; the conversation engine blocks on the receiver with a
//! per-request timeout.
//!
//! # Contract
//!
//! The receiver returned by [`CorrelationTracker::register_request`] either
//! yields exactly one response whose correlation ID matches, or is closed
//! with no value (request cleaned up on timeout, cancellation, or shutdown).
//! The internal mutex is held only for map mutation, never across a channel
//! send that could block — oneshot sends are non-blocking by construction.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use tokio::sync::{oneshot, Mutex};

/// An agent's reply routed back to the turn that requested it.
#[derive(Debug, Clone)]
pub struct AgentToAIMessage {
    /// Agent that produced the reply.
    pub from_agent_id: String,
    /// Reply payload.
    pub content: String,
    /// Correlation ID copied verbatim from the originating request.
    pub correlation_id: String,
    /// When the reply was observed by the consumer.
    pub received_at: DateTime<Utc>,
}

/// Errors surfaced by the tracker.
#[derive(Debug)]
pub enum CorrelationError {
    /// A request with this correlation ID is already outstanding.
    AlreadyRegistered(String),
    /// No outstanding request matches this correlation ID (it may have timed
    /// out already).
    UnknownCorrelation(String),
    /// The waiting turn went away before the response could be delivered.
    ReceiverDropped(String),
}

impl fmt::Display for CorrelationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationError::AlreadyRegistered(id) => {
                write!(f, "correlation ID already registered: {}", id)
            }
            CorrelationError::UnknownCorrelation(id) => {
                write!(f, "no pending request for correlation ID: {}", id)
            }
            CorrelationError::ReceiverDropped(id) => {
                write!(f, "receiver dropped for correlation ID: {}", id)
            }
        }
    }
}

impl Error for CorrelationError {}

struct PendingRequest {
    sender: oneshot::Sender<AgentToAIMessage>,
    user_id: String,
    deadline: DateTime<Utc>,
}

/// Process-wide map of outstanding agent requests, keyed by correlation ID.
///
/// Safe for concurrent use; see the module docs for the delivery contract.
pub struct CorrelationTracker {
    pending: Mutex<HashMap<String, PendingRequest>>,
}

impl CorrelationTracker {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Register an outstanding request and obtain the receiver its response
    /// will be delivered on. At most one request per correlation ID may be
    /// outstanding; a second registration is an error.
    pub async fn register_request(
        &self,
        correlation_id: &str,
        user_id: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<AgentToAIMessage>, CorrelationError> {
        let (tx, rx) = oneshot::channel();
        let mut pending = self.pending.lock().await;
        if pending.contains_key(correlation_id) {
            return Err(CorrelationError::AlreadyRegistered(
                correlation_id.to_string(),
            ));
        }
        pending.insert(
            correlation_id.to_string(),
            PendingRequest {
                sender: tx,
                user_id: user_id.to_string(),
                deadline: Utc::now() + timeout,
            },
        );
        Ok(rx)
    }

    /// Deliver a response to the turn waiting on its correlation ID and drop
    /// the entry. Delivery is non-blocking; the channel closes after the
    /// single value.
    pub async fn route_response(&self, message: AgentToAIMessage) -> Result<(), CorrelationError> {
        let entry = {
            let mut pending = self.pending.lock().await;
            pending.remove(&message.correlation_id)
        };
        match entry {
            Some(request) => {
                let correlation_id = message.correlation_id.clone();
                request
                    .sender
                    .send(message)
                    .map_err(|_| CorrelationError::ReceiverDropped(correlation_id))
            }
            None => Err(CorrelationError::UnknownCorrelation(
                message.correlation_id,
            )),
        }
    }

    /// Drop an outstanding request, closing its channel with no value.
    /// Idempotent: cleaning an unknown ID is a no-op.
    pub async fn cleanup_request(&self, correlation_id: &str) {
        let mut pending = self.pending.lock().await;
        pending.remove(correlation_id);
    }

    /// Drop every outstanding request. Invoked on shutdown; every waiting
    /// turn observes its channel closing with no value.
    pub async fn cleanup_all(&self) {
        let mut pending = self.pending.lock().await;
        pending.clear();
    }

    /// Number of outstanding requests.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// The user a correlation ID belongs to, if still outstanding.
    pub async fn user_for(&self, correlation_id: &str) -> Option<String> {
        self.pending
            .lock()
            .await
            .get(correlation_id)
            .map(|p| p.user_id.clone())
    }

    /// Drop every request whose deadline has passed. Returns the dropped
    /// correlation IDs so callers can log them.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Utc::now();
        let mut pending = self.pending.lock().await;
        let expired: Vec<String> = pending
            .iter()
            .filter(|(_, req)| req.deadline < now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            pending.remove(id);
        }
        expired
    }
}

impl Default for CorrelationTracker {
    fn default() -> Self {
        Self::new()
    }
}
