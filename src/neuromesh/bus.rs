//! Correlation-enforcing message bus facade.
//!
//! The transport underneath NeuroMesh is a generic publish/subscribe broker
//! abstracted behind [`MessageBroker`]; this module layers the system's
//! messaging rules on top of it:
//!
//! - every envelope carries a non-empty correlation ID (validated before the
//!   transport is touched, so the exact error text is observable regardless
//!   of backend),
//! - sends are typed by participant pair ([`MessageBus::send_to_agent`],
//!   [`MessageBus::send_to_ai`], [`MessageBus::send_between_agents`],
//!   [`MessageBus::send_user_to_ai`]),
//! - delivery is at-least-once; consumers deduplicate on
//!   `(correlation_id, message_type)`.
//!
//! [`InMemoryBroker`] is the test/local backend: per-topic FIFO queues with
//! a backlog for messages published before the subscriber attaches, which
//! preserves per-(sender, recipient) ordering.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Exact validation error text returned on a missing correlation ID; agent
/// authors grep for it.
pub const MISSING_CORRELATION_ERROR: &str = "correlation ID is required for all messages";

/// Participant ID of the orchestrator's inbound queue.
pub const ORCHESTRATOR_PARTICIPANT: &str = "ai-orchestrator";

/// Classification of a bus envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "AI_TO_AGENT")]
    AiToAgent,
    #[serde(rename = "AGENT_TO_AI")]
    AgentToAi,
    #[serde(rename = "AGENT_TO_AGENT")]
    AgentToAgent,
    #[serde(rename = "USER_TO_AI")]
    UserToAi,
    #[serde(rename = "REQUEST")]
    Request,
    #[serde(rename = "RESPONSE")]
    Response,
    #[serde(rename = "NOTIFICATION")]
    Notification,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::AiToAgent => "AI_TO_AGENT",
            MessageType::AgentToAi => "AGENT_TO_AI",
            MessageType::AgentToAgent => "AGENT_TO_AGENT",
            MessageType::UserToAi => "USER_TO_AI",
            MessageType::Request => "REQUEST",
            MessageType::Response => "RESPONSE",
            MessageType::Notification => "NOTIFICATION",
        }
    }
}

/// The envelope every message crossing the bus is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique message id.
    pub id: String,
    /// Sending participant.
    pub from_id: String,
    /// Receiving participant (also the topic it is published to).
    pub to_id: String,
    /// String payload.
    pub content: String,
    /// Envelope classification.
    pub message_type: MessageType,
    /// Correlation ID — required, non-empty, preserved verbatim by agents in
    /// their replies.
    pub correlation_id: String,
    /// Send time.
    pub timestamp: DateTime<Utc>,
    /// Small flat context map.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl BusMessage {
    /// Build an envelope with a fresh message id and the current time.
    pub fn new(
        from_id: &str,
        to_id: &str,
        content: &str,
        message_type: MessageType,
        correlation_id: &str,
    ) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            from_id: from_id.to_string(),
            to_id: to_id.to_string(),
            content: content.to_string(),
            message_type,
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
            context: HashMap::new(),
        }
    }

    /// Attach a context entry (builder pattern).
    pub fn with_context(mut self, key: &str, value: &str) -> Self {
        self.context.insert(key.to_string(), value.to_string());
        self
    }
}

/// Errors surfaced by the bus facade and brokers.
#[derive(Debug)]
pub enum BusError {
    /// A typed send was attempted without a correlation ID.
    MissingCorrelationId,
    /// The broker transport failed.
    Transport(String),
    /// The broker was already closed.
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::MissingCorrelationId => write!(f, "{}", MISSING_CORRELATION_ERROR),
            BusError::Transport(msg) => write!(f, "bus transport error: {}", msg),
            BusError::Closed => write!(f, "message broker is closed"),
        }
    }
}

impl Error for BusError {}

/// Capability contract for the underlying publish/subscribe broker.
///
/// One subscriber per topic; delivery is at-least-once with per-topic FIFO
/// ordering.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    /// Publish a message to a topic.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError>;

    /// Attach the consumer for a topic. Messages published before the
    /// subscription are delivered first, in publish order.
    async fn subscribe(&self, topic: &str)
        -> Result<mpsc::UnboundedReceiver<BusMessage>, BusError>;

    /// Idempotently create a topic's queue so messages published before the
    /// consumer attaches are retained.
    async fn ensure_queue(&self, topic: &str) -> Result<(), BusError>;

    /// Release the broker. Subsequent operations fail with [`BusError::Closed`].
    async fn close(&self) -> Result<(), BusError>;
}

#[derive(Default)]
struct TopicState {
    sender: Option<mpsc::UnboundedSender<BusMessage>>,
    backlog: VecDeque<BusMessage>,
}

#[derive(Default)]
struct BrokerInner {
    topics: HashMap<String, TopicState>,
    closed: bool,
}

/// In-process broker used by tests and single-node deployments.
pub struct InMemoryBroker {
    inner: Mutex<BrokerInner>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BrokerInner::default()),
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BusError::Closed);
        }
        let state = inner.topics.entry(topic.to_string()).or_default();
        let delivered = match &state.sender {
            Some(sender) => sender.send(message.clone()).is_ok(),
            None => false,
        };
        if !delivered {
            // No live subscriber; retain the message for the next one.
            state.sender = None;
            state.backlog.push_back(message);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, BusError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BusError::Closed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let state = inner.topics.entry(topic.to_string()).or_default();
        while let Some(message) = state.backlog.pop_front() {
            let _ = tx.send(message);
        }
        state.sender = Some(tx);
        Ok(rx)
    }

    async fn ensure_queue(&self, topic: &str) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return Err(BusError::Closed);
        }
        inner.topics.entry(topic.to_string()).or_default();
        Ok(())
    }

    async fn close(&self) -> Result<(), BusError> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.topics.clear();
        Ok(())
    }
}

/// Typed send surface over the broker, enforcing the correlation rule.
pub struct MessageBus {
    broker: Arc<dyn MessageBroker>,
}

impl MessageBus {
    pub fn new(broker: Arc<dyn MessageBroker>) -> Self {
        Self { broker }
    }

    fn validate(correlation_id: &str) -> Result<(), BusError> {
        if correlation_id.trim().is_empty() {
            return Err(BusError::MissingCorrelationId);
        }
        Ok(())
    }

    /// Orchestrator → agent instruction.
    pub async fn send_to_agent(
        &self,
        agent_id: &str,
        content: &str,
        correlation_id: &str,
    ) -> Result<BusMessage, BusError> {
        Self::validate(correlation_id)?;
        let message = BusMessage::new(
            ORCHESTRATOR_PARTICIPANT,
            agent_id,
            content,
            MessageType::AiToAgent,
            correlation_id,
        );
        self.broker.publish(agent_id, message.clone()).await?;
        Ok(message)
    }

    /// Agent → orchestrator reply.
    pub async fn send_to_ai(
        &self,
        from_agent_id: &str,
        content: &str,
        correlation_id: &str,
    ) -> Result<BusMessage, BusError> {
        Self::validate(correlation_id)?;
        let message = BusMessage::new(
            from_agent_id,
            ORCHESTRATOR_PARTICIPANT,
            content,
            MessageType::AgentToAi,
            correlation_id,
        );
        self.broker
            .publish(ORCHESTRATOR_PARTICIPANT, message.clone())
            .await?;
        Ok(message)
    }

    /// Direct agent ↔ agent exchange.
    pub async fn send_between_agents(
        &self,
        from_agent_id: &str,
        to_agent_id: &str,
        content: &str,
        correlation_id: &str,
    ) -> Result<BusMessage, BusError> {
        Self::validate(correlation_id)?;
        let message = BusMessage::new(
            from_agent_id,
            to_agent_id,
            content,
            MessageType::AgentToAgent,
            correlation_id,
        );
        self.broker.publish(to_agent_id, message.clone()).await?;
        Ok(message)
    }

    /// User front-end → orchestrator turn.
    pub async fn send_user_to_ai(
        &self,
        user_id: &str,
        content: &str,
        correlation_id: &str,
    ) -> Result<BusMessage, BusError> {
        Self::validate(correlation_id)?;
        let message = BusMessage::new(
            user_id,
            ORCHESTRATOR_PARTICIPANT,
            content,
            MessageType::UserToAi,
            correlation_id,
        );
        self.broker
            .publish(ORCHESTRATOR_PARTICIPANT, message.clone())
            .await?;
        Ok(message)
    }

    /// Attach the consumer for a participant's inbound queue.
    pub async fn subscribe(
        &self,
        participant_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<BusMessage>, BusError> {
        self.broker.subscribe(participant_id).await
    }

    /// Idempotently create an agent's inbound queue.
    pub async fn prepare_agent_queue(&self, agent_id: &str) -> Result<(), BusError> {
        self.broker.ensure_queue(agent_id).await
    }

    /// Close the underlying broker.
    pub async fn close(&self) -> Result<(), BusError> {
        self.broker.close().await
    }
}
