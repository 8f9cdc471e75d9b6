//! Typed events for rich UIs.
//!
//! The enhanced WebSocket endpoint speaks envelopes of the shape
//! `{type, id, timestamp, session_id, data}`; the payload structs here are
//! what goes into `data` for each event type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Envelope every typed UI event is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub data: Value,
}

impl UiEvent {
    /// Build an envelope with a fresh id and the current time.
    pub fn new(event_type: &str, session_id: &str, data: Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            id: format!("evt-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            session_id: session_id.to_string(),
            data,
        }
    }
}

/// `chat_message` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessageEvent {
    pub content: String,
    pub role: String,
    pub conversation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `agent_update` payload: one online/offline snapshot per agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdateEvent {
    pub agent_name: String,
    #[serde(rename = "type")]
    pub agent_type: String,
    pub status: String,
    pub capabilities: Vec<String>,
    pub metadata: AgentUpdateMetadata,
}

/// Metadata block of an `agent_update`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentUpdateMetadata {
    pub last_active: DateTime<Utc>,
}

/// `execution_start` payload, emitted when a turn creates a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStartEvent {
    pub execution_id: String,
    pub conversation_id: String,
    pub plan_id: String,
    pub start_time: DateTime<Utc>,
    pub estimated_steps: usize,
}

/// `execution_step` payload, one per step of the current turn's plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepEvent {
    pub execution_id: String,
    pub step_id: String,
    pub step_number: i64,
    pub description: String,
    pub assigned_agent: String,
    pub status: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// `error` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// `ping`/`pong` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingEvent {
    pub status: String,
}

impl PingEvent {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_serialization_shape() {
        let event = UiEvent::new(
            "error",
            "sess-1",
            serde_json::to_value(ErrorEvent {
                code: "validation".to_string(),
                message: "empty message".to_string(),
                details: None,
            })
            .unwrap(),
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["session_id"], "sess-1");
        assert_eq!(json["data"]["code"], "validation");
        assert!(json["data"].get("details").is_none());
    }

    #[test]
    fn test_ping_payload() {
        let json = serde_json::to_value(PingEvent::ok()).unwrap();
        assert_eq!(json["status"], "ok");
    }
}
