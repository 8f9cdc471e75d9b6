//! Domain entities projected into the property graph.
//!
//! Every struct here corresponds to one node label; relationships between
//! entities are edges, never embedded structure.  Only primitive-typed
//! properties are stored on nodes, timestamps use the canonical
//! `%Y-%m-%dT%H:%M:%SZ` format, and empty lists are serialized as the empty
//! string because the graph backend rejects empty list properties.

use crate::neuromesh::graph::{Properties, PropertyValue};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Canonical on-graph timestamp format.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a timestamp for graph storage.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a graph-stored timestamp; `None` on malformed input.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Mint a namespaced entity id, e.g. `conv-5f0c…`.
pub fn mint_id(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Read a string property, defaulting to empty.
pub fn prop_str(props: &Properties, key: &str) -> String {
    props
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Read an integer property, defaulting to zero.
pub fn prop_i64(props: &Properties, key: &str) -> i64 {
    props.get(key).and_then(|v| v.as_i64()).unwrap_or(0)
}

/// Read a timestamp property; `None` when missing or malformed.
pub fn prop_time(props: &Properties, key: &str) -> Option<DateTime<Utc>> {
    props
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(parse_timestamp)
}

/// Serialize a possibly-empty string list the way the graph accepts it:
/// a `StrList` when non-empty, `Str("")` otherwise.
pub fn list_property(items: &[String]) -> PropertyValue {
    if items.is_empty() {
        PropertyValue::Str(String::new())
    } else {
        PropertyValue::StrList(items.to_vec())
    }
}

/// Inverse of [`list_property`].
pub fn property_list(value: Option<&PropertyValue>) -> Vec<String> {
    match value {
        Some(PropertyValue::StrList(items)) => items.clone(),
        Some(PropertyValue::Str(s)) if !s.is_empty() => {
            s.split(',').map(|p| p.trim().to_string()).collect()
        }
        _ => Vec::new(),
    }
}

// ---- Users & sessions -------------------------------------------------------

/// Lifecycle status of a [`User`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(UserStatus::Active),
            "inactive" => Some(UserStatus::Inactive),
            _ => None,
        }
    }
}

/// A human user, keyed by the session id that first reached the system.
#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub session_id: String,
    pub user_type: String,
    pub status: UserStatus,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Lifecycle status of a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Closed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Expired => "expired",
            SessionStatus::Closed => "closed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "active" => Some(SessionStatus::Active),
            "expired" => Some(SessionStatus::Expired),
            "closed" => Some(SessionStatus::Closed),
            _ => None,
        }
    }
}

/// A bounded-lifetime attachment of a user to the system.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub status: SessionStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---- Conversations ----------------------------------------------------------

/// Lifecycle status of a [`Conversation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationStatus {
    Active,
    Closed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Active => "active",
            ConversationStatus::Closed => "closed",
        }
    }
}

/// A sequence of messages bound to one session. At most one conversation per
/// session is active at a time.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub status: ConversationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Author role of a [`ConversationMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
            MessageRole::Agent => "agent",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            "system" => Some(MessageRole::System),
            "agent" => Some(MessageRole::Agent),
            _ => None,
        }
    }
}

/// One append-only turn in a conversation. Metadata is flat key/value only.
#[derive(Debug, Clone)]
pub struct ConversationMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: HashMap<String, PropertyValue>,
}

// ---- Agents & capabilities --------------------------------------------------

/// Connectivity status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    Online,
    Offline,
    Disconnected,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
            AgentStatus::Disconnected => "disconnected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "online" => Some(AgentStatus::Online),
            "offline" => Some(AgentStatus::Offline),
            "disconnected" => Some(AgentStatus::Disconnected),
            _ => None,
        }
    }
}

/// A worker agent reachable over the message bus. Never hard-deleted; status
/// transitions record its connectivity history.
#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: AgentStatus,
    pub version: String,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named skill an agent advertises. Shared: many agents can reference the
/// same capability node.
#[derive(Debug, Clone)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub input_type: String,
    pub output_type: String,
}

// ---- Analysis & decisions ---------------------------------------------------

/// The decision engine's understanding of one user turn. Immutable.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub id: String,
    pub request_id: String,
    pub intent: String,
    pub category: String,
    /// Confidence in the analysis, clamped to `0..=100`.
    pub confidence: i64,
    pub required_agents: Vec<String>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of [`Decision`] made for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionType {
    Clarify,
    Execute,
}

impl DecisionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionType::Clarify => "CLARIFY",
            DecisionType::Execute => "EXECUTE",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CLARIFY" => Some(DecisionType::Clarify),
            "EXECUTE" => Some(DecisionType::Execute),
            _ => None,
        }
    }
}

/// What to do about an analysis: ask a clarifying question or execute a plan.
/// Immutable.
#[derive(Debug, Clone)]
pub struct Decision {
    pub id: String,
    pub request_id: String,
    pub analysis_id: String,
    pub decision_type: DecisionType,
    pub reasoning: String,
    pub execution_plan: String,
    pub clarification_question: String,
    pub created_at: DateTime<Utc>,
}

// ---- Execution --------------------------------------------------------------

/// Progress of an [`ExecutionPlan`]. Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Executing => "executing",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(PlanStatus::Pending),
            "executing" => Some(PlanStatus::Executing),
            "completed" => Some(PlanStatus::Completed),
            "failed" => Some(PlanStatus::Failed),
            _ => None,
        }
    }

    /// Whether the state accepts no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Failed)
    }
}

/// The structured breakdown of an EXECUTE decision into ordered agent
/// interactions.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: PlanStatus,
    pub conversation_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ordered agent interaction within a plan. `step_number` starts at 1 and
/// is unique within the plan.
#[derive(Debug, Clone)]
pub struct ExecutionStep {
    pub id: String,
    pub plan_id: String,
    pub step_number: i64,
    pub description: String,
    pub assigned_agent: String,
    pub status: PlanStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Outcome status of an [`AgentResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Success => "success",
            ResultStatus::Error => "error",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "success" => Some(ResultStatus::Success),
            "error" => Some(ResultStatus::Error),
            _ => None,
        }
    }
}

/// An agent's reply (or failure) for one execution step. Immutable.
#[derive(Debug, Clone)]
pub struct AgentResult {
    pub id: String,
    pub execution_step_id: String,
    pub agent_id: String,
    pub content: String,
    pub status: ResultStatus,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let raw = format_timestamp(&now);
        let back = parse_timestamp(&raw).unwrap();
        // Sub-second precision is not part of the canonical format.
        assert_eq!(back.timestamp(), now.timestamp());
    }

    #[test]
    fn test_parse_timestamp_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_mint_id_prefix() {
        let id = mint_id("conv");
        assert!(id.starts_with("conv-"));
        assert_ne!(mint_id("conv"), id);
    }

    #[test]
    fn test_list_property_empty_is_empty_string() {
        assert_eq!(list_property(&[]), PropertyValue::Str(String::new()));
        let non_empty = list_property(&["a".to_string(), "b".to_string()]);
        assert_eq!(
            non_empty,
            PropertyValue::StrList(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_property_list_round_trip() {
        let items = vec!["x".to_string(), "y".to_string()];
        let value = list_property(&items);
        assert_eq!(property_list(Some(&value)), items);
        assert!(property_list(Some(&PropertyValue::Str(String::new()))).is_empty());
        assert!(property_list(None).is_empty());
    }

    #[test]
    fn test_status_enum_round_trips() {
        for status in &[AgentStatus::Online, AgentStatus::Offline, AgentStatus::Disconnected] {
            assert_eq!(AgentStatus::parse(status.as_str()), Some(*status));
        }
        for status in &[
            PlanStatus::Pending,
            PlanStatus::Executing,
            PlanStatus::Completed,
            PlanStatus::Failed,
        ] {
            assert_eq!(PlanStatus::parse(status.as_str()), Some(*status));
        }
        assert_eq!(DecisionType::parse("execute"), Some(DecisionType::Execute));
        assert_eq!(DecisionType::parse(" CLARIFY "), Some(DecisionType::Clarify));
        assert_eq!(DecisionType::parse("maybe"), None);
    }

    #[test]
    fn test_plan_status_terminality() {
        assert!(PlanStatus::Completed.is_terminal());
        assert!(PlanStatus::Failed.is_terminal());
        assert!(!PlanStatus::Executing.is_terminal());
    }
}
