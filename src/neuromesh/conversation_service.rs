//! Conversation and message persistence.
//!
//! Single writer for `Conversation` and `ConversationMessage` nodes.  A
//! session has at most one active conversation, reused across turns until it
//! is closed; messages are append-only and read back in timestamp order.

use crate::neuromesh::domain::{
    format_timestamp, mint_id, prop_str, prop_time, Conversation, ConversationMessage,
    ConversationStatus, MessageRole,
};
use crate::neuromesh::graph::{GraphError, GraphStore, Properties, PropertyValue};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const CONVERSATION_LABEL: &str = "Conversation";
const MESSAGE_LABEL: &str = "ConversationMessage";
const SESSION_LABEL: &str = "Session";
const PLAN_LABEL: &str = "ExecutionPlan";
const HAS_CONVERSATION: &str = "HAS_CONVERSATION";
const HAS_MESSAGE: &str = "HAS_MESSAGE";
const LINKED_TO: &str = "LINKED_TO";

/// Flat metadata keys are stored directly on the message node with this
/// prefix so they cannot collide with the core fields.
const META_PREFIX: &str = "meta_";

/// Single-writer repository for conversations and their messages.
pub struct ConversationService {
    graph: Arc<dyn GraphStore>,
    // Canonical timestamps have second resolution; the sequence breaks ties
    // between messages appended within the same second.
    sequence: AtomicI64,
}

impl ConversationService {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self {
            graph,
            sequence: AtomicI64::new(0),
        }
    }

    /// Declare constraints and indexes for the labels this service owns.
    /// Idempotent; called at startup.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.graph
            .create_unique_constraint(CONVERSATION_LABEL, "id")
            .await?;
        self.graph
            .create_unique_constraint(MESSAGE_LABEL, "id")
            .await?;
        self.graph
            .create_index(CONVERSATION_LABEL, "session_id")
            .await?;
        self.graph.create_index(CONVERSATION_LABEL, "status").await?;
        self.graph
            .create_index(MESSAGE_LABEL, "conversation_id")
            .await?;
        Ok(())
    }

    /// Return the session's active conversation, creating one when none
    /// exists. Guarantees at most one active conversation per session.
    pub async fn find_or_create_active(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Conversation, GraphError> {
        let mut filters = Properties::new();
        filters.insert("session_id".into(), session_id.into());
        filters.insert("status".into(), ConversationStatus::Active.as_str().into());
        let existing = self.graph.query_nodes(CONVERSATION_LABEL, &filters).await?;
        if let Some(props) = existing.into_iter().next() {
            return Ok(self.conversation_from_props(&props));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: mint_id("conv"),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            status: ConversationStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let mut props = Properties::new();
        props.insert("id".into(), conversation.id.clone().into());
        props.insert("session_id".into(), conversation.session_id.clone().into());
        props.insert("user_id".into(), conversation.user_id.clone().into());
        props.insert("status".into(), conversation.status.as_str().into());
        props.insert("created_at".into(), format_timestamp(&now).into());
        props.insert("updated_at".into(), format_timestamp(&now).into());
        self.graph
            .add_node(CONVERSATION_LABEL, &conversation.id, props)
            .await?;

        // The session node may not exist when callers skip the user service
        // (tests exercising the repo in isolation); the edge is optional.
        if let Err(e) = self
            .graph
            .add_edge(
                SESSION_LABEL,
                session_id,
                CONVERSATION_LABEL,
                &conversation.id,
                HAS_CONVERSATION,
                Properties::new(),
            )
            .await
        {
            log::warn!(
                "ConversationService::find_or_create_active: could not link session {}: {}",
                session_id,
                e
            );
        }

        Ok(conversation)
    }

    /// Fetch a conversation by id.
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, GraphError> {
        Ok(self
            .graph
            .get_node(CONVERSATION_LABEL, id)
            .await?
            .map(|props| self.conversation_from_props(&props)))
    }

    /// All conversations bound to a session, most recent first.
    pub async fn conversations_for_session(
        &self,
        session_id: &str,
    ) -> Result<Vec<Conversation>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("session_id".into(), session_id.into());
        let mut conversations: Vec<Conversation> = self
            .graph
            .query_nodes(CONVERSATION_LABEL, &filters)
            .await?
            .iter()
            .map(|props| self.conversation_from_props(props))
            .collect();
        conversations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(conversations)
    }

    /// Close a conversation. The next turn on the session creates a fresh one.
    pub async fn close_conversation(&self, id: &str) -> Result<(), GraphError> {
        let mut update = Properties::new();
        update.insert("status".into(), ConversationStatus::Closed.as_str().into());
        update.insert("updated_at".into(), format_timestamp(&Utc::now()).into());
        self.graph.update_node(CONVERSATION_LABEL, id, update).await
    }

    /// Append a message to a conversation. Metadata must be flat; list values
    /// are the caller's responsibility to encode per the empty-list rule.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        metadata: HashMap<String, PropertyValue>,
    ) -> Result<ConversationMessage, GraphError> {
        let now = Utc::now();
        let message = ConversationMessage {
            id: mint_id("msg"),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            timestamp: now,
            metadata,
        };

        let mut props = Properties::new();
        props.insert("id".into(), message.id.clone().into());
        props.insert(
            "conversation_id".into(),
            message.conversation_id.clone().into(),
        );
        props.insert("role".into(), message.role.as_str().into());
        props.insert("content".into(), message.content.clone().into());
        props.insert("timestamp".into(), format_timestamp(&now).into());
        props.insert(
            "sequence".into(),
            PropertyValue::Int(self.sequence.fetch_add(1, Ordering::SeqCst)),
        );
        for (key, value) in &message.metadata {
            props.insert(format!("{}{}", META_PREFIX, key), value.clone());
        }

        self.graph.add_node(MESSAGE_LABEL, &message.id, props).await?;
        self.graph
            .add_edge(
                CONVERSATION_LABEL,
                conversation_id,
                MESSAGE_LABEL,
                &message.id,
                HAS_MESSAGE,
                Properties::new(),
            )
            .await?;
        Ok(message)
    }

    /// All messages of a conversation in timestamp order, with the insertion
    /// sequence breaking ties inside the same second.
    pub async fn list_messages(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationMessage>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("conversation_id".into(), conversation_id.into());
        let raw = self.graph.query_nodes(MESSAGE_LABEL, &filters).await?;
        let mut keyed: Vec<(i64, ConversationMessage)> = raw
            .iter()
            .map(|props| {
                (
                    props.get("sequence").and_then(|v| v.as_i64()).unwrap_or(0),
                    self.message_from_props(props),
                )
            })
            .collect();
        keyed.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));
        Ok(keyed.into_iter().map(|(_, m)| m).collect())
    }

    /// Link an execution plan to the conversation that triggered it.
    pub async fn link_execution_plan(
        &self,
        conversation_id: &str,
        plan_id: &str,
    ) -> Result<(), GraphError> {
        self.graph
            .add_edge(
                CONVERSATION_LABEL,
                conversation_id,
                PLAN_LABEL,
                plan_id,
                LINKED_TO,
                Properties::new(),
            )
            .await
    }

    /// Plan ids linked to a conversation.
    pub async fn linked_plans(&self, conversation_id: &str) -> Result<Vec<String>, GraphError> {
        Ok(self
            .graph
            .get_edges(CONVERSATION_LABEL, conversation_id, LINKED_TO)
            .await?
            .into_iter()
            .map(|(_, id)| id)
            .collect())
    }

    fn conversation_from_props(&self, props: &Properties) -> Conversation {
        let now = Utc::now();
        Conversation {
            id: prop_str(props, "id"),
            session_id: prop_str(props, "session_id"),
            user_id: prop_str(props, "user_id"),
            status: match prop_str(props, "status").as_str() {
                "closed" => ConversationStatus::Closed,
                _ => ConversationStatus::Active,
            },
            created_at: prop_time(props, "created_at").unwrap_or(now),
            updated_at: prop_time(props, "updated_at").unwrap_or(now),
        }
    }

    fn message_from_props(&self, props: &Properties) -> ConversationMessage {
        let metadata = props
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(META_PREFIX)
                    .map(|stripped| (stripped.to_string(), v.clone()))
            })
            .collect();
        ConversationMessage {
            id: prop_str(props, "id"),
            conversation_id: prop_str(props, "conversation_id"),
            role: MessageRole::parse(&prop_str(props, "role")).unwrap_or(MessageRole::System),
            content: prop_str(props, "content"),
            timestamp: prop_time(props, "timestamp").unwrap_or_else(Utc::now),
            metadata,
        }
    }
}
