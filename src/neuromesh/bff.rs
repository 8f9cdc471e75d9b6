//! Conversation backend-for-frontend.
//!
//! Binds an incoming user turn (`{session_id, message}`) to its persistent
//! entities — user, session, conversation, messages — invokes the
//! orchestrator, and appends the assistant reply with flat audit metadata.
//!
//! Failure policy: persistence errors while establishing the user, session,
//! or conversation abort the turn with a generic initialization message;
//! once the orchestrator has run, persistence failures (assistant message,
//! plan link) are logged and the user still receives the reply.
//!
//! Cancellation policy: a turn whose [`CancellationToken`] fires is surfaced
//! as a benign close — [`BffError::Cancelled`] — and **no assistant message
//! is appended**. Transports close the exchange quietly instead of rendering
//! an error.

use crate::neuromesh::conversation_service::ConversationService;
use crate::neuromesh::domain::{list_property, MessageRole};
use crate::neuromesh::graph::PropertyValue;
use crate::neuromesh::orchestrator::{Orchestrator, OrchestratorRequest, OrchestratorResult};
use crate::neuromesh::user_service::UserService;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Literal apology rendered when a turn fails.
pub const APOLOGY_MESSAGE: &str = "I'm sorry, I encountered an error processing your request.";

/// Literal returned when the conversation context cannot be established.
pub const INIT_FAILURE_MESSAGE: &str = "Failed to initialize conversation session";

/// Default session lifetime for web sessions.
pub const SESSION_DURATION_HOURS: i64 = 24;

/// Errors surfaced by the BFF.
#[derive(Debug)]
pub enum BffError {
    /// Empty session id or empty message.
    Validation(String),
    /// User/session/conversation persistence failed before the turn ran.
    Initialization(String),
    /// The turn's cancellation token fired. A benign close: no assistant
    /// message was appended and transports should not render an error.
    Cancelled,
}

impl fmt::Display for BffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BffError::Validation(msg) => write!(f, "validation error: {}", msg),
            BffError::Initialization(msg) => write!(f, "{}: {}", INIT_FAILURE_MESSAGE, msg),
            BffError::Cancelled => write!(f, "turn cancelled"),
        }
    }
}

impl Error for BffError {}

/// Response rendered back to the chat client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatResponse {
    pub content: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The turn's artifacts, for transports that emit typed execution events.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: ChatResponse,
    pub conversation_id: String,
    pub execution_plan_id: Option<String>,
}

/// Transport-facing service binding turns to persistent conversation state.
pub struct ConversationBff {
    users: Arc<UserService>,
    conversations: Arc<ConversationService>,
    orchestrator: Arc<Orchestrator>,
}

impl ConversationBff {
    pub fn new(
        users: Arc<UserService>,
        conversations: Arc<ConversationService>,
        orchestrator: Arc<Orchestrator>,
    ) -> Self {
        Self {
            users,
            conversations,
            orchestrator,
        }
    }

    /// Handle one `{session_id, message}` turn that is never cancelled
    /// individually. Convenience wrapper around
    /// [`process_chat_with_cancellation`](ConversationBff::process_chat_with_cancellation)
    /// with a fresh token.
    pub async fn process_chat(
        &self,
        session_id: &str,
        message: &str,
    ) -> Result<TurnOutcome, BffError> {
        self.process_chat_with_cancellation(session_id, message, CancellationToken::new())
            .await
    }

    /// Handle one `{session_id, message}` turn under a cancellation scope.
    ///
    /// The token propagates to every LLM call and agent round trip of the
    /// turn. When it fires, the turn ends with [`BffError::Cancelled`] and no
    /// assistant message is appended.
    pub async fn process_chat_with_cancellation(
        &self,
        session_id: &str,
        message: &str,
        cancellation: CancellationToken,
    ) -> Result<TurnOutcome, BffError> {
        if session_id.trim().is_empty() {
            return Err(BffError::Validation("session_id must not be empty".into()));
        }
        if message.trim().is_empty() {
            return Err(BffError::Validation("message must not be empty".into()));
        }

        // Steps 1-3: establish user, session, conversation. Failures here
        // abort the turn.
        let user = self
            .users
            .ensure_user(session_id)
            .await
            .map_err(|e| BffError::Initialization(e.to_string()))?;
        self.users
            .ensure_session(session_id, &user.id, Duration::hours(SESSION_DURATION_HOURS))
            .await
            .map_err(|e| BffError::Initialization(e.to_string()))?;
        // Activity extends the session; the turn proceeds even if the
        // extension write fails.
        if let Err(e) = self
            .users
            .extend_session(session_id, Duration::hours(SESSION_DURATION_HOURS))
            .await
        {
            log::warn!("ConversationBff: session {} not extended: {}", session_id, e);
        }
        let conversation = self
            .conversations
            .find_or_create_active(session_id, &user.id)
            .await
            .map_err(|e| BffError::Initialization(e.to_string()))?;

        // Step 4: append the user message; its id becomes the request id so
        // Analysis/Decision nodes link back to this turn.
        let request_id = match self
            .conversations
            .append_message(&conversation.id, MessageRole::User, message, HashMap::new())
            .await
        {
            Ok(user_message) => user_message.id,
            Err(e) => {
                log::warn!("ConversationBff: user message not persisted: {}", e);
                crate::neuromesh::domain::mint_id("msg")
            }
        };

        // Step 5: orchestrate.
        let result = self
            .orchestrator
            .process_user_request(&OrchestratorRequest {
                request_id,
                user_id: user.id.clone(),
                session_id: session_id.to_string(),
                conversation_id: conversation.id.clone(),
                user_input: message.to_string(),
                cancellation: cancellation.clone(),
            })
            .await;

        // A cancelled turn is a benign close: no assistant message is
        // appended, nothing is rendered to the user.
        if cancellation.is_cancelled() {
            log::info!(
                "ConversationBff: turn on session {} cancelled, closing quietly",
                session_id
            );
            return Err(BffError::Cancelled);
        }

        let content = if result.success {
            result.message.clone()
        } else {
            APOLOGY_MESSAGE.to_string()
        };

        // Step 6: append the assistant reply with flat audit metadata.
        let metadata = Self::assistant_metadata(&result);
        if let Err(e) = self
            .conversations
            .append_message(&conversation.id, MessageRole::Assistant, &content, metadata)
            .await
        {
            log::warn!("ConversationBff: assistant message not persisted: {}", e);
        }

        // Step 7: link the plan to the conversation.
        if let Some(plan_id) = &result.execution_plan_id {
            if let Err(e) = self
                .conversations
                .link_execution_plan(&conversation.id, plan_id)
                .await
            {
                log::warn!("ConversationBff: plan {} not linked: {}", plan_id, e);
            }
        }

        Ok(TurnOutcome {
            response: ChatResponse {
                content,
                session_id: session_id.to_string(),
                intent: result.analysis.as_ref().map(|a| a.intent.clone()),
                error: result.error.clone(),
            },
            conversation_id: conversation.id,
            execution_plan_id: result.execution_plan_id.clone(),
        })
    }

    /// The assistant message's flat metadata. Lists serialize as the empty
    /// string when empty — the graph rejects empty list properties.
    fn assistant_metadata(result: &OrchestratorResult) -> HashMap<String, PropertyValue> {
        let mut metadata = HashMap::new();
        if let Some(analysis) = &result.analysis {
            metadata.insert(
                "analysis_intent".to_string(),
                PropertyValue::Str(analysis.intent.clone()),
            );
            metadata.insert(
                "analysis_confidence".to_string(),
                PropertyValue::Int(analysis.confidence),
            );
            metadata.insert(
                "required_agents".to_string(),
                list_property(&analysis.required_agents),
            );
        }
        if let Some(decision) = &result.decision {
            metadata.insert(
                "decision_type".to_string(),
                PropertyValue::Str(decision.decision_type.as_str().to_string()),
            );
            metadata.insert(
                "decision_reasoning".to_string(),
                PropertyValue::Str(decision.reasoning.clone()),
            );
        }
        if let Some(plan_id) = &result.execution_plan_id {
            metadata.insert(
                "execution_plan_id".to_string(),
                PropertyValue::Str(plan_id.clone()),
            );
        }
        metadata.insert("success".to_string(), PropertyValue::Bool(result.success));
        metadata.insert(
            "timestamp".to_string(),
            PropertyValue::Str(crate::neuromesh::domain::format_timestamp(&Utc::now())),
        );
        metadata
    }
}
