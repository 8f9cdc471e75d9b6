//! LLM-driven agent conversation engine.
//!
//! Executes one user turn as a bounded loop of LLM calls.  The model is
//! offered two emission formats:
//!
//! ```text
//! SEND_EVENT:
//! Agent: <agent id>
//! Action: <capability or verb>
//! Content: <payload for the agent>
//! Intent: <why>
//! ```
//!
//! dispatches an instruction over the bus and blocks on the correlation
//! channel for that agent's reply, while
//!
//! ```text
//! USER_RESPONSE:
//! <final text for the user>
//! ```
//!
//! ends the turn.  Every dispatch persists an `ExecutionStep`; every reply
//! (or timeout) persists an `AgentResult`.  The engine is stateless —
//! correlation IDs are minted per dispatch (`conv-<user_id>-<uuid>`), so
//! distinct turns run concurrently without shared mutable state beyond the
//! tracker.
//!
//! Each turn carries a [`CancellationToken`] in its [`EngineRequest`].  The
//! token is honored at every suspension point: a pending LLM call and the
//! correlation wait are both raced against it, and cancellation marks the
//! in-flight step `failed` before surfacing [`EngineError::Cancelled`].

use crate::neuromesh::bus::{BusError, MessageBus};
use crate::neuromesh::correlation::{CorrelationError, CorrelationTracker};
use crate::neuromesh::domain::{ExecutionStep, PlanStatus, ResultStatus};
use crate::neuromesh::graph::GraphError;
use crate::neuromesh::llm_client::{LLMClient, LLMError};
use crate::neuromesh::planning::PlanningService;
use crate::neuromesh::results::AgentResultStore;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default cap on LLM iterations per turn.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Default agent round-trip timeout.
pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors surfaced by the engine.
#[derive(Debug)]
pub enum EngineError {
    /// The LLM provider failed mid-loop.
    Provider(LLMError),
    /// A bus send failed.
    Bus(BusError),
    /// Correlation bookkeeping failed (e.g. double registration).
    Correlation(CorrelationError),
    /// No agent reply arrived within the round-trip timeout.
    AgentTimeout {
        correlation_id: String,
        agent_id: String,
    },
    /// The turn was cancelled: its token fired, or the correlation channel
    /// was closed by shutdown. The correlation ID is present when an agent
    /// round trip was already in flight.
    Cancelled { correlation_id: Option<String> },
    /// The LLM neither dispatched nor answered within the iteration cap.
    IterationLimit(usize),
    /// The LLM emitted a SEND_EVENT block missing a required field.
    MalformedEvent(String),
    /// Step or result persistence failed fatally.
    Persistence(GraphError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Provider(e) => write!(f, "engine provider error: {}", e),
            EngineError::Bus(e) => write!(f, "engine bus error: {}", e),
            EngineError::Correlation(e) => write!(f, "engine correlation error: {}", e),
            EngineError::AgentTimeout {
                correlation_id,
                agent_id,
            } => write!(
                f,
                "timed out waiting for agent {} (correlation ID {})",
                agent_id, correlation_id
            ),
            EngineError::Cancelled { correlation_id } => match correlation_id {
                Some(id) => write!(f, "turn cancelled (correlation ID {})", id),
                None => write!(f, "turn cancelled"),
            },
            EngineError::IterationLimit(limit) => {
                write!(f, "conversation exceeded {} LLM iterations", limit)
            }
            EngineError::MalformedEvent(msg) => write!(f, "malformed SEND_EVENT block: {}", msg),
            EngineError::Persistence(e) => write!(f, "engine persistence error: {}", e),
        }
    }
}

impl Error for EngineError {}

/// A parsed `SEND_EVENT` emission.
#[derive(Debug, Clone, PartialEq)]
pub struct SendEvent {
    pub agent: String,
    pub action: String,
    pub content: String,
    pub intent: String,
}

/// What the LLM asked the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    /// Dispatch an instruction to an agent and await its reply.
    SendEvent(SendEvent),
    /// Finish the turn with this user-visible text.
    UserResponse(String),
}

/// Parse an LLM response into an [`EngineAction`].
///
/// `SEND_EVENT:` takes precedence; its `Agent` and `Content` fields are
/// mandatory, `Action` and `Intent` may be empty. A response with neither
/// marker is treated as a plain user response (the model answered without
/// the scaffold).
pub fn parse_engine_response(text: &str) -> Result<EngineAction, EngineError> {
    if let Some(idx) = text.find("SEND_EVENT:") {
        let block = &text[idx + "SEND_EVENT:".len()..];
        let mut fields: HashMap<String, String> = HashMap::new();
        for raw_line in block.lines() {
            let line = raw_line.trim();
            if line.is_empty() {
                continue;
            }
            if line.starts_with("USER_RESPONSE:") {
                break;
            }
            if let Some(colon) = line.find(':') {
                let key = line[..colon].trim().to_ascii_uppercase();
                if matches!(key.as_str(), "AGENT" | "ACTION" | "CONTENT" | "INTENT") {
                    fields.insert(key, line[colon + 1..].trim().to_string());
                }
            }
        }
        let agent = fields
            .get("AGENT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EngineError::MalformedEvent("missing Agent field".to_string()))?
            .clone();
        let content = fields
            .get("CONTENT")
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EngineError::MalformedEvent("missing Content field".to_string()))?
            .clone();
        return Ok(EngineAction::SendEvent(SendEvent {
            agent,
            action: fields.get("ACTION").cloned().unwrap_or_default(),
            content,
            intent: fields.get("INTENT").cloned().unwrap_or_default(),
        }));
    }

    if let Some(idx) = text.find("USER_RESPONSE:") {
        return Ok(EngineAction::UserResponse(
            text[idx + "USER_RESPONSE:".len()..].trim().to_string(),
        ));
    }

    Ok(EngineAction::UserResponse(text.trim().to_string()))
}

/// One turn's worth of engine input.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub user_id: String,
    pub user_input: String,
    pub agent_context: String,
    pub request_id: String,
    /// Plan whose steps this turn executes; `None` for ad-hoc dispatches.
    pub plan_id: Option<String>,
    /// Cancel signal scoped to this turn. Honored at every suspension point;
    /// pass a fresh token for turns that are never cancelled individually.
    pub cancellation: CancellationToken,
}

/// Stateless conversation engine coordinating LLM, bus, and tracker.
pub struct ConversationEngine {
    llm: Arc<dyn LLMClient>,
    bus: Arc<MessageBus>,
    tracker: Arc<CorrelationTracker>,
    planning: Arc<PlanningService>,
    results: Arc<AgentResultStore>,
    agent_timeout: Duration,
    max_iterations: usize,
}

impl ConversationEngine {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        bus: Arc<MessageBus>,
        tracker: Arc<CorrelationTracker>,
        planning: Arc<PlanningService>,
        results: Arc<AgentResultStore>,
    ) -> Self {
        Self {
            llm,
            bus,
            tracker,
            planning,
            results,
            agent_timeout: DEFAULT_AGENT_TIMEOUT,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Override the agent round-trip timeout (builder pattern).
    pub fn with_agent_timeout(mut self, timeout: Duration) -> Self {
        self.agent_timeout = timeout;
        self
    }

    /// Override the per-turn LLM iteration cap (builder pattern).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    fn system_prompt(agent_context: &str) -> String {
        format!(
            "You coordinate worker agents for an AI orchestration system. You never answer \
             a user task yourself — the agents do the work and you relay instructions and \
             results.\n\n\
             {}\n\n\
             You have two ways to respond.\n\n\
             To instruct an agent:\n\
             SEND_EVENT:\n\
             Agent: <agent ID from the catalog>\n\
             Action: <capability or verb>\n\
             Content: <the exact payload the agent should process>\n\
             Intent: <what this accomplishes>\n\n\
             To finish and answer the user:\n\
             USER_RESPONSE:\n\
             <the final text for the user>\n\n\
             Emit exactly one block per response.",
            agent_context
        )
    }

    /// Run the LLM loop for one turn, returning the final user-visible text.
    ///
    /// Cancellation: the request's token fires, the returned future is
    /// dropped, or a shutdown closes the correlation channel. All three mark
    /// the in-flight step `failed` and surface [`EngineError::Cancelled`].
    pub async fn process_conversation(&self, request: &EngineRequest) -> Result<String, EngineError> {
        let system = Self::system_prompt(&request.agent_context);
        let mut user_prompt = request.user_input.clone();

        for iteration in 1..=self.max_iterations {
            let response = tokio::select! {
                biased;
                _ = request.cancellation.cancelled() => {
                    log::info!(
                        "ConversationEngine: turn for user {} cancelled before LLM call",
                        request.user_id
                    );
                    return Err(EngineError::Cancelled { correlation_id: None });
                }
                result = self.llm.call(&system, &user_prompt) => {
                    result.map_err(EngineError::Provider)?
                }
            };

            match parse_engine_response(&response)? {
                EngineAction::UserResponse(text) => {
                    log::debug!(
                        "ConversationEngine: user {} turn finished after {} iteration(s)",
                        request.user_id,
                        iteration
                    );
                    self.finish_plan(request).await;
                    return Ok(text);
                }
                EngineAction::SendEvent(event) => {
                    let reply = self.dispatch_and_await(request, &event).await?;
                    user_prompt = format!(
                        "Agent {} replied:\n{}\n\nOriginal user request: {}\n\nDecide the next \
                         action: another SEND_EVENT if more agent work is needed, or \
                         USER_RESPONSE with the final answer.",
                        event.agent, reply, request.user_input
                    );
                }
            }
        }

        Err(EngineError::IterationLimit(self.max_iterations))
    }

    /// Send one instruction and block for the correlated reply, persisting
    /// the step and its result along the way.
    async fn dispatch_and_await(
        &self,
        request: &EngineRequest,
        event: &SendEvent,
    ) -> Result<String, EngineError> {
        let correlation_id = format!("conv-{}-{}", request.user_id, Uuid::new_v4());

        let step = self.claim_step(request, event).await?;
        if let Some(step) = &step {
            self.mark_step(&step.id, PlanStatus::Executing).await;
            if let Some(plan_id) = &request.plan_id {
                if let Err(e) = self
                    .planning
                    .update_plan_status(plan_id, PlanStatus::Executing)
                    .await
                {
                    log::warn!("ConversationEngine: plan {} not marked executing: {}", plan_id, e);
                }
            }
        }

        let deadline = chrono::Duration::from_std(self.agent_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let receiver = self
            .tracker
            .register_request(&correlation_id, &request.user_id, deadline)
            .await
            .map_err(EngineError::Correlation)?;

        if let Err(e) = self
            .bus
            .send_to_agent(&event.agent, &event.content, &correlation_id)
            .await
        {
            self.tracker.cleanup_request(&correlation_id).await;
            self.record_failure(request, &step, &event.agent, &format!("dispatch failed: {}", e))
                .await;
            return Err(EngineError::Bus(e));
        }

        log::info!(
            "ConversationEngine: dispatched to agent {} (correlation ID {})",
            event.agent,
            correlation_id
        );

        tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => {
                self.tracker.cleanup_request(&correlation_id).await;
                self.record_failure(request, &step, &event.agent, "turn cancelled")
                    .await;
                Err(EngineError::Cancelled {
                    correlation_id: Some(correlation_id),
                })
            }
            outcome = tokio::time::timeout(self.agent_timeout, receiver) => match outcome {
                Ok(Ok(reply)) => {
                    if let Some(step) = &step {
                        if let Err(e) = self
                            .results
                            .store_result(&step.id, &event.agent, &reply.content, ResultStatus::Success)
                            .await
                        {
                            log::warn!("ConversationEngine: result not persisted: {}", e);
                        }
                        self.mark_step(&step.id, PlanStatus::Completed).await;
                    }
                    Ok(reply.content)
                }
                Ok(Err(_closed)) => {
                    self.record_failure(request, &step, &event.agent, "turn cancelled")
                        .await;
                    Err(EngineError::Cancelled {
                        correlation_id: Some(correlation_id),
                    })
                }
                Err(_elapsed) => {
                    self.tracker.cleanup_request(&correlation_id).await;
                    self.record_failure(
                        request,
                        &step,
                        &event.agent,
                        &format!("no reply within {:?}", self.agent_timeout),
                    )
                    .await;
                    Err(EngineError::AgentTimeout {
                        correlation_id,
                        agent_id: event.agent.clone(),
                    })
                }
            }
        }
    }

    /// Pick the plan step this dispatch fulfils: the first pending step
    /// assigned to the agent, else the first pending step, else a fresh step
    /// appended to the plan (the LLM may issue follow-ups beyond the plan).
    async fn claim_step(
        &self,
        request: &EngineRequest,
        event: &SendEvent,
    ) -> Result<Option<ExecutionStep>, EngineError> {
        let plan_id = match &request.plan_id {
            Some(id) => id,
            None => return Ok(None),
        };
        let steps = self
            .planning
            .get_steps(plan_id)
            .await
            .map_err(EngineError::Persistence)?;

        let chosen = steps
            .iter()
            .find(|s| s.status == PlanStatus::Pending && s.assigned_agent == event.agent)
            .or_else(|| steps.iter().find(|s| s.status == PlanStatus::Pending))
            .cloned();

        match chosen {
            Some(step) => Ok(Some(step)),
            None => {
                let next_number = steps.iter().map(|s| s.step_number).max().unwrap_or(0) + 1;
                let description = if event.intent.is_empty() {
                    format!("Follow-up dispatch to {}", event.agent)
                } else {
                    event.intent.clone()
                };
                self.planning
                    .create_step(plan_id, next_number, &event.agent, &description)
                    .await
                    .map(Some)
                    .map_err(EngineError::Persistence)
            }
        }
    }

    async fn mark_step(&self, step_id: &str, status: PlanStatus) {
        if let Err(e) = self.planning.update_step_status(step_id, status).await {
            log::warn!("ConversationEngine: step {} not marked {}: {}", step_id, status.as_str(), e);
        }
    }

    /// Persist an error result and push the step and plan into `failed`.
    async fn record_failure(
        &self,
        request: &EngineRequest,
        step: &Option<ExecutionStep>,
        agent_id: &str,
        reason: &str,
    ) {
        if let Some(step) = step {
            if let Err(e) = self
                .results
                .store_result(&step.id, agent_id, reason, ResultStatus::Error)
                .await
            {
                log::warn!("ConversationEngine: error result not persisted: {}", e);
            }
            self.mark_step(&step.id, PlanStatus::Failed).await;
        }
        if let Some(plan_id) = &request.plan_id {
            if let Err(e) = self
                .planning
                .update_plan_status(plan_id, PlanStatus::Failed)
                .await
            {
                log::warn!("ConversationEngine: plan {} not marked failed: {}", plan_id, e);
            }
        }
    }

    /// Fold a finished turn's plan into its terminal state.
    async fn finish_plan(&self, request: &EngineRequest) {
        let plan_id = match &request.plan_id {
            Some(id) => id,
            None => return,
        };
        match self.planning.get_steps(plan_id).await {
            Ok(steps) => {
                if !steps.is_empty() && steps.iter().all(|s| s.status == PlanStatus::Completed) {
                    if let Err(e) = self
                        .planning
                        .update_plan_status(plan_id, PlanStatus::Completed)
                        .await
                    {
                        log::warn!(
                            "ConversationEngine: plan {} not marked completed: {}",
                            plan_id,
                            e
                        );
                    }
                }
            }
            Err(e) => log::warn!("ConversationEngine: could not load steps for {}: {}", plan_id, e),
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send_event() {
        let action = parse_engine_response(
            "SEND_EVENT:\nAgent: text-processor\nAction: word-count\nContent: Hello world testing\nIntent: count words",
        )
        .unwrap();
        match action {
            EngineAction::SendEvent(event) => {
                assert_eq!(event.agent, "text-processor");
                assert_eq!(event.action, "word-count");
                assert_eq!(event.content, "Hello world testing");
                assert_eq!(event.intent, "count words");
            }
            other => panic!("unexpected action: {:?}", other),
        }
    }

    #[test]
    fn test_parse_user_response() {
        let action =
            parse_engine_response("USER_RESPONSE:\nThe text contains 3 words.").unwrap();
        assert_eq!(
            action,
            EngineAction::UserResponse("The text contains 3 words.".to_string())
        );
    }

    #[test]
    fn test_send_event_takes_precedence() {
        let action = parse_engine_response(
            "SEND_EVENT:\nAgent: a\nContent: payload\nUSER_RESPONSE:\nnot yet",
        )
        .unwrap();
        assert!(matches!(action, EngineAction::SendEvent(_)));
    }

    #[test]
    fn test_send_event_missing_agent_fails() {
        let err =
            parse_engine_response("SEND_EVENT:\nAction: x\nContent: payload").unwrap_err();
        assert!(matches!(err, EngineError::MalformedEvent(_)));
    }

    #[test]
    fn test_plain_text_is_user_response() {
        let action = parse_engine_response("Just an answer.").unwrap();
        assert_eq!(action, EngineAction::UserResponse("Just an answer.".to_string()));
    }
}
