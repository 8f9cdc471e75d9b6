//! Top-level orchestration of one user turn.
//!
//! `Orchestrator::process_user_request` gathers the agent catalog, runs the
//! two-step decision engine, and branches: clarification questions go
//! straight back to the user, meta-queries (EXECUTE with no required
//! agents) are answered inline from the decision's plan text, and real
//! tasks are dispatched through the conversation engine and synthesized.
//!
//! Domain failures never surface as process-level errors — every path
//! returns an [`OrchestratorResult`] so the BFF can render a user-visible
//! apology with the failure classification.

use crate::neuromesh::decision::DecisionEngine;
use crate::neuromesh::domain::{Analysis, Decision, DecisionType, PlanStatus};
use crate::neuromesh::engine::{ConversationEngine, EngineRequest};
use crate::neuromesh::explorer::GraphExplorer;
use crate::neuromesh::planning::PlanningService;
use crate::neuromesh::synthesis::ResultSynthesizer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// One inbound user turn, as seen by the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorRequest {
    /// Message id of the user's turn; threads through Analysis/Decision
    /// linkage as the request id.
    pub request_id: String,
    pub user_id: String,
    pub session_id: String,
    /// Conversation the turn belongs to; execution plans are bound to it.
    pub conversation_id: String,
    pub user_input: String,
    /// Cancel signal scoped to this turn. Every LLM call and agent round
    /// trip races against it.
    pub cancellation: CancellationToken,
}

/// Outcome of one turn. `success == false` carries a human-readable `error`
/// classification; `message` is always user-visible text.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub message: String,
    pub analysis: Option<Analysis>,
    pub decision: Option<Decision>,
    pub execution_plan_id: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl OrchestratorResult {
    fn failure(error: String) -> Self {
        Self {
            message: String::new(),
            analysis: None,
            decision: None,
            execution_plan_id: None,
            success: false,
            error: Some(error),
        }
    }
}

/// Top-level coordinator wiring catalog, decisions, execution, and synthesis.
pub struct Orchestrator {
    explorer: Arc<GraphExplorer>,
    decision_engine: Arc<DecisionEngine>,
    engine: Arc<ConversationEngine>,
    synthesizer: Arc<ResultSynthesizer>,
    planning: Arc<PlanningService>,
}

impl Orchestrator {
    pub fn new(
        explorer: Arc<GraphExplorer>,
        decision_engine: Arc<DecisionEngine>,
        engine: Arc<ConversationEngine>,
        synthesizer: Arc<ResultSynthesizer>,
        planning: Arc<PlanningService>,
    ) -> Self {
        Self {
            explorer,
            decision_engine,
            engine,
            synthesizer,
            planning,
        }
    }

    /// Process one user turn end to end. Never fails at the call level;
    /// inspect [`OrchestratorResult::success`].
    pub async fn process_user_request(&self, request: &OrchestratorRequest) -> OrchestratorResult {
        let agent_context = match self.explorer.get_agent_context().await {
            Ok(context) => context,
            Err(e) => {
                log::error!("Orchestrator: agent catalog unavailable: {}", e);
                return OrchestratorResult::failure(format!("agent catalog unavailable: {}", e));
            }
        };

        let analysis = tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => {
                log::info!("Orchestrator: turn {} cancelled during analysis", request.request_id);
                return OrchestratorResult::failure("turn cancelled".to_string());
            }
            result = self.decision_engine.explore_and_analyze(
                &request.user_input,
                &request.user_id,
                &agent_context,
                &request.request_id,
            ) => match result {
                Ok(analysis) => analysis,
                Err(e) => {
                    log::error!("Orchestrator: analysis failed: {}", e);
                    return OrchestratorResult::failure(format!("analysis failed: {}", e));
                }
            }
        };

        let decision_result = tokio::select! {
            biased;
            _ = request.cancellation.cancelled() => {
                log::info!("Orchestrator: turn {} cancelled during decision", request.request_id);
                return OrchestratorResult::failure("turn cancelled".to_string());
            }
            result = self.decision_engine.make_decision(
                &request.user_input,
                &request.user_id,
                &analysis,
                &request.request_id,
            ) => result,
        };
        let decision = match decision_result {
            Ok(decision) => decision,
            Err(e) => {
                log::error!("Orchestrator: decision failed: {}", e);
                let mut result = OrchestratorResult::failure(format!("decision failed: {}", e));
                result.analysis = Some(analysis);
                return result;
            }
        };

        let mut result = OrchestratorResult {
            message: String::new(),
            analysis: Some(analysis.clone()),
            decision: Some(decision.clone()),
            execution_plan_id: None,
            success: true,
            error: None,
        };

        match decision.decision_type {
            DecisionType::Clarify => {
                result.message = decision.clarification_question.clone();
            }
            DecisionType::Execute if analysis.required_agents.is_empty() => {
                // Meta-query about the orchestrator itself: answered inline,
                // no agent dispatch.
                result.message = decision.execution_plan.clone();
            }
            DecisionType::Execute => {
                match self.execute(request, &analysis, &decision).await {
                    Ok((message, plan_id)) => {
                        result.message = message;
                        result.execution_plan_id = Some(plan_id);
                    }
                    Err((error, plan_id)) => {
                        log::error!("Orchestrator: execution failed: {}", error);
                        result.success = false;
                        result.error = Some(error);
                        result.execution_plan_id = plan_id;
                    }
                }
            }
        }

        self.store_insights(request, &result).await;
        result
    }

    /// Create the plan, run the conversation engine, and synthesize the final
    /// answer once every step has finished.
    async fn execute(
        &self,
        request: &OrchestratorRequest,
        analysis: &Analysis,
        decision: &Decision,
    ) -> Result<(String, String), (String, Option<String>)> {
        let (plan, _steps) = self
            .planning
            .create_plan(decision, &request.conversation_id, &analysis.required_agents)
            .await
            .map_err(|e| (format!("plan creation failed: {}", e), None))?;

        // Fetch the catalog fresh so a registration between decision and
        // dispatch is visible to the engine's prompt.
        let engine_request = EngineRequest {
            user_id: request.user_id.clone(),
            user_input: request.user_input.clone(),
            agent_context: self.explorer.get_agent_context().await.unwrap_or_default(),
            request_id: request.request_id.clone(),
            plan_id: Some(plan.id.clone()),
            cancellation: request.cancellation.clone(),
        };

        let engine_text = self
            .engine
            .process_conversation(&engine_request)
            .await
            .map_err(|e| (e.to_string(), Some(plan.id.clone())))?;

        let complete = self
            .planning
            .is_execution_complete(&plan.id)
            .await
            .unwrap_or(false);
        let failed = self
            .planning
            .get_plan(&plan.id)
            .await
            .ok()
            .flatten()
            .map(|p| p.status == PlanStatus::Failed)
            .unwrap_or(false);

        if complete && !failed {
            let synthesis = tokio::select! {
                biased;
                _ = request.cancellation.cancelled() => None,
                result = self
                    .synthesizer
                    .process_with_synthesis(&plan.id, &request.user_input) => Some(result),
            };
            match synthesis {
                // Cancelled mid-synthesis: the BFF discards the turn, so the
                // engine text is as good as anything.
                None => return Ok((engine_text, plan.id)),
                Some(Ok(synthesized)) => return Ok((synthesized, plan.id)),
                Some(Err(e)) => {
                    // The engine's USER_RESPONSE is already user-visible;
                    // losing the merge pass is not worth failing the turn.
                    log::warn!("Orchestrator: synthesis failed, using engine text: {}", e);
                }
            }
        }

        Ok((engine_text, plan.id))
    }

    /// Best-effort analytics hook: records a turn summary; failures are
    /// logged and never affect the returned result.
    async fn store_insights(&self, request: &OrchestratorRequest, result: &OrchestratorResult) {
        let decision_type = result
            .decision
            .as_ref()
            .map(|d| d.decision_type.as_str())
            .unwrap_or("none");
        log::info!(
            "Orchestrator: turn {} for user {} → decision={} success={}",
            request.request_id,
            request.user_id,
            decision_type,
            result.success
        );
    }
}
