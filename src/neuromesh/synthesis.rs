//! Final-answer synthesis from per-agent results.
//!
//! When every step of an execution plan has finished, the synthesizer loads
//! the plan, its steps, and their `AgentResult`s from the graph and asks the
//! LLM for one merged, user-visible answer grounded in the per-agent
//! contents.  Partial results are acceptable — the prompt instructs the
//! model to acknowledge gaps rather than invent them away.

use crate::neuromesh::domain::ResultStatus;
use crate::neuromesh::graph::GraphError;
use crate::neuromesh::llm_client::{LLMClient, LLMError};
use crate::neuromesh::planning::PlanningService;
use crate::neuromesh::results::AgentResultStore;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors surfaced by the synthesizer.
#[derive(Debug)]
pub enum SynthesisError {
    /// The plan does not exist.
    PlanNotFound(String),
    /// Loading plan state failed.
    Persistence(GraphError),
    /// The LLM provider failed.
    Provider(LLMError),
}

impl fmt::Display for SynthesisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SynthesisError::PlanNotFound(id) => write!(f, "execution plan not found: {}", id),
            SynthesisError::Persistence(e) => write!(f, "synthesis persistence error: {}", e),
            SynthesisError::Provider(e) => write!(f, "synthesis provider error: {}", e),
        }
    }
}

impl Error for SynthesisError {}

/// Merges per-agent results into a single user-visible answer.
pub struct ResultSynthesizer {
    llm: Arc<dyn LLMClient>,
    planning: Arc<PlanningService>,
    results: Arc<AgentResultStore>,
}

impl ResultSynthesizer {
    pub fn new(
        llm: Arc<dyn LLMClient>,
        planning: Arc<PlanningService>,
        results: Arc<AgentResultStore>,
    ) -> Self {
        Self {
            llm,
            planning,
            results,
        }
    }

    /// Load a finished plan's results and produce the merged answer.
    pub async fn process_with_synthesis(
        &self,
        plan_id: &str,
        user_input: &str,
    ) -> Result<String, SynthesisError> {
        let plan = self
            .planning
            .get_plan(plan_id)
            .await
            .map_err(SynthesisError::Persistence)?
            .ok_or_else(|| SynthesisError::PlanNotFound(plan_id.to_string()))?;

        let plan_results = self
            .results
            .results_for_plan(plan_id)
            .await
            .map_err(SynthesisError::Persistence)?;

        let mut findings = String::new();
        for (step_number, result) in &plan_results {
            let marker = match result.status {
                ResultStatus::Success => "result",
                ResultStatus::Error => "FAILED",
            };
            findings.push_str(&format!(
                "Step {} — agent {} ({}): {}\n",
                step_number, result.agent_id, marker, result.content
            ));
        }
        if findings.is_empty() {
            findings.push_str("(no agent results were recorded)\n");
        }

        let system = "You are the synthesis stage of an AI orchestration system. Merge the \
                      per-agent results below into one clear answer for the user. Ground every \
                      claim in the results; where a step failed or a result is missing, say so \
                      plainly instead of guessing."
            .to_string();
        let user = format!(
            "User request: {}\n\nExecution plan: {}\n\nAgent results:\n{}",
            user_input, plan.description, findings
        );

        self.llm
            .call(&system, &user)
            .await
            .map_err(SynthesisError::Provider)
    }
}
