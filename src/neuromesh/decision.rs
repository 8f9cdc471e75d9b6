//! AI decision engine: analyze the turn, then decide what to do about it.
//!
//! Two synchronous LLM calls per user turn over the [`LLMClient`] contract:
//!
//! 1. [`DecisionEngine::explore_and_analyze`] — what does the user want?
//!    Produces an immutable [`Analysis`] (intent, category, confidence,
//!    required agents, reasoning).
//! 2. [`DecisionEngine::make_decision`] — what should the system do?
//!    Produces an immutable [`Decision`]: `CLARIFY` with a question, or
//!    `EXECUTE` with an execution-plan text.
//!
//! The parsers tolerate minor formatting variance (markdown emphasis, list
//! dashes, key casing) but demand every required field; a malformed LLM
//! response fails the turn with nothing persisted.
//!
//! Policy: the LLM decides between clarify and execute — low confidence does
//! not force a clarification.  An `EXECUTE` decision with no required agents
//! is a meta-query about the orchestrator itself and is answered inline;
//! user tasks must route through agents.

use crate::neuromesh::domain::{mint_id, Analysis, Decision, DecisionType};
use crate::neuromesh::graph::GraphError;
use crate::neuromesh::llm_client::{LLMClient, LLMError};
use crate::neuromesh::planning::PlanningService;
use chrono::Utc;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Errors surfaced by the decision engine.
#[derive(Debug)]
pub enum DecisionError {
    /// The LLM provider failed.
    Provider(LLMError),
    /// The analysis block was missing a required field.
    MalformedAnalysis(String),
    /// The decision block was missing or inconsistent.
    MalformedDecision(String),
    /// Persisting the analysis or decision failed.
    Persistence(GraphError),
}

impl fmt::Display for DecisionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionError::Provider(e) => write!(f, "decision engine provider error: {}", e),
            DecisionError::MalformedAnalysis(field) => {
                write!(f, "malformed analysis response: missing {}", field)
            }
            DecisionError::MalformedDecision(msg) => {
                write!(f, "malformed decision response: {}", msg)
            }
            DecisionError::Persistence(e) => write!(f, "decision engine persistence error: {}", e),
        }
    }
}

impl Error for DecisionError {}

/// Split an LLM response into `KEY: value` fields, accumulating
/// continuation lines into the preceding field.
///
/// Tolerated variance: leading `-`/`*` bullets, markdown `**KEY:**`
/// emphasis, arbitrary key casing, and blank lines.
fn parse_key_values(text: &str, keys: &[&str]) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    let mut current: Option<String> = None;

    for raw_line in text.lines() {
        let line = raw_line
            .trim()
            .trim_start_matches(['-', '*'])
            .trim()
            .replace("**", "");
        if line.is_empty() {
            continue;
        }

        let mut matched = false;
        if let Some(colon) = line.find(':') {
            let candidate = line[..colon].trim().to_ascii_uppercase().replace(' ', "_");
            if keys.contains(&candidate.as_str()) {
                let value = line[colon + 1..].trim().to_string();
                out.insert(candidate.clone(), value);
                current = Some(candidate);
                matched = true;
            }
        }
        if !matched {
            if let Some(key) = &current {
                let entry = out.entry(key.clone()).or_default();
                if !entry.is_empty() {
                    entry.push('\n');
                }
                entry.push_str(&line);
            }
        }
    }

    out
}

/// Parse a comma-separated agent list; `none` and bracket notation count as
/// empty.
fn parse_agent_list(raw: &str) -> Vec<String> {
    let cleaned = raw.trim().trim_start_matches('[').trim_end_matches(']');
    if cleaned.eq_ignore_ascii_case("none") || cleaned.is_empty() {
        return Vec::new();
    }
    cleaned
        .split(',')
        .map(|part| part.trim().trim_matches('"').to_string())
        .filter(|part| !part.is_empty() && !part.eq_ignore_ascii_case("none"))
        .collect()
}

const ANALYSIS_KEYS: &[&str] = &[
    "INTENT",
    "CATEGORY",
    "CONFIDENCE",
    "REQUIRED_AGENTS",
    "REASONING",
];

const DECISION_KEYS: &[&str] = &[
    "DECISION",
    "REASONING",
    "CLARIFICATION_QUESTION",
    "EXECUTION_PLAN",
    "AGENT_COORDINATION",
];

/// Result of parsing an analysis block, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub intent: String,
    pub category: String,
    pub confidence: i64,
    pub required_agents: Vec<String>,
    pub reasoning: String,
}

/// Parse the five-field analysis block out of an LLM response.
pub fn parse_analysis_response(text: &str) -> Result<ParsedAnalysis, DecisionError> {
    let fields = parse_key_values(text, ANALYSIS_KEYS);
    for key in ANALYSIS_KEYS {
        if !fields.contains_key(*key) {
            return Err(DecisionError::MalformedAnalysis((*key).to_string()));
        }
    }

    let confidence_raw = fields.get("CONFIDENCE").unwrap();
    let confidence: i64 = confidence_raw
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .map(|v| v.round() as i64)
        .map_err(|_| DecisionError::MalformedAnalysis("CONFIDENCE".to_string()))?;

    Ok(ParsedAnalysis {
        intent: fields.get("INTENT").unwrap().clone(),
        category: fields.get("CATEGORY").unwrap().clone(),
        confidence: confidence.clamp(0, 100),
        required_agents: parse_agent_list(fields.get("REQUIRED_AGENTS").unwrap()),
        reasoning: fields.get("REASONING").unwrap().clone(),
    })
}

/// Result of parsing a decision block, before persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub decision_type: DecisionType,
    pub reasoning: String,
    pub execution_plan: String,
    pub clarification_question: String,
}

/// Parse the decision block out of an LLM response.
///
/// `CLARIFY` requires a clarification question; `EXECUTE` requires an
/// execution-plan text.
pub fn parse_decision_response(text: &str) -> Result<ParsedDecision, DecisionError> {
    let fields = parse_key_values(text, DECISION_KEYS);
    let raw_type = fields
        .get("DECISION")
        .ok_or_else(|| DecisionError::MalformedDecision("missing DECISION field".to_string()))?;
    let decision_type = DecisionType::parse(raw_type).ok_or_else(|| {
        DecisionError::MalformedDecision(format!("unknown decision type '{}'", raw_type))
    })?;

    let clarification_question = fields
        .get("CLARIFICATION_QUESTION")
        .cloned()
        .unwrap_or_default();
    let mut execution_plan = fields.get("EXECUTION_PLAN").cloned().unwrap_or_default();
    if let Some(coordination) = fields.get("AGENT_COORDINATION") {
        if !coordination.is_empty() {
            execution_plan.push_str("\n\nAgent coordination: ");
            execution_plan.push_str(coordination);
        }
    }

    match decision_type {
        DecisionType::Clarify if clarification_question.is_empty() => Err(
            DecisionError::MalformedDecision("CLARIFY without a clarification question".into()),
        ),
        DecisionType::Execute if execution_plan.is_empty() => Err(
            DecisionError::MalformedDecision("EXECUTE without an execution plan".into()),
        ),
        _ => Ok(ParsedDecision {
            decision_type,
            reasoning: fields.get("REASONING").cloned().unwrap_or_default(),
            execution_plan,
            clarification_question,
        }),
    }
}

/// Two-step LLM decision maker. Stateless; shared across concurrent turns.
pub struct DecisionEngine {
    llm: Arc<dyn LLMClient>,
    planning: Arc<PlanningService>,
}

impl DecisionEngine {
    pub fn new(llm: Arc<dyn LLMClient>, planning: Arc<PlanningService>) -> Self {
        Self { llm, planning }
    }

    fn analysis_system_prompt(agent_context: &str) -> String {
        format!(
            "You are the analysis stage of an AI orchestration system. Study the user's \
             request and the catalog of worker agents, then report your analysis.\n\n\
             {}\n\n\
             Respond with exactly this structure:\n\
             INTENT: <what the user wants, one line>\n\
             CATEGORY: <short category such as task, question, meta>\n\
             CONFIDENCE: <0-100>\n\
             REQUIRED_AGENTS: <comma-separated agent IDs from the catalog, or none>\n\
             REASONING: <why>\n\n\
             Questions about this orchestration system itself (which agents exist, system \
             status) need no agents: answer REQUIRED_AGENTS: none for those. Actual user \
             tasks must name the agents that will do the work.",
            agent_context
        )
    }

    fn decision_system_prompt(analysis: &Analysis) -> String {
        format!(
            "You are the decision stage of an AI orchestration system. An analysis of the \
             user's request is below. Decide whether to ask a clarifying question or to \
             execute.\n\n\
             Analysis:\n\
             INTENT: {}\n\
             CATEGORY: {}\n\
             CONFIDENCE: {}\n\
             REQUIRED_AGENTS: {}\n\
             REASONING: {}\n\n\
             Respond with exactly this structure:\n\
             DECISION: CLARIFY or EXECUTE\n\
             REASONING: <why>\n\
             CLARIFICATION_QUESTION: <the question, when clarifying>\n\
             EXECUTION_PLAN: <concrete plan text, when executing>\n\
             AGENT_COORDINATION: <optional hint on how agents should be sequenced>\n\n\
             Trust your judgement: low confidence alone does not require clarification. \
             For questions about the orchestration system itself, EXECUTE with the answer \
             in EXECUTION_PLAN.",
            analysis.intent,
            analysis.category,
            analysis.confidence,
            if analysis.required_agents.is_empty() {
                "none".to_string()
            } else {
                analysis.required_agents.join(", ")
            },
            analysis.reasoning
        )
    }

    /// First LLM pass: understand the turn. Persists an [`Analysis`] node on
    /// success; on any failure nothing is persisted.
    pub async fn explore_and_analyze(
        &self,
        user_input: &str,
        user_id: &str,
        agent_context: &str,
        request_id: &str,
    ) -> Result<Analysis, DecisionError> {
        let system = Self::analysis_system_prompt(agent_context);
        let response = self
            .llm
            .call(&system, user_input)
            .await
            .map_err(DecisionError::Provider)?;

        let parsed = parse_analysis_response(&response)?;
        log::debug!(
            "DecisionEngine::explore_and_analyze: user={} intent={:?} agents={:?}",
            user_id,
            parsed.intent,
            parsed.required_agents
        );

        let analysis = Analysis {
            id: mint_id("analysis"),
            request_id: request_id.to_string(),
            intent: parsed.intent,
            category: parsed.category,
            confidence: parsed.confidence,
            required_agents: parsed.required_agents,
            reasoning: parsed.reasoning,
            created_at: Utc::now(),
        };
        self.planning
            .store_analysis(&analysis)
            .await
            .map_err(DecisionError::Persistence)?;
        Ok(analysis)
    }

    /// Second LLM pass: choose clarify vs. execute. Persists a [`Decision`]
    /// node linked to its analysis.
    pub async fn make_decision(
        &self,
        user_input: &str,
        user_id: &str,
        analysis: &Analysis,
        request_id: &str,
    ) -> Result<Decision, DecisionError> {
        let system = Self::decision_system_prompt(analysis);
        let response = self
            .llm
            .call(&system, user_input)
            .await
            .map_err(DecisionError::Provider)?;

        let parsed = parse_decision_response(&response)?;
        log::debug!(
            "DecisionEngine::make_decision: user={} type={}",
            user_id,
            parsed.decision_type.as_str()
        );

        let decision = Decision {
            id: mint_id("decision"),
            request_id: request_id.to_string(),
            analysis_id: analysis.id.clone(),
            decision_type: parsed.decision_type,
            reasoning: parsed.reasoning,
            execution_plan: parsed.execution_plan,
            clarification_question: parsed.clarification_question,
            created_at: Utc::now(),
        };
        self.planning
            .store_decision(&decision)
            .await
            .map_err(DecisionError::Persistence)?;
        Ok(decision)
    }
}
