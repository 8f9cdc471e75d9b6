//! Planning persistence: analyses, decisions, execution plans and steps.
//!
//! Single writer for the `Analysis`, `Decision`, `ExecutionPlan`, and
//! `ExecutionStep` labels.  Analyses and decisions are immutable audit
//! records; plans and steps progress through their state machines
//! (`pending → executing → completed | failed`, terminal states absorbing)
//! as the execution engine works.

use crate::neuromesh::domain::{
    format_timestamp, list_property, mint_id, prop_i64, prop_str, prop_time, property_list,
    Analysis, Decision, DecisionType, ExecutionPlan, ExecutionStep, PlanStatus,
};
use crate::neuromesh::graph::{GraphError, GraphStore, Properties, PropertyValue};
use chrono::Utc;
use std::sync::Arc;

const ANALYSIS_LABEL: &str = "Analysis";
const DECISION_LABEL: &str = "Decision";
const PLAN_LABEL: &str = "ExecutionPlan";
const STEP_LABEL: &str = "ExecutionStep";
const MESSAGE_LABEL: &str = "ConversationMessage";
const AGENT_LABEL: &str = "Agent";

const ANALYZED_BY: &str = "ANALYZED_BY";
const RESULTED_IN: &str = "RESULTED_IN";
const PRODUCED: &str = "PRODUCED";
const HAS_STEP: &str = "HAS_STEP";
const ASSIGNED_TO: &str = "ASSIGNED_TO";

/// Single-writer repository for the planning entity family.
pub struct PlanningService {
    graph: Arc<dyn GraphStore>,
}

impl PlanningService {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Declare constraints and indexes for the labels this service owns.
    /// Idempotent; called at startup.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.graph
            .create_unique_constraint(ANALYSIS_LABEL, "id")
            .await?;
        self.graph
            .create_unique_constraint(DECISION_LABEL, "id")
            .await?;
        self.graph.create_unique_constraint(PLAN_LABEL, "id").await?;
        self.graph.create_unique_constraint(STEP_LABEL, "id").await?;
        self.graph.create_index(ANALYSIS_LABEL, "request_id").await?;
        self.graph.create_index(DECISION_LABEL, "request_id").await?;
        self.graph.create_index(PLAN_LABEL, "conversation_id").await?;
        self.graph.create_index(STEP_LABEL, "plan_id").await?;
        Ok(())
    }

    /// Persist an immutable analysis and link the originating request message
    /// to it with an `ANALYZED_BY` edge (best-effort when the message node is
    /// absent).
    pub async fn store_analysis(&self, analysis: &Analysis) -> Result<(), GraphError> {
        let mut props = Properties::new();
        props.insert("id".into(), analysis.id.clone().into());
        props.insert("request_id".into(), analysis.request_id.clone().into());
        props.insert("intent".into(), analysis.intent.clone().into());
        props.insert("category".into(), analysis.category.clone().into());
        props.insert("confidence".into(), PropertyValue::Int(analysis.confidence));
        props.insert(
            "required_agents".into(),
            list_property(&analysis.required_agents),
        );
        props.insert("reasoning".into(), analysis.reasoning.clone().into());
        props.insert(
            "created_at".into(),
            format_timestamp(&analysis.created_at).into(),
        );
        self.graph.add_node(ANALYSIS_LABEL, &analysis.id, props).await?;

        if let Err(e) = self
            .graph
            .add_edge(
                MESSAGE_LABEL,
                &analysis.request_id,
                ANALYSIS_LABEL,
                &analysis.id,
                ANALYZED_BY,
                Properties::new(),
            )
            .await
        {
            log::warn!(
                "PlanningService::store_analysis: could not link request {}: {}",
                analysis.request_id,
                e
            );
        }
        Ok(())
    }

    /// Fetch an analysis by id.
    pub async fn get_analysis(&self, id: &str) -> Result<Option<Analysis>, GraphError> {
        Ok(self
            .graph
            .get_node(ANALYSIS_LABEL, id)
            .await?
            .map(|props| self.analysis_from_props(&props)))
    }

    /// Persist an immutable decision and link it to its analysis with a
    /// `RESULTED_IN` edge.
    pub async fn store_decision(&self, decision: &Decision) -> Result<(), GraphError> {
        let mut props = Properties::new();
        props.insert("id".into(), decision.id.clone().into());
        props.insert("request_id".into(), decision.request_id.clone().into());
        props.insert("analysis_id".into(), decision.analysis_id.clone().into());
        props.insert("type".into(), decision.decision_type.as_str().into());
        props.insert("reasoning".into(), decision.reasoning.clone().into());
        props.insert("execution_plan".into(), decision.execution_plan.clone().into());
        props.insert(
            "clarification_question".into(),
            decision.clarification_question.clone().into(),
        );
        props.insert(
            "created_at".into(),
            format_timestamp(&decision.created_at).into(),
        );
        self.graph.add_node(DECISION_LABEL, &decision.id, props).await?;

        self.graph
            .add_edge(
                ANALYSIS_LABEL,
                &decision.analysis_id,
                DECISION_LABEL,
                &decision.id,
                RESULTED_IN,
                Properties::new(),
            )
            .await
    }

    /// Fetch a decision by id.
    pub async fn get_decision(&self, id: &str) -> Result<Option<Decision>, GraphError> {
        Ok(self
            .graph
            .get_node(DECISION_LABEL, id)
            .await?
            .map(|props| self.decision_from_props(&props)))
    }

    /// Create an execution plan for an EXECUTE decision with one pending step
    /// per required agent, `step_number` starting at 1 in occurrence order.
    pub async fn create_plan(
        &self,
        decision: &Decision,
        conversation_id: &str,
        required_agents: &[String],
    ) -> Result<(ExecutionPlan, Vec<ExecutionStep>), GraphError> {
        let now = Utc::now();
        let plan = ExecutionPlan {
            id: mint_id("plan"),
            name: format!("Plan for request {}", decision.request_id),
            description: decision.execution_plan.clone(),
            status: PlanStatus::Pending,
            conversation_id: conversation_id.to_string(),
            created_at: now,
            updated_at: now,
        };

        let mut props = Properties::new();
        props.insert("id".into(), plan.id.clone().into());
        props.insert("name".into(), plan.name.clone().into());
        props.insert("description".into(), plan.description.clone().into());
        props.insert("status".into(), plan.status.as_str().into());
        props.insert("conversation_id".into(), plan.conversation_id.clone().into());
        props.insert("created_at".into(), format_timestamp(&now).into());
        props.insert("updated_at".into(), format_timestamp(&now).into());
        self.graph.add_node(PLAN_LABEL, &plan.id, props).await?;

        self.graph
            .add_edge(
                DECISION_LABEL,
                &decision.id,
                PLAN_LABEL,
                &plan.id,
                PRODUCED,
                Properties::new(),
            )
            .await?;

        let mut steps = Vec::with_capacity(required_agents.len());
        for (index, agent_id) in required_agents.iter().enumerate() {
            let step = self
                .create_step(&plan.id, (index + 1) as i64, agent_id, &plan.description)
                .await?;
            steps.push(step);
        }

        Ok((plan, steps))
    }

    /// Append a single step to an existing plan. Used both by plan creation
    /// and by the engine when the LLM issues follow-ups beyond the plan.
    pub async fn create_step(
        &self,
        plan_id: &str,
        step_number: i64,
        agent_id: &str,
        description: &str,
    ) -> Result<ExecutionStep, GraphError> {
        let now = Utc::now();
        let step = ExecutionStep {
            id: mint_id("step"),
            plan_id: plan_id.to_string(),
            step_number,
            description: description.to_string(),
            assigned_agent: agent_id.to_string(),
            status: PlanStatus::Pending,
            completed_at: None,
            created_at: now,
        };

        let mut props = Properties::new();
        props.insert("id".into(), step.id.clone().into());
        props.insert("plan_id".into(), step.plan_id.clone().into());
        props.insert("step_number".into(), PropertyValue::Int(step.step_number));
        props.insert("description".into(), step.description.clone().into());
        props.insert("assigned_agent".into(), step.assigned_agent.clone().into());
        props.insert("status".into(), step.status.as_str().into());
        props.insert("created_at".into(), format_timestamp(&now).into());
        self.graph.add_node(STEP_LABEL, &step.id, props).await?;

        self.graph
            .add_edge(
                PLAN_LABEL,
                plan_id,
                STEP_LABEL,
                &step.id,
                HAS_STEP,
                Properties::new(),
            )
            .await?;

        // Step→agent assignment is audit data; the agent node may be offline
        // or missing and the step stays valid.
        if let Err(e) = self
            .graph
            .add_edge(
                STEP_LABEL,
                &step.id,
                AGENT_LABEL,
                agent_id,
                ASSIGNED_TO,
                Properties::new(),
            )
            .await
        {
            log::warn!(
                "PlanningService::create_step: could not link agent {}: {}",
                agent_id,
                e
            );
        }

        Ok(step)
    }

    /// Fetch a plan by id.
    pub async fn get_plan(&self, id: &str) -> Result<Option<ExecutionPlan>, GraphError> {
        Ok(self
            .graph
            .get_node(PLAN_LABEL, id)
            .await?
            .map(|props| self.plan_from_props(&props)))
    }

    /// All steps of a plan ordered by `step_number`.
    pub async fn get_steps(&self, plan_id: &str) -> Result<Vec<ExecutionStep>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("plan_id".into(), plan_id.into());
        let mut steps: Vec<ExecutionStep> = self
            .graph
            .query_nodes(STEP_LABEL, &filters)
            .await?
            .iter()
            .map(|props| self.step_from_props(props))
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    /// Transition a plan's status. Terminal states are absorbing: a
    /// transition out of `completed`/`failed` is an invariant violation.
    pub async fn update_plan_status(
        &self,
        plan_id: &str,
        status: PlanStatus,
    ) -> Result<(), GraphError> {
        if let Some(current) = self.get_plan(plan_id).await? {
            if current.status.is_terminal() && current.status != status {
                return Err(GraphError::ConstraintViolation(format!(
                    "plan {} is {} and cannot transition to {}",
                    plan_id,
                    current.status.as_str(),
                    status.as_str()
                )));
            }
        }
        let mut update = Properties::new();
        update.insert("status".into(), status.as_str().into());
        update.insert("updated_at".into(), format_timestamp(&Utc::now()).into());
        self.graph.update_node(PLAN_LABEL, plan_id, update).await
    }

    /// Transition a step's status, stamping `completed_at` on terminal states.
    pub async fn update_step_status(
        &self,
        step_id: &str,
        status: PlanStatus,
    ) -> Result<(), GraphError> {
        let mut update = Properties::new();
        update.insert("status".into(), status.as_str().into());
        if status.is_terminal() {
            update.insert("completed_at".into(), format_timestamp(&Utc::now()).into());
        }
        self.graph.update_node(STEP_LABEL, step_id, update).await
    }

    /// Execution is complete when every step is `completed`, or the plan
    /// itself already failed. A plan with no steps counts as complete.
    pub async fn is_execution_complete(&self, plan_id: &str) -> Result<bool, GraphError> {
        if let Some(plan) = self.get_plan(plan_id).await? {
            if plan.status == PlanStatus::Failed {
                return Ok(true);
            }
        }
        let steps = self.get_steps(plan_id).await?;
        Ok(steps.iter().all(|s| s.status == PlanStatus::Completed))
    }

    /// Plans linked to a conversation, oldest first.
    pub async fn plans_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ExecutionPlan>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("conversation_id".into(), conversation_id.into());
        let mut plans: Vec<ExecutionPlan> = self
            .graph
            .query_nodes(PLAN_LABEL, &filters)
            .await?
            .iter()
            .map(|props| self.plan_from_props(props))
            .collect();
        plans.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(plans)
    }

    fn analysis_from_props(&self, props: &Properties) -> Analysis {
        Analysis {
            id: prop_str(props, "id"),
            request_id: prop_str(props, "request_id"),
            intent: prop_str(props, "intent"),
            category: prop_str(props, "category"),
            confidence: prop_i64(props, "confidence"),
            required_agents: property_list(props.get("required_agents")),
            reasoning: prop_str(props, "reasoning"),
            created_at: prop_time(props, "created_at").unwrap_or_else(Utc::now),
        }
    }

    fn decision_from_props(&self, props: &Properties) -> Decision {
        Decision {
            id: prop_str(props, "id"),
            request_id: prop_str(props, "request_id"),
            analysis_id: prop_str(props, "analysis_id"),
            decision_type: DecisionType::parse(&prop_str(props, "type"))
                .unwrap_or(DecisionType::Clarify),
            reasoning: prop_str(props, "reasoning"),
            execution_plan: prop_str(props, "execution_plan"),
            clarification_question: prop_str(props, "clarification_question"),
            created_at: prop_time(props, "created_at").unwrap_or_else(Utc::now),
        }
    }

    fn plan_from_props(&self, props: &Properties) -> ExecutionPlan {
        let now = Utc::now();
        ExecutionPlan {
            id: prop_str(props, "id"),
            name: prop_str(props, "name"),
            description: prop_str(props, "description"),
            status: PlanStatus::parse(&prop_str(props, "status")).unwrap_or(PlanStatus::Pending),
            conversation_id: prop_str(props, "conversation_id"),
            created_at: prop_time(props, "created_at").unwrap_or(now),
            updated_at: prop_time(props, "updated_at").unwrap_or(now),
        }
    }

    fn step_from_props(&self, props: &Properties) -> ExecutionStep {
        ExecutionStep {
            id: prop_str(props, "id"),
            plan_id: prop_str(props, "plan_id"),
            step_number: prop_i64(props, "step_number"),
            description: prop_str(props, "description"),
            assigned_agent: prop_str(props, "assigned_agent"),
            status: PlanStatus::parse(&prop_str(props, "status")).unwrap_or(PlanStatus::Pending),
            completed_at: prop_time(props, "completed_at"),
            created_at: prop_time(props, "created_at").unwrap_or_else(Utc::now),
        }
    }
}
