//! Agent result persistence.
//!
//! `AgentResult` nodes are owned by the execution engine: one immutable
//! record per agent reply (or failure) bound to its execution step with a
//! `PRODUCED_RESULT` edge.

use crate::neuromesh::domain::{
    format_timestamp, mint_id, prop_i64, prop_str, prop_time, AgentResult, ResultStatus,
};
use crate::neuromesh::graph::{GraphError, GraphStore, Properties};
use chrono::Utc;
use std::sync::Arc;

const RESULT_LABEL: &str = "AgentResult";
const STEP_LABEL: &str = "ExecutionStep";
const PRODUCED_RESULT: &str = "PRODUCED_RESULT";

/// Single-writer store for `AgentResult` nodes.
pub struct AgentResultStore {
    graph: Arc<dyn GraphStore>,
}

impl AgentResultStore {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Declare constraints and indexes for the result label. Idempotent.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.graph
            .create_unique_constraint(RESULT_LABEL, "id")
            .await?;
        self.graph
            .create_index(RESULT_LABEL, "execution_step_id")
            .await?;
        Ok(())
    }

    /// Persist one agent reply (or failure) for a step.
    pub async fn store_result(
        &self,
        step_id: &str,
        agent_id: &str,
        content: &str,
        status: ResultStatus,
    ) -> Result<AgentResult, GraphError> {
        let now = Utc::now();
        let result = AgentResult {
            id: mint_id("result"),
            execution_step_id: step_id.to_string(),
            agent_id: agent_id.to_string(),
            content: content.to_string(),
            status,
            timestamp: now,
        };

        let mut props = Properties::new();
        props.insert("id".into(), result.id.clone().into());
        props.insert(
            "execution_step_id".into(),
            result.execution_step_id.clone().into(),
        );
        props.insert("agent_id".into(), result.agent_id.clone().into());
        props.insert("content".into(), result.content.clone().into());
        props.insert("status".into(), result.status.as_str().into());
        props.insert("timestamp".into(), format_timestamp(&now).into());
        self.graph.add_node(RESULT_LABEL, &result.id, props).await?;

        self.graph
            .add_edge(
                STEP_LABEL,
                step_id,
                RESULT_LABEL,
                &result.id,
                PRODUCED_RESULT,
                Properties::new(),
            )
            .await?;
        Ok(result)
    }

    /// All results across a plan's steps, as `(step_number, result)` pairs in
    /// step order (and timestamp order within a step).
    ///
    /// Reads `ExecutionStep` nodes read-only; step ownership stays with the
    /// planning service.
    pub async fn results_for_plan(
        &self,
        plan_id: &str,
    ) -> Result<Vec<(i64, AgentResult)>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("plan_id".into(), plan_id.into());
        let mut steps: Vec<(i64, String)> = self
            .graph
            .query_nodes(STEP_LABEL, &filters)
            .await?
            .iter()
            .map(|props| (prop_i64(props, "step_number"), prop_str(props, "id")))
            .collect();
        steps.sort();

        let mut out = Vec::new();
        for (step_number, step_id) in steps {
            for result in self.results_for_step(&step_id).await? {
                out.push((step_number, result));
            }
        }
        Ok(out)
    }

    /// All results recorded for a step.
    pub async fn results_for_step(&self, step_id: &str) -> Result<Vec<AgentResult>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("execution_step_id".into(), step_id.into());
        let mut results: Vec<AgentResult> = self
            .graph
            .query_nodes(RESULT_LABEL, &filters)
            .await?
            .iter()
            .map(|props| self.result_from_props(props))
            .collect();
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(results)
    }

    fn result_from_props(&self, props: &Properties) -> AgentResult {
        AgentResult {
            id: prop_str(props, "id"),
            execution_step_id: prop_str(props, "execution_step_id"),
            agent_id: prop_str(props, "agent_id"),
            content: prop_str(props, "content"),
            status: ResultStatus::parse(&prop_str(props, "status"))
                .unwrap_or(ResultStatus::Error),
            timestamp: prop_time(props, "timestamp").unwrap_or_else(Utc::now),
        }
    }
}
