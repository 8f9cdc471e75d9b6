use async_trait::async_trait;
use neuromesh::decision::DecisionEngine;
use neuromesh::domain::DecisionType;
use neuromesh::graph::{GraphStore, InMemoryGraph, Properties};
use neuromesh::llm_client::{LLMClient, LLMError};
use neuromesh::planning::PlanningService;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Scripted client: pops one canned response per call.
struct ScriptedClient {
    responses: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new(responses: Vec<&str>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().rev().map(String::from).collect()),
        }
    }
}

#[async_trait]
impl LLMClient for ScriptedClient {
    async fn call(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String, LLMError> {
        let mut responses = self.responses.lock().await;
        responses.pop().ok_or(LLMError::EmptyResponse)
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

fn setup(responses: Vec<&str>) -> (Arc<InMemoryGraph>, Arc<PlanningService>, DecisionEngine) {
    let graph = Arc::new(InMemoryGraph::new());
    let planning = Arc::new(PlanningService::new(
        Arc::clone(&graph) as Arc<dyn GraphStore>
    ));
    let engine = DecisionEngine::new(
        Arc::new(ScriptedClient::new(responses)),
        Arc::clone(&planning),
    );
    (graph, planning, engine)
}

const WORD_COUNT_ANALYSIS: &str = "INTENT: count words in a text\nCATEGORY: task\nCONFIDENCE: 95\nREQUIRED_AGENTS: text-processor\nREASONING: the text-processor agent has the word-count capability";

#[tokio::test]
async fn test_explore_and_analyze_persists_an_analysis_node() {
    let (graph, planning, engine) = setup(vec![WORD_COUNT_ANALYSIS]);

    let analysis = engine
        .explore_and_analyze(
            "Count the words in 'Hello world testing'",
            "user-1",
            "Available agents:\n- Text Processor (ID: text-processor, Status: online)",
            "msg-1",
        )
        .await
        .unwrap();

    assert_eq!(analysis.intent, "count words in a text");
    assert_eq!(analysis.confidence, 95);
    assert_eq!(analysis.required_agents, vec!["text-processor".to_string()]);
    assert_eq!(analysis.request_id, "msg-1");

    let stored = planning.get_analysis(&analysis.id).await.unwrap().unwrap();
    assert_eq!(stored.intent, analysis.intent);
    assert_eq!(stored.required_agents, analysis.required_agents);
    assert_eq!(
        graph.query_nodes("Analysis", &Properties::new()).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_malformed_analysis_persists_nothing() {
    let (graph, _planning, engine) = setup(vec!["I think the user wants a word count."]);

    let err = engine
        .explore_and_analyze("Count words", "user-1", "No agents currently registered", "msg-1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("malformed analysis"));
    assert!(graph
        .query_nodes("Analysis", &Properties::new())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_make_decision_links_decision_to_analysis() {
    let (graph, planning, engine) = setup(vec![
        WORD_COUNT_ANALYSIS,
        "DECISION: EXECUTE\nREASONING: the request is unambiguous\nEXECUTION_PLAN: route the text to text-processor for word-count",
    ]);

    let analysis = engine
        .explore_and_analyze("Count the words", "user-1", "catalog", "msg-1")
        .await
        .unwrap();
    let decision = engine
        .make_decision("Count the words", "user-1", &analysis, "msg-1")
        .await
        .unwrap();

    assert_eq!(decision.decision_type, DecisionType::Execute);
    assert_eq!(decision.analysis_id, analysis.id);

    let stored = planning.get_decision(&decision.id).await.unwrap().unwrap();
    assert_eq!(stored.analysis_id, analysis.id);
    assert!(stored.execution_plan.contains("text-processor"));

    let edges = graph
        .get_edges("Analysis", &analysis.id, "RESULTED_IN")
        .await
        .unwrap();
    assert_eq!(edges, vec![("Decision".to_string(), decision.id.clone())]);
}

#[tokio::test]
async fn test_clarify_decision_carries_the_question() {
    let (_graph, _planning, engine) = setup(vec![
        "INTENT: deploy something\nCATEGORY: task\nCONFIDENCE: 30\nREQUIRED_AGENTS: deploy\nREASONING: underspecified",
        "DECISION: CLARIFY\nREASONING: the target is unknown\nCLARIFICATION_QUESTION: Which service should be deployed, and to which environment?",
    ]);

    let analysis = engine
        .explore_and_analyze("Deploy something unclear", "user-1", "catalog", "msg-1")
        .await
        .unwrap();
    let decision = engine
        .make_decision("Deploy something unclear", "user-1", &analysis, "msg-1")
        .await
        .unwrap();

    assert_eq!(decision.decision_type, DecisionType::Clarify);
    assert!(decision.clarification_question.contains("Which service"));
}

#[tokio::test]
async fn test_create_plan_orders_steps_by_required_agents() {
    let (_graph, planning, engine) = setup(vec![
        "INTENT: multi-agent task\nCATEGORY: task\nCONFIDENCE: 80\nREQUIRED_AGENTS: researcher, writer, reviewer\nREASONING: three stages",
        "DECISION: EXECUTE\nREASONING: plan is clear\nEXECUTION_PLAN: research, then write, then review",
    ]);

    let analysis = engine
        .explore_and_analyze("Write a report", "user-1", "catalog", "msg-1")
        .await
        .unwrap();
    let decision = engine
        .make_decision("Write a report", "user-1", &analysis, "msg-1")
        .await
        .unwrap();

    let (plan, steps) = planning
        .create_plan(&decision, "conv-1", &analysis.required_agents)
        .await
        .unwrap();

    assert_eq!(steps.len(), 3);
    let numbers: Vec<i64> = steps.iter().map(|s| s.step_number).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    let agents: Vec<&str> = steps.iter().map(|s| s.assigned_agent.as_str()).collect();
    assert_eq!(agents, vec!["researcher", "writer", "reviewer"]);

    let loaded = planning.get_steps(&plan.id).await.unwrap();
    assert_eq!(loaded.len(), 3);
    assert_eq!(loaded[0].assigned_agent, "researcher");
    assert!(!planning.is_execution_complete(&plan.id).await.unwrap());
}

#[tokio::test]
async fn test_provider_failure_surfaces_as_error() {
    let (graph, _planning, engine) = setup(vec![]);
    let err = engine
        .explore_and_analyze("anything", "user-1", "catalog", "msg-1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("provider error"));
    assert!(graph
        .query_nodes("Analysis", &Properties::new())
        .await
        .unwrap()
        .is_empty());
}
