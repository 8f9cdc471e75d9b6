//! HTTP surface tests against a real listener.

use async_trait::async_trait;
use neuromesh::config::NeuroMeshConfig;
use neuromesh::factory::ServiceFactory;
use neuromesh::graph::{GraphStore, InMemoryGraph};
use neuromesh::llm_client::{LLMClient, LLMError};
use neuromesh::registry::{AgentRegistration, CapabilitySpec};
use neuromesh::server::build_router;
use std::net::SocketAddr;
use std::sync::Arc;

struct MetaMock;

#[async_trait]
impl LLMClient for MetaMock {
    async fn call(&self, system_prompt: &str, _user_prompt: &str) -> Result<String, LLMError> {
        if system_prompt.contains("analysis stage") {
            return Ok("INTENT: system question\nCATEGORY: meta\nCONFIDENCE: 90\nREQUIRED_AGENTS: none\nREASONING: meta".to_string());
        }
        if system_prompt.contains("decision stage") {
            return Ok("DECISION: EXECUTE\nREASONING: inline\nEXECUTION_PLAN: I am an orchestrator.".to_string());
        }
        Ok("USER_RESPONSE:\nunused".to_string())
    }

    fn model_name(&self) -> &str {
        "meta-mock"
    }
}

async fn serve_test_app() -> (SocketAddr, Arc<ServiceFactory>) {
    let graph = Arc::new(InMemoryGraph::new());
    let factory = Arc::new(ServiceFactory::new(
        NeuroMeshConfig::default(),
        graph as Arc<dyn GraphStore>,
        Arc::new(neuromesh::bus::InMemoryBroker::new()),
        Arc::new(MetaMock),
    ));
    factory.start().await.unwrap();

    let router = build_router(Arc::clone(&factory));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (addr, factory)
}

#[tokio::test]
async fn test_health_endpoint() {
    let (addr, _factory) = serve_test_app().await;

    let response = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "conversation-aware-web-bff");
}

#[tokio::test]
async fn test_chat_round_trip() {
    let (addr, _factory) = serve_test_app().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/chat", addr))
        .json(&serde_json::json!({ "session_id": "sess-1", "message": "What do you do?" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["content"], "I am an orchestrator.");
    assert_eq!(body["session_id"], "sess-1");
    assert_eq!(body["intent"], "system question");
    assert!(body.get("error").is_none());
}

#[tokio::test]
async fn test_chat_rejects_malformed_json() {
    let (addr, _factory) = serve_test_app().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/chat", addr))
        .header("Content-Type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_chat_rejects_missing_fields() {
    let (addr, _factory) = serve_test_app().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/api/chat", addr))
        .json(&serde_json::json!({ "message": "no session" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_chat_rejects_wrong_method() {
    let (addr, _factory) = serve_test_app().await;

    let response = reqwest::get(format!("http://{}/api/chat", addr)).await.unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn test_agents_status_lists_registered_agents() {
    let (addr, factory) = serve_test_app().await;
    factory
        .registry()
        .register_agent(&AgentRegistration {
            id: "text-processor".to_string(),
            name: "Text Processor".to_string(),
            description: "text worker".to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec![CapabilitySpec {
                name: "word-count".to_string(),
                description: String::new(),
                input_type: "text".to_string(),
                output_type: "text".to_string(),
            }],
        })
        .await
        .unwrap();

    let response = reqwest::get(format!("http://{}/api/agents/status", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let agents = body["agents"].as_array().unwrap();
    assert_eq!(agents.len(), 1);
    assert_eq!(agents[0]["id"], "text-processor");
    assert_eq!(agents[0]["status"], "online");
    assert_eq!(agents[0]["capabilities"][0], "word-count");
    assert!(agents[0].get("last_active").is_some());
}

#[tokio::test]
async fn test_unknown_execution_plan_is_404() {
    let (addr, _factory) = serve_test_app().await;

    let response = reqwest::get(format!("http://{}/api/execution-plan/plan-missing", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_conversations_endpoint_returns_session_history() {
    let (addr, factory) = serve_test_app().await;
    factory
        .bff()
        .process_chat("sess-9", "What do you do?")
        .await
        .unwrap();

    let response = reqwest::get(format!("http://{}/api/conversations/sess-9", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    let conversations = body["conversations"].as_array().unwrap();
    assert_eq!(conversations.len(), 1);
    let messages = conversations[0]["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[1]["role"], "assistant");
}

#[tokio::test]
async fn test_conversation_graph_view() {
    let (addr, factory) = serve_test_app().await;
    let outcome = factory
        .bff()
        .process_chat("sess-9", "What do you do?")
        .await
        .unwrap();

    let response = reqwest::get(format!(
        "http://{}/api/graph/conversation/{}",
        addr, outcome.conversation_id
    ))
    .await
    .unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["conversation_id"], outcome.conversation_id);
    // Conversation node plus two message nodes.
    assert_eq!(body["nodes"].as_array().unwrap().len(), 3);
    assert_eq!(body["edges"].as_array().unwrap().len(), 2);
}
