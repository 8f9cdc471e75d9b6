//! End-to-end turns through the full control plane: scripted LLM, in-memory
//! broker and graph, simulated worker agents on the bus.

use async_trait::async_trait;
use neuromesh::bus::{BusMessage, MessageBus};
use neuromesh::config::NeuroMeshConfig;
use neuromesh::factory::ServiceFactory;
use neuromesh::graph::{GraphStore, InMemoryGraph, Properties};
use neuromesh::llm_client::{LLMClient, LLMError};
use neuromesh::registry::{AgentRegistration, CapabilitySpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Scripted control-plane model: routes on the stage marker each engine
/// bakes into its system prompt.
struct ControlPlaneMock {
    analysis: String,
    decision: String,
    dispatch_agent: String,
}

fn extract_payload(user_input: &str) -> String {
    if let (Some(start), Some(end)) = (user_input.find('\''), user_input.rfind('\'')) {
        if end > start {
            return user_input[start + 1..end].to_string();
        }
    }
    user_input
        .rsplit(':')
        .next()
        .unwrap_or(user_input)
        .trim()
        .to_string()
}

#[async_trait]
impl LLMClient for ControlPlaneMock {
    async fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String, LLMError> {
        if system_prompt.contains("analysis stage") {
            return Ok(self.analysis.clone());
        }
        if system_prompt.contains("decision stage") {
            return Ok(self.decision.clone());
        }
        if system_prompt.contains("synthesis stage") {
            let findings = user_prompt
                .split("Agent results:")
                .nth(1)
                .unwrap_or(user_prompt);
            return Ok(format!("Based on the agent results:{}", findings));
        }
        // Conversation engine: first pass dispatches, the follow-up relays
        // the agent's reply to the user.
        if let Some(idx) = user_prompt.find("replied:\n") {
            let rest = &user_prompt[idx + "replied:\n".len()..];
            let reply = rest
                .split("\n\nOriginal user request:")
                .next()
                .unwrap_or(rest)
                .trim();
            return Ok(format!("USER_RESPONSE:\n{}", reply));
        }
        Ok(format!(
            "SEND_EVENT:\nAgent: {}\nAction: process\nContent: {}\nIntent: handle the user task",
            self.dispatch_agent,
            extract_payload(user_prompt)
        ))
    }

    fn model_name(&self) -> &str {
        "control-plane-mock"
    }
}

fn test_config() -> NeuroMeshConfig {
    NeuroMeshConfig {
        agent_timeout: Duration::from_secs(5),
        ..NeuroMeshConfig::default()
    }
}

async fn start_factory(llm: Arc<dyn LLMClient>) -> (Arc<InMemoryGraph>, Arc<ServiceFactory>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let graph = Arc::new(InMemoryGraph::new());
    let broker = Arc::new(neuromesh::bus::InMemoryBroker::new());
    let factory = Arc::new(ServiceFactory::new(
        test_config(),
        Arc::clone(&graph) as Arc<dyn GraphStore>,
        broker,
        llm,
    ));
    factory.start().await.unwrap();
    (graph, factory)
}

async fn register_agent(factory: &ServiceFactory, id: &str, name: &str, capability: &str) {
    factory
        .registry()
        .register_agent(&AgentRegistration {
            id: id.to_string(),
            name: name.to_string(),
            description: format!("{} worker", name),
            version: "1.0.0".to_string(),
            capabilities: vec![CapabilitySpec {
                name: capability.to_string(),
                description: String::new(),
                input_type: "text".to_string(),
                output_type: "text".to_string(),
            }],
        })
        .await
        .unwrap();
    factory.bus().prepare_agent_queue(id).await.unwrap();
}

/// Worker that answers every instruction with a word count of the payload,
/// echoing the payload so cross-talk is detectable.
async fn spawn_word_count_agent(
    bus: Arc<MessageBus>,
    agent_id: &str,
) -> Arc<Mutex<Vec<BusMessage>>> {
    let received = Arc::new(Mutex::new(Vec::new()));
    let mut rx = bus.subscribe(agent_id).await.unwrap();
    let recorder = Arc::clone(&received);
    let agent_id = agent_id.to_string();
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            recorder.lock().await.push(message.clone());
            let words = message.content.split_whitespace().count();
            let reply = format!("The text '{}' contains {} words.", message.content, words);
            let _ = bus.send_to_ai(&agent_id, &reply, &message.correlation_id).await;
        }
    });
    received
}

// Scenario 1: word count through a single agent.
#[tokio::test]
async fn test_word_count_turn_routes_through_the_agent() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: "INTENT: count words\nCATEGORY: task\nCONFIDENCE: 95\nREQUIRED_AGENTS: text-processor\nREASONING: word-count capability matches".to_string(),
        decision: "DECISION: EXECUTE\nREASONING: unambiguous\nEXECUTION_PLAN: send the text to text-processor".to_string(),
        dispatch_agent: "text-processor".to_string(),
    });
    let (_graph, factory) = start_factory(llm).await;
    register_agent(&factory, "text-processor", "Text Processor", "word-count").await;
    let received = spawn_word_count_agent(factory.bus(), "text-processor").await;

    let outcome = factory
        .bff()
        .process_chat(
            "sess-1",
            "Count the words in the following text: 'Hello world testing'",
        )
        .await
        .unwrap();

    assert!(outcome.response.error.is_none());
    assert!(outcome.response.content.contains("3"));
    assert_eq!(outcome.response.session_id, "sess-1");
    assert!(outcome.execution_plan_id.is_some());

    // Exactly one SEND_EVENT, carrying the quoted text.
    let seen = received.lock().await;
    assert_eq!(seen.len(), 1);
    assert!(seen[0].content.contains("Hello world testing"));
    drop(seen);

    factory.shutdown().await;
}

// Scenario 2: vague request — the decision may clarify; the turn still
// succeeds and persists its analysis and decision.
#[tokio::test]
async fn test_clarification_turn_returns_the_question() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: "INTENT: deploy something\nCATEGORY: task\nCONFIDENCE: 25\nREQUIRED_AGENTS: deploy\nREASONING: target unspecified".to_string(),
        decision: "DECISION: CLARIFY\nREASONING: deployment target unknown\nCLARIFICATION_QUESTION: Which service should be deployed?".to_string(),
        dispatch_agent: "deploy".to_string(),
    });
    let (graph, factory) = start_factory(llm).await;
    register_agent(&factory, "deploy", "Deploy Agent", "deploy").await;

    let outcome = factory
        .bff()
        .process_chat("sess-1", "Deploy something unclear")
        .await
        .unwrap();

    assert!(outcome.response.error.is_none());
    assert_eq!(outcome.response.content, "Which service should be deployed?");

    assert_eq!(
        graph.query_nodes("Analysis", &Properties::new()).await.unwrap().len(),
        1
    );
    assert_eq!(
        graph.query_nodes("Decision", &Properties::new()).await.unwrap().len(),
        1
    );

    factory.shutdown().await;
}

// Scenario 3: meta-query — answered inline, no agent dispatch.
#[tokio::test]
async fn test_meta_query_is_answered_without_dispatch() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: "INTENT: list available agents\nCATEGORY: meta\nCONFIDENCE: 99\nREQUIRED_AGENTS: none\nREASONING: question about the orchestrator itself".to_string(),
        decision: "DECISION: EXECUTE\nREASONING: meta-query answered inline\nEXECUTION_PLAN: One agent is online: Text Processor (text-processor) with word-count.".to_string(),
        dispatch_agent: "text-processor".to_string(),
    });
    let (_graph, factory) = start_factory(llm).await;
    register_agent(&factory, "text-processor", "Text Processor", "word-count").await;
    let received = spawn_word_count_agent(factory.bus(), "text-processor").await;

    let outcome = factory
        .bff()
        .process_chat("sess-1", "What agents do you have available?")
        .await
        .unwrap();

    assert!(outcome.response.error.is_none());
    assert!(outcome.response.content.contains("Text Processor"));
    assert!(outcome.execution_plan_id.is_none());
    assert!(received.lock().await.is_empty());

    factory.shutdown().await;
}

// Scenario 4: two concurrent turns share nothing but the tracker; each gets
// its own agent reply.
#[tokio::test]
async fn test_concurrent_turns_do_not_cross_talk() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: "INTENT: count words\nCATEGORY: task\nCONFIDENCE: 95\nREQUIRED_AGENTS: word-counter\nREASONING: counting task".to_string(),
        decision: "DECISION: EXECUTE\nREASONING: unambiguous\nEXECUTION_PLAN: send the text to word-counter".to_string(),
        dispatch_agent: "word-counter".to_string(),
    });
    let (_graph, factory) = start_factory(llm).await;
    register_agent(&factory, "word-counter", "Word Counter", "word-count").await;
    let received = spawn_word_count_agent(factory.bus(), "word-counter").await;

    let bff = factory.bff();
    let (outcome_a, outcome_b) = tokio::join!(
        bff.process_chat("sess-a", "Count words: 'One two'"),
        bff.process_chat("sess-b", "Count words: 'Hi you'"),
    );
    let outcome_a = outcome_a.unwrap();
    let outcome_b = outcome_b.unwrap();

    assert!(outcome_a.response.content.contains("2"));
    assert!(outcome_b.response.content.contains("2"));
    // The payload echo proves each turn got its own reply.
    assert!(outcome_a.response.content.contains("One two"));
    assert!(!outcome_a.response.content.contains("Hi you"));
    assert!(outcome_b.response.content.contains("Hi you"));
    assert!(!outcome_b.response.content.contains("One two"));

    let seen = received.lock().await;
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0].correlation_id, seen[1].correlation_id);
    drop(seen);

    factory.shutdown().await;
}

// Scenario 5: agent lifecycle as seen through the catalog.
#[tokio::test]
async fn test_agent_lifecycle_reflected_in_catalog() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: String::new(),
        decision: String::new(),
        dispatch_agent: String::new(),
    });
    let (graph, factory) = start_factory(llm).await;

    register_agent(&factory, "agent-a", "Agent A", "task").await;
    let first = factory.registry().get_agent("agent-a").await.unwrap().unwrap();
    let catalog = factory.explorer().get_agent_context().await.unwrap();
    assert!(catalog.contains("Agent A"));

    factory.registry().unregister_agent("agent-a").await.unwrap();
    assert_eq!(
        factory.explorer().get_agent_context().await.unwrap(),
        "No agents currently registered"
    );

    register_agent(&factory, "agent-a", "Agent A", "task").await;
    let second = factory.registry().get_agent("agent-a").await.unwrap().unwrap();
    assert!(factory
        .explorer()
        .get_agent_context()
        .await
        .unwrap()
        .contains("Agent A"));
    assert!(second.last_seen >= first.last_seen);

    // One node throughout.
    assert_eq!(
        graph.query_nodes("Agent", &Properties::new()).await.unwrap().len(),
        1
    );

    factory.shutdown().await;
}

#[tokio::test]
async fn test_execution_plan_is_persisted_and_linked() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: "INTENT: count words\nCATEGORY: task\nCONFIDENCE: 95\nREQUIRED_AGENTS: text-processor\nREASONING: word-count capability".to_string(),
        decision: "DECISION: EXECUTE\nREASONING: unambiguous\nEXECUTION_PLAN: send the text to text-processor".to_string(),
        dispatch_agent: "text-processor".to_string(),
    });
    let (_graph, factory) = start_factory(llm).await;
    register_agent(&factory, "text-processor", "Text Processor", "word-count").await;
    let _received = spawn_word_count_agent(factory.bus(), "text-processor").await;

    let outcome = factory
        .bff()
        .process_chat("sess-1", "Count the words in 'alpha beta'")
        .await
        .unwrap();

    let plan_id = outcome.execution_plan_id.expect("plan should exist");
    let plan = factory.planning().get_plan(&plan_id).await.unwrap().unwrap();
    assert_eq!(plan.status.as_str(), "completed");
    let steps = factory.planning().get_steps(&plan_id).await.unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].assigned_agent, "text-processor");

    // LINKED_TO edge from the conversation.
    assert_eq!(
        factory
            .conversations()
            .linked_plans(&outcome.conversation_id)
            .await
            .unwrap(),
        vec![plan_id]
    );

    factory.shutdown().await;
}

#[tokio::test]
async fn test_factory_lifecycle_is_idempotent() {
    let llm = Arc::new(ControlPlaneMock {
        analysis: String::new(),
        decision: String::new(),
        dispatch_agent: String::new(),
    });
    let (_graph, factory) = start_factory(llm).await;

    // Double start and double shutdown are both safe.
    factory.start().await.unwrap();
    factory.shutdown().await;
    factory.shutdown().await;
}
