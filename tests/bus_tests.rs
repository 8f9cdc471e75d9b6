use neuromesh::bus::{
    BusError, InMemoryBroker, MessageBroker, MessageBus, MessageType, MISSING_CORRELATION_ERROR,
    ORCHESTRATOR_PARTICIPANT,
};
use std::sync::Arc;

fn bus() -> MessageBus {
    MessageBus::new(Arc::new(InMemoryBroker::new()))
}

#[tokio::test]
async fn test_every_typed_send_requires_a_correlation_id() {
    let bus = bus();

    let errors = vec![
        bus.send_to_agent("agent-1", "payload", "").await.unwrap_err(),
        bus.send_to_ai("agent-1", "payload", "").await.unwrap_err(),
        bus.send_between_agents("a", "b", "payload", "").await.unwrap_err(),
        bus.send_user_to_ai("user-1", "payload", "  ").await.unwrap_err(),
    ];

    for err in errors {
        assert!(matches!(err, BusError::MissingCorrelationId));
        assert_eq!(err.to_string(), "correlation ID is required for all messages");
        assert_eq!(err.to_string(), MISSING_CORRELATION_ERROR);
    }
}

#[tokio::test]
async fn test_send_to_agent_reaches_subscriber() {
    let bus = bus();
    let mut rx = bus.subscribe("text-processor").await.unwrap();

    let sent = bus
        .send_to_agent("text-processor", "count these words", "corr-1")
        .await
        .unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.id, sent.id);
    assert_eq!(received.from_id, ORCHESTRATOR_PARTICIPANT);
    assert_eq!(received.to_id, "text-processor");
    assert_eq!(received.message_type, MessageType::AiToAgent);
    assert_eq!(received.correlation_id, "corr-1");
}

#[tokio::test]
async fn test_messages_published_before_subscribe_are_retained() {
    let bus = bus();
    bus.prepare_agent_queue("worker").await.unwrap();

    bus.send_to_agent("worker", "first", "corr-1").await.unwrap();
    bus.send_to_agent("worker", "second", "corr-2").await.unwrap();

    let mut rx = bus.subscribe("worker").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().content, "first");
    assert_eq!(rx.recv().await.unwrap().content, "second");
}

#[tokio::test]
async fn test_per_topic_order_is_preserved() {
    let bus = bus();
    let mut rx = bus.subscribe("worker").await.unwrap();

    for i in 0..10 {
        bus.send_to_agent("worker", &format!("message-{}", i), &format!("corr-{}", i))
            .await
            .unwrap();
    }
    for i in 0..10 {
        assert_eq!(rx.recv().await.unwrap().content, format!("message-{}", i));
    }
}

#[tokio::test]
async fn test_prepare_agent_queue_is_idempotent() {
    let bus = bus();
    bus.prepare_agent_queue("worker").await.unwrap();
    bus.prepare_agent_queue("worker").await.unwrap();

    bus.send_to_agent("worker", "payload", "corr-1").await.unwrap();
    let mut rx = bus.subscribe("worker").await.unwrap();
    assert_eq!(rx.recv().await.unwrap().content, "payload");
}

#[tokio::test]
async fn test_agent_reply_routes_to_orchestrator_queue() {
    let bus = bus();
    let mut rx = bus.subscribe(ORCHESTRATOR_PARTICIPANT).await.unwrap();

    bus.send_to_ai("text-processor", "3 words", "corr-1").await.unwrap();

    let received = rx.recv().await.unwrap();
    assert_eq!(received.message_type, MessageType::AgentToAi);
    assert_eq!(received.from_id, "text-processor");
    assert_eq!(received.correlation_id, "corr-1");
}

#[tokio::test]
async fn test_closed_broker_rejects_operations() {
    let broker = Arc::new(InMemoryBroker::new());
    let bus = MessageBus::new(Arc::clone(&broker) as Arc<dyn MessageBroker>);
    bus.close().await.unwrap();

    let err = bus.send_to_agent("worker", "payload", "corr-1").await.unwrap_err();
    assert!(matches!(err, BusError::Closed));
}

#[test]
fn test_message_type_wire_names() {
    assert_eq!(
        serde_json::to_string(&MessageType::AiToAgent).unwrap(),
        "\"AI_TO_AGENT\""
    );
    assert_eq!(
        serde_json::to_string(&MessageType::AgentToAi).unwrap(),
        "\"AGENT_TO_AI\""
    );
    assert_eq!(MessageType::UserToAi.as_str(), "USER_TO_AI");
    let parsed: MessageType = serde_json::from_str("\"NOTIFICATION\"").unwrap();
    assert_eq!(parsed, MessageType::Notification);
}

#[tokio::test]
async fn test_envelope_serialization_round_trip() {
    let bus = bus();
    let mut rx = bus.subscribe("worker").await.unwrap();
    bus.send_to_agent("worker", "payload", "corr-1").await.unwrap();

    let message = rx.recv().await.unwrap();
    let json = serde_json::to_string(&message).unwrap();
    let back: neuromesh::bus::BusMessage = serde_json::from_str(&json).unwrap();
    assert_eq!(back.correlation_id, message.correlation_id);
    assert_eq!(back.message_type, message.message_type);
    assert_eq!(back.content, message.content);
}
