use chrono::Duration;
use neuromesh::conversation_service::ConversationService;
use neuromesh::domain::MessageRole;
use neuromesh::graph::{GraphStore, InMemoryGraph, Properties};
use neuromesh::user_service::UserService;
use std::collections::HashMap;
use std::sync::Arc;

fn setup() -> (Arc<InMemoryGraph>, UserService, ConversationService) {
    let graph = Arc::new(InMemoryGraph::new());
    let users = UserService::new(Arc::clone(&graph) as Arc<dyn GraphStore>);
    let conversations = ConversationService::new(Arc::clone(&graph) as Arc<dyn GraphStore>);
    (graph, users, conversations)
}

#[tokio::test]
async fn test_ensure_user_is_an_upsert() {
    let (graph, users, _) = setup();
    users.ensure_schema().await.unwrap();

    let first = users.ensure_user("sess-1").await.unwrap();
    let second = users.ensure_user("sess-1").await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.user_type, "web_session");
    let nodes = graph.query_nodes("User", &Properties::new()).await.unwrap();
    assert_eq!(nodes.len(), 1);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (_graph, users, _) = setup();
    let user = users.ensure_user("sess-1").await.unwrap();

    let session = users
        .ensure_session("sess-1", &user.id, Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(session.id, "sess-1");
    assert!(session.expires_at > session.created_at);

    // Ensure is idempotent.
    let again = users
        .ensure_session("sess-1", &user.id, Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(again.id, session.id);

    users.close_session("sess-1").await.unwrap();
    let closed = users.get_session("sess-1").await.unwrap().unwrap();
    assert_eq!(closed.status.as_str(), "closed");
}

#[tokio::test]
async fn test_at_most_one_active_conversation_per_session() {
    let (_graph, users, conversations) = setup();
    let user = users.ensure_user("sess-1").await.unwrap();
    users
        .ensure_session("sess-1", &user.id, Duration::hours(24))
        .await
        .unwrap();

    let first = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();
    let second = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);

    conversations.close_conversation(&first.id).await.unwrap();
    let third = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();
    assert_ne!(third.id, first.id);

    let all = conversations
        .conversations_for_session("sess-1")
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
    let active: Vec<_> = all
        .iter()
        .filter(|c| c.status.as_str() == "active")
        .collect();
    assert_eq!(active.len(), 1);
}

#[tokio::test]
async fn test_messages_read_back_in_append_order() {
    let (_graph, users, conversations) = setup();
    let user = users.ensure_user("sess-1").await.unwrap();
    let conversation = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();

    for i in 0..8 {
        conversations
            .append_message(
                &conversation.id,
                if i % 2 == 0 {
                    MessageRole::User
                } else {
                    MessageRole::Assistant
                },
                &format!("message {}", i),
                HashMap::new(),
            )
            .await
            .unwrap();
    }

    let messages = conversations.list_messages(&conversation.id).await.unwrap();
    assert_eq!(messages.len(), 8);
    for (i, message) in messages.iter().enumerate() {
        assert_eq!(message.content, format!("message {}", i));
        assert_eq!(message.conversation_id, conversation.id);
    }
}

#[tokio::test]
async fn test_message_metadata_round_trips_flat_keys() {
    let (_graph, users, conversations) = setup();
    let user = users.ensure_user("sess-1").await.unwrap();
    let conversation = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();

    let mut metadata = HashMap::new();
    metadata.insert(
        "decision_type".to_string(),
        neuromesh::graph::PropertyValue::Str("EXECUTE".to_string()),
    );
    metadata.insert(
        "analysis_confidence".to_string(),
        neuromesh::graph::PropertyValue::Int(90),
    );
    conversations
        .append_message(&conversation.id, MessageRole::Assistant, "done", metadata)
        .await
        .unwrap();

    let messages = conversations.list_messages(&conversation.id).await.unwrap();
    let stored = &messages[0];
    assert_eq!(
        stored.metadata.get("decision_type").unwrap().as_str(),
        Some("EXECUTE")
    );
    assert_eq!(
        stored.metadata.get("analysis_confidence").unwrap().as_i64(),
        Some(90)
    );
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent() {
    let (_graph, users, conversations) = setup();
    for _ in 0..3 {
        users.ensure_schema().await.unwrap();
        conversations.ensure_schema().await.unwrap();
    }
    let user = users.ensure_user("sess-1").await.unwrap();
    assert_eq!(user.id, "sess-1");
}

#[tokio::test]
async fn test_plan_linking() {
    let (graph, users, conversations) = setup();
    let user = users.ensure_user("sess-1").await.unwrap();
    let conversation = conversations
        .find_or_create_active("sess-1", &user.id)
        .await
        .unwrap();

    // A plan node the conversation links to.
    let mut plan_props = Properties::new();
    plan_props.insert("id".into(), "plan-1".into());
    graph
        .add_node("ExecutionPlan", "plan-1", plan_props)
        .await
        .unwrap();

    conversations
        .link_execution_plan(&conversation.id, "plan-1")
        .await
        .unwrap();
    assert_eq!(
        conversations.linked_plans(&conversation.id).await.unwrap(),
        vec!["plan-1".to_string()]
    );
}
