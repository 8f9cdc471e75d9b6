//! HTTP and WebSocket surface.
//!
//! Routes:
//!
//! - `POST /api/chat` — one `{session_id, message}` turn, JSON in/out.
//! - `GET /health` — liveness probe.
//! - `GET /ws` — legacy JSON frames, same shape as `/api/chat`.
//! - `GET /ws/enhanced` — typed event envelopes (§ [`crate::events`]):
//!   accepts `ping` and `chat_message`, pushes periodic `agent_update`
//!   snapshots and correlated `execution_start`/`execution_step` events for
//!   the turn being processed on that socket.
//! - Read-only UI APIs: `/api/graph/conversation/{id}`,
//!   `/api/execution-plan/{id}`, `/api/conversations/{session_id}`,
//!   `/api/agents/status`.
//!
//! Processing failures are reported inside a 200 body; 4xx is reserved for
//! validation and 5xx for unexpected internal failures.  WebSocket reads
//! and writes are bounded by the configured deadlines; an unknown typed
//! frame produces an `error` event without closing, invalid JSON closes
//! the connection after an `error` event.

use crate::neuromesh::bff::{BffError, ChatResponse, INIT_FAILURE_MESSAGE};
use crate::neuromesh::domain::{format_timestamp, PlanStatus};
use crate::neuromesh::events::{
    AgentUpdateEvent, AgentUpdateMetadata, ChatMessageEvent, ErrorEvent, ExecutionStartEvent,
    ExecutionStepEvent, PingEvent, UiEvent,
};
use crate::neuromesh::factory::ServiceFactory;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub factory: Arc<ServiceFactory>,
}

/// Build the full router over a started [`ServiceFactory`].
pub fn build_router(factory: Arc<ServiceFactory>) -> Router {
    let state = AppState { factory };
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(legacy_ws_handler))
        .route("/ws/enhanced", get(enhanced_ws_handler))
        .route("/api/graph/conversation/{id}", get(conversation_graph_handler))
        .route("/api/execution-plan/{id}", get(execution_plan_handler))
        .route("/api/conversations/{session_id}", get(conversations_handler))
        .route("/api/agents/status", get(agents_status_handler))
        .with_state(state)
}

/// Bind and serve until the task is aborted.
pub async fn serve(addr: SocketAddr, factory: Arc<ServiceFactory>) -> std::io::Result<()> {
    let router = build_router(factory);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("server: listening on {}", addr);
    axum::serve(listener, router).await
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    message: String,
}

async fn chat_handler(State(state): State<AppState>, body: String) -> Response {
    let request: ChatRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("malformed JSON: {}", e) })),
            )
                .into_response();
        }
    };

    match state
        .factory
        .bff()
        .process_chat(&request.session_id, &request.message)
        .await
    {
        Ok(outcome) => (StatusCode::OK, Json(outcome.response)).into_response(),
        Err(BffError::Validation(msg)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": msg })),
        )
            .into_response(),
        Err(e @ BffError::Initialization(_)) => (
            StatusCode::OK,
            Json(ChatResponse {
                content: INIT_FAILURE_MESSAGE.to_string(),
                session_id: request.session_id,
                intent: None,
                error: Some(e.to_string()),
            }),
        )
            .into_response(),
        // Benign close. Unreachable for plain POSTs (they carry a fresh
        // token), kept for completeness.
        Err(BffError::Cancelled) => (
            StatusCode::OK,
            Json(ChatResponse {
                content: String::new(),
                session_id: request.session_id,
                intent: None,
                error: None,
            }),
        )
            .into_response(),
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "service": "conversation-aware-web-bff" }))
}

// ---- Read-only UI APIs ------------------------------------------------------

#[derive(Serialize)]
struct GraphNodeView {
    id: String,
    label: String,
    caption: String,
}

#[derive(Serialize)]
struct GraphEdgeView {
    source: String,
    target: String,
    #[serde(rename = "type")]
    edge_type: String,
}

async fn conversation_graph_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "conversation id is required" })),
        )
            .into_response();
    }
    let conversations = state.factory.conversations();

    let conversation = match conversations.get_conversation(&id).await {
        Ok(Some(conversation)) => conversation,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("conversation not found: {}", id) })),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    };

    let mut nodes = vec![GraphNodeView {
        id: conversation.id.clone(),
        label: "Conversation".to_string(),
        caption: conversation.id.clone(),
    }];
    let mut edges = Vec::new();

    match conversations.list_messages(&id).await {
        Ok(messages) => {
            for message in messages {
                edges.push(GraphEdgeView {
                    source: conversation.id.clone(),
                    target: message.id.clone(),
                    edge_type: "HAS_MESSAGE".to_string(),
                });
                nodes.push(GraphNodeView {
                    id: message.id,
                    label: "ConversationMessage".to_string(),
                    caption: format!("{}: {}", message.role.as_str(), message.content),
                });
            }
        }
        Err(e) => return internal_error(e),
    }

    match conversations.linked_plans(&id).await {
        Ok(plan_ids) => {
            for plan_id in plan_ids {
                edges.push(GraphEdgeView {
                    source: conversation.id.clone(),
                    target: plan_id.clone(),
                    edge_type: "LINKED_TO".to_string(),
                });
                nodes.push(GraphNodeView {
                    id: plan_id.clone(),
                    label: "ExecutionPlan".to_string(),
                    caption: plan_id,
                });
            }
        }
        Err(e) => return internal_error(e),
    }

    (
        StatusCode::OK,
        Json(json!({ "conversation_id": id, "nodes": nodes, "edges": edges })),
    )
        .into_response()
}

async fn execution_plan_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    if id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "plan id is required" })),
        )
            .into_response();
    }
    let planning = state.factory.planning();
    let plan = match planning.get_plan(&id).await {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("execution plan not found: {}", id) })),
            )
                .into_response();
        }
        Err(e) => return internal_error(e),
    };
    let steps = match planning.get_steps(&id).await {
        Ok(steps) => steps,
        Err(e) => return internal_error(e),
    };

    let steps_view: Vec<serde_json::Value> = steps
        .iter()
        .map(|step| {
            json!({
                "id": step.id,
                "step_number": step.step_number,
                "description": step.description,
                "assigned_agent": step.assigned_agent,
                "status": step.status.as_str(),
                "completed_at": step.completed_at.as_ref().map(format_timestamp),
            })
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "id": plan.id,
            "name": plan.name,
            "description": plan.description,
            "status": plan.status.as_str(),
            "conversation_id": plan.conversation_id,
            "created_at": format_timestamp(&plan.created_at),
            "steps": steps_view,
        })),
    )
        .into_response()
}

async fn conversations_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if session_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "session id is required" })),
        )
            .into_response();
    }
    let conversations = state.factory.conversations();
    let list = match conversations.conversations_for_session(&session_id).await {
        Ok(list) => list,
        Err(e) => return internal_error(e),
    };

    let mut out = Vec::with_capacity(list.len());
    for conversation in list {
        let messages = match conversations.list_messages(&conversation.id).await {
            Ok(messages) => messages,
            Err(e) => return internal_error(e),
        };
        let messages_view: Vec<serde_json::Value> = messages
            .iter()
            .map(|message| {
                json!({
                    "id": message.id,
                    "role": message.role.as_str(),
                    "content": message.content,
                    "timestamp": format_timestamp(&message.timestamp),
                })
            })
            .collect();
        out.push(json!({
            "id": conversation.id,
            "session_id": conversation.session_id,
            "status": conversation.status.as_str(),
            "messages": messages_view,
        }));
    }

    (
        StatusCode::OK,
        Json(json!({ "session_id": session_id, "conversations": out })),
    )
        .into_response()
}

async fn agents_status_handler(State(state): State<AppState>) -> Response {
    let registry = state.factory.registry();
    let agents = match registry.list_agents().await {
        Ok(agents) => agents,
        Err(e) => return internal_error(e),
    };

    let mut out = Vec::with_capacity(agents.len());
    for agent in agents {
        let capabilities = registry
            .capabilities_for(&agent.id)
            .await
            .unwrap_or_default();
        out.push(json!({
            "id": agent.id,
            "name": agent.name,
            "status": agent.status.as_str(),
            "capabilities": capabilities,
            "last_active": format_timestamp(&agent.last_seen),
        }));
    }

    (StatusCode::OK, Json(json!({ "agents": out }))).into_response()
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    log::error!("server: internal failure: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
        .into_response()
}

// ---- Legacy WebSocket -------------------------------------------------------

async fn legacy_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| legacy_ws_loop(socket, state))
}

async fn legacy_ws_loop(mut socket: WebSocket, state: AppState) {
    let read_timeout = state.factory.config().ws_read_timeout;
    let write_timeout = state.factory.config().ws_write_timeout;

    // Turns on this connection are cancelled if the handler is dropped
    // (server shutdown, connection teardown).
    let connection_token = CancellationToken::new();
    let _cancel_guard = connection_token.clone().drop_guard();

    loop {
        let frame = match tokio::time::timeout(read_timeout, socket.recv()).await {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                log::debug!("legacy ws: read error: {}", e);
                return;
            }
            Ok(None) => return,
            Err(_) => {
                log::debug!("legacy ws: read timeout, closing");
                return;
            }
        };

        let text = match frame {
            Message::Text(text) => text,
            Message::Close(_) => return,
            _ => continue,
        };

        let request: ChatRequest = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                let payload = json!({ "error": format!("malformed JSON: {}", e) }).to_string();
                let _ = tokio::time::timeout(write_timeout, socket.send(Message::Text(payload.into())))
                    .await;
                return;
            }
        };

        let response = match state
            .factory
            .bff()
            .process_chat_with_cancellation(
                &request.session_id,
                &request.message,
                connection_token.child_token(),
            )
            .await
        {
            Ok(outcome) => outcome.response,
            // Benign close: nothing is sent back for a cancelled turn.
            Err(BffError::Cancelled) => return,
            Err(e) => ChatResponse {
                content: String::new(),
                session_id: request.session_id.clone(),
                intent: None,
                error: Some(e.to_string()),
            },
        };

        let payload = match serde_json::to_string(&response) {
            Ok(payload) => payload,
            Err(e) => {
                log::error!("legacy ws: response serialization failed: {}", e);
                continue;
            }
        };
        match tokio::time::timeout(write_timeout, socket.send(Message::Text(payload.into()))).await
        {
            Ok(Ok(())) => {}
            _ => return,
        }
    }
}

// ---- Enhanced (typed) WebSocket ---------------------------------------------

#[derive(Debug, Deserialize)]
struct InboundUiEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    data: serde_json::Value,
}

async fn enhanced_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| enhanced_ws_loop(socket, state))
}

async fn enhanced_ws_loop(socket: WebSocket, state: AppState) {
    let read_timeout = state.factory.config().ws_read_timeout;
    let write_timeout = state.factory.config().ws_write_timeout;
    let (mut sender, mut receiver) = socket.split();

    // Turns on this connection are cancelled if the handler is dropped
    // (server shutdown, connection teardown).
    let connection_token = CancellationToken::new();
    let _cancel_guard = connection_token.clone().drop_guard();

    let mut ticker = tokio::time::interval(state.factory.config().agent_update_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // The first tick fires immediately so a fresh UI gets a snapshot.
    let mut session_id = String::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for event in agent_update_events(&state, &session_id).await {
                    if !send_event(&mut sender, write_timeout, &event).await {
                        return;
                    }
                }
            }
            frame = tokio::time::timeout(read_timeout, receiver.next()) => {
                let frame = match frame {
                    Ok(Some(Ok(frame))) => frame,
                    Ok(Some(Err(e))) => {
                        log::debug!("enhanced ws: read error: {}", e);
                        return;
                    }
                    Ok(None) => return,
                    Err(_) => {
                        log::debug!("enhanced ws: read timeout, closing");
                        return;
                    }
                };
                let text = match frame {
                    Message::Text(text) => text,
                    Message::Close(_) => return,
                    _ => continue,
                };

                let inbound: InboundUiEvent = match serde_json::from_str(text.as_str()) {
                    Ok(inbound) => inbound,
                    Err(e) => {
                        // Invalid JSON: emit a typed error, then close.
                        let event = error_event(&session_id, "invalid_json", &e.to_string());
                        let _ = send_event(&mut sender, write_timeout, &event).await;
                        return;
                    }
                };
                if !inbound.session_id.is_empty() {
                    session_id = inbound.session_id.clone();
                }

                match inbound.event_type.as_str() {
                    "ping" => {
                        let event = UiEvent::new(
                            "pong",
                            &session_id,
                            serde_json::to_value(PingEvent::ok()).unwrap_or_default(),
                        );
                        if !send_event(&mut sender, write_timeout, &event).await {
                            return;
                        }
                    }
                    "chat_message" => {
                        let message = inbound
                            .data
                            .get("content")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        if !handle_enhanced_chat(
                            &state,
                            &mut sender,
                            write_timeout,
                            &session_id,
                            &message,
                            connection_token.child_token(),
                        )
                        .await
                        {
                            return;
                        }
                    }
                    other => {
                        // Unknown type: typed error, connection stays open.
                        let event = error_event(
                            &session_id,
                            "unknown_message_type",
                            &format!("unsupported event type '{}'", other),
                        );
                        if !send_event(&mut sender, write_timeout, &event).await {
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Process one typed chat turn and stream its correlated events. Returns
/// `false` when the socket is no longer writable.
async fn handle_enhanced_chat(
    state: &AppState,
    sender: &mut (impl SinkExt<Message> + Unpin),
    write_timeout: std::time::Duration,
    session_id: &str,
    message: &str,
    cancellation: CancellationToken,
) -> bool {
    let outcome = match state
        .factory
        .bff()
        .process_chat_with_cancellation(session_id, message, cancellation)
        .await
    {
        Ok(outcome) => outcome,
        // Benign close: no error event for a cancelled turn.
        Err(BffError::Cancelled) => return false,
        Err(e) => {
            let code = match e {
                BffError::Validation(_) => "validation",
                _ => "initialization",
            };
            let event = error_event(session_id, code, &e.to_string());
            return send_event(sender, write_timeout, &event).await;
        }
    };

    // Correlated execution events for the turn, when a plan was created.
    if let Some(plan_id) = &outcome.execution_plan_id {
        let planning = state.factory.planning();
        let steps = planning.get_steps(plan_id).await.unwrap_or_default();
        let execution_id = format!("exec-{}", plan_id);
        let start = UiEvent::new(
            "execution_start",
            session_id,
            serde_json::to_value(ExecutionStartEvent {
                execution_id: execution_id.clone(),
                conversation_id: outcome.conversation_id.clone(),
                plan_id: plan_id.clone(),
                start_time: chrono::Utc::now(),
                estimated_steps: steps.len(),
            })
            .unwrap_or_default(),
        );
        if !send_event(sender, write_timeout, &start).await {
            return false;
        }
        for step in steps {
            let event = UiEvent::new(
                "execution_step",
                session_id,
                serde_json::to_value(ExecutionStepEvent {
                    execution_id: execution_id.clone(),
                    step_id: step.id.clone(),
                    step_number: step.step_number,
                    description: step.description.clone(),
                    assigned_agent: step.assigned_agent.clone(),
                    status: step.status.as_str().to_string(),
                    start_time: step.created_at,
                    end_time: step.completed_at,
                    result: if step.status == PlanStatus::Completed {
                        state
                            .factory
                            .results()
                            .results_for_step(&step.id)
                            .await
                            .ok()
                            .and_then(|results| results.into_iter().next())
                            .map(|result| result.content)
                    } else {
                        None
                    },
                })
                .unwrap_or_default(),
            );
            if !send_event(sender, write_timeout, &event).await {
                return false;
            }
        }
    }

    let chat_event = UiEvent::new(
        "chat_message",
        session_id,
        serde_json::to_value(ChatMessageEvent {
            content: outcome.response.content.clone(),
            role: "assistant".to_string(),
            conversation_id: outcome.conversation_id.clone(),
            metadata: outcome
                .response
                .intent
                .as_ref()
                .map(|intent| json!({ "intent": intent })),
        })
        .unwrap_or_default(),
    );
    send_event(sender, write_timeout, &chat_event).await
}

async fn agent_update_events(state: &AppState, session_id: &str) -> Vec<UiEvent> {
    let registry = state.factory.registry();
    let agents = match registry.list_agents().await {
        Ok(agents) => agents,
        Err(e) => {
            log::warn!("enhanced ws: agent snapshot failed: {}", e);
            return Vec::new();
        }
    };
    let mut events = Vec::with_capacity(agents.len());
    for agent in agents {
        let capabilities = registry
            .capabilities_for(&agent.id)
            .await
            .unwrap_or_default();
        events.push(UiEvent::new(
            "agent_update",
            session_id,
            serde_json::to_value(AgentUpdateEvent {
                agent_name: agent.name.clone(),
                agent_type: "worker".to_string(),
                status: agent.status.as_str().to_string(),
                capabilities,
                metadata: AgentUpdateMetadata {
                    last_active: agent.last_seen,
                },
            })
            .unwrap_or_default(),
        ));
    }
    events
}

fn error_event(session_id: &str, code: &str, message: &str) -> UiEvent {
    UiEvent::new(
        "error",
        session_id,
        serde_json::to_value(ErrorEvent {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
        })
        .unwrap_or_default(),
    )
}

/// Send one typed event, bounded by the write deadline. Returns `false`
/// when the socket is gone.
async fn send_event(
    sender: &mut (impl SinkExt<Message> + Unpin),
    write_timeout: std::time::Duration,
    event: &UiEvent,
) -> bool {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            log::error!("enhanced ws: event serialization failed: {}", e);
            return true;
        }
    };
    matches!(
        tokio::time::timeout(write_timeout, sender.send(Message::Text(payload.into()))).await,
        Ok(Ok(()))
    )
}
