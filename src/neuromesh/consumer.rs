//! Global inbound message consumer.
//!
//! One long-lived task holds the orchestrator's subscription on the
//! `"ai-orchestrator"` participant queue and demultiplexes every inbound
//! agent reply into the [`CorrelationTracker`].  Replies whose correlation
//! ID no longer matches an outstanding request are logged and discarded —
//! the originating request typically timed out already.
//!
//! The consumer must be running before the first agent dispatch; the service
//! factory enforces this ordering at startup.

use crate::neuromesh::bus::{BusError, MessageBus, MessageType, ORCHESTRATOR_PARTICIPANT};
use crate::neuromesh::correlation::{AgentToAIMessage, CorrelationError, CorrelationTracker};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

struct ConsumerState {
    handle: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

/// Lifecycle-managed fan-in task for agent replies.
pub struct GlobalConsumer {
    bus: Arc<MessageBus>,
    tracker: Arc<CorrelationTracker>,
    state: Mutex<ConsumerState>,
}

impl GlobalConsumer {
    pub fn new(bus: Arc<MessageBus>, tracker: Arc<CorrelationTracker>) -> Self {
        Self {
            bus,
            tracker,
            state: Mutex::new(ConsumerState {
                handle: None,
                shutdown: None,
            }),
        }
    }

    /// Subscribe and spawn the consumer task. Idempotent: a second call on a
    /// running consumer returns without error.
    pub async fn start(&self) -> Result<(), BusError> {
        let mut state = self.state.lock().await;
        if state.handle.is_some() {
            return Ok(());
        }

        let mut rx = self.bus.subscribe(ORCHESTRATOR_PARTICIPANT).await?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let tracker = Arc::clone(&self.tracker);

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    maybe_message = rx.recv() => {
                        let message = match maybe_message {
                            Some(m) => m,
                            None => {
                                log::info!("GlobalConsumer: inbound queue closed, exiting");
                                break;
                            }
                        };
                        if message.message_type != MessageType::AgentToAi {
                            log::debug!(
                                "GlobalConsumer: ignoring {} message {} on orchestrator queue",
                                message.message_type.as_str(),
                                message.id
                            );
                            continue;
                        }
                        let reply = AgentToAIMessage {
                            from_agent_id: message.from_id.clone(),
                            content: message.content.clone(),
                            correlation_id: message.correlation_id.clone(),
                            received_at: Utc::now(),
                        };
                        match tracker.route_response(reply).await {
                            Ok(()) => {}
                            Err(CorrelationError::UnknownCorrelation(id)) => {
                                log::warn!(
                                    "GlobalConsumer: dropping reply from {} with unmatched correlation ID {}",
                                    message.from_id,
                                    id
                                );
                            }
                            Err(e) => {
                                log::warn!("GlobalConsumer: could not route reply: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        log::info!("GlobalConsumer: shutdown signalled, exiting");
                        break;
                    }
                }
            }
        });

        state.handle = Some(handle);
        state.shutdown = Some(shutdown_tx);
        Ok(())
    }

    /// Whether the consumer task is currently running.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// Signal the task and wait for it to exit. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let (handle, shutdown) = {
            let mut state = self.state.lock().await;
            (state.handle.take(), state.shutdown.take())
        };
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::warn!("GlobalConsumer: consumer task join failed: {}", e);
            }
        }
    }
}
