//! Service factory and process lifecycle.
//!
//! Wires every subsystem together once at startup and owns the long-lived
//! tasks.  `start()` applies all schemas (fatal on failure), then starts the
//! global consumer **before** any agent dispatch can happen, then the health
//! monitor.  `shutdown()` stops the tasks, closes every outstanding
//! correlation channel, and releases the broker and graph.  Both are
//! idempotent.

use crate::neuromesh::bff::ConversationBff;
use crate::neuromesh::bus::{BusError, MessageBroker, MessageBus};
use crate::neuromesh::config::NeuroMeshConfig;
use crate::neuromesh::consumer::GlobalConsumer;
use crate::neuromesh::conversation_service::ConversationService;
use crate::neuromesh::correlation::CorrelationTracker;
use crate::neuromesh::decision::DecisionEngine;
use crate::neuromesh::engine::ConversationEngine;
use crate::neuromesh::explorer::GraphExplorer;
use crate::neuromesh::graph::{GraphError, GraphStore};
use crate::neuromesh::llm_client::LLMClient;
use crate::neuromesh::orchestrator::Orchestrator;
use crate::neuromesh::planning::PlanningService;
use crate::neuromesh::registry::{AgentRegistry, HealthMonitor};
use crate::neuromesh::results::AgentResultStore;
use crate::neuromesh::synthesis::ResultSynthesizer;
use crate::neuromesh::user_service::UserService;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Errors surfaced during factory startup.
#[derive(Debug)]
pub enum FactoryError {
    /// Schema creation failed — fatal at startup.
    Schema(GraphError),
    /// The global consumer could not subscribe.
    Consumer(BusError),
}

impl fmt::Display for FactoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FactoryError::Schema(e) => write!(f, "schema setup failed: {}", e),
            FactoryError::Consumer(e) => write!(f, "global consumer failed to start: {}", e),
        }
    }
}

impl Error for FactoryError {}

/// Owns every service and the process lifecycle.
pub struct ServiceFactory {
    config: NeuroMeshConfig,
    graph: Arc<dyn GraphStore>,
    bus: Arc<MessageBus>,
    tracker: Arc<CorrelationTracker>,
    consumer: Arc<GlobalConsumer>,
    health_monitor: Arc<HealthMonitor>,
    users: Arc<UserService>,
    conversations: Arc<ConversationService>,
    planning: Arc<PlanningService>,
    results: Arc<AgentResultStore>,
    registry: Arc<AgentRegistry>,
    explorer: Arc<GraphExplorer>,
    orchestrator: Arc<Orchestrator>,
    bff: Arc<ConversationBff>,
    started: Mutex<bool>,
}

impl ServiceFactory {
    /// Assemble the control plane over the given backends. Nothing is
    /// started yet; call [`ServiceFactory::start`].
    pub fn new(
        config: NeuroMeshConfig,
        graph: Arc<dyn GraphStore>,
        broker: Arc<dyn MessageBroker>,
        llm: Arc<dyn LLMClient>,
    ) -> Self {
        let bus = Arc::new(MessageBus::new(broker));
        let tracker = Arc::new(CorrelationTracker::new());
        let consumer = Arc::new(GlobalConsumer::new(Arc::clone(&bus), Arc::clone(&tracker)));

        let users = Arc::new(UserService::new(Arc::clone(&graph)));
        let conversations = Arc::new(ConversationService::new(Arc::clone(&graph)));
        let planning = Arc::new(PlanningService::new(Arc::clone(&graph)));
        let results = Arc::new(AgentResultStore::new(Arc::clone(&graph)));
        let registry = Arc::new(AgentRegistry::new(Arc::clone(&graph)));
        let explorer = Arc::new(GraphExplorer::new(Arc::clone(&registry)));
        let health_monitor = Arc::new(HealthMonitor::new(
            Arc::clone(&registry),
            config.health_scan_interval,
            chrono::Duration::from_std(config.heartbeat_horizon)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        ));

        let decision_engine = Arc::new(DecisionEngine::new(
            Arc::clone(&llm),
            Arc::clone(&planning),
        ));
        let engine = Arc::new(
            ConversationEngine::new(
                Arc::clone(&llm),
                Arc::clone(&bus),
                Arc::clone(&tracker),
                Arc::clone(&planning),
                Arc::clone(&results),
            )
            .with_agent_timeout(config.agent_timeout)
            .with_max_iterations(config.max_engine_iterations),
        );
        let synthesizer = Arc::new(ResultSynthesizer::new(
            Arc::clone(&llm),
            Arc::clone(&planning),
            Arc::clone(&results),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&explorer),
            decision_engine,
            engine,
            synthesizer,
            Arc::clone(&planning),
        ));
        let bff = Arc::new(ConversationBff::new(
            Arc::clone(&users),
            Arc::clone(&conversations),
            Arc::clone(&orchestrator),
        ));

        Self {
            config,
            graph,
            bus,
            tracker,
            consumer,
            health_monitor,
            users,
            conversations,
            planning,
            results,
            registry,
            explorer,
            orchestrator,
            bff,
            started: Mutex::new(false),
        }
    }

    /// Apply every schema, then start the global consumer and the health
    /// monitor. Idempotent; schema errors are fatal.
    pub async fn start(&self) -> Result<(), FactoryError> {
        let mut started = self.started.lock().await;
        if *started {
            return Ok(());
        }

        self.users.ensure_schema().await.map_err(FactoryError::Schema)?;
        self.conversations
            .ensure_schema()
            .await
            .map_err(FactoryError::Schema)?;
        self.registry
            .ensure_schema()
            .await
            .map_err(FactoryError::Schema)?;
        self.planning
            .ensure_schema()
            .await
            .map_err(FactoryError::Schema)?;
        self.results
            .ensure_schema()
            .await
            .map_err(FactoryError::Schema)?;

        // Dispatches must never race the consumer's subscription.
        self.consumer.start().await.map_err(FactoryError::Consumer)?;
        self.health_monitor.start().await;

        *started = true;
        log::info!("ServiceFactory: control plane started");
        Ok(())
    }

    /// Stop background tasks, close all pending correlation channels, and
    /// release the broker and graph. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let mut started = self.started.lock().await;
        if !*started {
            return;
        }
        *started = false;

        self.health_monitor.shutdown().await;
        self.consumer.shutdown().await;
        self.tracker.cleanup_all().await;
        if let Err(e) = self.bus.close().await {
            log::warn!("ServiceFactory: broker close failed: {}", e);
        }
        if let Err(e) = self.graph.close().await {
            log::warn!("ServiceFactory: graph close failed: {}", e);
        }
        log::info!("ServiceFactory: control plane stopped");
    }

    pub fn config(&self) -> &NeuroMeshConfig {
        &self.config
    }

    pub fn bff(&self) -> Arc<ConversationBff> {
        Arc::clone(&self.bff)
    }

    pub fn orchestrator(&self) -> Arc<Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        Arc::clone(&self.bus)
    }

    pub fn tracker(&self) -> Arc<CorrelationTracker> {
        Arc::clone(&self.tracker)
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn explorer(&self) -> Arc<GraphExplorer> {
        Arc::clone(&self.explorer)
    }

    pub fn users(&self) -> Arc<UserService> {
        Arc::clone(&self.users)
    }

    pub fn conversations(&self) -> Arc<ConversationService> {
        Arc::clone(&self.conversations)
    }

    pub fn planning(&self) -> Arc<PlanningService> {
        Arc::clone(&self.planning)
    }

    pub fn results(&self) -> Arc<AgentResultStore> {
        Arc::clone(&self.results)
    }
}
