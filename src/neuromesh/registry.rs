//! Agent registry and connectivity health.
//!
//! Single writer for `Agent` and `Capability` nodes.  Registration is an
//! idempotent upsert — re-registering an agent updates the existing node
//! rather than creating a duplicate — and unregistration only flips status
//! to `offline`, preserving the node's history.  A background monitor
//! transitions agents with stale heartbeats to `disconnected`.

use crate::neuromesh::domain::{
    format_timestamp, mint_id, prop_str, prop_time, AgentRecord, AgentStatus, Capability,
};
use crate::neuromesh::graph::{GraphError, GraphStore, Properties};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

const AGENT_LABEL: &str = "Agent";
const CAPABILITY_LABEL: &str = "Capability";
const HAS_CAPABILITY: &str = "HAS_CAPABILITY";

/// Registration payload an agent submits when it comes online.
#[derive(Debug, Clone)]
pub struct AgentRegistration {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: Vec<CapabilitySpec>,
}

/// Capability description carried in a registration.
#[derive(Debug, Clone)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    pub input_type: String,
    pub output_type: String,
}

/// Single-writer repository and lifecycle service for agents.
pub struct AgentRegistry {
    graph: Arc<dyn GraphStore>,
}

impl AgentRegistry {
    pub fn new(graph: Arc<dyn GraphStore>) -> Self {
        Self { graph }
    }

    /// Declare constraints and indexes for the labels this service owns.
    /// Idempotent; called at startup.
    pub async fn ensure_schema(&self) -> Result<(), GraphError> {
        self.graph.create_unique_constraint(AGENT_LABEL, "id").await?;
        self.graph
            .create_unique_constraint(CAPABILITY_LABEL, "id")
            .await?;
        self.graph
            .create_unique_constraint(CAPABILITY_LABEL, "name")
            .await?;
        self.graph.create_index(AGENT_LABEL, "status").await?;
        Ok(())
    }

    /// Upsert an agent: match-or-create on id, set status online, bump
    /// `last_seen`, upsert capabilities and `HAS_CAPABILITY` edges.
    /// Re-registration never creates duplicate nodes.
    pub async fn register_agent(&self, reg: &AgentRegistration) -> Result<AgentRecord, GraphError> {
        let now = Utc::now();
        let existing = self.graph.get_node(AGENT_LABEL, &reg.id).await?;

        let record = AgentRecord {
            id: reg.id.clone(),
            name: reg.name.clone(),
            description: reg.description.clone(),
            status: AgentStatus::Online,
            version: reg.version.clone(),
            last_seen: now,
            created_at: existing
                .as_ref()
                .and_then(|props| prop_time(props, "created_at"))
                .unwrap_or(now),
            updated_at: now,
        };

        let mut props = Properties::new();
        props.insert("id".into(), record.id.clone().into());
        props.insert("name".into(), record.name.clone().into());
        props.insert("description".into(), record.description.clone().into());
        props.insert("status".into(), record.status.as_str().into());
        props.insert("version".into(), record.version.clone().into());
        props.insert("last_seen".into(), format_timestamp(&now).into());
        props.insert("updated_at".into(), format_timestamp(&now).into());

        if existing.is_some() {
            self.graph.update_node(AGENT_LABEL, &record.id, props).await?;
        } else {
            props.insert("created_at".into(), format_timestamp(&now).into());
            self.graph.add_node(AGENT_LABEL, &record.id, props).await?;
        }

        for spec in &reg.capabilities {
            let capability = self.ensure_capability(spec).await?;
            self.graph
                .add_edge(
                    AGENT_LABEL,
                    &record.id,
                    CAPABILITY_LABEL,
                    &capability.id,
                    HAS_CAPABILITY,
                    Properties::new(),
                )
                .await?;
        }

        Ok(record)
    }

    /// Upsert a capability by name. Capabilities are shared: the first
    /// observation creates the node, later registrations reference it.
    async fn ensure_capability(&self, spec: &CapabilitySpec) -> Result<Capability, GraphError> {
        let mut filters = Properties::new();
        filters.insert("name".into(), spec.name.clone().into());
        let found = self.graph.query_nodes(CAPABILITY_LABEL, &filters).await?;
        if let Some(props) = found.into_iter().next() {
            return Ok(Capability {
                id: prop_str(&props, "id"),
                name: prop_str(&props, "name"),
                description: prop_str(&props, "description"),
                input_type: prop_str(&props, "input_type"),
                output_type: prop_str(&props, "output_type"),
            });
        }

        let capability = Capability {
            id: mint_id("cap"),
            name: spec.name.clone(),
            description: spec.description.clone(),
            input_type: spec.input_type.clone(),
            output_type: spec.output_type.clone(),
        };
        let mut props = Properties::new();
        props.insert("id".into(), capability.id.clone().into());
        props.insert("name".into(), capability.name.clone().into());
        props.insert("description".into(), capability.description.clone().into());
        props.insert("input_type".into(), capability.input_type.clone().into());
        props.insert("output_type".into(), capability.output_type.clone().into());
        self.graph
            .add_node(CAPABILITY_LABEL, &capability.id, props)
            .await?;
        Ok(capability)
    }

    /// Mark an agent offline. The node is never deleted — its history stays
    /// queryable.
    pub async fn unregister_agent(&self, agent_id: &str) -> Result<(), GraphError> {
        let mut update = Properties::new();
        update.insert("status".into(), AgentStatus::Offline.as_str().into());
        update.insert("updated_at".into(), format_timestamp(&Utc::now()).into());
        self.graph.update_node(AGENT_LABEL, agent_id, update).await
    }

    /// Heartbeat: bump an agent's `last_seen` and restore online status.
    pub async fn update_agent_last_seen(&self, agent_id: &str) -> Result<(), GraphError> {
        let now = Utc::now();
        let mut update = Properties::new();
        update.insert("last_seen".into(), format_timestamp(&now).into());
        update.insert("status".into(), AgentStatus::Online.as_str().into());
        update.insert("updated_at".into(), format_timestamp(&now).into());
        self.graph.update_node(AGENT_LABEL, agent_id, update).await
    }

    /// Fetch an agent by id.
    pub async fn get_agent(&self, agent_id: &str) -> Result<Option<AgentRecord>, GraphError> {
        Ok(self
            .graph
            .get_node(AGENT_LABEL, agent_id)
            .await?
            .map(|props| self.agent_from_props(&props)))
    }

    /// All registered agents, in name order.
    pub async fn list_agents(&self) -> Result<Vec<AgentRecord>, GraphError> {
        let mut agents: Vec<AgentRecord> = self
            .graph
            .query_nodes(AGENT_LABEL, &Properties::new())
            .await?
            .iter()
            .map(|props| self.agent_from_props(props))
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    /// Agents currently online, in name order.
    pub async fn list_online_agents(&self) -> Result<Vec<AgentRecord>, GraphError> {
        let mut filters = Properties::new();
        filters.insert("status".into(), AgentStatus::Online.as_str().into());
        let mut agents: Vec<AgentRecord> = self
            .graph
            .query_nodes(AGENT_LABEL, &filters)
            .await?
            .iter()
            .map(|props| self.agent_from_props(props))
            .collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    /// Capability names an agent advertises, in name order.
    pub async fn capabilities_for(&self, agent_id: &str) -> Result<Vec<String>, GraphError> {
        let edges = self
            .graph
            .get_edges(AGENT_LABEL, agent_id, HAS_CAPABILITY)
            .await?;
        let mut names = Vec::with_capacity(edges.len());
        for (label, id) in edges {
            if let Some(props) = self.graph.get_node(&label, &id).await? {
                names.push(prop_str(&props, "name"));
            }
        }
        names.sort();
        Ok(names)
    }

    /// Transition every online agent whose `last_seen` is older than
    /// `horizon` to `disconnected`. Returns the affected agent ids.
    pub async fn sweep_stale_agents(&self, horizon: Duration) -> Result<Vec<String>, GraphError> {
        let cutoff = Utc::now() - horizon;
        let online = self.list_online_agents().await?;
        let mut transitioned = Vec::new();
        for agent in online {
            if agent.last_seen < cutoff {
                let mut update = Properties::new();
                update.insert("status".into(), AgentStatus::Disconnected.as_str().into());
                update.insert("updated_at".into(), format_timestamp(&Utc::now()).into());
                self.graph.update_node(AGENT_LABEL, &agent.id, update).await?;
                transitioned.push(agent.id);
            }
        }
        Ok(transitioned)
    }

    fn agent_from_props(&self, props: &Properties) -> AgentRecord {
        let now = Utc::now();
        AgentRecord {
            id: prop_str(props, "id"),
            name: prop_str(props, "name"),
            description: prop_str(props, "description"),
            status: AgentStatus::parse(&prop_str(props, "status"))
                .unwrap_or(AgentStatus::Offline),
            version: prop_str(props, "version"),
            last_seen: prop_time(props, "last_seen").unwrap_or(now),
            created_at: prop_time(props, "created_at").unwrap_or(now),
            updated_at: prop_time(props, "updated_at").unwrap_or(now),
        }
    }
}

/// Background task that periodically sweeps stale agents.
pub struct HealthMonitor {
    registry: Arc<AgentRegistry>,
    scan_interval: std::time::Duration,
    horizon: Duration,
    state: Mutex<Option<(JoinHandle<()>, watch::Sender<bool>)>>,
}

impl HealthMonitor {
    pub fn new(
        registry: Arc<AgentRegistry>,
        scan_interval: std::time::Duration,
        horizon: Duration,
    ) -> Self {
        Self {
            registry,
            scan_interval,
            horizon,
            state: Mutex::new(None),
        }
    }

    /// Spawn the periodic sweep. Idempotent.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;
        if state.is_some() {
            return;
        }
        let registry = Arc::clone(&self.registry);
        let horizon = self.horizon;
        let interval = self.scan_interval;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match registry.sweep_stale_agents(horizon).await {
                            Ok(stale) => {
                                for id in stale {
                                    log::warn!("HealthMonitor: agent {} marked disconnected (stale heartbeat)", id);
                                }
                            }
                            Err(e) => log::warn!("HealthMonitor: sweep failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        *state = Some((handle, shutdown_tx));
    }

    /// Stop the sweep task. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let taken = self.state.lock().await.take();
        if let Some((handle, shutdown)) = taken {
            let _ = shutdown.send(true);
            if let Err(e) = handle.await {
                log::warn!("HealthMonitor: task join failed: {}", e);
            }
        }
    }
}
