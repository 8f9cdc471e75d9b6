//! Read-only agent catalog for prompt injection.
//!
//! The explorer renders the registry's view of online agents into the plain
//! text block the decision and conversation engines inject verbatim into
//! their system prompts.

use crate::neuromesh::graph::GraphError;
use crate::neuromesh::registry::AgentRegistry;
use std::sync::Arc;

/// Literal returned when no agent is online.
pub const EMPTY_CATALOG: &str = "No agents currently registered";

/// Read-only façade over the registry producing prompt-ready text.
pub struct GraphExplorer {
    registry: Arc<AgentRegistry>,
}

impl GraphExplorer {
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }

    /// Render the online-agent catalog:
    ///
    /// ```text
    /// Available agents:
    /// - Text Processor (ID: text-processor, Status: online)
    ///   Capabilities: word-count
    /// ```
    ///
    /// or the literal `"No agents currently registered"` when the set is
    /// empty. This text goes into LLM prompts verbatim.
    pub async fn get_agent_context(&self) -> Result<String, GraphError> {
        let agents = self.registry.list_online_agents().await?;
        if agents.is_empty() {
            return Ok(EMPTY_CATALOG.to_string());
        }

        let mut out = String::from("Available agents:");
        for agent in &agents {
            let capabilities = self.registry.capabilities_for(&agent.id).await?;
            out.push_str(&format!(
                "\n- {} (ID: {}, Status: online)\n  Capabilities: {}",
                agent.name,
                agent.id,
                capabilities.join(", ")
            ));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neuromesh::graph::InMemoryGraph;
    use crate::neuromesh::registry::{AgentRegistration, CapabilitySpec};

    fn registration(id: &str, name: &str, capability: &str) -> AgentRegistration {
        AgentRegistration {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            version: "1.0.0".to_string(),
            capabilities: vec![CapabilitySpec {
                name: capability.to_string(),
                description: String::new(),
                input_type: "text".to_string(),
                output_type: "text".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_empty_catalog_literal() {
        let graph = Arc::new(InMemoryGraph::new());
        let registry = Arc::new(AgentRegistry::new(graph));
        let explorer = GraphExplorer::new(registry);
        assert_eq!(
            explorer.get_agent_context().await.unwrap(),
            "No agents currently registered"
        );
    }

    #[tokio::test]
    async fn test_catalog_lists_online_agents_with_capabilities() {
        let graph = Arc::new(InMemoryGraph::new());
        let registry = Arc::new(AgentRegistry::new(graph));
        registry
            .register_agent(&registration("text-processor", "Text Processor", "word-count"))
            .await
            .unwrap();

        let explorer = GraphExplorer::new(Arc::clone(&registry));
        let context = explorer.get_agent_context().await.unwrap();
        assert!(context.starts_with("Available agents:"));
        assert!(context.contains("- Text Processor (ID: text-processor, Status: online)"));
        assert!(context.contains("Capabilities: word-count"));
    }

    #[tokio::test]
    async fn test_offline_agents_are_not_listed() {
        let graph = Arc::new(InMemoryGraph::new());
        let registry = Arc::new(AgentRegistry::new(graph));
        registry
            .register_agent(&registration("deploy", "Deploy Agent", "deploy"))
            .await
            .unwrap();
        registry.unregister_agent("deploy").await.unwrap();

        let explorer = GraphExplorer::new(Arc::clone(&registry));
        assert_eq!(
            explorer.get_agent_context().await.unwrap(),
            "No agents currently registered"
        );
    }
}
