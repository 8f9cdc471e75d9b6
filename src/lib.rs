// src/lib.rs

// Import the top-level `neuromesh` module.
pub mod neuromesh;

// Re-exporting key items for easier external access.
pub use neuromesh::bff::{ConversationBff, ChatResponse};
pub use neuromesh::config::NeuroMeshConfig;
pub use neuromesh::factory::ServiceFactory;
pub use neuromesh::llm_client::{LLMClient, LLMError};
pub use neuromesh::orchestrator::{Orchestrator, OrchestratorRequest, OrchestratorResult};

// Module aliases so integration code can write `neuromesh::bus::...` style
// paths without the double segment.
pub use neuromesh::{bff, bus, clients, config, consumer, conversation_service, correlation,
    decision, domain, engine, events, explorer, factory, graph, llm_client, orchestrator,
    planning, registry, results, server, synthesis, user_service};
