//! Configuration for NeuroMesh.
//!
//! A plain struct users construct manually or seed from the environment —
//! no config-file parsing dependencies are introduced.  Every timeout the
//! concurrency model names lives here with its documented default.
//!
//! # Example
//!
//! ```rust
//! use neuromesh::config::NeuroMeshConfig;
//! use std::time::Duration;
//!
//! let config = NeuroMeshConfig {
//!     agent_timeout: Duration::from_secs(10),
//!     ..NeuroMeshConfig::default()
//! };
//! assert_eq!(config.max_engine_iterations, 10);
//! ```

use std::time::Duration;

/// Global configuration for the orchestrator control plane.
#[derive(Debug, Clone)]
pub struct NeuroMeshConfig {
    /// Model identifier passed to the LLM provider.
    pub llm_model: String,
    /// Agent round-trip timeout (correlation channel deadline).
    pub agent_timeout: Duration,
    /// Cap on LLM iterations per turn, bounding runaway loops.
    pub max_engine_iterations: usize,
    /// Interval between agent health scans.
    pub health_scan_interval: Duration,
    /// `last_seen` horizon beyond which an online agent is considered
    /// disconnected (default 2× the 30 s heartbeat).
    pub heartbeat_horizon: Duration,
    /// WebSocket read deadline per frame.
    pub ws_read_timeout: Duration,
    /// WebSocket write deadline per frame.
    pub ws_write_timeout: Duration,
    /// Interval between `agent_update` pushes on the enhanced socket.
    pub agent_update_interval: Duration,
    /// Web session lifetime.
    pub session_duration: chrono::Duration,
}

impl Default for NeuroMeshConfig {
    fn default() -> Self {
        Self {
            llm_model: "gpt-4o-mini".to_string(),
            agent_timeout: Duration::from_secs(30),
            max_engine_iterations: 10,
            health_scan_interval: Duration::from_secs(30),
            heartbeat_horizon: Duration::from_secs(60),
            ws_read_timeout: Duration::from_secs(60),
            ws_write_timeout: Duration::from_secs(10),
            agent_update_interval: Duration::from_secs(10),
            session_duration: chrono::Duration::hours(24),
        }
    }
}

impl NeuroMeshConfig {
    /// Defaults overridden by `NEUROMESH_MODEL` when present. Broker and
    /// graph endpoints are configured on their respective backends; the LLM
    /// secret is read by the provider client itself.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(model) = std::env::var("NEUROMESH_MODEL") {
            if !model.is_empty() {
                config.llm_model = model;
            }
        }
        config
    }
}
