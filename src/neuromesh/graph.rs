//! Property-graph adapter.
//!
//! All NeuroMesh state — users, sessions, conversations, agents, plans,
//! results — lives in a labeled property graph behind the [`GraphStore`]
//! trait.  Nodes carry only primitive-typed properties; composite structure
//! is always expressed as relationships to other nodes.  Equality filters
//! are the only query primitive — richer patterns are composed at the
//! service layer.
//!
//! [`InMemoryGraph`] is the default backend used by tests and local runs;
//! durable backends implement the same trait and plug into the service
//! factory unchanged.
//!
//! # Example
//!
//! ```rust,no_run
//! use neuromesh::graph::{GraphStore, InMemoryGraph, PropertyValue};
//! use std::collections::HashMap;
//!
//! # async {
//! let graph = InMemoryGraph::new();
//! graph.create_unique_constraint("Agent", "id").await.unwrap();
//!
//! let mut props = HashMap::new();
//! props.insert("id".to_string(), PropertyValue::Str("text-processor".into()));
//! props.insert("status".to_string(), PropertyValue::Str("online".into()));
//! graph.add_node("Agent", "text-processor", props).await.unwrap();
//!
//! let found = graph.get_node("Agent", "text-processor").await.unwrap();
//! assert!(found.is_some());
//! # };
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use tokio::sync::Mutex;

/// A primitive-typed property stored on a graph node or edge.
///
/// The graph backend rejects empty list properties, so callers storing a
/// possibly-empty list must serialize the empty case as `Str("")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// UTF-8 string (also used for ISO-8601 timestamps).
    Str(String),
    /// 64-bit signed integer.
    Int(i64),
    /// 64-bit float.
    Float(f64),
    /// Boolean.
    Bool(bool),
    /// Non-empty list of strings.
    StrList(Vec<String>),
}

impl PropertyValue {
    /// Borrow the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Extract an integer, if this is an `Int`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Extract a boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Extract the list payload, if this is a `StrList`.
    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            PropertyValue::StrList(l) => Some(l),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::Str(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::Str(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

/// Flat property map attached to a node or edge.
pub type Properties = HashMap<String, PropertyValue>;

/// Errors surfaced by [`GraphStore`] implementations.
#[derive(Debug)]
pub enum GraphError {
    /// The addressed node does not exist.
    NodeNotFound { label: String, id: String },
    /// An insert collided with a unique constraint.
    DuplicateNode { label: String, id: String },
    /// A write violated a schema rule (e.g. an empty list property).
    ConstraintViolation(String),
    /// Backend-specific failure, surfaced verbatim.
    Backend(String),
    /// The adapter was already closed.
    Closed,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::NodeNotFound { label, id } => {
                write!(f, "node not found: {}({})", label, id)
            }
            GraphError::DuplicateNode { label, id } => {
                write!(f, "duplicate node: {}({})", label, id)
            }
            GraphError::ConstraintViolation(msg) => write!(f, "constraint violation: {}", msg),
            GraphError::Backend(msg) => write!(f, "graph backend error: {}", msg),
            GraphError::Closed => write!(f, "graph adapter is closed"),
        }
    }
}

impl Error for GraphError {}

/// Capability contract for the property graph.
///
/// All operations are async and cancellable by dropping the future.  Errors
/// are surfaced verbatim to the caller; retry and best-effort policies live
/// at the service layer.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Insert a node. Fails with [`GraphError::DuplicateNode`] when a node
    /// with the same label and id (or a unique-constrained property value)
    /// already exists.
    async fn add_node(&self, label: &str, id: &str, props: Properties) -> Result<(), GraphError>;

    /// Fetch a node's properties, or `None` when absent.
    async fn get_node(&self, label: &str, id: &str) -> Result<Option<Properties>, GraphError>;

    /// Partially merge `props` into an existing node.
    async fn update_node(&self, label: &str, id: &str, props: Properties)
        -> Result<(), GraphError>;

    /// Remove a node and every edge touching it.
    async fn delete_node(&self, label: &str, id: &str) -> Result<(), GraphError>;

    /// Return all nodes with `label` whose properties equal every filter
    /// entry. An empty filter matches every node of the label.
    async fn query_nodes(
        &self,
        label: &str,
        filters: &Properties,
    ) -> Result<Vec<Properties>, GraphError>;

    /// Upsert a typed edge between two existing nodes.
    async fn add_edge(
        &self,
        src_label: &str,
        src_id: &str,
        dst_label: &str,
        dst_id: &str,
        edge_type: &str,
        props: Properties,
    ) -> Result<(), GraphError>;

    /// Remove a typed edge if present.
    async fn delete_edge(
        &self,
        src_label: &str,
        src_id: &str,
        dst_label: &str,
        dst_id: &str,
        edge_type: &str,
    ) -> Result<(), GraphError>;

    /// Return `(dst_label, dst_id)` pairs reachable from a node over edges of
    /// the given type.
    async fn get_edges(
        &self,
        src_label: &str,
        src_id: &str,
        edge_type: &str,
    ) -> Result<Vec<(String, String)>, GraphError>;

    /// Declare a unique constraint on `(label, property)`. Idempotent.
    async fn create_unique_constraint(&self, label: &str, property: &str)
        -> Result<(), GraphError>;

    /// Declare an index on `(label, property)`. Idempotent.
    async fn create_index(&self, label: &str, property: &str) -> Result<(), GraphError>;

    /// Release the adapter. Subsequent operations fail with
    /// [`GraphError::Closed`].
    async fn close(&self) -> Result<(), GraphError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EdgeKey {
    src_label: String,
    src_id: String,
    dst_label: String,
    dst_id: String,
    edge_type: String,
}

#[derive(Default)]
struct GraphInner {
    nodes: HashMap<(String, String), Properties>,
    edges: HashMap<EdgeKey, Properties>,
    unique_constraints: Vec<(String, String)>,
    indexes: Vec<(String, String)>,
    closed: bool,
}

impl GraphInner {
    fn check_open(&self) -> Result<(), GraphError> {
        if self.closed {
            Err(GraphError::Closed)
        } else {
            Ok(())
        }
    }

    fn check_props(props: &Properties) -> Result<(), GraphError> {
        for (key, value) in props {
            if let PropertyValue::StrList(list) = value {
                if list.is_empty() {
                    return Err(GraphError::ConstraintViolation(format!(
                        "empty list property '{}' is not storable; use the empty string",
                        key
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_unique(&self, label: &str, id: &str, props: &Properties) -> Result<(), GraphError> {
        for (c_label, c_prop) in &self.unique_constraints {
            if c_label != label {
                continue;
            }
            let candidate = match props.get(c_prop) {
                Some(v) => v,
                None => continue,
            };
            for ((other_label, other_id), other_props) in &self.nodes {
                if other_label == label && other_id != id && other_props.get(c_prop) == Some(candidate)
                {
                    return Err(GraphError::DuplicateNode {
                        label: label.to_string(),
                        id: id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// In-process [`GraphStore`] backed by hash maps under a single async mutex.
///
/// Enforces unique constraints at insert time and rejects empty-list
/// properties, matching the behavior repository code must assume of a
/// durable backend.
pub struct InMemoryGraph {
    inner: Mutex<GraphInner>,
}

impl InMemoryGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GraphInner::default()),
        }
    }

    /// Total number of nodes, across all labels. Test helper.
    pub async fn node_count(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }
}

impl Default for InMemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraph {
    async fn add_node(&self, label: &str, id: &str, props: Properties) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        GraphInner::check_props(&props)?;
        let key = (label.to_string(), id.to_string());
        if inner.nodes.contains_key(&key) {
            return Err(GraphError::DuplicateNode {
                label: label.to_string(),
                id: id.to_string(),
            });
        }
        inner.check_unique(label, id, &props)?;
        inner.nodes.insert(key, props);
        Ok(())
    }

    async fn get_node(&self, label: &str, id: &str) -> Result<Option<Properties>, GraphError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        Ok(inner
            .nodes
            .get(&(label.to_string(), id.to_string()))
            .cloned())
    }

    async fn update_node(
        &self,
        label: &str,
        id: &str,
        props: Properties,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        GraphInner::check_props(&props)?;
        inner.check_unique(label, id, &props)?;
        let key = (label.to_string(), id.to_string());
        match inner.nodes.get_mut(&key) {
            Some(existing) => {
                for (k, v) in props {
                    existing.insert(k, v);
                }
                Ok(())
            }
            None => Err(GraphError::NodeNotFound {
                label: label.to_string(),
                id: id.to_string(),
            }),
        }
    }

    async fn delete_node(&self, label: &str, id: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let key = (label.to_string(), id.to_string());
        if inner.nodes.remove(&key).is_none() {
            return Err(GraphError::NodeNotFound {
                label: label.to_string(),
                id: id.to_string(),
            });
        }
        inner.edges.retain(|edge, _| {
            !(edge.src_label == label && edge.src_id == id)
                && !(edge.dst_label == label && edge.dst_id == id)
        });
        Ok(())
    }

    async fn query_nodes(
        &self,
        label: &str,
        filters: &Properties,
    ) -> Result<Vec<Properties>, GraphError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        let mut out = Vec::new();
        for ((node_label, _), props) in &inner.nodes {
            if node_label != label {
                continue;
            }
            let matches = filters
                .iter()
                .all(|(k, v)| props.get(k).map(|p| p == v).unwrap_or(false));
            if matches {
                out.push(props.clone());
            }
        }
        Ok(out)
    }

    async fn add_edge(
        &self,
        src_label: &str,
        src_id: &str,
        dst_label: &str,
        dst_id: &str,
        edge_type: &str,
        props: Properties,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        GraphInner::check_props(&props)?;
        let src = (src_label.to_string(), src_id.to_string());
        let dst = (dst_label.to_string(), dst_id.to_string());
        if !inner.nodes.contains_key(&src) {
            return Err(GraphError::NodeNotFound {
                label: src_label.to_string(),
                id: src_id.to_string(),
            });
        }
        if !inner.nodes.contains_key(&dst) {
            return Err(GraphError::NodeNotFound {
                label: dst_label.to_string(),
                id: dst_id.to_string(),
            });
        }
        // Upsert: re-adding the same edge replaces its properties.
        inner.edges.insert(
            EdgeKey {
                src_label: src_label.to_string(),
                src_id: src_id.to_string(),
                dst_label: dst_label.to_string(),
                dst_id: dst_id.to_string(),
                edge_type: edge_type.to_string(),
            },
            props,
        );
        Ok(())
    }

    async fn delete_edge(
        &self,
        src_label: &str,
        src_id: &str,
        dst_label: &str,
        dst_id: &str,
        edge_type: &str,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        inner.edges.remove(&EdgeKey {
            src_label: src_label.to_string(),
            src_id: src_id.to_string(),
            dst_label: dst_label.to_string(),
            dst_id: dst_id.to_string(),
            edge_type: edge_type.to_string(),
        });
        Ok(())
    }

    async fn get_edges(
        &self,
        src_label: &str,
        src_id: &str,
        edge_type: &str,
    ) -> Result<Vec<(String, String)>, GraphError> {
        let inner = self.inner.lock().await;
        inner.check_open()?;
        let mut out = Vec::new();
        for edge in inner.edges.keys() {
            if edge.src_label == src_label && edge.src_id == src_id && edge.edge_type == edge_type {
                out.push((edge.dst_label.clone(), edge.dst_id.clone()));
            }
        }
        Ok(out)
    }

    async fn create_unique_constraint(
        &self,
        label: &str,
        property: &str,
    ) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let entry = (label.to_string(), property.to_string());
        if !inner.unique_constraints.contains(&entry) {
            inner.unique_constraints.push(entry);
        }
        Ok(())
    }

    async fn create_index(&self, label: &str, property: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.check_open()?;
        let entry = (label.to_string(), property.to_string());
        if !inner.indexes.contains(&entry) {
            inner.indexes.push(entry);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), PropertyValue::Str(v.to_string())))
            .collect()
    }

    #[tokio::test]
    async fn test_add_and_get_node() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("User", "u1", props(&[("id", "u1"), ("status", "active")]))
            .await
            .unwrap();

        let node = graph.get_node("User", "u1").await.unwrap().unwrap();
        assert_eq!(node.get("status").unwrap().as_str(), Some("active"));
        assert!(graph.get_node("User", "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_node_rejected() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("User", "u1", props(&[("id", "u1")]))
            .await
            .unwrap();
        let err = graph
            .add_node("User", "u1", props(&[("id", "u1")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[tokio::test]
    async fn test_update_is_partial_merge() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("User", "u1", props(&[("id", "u1"), ("status", "active")]))
            .await
            .unwrap();
        graph
            .update_node("User", "u1", props(&[("status", "inactive")]))
            .await
            .unwrap();

        let node = graph.get_node("User", "u1").await.unwrap().unwrap();
        assert_eq!(node.get("status").unwrap().as_str(), Some("inactive"));
        assert_eq!(node.get("id").unwrap().as_str(), Some("u1"));
    }

    #[tokio::test]
    async fn test_query_nodes_equality_filters() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("Agent", "a1", props(&[("id", "a1"), ("status", "online")]))
            .await
            .unwrap();
        graph
            .add_node("Agent", "a2", props(&[("id", "a2"), ("status", "offline")]))
            .await
            .unwrap();

        let filter = props(&[("status", "online")]);
        let online = graph.query_nodes("Agent", &filter).await.unwrap();
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].get("id").unwrap().as_str(), Some("a1"));

        let all = graph.query_nodes("Agent", &Properties::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_list_property_rejected() {
        let graph = InMemoryGraph::new();
        let mut bad = Properties::new();
        bad.insert("tags".to_string(), PropertyValue::StrList(vec![]));
        let err = graph.add_node("Agent", "a1", bad).await.unwrap_err();
        assert!(matches!(err, GraphError::ConstraintViolation(_)));
    }

    #[tokio::test]
    async fn test_edge_upsert_and_traversal() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("Agent", "a1", props(&[("id", "a1")]))
            .await
            .unwrap();
        graph
            .add_node("Capability", "c1", props(&[("id", "c1")]))
            .await
            .unwrap();

        for _ in 0..3 {
            graph
                .add_edge("Agent", "a1", "Capability", "c1", "HAS_CAPABILITY", Properties::new())
                .await
                .unwrap();
        }
        let edges = graph.get_edges("Agent", "a1", "HAS_CAPABILITY").await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0], ("Capability".to_string(), "c1".to_string()));
    }

    #[tokio::test]
    async fn test_delete_node_drops_edges() {
        let graph = InMemoryGraph::new();
        graph
            .add_node("Agent", "a1", props(&[("id", "a1")]))
            .await
            .unwrap();
        graph
            .add_node("Capability", "c1", props(&[("id", "c1")]))
            .await
            .unwrap();
        graph
            .add_edge("Agent", "a1", "Capability", "c1", "HAS_CAPABILITY", Properties::new())
            .await
            .unwrap();

        graph.delete_node("Capability", "c1").await.unwrap();
        let edges = graph.get_edges("Agent", "a1", "HAS_CAPABILITY").await.unwrap();
        assert!(edges.is_empty());
    }

    #[tokio::test]
    async fn test_unique_constraint_on_property() {
        let graph = InMemoryGraph::new();
        graph.create_unique_constraint("User", "email").await.unwrap();
        graph
            .add_node("User", "u1", props(&[("email", "a@b.c")]))
            .await
            .unwrap();
        let err = graph
            .add_node("User", "u2", props(&[("email", "a@b.c")]))
            .await
            .unwrap_err();
        assert!(matches!(err, GraphError::DuplicateNode { .. }));
    }

    #[tokio::test]
    async fn test_closed_adapter_rejects_operations() {
        let graph = InMemoryGraph::new();
        graph.close().await.unwrap();
        let err = graph.get_node("User", "u1").await.unwrap_err();
        assert!(matches!(err, GraphError::Closed));
    }
}
