//! Input graph
//!
//! Vertices carry a unique string id and an attribute document; edges are
//! directed and carry an attribute map. The graph is immutable once a job
//! has been submitted against it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

use crate::pregel::vertex::VertexId;

/// Invalid graph input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Duplicate vertex id: {0}")]
    DuplicateVertex(VertexId),

    #[error("Edge {from} -> {to} references unknown vertex {missing}")]
    UnknownVertex {
        from: VertexId,
        to: VertexId,
        missing: VertexId,
    },
}

/// A vertex and its attribute document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord {
    pub id: VertexId,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// A directed edge and its attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub from: VertexId,
    pub to: VertexId,
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

/// Directed graph with attribute documents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub vertices: Vec<VertexRecord>,
    #[serde(default)]
    pub edges: Vec<EdgeRecord>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vertex without attributes
    pub fn add_vertex(&mut self, id: impl Into<VertexId>) -> &mut Self {
        self.add_vertex_with(id, Map::new())
    }

    /// Add a vertex with an attribute document
    pub fn add_vertex_with(&mut self, id: impl Into<VertexId>, attributes: Map<String, Value>) -> &mut Self {
        self.vertices.push(VertexRecord {
            id: id.into(),
            attributes,
        });
        self
    }

    /// Add an edge without attributes
    pub fn add_edge(&mut self, from: impl Into<VertexId>, to: impl Into<VertexId>) -> &mut Self {
        self.add_edge_with(from, to, Map::new())
    }

    /// Add an edge with attributes (e.g. `weight`)
    pub fn add_edge_with(
        &mut self,
        from: impl Into<VertexId>,
        to: impl Into<VertexId>,
        attributes: Map<String, Value>,
    ) -> &mut Self {
        self.edges.push(EdgeRecord {
            from: from.into(),
            to: to.into(),
            attributes,
        });
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Reject duplicate vertex ids and edges with a missing endpoint
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut seen = HashSet::with_capacity(self.vertices.len());
        for vertex in &self.vertices {
            if !seen.insert(&vertex.id) {
                return Err(GraphError::DuplicateVertex(vertex.id.clone()));
            }
        }
        for edge in &self.edges {
            for endpoint in [&edge.from, &edge.to] {
                if !seen.contains(endpoint) {
                    return Err(GraphError::UnknownVertex {
                        from: edge.from.clone(),
                        to: edge.to.clone(),
                        missing: endpoint.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Outbound edges grouped by source vertex, in insertion order
    pub fn outbound(&self) -> HashMap<&VertexId, Vec<&EdgeRecord>> {
        let mut outbound: HashMap<&VertexId, Vec<&EdgeRecord>> = HashMap::new();
        for edge in &self.edges {
            outbound.entry(&edge.from).or_default().push(edge);
        }
        outbound
    }

    /// Parse `{"vertices": [...], "edges": [...]}` and validate it
    pub fn from_json(value: Value) -> Result<Self, crate::pregel::PregelError> {
        let graph: Graph = serde_json::from_value(value)?;
        graph.validate()?;
        Ok(graph)
    }
}
