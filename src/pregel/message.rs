//! Message types for vertex communication
//!
//! Messages produced in superstep `k` are combined into their target
//! accumulator at the barrier closing `k` and are never seen before `k + 1`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::vertex::VertexId;

/// A pending write into another vertex's accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Vertex whose accumulator receives the value
    pub target: VertexId,
    /// Accumulator name on the target vertex
    pub accumulator: String,
    /// Value handed to the accumulator's combine
    pub value: Value,
    /// Vertex that emitted the message
    pub sender: VertexId,
}

impl Message {
    /// Create a new message
    pub fn new(
        sender: impl Into<VertexId>,
        target: impl Into<VertexId>,
        accumulator: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            target: target.into(),
            accumulator: accumulator.into(),
            value,
            sender: sender.into(),
        }
    }
}
