//! Vertex abstractions for the Pregel engine
//!
//! A vertex owns its accumulator values for the lifetime of a job. Only the
//! partition worker holding the vertex mutates them, and only between
//! barriers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::message::Message;

/// Accumulator name -> current value, owned by exactly one vertex
pub type AccumulatorMap = HashMap<String, Value>;

/// Unique identifier for a vertex in the graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(pub String);

impl VertexId {
    /// Create a new VertexId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VertexId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VertexId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for VertexId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Explicit activity vote cast by a program (`vote-active` / `vote-halt`)
///
/// Without a vote, activity follows the engine defaults: accumulator writes
/// during init, received messages at every barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexState {
    /// Vertex runs the update program in the next superstep
    Active,
    /// Vertex sleeps until a message reactivates it
    Halted,
}

impl VertexState {
    /// Check if the vertex is active
    pub fn is_active(&self) -> bool {
        matches!(self, VertexState::Active)
    }

    /// Check if the vertex is halted
    pub fn is_halted(&self) -> bool {
        matches!(self, VertexState::Halted)
    }
}

/// An outbound edge as seen from its source vertex
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEdge {
    /// Target vertex
    pub to: VertexId,
    /// Edge document exposed to programs (`_from`, `_to` and attributes)
    pub document: Value,
}

/// Worker-owned storage for one vertex
#[derive(Debug, Clone)]
pub(crate) struct VertexSlot {
    pub id: VertexId,
    pub document: Arc<Value>,
    pub edges: Arc<[OutboundEdge]>,
    pub accumulators: AccumulatorMap,
}

/// Everything one program evaluation produced for its vertex
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VertexOutcome {
    /// Messages emitted by `send-to-accum` and friends
    pub messages: Vec<Message>,
    /// Last activity vote, if any
    pub vote: Option<VertexState>,
    /// At least one `accum-set!` was evaluated
    pub wrote: bool,
    /// At least one `accum-set!` replaced the stored value with a different one
    pub changed: bool,
}

impl VertexOutcome {
    /// Record an accumulator write
    pub fn record_write(&mut self, changed: bool) {
        self.wrote = true;
        self.changed |= changed;
    }

    /// Whether an init evaluation places the vertex in the initial active set
    pub fn activates_after_init(&self, reactivate_on_no_change: bool) -> bool {
        match self.vote {
            Some(state) => state.is_active(),
            None if reactivate_on_no_change => self.wrote,
            None => self.changed,
        }
    }

    /// Whether an update evaluation keeps the vertex active without messages
    pub fn stays_active(&self) -> bool {
        matches!(self.vote, Some(VertexState::Active))
    }
}
