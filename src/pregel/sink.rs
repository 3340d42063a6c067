//! Result write-back
//!
//! When a job finishes successfully its finalized per-vertex documents are
//! handed to a [`ResultSink`], stored under the program's `resultField`.
//! Failed and canceled jobs never reach the sink.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::error::PregelError;
use super::job::JobId;
use super::vertex::VertexId;

/// Destination for finalized job results
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Store `results[vertex]` as attribute `result_field` of each vertex
    ///
    /// Implementations should write all vertices or none.
    async fn write(
        &self,
        job_id: &JobId,
        result_field: &str,
        results: &BTreeMap<VertexId, Value>,
    ) -> Result<(), PregelError>;
}

/// In-memory sink, mainly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryResultSink {
    documents: tokio::sync::RwLock<BTreeMap<VertexId, Map<String, Value>>>,
    jobs: tokio::sync::RwLock<Vec<JobId>>,
}

impl MemoryResultSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes written for a vertex so far
    pub async fn document(&self, vertex: &VertexId) -> Option<Map<String, Value>> {
        self.documents.read().await.get(vertex).cloned()
    }

    /// Jobs that wrote through this sink, in order
    pub async fn jobs(&self) -> Vec<JobId> {
        self.jobs.read().await.clone()
    }
}

#[async_trait]
impl ResultSink for MemoryResultSink {
    async fn write(
        &self,
        job_id: &JobId,
        result_field: &str,
        results: &BTreeMap<VertexId, Value>,
    ) -> Result<(), PregelError> {
        let mut documents = self.documents.write().await;
        for (vertex, result) in results {
            documents
                .entry(vertex.clone())
                .or_default()
                .insert(result_field.to_string(), result.clone());
        }
        self.jobs.write().await.push(job_id.clone());
        Ok(())
    }
}
