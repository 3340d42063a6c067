//! Job handles
//!
//! A [`JobHandle`] is the caller's view of a running job: a `watch` channel
//! carrying the latest [`JobStatus`], a cancellation flag the coordinator
//! polls at every barrier, and the finalized results once the job is done.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::watch;

use super::error::PregelError;
use super::status::{JobState, JobStatus};
use super::vertex::VertexId;

/// Opaque job identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct JobShared {
    id: JobId,
    status: watch::Sender<JobStatus>,
    cancel: AtomicBool,
    results: OnceLock<BTreeMap<VertexId, Value>>,
}

/// Shared handle to a job; cheap to clone
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<JobShared>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, vertex_count: usize, edge_count: usize) -> Self {
        let (status, _) = watch::channel(JobStatus::new(id.as_str(), vertex_count, edge_count));
        Self {
            shared: Arc::new(JobShared {
                id,
                status,
                cancel: AtomicBool::new(false),
                results: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.shared.id
    }

    /// Latest status snapshot
    pub fn status(&self) -> JobStatus {
        self.shared.status.borrow().clone()
    }

    /// Receiver notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.shared.status.subscribe()
    }

    /// Request cancellation; observed at the next barrier
    ///
    /// Idempotent, and a no-op once the job reached a terminal state.
    pub fn cancel(&self) {
        if !self.shared.cancel.swap(true, Ordering::SeqCst) {
            tracing::info!(job_id = %self.shared.id, "Cancellation requested");
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.shared.cancel.load(Ordering::SeqCst)
    }

    /// Wait until the job reaches a terminal state
    pub async fn wait(&self) -> JobStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|status| status.is_terminal()).await {
            Ok(status) => status.clone(),
            // The sender lives in `self`, so the channel cannot close here
            Err(_) => self.status(),
        };
        status
    }

    /// Finalized document of one vertex
    ///
    /// `Ok(None)` for a vertex that is not part of the graph.
    pub fn result(&self, vertex: &VertexId) -> Result<Option<Value>, PregelError> {
        Ok(self.results()?.get(vertex).cloned())
    }

    /// Finalized documents of all vertices
    pub fn results(&self) -> Result<&BTreeMap<VertexId, Value>, PregelError> {
        let state = self.shared.status.borrow().state;
        match self.shared.results.get() {
            Some(results) if state.is_done() => Ok(results),
            _ => Err(PregelError::JobNotFinished(state)),
        }
    }

    /// Apply a change to the status and notify subscribers
    pub(crate) fn update(&self, change: impl FnOnce(&mut JobStatus)) {
        self.shared.status.send_modify(change);
    }

    /// Store results and move to a successful terminal state
    pub(crate) fn complete(&self, state: JobState, results: BTreeMap<VertexId, Value>) {
        // Results are set exactly once, before the state becomes visible
        let _ = self.shared.results.set(results);
        self.finish(state, None);
    }

    /// Move to `Failed` with a diagnostic
    pub(crate) fn fail(&self, error: &PregelError) {
        self.finish(JobState::Failed, Some(error.to_string()));
    }

    /// Move to a terminal state without results
    pub(crate) fn finish(&self, state: JobState, error: Option<String>) {
        self.update(|status| {
            status.state = state;
            status.error = error;
            status.finished_at = Some(chrono::Utc::now());
        });
    }
}

impl fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.status.borrow().state)
            .finish()
    }
}
