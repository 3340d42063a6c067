//! Job state machine and externally visible status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a job
///
/// `Initializing → Running → {Converged, Exhausted, Canceled, Failed}`.
/// `Converged` and `Exhausted` are the two flavors of "done".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Accumulators are being cleared and init programs run
    Initializing,
    /// Supersteps are executing
    Running,
    /// The active set became empty
    Converged,
    /// `maxGSS` was reached with vertices still active
    Exhausted,
    /// Cancellation was observed at a barrier
    Canceled,
    /// A program, accumulator or routing error aborted the job
    Failed,
}

impl JobState {
    /// No further transitions happen
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Initializing | JobState::Running)
    }

    /// Finished successfully; results are available
    pub fn is_done(&self) -> bool {
        matches!(self, JobState::Converged | JobState::Exhausted)
    }

    /// Coarse state: `running`, `done`, `canceled` or `failed`
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Initializing | JobState::Running => "running",
            JobState::Converged | JobState::Exhausted => "done",
            JobState::Canceled => "canceled",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Initializing => "initializing",
            JobState::Running => "running",
            JobState::Converged => "converged",
            JobState::Exhausted => "exhausted",
            JobState::Canceled => "canceled",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Snapshot of a job's progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: JobState,
    /// Name of the phase being executed
    pub phase: Option<String>,
    /// Last fully completed barrier
    pub superstep: u64,
    pub vertex_count: usize,
    pub edge_count: usize,
    /// Vertices active for the next superstep
    pub active_vertices: usize,
    /// Messages routed so far, init barriers included
    pub messages_sent: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Diagnostic of a failed job
    pub error: Option<String>,
}

impl JobStatus {
    /// Status of a job that was just submitted
    pub fn new(job_id: impl Into<String>, vertex_count: usize, edge_count: usize) -> Self {
        Self {
            job_id: job_id.into(),
            state: JobState::Initializing,
            phase: None,
            superstep: 0,
            vertex_count,
            edge_count,
            active_vertices: 0,
            messages_sent: 0,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
