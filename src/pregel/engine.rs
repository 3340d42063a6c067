//! Job registry
//!
//! [`PregelEngine`] validates submissions, spawns one coordinator task per
//! job and keeps the job handles addressable by [`JobId`].

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::accumulator::{AccumulatorRegistry, BoxedAccumulator};
use super::config::PregelConfig;
use super::coordinator::Coordinator;
use super::error::PregelError;
use super::job::{JobHandle, JobId};
use super::program::{Program, ProgramSpec};
use super::sink::ResultSink;
use super::status::JobStatus;
use super::vertex::VertexId;
use crate::graph::Graph;

/// Runs Pregel jobs and tracks them by id
pub struct PregelEngine {
    config: PregelConfig,
    registry: AccumulatorRegistry,
    sink: Option<Arc<dyn ResultSink>>,
    jobs: RwLock<HashMap<JobId, JobHandle>>,
}

impl Default for PregelEngine {
    fn default() -> Self {
        Self::new(PregelConfig::default())
    }
}

impl PregelEngine {
    /// Create an engine with the built-in accumulators
    pub fn new(config: PregelConfig) -> Self {
        Self {
            config,
            registry: AccumulatorRegistry::with_builtins(),
            sink: None,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Write finalized results of successful jobs to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Make an accumulator type available to every future job
    pub fn with_accumulator(mut self, name: impl Into<String>, accumulator: BoxedAccumulator) -> Self {
        self.registry.register(name, accumulator);
        self
    }

    pub fn config(&self) -> &PregelConfig {
        &self.config
    }

    pub fn registry(&self) -> &AccumulatorRegistry {
        &self.registry
    }

    /// Validate a program against a graph and start it
    ///
    /// Validation errors (`UnknownAccumulator`, `InvalidProgram`, `Graph`)
    /// are returned here and no job is created. Must be called within a
    /// tokio runtime.
    pub async fn submit(&self, spec: &ProgramSpec, graph: Arc<Graph>) -> Result<JobId, PregelError> {
        graph.validate()?;
        let program = Arc::new(Program::compile(spec, &self.registry)?);

        let id = JobId::generate();
        let handle = JobHandle::new(id.clone(), graph.vertex_count(), graph.edge_count());
        self.jobs.write().await.insert(id.clone(), handle.clone());

        let coordinator = Coordinator::new(
            handle,
            program,
            &graph,
            self.config.clone(),
            self.sink.clone(),
        );
        tokio::spawn(coordinator.run());

        tracing::debug!(job_id = %id, "Job submitted");
        Ok(id)
    }

    /// Parse both submission objects from JSON, then [`submit`](Self::submit)
    pub async fn submit_json(&self, program: Value, graph: Value) -> Result<JobId, PregelError> {
        let spec = ProgramSpec::from_value(program)?;
        let graph = Graph::from_json(graph)?;
        self.submit(&spec, Arc::new(graph)).await
    }

    /// Handle of a job
    pub async fn job(&self, id: &JobId) -> Result<JobHandle, PregelError> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| PregelError::JobNotFound(id.to_string()))
    }

    pub async fn status(&self, id: &JobId) -> Result<JobStatus, PregelError> {
        Ok(self.job(id).await?.status())
    }

    /// Request cancellation of a job
    pub async fn cancel(&self, id: &JobId) -> Result<(), PregelError> {
        self.job(id).await?.cancel();
        Ok(())
    }

    /// Finalized document of one vertex
    pub async fn result(&self, id: &JobId, vertex: &VertexId) -> Result<Option<Value>, PregelError> {
        self.job(id).await?.result(vertex)
    }

    /// Finalized documents of all vertices
    pub async fn results(&self, id: &JobId) -> Result<BTreeMap<VertexId, Value>, PregelError> {
        let handle = self.job(id).await?;
        let results = handle.results()?.clone();
        Ok(results)
    }

    /// Wait for a job to reach a terminal state
    pub async fn wait(&self, id: &JobId) -> Result<JobStatus, PregelError> {
        Ok(self.job(id).await?.wait().await)
    }

    /// Forget a job; a running job is canceled first
    pub async fn remove(&self, id: &JobId) -> Result<JobStatus, PregelError> {
        let handle = self
            .jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| PregelError::JobNotFound(id.to_string()))?;
        handle.cancel();
        Ok(handle.status())
    }

    /// Status of every known job
    pub async fn list(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<_> = self
            .jobs
            .read()
            .await
            .values()
            .map(JobHandle::status)
            .collect();
        statuses.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.job_id.cmp(&b.job_id)));
        statuses
    }
}

impl std::fmt::Debug for PregelEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PregelEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::accumulator::FnAccumulator;
    use crate::pregel::status::JobState;
    use serde_json::json;

    static_assertions::assert_impl_all!(PregelEngine: Send, Sync);
    static_assertions::assert_impl_all!(JobHandle: Send, Sync, Clone);

    fn pair() -> Arc<Graph> {
        let mut graph = Graph::new();
        graph.add_vertex("a").add_vertex("b").add_edge("a", "b");
        Arc::new(graph)
    }

    fn propagate(accumulator_type: &str) -> ProgramSpec {
        ProgramSpec::from_value(json!({
            "resultField": "out",
            "maxGSS": 5,
            "vertexAccumulators": {"v": {"accumulatorType": accumulator_type}},
            "phases": [{
                "name": "main",
                "initProgram": ["if", [["eq?", ["this-vertex-id"], "a"], ["accum-set!", "v", 2]]],
                "updateProgram": ["send-to-all-neighbours", "v", ["accum-ref", "v"]]
            }]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let engine = PregelEngine::new(PregelConfig::default().with_workers(2));
        let id = engine.submit(&propagate("max"), pair()).await.unwrap();

        let status = engine.wait(&id).await.unwrap();
        assert_eq!(status.state, JobState::Converged);
        assert_eq!(engine.result(&id, &"b".into()).await.unwrap(), Some(json!({"v": 2})));
        assert_eq!(engine.results(&id).await.unwrap().len(), 2);
        assert_eq!(engine.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_accumulator_type_rejected_at_submit() {
        let engine = PregelEngine::default();
        let err = engine.submit(&propagate("median"), pair()).await.unwrap_err();
        assert!(matches!(err, PregelError::UnknownAccumulator(name) if name == "median"));
        assert!(engine.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_engine_level_accumulator() {
        let product = FnAccumulator::new("product", json!(1), |current, incoming| {
            let lhs = current.as_i64().unwrap_or(1);
            let rhs = incoming.as_i64().unwrap_or(1);
            Ok(json!(lhs * rhs))
        });
        let engine = PregelEngine::default().with_accumulator("product", Arc::new(product));
        let id = engine.submit(&propagate("product"), pair()).await.unwrap();
        engine.wait(&id).await.unwrap();
        assert_eq!(engine.result(&id, &"b".into()).await.unwrap(), Some(json!({"v": 2})));
    }

    #[tokio::test]
    async fn test_unknown_job() {
        let engine = PregelEngine::default();
        let missing = JobId::from("missing");
        assert!(matches!(engine.status(&missing).await, Err(PregelError::JobNotFound(_))));
        assert!(matches!(engine.cancel(&missing).await, Err(PregelError::JobNotFound(_))));
        assert!(matches!(engine.remove(&missing).await, Err(PregelError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_forgets_job() {
        let engine = PregelEngine::default();
        let id = engine.submit(&propagate("max"), pair()).await.unwrap();
        engine.wait(&id).await.unwrap();
        engine.remove(&id).await.unwrap();
        assert!(matches!(engine.status(&id).await, Err(PregelError::JobNotFound(_))));
    }

    #[tokio::test]
    async fn test_submit_json_validates_graph() {
        let engine = PregelEngine::default();
        let program = serde_json::to_value(propagate("max")).unwrap();
        let err = engine
            .submit_json(program, json!({"vertices": [{"id": "a"}, {"id": "a"}]}))
            .await
            .unwrap_err();
        assert!(matches!(err, PregelError::Graph(_)));
    }
}
