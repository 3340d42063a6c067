//! Superstep coordinator
//!
//! Drives one job from submission to a terminal state:
//!
//! ```text
//! for each phase:
//!     Init ──► barrier ──► [Compute(k+1) ──► barrier]* ──► next phase
//!                 │                             │
//!                 └── cancel? ───────────────── ┴──► Canceled
//! active set empty after last phase ──► Converged
//! superstep == maxGSS, still active ──► Exhausted
//! ```
//!
//! A barrier collects every worker's outgoing messages, routes them to the
//! partitions owning their targets, waits until all of them are combined
//! and sums up the next active set. Nothing from superstep `k` becomes
//! visible before `k + 1`.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use super::config::PregelConfig;
use super::error::PregelError;
use super::job::JobHandle;
use super::message::Message;
use super::partition::PartitionMap;
use super::program::Program;
use super::sink::ResultSink;
use super::status::JobState;
use super::vertex::VertexId;
use super::worker::{PartitionWorker, Reply, StepReport, WorkerCommand};
use crate::graph::Graph;

/// Command buffer per worker; the coordinator never has more than one
/// command in flight per worker
const WORKER_CHANNEL_CAPACITY: usize = 4;

/// Outcome of one barrier
struct Barrier {
    active: usize,
    routed: usize,
}

pub(crate) struct Coordinator {
    job: JobHandle,
    program: Arc<Program>,
    partitions: PartitionMap,
    workers: Vec<mpsc::Sender<WorkerCommand>>,
    tasks: Vec<JoinHandle<()>>,
    config: PregelConfig,
    sink: Option<Arc<dyn ResultSink>>,
}

impl Coordinator {
    /// Partition the graph and spawn one worker task per partition
    pub fn new(
        job: JobHandle,
        program: Arc<Program>,
        graph: &Graph,
        config: PregelConfig,
        sink: Option<Arc<dyn ResultSink>>,
    ) -> Self {
        let (partitions, chunks) = PartitionMap::build(graph, config.workers);
        let mut workers = Vec::with_capacity(chunks.len());
        let mut tasks = Vec::with_capacity(chunks.len());

        for (index, slots) in chunks.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
            let worker = PartitionWorker::new(
                index,
                slots,
                Arc::clone(&program),
                config.parallelism,
                config.reactivate_on_no_change,
            );
            tasks.push(tokio::spawn(worker.run(rx)));
            workers.push(tx);
        }

        Self {
            job,
            program,
            partitions,
            workers,
            tasks,
            config,
            sink,
        }
    }

    /// Run the job to a terminal state and publish it on the handle
    ///
    /// Enforces the configured `job_timeout` over the whole run, result
    /// write-back included.
    pub async fn run(mut self) {
        let job_timeout = self.config.job_timeout;
        tracing::info!(
            job_id = %self.job.id(),
            vertices = self.job.status().vertex_count,
            partitions = self.partitions.partitions(),
            phases = self.program.phases.len(),
            max_gss = self.program.max_gss,
            "Job started"
        );

        let outcome = match timeout(job_timeout, self.drive()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(PregelError::JobTimeout(job_timeout)),
        };

        match outcome {
            Ok((state, Some(results))) => {
                tracing::info!(
                    job_id = %self.job.id(),
                    state = %state,
                    superstep = self.job.status().superstep,
                    "Job finished"
                );
                self.job.complete(state, results);
            }
            Ok((state, None)) => {
                tracing::warn!(
                    job_id = %self.job.id(),
                    superstep = self.job.status().superstep,
                    "Job canceled"
                );
                self.job.finish(state, None);
            }
            Err(e) => {
                tracing::warn!(job_id = %self.job.id(), error = %e, "Job failed");
                self.job.fail(&e);
            }
        }

        self.shutdown();
    }

    /// Phases, supersteps, finalization and write-back
    async fn drive(&mut self) -> Result<(JobState, Option<BTreeMap<VertexId, Value>>), PregelError> {
        let state = self.supersteps().await?;
        if !state.is_done() {
            return Ok((state, None));
        }

        let mut results = BTreeMap::new();
        for documents in self.broadcast(|_, reply| WorkerCommand::Finalize { reply }).await? {
            results.extend(documents);
        }

        if let Some(sink) = &self.sink {
            sink.write(self.job.id(), &self.program.result_field, &results)
                .await
                .map_err(|e| match e {
                    PregelError::Sink(message) => PregelError::Sink(message),
                    other => PregelError::Sink(other.to_string()),
                })?;
        }
        Ok((state, Some(results)))
    }

    async fn supersteps(&mut self) -> Result<JobState, PregelError> {
        let program = Arc::clone(&self.program);
        let mut superstep: u64 = 0;

        for (phase, current) in program.phases.iter().enumerate() {
            self.job.update(|status| status.phase = Some(current.name.clone()));

            let reports = self
                .broadcast(|_, reply| WorkerCommand::Init {
                    phase,
                    superstep,
                    reply,
                })
                .await?;
            let mut barrier = self.barrier(reports, superstep, &current.name).await?;
            self.publish(JobState::Running, superstep, &barrier);
            if self.job.is_cancel_requested() {
                return Ok(JobState::Canceled);
            }

            while barrier.active > 0 {
                if superstep >= program.max_gss {
                    return Ok(JobState::Exhausted);
                }
                let next = superstep + 1;
                let reports = self
                    .broadcast(|_, reply| WorkerCommand::Compute {
                        phase,
                        superstep: next,
                        reply,
                    })
                    .await?;
                barrier = self.barrier(reports, next, &current.name).await?;
                superstep = next;
                self.publish(JobState::Running, superstep, &barrier);
                if self.job.is_cancel_requested() {
                    return Ok(JobState::Canceled);
                }
            }
        }

        Ok(JobState::Converged)
    }

    /// Route messages, combine them into their targets and count the next active set
    async fn barrier(
        &mut self,
        reports: Vec<StepReport>,
        superstep: u64,
        phase: &str,
    ) -> Result<Barrier, PregelError> {
        let evaluated: usize = reports.iter().map(|report| report.evaluated).sum();
        let messages: Vec<Message> = reports.into_iter().flat_map(|report| report.messages).collect();
        let routed = messages.len();

        let mut inboxes = self.partitions.route(messages)?;
        let active: usize = self
            .broadcast(|index, reply| WorkerCommand::Deliver {
                messages: std::mem::take(&mut inboxes[index]),
                reply,
            })
            .await?
            .into_iter()
            .sum();

        if self.config.tracing_enabled {
            tracing::debug!(
                job_id = %self.job.id(),
                phase,
                superstep,
                evaluated,
                messages = routed,
                active,
                "Barrier complete"
            );
        }
        Ok(Barrier { active, routed })
    }

    fn publish(&self, state: JobState, superstep: u64, barrier: &Barrier) {
        self.job.update(|status| {
            status.state = state;
            status.superstep = superstep;
            status.active_vertices = barrier.active;
            status.messages_sent += barrier.routed as u64;
        });
    }

    /// Send one command to every worker, then wait for their replies
    ///
    /// Workers process their command concurrently; replies come back in
    /// partition order. The first failed reply is returned without waiting
    /// for the other partitions.
    async fn broadcast<T>(
        &self,
        mut command: impl FnMut(usize, Reply<T>) -> WorkerCommand,
    ) -> Result<Vec<T>, PregelError> {
        let mut pending = Vec::with_capacity(self.workers.len());
        for (index, worker) in self.workers.iter().enumerate() {
            let (reply, response) = oneshot::channel();
            worker
                .send(command(index, reply))
                .await
                .map_err(|_| PregelError::worker(format!("partition {} is gone", index)))?;
            pending.push(response);
        }

        let replies = pending.into_iter().enumerate().map(|(index, response)| async move {
            match response.await {
                Ok(result) => result,
                Err(_) => Err(PregelError::worker(format!(
                    "partition {} dropped its reply",
                    index
                ))),
            }
        });
        futures::future::try_join_all(replies).await
    }

    /// Stop the workers; dropping a worker mid-step interrupts its vertex tasks
    fn shutdown(&mut self) {
        self.workers.clear();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pregel::accumulator::AccumulatorRegistry;
    use crate::pregel::job::JobId;
    use crate::pregel::program::ProgramSpec;
    use crate::pregel::sink::MemoryResultSink;
    use serde_json::json;
    use std::time::Duration;

    fn line(ids: &[&str]) -> Graph {
        let mut graph = Graph::new();
        for id in ids {
            graph.add_vertex(*id);
        }
        for pair in ids.windows(2) {
            graph.add_edge(pair[0], pair[1]);
        }
        graph
    }

    fn sssp(max_gss: u64) -> Arc<Program> {
        let spec = ProgramSpec::from_value(json!({
            "resultField": "sssp",
            "maxGSS": max_gss,
            "vertexAccumulators": {"distance": {"accumulatorType": "min", "valueType": "int"}},
            "phases": [{
                "name": "main",
                "initProgram": ["if", [["eq?", ["this-vertex-id"], "A"], ["accum-set!", "distance", 0]]],
                "updateProgram": ["send-to-all-neighbours", "distance", ["+", ["accum-ref", "distance"], 1]]
            }]
        }))
        .unwrap();
        Arc::new(Program::compile(&spec, &AccumulatorRegistry::with_builtins()).unwrap())
    }

    async fn run(graph: &Graph, program: Arc<Program>, config: PregelConfig) -> JobHandle {
        let job = JobHandle::new(JobId::generate(), graph.vertex_count(), graph.edge_count());
        Coordinator::new(job.clone(), program, graph, config, None).run().await;
        job
    }

    #[tokio::test]
    async fn test_line_graph_converges() {
        let graph = line(&["A", "B", "C"]);
        let job = run(&graph, sssp(10), PregelConfig::default().with_workers(2)).await;

        let status = job.status();
        assert_eq!(status.state, JobState::Converged);
        assert_eq!(status.superstep, 3);
        assert_eq!(status.messages_sent, 2);
        assert_eq!(status.active_vertices, 0);
        assert_eq!(job.result(&"C".into()).unwrap(), Some(json!({"distance": 2})));
    }

    #[tokio::test]
    async fn test_step_budget_exhausted() {
        let graph = line(&["A", "B", "C"]);
        let job = run(&graph, sssp(2), PregelConfig::default()).await;

        let status = job.status();
        assert_eq!(status.state, JobState::Exhausted);
        assert_eq!(status.superstep, 2);
        assert_eq!(status.active_vertices, 1);
        // Results are available after exhaustion too
        assert_eq!(job.result(&"C".into()).unwrap(), Some(json!({"distance": 2})));
    }

    #[tokio::test]
    async fn test_sink_receives_results() {
        let graph = line(&["A", "B"]);
        let sink = Arc::new(MemoryResultSink::new());
        let job = JobHandle::new(JobId::generate(), 2, 1);
        Coordinator::new(
            job.clone(),
            sssp(10),
            &graph,
            PregelConfig::default(),
            Some(sink.clone() as Arc<dyn ResultSink>),
        )
        .run()
        .await;

        assert_eq!(job.status().state, JobState::Converged);
        let doc = sink.document(&"B".into()).await.unwrap();
        assert_eq!(doc["sssp"], json!({"distance": 1}));
    }

    #[tokio::test]
    async fn test_timeout_fails_job() {
        let mut graph = Graph::new();
        graph.add_vertex("A").add_edge("A", "A");
        let spec = ProgramSpec::from_value(json!({
            "resultField": "spin",
            "maxGSS": 1_000_000_000u64,
            "vertexAccumulators": {"n": {"accumulatorType": "sum", "valueType": "int"}},
            "phases": [{
                "name": "main",
                "initProgram": ["accum-set!", "n", 1],
                "updateProgram": ["send-to-accum", ["this-vertex-id"], "n", 1]
            }]
        }))
        .unwrap();
        let program = Arc::new(Program::compile(&spec, &AccumulatorRegistry::with_builtins()).unwrap());

        let config = PregelConfig::default().with_job_timeout(Duration::from_millis(50));
        let job = run(&graph, program, config).await;

        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("timeout"));
    }

    fn spin(size: usize) -> Value {
        let items: Vec<usize> = (0..size).collect();
        json!(["for-each", [["i", ["quote", items]], ["j", ["quote", items]], ["k", ["quote", items]]],
            ["+", ["var-ref", "i"], ["var-ref", "k"]]])
    }

    fn spinning(init: Value) -> Arc<Program> {
        let spec = ProgramSpec::from_value(json!({
            "resultField": "spin",
            "maxGSS": 10,
            "vertexAccumulators": {"n": {"accumulatorType": "sum", "valueType": "int"}},
            "phases": [{"name": "main", "initProgram": init, "updateProgram": null}]
        }))
        .unwrap();
        Arc::new(Program::compile(&spec, &AccumulatorRegistry::with_builtins()).unwrap())
    }

    async fn settle(program: &Arc<Program>) -> usize {
        for _ in 0..500 {
            if Arc::strong_count(program) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        Arc::strong_count(program)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 3)]
    async fn test_failure_does_not_wait_for_other_partitions() {
        let mut graph = Graph::new();
        graph.add_vertex("a").add_vertex("b");
        let program = spinning(json!(["if",
            [["eq?", ["this-vertex-id"], "a"], spin(1000)],
            [["eq?", ["this-vertex-id"], "b"], ["/", 1, 0]]]));

        let config = PregelConfig::default().with_workers(2).with_parallelism(1);
        let job = tokio::time::timeout(
            Duration::from_secs(10),
            run(&graph, Arc::clone(&program), config),
        )
        .await
        .expect("failure reported while partition 0 is still running");

        let status = job.status();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.unwrap().contains("vertex b"));
        assert_eq!(settle(&program).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_timeout_stops_vertex_tasks() {
        let mut graph = Graph::new();
        graph.add_vertex("a");
        let program = spinning(spin(1000));

        let config = PregelConfig::default().with_job_timeout(Duration::from_millis(100));
        let job = run(&graph, Arc::clone(&program), config).await;

        assert_eq!(job.status().state, JobState::Failed);
        // Workers and their vertex tasks released the program
        assert_eq!(settle(&program).await, 1);
    }
}
