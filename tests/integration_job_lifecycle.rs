//! Integration Tests for the job lifecycle
//!
//! These tests exercise the engine's external surface:
//! - Cancellation (before the first barrier and mid-run)
//! - Failure on program errors and unknown message targets
//! - Results access rules (`JobNotFinished`, `JobNotFound`)
//! - Validation at submission
//! - The activation policy for unchanged values
//! - Result write-back through a sink

use std::sync::Arc;

use serde_json::json;

use air_pregel::pregel::{
    JobId, JobState, MemoryResultSink, PregelConfig, PregelEngine, PregelError, ProgramSpec,
    ResultSink,
};
use air_pregel::Graph;

// =============================================================================
// Helpers
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn line(n: usize) -> Graph {
    let mut graph = Graph::new();
    for i in 0..n {
        graph.add_vertex(format!("v{}", i));
    }
    for i in 1..n {
        graph.add_edge(format!("v{}", i - 1), format!("v{}", i));
    }
    graph
}

fn cycle(ids: &[&str]) -> Graph {
    let mut graph = Graph::new();
    for id in ids {
        graph.add_vertex(*id);
    }
    for (i, id) in ids.iter().enumerate() {
        graph.add_edge(*id, ids[(i + 1) % ids.len()]);
    }
    graph
}

fn hops(source: &str, max_gss: u64, update: serde_json::Value) -> ProgramSpec {
    ProgramSpec::from_value(json!({
        "resultField": "hops",
        "maxGSS": max_gss,
        "vertexAccumulators": {"distance": {"accumulatorType": "min", "valueType": "int"}},
        "phases": [{
            "name": "main",
            "initProgram": ["if", [["eq?", ["this-vertex-id"], source], ["accum-set!", "distance", 0]]],
            "updateProgram": update
        }]
    }))
    .expect("valid program")
}

fn propagate(source: &str, max_gss: u64) -> ProgramSpec {
    hops(
        source,
        max_gss,
        json!(["send-to-all-neighbours", "distance", ["+", ["accum-ref", "distance"], 1]]),
    )
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test(flavor = "current_thread")]
async fn test_cancel_before_first_barrier() {
    init_tracing();
    // The coordinator task cannot run before this task yields
    let engine = PregelEngine::default();
    let id = engine
        .submit(&propagate("v0", 100), Arc::new(line(50)))
        .await
        .unwrap();
    engine.cancel(&id).await.unwrap();
    engine.cancel(&id).await.unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Canceled);
    assert_eq!(status.superstep, 0);
    assert!(status.finished_at.is_some());

    let err = engine.results(&id).await.unwrap_err();
    assert!(matches!(err, PregelError::JobNotFinished(JobState::Canceled)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_mid_run_stops_at_barrier() {
    init_tracing();
    let engine = PregelEngine::new(PregelConfig::default().with_workers(4));
    let id = engine
        .submit(&propagate("v0", 10_000), Arc::new(line(2_000)))
        .await
        .unwrap();

    let handle = engine.job(&id).await.unwrap();
    let mut updates = handle.subscribe();
    updates
        .wait_for(|status| status.superstep >= 2 || status.is_terminal())
        .await
        .unwrap();
    engine.cancel(&id).await.unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Canceled);
    assert!(status.superstep >= 2);
    assert!(status.superstep < 2_000);
    assert!(status.error.is_none());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_program_error_fails_job() {
    let sink = Arc::new(MemoryResultSink::new());
    let engine = PregelEngine::default().with_sink(sink.clone() as Arc<dyn ResultSink>);
    let update = json!(["if",
        [["eq?", ["this-vertex-id"], "v2"], ["/", ["accum-ref", "distance"], 0]],
        [true, ["send-to-all-neighbours", "distance", ["+", ["accum-ref", "distance"], 1]]]]);
    let id = engine.submit(&hops("v0", 10, update), Arc::new(line(5))).await.unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    let error = status.error.expect("failed job carries a diagnostic");
    assert!(error.contains("vertex v2"), "{}", error);
    assert!(error.contains("'/'"), "{}", error);

    // No partial results, no write-back
    assert!(matches!(
        engine.result(&id, &"v1".into()).await,
        Err(PregelError::JobNotFinished(JobState::Failed))
    ));
    assert!(sink.jobs().await.is_empty());
}

#[tokio::test]
async fn test_message_to_unknown_vertex_fails_job() {
    let update = json!(["send-to-accum", "ghost", "distance", 1]);
    let engine = PregelEngine::default();
    let id = engine.submit(&hops("v0", 10, update), Arc::new(line(3))).await.unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("unknown vertex ghost"));
}

#[tokio::test]
async fn test_accumulator_type_mismatch_fails_job() {
    let update = json!(["accum-set!", "distance", "far"]);
    let engine = PregelEngine::default();
    let id = engine.submit(&hops("v0", 10, update), Arc::new(line(2))).await.unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Failed);
    assert!(status.error.unwrap().contains("expects int"));
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_undeclared_accumulator_rejected() {
    let update = json!(["send-to-all-neighbours", "rank", 1]);
    let engine = PregelEngine::default();
    let err = engine
        .submit(&hops("v0", 10, update), Arc::new(line(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, PregelError::UnknownAccumulator(name) if name == "rank"));
}

#[tokio::test]
async fn test_unknown_instruction_rejected() {
    let engine = PregelEngine::default();
    let err = engine
        .submit(&hops("v0", 10, json!(["teleport"])), Arc::new(line(2)))
        .await
        .unwrap_err();
    assert!(matches!(err, PregelError::InvalidProgram { .. }));
}

#[tokio::test]
async fn test_unknown_job_id() {
    let engine = PregelEngine::default();
    let err = engine.wait(&JobId::from("nope")).await.unwrap_err();
    assert!(matches!(err, PregelError::JobNotFound(id) if id == "nope"));
}

#[tokio::test]
async fn test_submit_json() -> anyhow::Result<()> {
    let engine = PregelEngine::default();
    let program = serde_json::to_value(propagate("a", 10))?;
    let graph = json!({
        "vertices": [{"id": "a"}, {"id": "b", "attributes": {"label": "end"}}],
        "edges": [{"from": "a", "to": "b"}]
    });
    let id = engine.submit_json(program, graph).await?;
    engine.wait(&id).await?;
    assert_eq!(engine.result(&id, &"b".into()).await?, Some(json!({"distance": 1})));
    Ok(())
}

// =============================================================================
// Activation Policy
// =============================================================================

#[tokio::test]
async fn test_unchanged_values_do_not_reactivate_by_default() {
    let engine = PregelEngine::default();
    let id = engine
        .submit(&propagate("a", 10), Arc::new(cycle(&["a", "b"])))
        .await
        .unwrap();

    // b learns 1 in superstep 1, a gets 2 in superstep 2 which changes nothing
    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Converged);
    assert_eq!(status.superstep, 2);
}

#[tokio::test]
async fn test_reactivate_on_no_change_keeps_cycles_running() {
    let engine = PregelEngine::new(PregelConfig::default().with_reactivate_on_no_change(true));
    let id = engine
        .submit(&propagate("a", 10), Arc::new(cycle(&["a", "b"])))
        .await
        .unwrap();

    let status = engine.wait(&id).await.unwrap();
    assert_eq!(status.state, JobState::Exhausted);
    assert_eq!(status.superstep, 10);
    // Values are the same either way
    assert_eq!(
        engine.result(&id, &"b".into()).await.unwrap(),
        Some(json!({"distance": 1}))
    );
}

// =============================================================================
// Write-back
// =============================================================================

#[tokio::test]
async fn test_results_written_to_sink() {
    let sink = Arc::new(MemoryResultSink::new());
    let engine = PregelEngine::default().with_sink(sink.clone() as Arc<dyn ResultSink>);
    let id = engine
        .submit(&propagate("v0", 10), Arc::new(line(3)))
        .await
        .unwrap();
    engine.wait(&id).await.unwrap();

    assert_eq!(sink.jobs().await, vec![id.clone()]);
    let doc = sink.document(&"v2".into()).await.unwrap();
    assert_eq!(doc["hops"], json!({"distance": 2}));

    let listed = engine.list().await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].job_id, id.to_string());
    assert_eq!(listed[0].state.label(), "done");
}
