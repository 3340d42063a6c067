//! air-pregel: a Pregel/BSP engine for AIR graph programs
//!
//! Submit a program (accumulator declarations plus per-phase init and
//! update programs written as JSON s-expressions) together with a graph,
//! then follow the job through its status until it converges.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use air_pregel::{Graph, PregelConfig, PregelEngine, ProgramSpec};
//!
//! let engine = PregelEngine::new(PregelConfig::from_env()?);
//! let job = engine.submit(&ProgramSpec::from_value(program)?, Arc::new(graph)).await?;
//! let status = engine.wait(&job).await?;
//! let distance = engine.result(&job, &"C".into()).await?;
//! ```

pub mod graph;
pub mod pregel;

pub use graph::{EdgeRecord, Graph, GraphError, VertexRecord};
pub use pregel::{
    Accumulator, AccumulatorRegistry, JobHandle, JobId, JobState, JobStatus, MemoryResultSink,
    PregelConfig, PregelEngine, PregelError, ProgramSpec, ResultSink, ValueType, VertexId,
};
