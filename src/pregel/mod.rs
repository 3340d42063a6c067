//! Pregel engine for AIR programs
//!
//! Vertex-centric, bulk-synchronous graph computation. Key concepts:
//!
//! - **Accumulator**: per-vertex cell with an associative, commutative `combine`
//! - **AIR program**: s-expression AST run once per vertex (init) and per
//!   active vertex and superstep (update)
//! - **Superstep**: every partition evaluates its active vertices, then all of
//!   them meet at a global barrier
//! - **Message**: a value sent into another vertex's accumulator, combined at
//!   the barrier closing the superstep that produced it
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ PregelEngine (job registry)                                  │
//! │   submit ─► Program::compile ─► Coordinator task             │
//! │                                   │                          │
//! │            ┌──────────────────────┼──────────────────────┐   │
//! │            ▼                      ▼                      ▼   │
//! │   PartitionWorker 0      PartitionWorker 1   ...   Worker N  │
//! │   (vertex slots,         (vertex slots,                      │
//! │    accumulators)          accumulators)                      │
//! │            │                      │                      │   │
//! │            └──── messages ─► barrier: route ─► combine ──┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Termination
//!
//! - `Converged`: the active set of the last phase became empty
//! - `Exhausted`: `maxGSS` supersteps ran and vertices are still active
//! - `Canceled`: cancellation observed at a barrier
//! - `Failed`: program/accumulator error, unknown message target or timeout

pub mod accumulator;
pub mod ast;
pub mod config;
pub mod engine;
pub mod error;
pub mod interpreter;
pub mod job;
pub mod message;
pub mod partition;
pub mod program;
pub mod sink;
pub mod status;
pub mod value;
pub mod vertex;

mod coordinator;
mod worker;

// Re-exports
pub use accumulator::{
    Accumulator, AccumulatorRegistry, BoxedAccumulator, BuiltinAccumulator, FnAccumulator,
    ProgramAccumulator,
};
pub use ast::Instr;
pub use config::PregelConfig;
pub use engine::PregelEngine;
pub use error::{AccumulatorError, EvalError, PregelError, ProgramError};
pub use interpreter::{Interpreter, VertexFrame};
pub use job::{JobHandle, JobId};
pub use message::Message;
pub use program::{AccumulatorDecl, CustomAccumulatorSpec, PhaseSpec, Program, ProgramSpec};
pub use sink::{MemoryResultSink, ResultSink};
pub use status::{JobState, JobStatus};
pub use value::ValueType;
pub use vertex::{VertexId, VertexState};
