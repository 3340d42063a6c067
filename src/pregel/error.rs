//! Error types for the Pregel engine
//!
//! `ProgramError` and `AccumulatorError` describe what went wrong inside a
//! single evaluation; `PregelError` adds the job context (vertex, phase) and
//! covers everything else the engine can report.

use std::time::Duration;

use thiserror::Error;

use super::status::JobState;
use super::value::ValueType;
use super::vertex::VertexId;
use crate::graph::GraphError;

/// Malformed or ill-typed AIR program
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProgramError {
    /// Instruction tag not part of the instruction set
    #[error("Unknown instruction: {0}")]
    UnknownInstruction(String),

    /// Wrong number of arguments
    #[error("Arity mismatch in '{instr}': expected {expected} arguments, got {found}")]
    Arity {
        instr: String,
        expected: String,
        found: usize,
    },

    /// Argument of the wrong type
    #[error("Type mismatch in '{instr}': expected {expected}, found {found}")]
    TypeMismatch {
        instr: String,
        expected: String,
        found: String,
    },

    /// `var-ref` to a name that is not bound
    #[error("Unknown variable in 'var-ref': {0}")]
    UnknownVariable(String),

    /// Accumulator name that the program does not declare
    #[error("Unknown accumulator: {0}")]
    UnknownAccumulator(String),

    /// Integer or float division by zero
    #[error("Division by zero in '{0}'")]
    DivisionByZero(String),

    /// Vertex instruction evaluated outside of a vertex (e.g. in a custom combine)
    #[error("Instruction '{0}' requires a vertex context")]
    NoVertexContext(String),

    /// Structural problem in the AST
    #[error("Malformed program: {0}")]
    Malformed(String),
}

impl ProgramError {
    /// Create an arity error
    pub fn arity(instr: impl Into<String>, expected: impl Into<String>, found: usize) -> Self {
        Self::Arity {
            instr: instr.into(),
            expected: expected.into(),
            found,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(
        instr: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            instr: instr.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Create a malformed program error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

/// Failure inside an accumulator's clear/combine/finalize
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccumulatorError {
    /// Value does not fit the accumulator
    #[error("Accumulator '{accumulator}' expects {expected}, found {found}")]
    TypeMismatch {
        accumulator: String,
        expected: String,
        found: String,
    },

    /// The accumulator's own logic failed
    #[error("Accumulator '{accumulator}' {operation} failed: {message}")]
    Failed {
        accumulator: String,
        operation: &'static str,
        message: String,
    },
}

impl AccumulatorError {
    /// Create a type mismatch error
    pub fn type_mismatch(
        accumulator: impl Into<String>,
        expected: impl ToString,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            accumulator: accumulator.into(),
            expected: expected.to_string(),
            found: found.into(),
        }
    }

    /// Create a failure error
    pub fn failed(
        accumulator: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::Failed {
            accumulator: accumulator.into(),
            operation,
            message: message.into(),
        }
    }

    /// Type mismatch against a declared value type
    pub fn declared_type(accumulator: impl Into<String>, expected: ValueType, found: &str) -> Self {
        Self::type_mismatch(accumulator, expected, found)
    }
}

/// Error raised while evaluating a program for one vertex
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error(transparent)]
    Accumulator(#[from] AccumulatorError),

    /// The step was abandoned before this vertex finished
    #[error("Evaluation interrupted")]
    Interrupted,
}

/// Errors reported by the engine
#[derive(Debug, Error)]
pub enum PregelError {
    /// Program references an accumulator name or type that is not declared
    #[error("Unknown accumulator: {0}")]
    UnknownAccumulator(String),

    /// Program failed validation at submission
    #[error("Invalid program ({context}): {source}")]
    InvalidProgram {
        context: String,
        #[source]
        source: ProgramError,
    },

    /// Program failed while evaluating a vertex
    #[error("Program error in vertex {vertex_id} (phase '{phase}'): {source}")]
    Program {
        vertex_id: VertexId,
        phase: String,
        #[source]
        source: ProgramError,
    },

    /// Accumulator failed for a vertex
    #[error("Accumulator error in vertex {vertex_id}: {source}")]
    Accumulator {
        vertex_id: VertexId,
        #[source]
        source: AccumulatorError,
    },

    /// Message addressed to a vertex that is not part of the graph
    #[error("Vertex {sender} sent a message to unknown vertex {target}")]
    UnknownVertex { sender: VertexId, target: VertexId },

    /// Invalid graph input
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// No job with this id
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Results requested before the job finished successfully
    #[error("Job not finished: state is {0}")]
    JobNotFinished(JobState),

    /// Job exceeded its configured time budget
    #[error("Job timeout after {0:?}")]
    JobTimeout(Duration),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// A worker task disappeared or a channel closed unexpectedly
    #[error("Worker error: {0}")]
    Worker(String),

    /// Writing finalized results failed
    #[error("Result sink error: {0}")]
    Sink(String),

    /// Program or graph JSON could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PregelError {
    /// Attach vertex context to an evaluation error
    pub fn from_eval(vertex_id: impl Into<VertexId>, phase: impl Into<String>, error: EvalError) -> Self {
        match error {
            EvalError::Program(source) => Self::Program {
                vertex_id: vertex_id.into(),
                phase: phase.into(),
                source,
            },
            EvalError::Accumulator(source) => Self::Accumulator {
                vertex_id: vertex_id.into(),
                source,
            },
            EvalError::Interrupted => {
                let vertex_id: VertexId = vertex_id.into();
                Self::Worker(format!("evaluation of vertex {} interrupted", vertex_id))
            }
        }
    }

    /// Create an accumulator error for a vertex
    pub fn accumulator(vertex_id: impl Into<VertexId>, source: AccumulatorError) -> Self {
        Self::Accumulator {
            vertex_id: vertex_id.into(),
            source,
        }
    }

    /// Create an invalid program error
    pub fn invalid_program(context: impl Into<String>, source: ProgramError) -> Self {
        Self::InvalidProgram {
            context: context.into(),
            source,
        }
    }

    /// Create a config error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a worker error
    pub fn worker(message: impl Into<String>) -> Self {
        Self::Worker(message.into())
    }

    /// Only `JobNotFinished` can be retried (after polling the status again)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PregelError::JobNotFinished(_))
    }

    /// Check if the error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, PregelError::JobTimeout(_))
    }
}

#[cfg(test)]
mod tests {
    // Ensure errors are Send + Sync (compile-time check)
    static_assertions::assert_impl_all!(super::PregelError: Send, Sync);
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PregelError::UnknownAccumulator("distance".into());
        assert_eq!(format!("{}", err), "Unknown accumulator: distance");
    }

    #[test]
    fn test_program_error_carries_vertex_and_instruction() {
        let err = PregelError::from_eval(
            "b",
            "main",
            EvalError::from(ProgramError::arity("accum-set!", "2", 1)),
        );
        let text = err.to_string();
        assert!(text.contains("vertex b"));
        assert!(text.contains("accum-set!"));
        assert!(matches!(err, PregelError::Program { .. }));
    }

    #[test]
    fn test_accumulator_error_keeps_vertex() {
        let err = PregelError::from_eval(
            "c",
            "main",
            EvalError::from(AccumulatorError::type_mismatch("min", "number", "string")),
        );
        match err {
            PregelError::Accumulator { vertex_id, source } => {
                assert_eq!(vertex_id.as_str(), "c");
                assert!(matches!(source, AccumulatorError::TypeMismatch { .. }));
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_interrupted_evaluation_is_a_worker_error() {
        let err = PregelError::from_eval("d", "main", EvalError::Interrupted);
        assert!(matches!(err, PregelError::Worker(_)));
        assert!(err.to_string().contains("vertex d"));
    }

    #[test]
    fn test_is_recoverable() {
        assert!(PregelError::JobNotFinished(JobState::Running).is_recoverable());
        assert!(!PregelError::JobNotFound("x".into()).is_recoverable());
        assert!(!PregelError::UnknownAccumulator("x".into()).is_recoverable());
    }

    #[test]
    fn test_timeout() {
        let err = PregelError::JobTimeout(Duration::from_secs(1));
        assert!(err.is_timeout());
        assert!(!PregelError::worker("gone").is_timeout());
    }
}
