//! Accumulators: per-vertex conflict-resolution cells
//!
//! Messages addressed to the same vertex in the same superstep are merged
//! with the accumulator's `combine`. Delivery order across partitions is not
//! fixed, so `combine` must be associative and commutative. The engine does
//! not check this; it is a contract on every implementation.
//!
//! The registry is a plain value. Every job clones the engine's registry and
//! extends the clone with the program's custom accumulators, so jobs never
//! see each other's definitions.

use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::ast::Instr;
use super::error::{AccumulatorError, PregelError};
use super::interpreter::Interpreter;
use super::value::{self, Num};

/// Combine/clear/finalize semantics of an accumulator type
pub trait Accumulator: Send + Sync {
    /// Type name, used in diagnostics
    fn name(&self) -> &str;

    /// Initial value of a freshly cleared accumulator
    fn clear(&self) -> Result<Value, AccumulatorError> {
        Ok(Value::Null)
    }

    /// Merge an incoming message value into the current value
    ///
    /// Must be associative and commutative.
    fn combine(&self, current: &Value, incoming: &Value) -> Result<Value, AccumulatorError>;

    /// Value exposed in job results
    fn finalize(&self, current: &Value) -> Result<Value, AccumulatorError> {
        Ok(current.clone())
    }
}

/// Shared accumulator for dynamic dispatch
pub type BoxedAccumulator = Arc<dyn Accumulator>;

/// Accumulator types every registry starts with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAccumulator {
    /// Numeric minimum; `null` is +infinity
    Min,
    /// Numeric maximum; `null` is -infinity
    Max,
    /// Numeric sum
    Sum,
    /// Boolean conjunction
    And,
    /// Boolean disjunction
    Or,
    /// Last write wins. Not commutative: only deterministic with at most one
    /// message per target and superstep.
    Store,
    /// Collects every incoming value. Commutative as a multiset only; the
    /// element order follows delivery order.
    List,
}

impl BuiltinAccumulator {
    pub const ALL: [BuiltinAccumulator; 7] = [
        BuiltinAccumulator::Min,
        BuiltinAccumulator::Max,
        BuiltinAccumulator::Sum,
        BuiltinAccumulator::And,
        BuiltinAccumulator::Or,
        BuiltinAccumulator::Store,
        BuiltinAccumulator::List,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinAccumulator::Min => "min",
            BuiltinAccumulator::Max => "max",
            BuiltinAccumulator::Sum => "sum",
            BuiltinAccumulator::And => "and",
            BuiltinAccumulator::Or => "or",
            BuiltinAccumulator::Store => "store",
            BuiltinAccumulator::List => "list",
        }
    }

    fn number(&self, value: &Value) -> Result<Num, AccumulatorError> {
        Num::from_value(value)
            .ok_or_else(|| AccumulatorError::type_mismatch(self.as_str(), "number", value::type_name(value)))
    }

    fn boolean(&self, value: &Value) -> Result<bool, AccumulatorError> {
        value
            .as_bool()
            .ok_or_else(|| AccumulatorError::type_mismatch(self.as_str(), "bool", value::type_name(value)))
    }

    fn extremum(&self, current: &Value, incoming: &Value) -> Result<Value, AccumulatorError> {
        if incoming.is_null() {
            return Ok(current.clone());
        }
        let new = self.number(incoming)?;
        if current.is_null() {
            return Ok(incoming.clone());
        }
        let old = self.number(current)?;
        let replace = match self {
            BuiltinAccumulator::Min => new.cmp_num(old).is_lt(),
            _ => new.cmp_num(old).is_gt(),
        };
        Ok(if replace { incoming.clone() } else { current.clone() })
    }
}

impl Accumulator for BuiltinAccumulator {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn clear(&self) -> Result<Value, AccumulatorError> {
        Ok(match self {
            BuiltinAccumulator::Min | BuiltinAccumulator::Max | BuiltinAccumulator::Store => {
                Value::Null
            }
            BuiltinAccumulator::Sum => Value::from(0),
            BuiltinAccumulator::And => Value::Bool(true),
            BuiltinAccumulator::Or => Value::Bool(false),
            BuiltinAccumulator::List => Value::Array(Vec::new()),
        })
    }

    fn combine(&self, current: &Value, incoming: &Value) -> Result<Value, AccumulatorError> {
        match self {
            BuiltinAccumulator::Min | BuiltinAccumulator::Max => self.extremum(current, incoming),
            BuiltinAccumulator::Sum => {
                let lhs = if current.is_null() { Num::Int(0) } else { self.number(current)? };
                let rhs = if incoming.is_null() { Num::Int(0) } else { self.number(incoming)? };
                lhs.add(rhs).into_value().ok_or_else(|| {
                    AccumulatorError::failed(self.as_str(), "combine", "result is not a finite number")
                })
            }
            BuiltinAccumulator::And | BuiltinAccumulator::Or => {
                if incoming.is_null() {
                    return Ok(current.clone());
                }
                let rhs = self.boolean(incoming)?;
                if current.is_null() {
                    return Ok(Value::Bool(rhs));
                }
                let lhs = self.boolean(current)?;
                Ok(Value::Bool(match self {
                    BuiltinAccumulator::And => lhs && rhs,
                    _ => lhs || rhs,
                }))
            }
            BuiltinAccumulator::Store => Ok(incoming.clone()),
            BuiltinAccumulator::List => {
                let mut items = match current {
                    Value::Null => Vec::new(),
                    Value::Array(items) => items.clone(),
                    other => {
                        return Err(AccumulatorError::type_mismatch(
                            self.as_str(),
                            "list",
                            value::type_name(other),
                        ))
                    }
                };
                items.push(incoming.clone());
                Ok(Value::Array(items))
            }
        }
    }
}

type CombineFn = dyn Fn(&Value, &Value) -> Result<Value, AccumulatorError> + Send + Sync;
type FinalizeFn = dyn Fn(&Value) -> Result<Value, AccumulatorError> + Send + Sync;

/// Accumulator backed by Rust closures, for callers registering types in code
#[derive(Clone)]
pub struct FnAccumulator {
    name: String,
    clear: Value,
    combine: Arc<CombineFn>,
    finalize: Option<Arc<FinalizeFn>>,
}

impl FnAccumulator {
    /// Create a closure accumulator with the given clear value
    pub fn new<F>(name: impl Into<String>, clear: Value, combine: F) -> Self
    where
        F: Fn(&Value, &Value) -> Result<Value, AccumulatorError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            clear,
            combine: Arc::new(combine),
            finalize: None,
        }
    }

    /// Set the finalize function
    pub fn with_finalize<F>(mut self, finalize: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, AccumulatorError> + Send + Sync + 'static,
    {
        self.finalize = Some(Arc::new(finalize));
        self
    }
}

impl fmt::Debug for FnAccumulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAccumulator")
            .field("name", &self.name)
            .field("clear", &self.clear)
            .finish_non_exhaustive()
    }
}

impl Accumulator for FnAccumulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) -> Result<Value, AccumulatorError> {
        Ok(self.clear.clone())
    }

    fn combine(&self, current: &Value, incoming: &Value) -> Result<Value, AccumulatorError> {
        (self.combine)(current, incoming)
    }

    fn finalize(&self, current: &Value) -> Result<Value, AccumulatorError> {
        match &self.finalize {
            Some(finalize) => finalize(current),
            None => Ok(current.clone()),
        }
    }
}

/// Custom accumulator declared by a program (`customAccumulators`)
///
/// `combine` sees `current` and `incoming` as variables, `finalize` sees
/// `current`, `clear` sees nothing. None of them may touch vertex state.
#[derive(Debug, Clone)]
pub struct ProgramAccumulator {
    name: String,
    combine: Instr,
    clear: Option<Instr>,
    finalize: Option<Instr>,
}

impl ProgramAccumulator {
    pub fn new(
        name: impl Into<String>,
        combine: Instr,
        clear: Option<Instr>,
        finalize: Option<Instr>,
    ) -> Self {
        Self {
            name: name.into(),
            combine,
            clear,
            finalize,
        }
    }

    fn evaluate(
        &self,
        operation: &'static str,
        program: &Instr,
        bindings: &[(&str, &Value)],
    ) -> Result<Value, AccumulatorError> {
        let mut interpreter = Interpreter::detached();
        for (name, value) in bindings {
            interpreter.bind(*name, (*value).clone());
        }
        interpreter
            .eval(program)
            .map_err(|e| AccumulatorError::failed(&self.name, operation, e.to_string()))
    }
}

impl Accumulator for ProgramAccumulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn clear(&self) -> Result<Value, AccumulatorError> {
        match &self.clear {
            Some(program) => self.evaluate("clear", program, &[]),
            None => Ok(Value::Null),
        }
    }

    fn combine(&self, current: &Value, incoming: &Value) -> Result<Value, AccumulatorError> {
        self.evaluate(
            "combine",
            &self.combine,
            &[("current", current), ("incoming", incoming)],
        )
    }

    fn finalize(&self, current: &Value) -> Result<Value, AccumulatorError> {
        match &self.finalize {
            Some(program) => self.evaluate("finalize", program, &[("current", current)]),
            None => Ok(current.clone()),
        }
    }
}

/// Named accumulator types available to programs
#[derive(Clone, Default)]
pub struct AccumulatorRegistry {
    types: HashMap<String, BoxedAccumulator>,
}

impl AccumulatorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in types
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for builtin in BuiltinAccumulator::ALL {
            registry.register(builtin.as_str(), Arc::new(builtin));
        }
        registry
    }

    /// Register (or replace) an accumulator type
    pub fn register(&mut self, name: impl Into<String>, accumulator: BoxedAccumulator) -> &mut Self {
        self.types.insert(name.into(), accumulator);
        self
    }

    /// Look up an accumulator type
    pub fn get(&self, name: &str) -> Option<&BoxedAccumulator> {
        self.types.get(name)
    }

    /// Look up an accumulator type, failing with `UnknownAccumulator`
    pub fn resolve(&self, name: &str) -> Result<BoxedAccumulator, PregelError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| PregelError::UnknownAccumulator(name.to_string()))
    }

    /// Check if a type is registered
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for AccumulatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccumulatorRegistry")
            .field("types", &self.names())
            .finish()
    }
}
