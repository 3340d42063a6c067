//! AIR interpreter
//!
//! Evaluation is a pure function of the decoded program and a
//! [`VertexFrame`]: the only side effects are writes into the frame's own
//! accumulator map and messages/votes collected in the returned
//! [`VertexOutcome`]. Nothing here can observe another vertex's live state.

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ast::{ArithOp, CmpOp, Instr};
use super::error::{AccumulatorError, EvalError, ProgramError};
use super::message::Message;
use super::program::AccumulatorSlot;
use super::value::{self, Num};
use super::vertex::{AccumulatorMap, OutboundEdge, VertexId, VertexOutcome, VertexState};

/// Vertex-local environment of one evaluation
pub struct VertexFrame<'a> {
    pub id: &'a VertexId,
    pub document: &'a Value,
    pub edges: &'a [OutboundEdge],
    pub accumulators: &'a mut AccumulatorMap,
    pub declarations: &'a BTreeMap<String, AccumulatorSlot>,
    pub phase: &'a str,
    pub superstep: u64,
}

impl VertexFrame<'_> {
    fn slot(&self, name: &str) -> Result<&AccumulatorSlot, ProgramError> {
        self.declarations
            .get(name)
            .ok_or_else(|| ProgramError::UnknownAccumulator(name.to_string()))
    }
}

/// Evaluates AIR programs for one vertex, or detached from any vertex
pub struct Interpreter<'a> {
    frame: Option<VertexFrame<'a>>,
    vars: Vec<(String, Value)>,
    outcome: VertexOutcome,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<'a> Interpreter<'a> {
    /// Interpreter bound to a vertex
    pub fn for_vertex(frame: VertexFrame<'a>) -> Self {
        Self {
            frame: Some(frame),
            vars: Vec::new(),
            outcome: VertexOutcome::default(),
            interrupt: None,
        }
    }

    /// Interpreter without a vertex; vertex instructions fail with `NoVertexContext`
    pub fn detached() -> Self {
        Self {
            frame: None,
            vars: Vec::new(),
            outcome: VertexOutcome::default(),
            interrupt: None,
        }
    }

    /// Stop with [`EvalError::Interrupted`] once `flag` is raised
    ///
    /// Checked on every `for-each` iteration.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Bind a variable visible to the whole program
    pub fn bind(&mut self, name: impl Into<String>, value: Value) -> &mut Self {
        self.vars.push((name.into(), value));
        self
    }

    /// Evaluate a program and return everything it produced
    pub fn run(mut self, program: &Instr) -> Result<VertexOutcome, EvalError> {
        self.eval(program)?;
        Ok(self.outcome)
    }

    fn frame(&mut self, instr: &Instr) -> Result<&mut VertexFrame<'a>, ProgramError> {
        self.frame
            .as_mut()
            .ok_or_else(|| ProgramError::NoVertexContext(instr.tag().to_string()))
    }

    /// Evaluate a single expression
    pub fn eval(&mut self, instr: &Instr) -> Result<Value, EvalError> {
        match instr {
            Instr::Literal(value) => Ok(value.clone()),
            Instr::Seq(items) => self.eval_seq(items),
            Instr::If(clauses) => {
                for (cond, then) in clauses {
                    if value::is_truthy(&self.eval(cond)?) {
                        return self.eval(then);
                    }
                }
                Ok(Value::Null)
            }
            Instr::ForEach { bindings, body } => {
                self.for_each(bindings, body)?;
                Ok(Value::Null)
            }
            Instr::Let { bindings, body } => {
                let depth = self.vars.len();
                let result = self.eval_let(bindings, body);
                self.vars.truncate(depth);
                result
            }
            Instr::AccumSet { name, value } => {
                let value = self.eval(value)?;
                let changed = {
                    let frame = self.frame(instr)?;
                    let slot = frame.slot(name)?;
                    if !slot.value_type.accepts(&value) {
                        return Err(AccumulatorError::declared_type(
                            name.as_str(),
                            slot.value_type,
                            value::type_name(&value),
                        )
                        .into());
                    }
                    let previous = frame.accumulators.insert(name.clone(), value);
                    previous.as_ref() != frame.accumulators.get(name)
                };
                self.outcome.record_write(changed);
                Ok(Value::Null)
            }
            Instr::AccumClear { name } => {
                let frame = self.frame(instr)?;
                let cleared = frame.slot(name)?.accumulator.clear()?;
                frame.accumulators.insert(name.clone(), cleared);
                Ok(Value::Null)
            }
            Instr::AccumRef { name } => {
                let frame = self.frame(instr)?;
                frame.slot(name)?;
                Ok(frame.accumulators.get(name).cloned().unwrap_or(Value::Null))
            }
            Instr::SendToAccum { target, name, value } => {
                let target = match self.eval(target)? {
                    Value::String(id) => VertexId::new(id),
                    other => {
                        return Err(ProgramError::type_mismatch(
                            instr.tag(),
                            "vertex id string",
                            value::type_name(&other),
                        )
                        .into())
                    }
                };
                let value = self.eval(value)?;
                let frame = self.frame(instr)?;
                frame.slot(name)?;
                let message = Message::new(frame.id.clone(), target, name.as_str(), value);
                self.outcome.messages.push(message);
                Ok(Value::Null)
            }
            Instr::SendToAllNeighbours { name, value } => {
                let value = self.eval(value)?;
                let frame = self.frame(instr)?;
                frame.slot(name)?;
                let messages: Vec<_> = frame
                    .edges
                    .iter()
                    .map(|edge| Message::new(frame.id.clone(), edge.to.clone(), name.as_str(), value.clone()))
                    .collect();
                self.outcome.messages.extend(messages);
                Ok(Value::Null)
            }
            Instr::ThisVertexId => Ok(Value::String(self.frame(instr)?.id.to_string())),
            Instr::ThisOutboundEdges => {
                let frame = self.frame(instr)?;
                Ok(Value::Array(
                    frame.edges.iter().map(|edge| edge.document.clone()).collect(),
                ))
            }
            Instr::ThisDoc => Ok(self.frame(instr)?.document.clone()),
            Instr::GlobalSuperstep => Ok(Value::from(self.frame(instr)?.superstep)),
            Instr::Phase => Ok(Value::String(self.frame(instr)?.phase.to_string())),
            Instr::AttribRef { path, doc } => {
                let doc = self.eval(doc)?;
                Ok(attribute(&doc, path))
            }
            Instr::VarRef(name) => self
                .vars
                .iter()
                .rev()
                .find(|(bound, _)| bound == name)
                .map(|(_, value)| value.clone())
                .ok_or_else(|| ProgramError::UnknownVariable(name.clone()).into()),
            Instr::Arith(op, args) => self.arith(instr.tag(), *op, args),
            Instr::Compare(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                compare(instr.tag(), *op, &lhs, &rhs).map(Value::Bool)
            }
            Instr::And(items) => {
                for item in items {
                    if !value::is_truthy(&self.eval(item)?) {
                        return Ok(Value::Bool(false));
                    }
                }
                Ok(Value::Bool(true))
            }
            Instr::Or(items) => {
                for item in items {
                    if value::is_truthy(&self.eval(item)?) {
                        return Ok(Value::Bool(true));
                    }
                }
                Ok(Value::Bool(false))
            }
            Instr::Not(inner) => Ok(Value::Bool(!value::is_truthy(&self.eval(inner)?))),
            Instr::List(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| self.eval(item))
                    .collect::<Result<_, _>>()?,
            )),
            Instr::Length(inner) => match self.eval(inner)? {
                Value::Null => Ok(Value::from(0)),
                Value::Array(items) => Ok(Value::from(items.len())),
                Value::Object(map) => Ok(Value::from(map.len())),
                Value::String(s) => Ok(Value::from(s.chars().count())),
                other => Err(ProgramError::type_mismatch(
                    instr.tag(),
                    "list, document or string",
                    value::type_name(&other),
                )
                .into()),
            },
            Instr::VoteActive | Instr::VoteHalt => {
                self.frame(instr)?;
                self.outcome.vote = Some(if matches!(instr, Instr::VoteActive) {
                    VertexState::Active
                } else {
                    VertexState::Halted
                });
                Ok(Value::Null)
            }
        }
    }

    fn eval_seq(&mut self, items: &[Instr]) -> Result<Value, EvalError> {
        let mut last = Value::Null;
        for item in items {
            last = self.eval(item)?;
        }
        Ok(last)
    }

    fn eval_let(&mut self, bindings: &[(String, Instr)], body: &[Instr]) -> Result<Value, EvalError> {
        for (name, expr) in bindings {
            let value = self.eval(expr)?;
            self.vars.push((name.clone(), value));
        }
        self.eval_seq(body)
    }

    fn for_each(&mut self, bindings: &[(String, Instr)], body: &[Instr]) -> Result<(), EvalError> {
        let Some(((name, expr), rest)) = bindings.split_first() else {
            return self.eval_seq(body).map(|_| ());
        };
        let items = match self.eval(expr)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => {
                return Err(ProgramError::type_mismatch(
                    "for-each",
                    "list",
                    value::type_name(&other),
                )
                .into())
            }
        };
        for item in items {
            if self.interrupted() {
                return Err(EvalError::Interrupted);
            }
            self.vars.push((name.clone(), item));
            let result = self.for_each(rest, body);
            self.vars.pop();
            result?;
        }
        Ok(())
    }

    fn interrupted(&self) -> bool {
        self.interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn arith(&mut self, tag: &'static str, op: ArithOp, args: &[Instr]) -> Result<Value, EvalError> {
        let mut operands = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(arg)?;
            let num = Num::from_value(&value)
                .ok_or_else(|| ProgramError::type_mismatch(tag, "number", value::type_name(&value)))?;
            operands.push(num);
        }

        let result = match (op, operands.split_first()) {
            (ArithOp::Add, None) => Num::Int(0),
            (ArithOp::Mul, None) => Num::Int(1),
            (ArithOp::Sub, Some((only, []))) => Num::Int(0).sub(*only),
            (_, None) => return Err(ProgramError::arity(tag, "at least 1", 0).into()),
            (_, Some((first, rest))) => {
                let mut acc = *first;
                for next in rest {
                    acc = match op {
                        ArithOp::Add => acc.add(*next),
                        ArithOp::Sub => acc.sub(*next),
                        ArithOp::Mul => acc.mul(*next),
                        ArithOp::Div => acc
                            .div(*next)
                            .ok_or_else(|| ProgramError::DivisionByZero(tag.to_string()))?,
                        ArithOp::Rem => acc
                            .rem(*next)
                            .ok_or_else(|| ProgramError::DivisionByZero(tag.to_string()))?,
                    };
                }
                acc
            }
        };

        result.into_value().ok_or_else(|| {
            ProgramError::type_mismatch(tag, "finite result", "non-finite double").into()
        })
    }
}

fn compare(tag: &str, op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
    match op {
        CmpOp::Eq => Ok(value::loosely_equal(lhs, rhs)),
        CmpOp::Ne => Ok(!value::loosely_equal(lhs, rhs)),
        _ => {
            let ordering = value::compare(lhs, rhs).ok_or_else(|| {
                ProgramError::type_mismatch(
                    tag,
                    "two comparable values",
                    format!("{} and {}", value::type_name(lhs), value::type_name(rhs)),
                )
            })?;
            Ok(match op {
                CmpOp::Lt => ordering.is_lt(),
                CmpOp::Le => ordering.is_le(),
                CmpOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
    }
}

/// Walk object keys (and numeric list indices); anything missing is `null`
fn attribute(doc: &Value, path: &[String]) -> Value {
    let mut current = doc;
    for key in path {
        let next = match current {
            Value::Object(map) => map.get(key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Result document of a vertex: `{accumulator: finalize(value)}`
pub(crate) fn finalize_document(
    accumulators: &AccumulatorMap,
    declarations: &BTreeMap<String, AccumulatorSlot>,
) -> Result<Value, AccumulatorError> {
    let mut document = Map::new();
    for (name, slot) in declarations {
        let current = accumulators.get(name).cloned().unwrap_or(Value::Null);
        document.insert(name.clone(), slot.accumulator.finalize(&current)?);
    }
    Ok(Value::Object(document))
}
