//! Partition workers
//!
//! A worker exclusively owns a contiguous chunk of vertices together with
//! their accumulator maps and activity flags. It runs as its own tokio task
//! and only acts on commands from the coordinator, so vertex state is never
//! shared: messages from other partitions arrive through
//! [`WorkerCommand::Deliver`] at the barrier.
//!
//! Within one step, vertices are evaluated in a [`JoinSet`] bounded by a
//! semaphore. Each task owns the vertex's accumulator map for the duration
//! of the evaluation and hands it back with its outcome. The first failure
//! aborts the step: queued tasks are aborted and running programs are
//! interrupted at their next loop iteration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinSet;

use super::error::{AccumulatorError, PregelError};
use super::interpreter::{self, Interpreter, VertexFrame};
use super::message::Message;
use super::program::Program;
use super::value;
use super::vertex::{VertexId, VertexOutcome, VertexSlot};

/// Reply channel for worker commands
pub(crate) type Reply<T> = oneshot::Sender<Result<T, PregelError>>;

/// Commands sent by the coordinator
pub(crate) enum WorkerCommand {
    /// Run a phase's init program on every vertex
    Init {
        phase: usize,
        superstep: u64,
        reply: Reply<StepReport>,
    },
    /// Run a phase's update program on the active vertices
    Compute {
        phase: usize,
        superstep: u64,
        reply: Reply<StepReport>,
    },
    /// Combine routed messages and report the number of active vertices
    Deliver {
        messages: Vec<Message>,
        reply: Reply<usize>,
    },
    /// Produce the finalized result document of every vertex
    Finalize {
        reply: Reply<Vec<(VertexId, Value)>>,
    },
}

/// What one worker step produced
#[derive(Debug, Default)]
pub(crate) struct StepReport {
    /// Outgoing messages, in vertex order
    pub messages: Vec<Message>,
    /// Number of vertices evaluated
    pub evaluated: usize,
}

pub(crate) struct PartitionWorker {
    index: usize,
    slots: Vec<VertexSlot>,
    lookup: HashMap<VertexId, usize>,
    active: Vec<bool>,
    program: Arc<Program>,
    semaphore: Arc<Semaphore>,
    reactivate_on_no_change: bool,
}

impl PartitionWorker {
    pub fn new(
        index: usize,
        slots: Vec<VertexSlot>,
        program: Arc<Program>,
        parallelism: usize,
        reactivate_on_no_change: bool,
    ) -> Self {
        let lookup = slots
            .iter()
            .enumerate()
            .map(|(i, slot)| (slot.id.clone(), i))
            .collect();
        let active = vec![false; slots.len()];
        Self {
            index,
            slots,
            lookup,
            active,
            program,
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
            reactivate_on_no_change,
        }
    }

    /// Serve coordinator commands until the channel closes
    pub async fn run(mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        while let Some(command) = commands.recv().await {
            // A dropped reply means the coordinator gave up on the job
            match command {
                WorkerCommand::Init {
                    phase,
                    superstep,
                    reply,
                } => {
                    let _ = reply.send(self.init(phase, superstep).await);
                }
                WorkerCommand::Compute {
                    phase,
                    superstep,
                    reply,
                } => {
                    let _ = reply.send(self.compute(phase, superstep).await);
                }
                WorkerCommand::Deliver { messages, reply } => {
                    let _ = reply.send(self.deliver(messages));
                }
                WorkerCommand::Finalize { reply } => {
                    let _ = reply.send(self.finalize());
                }
            }
        }
        tracing::debug!(partition = self.index, "Partition worker stopped");
    }

    /// Number of vertices currently active
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|active| **active).count()
    }

    /// Run the init program of `phase` on every vertex
    ///
    /// The first phase starts from cleared accumulators; later phases keep
    /// the state left by the previous one.
    pub async fn init(&mut self, phase: usize, superstep: u64) -> Result<StepReport, PregelError> {
        if phase == 0 {
            self.reset()?;
        }
        let all: Vec<usize> = (0..self.slots.len()).collect();
        let outcomes = self.evaluate(phase, superstep, true, all).await?;

        let mut report = StepReport::default();
        for (index, outcome) in outcomes {
            self.active[index] = outcome.activates_after_init(self.reactivate_on_no_change);
            report.evaluated += 1;
            report.messages.extend(outcome.messages);
        }
        Ok(report)
    }

    /// Run the update program of `phase` on every active vertex
    ///
    /// Afterwards only vertices that voted active remain active; everyone
    /// else waits for messages.
    pub async fn compute(&mut self, phase: usize, superstep: u64) -> Result<StepReport, PregelError> {
        let active: Vec<usize> = self
            .active
            .iter()
            .enumerate()
            .filter_map(|(i, active)| active.then_some(i))
            .collect();
        self.active.iter_mut().for_each(|active| *active = false);

        let outcomes = self.evaluate(phase, superstep, false, active).await?;

        let mut report = StepReport::default();
        for (index, outcome) in outcomes {
            self.active[index] = outcome.stays_active();
            report.evaluated += 1;
            report.messages.extend(outcome.messages);
        }
        Ok(report)
    }

    /// Combine routed messages into their target accumulators
    ///
    /// Returns the number of active vertices after delivery.
    pub fn deliver(&mut self, messages: Vec<Message>) -> Result<usize, PregelError> {
        for message in messages {
            let index = *self
                .lookup
                .get(&message.target)
                .ok_or_else(|| PregelError::UnknownVertex {
                    sender: message.sender.clone(),
                    target: message.target.clone(),
                })?;
            let declared = self
                .program
                .accumulator(&message.accumulator)
                .ok_or_else(|| PregelError::UnknownAccumulator(message.accumulator.clone()))?;

            let slot = &mut self.slots[index];
            let current = slot
                .accumulators
                .get(&message.accumulator)
                .cloned()
                .unwrap_or(Value::Null);
            let combined = declared
                .accumulator
                .combine(&current, &message.value)
                .map_err(|e| PregelError::accumulator(slot.id.clone(), e))?;
            if !declared.value_type.accepts(&combined) {
                return Err(PregelError::accumulator(
                    slot.id.clone(),
                    AccumulatorError::declared_type(
                        message.accumulator.as_str(),
                        declared.value_type,
                        value::type_name(&combined),
                    ),
                ));
            }

            let changed = combined != current;
            slot.accumulators.insert(message.accumulator, combined);
            if changed || self.reactivate_on_no_change {
                self.active[index] = true;
            }
        }
        Ok(self.active_count())
    }

    /// Result document of every vertex, in partition order
    pub fn finalize(&self) -> Result<Vec<(VertexId, Value)>, PregelError> {
        self.slots
            .iter()
            .map(|slot| {
                interpreter::finalize_document(&slot.accumulators, &self.program.accumulators)
                    .map(|document| (slot.id.clone(), document))
                    .map_err(|e| PregelError::accumulator(slot.id.clone(), e))
            })
            .collect()
    }

    fn reset(&mut self) -> Result<(), PregelError> {
        for slot in &mut self.slots {
            slot.accumulators.clear();
            for (name, declared) in &self.program.accumulators {
                let cleared = declared
                    .accumulator
                    .clear()
                    .map_err(|e| PregelError::accumulator(slot.id.clone(), e))?;
                if !declared.value_type.accepts(&cleared) {
                    return Err(PregelError::accumulator(
                        slot.id.clone(),
                        AccumulatorError::declared_type(
                            name.as_str(),
                            declared.value_type,
                            value::type_name(&cleared),
                        ),
                    ));
                }
                slot.accumulators.insert(name.clone(), cleared);
            }
        }
        self.active.iter_mut().for_each(|active| *active = false);
        Ok(())
    }

    /// Evaluate the init or update program for the given vertices
    ///
    /// Outcomes come back in vertex order, whatever order the tasks finished
    /// in. The first failure, in completion order, aborts the rest. Dropping
    /// the returned future does the same.
    async fn evaluate(
        &mut self,
        phase: usize,
        superstep: u64,
        init: bool,
        vertices: Vec<usize>,
    ) -> Result<Vec<(usize, VertexOutcome)>, PregelError> {
        if phase >= self.program.phases.len() {
            return Err(PregelError::worker(format!("phase {} does not exist", phase)));
        }

        let interrupt = Arc::new(AtomicBool::new(false));
        let _interrupt_on_drop = InterruptOnDrop(Arc::clone(&interrupt));
        let mut tasks = JoinSet::new();
        for index in vertices {
            let slot = &mut self.slots[index];
            let id = slot.id.clone();
            let document = Arc::clone(&slot.document);
            let edges = Arc::clone(&slot.edges);
            let mut accumulators = std::mem::take(&mut slot.accumulators);
            let program = Arc::clone(&self.program);
            let semaphore = Arc::clone(&self.semaphore);
            let interrupt = Arc::clone(&interrupt);

            tasks.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        let current = &program.phases[phase];
                        let frame = VertexFrame {
                            id: &id,
                            document: document.as_ref(),
                            edges: &edges,
                            accumulators: &mut accumulators,
                            declarations: &program.accumulators,
                            phase: &current.name,
                            superstep,
                        };
                        let code = if init { &current.init } else { &current.update };
                        Interpreter::for_vertex(frame)
                            .with_interrupt(interrupt)
                            .run(code)
                            .map_err(|e| PregelError::from_eval(id.clone(), current.name.clone(), e))
                    }
                    Err(e) => Err(PregelError::worker(e.to_string())),
                };
                (index, accumulators, result)
            });
        }

        let mut outcomes = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            let failure = match joined {
                Ok((index, accumulators, result)) => {
                    self.slots[index].accumulators = accumulators;
                    match result {
                        Ok(outcome) => {
                            outcomes.push((index, outcome));
                            continue;
                        }
                        Err(e) => e,
                    }
                }
                Err(e) => PregelError::worker(format!("vertex task failed: {}", e)),
            };
            interrupt.store(true, Ordering::Relaxed);
            tasks.abort_all();
            tracing::warn!(partition = self.index, superstep, error = %failure, "Vertex evaluation failed");
            return Err(failure);
        }

        outcomes.sort_unstable_by_key(|(index, _)| *index);
        Ok(outcomes)
    }
}

/// Raises the interrupt flag of a step when the step is abandoned
struct InterruptOnDrop(Arc<AtomicBool>);

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}
