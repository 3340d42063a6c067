//! Program submission object and its compiled form
//!
//! [`ProgramSpec`] is the JSON shape callers submit. [`Program::compile`]
//! decodes every AIR program once, resolves accumulator types against a
//! registry and rejects references to undeclared accumulators, so that a
//! running job only ever fails on data-dependent errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::accumulator::{AccumulatorRegistry, BoxedAccumulator, ProgramAccumulator};
use super::ast::Instr;
use super::error::{PregelError, ProgramError};
use super::value::ValueType;

/// Accumulator type name that selects an entry of `customAccumulators`
pub const CUSTOM_ACCUMULATOR_TYPE: &str = "custom";

/// Declaration of one per-vertex accumulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccumulatorDecl {
    /// Registered accumulator type (`min`, `sum`, ...) or `custom`
    pub accumulator_type: String,
    #[serde(default)]
    pub value_type: ValueType,
    /// Entry of `customAccumulators` when the type is `custom`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_type: Option<String>,
}

impl AccumulatorDecl {
    pub fn new(accumulator_type: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            accumulator_type: accumulator_type.into(),
            value_type,
            custom_type: None,
        }
    }

    pub fn custom(custom_type: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            accumulator_type: CUSTOM_ACCUMULATOR_TYPE.to_string(),
            value_type,
            custom_type: Some(custom_type.into()),
        }
    }
}

/// Custom accumulator written in AIR
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomAccumulatorSpec {
    pub combine: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clear: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finalize: Option<Value>,
}

/// One phase of a program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSpec {
    pub name: String,
    #[serde(default)]
    pub init_program: Value,
    pub update_program: Value,
}

/// Program submission object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramSpec {
    /// Attribute under which finalized results are written back
    pub result_field: String,
    /// Hard ceiling on supersteps, across all phases
    #[serde(rename = "maxGSS")]
    pub max_gss: u64,
    #[serde(default)]
    pub vertex_accumulators: BTreeMap<String, AccumulatorDecl>,
    #[serde(default)]
    pub custom_accumulators: BTreeMap<String, CustomAccumulatorSpec>,
    pub phases: Vec<PhaseSpec>,
}

impl ProgramSpec {
    /// Parse a submission object
    pub fn from_value(value: Value) -> Result<Self, PregelError> {
        Ok(serde_json::from_value(value)?)
    }
}

/// Resolved accumulator of a compiled program
#[derive(Clone)]
pub struct AccumulatorSlot {
    pub value_type: ValueType,
    pub accumulator: BoxedAccumulator,
}

impl std::fmt::Debug for AccumulatorSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccumulatorSlot")
            .field("value_type", &self.value_type)
            .field("accumulator", &self.accumulator.name())
            .finish()
    }
}

/// Decoded phase
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub init: Instr,
    pub update: Instr,
}

/// Validated program, shared read-only by the coordinator and every worker
#[derive(Debug, Clone)]
pub struct Program {
    pub result_field: String,
    pub max_gss: u64,
    pub accumulators: BTreeMap<String, AccumulatorSlot>,
    pub phases: Vec<Phase>,
}

impl Program {
    /// Validate and decode a submission against a registry
    ///
    /// The registry is cloned and extended with the program's custom
    /// accumulators; the caller's registry is left untouched.
    pub fn compile(spec: &ProgramSpec, registry: &AccumulatorRegistry) -> Result<Self, PregelError> {
        if spec.max_gss == 0 {
            return Err(PregelError::invalid_program(
                "maxGSS",
                ProgramError::malformed("maxGSS must be greater than zero"),
            ));
        }
        if spec.phases.is_empty() {
            return Err(PregelError::invalid_program(
                "phases",
                ProgramError::malformed("a program needs at least one phase"),
            ));
        }

        let mut registry = registry.clone();
        for (name, custom) in &spec.custom_accumulators {
            registry.register(name.clone(), Arc::new(compile_custom(name, custom)?));
        }

        let mut accumulators = BTreeMap::new();
        for (name, decl) in &spec.vertex_accumulators {
            let type_name = if decl.accumulator_type == CUSTOM_ACCUMULATOR_TYPE {
                decl.custom_type.as_deref().ok_or_else(|| {
                    PregelError::invalid_program(
                        format!("vertexAccumulators.{}", name),
                        ProgramError::malformed("custom accumulator without customType"),
                    )
                })?
            } else {
                decl.accumulator_type.as_str()
            };
            let accumulator = registry.resolve(type_name)?;
            accumulators.insert(
                name.clone(),
                AccumulatorSlot {
                    value_type: decl.value_type,
                    accumulator,
                },
            );
        }

        let mut phases = Vec::with_capacity(spec.phases.len());
        for phase in &spec.phases {
            let init = decode(&phase.name, "initProgram", &phase.init_program)?;
            let update = decode(&phase.name, "updateProgram", &phase.update_program)?;
            for name in init.accumulator_refs().iter().chain(&update.accumulator_refs()) {
                if !accumulators.contains_key(name) {
                    return Err(PregelError::UnknownAccumulator(name.clone()));
                }
            }
            phases.push(Phase {
                name: phase.name.clone(),
                init,
                update,
            });
        }

        Ok(Self {
            result_field: spec.result_field.clone(),
            max_gss: spec.max_gss,
            accumulators,
            phases,
        })
    }

    /// Declared accumulator by name
    pub fn accumulator(&self, name: &str) -> Option<&AccumulatorSlot> {
        self.accumulators.get(name)
    }
}

fn decode(phase: &str, field: &str, program: &Value) -> Result<Instr, PregelError> {
    Instr::decode(program)
        .map_err(|e| PregelError::invalid_program(format!("phase '{}' {}", phase, field), e))
}

fn compile_custom(name: &str, custom: &CustomAccumulatorSpec) -> Result<ProgramAccumulator, PregelError> {
    let context = |part: &str| format!("customAccumulators.{}.{}", name, part);
    let decode_part = |part: &str, program: &Value| -> Result<Instr, PregelError> {
        let instr = Instr::decode(program).map_err(|e| PregelError::invalid_program(context(part), e))?;
        // Custom accumulators run without a vertex and cannot see any accumulator
        if let Some(accumulator) = instr.accumulator_refs().into_iter().next() {
            return Err(PregelError::invalid_program(
                context(part),
                ProgramError::malformed(format!(
                    "custom accumulator code may not access accumulator '{}'",
                    accumulator
                )),
            ));
        }
        Ok(instr)
    };

    let combine = decode_part("combine", &custom.combine)?;
    let clear = custom
        .clear
        .as_ref()
        .map(|program| decode_part("clear", program))
        .transpose()?;
    let finalize = custom
        .finalize
        .as_ref()
        .map(|program| decode_part("finalize", program))
        .transpose()?;

    Ok(ProgramAccumulator::new(name, combine, clear, finalize))
}
