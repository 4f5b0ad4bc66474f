//! The pluggable condition oracle.
//!
//! Transition `cond` attributes are opaque to the interpreter core: an
//! oracle compiles each source string once while the document is being
//! optimized, and evaluates the compiled form against an [`EvalContext`]
//! during transition selection. All expression-language details stay behind
//! this boundary, so the engine is agnostic to the datamodel language.
//!
//! Evaluation must be pure: the context is read-only and two evaluations of
//! the same condition against equal contexts must agree.

use crate::grammar::{Event, Val};
use std::fmt::Debug;
use thiserror::Error;

/// An opaque handle to a compiled condition.
///
/// Handles are minted by [`ConditionOracle::compile`] and stored in the
/// optimized document; they are only meaningful to the oracle that issued
/// them.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cond(u32);

impl Cond {
    /// Wraps an index into oracle-owned storage. Only the compiling oracle
    /// should create handles.
    pub fn new(index: u32) -> Self {
        Cond(index)
    }

    /// The storage index this handle wraps.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The error type for condition compilation and evaluation.
///
/// Compile errors surface as validation errors; evaluation errors are
/// absorbed by the selection loop, which treats the condition as `false`.
#[derive(Debug, Clone, Error)]
pub enum OracleError {
    /// The condition source could not be parsed.
    #[error("cannot parse condition `{0}`: {1}")]
    Parse(String, String),
    /// The condition uses a construct the oracle does not support.
    #[error("unsupported construct in condition: {0}")]
    Unsupported(String),
    /// An identifier did not resolve in the evaluation context.
    #[error("unknown identifier `{0}`")]
    UnknownIdentifier(String),
    /// The handle does not belong to this oracle.
    #[error("no compiled condition for handle {0:?}")]
    MissingCond(Cond),
    /// The condition evaluated to a non-boolean value.
    #[error("condition evaluated to a non-boolean value")]
    NotABoolean,
}

/// Read-only context a condition is evaluated against: the triggering event
/// (if any) and the `In(state_id)` predicate over the current configuration.
pub struct EvalContext<'a> {
    event: Option<&'a Event>,
    in_state: &'a dyn Fn(&str) -> bool,
}

impl<'a> EvalContext<'a> {
    pub fn new(event: Option<&'a Event>, in_state: &'a dyn Fn(&str) -> bool) -> Self {
        EvalContext { event, in_state }
    }

    /// Name of the event being processed, or `None` during the eventless
    /// fixpoint.
    pub fn event_name(&self) -> Option<&str> {
        self.event.map(Event::name)
    }

    /// A field of the triggering event's payload.
    pub fn event_data(&self, field: &str) -> Option<&Val> {
        self.event.and_then(|event| event.data(field))
    }

    /// The SCXML `In(state_id)` predicate: whether the state is active,
    /// ancestors included.
    pub fn in_state(&self, id: &str) -> bool {
        (self.in_state)(id)
    }
}

/// Compiler and evaluator for transition conditions.
///
/// `compile` is called once per `cond` attribute while the document is
/// validated; `eval` is called during transition selection and must be free
/// of side effects on the context. The interpreter is single-threaded, so
/// oracles need not be `Send` or `Sync`.
pub trait ConditionOracle: Debug {
    fn compile(&mut self, source: &str) -> Result<Cond, OracleError>;

    fn eval(&self, cond: Cond, ctx: &EvalContext<'_>) -> Result<bool, OracleError>;
}

/// An oracle for documents that do not use conditions: it compiles any
/// source and every condition evaluates to `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrivialOracle;

impl ConditionOracle for TrivialOracle {
    fn compile(&mut self, _source: &str) -> Result<Cond, OracleError> {
        Ok(Cond::new(0))
    }

    fn eval(&self, _cond: Cond, _ctx: &EvalContext<'_>) -> Result<bool, OracleError> {
        Ok(true)
    }
}
