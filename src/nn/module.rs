//! The graph-module capability contract.
//!
//! Every stage of a composed pipeline implements [`GraphModule`]: it
//! declares the type-state subset it reads, the entries it adds or
//! overwrites, and a pure transform from graph-state to graph-state. The
//! composer validates and invokes any implementation uniformly through this
//! trait, including the decorators, which are themselves modules wrapping
//! an inner module.

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState};
use crate::model::graph::GraphState;

/// One unit of computation over an atomic graph.
///
/// Implementations are constructed once at model-build time against the
/// running type-state, are structurally immutable afterwards, and are
/// invoked once per batch. `transform` must return a graph-state containing
/// every input field plus the declared outputs, each conformant to its
/// declared representation type; it must never remove fields.
pub trait GraphModule {
    /// Required input fields and their expected representation types.
    fn irreps_in(&self) -> &TypeState;

    /// Fields this module adds or overwrites, with their types.
    fn irreps_out(&self) -> &TypeState;

    /// Executes the module on one batch.
    fn transform(&self, state: GraphState) -> Result<GraphState, Error>;
}

/// Validated input/output declarations of one module.
///
/// Concrete modules build one of these in their constructor; it performs
/// the construction checks in one place: required inputs are checked
/// against the running type-state, and every declared output is checked
/// against the schema (unknown fields are rejected, schema-pinned fields
/// must be declared with their registered type).
#[derive(Debug, Clone)]
pub struct ModuleIrreps {
    irreps_in: TypeState,
    irreps_out: TypeState,
}

impl ModuleIrreps {
    /// Validates declarations for `module` against `state` and `schema`.
    pub fn new(
        module: &str,
        state: &TypeState,
        schema: &FieldSchema,
        required: TypeState,
        produced: TypeState,
    ) -> Result<Self, Error> {
        state.satisfies(module, &required)?;
        for (field, declared) in produced.iter() {
            schema.check_output(module, field, declared)?;
        }
        Ok(Self {
            irreps_in: required,
            irreps_out: produced,
        })
    }

    #[inline]
    pub fn irreps_in(&self) -> &TypeState {
        &self.irreps_in
    }

    #[inline]
    pub fn irreps_out(&self) -> &TypeState {
        &self.irreps_out
    }
}
