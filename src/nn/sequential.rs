//! Sequential composition of graph modules.
//!
//! [`SequentialNet`] owns an ordered sequence of named module instances and
//! the accumulated type-state after each of them. Every structural edit
//! (append, insert, replace, delete) re-validates the affected part of the
//! chain *before* committing, so a failed edit leaves the network exactly
//! as it was: the module sequence and the accumulated type-state compare
//! equal to their pre-edit values.
//!
//! Execution never re-validates types. Whatever `forward` is asked to run
//! was already proven consistent at edit time; a runtime violation of a
//! declared shape is a module bug and surfaces as
//! [`Error::UnexpectedTensorShape`] when debug assertions are enabled.

use log::{debug, trace};

use super::module::GraphModule;
use crate::error::Error;
use crate::model::fields::TypeState;
use crate::model::graph::{GraphState, Value};

/// An ordered, statically validated pipeline of graph modules.
pub struct SequentialNet {
    irreps_in: TypeState,
    irreps_out: TypeState,
    modules: Vec<(String, Box<dyn GraphModule>)>,
    debug_assertions: bool,
}

impl SequentialNet {
    /// Creates an empty network over the given initial type-state.
    pub fn new(initial: TypeState) -> Self {
        Self {
            irreps_out: initial.clone(),
            irreps_in: initial,
            modules: Vec::new(),
            debug_assertions: false,
        }
    }

    /// Enables runtime shape assertions after every stage.
    pub fn with_debug_assertions(mut self, enabled: bool) -> Self {
        self.debug_assertions = enabled;
        self
    }

    /// Number of modules in the pipeline.
    #[inline]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in execution order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|(name, _)| name.as_str())
    }

    /// The module registered under `name`, if present.
    pub fn get(&self, name: &str) -> Option<&dyn GraphModule> {
        self.position(name).map(|i| self.modules[i].1.as_ref())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.modules.iter().position(|(n, _)| n == name)
    }

    fn require_position(&self, name: &str) -> Result<usize, Error> {
        self.position(name)
            .ok_or_else(|| Error::UnknownModule(name.to_string()))
    }

    /// The accumulated type-state after the first `count` modules.
    fn type_state_after_prefix(&self, count: usize) -> TypeState {
        let mut state = self.irreps_in.clone();
        for (_, module) in &self.modules[..count] {
            state.merge(module.irreps_out());
        }
        state
    }

    /// The type-state a module inserted before `name` would see.
    pub fn type_state_before(&self, name: &str) -> Result<TypeState, Error> {
        Ok(self.type_state_after_prefix(self.require_position(name)?))
    }

    /// The type-state a module inserted after `name` would see.
    pub fn type_state_after(&self, name: &str) -> Result<TypeState, Error> {
        Ok(self.type_state_after_prefix(self.require_position(name)? + 1))
    }

    /// Validates a candidate ordering of modules against the initial
    /// type-state, returning the final accumulated state. The candidate is
    /// expressed as references so nothing is moved before the edit commits.
    fn validate_chain(
        initial: &TypeState,
        chain: &[(&str, &dyn GraphModule)],
    ) -> Result<TypeState, Error> {
        let mut state = initial.clone();
        for (name, module) in chain {
            state.satisfies(name, module.irreps_in())?;
            state.merge(module.irreps_out());
        }
        Ok(state)
    }

    /// A candidate chain with `module` spliced in at `at`.
    fn candidate_with<'a>(
        &'a self,
        at: usize,
        name: &'a str,
        module: &'a dyn GraphModule,
    ) -> Vec<(&'a str, &'a dyn GraphModule)> {
        let mut chain: Vec<(&str, &dyn GraphModule)> = Vec::with_capacity(self.modules.len() + 1);
        for (n, m) in &self.modules[..at] {
            chain.push((n.as_str(), m.as_ref()));
        }
        chain.push((name, module));
        for (n, m) in &self.modules[at..] {
            chain.push((n.as_str(), m.as_ref()));
        }
        chain
    }

    fn check_duplicate(&self, name: &str) -> Result<(), Error> {
        if self.position(name).is_some() {
            return Err(Error::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    /// Appends a module at the end of the pipeline.
    ///
    /// Validates the module's required inputs against the current
    /// accumulated type-state and merges its declared outputs on success.
    pub fn append(&mut self, name: &str, module: Box<dyn GraphModule>) -> Result<(), Error> {
        self.check_duplicate(name)?;
        self.irreps_out.satisfies(name, module.irreps_in())?;
        self.irreps_out.merge(module.irreps_out());
        debug!(
            "appended module '{}'; type-state now has {} fields",
            name,
            self.irreps_out.len()
        );
        self.modules.push((name.to_string(), module));
        Ok(())
    }

    /// Inserts a module immediately before `anchor`, re-validating every
    /// downstream module against the changed type-state. Fails atomically.
    pub fn insert_before(
        &mut self,
        anchor: &str,
        name: &str,
        module: Box<dyn GraphModule>,
    ) -> Result<(), Error> {
        let at = self.require_position(anchor)?;
        self.insert_at(at, name, module)
    }

    /// Inserts a module immediately after `anchor`, re-validating every
    /// downstream module against the changed type-state. Fails atomically.
    pub fn insert_after(
        &mut self,
        anchor: &str,
        name: &str,
        module: Box<dyn GraphModule>,
    ) -> Result<(), Error> {
        let at = self.require_position(anchor)? + 1;
        self.insert_at(at, name, module)
    }

    fn insert_at(&mut self, at: usize, name: &str, module: Box<dyn GraphModule>) -> Result<(), Error> {
        self.check_duplicate(name)?;
        let final_state =
            Self::validate_chain(&self.irreps_in, &self.candidate_with(at, name, module.as_ref()))?;
        debug!("inserted module '{}' at position {}", name, at);
        self.modules.insert(at, (name.to_string(), module));
        self.irreps_out = final_state;
        Ok(())
    }

    /// Replaces the module under `name` in place, re-validating the whole
    /// downstream chain. Fails atomically.
    pub fn replace(&mut self, name: &str, module: Box<dyn GraphModule>) -> Result<(), Error> {
        let at = self.require_position(name)?;
        let mut chain: Vec<(&str, &dyn GraphModule)> = Vec::with_capacity(self.modules.len());
        for (i, (n, m)) in self.modules.iter().enumerate() {
            if i == at {
                chain.push((n.as_str(), module.as_ref()));
            } else {
                chain.push((n.as_str(), m.as_ref()));
            }
        }
        let final_state = Self::validate_chain(&self.irreps_in, &chain)?;
        debug!("replaced module '{}'", name);
        self.modules[at].1 = module;
        self.irreps_out = final_state;
        Ok(())
    }

    /// Removes the module under `name`, re-validating all downstream
    /// modules against the reduced type-state.
    ///
    /// Fails (leaving the network unchanged) if a downstream module depends
    /// on a field only the removed module produced.
    pub fn delete(&mut self, name: &str) -> Result<(), Error> {
        let at = self.require_position(name)?;
        let mut chain: Vec<(&str, &dyn GraphModule)> = Vec::with_capacity(self.modules.len() - 1);
        for (i, (n, m)) in self.modules.iter().enumerate() {
            if i != at {
                chain.push((n.as_str(), m.as_ref()));
            }
        }
        let final_state = Self::validate_chain(&self.irreps_in, &chain)?;
        debug!("deleted module '{}'", name);
        self.modules.remove(at);
        self.irreps_out = final_state;
        Ok(())
    }

    /// Executes every module in order on one batch.
    pub fn forward(&self, state: GraphState) -> Result<GraphState, Error> {
        self.transform(state)
    }

    fn assert_declared_outputs(&self, name: &str, declared: &TypeState, state: &GraphState) -> Result<(), Error> {
        for (field, ty) in declared.iter() {
            let value = state.get(field).ok_or_else(|| {
                Error::unexpected_shape(field, format!("module '{}' did not produce it", name))
            })?;
            if let Some(irreps) = ty.as_irreps() {
                match value {
                    Value::Tensor(t) if t.ncols() == irreps.dim() => {}
                    Value::Tensor(t) => {
                        return Err(Error::unexpected_shape(
                            field,
                            format!(
                                "module '{}' produced {} columns where {} declares {}",
                                name,
                                t.ncols(),
                                irreps,
                                irreps.dim()
                            ),
                        ));
                    }
                    _ => {
                        return Err(Error::unexpected_shape(
                            field,
                            format!("module '{}' produced a non-tensor for a typed field", name),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

impl GraphModule for SequentialNet {
    fn irreps_in(&self) -> &TypeState {
        &self.irreps_in
    }

    fn irreps_out(&self) -> &TypeState {
        &self.irreps_out
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        for (name, module) in &self.modules {
            trace!("running module '{}'", name);
            state = module.transform(state)?;
            if self.debug_assertions {
                self.assert_declared_outputs(name, module.irreps_out(), &state)?;
            }
        }
        Ok(state)
    }
}
