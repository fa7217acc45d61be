//! Registry mapping module-type names to constructors.
//!
//! Config-driven instantiation goes through an explicit table instead of
//! any reflective lookup: a build plan's `type` strings resolve to plain
//! constructor functions, and out-of-tree physics modules join by calling
//! [`ModuleRegistry::register`] before the build.

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use super::context::BuildContext;
use crate::error::Error;
use crate::model::fields::TypeState;
use crate::nn::embedding::{
    EdgeVectors, OneHotAtomEncoding, RadialBasisEdgeEncoding, SphericalHarmonicEdgeAttrs,
};
use crate::nn::{AtomwiseLinear, AtomwiseReduce, GraphModule, PerSpeciesScaleShift, RadialConv};

/// Constructor signature resolved from a build plan's `type` string.
///
/// Receives the build context, the running type-state at the insertion
/// point, and the entry's free-form options table.
pub type ModuleConstructor =
    fn(&BuildContext, &TypeState, &toml::value::Table) -> Result<Box<dyn GraphModule>, Error>;

/// Deserializes a module's options table into its typed options struct.
pub fn parse_options<T: DeserializeOwned>(table: &toml::value::Table) -> Result<T, Error> {
    Ok(toml::Value::Table(table.clone()).try_into()?)
}

/// Name-to-constructor table for config-driven builds.
pub struct ModuleRegistry {
    constructors: HashMap<String, ModuleConstructor>,
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl ModuleRegistry {
    /// A registry with no entries.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// A registry holding every built-in module type.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("edge_vectors", |ctx, state, table| {
            let module = EdgeVectors::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry.register("spherical_harmonics", |ctx, state, table| {
            let module = SphericalHarmonicEdgeAttrs::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry.register("radial_basis", |ctx, state, table| {
            let module = RadialBasisEdgeEncoding::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry.register("one_hot", |ctx, state, table| {
            let module = OneHotAtomEncoding::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry.register("radial_conv", |ctx, state, table| {
            let module =
                RadialConv::new(state, ctx.schema(), parse_options(table)?, &mut ctx.rng())?;
            Ok(Box::new(module))
        });
        registry.register("atomwise_linear", |ctx, state, table| {
            let module =
                AtomwiseLinear::new(state, ctx.schema(), parse_options(table)?, &mut ctx.rng())?;
            Ok(Box::new(module))
        });
        registry.register("per_species_scale_shift", |ctx, state, table| {
            let module = PerSpeciesScaleShift::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry.register("atomwise_reduce", |ctx, state, table| {
            let module = AtomwiseReduce::new(state, ctx.schema(), parse_options(table)?)?;
            Ok(Box::new(module))
        });
        registry
    }

    /// Registers (or replaces) a constructor under a type name.
    pub fn register(&mut self, name: &str, constructor: ModuleConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    /// Resolves a type name, failing with [`Error::UnknownModuleType`].
    pub fn resolve(&self, name: &str) -> Result<ModuleConstructor, Error> {
        self.constructors
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownModuleType(name.to_string()))
    }

    /// Registered type names, unordered.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}
