//! Error types for model composition and execution.
//!
//! This module defines the error type used throughout the crate. Errors are
//! categorized by phase: schema registration, representation-type parsing,
//! module construction and composition (the load-bearing
//! [`IrrepsMismatch`](Error::IrrepsMismatch)), build-plan resolution, and
//! runtime contract violations.

use thiserror::Error;

/// Errors that can occur while assembling or executing a model.
///
/// Structural errors (everything except
/// [`UnexpectedTensorShape`](Error::UnexpectedTensorShape)) are raised at
/// build or edit time and abort the enclosing operation atomically: a failed
/// append, insert, replace, or delete leaves the composer exactly as it was.
/// Runtime errors propagate to the caller unchanged; there is no recovery
/// path inside the composition core.
#[derive(Debug, Error)]
pub enum Error {
    /// A field name was used that was never registered in the schema.
    #[error("field '{0}' is not registered in the field schema")]
    UnknownField(String),

    /// A field was re-registered with a conflicting representation type.
    ///
    /// Registering the identical type again is an idempotent no-op, and an
    /// `unconstrained` entry may be tightened to a concrete type; any other
    /// change is rejected.
    #[error("conflicting registration for field '{field}': registered as {existing}, requested {requested}")]
    SchemaConflict {
        /// The field being re-registered.
        field: String,
        /// Representation type already in the schema.
        existing: String,
        /// Representation type of the rejected registration.
        requested: String,
    },

    /// A module's required input is missing or type-incompatible, or one of
    /// its outputs would incompatibly overwrite an existing field.
    ///
    /// This is the dominant error of the composition core; it is raised at
    /// module construction and at every structural edit of a composer, never
    /// during execution.
    #[error("irreps mismatch in module '{module}' for field '{field}': {detail}")]
    IrrepsMismatch {
        /// Module being constructed or validated.
        module: String,
        /// Offending field.
        field: String,
        /// Description of the mismatch.
        detail: String,
    },

    /// A module name is already present in the composer.
    #[error("module name '{0}' is already present in the network")]
    DuplicateName(String),

    /// A structural edit names a module absent from the composer.
    #[error("no module named '{0}' in the network")]
    UnknownModule(String),

    /// A runtime tensor violates a statically validated contract.
    ///
    /// Indicates a bug in a module's `transform`, not a configuration
    /// problem: static validation has already accepted the declared types.
    #[error("graph state violates a validated contract for field '{field}': {detail}")]
    UnexpectedTensorShape {
        /// Offending field.
        field: String,
        /// Description of the violation.
        detail: String,
    },

    /// A gradient decorator names a field absent from the wrapped pipeline.
    #[error("gradient target '{field}' is unavailable: {detail}")]
    GradientTargetMissing {
        /// The missing or unusable field.
        field: String,
        /// Description of the problem.
        detail: String,
    },

    /// Failed to parse an irreps string such as `16x0e+8x1o`.
    #[error("failed to parse irreps: {0}")]
    IrrepsParse(String),

    /// A spherical-harmonics order beyond the implemented range.
    #[error("angular order {0} is not supported (edge attributes implement degrees 0 through 3)")]
    UnsupportedAngularOrder(u32),

    /// A build plan names a module type absent from the registry.
    #[error("unknown module type '{0}': not present in the module registry")]
    UnknownModuleType(String),

    /// Failed to deserialize build-plan TOML or per-module options.
    #[error("failed to parse model configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A per-module option has an invalid value.
    #[error("invalid option for module '{module}': {detail}")]
    InvalidOption {
        /// Module whose options are being resolved.
        module: String,
        /// Description of the problem.
        detail: String,
    },

    /// An atomic graph fails basic consistency checks.
    #[error("invalid atomic graph: {0}")]
    InvalidGraph(String),
}

impl Error {
    /// Creates an [`IrrepsMismatch`](Error::IrrepsMismatch) for a required
    /// input field that is absent from the type-state.
    pub fn irreps_missing(module: &str, field: &str) -> Self {
        Self::IrrepsMismatch {
            module: module.to_string(),
            field: field.to_string(),
            detail: "required input is not present in the type-state".to_string(),
        }
    }

    /// Creates an [`IrrepsMismatch`](Error::IrrepsMismatch) for a field
    /// whose representation type differs from what the module expects.
    pub fn irreps_incompatible(
        module: &str,
        field: &str,
        expected: impl std::fmt::Display,
        found: impl std::fmt::Display,
    ) -> Self {
        Self::IrrepsMismatch {
            module: module.to_string(),
            field: field.to_string(),
            detail: format!("expected {}, found {}", expected, found),
        }
    }

    /// Creates a [`SchemaConflict`](Error::SchemaConflict) error.
    pub fn schema_conflict(
        field: &str,
        existing: impl std::fmt::Display,
        requested: impl std::fmt::Display,
    ) -> Self {
        Self::SchemaConflict {
            field: field.to_string(),
            existing: existing.to_string(),
            requested: requested.to_string(),
        }
    }

    /// Creates an [`UnexpectedTensorShape`](Error::UnexpectedTensorShape)
    /// error.
    pub fn unexpected_shape(field: &str, detail: impl Into<String>) -> Self {
        Self::UnexpectedTensorShape {
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Creates a [`GradientTargetMissing`](Error::GradientTargetMissing)
    /// error.
    pub fn gradient_target(field: &str, detail: impl Into<String>) -> Self {
        Self::GradientTargetMissing {
            field: field.to_string(),
            detail: detail.into(),
        }
    }

    /// Creates an [`InvalidOption`](Error::InvalidOption) error.
    pub fn invalid_option(module: &str, detail: impl Into<String>) -> Self {
        Self::InvalidOption {
            module: module.to_string(),
            detail: detail.into(),
        }
    }
}
