//! Build-plan configuration types.
//!
//! A model is described declaratively: global options, an ordered list of
//! `[[modules]]` entries, and optional decorator tables. The plan is
//! typically sourced from a TOML document:
//!
//! ```toml
//! model_debug_mode = true
//! seed = 1234
//!
//! [[modules]]
//! name = "edges"
//! type = "edge_vectors"
//!
//! [[modules]]
//! name = "radial"
//! type = "radial_basis"
//! r_max = 4.0
//! num_basis = 8
//!
//! [gradient]
//! of = "total_energy"
//! wrt = "positions"
//! ```
//!
//! Per-module keys beyond `name`/`type`/`before`/`after` are collected
//! verbatim and handed to the module constructor, which deserializes them
//! into its own typed options.

use serde::Deserialize;

use crate::error::Error;
use crate::nn::{GradientOptions, RescaleOptions};

fn default_dtype() -> String {
    "f64".to_string()
}

/// Cross-cutting options consumed outside any single module.
///
/// `model_debug_mode` enables runtime shape assertions in the composer and
/// `seed` fixes parameter initialization. The remaining knobs
/// (`default_dtype`, `allow_tf32`, `grad_anomaly_mode`, and the free-form
/// `[backend]` table) are stored and handed through to the numeric backend
/// without interpretation by the composition core; the bundled CPU backend
/// computes in f64.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalOptions {
    /// Assert declared shapes after every stage at runtime.
    pub model_debug_mode: bool,
    /// Floating-point precision requested from the backend.
    pub default_dtype: String,
    /// Allow TF32 matmul kernels on backends that have them.
    pub allow_tf32: bool,
    /// Reject non-finite gradients in the gradient decorator.
    pub grad_anomaly_mode: bool,
    /// Seed for parameter initialization.
    pub seed: u64,
    /// Opaque backend tuning table.
    pub backend: toml::value::Table,
}

impl Default for GlobalOptions {
    fn default() -> Self {
        Self {
            model_debug_mode: false,
            default_dtype: default_dtype(),
            allow_tf32: false,
            grad_anomaly_mode: false,
            seed: 0,
            backend: toml::value::Table::new(),
        }
    }
}

/// One build-plan entry: which module to construct, under what name, where.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleSpec {
    /// Unique module name within the pipeline.
    pub name: String,
    /// Module type resolved through the registry.
    #[serde(rename = "type")]
    pub module_type: String,
    /// Insert before this existing module instead of appending.
    #[serde(default)]
    pub before: Option<String>,
    /// Insert after this existing module instead of appending.
    #[serde(default)]
    pub after: Option<String>,
    /// Remaining keys, deserialized by the module's constructor.
    #[serde(flatten)]
    pub options: toml::value::Table,
}

/// A complete declarative build plan.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Cross-cutting options (top-level keys of the document).
    #[serde(flatten)]
    pub options: GlobalOptions,
    /// Additional schema-registered input fields beyond the collated
    /// defaults (e.g. `"edge_shifts"` for periodic data).
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Ordered module entries.
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
    /// Optional derived-gradient decorator around the finished pipeline.
    #[serde(default)]
    pub gradient: Option<GradientOptions>,
    /// Optional rescale decorator, applied outermost.
    #[serde(default)]
    pub rescale: Option<RescaleOptions>,
}

impl ModelConfig {
    /// Parses a build plan from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, Error> {
        Ok(toml::from_str(text)?)
    }
}
