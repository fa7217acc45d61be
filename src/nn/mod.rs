//! Graph modules and their composition.
//!
//! This is the composition core of the crate:
//!
//! - [`GraphModule`] — the capability every pipeline stage implements.
//! - [`SequentialNet`] — the composer: an ordered pipeline whose type
//!   compatibility is fully decided at structural-edit time.
//! - [`embedding`] — encoders from raw inputs to typed fields.
//! - [`RadialConv`] — scalar message passing over radial filters.
//! - Atomwise heads ([`AtomwiseLinear`], [`PerSpeciesScaleShift`],
//!   [`AtomwiseReduce`]) — per-atom outputs and batch reduction.
//! - Decorators ([`GradientOutput`], [`RescaleOutput`]) — modules that
//!   wrap an inner pipeline and post-process its outputs.

pub mod atomwise;
pub mod conv;
pub mod embedding;
pub mod grad;
pub mod module;
pub mod rescale;
pub mod sequential;

pub use atomwise::{
    AtomwiseLinear, AtomwiseReduce, LinearOptions, PerSpeciesOptions, PerSpeciesScaleShift,
    ReduceOptions,
};
pub use conv::{RadialConv, RadialConvOptions};
pub use grad::{GradientOptions, GradientOutput};
pub use module::{GraphModule, ModuleIrreps};
pub use rescale::{RescaleOptions, RescaleOutput};
pub use sequential::SequentialNet;
