//! A pure Rust library for assembling equivariant graph neural network
//! potentials. It composes symmetry-typed tensor-field operations over
//! atomic graphs into validated pipelines that predict per-atom energies
//! and, by reverse-mode differentiation, interatomic forces.
//!
//! # Features
//!
//! - **Symmetry-typed fields** — Every graph field carries a representation
//!   type (a direct sum of O(3) irreps such as `16x0e+8x1o`), registered in
//!   an explicit schema
//! - **Static pipeline validation** — The composer checks every module's
//!   required inputs against the accumulated type-state at edit time; type
//!   errors are impossible to reach at execution time
//! - **Config-driven assembly** — Declarative TOML build plans resolved
//!   through an extensible constructor registry, with atomic post-hoc
//!   insert/replace/delete by name
//! - **Derived outputs** — Decorators add gradients of scalar outputs
//!   (forces) and affine output rescaling without the inner pipeline's
//!   involvement
//!
//! # Quick Start
//!
//! The main entry point is the [`build_model`] function, which takes a TOML
//! build plan and a [`ModuleRegistry`] and produces a ready-to-run model:
//!
//! ```
//! use eqforge::{build_model, AtomicGraph, GraphBatch, GraphModule, ModuleRegistry};
//! use eqforge::neighbor_list;
//!
//! let plan = r#"
//!     seed = 7
//!
//!     [[modules]]
//!     name = "edges"
//!     type = "edge_vectors"
//!
//!     [[modules]]
//!     name = "species"
//!     type = "one_hot"
//!     num_species = 2
//!
//!     [[modules]]
//!     name = "radial"
//!     type = "radial_basis"
//!     r_max = 4.0
//!     num_basis = 8
//!
//!     [[modules]]
//!     name = "angular"
//!     type = "spherical_harmonics"
//!     lmax = 2
//!
//!     [[modules]]
//!     name = "interaction"
//!     type = "radial_conv"
//!     features = 16
//!
//!     [[modules]]
//!     name = "energy"
//!     type = "atomwise_linear"
//!     irreps_out = "1x0e"
//!     out_field = "atomic_energy"
//!
//!     [[modules]]
//!     name = "total"
//!     type = "atomwise_reduce"
//!
//!     [gradient]   # forces = -d(total_energy)/d(positions)
//! "#;
//! let model = build_model(plan, ModuleRegistry::with_builtins())?;
//!
//! // A water molecule: O at the origin, two H neighbors.
//! let positions = vec![
//!     [0.0, 0.0, 0.0],
//!     [0.9572, 0.0, 0.0],
//!     [-0.2400, 0.9266, 0.0],
//! ];
//! let edges = neighbor_list(&positions, 4.0);
//! let graph = AtomicGraph::new(positions, vec![0, 1, 1]).with_edges(edges);
//!
//! let out = model.transform(GraphBatch::collate(&[graph])?)?;
//! assert_eq!(out.tensor("total_energy")?.shape(), &[1, 1]);
//! assert_eq!(out.tensor("forces")?.shape(), &[3, 3]);
//! # Ok::<(), eqforge::Error>(())
//! ```
//!
//! # Module Organization
//!
//! - [`model`] — Representation types, field schema, type-state, atomic
//!   graphs, and neighbor search
//! - [`nn`] — Graph modules, the sequential composer, and the decorators
//! - [`builder`] — Build plans, the module registry, and config-driven
//!   assembly
//! - [`tensor`] — The bundled f64 CPU backend with gradient recording
//!
//! # Data Types
//!
//! ## Typing
//!
//! - [`Irreps`] — Direct sum of O(3) irreps; the type of a tensor field
//! - [`FieldType`] — An [`Irreps`] contract or the unconstrained marker
//! - [`FieldSchema`] — Registry from field name to representation type
//! - [`TypeState`] — Ordered field-to-type mapping threaded through
//!   composition
//!
//! ## Runtime
//!
//! - [`AtomicGraph`] — One structure: positions, species, edges
//! - [`GraphBatch`] — Collation of structures into one batch
//! - [`GraphState`] — Runtime field-to-value mapping for one batch
//!
//! ## Composition
//!
//! - [`GraphModule`] — The capability every pipeline stage implements
//! - [`SequentialNet`] — The validated, editable module pipeline
//! - [`ModuleRegistry`] / [`ModelBuilder`] / [`build_model`] — Declarative
//!   assembly
//!
//! The error taxonomy lives in [`Error`]; construction-time misuse
//! surfaces as [`Error::IrrepsMismatch`] and relatives, and a composed
//! model raises no type errors at execution time.

pub mod builder;
pub mod error;
pub mod model;
pub mod nn;
pub mod tensor;

pub use error::Error;

pub use model::fields::{FieldSchema, TypeState};
pub use model::graph::{AtomicGraph, GraphBatch, GraphState, Value};
pub use model::irreps::{FieldType, Irrep, Irreps, Parity};
pub use model::neighbors::neighbor_list;

pub use nn::{
    AtomwiseLinear, AtomwiseReduce, GradientOutput, GraphModule, PerSpeciesScaleShift, RadialConv,
    RescaleOutput, SequentialNet,
};

pub use builder::{
    build_model, BuildContext, GlobalOptions, ModelBuilder, ModelConfig, ModuleConstructor,
    ModuleRegistry, ModuleSpec,
};

pub use tensor::{Gradients, Tape, Tensor};
