//! Core data structures for symmetry-typed atomic graphs.
//!
//! This module provides the foundational types that flow through `eqforge`:
//!
//! - [`irreps`] – Representation types: irreducible representations of
//!   O(3), their direct sums, and the unconstrained marker.
//! - [`fields`] – The field vocabulary, the schema registry, and the
//!   type-state threaded through composition.
//! - [`graph`] – Atomic structures, batch collation, and the runtime
//!   graph-state.
//! - [`neighbors`] – Grid-based cutoff neighbor enumeration.
//!
//! The data model intentionally separates construction-time typing
//! ([`TypeState`]) from runtime values ([`GraphState`]): the composition
//! layer decides correctness entirely on type-states before a single tensor
//! is touched.
//!
//! [`TypeState`]: fields::TypeState
//! [`GraphState`]: graph::GraphState

pub mod fields;
pub mod graph;
pub mod irreps;
pub mod neighbors;
