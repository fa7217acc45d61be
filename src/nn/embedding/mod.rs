//! Encoders from raw graph inputs to typed feature fields.
//!
//! These modules sit at the front of a pipeline and turn the collated
//! inputs (positions, edge list, species) into the typed fields the rest
//! of the network consumes:
//!
//! - [`EdgeVectors`] — relative position vectors and distances per edge.
//! - [`SphericalHarmonicEdgeAttrs`] — angular edge attributes.
//! - [`RadialBasisEdgeEncoding`] — radial edge embedding.
//! - [`OneHotAtomEncoding`] — species one-hot node attributes.

mod edge_vectors;
mod one_hot;
mod radial;
mod spherical;

pub use edge_vectors::{EdgeVectors, EdgeVectorsOptions};
pub use one_hot::{OneHotAtomEncoding, OneHotOptions};
pub use radial::{RadialBasisEdgeEncoding, RadialBasisOptions};
pub use spherical::{AngularSpec, SphericalHarmonicEdgeAttrs, SphericalHarmonicOptions};
