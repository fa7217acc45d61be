//! Relative position vectors per edge.

use std::rc::Rc;

use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{
    FieldSchema, TypeState, EDGE_INDEX, EDGE_LENGTHS, EDGE_SHIFTS, EDGE_VECTORS, POSITIONS,
};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::{GraphModule, ModuleIrreps};

/// Options for [`EdgeVectors`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EdgeVectorsOptions {
    /// Add per-edge periodic shift vectors to the displacement. When set,
    /// the shift field becomes a required input.
    pub use_shifts: bool,
}

/// Computes per-edge displacement vectors and distances.
///
/// For each edge `(center, neighbor)` the displacement is
/// `r_neighbor - r_center`, plus the periodic shift vector when
/// [`use_shifts`](EdgeVectorsOptions::use_shifts) is set. Produces the edge
/// vector field (`1x1o`) and the edge length field (`1x0e`).
///
/// Gradients flow from both outputs back to the positions, which is what
/// lets a gradient decorator differentiate a downstream energy with respect
/// to atomic coordinates.
#[derive(Debug)]
pub struct EdgeVectors {
    irreps: ModuleIrreps,
    use_shifts: bool,
}

impl EdgeVectors {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: EdgeVectorsOptions,
    ) -> Result<Self, Error> {
        let mut required = TypeState::new();
        required.insert(POSITIONS, FieldType::Irreps(Irreps::vector()));
        required.insert(EDGE_INDEX, FieldType::Unconstrained);
        if options.use_shifts {
            required.insert(EDGE_SHIFTS, FieldType::Irreps(Irreps::vector()));
        }
        let mut produced = TypeState::new();
        produced.insert(EDGE_VECTORS, FieldType::Irreps(Irreps::vector()));
        produced.insert(EDGE_LENGTHS, FieldType::Irreps(Irreps::scalars(1)));

        Ok(Self {
            irreps: ModuleIrreps::new("edge_vectors", state, schema, required, produced)?,
            use_shifts: options.use_shifts,
        })
    }
}

impl GraphModule for EdgeVectors {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let positions = state.tensor(POSITIONS)?;
        let edges = state.edges(EDGE_INDEX)?;
        let centers: Rc<Vec<usize>> = Rc::new(edges.iter().map(|e| e[0]).collect());
        let neighbors: Rc<Vec<usize>> = Rc::new(edges.iter().map(|e| e[1]).collect());

        let mut vectors = positions.gather(&neighbors).sub(&positions.gather(&centers));
        if self.use_shifts {
            vectors = vectors.add(state.tensor(EDGE_SHIFTS)?);
        }
        let lengths = vectors.powi(2).sum_last().sqrt();

        state.insert(EDGE_VECTORS, Value::Tensor(vectors));
        state.insert(EDGE_LENGTHS, Value::Tensor(lengths));
        Ok(state)
    }
}
