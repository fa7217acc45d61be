//! Continuous-filter scalar convolution over radial edge features.

use rand::rngs::StdRng;
use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, EDGE_EMBEDDING, EDGE_INDEX, NODE_FEATURES};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::atomwise::{scalar_field_irreps, xavier_uniform};
use crate::nn::module::{GraphModule, ModuleIrreps};
use crate::tensor::Tensor;
use std::rc::Rc;

fn default_field() -> String {
    NODE_FEATURES.to_string()
}

fn default_activation() -> bool {
    true
}

/// Options for [`RadialConv`].
#[derive(Debug, Clone, Deserialize)]
pub struct RadialConvOptions {
    /// Output feature channels.
    pub features: usize,
    /// Scalar feature field to read.
    #[serde(default = "default_field")]
    pub field: String,
    /// Output field; defaults to overwriting the input field.
    #[serde(default)]
    pub out_field: Option<String>,
    /// Apply a SiLU nonlinearity to the result.
    #[serde(default = "default_activation")]
    pub activation: bool,
}

/// Scalar message passing with radially modulated filters.
///
/// Each atom receives the sum of its neighbors' transformed features,
/// weighted channel-wise by a linear map of the edge's radial embedding,
/// plus a transformed self contribution:
///
/// ```text
/// out_i = silu( x_i W_self + sum_j (x_j W_neigh) * (e_ij W_radial) )
/// ```
///
/// All fields involved are invariant scalars, so the result is trivially
/// equivariant. Directional message passing built on irreducible tensor
/// products is deliberately not part of this crate.
#[derive(Debug)]
pub struct RadialConv {
    irreps: ModuleIrreps,
    field: String,
    out_field: String,
    activation: bool,
    w_self: Tensor,
    w_neigh: Tensor,
    w_radial: Tensor,
}

impl RadialConv {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: RadialConvOptions,
        rng: &mut StdRng,
    ) -> Result<Self, Error> {
        if options.features == 0 {
            return Err(Error::invalid_option("radial_conv", "features must be nonzero"));
        }
        let in_irreps = scalar_field_irreps("radial_conv", state, &options.field)?;
        let radial_irreps = scalar_field_irreps("radial_conv", state, EDGE_EMBEDDING)?;
        let out_field = options.out_field.unwrap_or_else(|| options.field.clone());

        let mut required = TypeState::new();
        required.insert(&options.field, FieldType::Irreps(in_irreps.clone()));
        required.insert(EDGE_EMBEDDING, FieldType::Irreps(radial_irreps.clone()));
        required.insert(EDGE_INDEX, FieldType::Unconstrained);
        let mut produced = TypeState::new();
        produced.insert(&out_field, FieldType::Irreps(Irreps::scalars(options.features)));

        let f_in = in_irreps.dim();
        Ok(Self {
            irreps: ModuleIrreps::new("radial_conv", state, schema, required, produced)?,
            field: options.field,
            out_field,
            activation: options.activation,
            w_self: xavier_uniform(f_in, options.features, rng),
            w_neigh: xavier_uniform(f_in, options.features, rng),
            w_radial: xavier_uniform(radial_irreps.dim(), options.features, rng),
        })
    }
}

impl GraphModule for RadialConv {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let features = state.tensor(&self.field)?;
        let embedding = state.tensor(EDGE_EMBEDDING)?;
        let edges = state.edges(EDGE_INDEX)?;
        let centers: Rc<Vec<usize>> = Rc::new(edges.iter().map(|e| e[0]).collect());
        let neighbors: Rc<Vec<usize>> = Rc::new(edges.iter().map(|e| e[1]).collect());

        let filters = embedding.matmul(&self.w_radial);
        let messages = features.gather(&neighbors).matmul(&self.w_neigh).mul(&filters);
        let gathered = messages.segment_sum(&centers, features.nrows());

        let mut out = features.matmul(&self.w_self).add(&gathered);
        if self.activation {
            out = out.silu();
        }
        state.insert(&self.out_field, Value::Tensor(out));
        Ok(state)
    }
}
