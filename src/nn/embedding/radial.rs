//! Radial edge embedding: Bessel basis with a polynomial cutoff envelope.

use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, EDGE_EMBEDDING, EDGE_LENGTHS};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::{GraphModule, ModuleIrreps};
use crate::tensor::Tensor;

fn default_num_basis() -> usize {
    8
}

fn default_envelope_power() -> u32 {
    6
}

/// Options for [`RadialBasisEdgeEncoding`].
#[derive(Debug, Clone, Deserialize)]
pub struct RadialBasisOptions {
    /// Cutoff radius. Edges beyond it embed to zero.
    pub r_max: f64,
    /// Number of Bessel basis functions.
    #[serde(default = "default_num_basis")]
    pub num_basis: usize,
    /// Power of the polynomial cutoff envelope.
    #[serde(default = "default_envelope_power")]
    pub p: u32,
}

/// Embeds edge distances in a smooth radial basis.
///
/// The basis functions are `b_n(r) = sqrt(2 / r_max) * sin(n pi r / r_max) / r`
/// for `n = 1..=num_basis`, multiplied by a polynomial envelope of power `p`
/// that decays smoothly to zero at `r_max`. Requires the edge length field
/// and produces an edge embedding of irreps `num_basis x 0e`.
#[derive(Debug)]
pub struct RadialBasisEdgeEncoding {
    irreps: ModuleIrreps,
    r_max: f64,
    num_basis: usize,
    p: u32,
}

impl RadialBasisEdgeEncoding {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: RadialBasisOptions,
    ) -> Result<Self, Error> {
        if !(options.r_max > 0.0) {
            return Err(Error::invalid_option(
                "radial_basis",
                format!("r_max must be positive, got {}", options.r_max),
            ));
        }
        if options.num_basis == 0 {
            return Err(Error::invalid_option("radial_basis", "num_basis must be nonzero"));
        }

        let mut required = TypeState::new();
        required.insert(EDGE_LENGTHS, FieldType::Irreps(Irreps::scalars(1)));
        let mut produced = TypeState::new();
        produced.insert(
            EDGE_EMBEDDING,
            FieldType::Irreps(Irreps::scalars(options.num_basis)),
        );

        Ok(Self {
            irreps: ModuleIrreps::new("radial_basis", state, schema, required, produced)?,
            r_max: options.r_max,
            num_basis: options.num_basis,
            p: options.p,
        })
    }

    /// The smooth envelope `u(x)` with `x = r / r_max`: equals 1 at `x = 0`,
    /// reaches 0 with `p - 1` vanishing derivatives at `x = 1`.
    fn envelope(&self, r: &Tensor) -> Tensor {
        let p = self.p as f64;
        let x = r.scale(1.0 / self.r_max);
        let c0 = (p + 1.0) * (p + 2.0) / 2.0;
        let c1 = p * (p + 2.0);
        let c2 = p * (p + 1.0) / 2.0;
        let poly = x
            .powi(self.p as i32)
            .scale(-c0)
            .add(&x.powi(self.p as i32 + 1).scale(c1))
            .add(&x.powi(self.p as i32 + 2).scale(-c2))
            .shift(1.0);
        // Hard zero beyond the cutoff; constant mask, no gradient.
        let mask = Tensor::from_dyn(
            r.data().mapv(|v| if v < self.r_max { 1.0 } else { 0.0 }),
        );
        poly.mul(&mask)
    }
}

impl GraphModule for RadialBasisEdgeEncoding {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let r = state.tensor(EDGE_LENGTHS)?;

        let waves: Vec<Tensor> = (1..=self.num_basis)
            .map(|n| r.scale(n as f64 * std::f64::consts::PI / self.r_max).sin())
            .collect();
        let basis = Tensor::concat_cols(&waves)
            .div(r)
            .scale((2.0 / self.r_max).sqrt());
        let embedding = basis.mul(&self.envelope(r));

        state.insert(EDGE_EMBEDDING, Value::Tensor(embedding));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths_state(values: &[f64]) -> (TypeState, GraphState) {
        let mut types = TypeState::new();
        types.insert(EDGE_LENGTHS, FieldType::Irreps(Irreps::scalars(1)));
        let mut state = GraphState::new();
        state.insert(EDGE_LENGTHS, Value::Tensor(Tensor::from_scalars(values)));
        (types, state)
    }

    fn options(r_max: f64, num_basis: usize) -> RadialBasisOptions {
        RadialBasisOptions {
            r_max,
            num_basis,
            p: default_envelope_power(),
        }
    }

    #[test]
    fn construction_validates_options() {
        let schema = FieldSchema::default();
        let (types, _) = lengths_state(&[1.0]);
        assert!(matches!(
            RadialBasisEdgeEncoding::new(&types, &schema, options(0.0, 8)),
            Err(Error::InvalidOption { .. })
        ));
        assert!(matches!(
            RadialBasisEdgeEncoding::new(&types, &schema, options(4.0, 0)),
            Err(Error::InvalidOption { .. })
        ));
        assert!(matches!(
            RadialBasisEdgeEncoding::new(&TypeState::new(), &schema, options(4.0, 8)),
            Err(Error::IrrepsMismatch { .. })
        ));
    }

    #[test]
    fn embedding_width_matches_basis_size() {
        let schema = FieldSchema::default();
        let (types, state) = lengths_state(&[1.0, 2.0, 3.0]);
        let module = RadialBasisEdgeEncoding::new(&types, &schema, options(4.0, 6)).unwrap();
        let out = module.transform(state).unwrap();
        assert_eq!(out.tensor(EDGE_EMBEDDING).unwrap().shape(), &[3, 6]);
    }

    #[test]
    fn first_basis_function_matches_closed_form() {
        let schema = FieldSchema::default();
        let r_max = 4.0;
        let r = 1.3;
        let (types, state) = lengths_state(&[r]);
        let module = RadialBasisEdgeEncoding::new(&types, &schema, options(r_max, 3)).unwrap();
        let out = module.transform(state).unwrap();
        let embedding = out.tensor(EDGE_EMBEDDING).unwrap();

        let x = r / r_max;
        let p = 6.0;
        let envelope = 1.0 - (p + 1.0) * (p + 2.0) / 2.0 * x.powi(6)
            + p * (p + 2.0) * x.powi(7)
            - p * (p + 1.0) / 2.0 * x.powi(8);
        let b1 = (2.0 / r_max).sqrt() * (std::f64::consts::PI * r / r_max).sin() / r;
        assert!((embedding.data()[[0, 0]] - b1 * envelope).abs() < 1e-12);
    }

    #[test]
    fn embedding_vanishes_at_and_beyond_cutoff() {
        let schema = FieldSchema::default();
        let (types, state) = lengths_state(&[4.0, 5.5]);
        let module = RadialBasisEdgeEncoding::new(&types, &schema, options(4.0, 4)).unwrap();
        let out = module.transform(state).unwrap();
        let embedding = out.tensor(EDGE_EMBEDDING).unwrap();
        for row in 0..2 {
            for col in 0..4 {
                assert!(embedding.data()[[row, col]].abs() < 1e-12);
            }
        }
    }

    #[test]
    fn envelope_is_one_at_origin() {
        let schema = FieldSchema::default();
        let (types, _) = lengths_state(&[1.0]);
        let module = RadialBasisEdgeEncoding::new(&types, &schema, options(4.0, 4)).unwrap();
        let env = module.envelope(&Tensor::from_scalars(&[0.0]));
        assert!((env.data()[[0, 0]] - 1.0).abs() < 1e-12);
    }
}
