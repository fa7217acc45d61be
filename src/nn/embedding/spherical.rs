//! Spherical-harmonic edge attributes.

use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, EDGE_ATTRS, EDGE_VECTORS};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::{GraphModule, ModuleIrreps};
use crate::tensor::Tensor;

/// Highest implemented angular degree.
const LMAX_SUPPORTED: u32 = 3;

/// Angular resolution of the edge attributes: a maximum degree, or an
/// explicit irreps string that must spell out a spherical-harmonics sum
/// such as `"1x0e+1x1o+1x2e"`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AngularSpec {
    Order(u32),
    Irreps(String),
}

impl Default for AngularSpec {
    fn default() -> Self {
        AngularSpec::Order(2)
    }
}

impl AngularSpec {
    fn resolve(&self) -> Result<u32, Error> {
        let lmax = match self {
            AngularSpec::Order(l) => *l,
            AngularSpec::Irreps(s) => {
                let irreps: Irreps = s.parse()?;
                let lmax = match irreps.lmax() {
                    Some(l) => l,
                    None => return Err(Error::IrrepsParse(format!("empty irreps '{}'", s))),
                };
                if irreps != Irreps::spherical_harmonics(lmax) {
                    return Err(Error::invalid_option(
                        "spherical_harmonics",
                        format!("'{}' is not a spherical-harmonics direct sum", s),
                    ));
                }
                lmax
            }
        };
        if lmax > LMAX_SUPPORTED {
            return Err(Error::UnsupportedAngularOrder(lmax));
        }
        Ok(lmax)
    }
}

/// Options for [`SphericalHarmonicEdgeAttrs`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SphericalHarmonicOptions {
    /// Angular resolution (maximum degree, or an explicit irreps string).
    pub lmax: AngularSpec,
    /// Evaluate on unit vectors. Disable only when inputs are already
    /// normalized.
    pub normalize: Option<bool>,
}

/// Projects edge vectors onto real spherical harmonics.
///
/// Requires the edge vector field and produces the edge attribute field
/// with irreps `1x0e+1x1o+...` up to the configured degree. Components use
/// the real basis ordered `m = -l..l` within each degree, scaled so that
/// every degree block has squared norm `2l + 1` on the unit sphere.
///
/// Degrees are hardcoded up to `l = 3`; construction rejects higher orders.
#[derive(Debug)]
pub struct SphericalHarmonicEdgeAttrs {
    irreps: ModuleIrreps,
    lmax: u32,
    normalize: bool,
}

impl SphericalHarmonicEdgeAttrs {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: SphericalHarmonicOptions,
    ) -> Result<Self, Error> {
        let lmax = options.lmax.resolve()?;

        let mut required = TypeState::new();
        required.insert(EDGE_VECTORS, FieldType::Irreps(Irreps::vector()));
        let mut produced = TypeState::new();
        produced.insert(
            EDGE_ATTRS,
            FieldType::Irreps(Irreps::spherical_harmonics(lmax)),
        );

        Ok(Self {
            irreps: ModuleIrreps::new("spherical_harmonics", state, schema, required, produced)?,
            lmax,
            normalize: options.normalize.unwrap_or(true),
        })
    }
}

impl GraphModule for SphericalHarmonicEdgeAttrs {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let vectors = state.tensor(EDGE_VECTORS)?;
        let attrs = if self.normalize {
            let norm = vectors.powi(2).sum_last().sqrt();
            real_spherical_harmonics(&vectors.div(&norm), self.lmax)
        } else {
            real_spherical_harmonics(vectors, self.lmax)
        };
        state.insert(EDGE_ATTRS, Value::Tensor(attrs));
        Ok(state)
    }
}

/// Evaluates the real spherical harmonics of degrees `0..=lmax` on unit
/// vectors, one row per input row.
///
/// Written entirely in terms of recorded tensor primitives so that
/// reverse-mode differentiation through the angular features comes from the
/// tape, with no hand-derived Jacobians.
fn real_spherical_harmonics(u: &Tensor, lmax: u32) -> Tensor {
    let x = u.slice_cols(0, 1);
    let y = u.slice_cols(1, 1);
    let z = u.slice_cols(2, 1);

    let mut blocks = vec![Tensor::ones(u.nrows(), 1)];

    if lmax >= 1 {
        let c1 = 3.0_f64.sqrt();
        blocks.push(y.scale(c1));
        blocks.push(z.scale(c1));
        blocks.push(x.scale(c1));
    }

    if lmax >= 2 {
        let c2 = 15.0_f64.sqrt();
        let z2 = z.powi(2);
        blocks.push(x.mul(&y).scale(c2));
        blocks.push(y.mul(&z).scale(c2));
        blocks.push(z2.scale(3.0).shift(-1.0).scale(5.0_f64.sqrt() / 2.0));
        blocks.push(x.mul(&z).scale(c2));
        blocks.push(x.powi(2).sub(&y.powi(2)).scale(c2 / 2.0));
    }

    if lmax >= 3 {
        let x2 = x.powi(2);
        let y2 = y.powi(2);
        let z2 = z.powi(2);
        let c30 = (35.0_f64 / 8.0).sqrt();
        let c31 = (21.0_f64 / 8.0).sqrt();
        blocks.push(y.mul(&x2.scale(3.0).sub(&y2)).scale(c30));
        blocks.push(x.mul(&y).mul(&z).scale(105.0_f64.sqrt()));
        blocks.push(y.mul(&z2.scale(5.0).shift(-1.0)).scale(c31));
        blocks.push(z.mul(&z2.scale(5.0).shift(-3.0)).scale(7.0_f64.sqrt() / 2.0));
        blocks.push(x.mul(&z2.scale(5.0).shift(-1.0)).scale(c31));
        blocks.push(z.mul(&x2.sub(&y2)).scale(105.0_f64.sqrt() / 2.0));
        blocks.push(x.mul(&x2.sub(&y2.scale(3.0))).scale(c30));
    }

    Tensor::concat_cols(&blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::graph::{AtomicGraph, GraphBatch};
    use crate::nn::embedding::{EdgeVectors, EdgeVectorsOptions};

    fn attrs_for(direction: [f64; 3], lmax: u32) -> Vec<f64> {
        let schema = FieldSchema::default();
        let edges = EdgeVectors::new(&TypeState::initial(), &schema, EdgeVectorsOptions::default())
            .unwrap();
        let mut state = TypeState::initial();
        state.merge(edges.irreps_out());
        let sh = SphericalHarmonicEdgeAttrs::new(
            &state,
            &schema,
            SphericalHarmonicOptions {
                lmax: AngularSpec::Order(lmax),
                normalize: Some(true),
            },
        )
        .unwrap();

        let graph = AtomicGraph::new(vec![[0.0, 0.0, 0.0], direction], vec![0, 0])
            .with_edges(vec![[0, 1]]);
        let out = sh
            .transform(edges.transform(GraphBatch::collate(&[graph]).unwrap()).unwrap())
            .unwrap();
        let attrs = out.tensor(EDGE_ATTRS).unwrap();
        attrs.data().iter().copied().collect()
    }

    #[test]
    fn output_width_matches_declared_irreps() {
        for lmax in 0..=3 {
            let attrs = attrs_for([1.0, 2.0, 3.0], lmax);
            assert_eq!(attrs.len(), Irreps::spherical_harmonics(lmax).dim());
        }
    }

    #[test]
    fn pole_values_follow_component_normalization() {
        // Along +z only the m = 0 components are nonzero, with value
        // sqrt(2l + 1).
        let attrs = attrs_for([0.0, 0.0, 2.5], 3);
        let expected = [
            1.0,
            0.0,
            3.0_f64.sqrt(),
            0.0,
            0.0,
            0.0,
            5.0_f64.sqrt(),
            0.0,
            0.0,
            0.0,
            0.0,
            0.0,
            7.0_f64.sqrt(),
            0.0,
            0.0,
            0.0,
        ];
        for (got, want) in attrs.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{} != {}", got, want);
        }
    }

    #[test]
    fn block_norms_are_rotation_invariant() {
        // Each degree block has squared norm 2l + 1 on the unit sphere,
        // regardless of direction.
        for direction in [[1.0, 0.0, 0.0], [0.3, -0.8, 0.5], [-2.0, 1.0, 4.0]] {
            let attrs = attrs_for(direction, 3);
            let mut offset = 0;
            for l in 0..=3u32 {
                let dim = 2 * l as usize + 1;
                let norm_sq: f64 = attrs[offset..offset + dim].iter().map(|v| v * v).sum();
                assert!(
                    (norm_sq - (2.0 * l as f64 + 1.0)).abs() < 1e-10,
                    "degree {} block norm {} for direction {:?}",
                    l,
                    norm_sq,
                    direction
                );
                offset += dim;
            }
        }
    }

    #[test]
    fn degree_one_block_is_the_unit_vector() {
        let attrs = attrs_for([3.0, 0.0, 4.0], 1);
        let c = 3.0_f64.sqrt();
        assert!((attrs[1] - 0.0).abs() < 1e-12);
        assert!((attrs[2] - c * 0.8).abs() < 1e-12);
        assert!((attrs[3] - c * 0.6).abs() < 1e-12);
    }

    #[test]
    fn accepts_explicit_irreps_string() {
        let spec = AngularSpec::Irreps("1x0e+1x1o+1x2e".to_string());
        assert_eq!(spec.resolve().unwrap(), 2);
    }

    #[test]
    fn rejects_non_harmonic_irreps_string() {
        let spec = AngularSpec::Irreps("2x0e+1x1o".to_string());
        assert!(matches!(spec.resolve(), Err(Error::InvalidOption { .. })));
    }

    #[test]
    fn rejects_unsupported_order() {
        assert!(matches!(
            AngularSpec::Order(4).resolve(),
            Err(Error::UnsupportedAngularOrder(4))
        ));
    }

    #[test]
    fn declared_outputs_match_requested_order() {
        let schema = FieldSchema::default();
        let mut state = TypeState::initial();
        state.insert(EDGE_VECTORS, FieldType::Irreps(Irreps::vector()));
        let module = SphericalHarmonicEdgeAttrs::new(
            &state,
            &schema,
            SphericalHarmonicOptions {
                lmax: AngularSpec::Order(2),
                normalize: None,
            },
        )
        .unwrap();
        assert_eq!(
            module.irreps_out().get(EDGE_ATTRS),
            Some(&FieldType::Irreps(Irreps::spherical_harmonics(2)))
        );
    }

    #[test]
    fn construction_fails_without_edge_vectors() {
        let schema = FieldSchema::default();
        let result = SphericalHarmonicEdgeAttrs::new(
            &TypeState::new(),
            &schema,
            SphericalHarmonicOptions::default(),
        );
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }
}
