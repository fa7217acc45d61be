//! Species one-hot node encoding.

use ndarray::Array2;
use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, NODE_ATTRS, NODE_FEATURES, SPECIES};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::{GraphModule, ModuleIrreps};
use crate::tensor::Tensor;

/// Options for [`OneHotAtomEncoding`].
#[derive(Debug, Clone, Deserialize)]
pub struct OneHotOptions {
    /// Number of distinct species. Species indices must be below this.
    pub num_species: usize,
}

/// Encodes species indices as one-hot rows.
///
/// Produces both the node attribute field (fixed per-atom context consumed
/// by later stages) and the initial node feature field, each of irreps
/// `num_species x 0e`.
#[derive(Debug)]
pub struct OneHotAtomEncoding {
    irreps: ModuleIrreps,
    num_species: usize,
}

impl OneHotAtomEncoding {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: OneHotOptions,
    ) -> Result<Self, Error> {
        if options.num_species == 0 {
            return Err(Error::invalid_option("one_hot", "num_species must be nonzero"));
        }

        let mut required = TypeState::new();
        required.insert(SPECIES, FieldType::Unconstrained);
        let mut produced = TypeState::new();
        let ty = FieldType::Irreps(Irreps::scalars(options.num_species));
        produced.insert(NODE_ATTRS, ty.clone());
        produced.insert(NODE_FEATURES, ty);

        Ok(Self {
            irreps: ModuleIrreps::new("one_hot", state, schema, required, produced)?,
            num_species: options.num_species,
        })
    }
}

impl GraphModule for OneHotAtomEncoding {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let species = state.index(SPECIES)?;
        let mut encoded = Array2::zeros((species.len(), self.num_species));
        for (atom, &s) in species.iter().enumerate() {
            if s >= self.num_species {
                return Err(Error::unexpected_shape(
                    SPECIES,
                    format!("species index {} exceeds num_species {}", s, self.num_species),
                ));
            }
            encoded[[atom, s]] = 1.0;
        }
        let encoded = Tensor::new(encoded);
        state.insert(NODE_ATTRS, Value::Tensor(encoded.clone()));
        state.insert(NODE_FEATURES, Value::Tensor(encoded));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn species_state(species: Vec<usize>) -> GraphState {
        let mut state = GraphState::new();
        state.insert(SPECIES, Value::Index(Rc::new(species)));
        state
    }

    fn species_types() -> TypeState {
        [(SPECIES, FieldType::Unconstrained)].into_iter().collect()
    }

    #[test]
    fn encodes_each_atom_once() {
        let schema = FieldSchema::default();
        let module =
            OneHotAtomEncoding::new(&species_types(), &schema, OneHotOptions { num_species: 3 })
                .unwrap();
        let out = module.transform(species_state(vec![0, 2, 1])).unwrap();

        let attrs = out.tensor(NODE_ATTRS).unwrap();
        assert_eq!(attrs.shape(), &[3, 3]);
        assert_eq!(attrs.data()[[0, 0]], 1.0);
        assert_eq!(attrs.data()[[1, 2]], 1.0);
        assert_eq!(attrs.data()[[2, 1]], 1.0);
        assert_eq!(attrs.data().sum(), 3.0);
        assert!(out.contains(NODE_FEATURES));
    }

    #[test]
    fn rejects_out_of_range_species_at_runtime() {
        let schema = FieldSchema::default();
        let module =
            OneHotAtomEncoding::new(&species_types(), &schema, OneHotOptions { num_species: 2 })
                .unwrap();
        let result = module.transform(species_state(vec![0, 5]));
        assert!(matches!(result, Err(Error::UnexpectedTensorShape { .. })));
    }

    #[test]
    fn construction_requires_species_field() {
        let schema = FieldSchema::default();
        let result =
            OneHotAtomEncoding::new(&TypeState::new(), &schema, OneHotOptions { num_species: 2 });
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn zero_species_is_rejected() {
        let schema = FieldSchema::default();
        let result =
            OneHotAtomEncoding::new(&species_types(), &schema, OneHotOptions { num_species: 0 });
        assert!(matches!(result, Err(Error::InvalidOption { .. })));
    }
}
