//! Per-atom output heads: linear maps, per-species affine, batch reduction.

use ndarray::Array2;
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::StdRng;
use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, ATOMIC_ENERGY, BATCH, NODE_FEATURES, SPECIES, TOTAL_ENERGY};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::{GraphModule, ModuleIrreps};
use crate::tensor::Tensor;

/// Looks up a scalar-typed field in the running type-state, returning its
/// irreps. Shared by the heads in this module, which operate on invariant
/// channels only.
pub(crate) fn scalar_field_irreps(
    module: &str,
    state: &TypeState,
    field: &str,
) -> Result<Irreps, Error> {
    let ty = state
        .get(field)
        .ok_or_else(|| Error::irreps_missing(module, field))?;
    match ty.as_irreps() {
        Some(irreps) if irreps.is_scalar() => Ok(irreps.clone()),
        Some(irreps) => Err(Error::irreps_incompatible(module, field, "scalars (0e)", irreps)),
        None => Err(Error::irreps_incompatible(
            module,
            field,
            "scalars (0e)",
            "unconstrained",
        )),
    }
}

/// Xavier-uniform weight initialization.
pub(crate) fn xavier_uniform(fan_in: usize, fan_out: usize, rng: &mut StdRng) -> Tensor {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Tensor::new(Array2::random_using(
        (fan_in, fan_out),
        Uniform::new(-bound, bound),
        rng,
    ))
}

fn default_features_field() -> String {
    NODE_FEATURES.to_string()
}

fn default_energy_field() -> String {
    ATOMIC_ENERGY.to_string()
}

fn default_total_field() -> String {
    TOTAL_ENERGY.to_string()
}

fn default_reduce() -> String {
    "sum".to_string()
}

/// Options for [`AtomwiseLinear`].
#[derive(Debug, Clone, Deserialize)]
pub struct LinearOptions {
    /// Scalar feature field to read.
    #[serde(default = "default_features_field")]
    pub field: String,
    /// Output field; defaults to overwriting the input field.
    #[serde(default)]
    pub out_field: Option<String>,
    /// Output irreps string; must be all scalars, e.g. `"16x0e"`.
    pub irreps_out: String,
}

/// Per-atom linear map between scalar feature fields.
///
/// Mixes the invariant channels of one field through a xavier-initialized
/// weight matrix. Inputs and outputs are restricted to scalar irreps;
/// mixing higher-degree blocks belongs to the equivariant tensor-product
/// algebra, which this crate treats as out of scope.
#[derive(Debug)]
pub struct AtomwiseLinear {
    irreps: ModuleIrreps,
    field: String,
    out_field: String,
    weight: Tensor,
}

impl AtomwiseLinear {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: LinearOptions,
        rng: &mut StdRng,
    ) -> Result<Self, Error> {
        let in_irreps = scalar_field_irreps("atomwise_linear", state, &options.field)?;
        let out_irreps: Irreps = options.irreps_out.parse()?;
        if !out_irreps.is_scalar() {
            return Err(Error::irreps_incompatible(
                "atomwise_linear",
                &options.field,
                "scalar output irreps",
                &out_irreps,
            ));
        }
        let out_field = options.out_field.unwrap_or_else(|| options.field.clone());

        let mut required = TypeState::new();
        required.insert(&options.field, FieldType::Irreps(in_irreps.clone()));
        let mut produced = TypeState::new();
        produced.insert(&out_field, FieldType::Irreps(out_irreps.clone()));

        let weight = xavier_uniform(in_irreps.dim(), out_irreps.dim(), rng);
        Ok(Self {
            irreps: ModuleIrreps::new("atomwise_linear", state, schema, required, produced)?,
            field: options.field,
            out_field,
            weight,
        })
    }
}

impl GraphModule for AtomwiseLinear {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let features = state.tensor(&self.field)?;
        let out = features.matmul(&self.weight);
        state.insert(&self.out_field, Value::Tensor(out));
        Ok(state)
    }
}

/// Options for [`PerSpeciesScaleShift`].
#[derive(Debug, Clone, Deserialize)]
pub struct PerSpeciesOptions {
    /// Scalar per-atom field to rescale.
    #[serde(default = "default_energy_field")]
    pub field: String,
    /// Output field; defaults to overwriting the input field.
    #[serde(default)]
    pub out_field: Option<String>,
    /// Multiplicative factor per species.
    pub scales: Vec<f64>,
    /// Additive offset per species.
    pub shifts: Vec<f64>,
}

/// Applies a per-species affine transform to a scalar per-atom field.
///
/// Each atom's row is multiplied by its species' scale and offset by its
/// species' shift: the standard way fitted per-element energy references
/// enter a model.
#[derive(Debug)]
pub struct PerSpeciesScaleShift {
    irreps: ModuleIrreps,
    field: String,
    out_field: String,
    scales: Vec<f64>,
    shifts: Vec<f64>,
}

impl PerSpeciesScaleShift {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: PerSpeciesOptions,
    ) -> Result<Self, Error> {
        if options.scales.len() != options.shifts.len() || options.scales.is_empty() {
            return Err(Error::invalid_option(
                "per_species_scale_shift",
                format!(
                    "scales ({}) and shifts ({}) must be equal-length and nonempty",
                    options.scales.len(),
                    options.shifts.len()
                ),
            ));
        }
        let in_irreps = scalar_field_irreps("per_species_scale_shift", state, &options.field)?;
        let out_field = options.out_field.unwrap_or_else(|| options.field.clone());

        let mut required = TypeState::new();
        required.insert(&options.field, FieldType::Irreps(in_irreps.clone()));
        required.insert(SPECIES, FieldType::Unconstrained);
        let mut produced = TypeState::new();
        produced.insert(&out_field, FieldType::Irreps(in_irreps));

        Ok(Self {
            irreps: ModuleIrreps::new("per_species_scale_shift", state, schema, required, produced)?,
            field: options.field,
            out_field,
            scales: options.scales,
            shifts: options.shifts,
        })
    }

    fn species_column(&self, values: &[f64], species: &[usize]) -> Result<Tensor, Error> {
        let mut column = Array2::zeros((species.len(), 1));
        for (atom, &s) in species.iter().enumerate() {
            if s >= values.len() {
                return Err(Error::unexpected_shape(
                    SPECIES,
                    format!("species index {} exceeds the {} fitted entries", s, values.len()),
                ));
            }
            column[[atom, 0]] = values[s];
        }
        Ok(Tensor::new(column))
    }
}

impl GraphModule for PerSpeciesScaleShift {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let values = state.tensor(&self.field)?;
        let species = state.index(SPECIES)?;
        let scale = self.species_column(&self.scales, species)?;
        let shift = self.species_column(&self.shifts, species)?;
        let out = values.mul(&scale).add(&shift);
        state.insert(&self.out_field, Value::Tensor(out));
        Ok(state)
    }
}

/// Options for [`AtomwiseReduce`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReduceOptions {
    /// Scalar per-atom field to reduce.
    pub field: String,
    /// Per-structure output field.
    pub out_field: String,
    /// Reduction kind; only `"sum"` is implemented.
    pub reduce: String,
}

impl Default for ReduceOptions {
    fn default() -> Self {
        Self {
            field: default_energy_field(),
            out_field: default_total_field(),
            reduce: default_reduce(),
        }
    }
}

/// Sums a scalar per-atom field over each structure in the batch.
///
/// Uses the batch vector to segment atoms by owning structure; the output
/// has one row per structure. This is the total-energy head of an energy
/// model.
#[derive(Debug)]
pub struct AtomwiseReduce {
    irreps: ModuleIrreps,
    field: String,
    out_field: String,
}

impl AtomwiseReduce {
    pub fn new(
        state: &TypeState,
        schema: &FieldSchema,
        options: ReduceOptions,
    ) -> Result<Self, Error> {
        if options.reduce != "sum" {
            return Err(Error::invalid_option(
                "atomwise_reduce",
                format!("unsupported reduction '{}'", options.reduce),
            ));
        }
        let in_irreps = scalar_field_irreps("atomwise_reduce", state, &options.field)?;

        let mut required = TypeState::new();
        required.insert(&options.field, FieldType::Irreps(in_irreps.clone()));
        required.insert(BATCH, FieldType::Unconstrained);
        let mut produced = TypeState::new();
        produced.insert(&options.out_field, FieldType::Irreps(in_irreps));

        Ok(Self {
            irreps: ModuleIrreps::new("atomwise_reduce", state, schema, required, produced)?,
            field: options.field,
            out_field: options.out_field,
        })
    }
}

impl GraphModule for AtomwiseReduce {
    fn irreps_in(&self) -> &TypeState {
        self.irreps.irreps_in()
    }

    fn irreps_out(&self) -> &TypeState {
        self.irreps.irreps_out()
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let values = state.tensor(&self.field)?;
        let batch = state.index(BATCH)?;
        let structures = batch.iter().max().map_or(0, |&m| m + 1);
        let out = values.segment_sum(batch, structures);
        state.insert(&self.out_field, Value::Tensor(out));
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use std::rc::Rc;

    fn rng() -> StdRng {
        StdRng::seed_from_u64(7)
    }

    fn features_state(rows: usize, cols: usize) -> (TypeState, GraphState) {
        let mut types = TypeState::initial();
        types.insert(NODE_FEATURES, FieldType::Irreps(Irreps::scalars(cols)));
        let mut state = GraphState::new();
        state.insert(NODE_FEATURES, Value::Tensor(Tensor::ones(rows, cols)));
        (types, state)
    }

    #[test]
    fn linear_maps_to_declared_width() {
        let schema = FieldSchema::default();
        let (types, state) = features_state(5, 4);
        let module = AtomwiseLinear::new(
            &types,
            &schema,
            LinearOptions {
                field: NODE_FEATURES.to_string(),
                out_field: Some(ATOMIC_ENERGY.to_string()),
                irreps_out: "1x0e".to_string(),
            },
            &mut rng(),
        )
        .unwrap();
        let out = module.transform(state).unwrap();
        assert_eq!(out.tensor(ATOMIC_ENERGY).unwrap().shape(), &[5, 1]);
        // Input features survive untouched.
        assert_eq!(out.tensor(NODE_FEATURES).unwrap().shape(), &[5, 4]);
    }

    #[test]
    fn linear_rejects_non_scalar_output() {
        let schema = FieldSchema::default();
        let (types, _) = features_state(2, 4);
        let result = AtomwiseLinear::new(
            &types,
            &schema,
            LinearOptions {
                field: NODE_FEATURES.to_string(),
                out_field: None,
                irreps_out: "1x1o".to_string(),
            },
            &mut rng(),
        );
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn linear_rejects_untyped_input_field() {
        let schema = FieldSchema::default();
        let types = TypeState::initial();
        let result = AtomwiseLinear::new(
            &types,
            &schema,
            LinearOptions {
                field: NODE_FEATURES.to_string(),
                out_field: None,
                irreps_out: "4x0e".to_string(),
            },
            &mut rng(),
        );
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn per_species_affine_applies_by_species() {
        let schema = FieldSchema::default();
        let mut types = TypeState::initial();
        types.insert(ATOMIC_ENERGY, FieldType::Irreps(Irreps::scalars(1)));
        let module = PerSpeciesScaleShift::new(
            &types,
            &schema,
            PerSpeciesOptions {
                field: ATOMIC_ENERGY.to_string(),
                out_field: None,
                scales: vec![2.0, 10.0],
                shifts: vec![0.5, -1.0],
            },
        )
        .unwrap();

        let mut state = GraphState::new();
        state.insert(ATOMIC_ENERGY, Value::Tensor(Tensor::from_scalars(&[1.0, 1.0])));
        state.insert(SPECIES, Value::Index(Rc::new(vec![0, 1])));
        let out = module.transform(state).unwrap();
        let energy = out.tensor(ATOMIC_ENERGY).unwrap();
        assert!((energy.data()[[0, 0]] - 2.5).abs() < 1e-12);
        assert!((energy.data()[[1, 0]] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn per_species_rejects_ragged_tables() {
        let schema = FieldSchema::default();
        let mut types = TypeState::initial();
        types.insert(ATOMIC_ENERGY, FieldType::Irreps(Irreps::scalars(1)));
        let result = PerSpeciesScaleShift::new(
            &types,
            &schema,
            PerSpeciesOptions {
                field: ATOMIC_ENERGY.to_string(),
                out_field: None,
                scales: vec![1.0],
                shifts: vec![0.0, 0.0],
            },
        );
        assert!(matches!(result, Err(Error::InvalidOption { .. })));
    }

    #[test]
    fn reduce_sums_per_structure() {
        let schema = FieldSchema::default();
        let mut types = TypeState::initial();
        types.insert(ATOMIC_ENERGY, FieldType::Irreps(Irreps::scalars(1)));
        let module = AtomwiseReduce::new(&types, &schema, ReduceOptions::default()).unwrap();

        let mut state = GraphState::new();
        state.insert(
            ATOMIC_ENERGY,
            Value::Tensor(Tensor::from_scalars(&[1.0, 2.0, 4.0])),
        );
        state.insert(BATCH, Value::Index(Rc::new(vec![0, 0, 1])));
        let out = module.transform(state).unwrap();
        let total = out.tensor(TOTAL_ENERGY).unwrap();
        assert_eq!(total.shape(), &[2, 1]);
        assert!((total.data()[[0, 0]] - 3.0).abs() < 1e-12);
        assert!((total.data()[[1, 0]] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn reduce_rejects_unknown_reduction() {
        let schema = FieldSchema::default();
        let mut types = TypeState::initial();
        types.insert(ATOMIC_ENERGY, FieldType::Irreps(Irreps::scalars(1)));
        let result = AtomwiseReduce::new(
            &types,
            &schema,
            ReduceOptions {
                reduce: "mean".to_string(),
                ..ReduceOptions::default()
            },
        );
        assert!(matches!(result, Err(Error::InvalidOption { .. })));
    }
}
