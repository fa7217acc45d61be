//! Rescale decorator: affine transforms on named output fields.

use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{TypeState, TOTAL_ENERGY};
use crate::model::graph::{GraphState, Value};
use crate::nn::module::GraphModule;
use crate::tensor::Tensor;

fn default_scale_fields() -> Vec<String> {
    vec![TOTAL_ENERGY.to_string()]
}

fn default_scale() -> f64 {
    1.0
}

/// Options for [`RescaleOutput`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RescaleOptions {
    /// Fields multiplied by `scale`.
    pub scale_fields: Vec<String>,
    /// Fields offset by `shift` (after scaling, when listed in both).
    /// Restricted to scalar fields: shifting a non-scalar output by a
    /// constant would break equivariance.
    pub shift_fields: Vec<String>,
    /// Multiplicative factor applied to `scale_fields`.
    pub scale: f64,
    /// Additive offset applied to `shift_fields`.
    pub shift: f64,
}

impl Default for RescaleOptions {
    fn default() -> Self {
        Self {
            scale_fields: default_scale_fields(),
            shift_fields: Vec::new(),
            scale: default_scale(),
            shift: 0.0,
        }
    }
}

/// Wraps a pipeline and applies an affine transform to named outputs.
///
/// The typical use is converting a model's internal normalized units back
/// to physical ones: energies are scaled by the fitted standard deviation
/// and shifted by the mean. The inverse transform, needed to prepare
/// reference labels as training targets, is exposed as
/// [`unscale`](Self::unscale).
pub struct RescaleOutput {
    inner: Box<dyn GraphModule>,
    irreps_in: TypeState,
    irreps_out: TypeState,
    options: RescaleOptions,
}

impl RescaleOutput {
    /// Wraps `inner`, validating that every named field exists among its
    /// outputs and that shifted fields are scalars.
    pub fn new(inner: Box<dyn GraphModule>, options: RescaleOptions) -> Result<Self, Error> {
        if options.scale == 0.0 {
            return Err(Error::invalid_option("rescale_output", "scale must be nonzero"));
        }
        for field in options.scale_fields.iter().chain(&options.shift_fields) {
            if inner.irreps_out().get(field).is_none() {
                return Err(Error::irreps_missing("rescale_output", field));
            }
        }
        for field in &options.shift_fields {
            let ty = inner.irreps_out().get(field);
            let scalar = ty
                .and_then(|t| t.as_irreps())
                .map(|irreps| irreps.is_scalar())
                .unwrap_or(false);
            if !scalar {
                return Err(Error::irreps_incompatible(
                    "rescale_output",
                    field,
                    "scalars (0e) for a shifted field",
                    ty.map(|t| t.to_string()).unwrap_or_default(),
                ));
            }
        }

        Ok(Self {
            irreps_in: inner.irreps_in().clone(),
            irreps_out: inner.irreps_out().clone(),
            inner,
            options,
        })
    }

    /// The wrapped pipeline.
    pub fn inner(&self) -> &dyn GraphModule {
        self.inner.as_ref()
    }

    #[inline]
    pub fn scale(&self) -> f64 {
        self.options.scale
    }

    #[inline]
    pub fn shift(&self) -> f64 {
        self.options.shift
    }

    fn is_scaled(&self, field: &str) -> bool {
        self.options.scale_fields.iter().any(|f| f == field)
    }

    fn is_shifted(&self, field: &str) -> bool {
        self.options.shift_fields.iter().any(|f| f == field)
    }

    /// Applies the inverse transform to a reference value of `field`,
    /// mapping physical units back into the wrapped model's internal ones.
    pub fn unscale(&self, field: &str, value: &Tensor) -> Tensor {
        let mut out = value.clone();
        if self.is_shifted(field) {
            out = out.shift(-self.options.shift);
        }
        if self.is_scaled(field) {
            out = out.scale(1.0 / self.options.scale);
        }
        out
    }
}

impl GraphModule for RescaleOutput {
    fn irreps_in(&self) -> &TypeState {
        &self.irreps_in
    }

    fn irreps_out(&self) -> &TypeState {
        &self.irreps_out
    }

    fn transform(&self, state: GraphState) -> Result<GraphState, Error> {
        let mut state = self.inner.transform(state)?;
        // Deduplicated: a field in both lists gets one scale and one shift.
        let mut fields: Vec<String> = Vec::new();
        for field in self.options.scale_fields.iter().chain(&self.options.shift_fields) {
            if !fields.contains(field) {
                fields.push(field.clone());
            }
        }
        for field in fields {
            let mut value = state.tensor(&field)?.clone();
            if self.is_scaled(&field) {
                value = value.scale(self.options.scale);
            }
            if self.is_shifted(&field) {
                value = value.shift(self.options.shift);
            }
            state.insert(&field, Value::Tensor(value));
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fields::{ATOMIC_ENERGY, FORCES};
    use crate::model::irreps::{FieldType, Irreps};

    /// Inner stand-in producing fixed energy and force tensors.
    struct FixedOutputs {
        irreps_in: TypeState,
        irreps_out: TypeState,
    }

    impl FixedOutputs {
        fn new() -> Self {
            let irreps_out: TypeState = [
                (TOTAL_ENERGY, FieldType::Irreps(Irreps::scalars(1))),
                (FORCES, FieldType::Irreps(Irreps::vector())),
            ]
            .into_iter()
            .collect();
            Self {
                irreps_in: TypeState::initial(),
                irreps_out,
            }
        }
    }

    impl GraphModule for FixedOutputs {
        fn irreps_in(&self) -> &TypeState {
            &self.irreps_in
        }
        fn irreps_out(&self) -> &TypeState {
            &self.irreps_out
        }
        fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
            state.insert(TOTAL_ENERGY, Value::Tensor(Tensor::from_scalars(&[2.0])));
            state.insert(FORCES, Value::Tensor(Tensor::ones(2, 3)));
            Ok(state)
        }
    }

    fn checked(options: RescaleOptions) -> Result<RescaleOutput, Error> {
        RescaleOutput::new(Box::new(FixedOutputs::new()), options)
    }

    #[test]
    fn scales_and_shifts_listed_fields() {
        let model = checked(RescaleOptions {
            scale_fields: vec![TOTAL_ENERGY.to_string(), FORCES.to_string()],
            shift_fields: vec![TOTAL_ENERGY.to_string()],
            scale: 3.0,
            shift: -1.0,
        })
        .unwrap();

        let out = model.transform(GraphState::new()).unwrap();
        assert!((out.tensor(TOTAL_ENERGY).unwrap().data()[[0, 0]] - 5.0).abs() < 1e-12);
        assert!((out.tensor(FORCES).unwrap().data()[[1, 2]] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn unscale_inverts_the_forward_transform() {
        let model = checked(RescaleOptions {
            scale_fields: vec![TOTAL_ENERGY.to_string()],
            shift_fields: vec![TOTAL_ENERGY.to_string()],
            scale: 4.0,
            shift: 0.25,
        })
        .unwrap();

        let reference = Tensor::from_scalars(&[10.0]);
        let internal = model.unscale(TOTAL_ENERGY, &reference);
        let forward = internal.scale(model.scale()).shift(model.shift());
        assert!((forward.data()[[0, 0]] - 10.0).abs() < 1e-12);
    }

    #[test]
    fn missing_field_is_rejected() {
        let result = checked(RescaleOptions {
            scale_fields: vec![ATOMIC_ENERGY.to_string()],
            ..RescaleOptions::default()
        });
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn shifting_a_vector_field_is_rejected() {
        let result = checked(RescaleOptions {
            scale_fields: vec![],
            shift_fields: vec![FORCES.to_string()],
            scale: 1.0,
            shift: 1.0,
        });
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn zero_scale_is_rejected() {
        let result = checked(RescaleOptions {
            scale: 0.0,
            ..RescaleOptions::default()
        });
        assert!(matches!(result, Err(Error::InvalidOption { .. })));
    }

    #[test]
    fn type_state_is_passed_through_unchanged() {
        let model = checked(RescaleOptions::default()).unwrap();
        assert_eq!(
            model.irreps_out().get(TOTAL_ENERGY),
            Some(&FieldType::Irreps(Irreps::scalars(1)))
        );
    }
}
