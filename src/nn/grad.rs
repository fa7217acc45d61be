//! Derived-gradient decorator: forces from an energy pipeline.

use serde::Deserialize;

use crate::error::Error;
use crate::model::fields::{FieldSchema, TypeState, FORCES, POSITIONS, TOTAL_ENERGY};
use crate::model::graph::{GraphState, Value};
use crate::model::irreps::{FieldType, Irreps};
use crate::nn::module::GraphModule;
use crate::tensor::{Tape, Tensor};

fn default_of() -> String {
    TOTAL_ENERGY.to_string()
}

fn default_wrt() -> String {
    POSITIONS.to_string()
}

fn default_out_field() -> String {
    FORCES.to_string()
}

fn default_negate() -> bool {
    true
}

/// Options for [`GradientOutput`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GradientOptions {
    /// Scalar output field to differentiate.
    pub of: String,
    /// Input field to differentiate with respect to.
    pub wrt: String,
    /// Field receiving the (optionally negated) gradient.
    pub out_field: String,
    /// Negate the gradient. Forces are the negated derivative of the
    /// energy, so this defaults to true.
    pub negate: bool,
}

impl Default for GradientOptions {
    fn default() -> Self {
        Self {
            of: default_of(),
            wrt: default_wrt(),
            out_field: default_out_field(),
            negate: default_negate(),
        }
    }
}

/// Wraps a pipeline and appends the derivative of one of its scalar
/// outputs with respect to one of its inputs.
///
/// The wrapped pipeline runs on a fresh tape per call; the derivative is
/// obtained by one reverse sweep over everything the pipeline recorded.
/// The added field carries the representation type of the differentiated
/// input (for positions, `1x1o`), which is also the type of this domain's
/// force field.
///
/// This decorator is itself a [`GraphModule`], so it composes: a rescale
/// decorator may wrap a gradient decorator, and vice versa.
pub struct GradientOutput {
    inner: Box<dyn GraphModule>,
    irreps_in: TypeState,
    irreps_out: TypeState,
    of: String,
    wrt: String,
    out_field: String,
    negate: bool,
    check_finite: bool,
}

impl GradientOutput {
    /// Wraps `inner`, validating the named fields against its declarations.
    ///
    /// Fails with [`Error::GradientTargetMissing`] when `of` is absent from
    /// the inner pipeline's final type-state (or is not a scalar field),
    /// and when `wrt` is absent from its input type-state (or carries no
    /// representation type to give the output).
    pub fn new(
        inner: Box<dyn GraphModule>,
        schema: &FieldSchema,
        options: GradientOptions,
    ) -> Result<Self, Error> {
        Self::with_finite_check(inner, schema, options, false)
    }

    /// Like [`new`](Self::new), additionally rejecting non-finite gradients
    /// at runtime (the anomaly mode of the global options).
    pub fn with_finite_check(
        inner: Box<dyn GraphModule>,
        schema: &FieldSchema,
        options: GradientOptions,
        check_finite: bool,
    ) -> Result<Self, Error> {
        let of_ty = inner
            .irreps_out()
            .get(&options.of)
            .ok_or_else(|| {
                Error::gradient_target(&options.of, "absent from the wrapped pipeline's outputs")
            })?;
        match of_ty.as_irreps() {
            Some(irreps) if irreps.is_scalar() => {}
            _ => {
                return Err(Error::gradient_target(
                    &options.of,
                    format!("must be a scalar field to differentiate, found {}", of_ty),
                ));
            }
        }

        let wrt_ty = inner
            .irreps_in()
            .get(&options.wrt)
            .ok_or_else(|| {
                Error::gradient_target(&options.wrt, "absent from the wrapped pipeline's inputs")
            })?;
        let wrt_irreps: Irreps = match wrt_ty.as_irreps() {
            Some(irreps) => irreps.clone(),
            None => {
                return Err(Error::gradient_target(
                    &options.wrt,
                    "carries no representation type to assign the gradient",
                ));
            }
        };

        let out_ty = FieldType::Irreps(wrt_irreps);
        schema.check_output("gradient_output", &options.out_field, &out_ty)?;

        let irreps_in = inner.irreps_in().clone();
        let mut irreps_out = inner.irreps_out().clone();
        irreps_out.insert(&options.out_field, out_ty);

        Ok(Self {
            inner,
            irreps_in,
            irreps_out,
            of: options.of,
            wrt: options.wrt,
            out_field: options.out_field,
            negate: options.negate,
            check_finite,
        })
    }

    /// The wrapped pipeline.
    pub fn inner(&self) -> &dyn GraphModule {
        self.inner.as_ref()
    }
}

impl GraphModule for GradientOutput {
    fn irreps_in(&self) -> &TypeState {
        &self.irreps_in
    }

    fn irreps_out(&self) -> &TypeState {
        &self.irreps_out
    }

    fn transform(&self, mut state: GraphState) -> Result<GraphState, Error> {
        let tape = Tape::new();
        let tracked = state.tensor(&self.wrt)?.tracked(&tape);
        state.insert(&self.wrt, Value::Tensor(tracked.clone()));

        let mut out_state = self.inner.transform(state)?;

        let target = out_state.tensor(&self.of)?;
        let gradients = tape.backward(target);
        let mut gradient = gradients.wrt(&tracked);
        if self.negate {
            gradient = -gradient;
        }
        if self.check_finite && gradient.iter().any(|v| !v.is_finite()) {
            return Err(Error::unexpected_shape(
                &self.out_field,
                "gradient contains non-finite values",
            ));
        }

        // Hand back tape-free tensors; the recording exists only for the
        // scope of this call.
        let detached: Vec<(String, Tensor)> = out_state
            .iter()
            .filter_map(|(name, value)| match value {
                Value::Tensor(t) => Some((name.to_string(), t.detached())),
                _ => None,
            })
            .collect();
        for (name, tensor) in detached {
            out_state.insert(&name, Value::Tensor(tensor));
        }

        out_state.insert(&self.out_field, Value::Tensor(Tensor::from_dyn(gradient)));
        Ok(out_state)
    }
}
