//! Config-driven model assembly.
//!
//! The builder turns a declarative [`ModelConfig`] into one fully
//! validated pipeline: it walks the `[[modules]]` entries in order,
//! resolves each `type` through the [`ModuleRegistry`], constructs the
//! module against the running type-state, and appends (or inserts, when an
//! anchor is given) into a [`SequentialNet`]. The first failing entry
//! aborts the whole build with the originating error; no partially usable
//! pipeline escapes.
//!
//! [`build_model`] is the one-call entry point from TOML text. For
//! post-hoc surgery on an already-built pipeline (swapping in a
//! fine-tuning head, deleting a stage), [`ModelBuilder`] exposes the same
//! atomic edit operations as the composer, re-resolving constructors
//! against the type-state at the edit point.

mod config;
mod context;
mod registry;

pub use config::{GlobalOptions, ModelConfig, ModuleSpec};
pub use context::BuildContext;
pub use registry::{parse_options, ModuleConstructor, ModuleRegistry};

use log::debug;

use crate::error::Error;
use crate::model::fields::TypeState;
use crate::nn::{GradientOutput, GraphModule, RescaleOutput, SequentialNet};

/// Incremental, validated assembly of a [`SequentialNet`].
pub struct ModelBuilder {
    ctx: BuildContext,
    registry: ModuleRegistry,
    net: SequentialNet,
}

impl ModelBuilder {
    /// Starts an empty build over the collated input type-state.
    pub fn new(ctx: BuildContext, registry: ModuleRegistry) -> Self {
        let debug_mode = ctx.options().model_debug_mode;
        let net = SequentialNet::new(TypeState::initial()).with_debug_assertions(debug_mode);
        Self { ctx, registry, net }
    }

    /// Builds the module pipeline of a config, failing fast on the first
    /// bad entry. Decorators are not applied here; see [`build_model`].
    pub fn from_config(config: &ModelConfig, registry: ModuleRegistry) -> Result<Self, Error> {
        let ctx = BuildContext::new(config.options.clone());
        Self::from_config_with_context(ctx, config, registry)
    }

    /// Like [`from_config`](Self::from_config), but over a caller-provided
    /// context. Use this when external setup code has registered custom
    /// fields before the build.
    pub fn from_config_with_context(
        ctx: BuildContext,
        config: &ModelConfig,
        registry: ModuleRegistry,
    ) -> Result<Self, Error> {
        let mut initial = TypeState::initial();
        for field in &config.inputs {
            let ty = ctx.schema().lookup(field)?.clone();
            initial.insert(field, ty);
        }
        let net = SequentialNet::new(initial)
            .with_debug_assertions(ctx.options().model_debug_mode);
        let mut builder = Self { ctx, registry, net };
        for spec in &config.modules {
            builder.apply(spec)?;
        }
        Ok(builder)
    }

    /// Resolves and applies one build-plan entry.
    ///
    /// Without an anchor the module is constructed against the accumulated
    /// type-state and appended. With `before`/`after` it is constructed
    /// against the type-state at that point and inserted there, subject to
    /// the composer's downstream re-validation.
    pub fn apply(&mut self, spec: &ModuleSpec) -> Result<(), Error> {
        if spec.before.is_some() && spec.after.is_some() {
            return Err(Error::invalid_option(
                &spec.name,
                "at most one of 'before' and 'after' may be given",
            ));
        }
        let constructor = self.registry.resolve(&spec.module_type)?;
        debug!("building module '{}' of type '{}'", spec.name, spec.module_type);

        if let Some(anchor) = &spec.before {
            let state = self.net.type_state_before(anchor)?;
            let module = constructor(&self.ctx, &state, &spec.options)?;
            self.net.insert_before(anchor, &spec.name, module)
        } else if let Some(anchor) = &spec.after {
            let state = self.net.type_state_after(anchor)?;
            let module = constructor(&self.ctx, &state, &spec.options)?;
            self.net.insert_after(anchor, &spec.name, module)
        } else {
            let state = self.net.irreps_out().clone();
            let module = constructor(&self.ctx, &state, &spec.options)?;
            self.net.append(&spec.name, module)
        }
    }

    /// Replaces the module under `spec.name` with a freshly constructed
    /// one, re-validating the downstream chain atomically.
    pub fn replace(&mut self, spec: &ModuleSpec) -> Result<(), Error> {
        let constructor = self.registry.resolve(&spec.module_type)?;
        let state = self.net.type_state_before(&spec.name)?;
        let module = constructor(&self.ctx, &state, &spec.options)?;
        self.net.replace(&spec.name, module)
    }

    /// Deletes a module by name, subject to downstream re-validation.
    pub fn delete(&mut self, name: &str) -> Result<(), Error> {
        self.net.delete(name)
    }

    #[inline]
    pub fn context(&self) -> &BuildContext {
        &self.ctx
    }

    /// Mutable context access, for schema registration between edits.
    #[inline]
    pub fn context_mut(&mut self) -> &mut BuildContext {
        &mut self.ctx
    }

    #[inline]
    pub fn net(&self) -> &SequentialNet {
        &self.net
    }

    /// Finishes the build, handing back the context and the pipeline.
    pub fn into_parts(self) -> (BuildContext, SequentialNet) {
        (self.ctx, self.net)
    }
}

/// Builds a complete model from TOML text: the module pipeline plus any
/// configured decorators (gradient innermost, rescale outermost).
pub fn build_model(
    toml_text: &str,
    registry: ModuleRegistry,
) -> Result<Box<dyn GraphModule>, Error> {
    let config = ModelConfig::from_toml(toml_text)?;
    let builder = ModelBuilder::from_config(&config, registry)?;
    let (ctx, net) = builder.into_parts();

    let mut model: Box<dyn GraphModule> = Box::new(net);
    if let Some(gradient) = config.gradient {
        model = Box::new(GradientOutput::with_finite_check(
            model,
            ctx.schema(),
            gradient,
            ctx.options().grad_anomaly_mode,
        )?);
    }
    if let Some(rescale) = config.rescale {
        model = Box::new(RescaleOutput::new(model, rescale)?);
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fields::{EDGE_EMBEDDING, EDGE_LENGTHS, FORCES, NODE_FEATURES, TOTAL_ENERGY};
    use crate::model::graph::{AtomicGraph, GraphBatch};
    use crate::model::irreps::{FieldType, Irreps};
    use crate::model::neighbors::neighbor_list;

    const ENERGY_PLAN: &str = r#"
        seed = 3

        [[modules]]
        name = "edges"
        type = "edge_vectors"

        [[modules]]
        name = "one_hot"
        type = "one_hot"
        num_species = 2

        [[modules]]
        name = "radial"
        type = "radial_basis"
        r_max = 4.0
        num_basis = 6

        [[modules]]
        name = "conv"
        type = "radial_conv"
        features = 8

        [[modules]]
        name = "energy"
        type = "atomwise_linear"
        irreps_out = "1x0e"
        out_field = "atomic_energy"

        [[modules]]
        name = "total"
        type = "atomwise_reduce"
    "#;

    fn water() -> AtomicGraph {
        let positions = vec![
            [0.0, 0.0, 0.0],
            [0.9572, 0.0, 0.0],
            [-0.2399, 0.9266, 0.0],
        ];
        let edges = neighbor_list(&positions, 4.0);
        AtomicGraph::new(positions, vec![0, 1, 1]).with_edges(edges)
    }

    #[test]
    fn builds_an_energy_pipeline() {
        let builder =
            ModelBuilder::from_config(&ModelConfig::from_toml(ENERGY_PLAN).unwrap(), ModuleRegistry::with_builtins())
                .unwrap();
        let (_, net) = builder.into_parts();

        assert_eq!(net.len(), 6);
        assert_eq!(
            net.irreps_out().get(TOTAL_ENERGY),
            Some(&FieldType::Irreps(Irreps::scalars(1)))
        );

        let out = net.forward(GraphBatch::collate(&[water()]).unwrap()).unwrap();
        assert_eq!(out.tensor(TOTAL_ENERGY).unwrap().shape(), &[1, 1]);
    }

    #[test]
    fn build_fails_fast_on_missing_requirement() {
        // radial_basis before edge_vectors: edge lengths do not exist yet.
        let plan = r#"
            [[modules]]
            name = "radial"
            type = "radial_basis"
            r_max = 4.0
        "#;
        let result = ModelBuilder::from_config(
            &ModelConfig::from_toml(plan).unwrap(),
            ModuleRegistry::with_builtins(),
        );
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn build_fails_on_unknown_type() {
        let plan = r#"
            [[modules]]
            name = "conv"
            type = "tensor_product_conv"
        "#;
        let result = ModelBuilder::from_config(
            &ModelConfig::from_toml(plan).unwrap(),
            ModuleRegistry::with_builtins(),
        );
        assert!(matches!(result, Err(Error::UnknownModuleType(_))));
    }

    #[test]
    fn anchored_entries_insert_mid_pipeline() {
        let plan = r#"
            [[modules]]
            name = "edges"
            type = "edge_vectors"

            [[modules]]
            name = "conv_input"
            type = "one_hot"
            num_species = 2

            # Declared last, lands between edges and conv_input.
            [[modules]]
            name = "radial"
            type = "radial_basis"
            r_max = 4.0
            before = "conv_input"
        "#;
        let builder = ModelBuilder::from_config(
            &ModelConfig::from_toml(plan).unwrap(),
            ModuleRegistry::with_builtins(),
        )
        .unwrap();
        let names: Vec<_> = builder.net().names().map(String::from).collect();
        assert_eq!(names, vec!["edges", "radial", "conv_input"]);
    }

    #[test]
    fn post_hoc_replace_and_delete() {
        let mut builder = ModelBuilder::from_config(
            &ModelConfig::from_toml(ENERGY_PLAN).unwrap(),
            ModuleRegistry::with_builtins(),
        )
        .unwrap();

        // Swap the interaction for a wider one; downstream revalidates
        // because the linear head was sized for 8 channels.
        let mut options = toml::value::Table::new();
        options.insert("features".to_string(), toml::Value::Integer(8));
        builder
            .replace(&ModuleSpec {
                name: "conv".to_string(),
                module_type: "radial_conv".to_string(),
                before: None,
                after: None,
                options,
            })
            .unwrap();

        // Deleting the radial embedding would orphan the conv.
        assert!(matches!(
            builder.delete("radial"),
            Err(Error::IrrepsMismatch { .. })
        ));
        assert!(builder.net().irreps_out().contains(EDGE_EMBEDDING));

        // Heads delete cleanly back to front.
        builder.delete("total").unwrap();
        builder.delete("energy").unwrap();
        assert_eq!(builder.net().len(), 4);
        assert!(builder.net().irreps_out().contains(NODE_FEATURES));
        assert!(!builder.net().irreps_out().contains(TOTAL_ENERGY));
    }

    #[test]
    fn full_model_with_decorators() {
        let plan = format!(
            "{}\n{}",
            ENERGY_PLAN,
            r#"
            [gradient]

            [rescale]
            scale = 2.0
            scale_fields = ["total_energy", "forces"]
            shift_fields = ["total_energy"]
            shift = -1.5
            "#
        );
        let model = build_model(&plan, ModuleRegistry::with_builtins()).unwrap();

        assert_eq!(
            model.irreps_out().get(FORCES),
            Some(&FieldType::Irreps(Irreps::vector()))
        );

        let out = model
            .transform(GraphBatch::collate(&[water()]).unwrap())
            .unwrap();
        assert_eq!(out.tensor(FORCES).unwrap().shape(), &[3, 3]);
        assert_eq!(out.tensor(TOTAL_ENERGY).unwrap().shape(), &[1, 1]);
        for v in out.tensor(FORCES).unwrap().data().iter() {
            assert!(v.is_finite());
        }
    }

    #[test]
    fn gradient_decorator_requires_its_target() {
        let plan = r#"
            [[modules]]
            name = "edges"
            type = "edge_vectors"

            [gradient]
        "#;
        let result = build_model(plan, ModuleRegistry::with_builtins());
        assert!(matches!(result, Err(Error::GradientTargetMissing { .. })));
    }

    #[test]
    fn extra_inputs_come_from_the_schema() {
        let plan = r#"
            inputs = ["edge_shifts"]

            [[modules]]
            name = "edges"
            type = "edge_vectors"
            use_shifts = true
        "#;
        let builder = ModelBuilder::from_config(
            &ModelConfig::from_toml(plan).unwrap(),
            ModuleRegistry::with_builtins(),
        )
        .unwrap();
        assert!(builder.net().irreps_out().contains(EDGE_LENGTHS));

        // Without the extra input the same plan cannot build.
        let plan = r#"
            [[modules]]
            name = "edges"
            type = "edge_vectors"
            use_shifts = true
        "#;
        let result = ModelBuilder::from_config(
            &ModelConfig::from_toml(plan).unwrap(),
            ModuleRegistry::with_builtins(),
        );
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }
}
