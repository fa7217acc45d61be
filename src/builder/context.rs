//! Explicit build context: schema, options, and initialization RNG.

use std::cell::{RefCell, RefMut};

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::config::GlobalOptions;
use crate::error::Error;
use crate::model::fields::FieldSchema;
use crate::model::irreps::FieldType;

/// Everything ambient a model build needs, owned explicitly.
///
/// A context bundles the field schema, the cross-cutting options, and the
/// seeded parameter-initialization RNG. It is created per build (or per
/// test) and passed to constructors, so two independent builds in one
/// process are fully isolated; nothing here is process-global.
///
/// Structural operations take the context by shared reference but are not
/// thread-safe: the context is meant to be exclusively owned by whichever
/// single build or edit process is active.
#[derive(Debug)]
pub struct BuildContext {
    schema: FieldSchema,
    options: GlobalOptions,
    rng: RefCell<StdRng>,
}

impl Default for BuildContext {
    fn default() -> Self {
        Self::new(GlobalOptions::default())
    }
}

impl BuildContext {
    /// Creates a context with the default field schema and the given
    /// options; the RNG is seeded from `options.seed`.
    pub fn new(options: GlobalOptions) -> Self {
        Self {
            schema: FieldSchema::default(),
            rng: RefCell::new(StdRng::seed_from_u64(options.seed)),
            options,
        }
    }

    #[inline]
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    #[inline]
    pub fn options(&self) -> &GlobalOptions {
        &self.options
    }

    /// Registers additional fields before dependent modules are built.
    ///
    /// Mirrors [`FieldSchema::register_fields`]; must happen before any
    /// module construction that uses the new fields.
    pub fn register_fields<I, S>(&mut self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: AsRef<str>,
    {
        self.schema.register_fields(fields)
    }

    /// The parameter-initialization RNG.
    pub fn rng(&self) -> RefMut<'_, StdRng> {
        self.rng.borrow_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::irreps::Irreps;
    use rand::Rng;

    #[test]
    fn contexts_are_independent() {
        let mut a = BuildContext::default();
        let b = BuildContext::default();
        a.register_fields([("dipole", FieldType::Irreps(Irreps::vector()))])
            .unwrap();
        assert!(a.schema().get("dipole").is_some());
        assert!(b.schema().get("dipole").is_none());
    }

    #[test]
    fn rng_is_deterministic_per_seed() {
        let options = GlobalOptions {
            seed: 99,
            ..GlobalOptions::default()
        };
        let a = BuildContext::new(options.clone());
        let b = BuildContext::new(options);
        let x: f64 = a.rng().gen();
        let y: f64 = b.rng().gen();
        assert_eq!(x, y);
    }
}
