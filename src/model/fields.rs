//! Field vocabulary, schema registry, and the composition type-state.
//!
//! Fields are the named slots of a graph-state. The [`FieldSchema`] records,
//! for every field name a model may touch, the representation type its
//! tensors must carry (or [`FieldType::Unconstrained`] for index and
//! metadata fields). The [`TypeState`] is the evolving mapping threaded
//! through a pipeline at construction time: what fields exist, and with what
//! type, after each stage.
//!
//! The schema is not process-global state. It lives in a
//! [`BuildContext`](crate::builder::BuildContext) with an explicit lifecycle,
//! so two independent builds in one process never observe each other's
//! registrations.

use log::debug;

use super::irreps::{FieldType, Irreps};
use crate::error::Error;

/// Per-atom Cartesian coordinates, `1x1o`.
pub const POSITIONS: &str = "positions";
/// Directed edge list as `(center, neighbor)` index pairs.
pub const EDGE_INDEX: &str = "edge_index";
/// Per-atom species index.
pub const SPECIES: &str = "species";
/// Per-atom index of the owning structure within a batch.
pub const BATCH: &str = "batch";
/// Per-edge Cartesian shift vectors for periodic images, `1x1o`.
pub const EDGE_SHIFTS: &str = "edge_shifts";
/// Per-edge relative position vectors, `1x1o`.
pub const EDGE_VECTORS: &str = "edge_vectors";
/// Per-edge distances, `1x0e`.
pub const EDGE_LENGTHS: &str = "edge_lengths";
/// Per-edge angular attributes (spherical-harmonic projections).
pub const EDGE_ATTRS: &str = "edge_attrs";
/// Per-edge radial embedding.
pub const EDGE_EMBEDDING: &str = "edge_embedding";
/// Per-atom fixed attributes (species encoding).
pub const NODE_ATTRS: &str = "node_attrs";
/// Per-atom learned features.
pub const NODE_FEATURES: &str = "node_features";
/// Per-atom energy contribution, `1x0e`.
pub const ATOMIC_ENERGY: &str = "atomic_energy";
/// Per-structure total energy, `1x0e`.
pub const TOTAL_ENERGY: &str = "total_energy";
/// Per-atom forces, `1x1o`.
pub const FORCES: &str = "forces";

/// Registry mapping field names to their representation types.
///
/// Registration is idempotent for identical entries, allows tightening an
/// [`FieldType::Unconstrained`] entry to a concrete type, and rejects every
/// other change with [`Error::SchemaConflict`]. Width-dependent feature
/// fields (edge attributes, embeddings, node features) default to
/// `Unconstrained` so that producing modules may declare their concrete
/// layout; geometric fields are pinned to their physical types.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSchema {
    entries: Vec<(String, FieldType)>,
}

impl Default for FieldSchema {
    fn default() -> Self {
        let mut schema = Self::empty();
        for (name, ty) in [
            (POSITIONS, FieldType::Irreps(Irreps::vector())),
            (EDGE_INDEX, FieldType::Unconstrained),
            (SPECIES, FieldType::Unconstrained),
            (BATCH, FieldType::Unconstrained),
            (EDGE_SHIFTS, FieldType::Irreps(Irreps::vector())),
            (EDGE_VECTORS, FieldType::Irreps(Irreps::vector())),
            (EDGE_LENGTHS, FieldType::Irreps(Irreps::scalars(1))),
            (EDGE_ATTRS, FieldType::Unconstrained),
            (EDGE_EMBEDDING, FieldType::Unconstrained),
            (NODE_ATTRS, FieldType::Unconstrained),
            (NODE_FEATURES, FieldType::Unconstrained),
            (ATOMIC_ENERGY, FieldType::Irreps(Irreps::scalars(1))),
            (TOTAL_ENERGY, FieldType::Irreps(Irreps::scalars(1))),
            (FORCES, FieldType::Irreps(Irreps::vector())),
        ] {
            schema.entries.push((name.to_string(), ty));
        }
        schema
    }
}

impl FieldSchema {
    /// Creates a schema with no registered fields.
    pub fn empty() -> Self {
        Self { entries: Vec::new() }
    }

    /// Number of registered fields.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the registered type for `field`, if any.
    pub fn get(&self, field: &str) -> Option<&FieldType> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }

    /// Returns the registered type for `field`, failing with
    /// [`Error::UnknownField`] if it was never registered.
    pub fn lookup(&self, field: &str) -> Result<&FieldType, Error> {
        self.get(field)
            .ok_or_else(|| Error::UnknownField(field.to_string()))
    }

    /// Registers `field` with the given representation type.
    ///
    /// Identical re-registration succeeds without effect. Re-registering an
    /// `unconstrained` field with a concrete type tightens the entry. Any
    /// other change fails with [`Error::SchemaConflict`] and leaves the
    /// schema unchanged.
    pub fn register(&mut self, field: &str, ty: FieldType) -> Result<(), Error> {
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| name == field) {
            if entry.1 == ty {
                return Ok(());
            }
            if entry.1.is_unconstrained() {
                debug!("schema: tightening field '{}' to {}", field, ty);
                entry.1 = ty;
                return Ok(());
            }
            return Err(Error::schema_conflict(field, &entry.1, &ty));
        }
        debug!("schema: registering field '{}' as {}", field, ty);
        self.entries.push((field.to_string(), ty));
        Ok(())
    }

    /// Registers several fields, failing on the first conflict.
    pub fn register_fields<I, S>(&mut self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (S, FieldType)>,
        S: AsRef<str>,
    {
        for (name, ty) in fields {
            self.register(name.as_ref(), ty)?;
        }
        Ok(())
    }

    /// Validates a module's declared output against the schema.
    ///
    /// A typed schema entry pins the field: the declaration must match it
    /// exactly, and a mismatch surfaces as the construction-time
    /// [`Error::IrrepsMismatch`]. An `unconstrained` schema entry accepts
    /// any declaration. An unregistered name fails with
    /// [`Error::UnknownField`] unless the module itself declares the field
    /// as untyped, which is the explicit opt-out for private metadata
    /// fields.
    pub fn check_output(&self, module: &str, field: &str, declared: &FieldType) -> Result<(), Error> {
        match self.get(field) {
            None if declared.is_unconstrained() => Ok(()),
            None => Err(Error::UnknownField(field.to_string())),
            Some(registered) if registered.is_unconstrained() || registered == declared => Ok(()),
            Some(registered) => Err(Error::irreps_incompatible(module, field, registered, declared)),
        }
    }
}

/// Ordered mapping from field name to representation type.
///
/// The type-state describes what fields exist, and with what symmetry type,
/// at one point of a pipeline. It is threaded through composition: each
/// module's declared outputs are merged in as the chain is validated. Values
/// compare by content, which is what the composer's atomicity guarantees are
/// stated against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeState {
    entries: Vec<(String, FieldType)>,
}

impl TypeState {
    /// Creates an empty type-state.
    pub fn new() -> Self {
        Self::default()
    }

    /// The type-state of a freshly collated atomic graph: positions, species,
    /// batch assignment, and the edge list.
    pub fn initial() -> Self {
        let mut state = Self::new();
        state.insert(POSITIONS, FieldType::Irreps(Irreps::vector()));
        state.insert(EDGE_INDEX, FieldType::Unconstrained);
        state.insert(SPECIES, FieldType::Unconstrained);
        state.insert(BATCH, FieldType::Unconstrained);
        state
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    pub fn get(&self, field: &str) -> Option<&FieldType> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, ty)| ty)
    }

    /// Sets `field` to `ty`, appending or replacing in place.
    pub fn insert(&mut self, field: &str, ty: FieldType) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = ty,
            None => self.entries.push((field.to_string(), ty)),
        }
    }

    /// Merges another type-state's entries into this one, in order.
    pub fn merge(&mut self, other: &TypeState) {
        for (name, ty) in &other.entries {
            self.insert(name, ty.clone());
        }
    }

    /// Checks that this type-state satisfies a module's required inputs.
    ///
    /// A required `unconstrained` entry only demands presence; a required
    /// typed entry demands an exactly matching typed entry. Failures carry
    /// the module name for diagnosis.
    pub fn satisfies(&self, module: &str, required: &TypeState) -> Result<(), Error> {
        for (field, expected) in &required.entries {
            let found = self
                .get(field)
                .ok_or_else(|| Error::irreps_missing(module, field))?;
            if !expected.is_unconstrained() && found != expected {
                return Err(Error::irreps_incompatible(module, field, expected, found));
            }
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldType)> {
        self.entries.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    /// Field names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl<S: AsRef<str>> FromIterator<(S, FieldType)> for TypeState {
    fn from_iter<I: IntoIterator<Item = (S, FieldType)>>(iter: I) -> Self {
        let mut state = Self::new();
        for (name, ty) in iter {
            state.insert(name.as_ref(), ty);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schema_pins_geometry() {
        let schema = FieldSchema::default();
        assert_eq!(
            schema.get(POSITIONS),
            Some(&FieldType::Irreps(Irreps::vector()))
        );
        assert_eq!(schema.get(EDGE_INDEX), Some(&FieldType::Unconstrained));
        assert_eq!(
            schema.get(TOTAL_ENERGY),
            Some(&FieldType::Irreps(Irreps::scalars(1)))
        );
    }

    #[test]
    fn lookup_unknown_field_fails() {
        let schema = FieldSchema::default();
        assert!(matches!(
            schema.lookup("velocity"),
            Err(Error::UnknownField(_))
        ));
    }

    #[test]
    fn identical_registration_is_idempotent() {
        let mut schema = FieldSchema::default();
        schema
            .register(POSITIONS, FieldType::Irreps(Irreps::vector()))
            .unwrap();
        schema
            .register(POSITIONS, FieldType::Irreps(Irreps::vector()))
            .unwrap();
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut schema = FieldSchema::default();
        let result = schema.register(POSITIONS, FieldType::Irreps(Irreps::scalars(3)));
        assert!(matches!(result, Err(Error::SchemaConflict { .. })));
        // The schema is unchanged after the rejected registration.
        assert_eq!(
            schema.get(POSITIONS),
            Some(&FieldType::Irreps(Irreps::vector()))
        );
    }

    #[test]
    fn unconstrained_entry_can_be_tightened() {
        let mut schema = FieldSchema::default();
        let attrs = FieldType::Irreps(Irreps::spherical_harmonics(2));
        schema.register(EDGE_ATTRS, attrs.clone()).unwrap();
        assert_eq!(schema.get(EDGE_ATTRS), Some(&attrs));

        // ...but not re-typed or loosened afterwards.
        let other = FieldType::Irreps(Irreps::spherical_harmonics(3));
        assert!(matches!(
            schema.register(EDGE_ATTRS, other),
            Err(Error::SchemaConflict { .. })
        ));
        assert!(matches!(
            schema.register(EDGE_ATTRS, FieldType::Unconstrained),
            Err(Error::SchemaConflict { .. })
        ));
    }

    #[test]
    fn check_output_against_pinned_entry() {
        let schema = FieldSchema::default();
        schema
            .check_output("m", FORCES, &FieldType::Irreps(Irreps::vector()))
            .unwrap();
        let result = schema.check_output("m", FORCES, &FieldType::Irreps(Irreps::scalars(3)));
        assert!(matches!(result, Err(Error::IrrepsMismatch { .. })));
    }

    #[test]
    fn check_output_for_unregistered_fields() {
        let schema = FieldSchema::default();
        // A typed declaration needs a registration first.
        assert!(matches!(
            schema.check_output("m", "velocity", &FieldType::Irreps(Irreps::vector())),
            Err(Error::UnknownField(_))
        ));
        // Declaring the field untyped is the explicit opt-out.
        schema
            .check_output("m", "velocity", &FieldType::Unconstrained)
            .unwrap();
    }

    #[test]
    fn type_state_insert_preserves_order() {
        let mut state = TypeState::new();
        state.insert("a", FieldType::Unconstrained);
        state.insert("b", FieldType::Irreps(Irreps::scalars(4)));
        state.insert("a", FieldType::Irreps(Irreps::scalars(2)));
        let names: Vec<_> = state.names().collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(state.get("a"), Some(&FieldType::Irreps(Irreps::scalars(2))));
    }

    #[test]
    fn satisfies_checks_presence_and_type() {
        let mut state = TypeState::initial();
        state.insert(EDGE_VECTORS, FieldType::Irreps(Irreps::vector()));

        let required: TypeState =
            [(EDGE_VECTORS, FieldType::Irreps(Irreps::vector()))].into_iter().collect();
        state.satisfies("m", &required).unwrap();

        let missing: TypeState =
            [(EDGE_ATTRS, FieldType::Unconstrained)].into_iter().collect();
        assert!(matches!(
            state.satisfies("m", &missing),
            Err(Error::IrrepsMismatch { .. })
        ));

        let wrong: TypeState =
            [(EDGE_VECTORS, FieldType::Irreps(Irreps::scalars(3)))].into_iter().collect();
        assert!(matches!(
            state.satisfies("m", &wrong),
            Err(Error::IrrepsMismatch { .. })
        ));
    }

    #[test]
    fn unconstrained_requirement_only_demands_presence() {
        let state = TypeState::initial();
        let required: TypeState =
            [(POSITIONS, FieldType::Unconstrained)].into_iter().collect();
        state.satisfies("m", &required).unwrap();
    }
}
