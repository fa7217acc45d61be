//! Atomic graphs and the runtime graph-state.
//!
//! An [`AtomicGraph`] is one structure as handed over by the caller:
//! positions, species indices, and a directed edge list (plus optional
//! periodic-image shift vectors). [`GraphBatch::collate`] concatenates
//! several structures into one [`GraphState`], the mapping from field name
//! to runtime [`Value`] that flows through a composed pipeline.
//!
//! The graph-state conforms to the type-state at every pipeline point: for
//! every field the type-state declares after module `i`, the graph-state
//! after executing module `i` holds a value of matching representation
//! type.

use std::rc::Rc;

use super::fields::{BATCH, EDGE_INDEX, EDGE_SHIFTS, POSITIONS, SPECIES};
use crate::error::Error;
use crate::tensor::Tensor;

/// One atomic structure: geometry, species, and connectivity.
///
/// Edges are directed `(center, neighbor)` pairs; an undirected neighbor
/// relation is represented by both directions. Periodic systems supply
/// precomputed edges together with per-edge Cartesian shift vectors (the
/// displacement of the neighbor's periodic image).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AtomicGraph {
    /// Cartesian coordinates per atom.
    pub positions: Vec<[f64; 3]>,
    /// Species index per atom (dense, `0..num_species`).
    pub species: Vec<usize>,
    /// Directed edges as `(center, neighbor)` index pairs.
    pub edges: Vec<[usize; 2]>,
    /// Optional per-edge Cartesian shift vectors for periodic images.
    pub edge_shifts: Option<Vec<[f64; 3]>>,
}

impl AtomicGraph {
    /// Creates a graph with no edges.
    pub fn new(positions: Vec<[f64; 3]>, species: Vec<usize>) -> Self {
        Self {
            positions,
            species,
            edges: Vec::new(),
            edge_shifts: None,
        }
    }

    /// Attaches a directed edge list.
    pub fn with_edges(mut self, edges: Vec<[usize; 2]>) -> Self {
        self.edges = edges;
        self
    }

    #[inline]
    pub fn num_atoms(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Checks basic consistency: matching array lengths and in-range edge
    /// indices.
    pub fn validate(&self) -> Result<(), Error> {
        if self.species.len() != self.positions.len() {
            return Err(Error::InvalidGraph(format!(
                "{} positions but {} species entries",
                self.positions.len(),
                self.species.len()
            )));
        }
        let n = self.num_atoms();
        for edge in &self.edges {
            if edge[0] >= n || edge[1] >= n {
                return Err(Error::InvalidGraph(format!(
                    "edge ({}, {}) references a missing atom (structure has {})",
                    edge[0], edge[1], n
                )));
            }
            if edge[0] == edge[1] && self.edge_shifts.is_none() {
                return Err(Error::InvalidGraph(format!(
                    "self-edge on atom {} without a periodic shift",
                    edge[0]
                )));
            }
        }
        if let Some(shifts) = &self.edge_shifts {
            if shifts.len() != self.edges.len() {
                return Err(Error::InvalidGraph(format!(
                    "{} edges but {} shift vectors",
                    self.edges.len(),
                    shifts.len()
                )));
            }
        }
        Ok(())
    }
}

/// One runtime value in a graph-state.
#[derive(Debug, Clone)]
pub enum Value {
    /// A dense tensor; rows index atoms, edges, or structures.
    Tensor(Tensor),
    /// An integer index array (species, batch assignment).
    Index(Rc<Vec<usize>>),
    /// A directed edge list.
    Edges(Rc<Vec<[usize; 2]>>),
}

/// Runtime mapping from field name to [`Value`] for one batch.
#[derive(Debug, Clone, Default)]
pub struct GraphState {
    entries: Vec<(String, Value)>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
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

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    /// Sets `field`, appending or replacing in place.
    pub fn insert(&mut self, field: &str, value: Value) {
        match self.entries.iter_mut().find(|(name, _)| name == field) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((field.to_string(), value)),
        }
    }

    /// The tensor stored under `field`.
    ///
    /// A missing field or a non-tensor value is a violated contract: static
    /// validation has already established the field's presence and kind.
    pub fn tensor(&self, field: &str) -> Result<&Tensor, Error> {
        match self.get(field) {
            Some(Value::Tensor(t)) => Ok(t),
            Some(_) => Err(Error::unexpected_shape(field, "expected a tensor value")),
            None => Err(Error::unexpected_shape(field, "missing from the graph state")),
        }
    }

    /// The index array stored under `field`.
    pub fn index(&self, field: &str) -> Result<&Rc<Vec<usize>>, Error> {
        match self.get(field) {
            Some(Value::Index(idx)) => Ok(idx),
            Some(_) => Err(Error::unexpected_shape(field, "expected an index value")),
            None => Err(Error::unexpected_shape(field, "missing from the graph state")),
        }
    }

    /// The edge list stored under `field`.
    pub fn edges(&self, field: &str) -> Result<&Rc<Vec<[usize; 2]>>, Error> {
        match self.get(field) {
            Some(Value::Edges(edges)) => Ok(edges),
            Some(_) => Err(Error::unexpected_shape(field, "expected an edge list")),
            None => Err(Error::unexpected_shape(field, "missing from the graph state")),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }
}

/// Collation of atomic structures into one batched graph-state.
pub struct GraphBatch;

impl GraphBatch {
    /// Concatenates structures into a single graph-state.
    ///
    /// Atom rows are stacked in order; edge indices are offset by each
    /// structure's starting atom; the `batch` field records which structure
    /// owns each atom. Shift vectors are carried through when any input has
    /// them (structures without default to zero shifts).
    pub fn collate(graphs: &[AtomicGraph]) -> Result<GraphState, Error> {
        if graphs.is_empty() {
            return Err(Error::InvalidGraph("cannot collate an empty batch".to_string()));
        }
        for graph in graphs {
            graph.validate()?;
        }

        let any_shifts = graphs.iter().any(|g| g.edge_shifts.is_some());

        let mut positions = Vec::new();
        let mut species = Vec::new();
        let mut batch = Vec::new();
        let mut edges = Vec::new();
        let mut shifts = Vec::new();

        let mut offset = 0;
        for (structure, graph) in graphs.iter().enumerate() {
            positions.extend_from_slice(&graph.positions);
            species.extend_from_slice(&graph.species);
            batch.extend(std::iter::repeat(structure).take(graph.num_atoms()));
            edges.extend(
                graph
                    .edges
                    .iter()
                    .map(|e| [e[0] + offset, e[1] + offset]),
            );
            if any_shifts {
                match &graph.edge_shifts {
                    Some(s) => shifts.extend_from_slice(s),
                    None => shifts.extend(std::iter::repeat([0.0; 3]).take(graph.num_edges())),
                }
            }
            offset += graph.num_atoms();
        }

        let mut state = GraphState::new();
        state.insert(POSITIONS, Value::Tensor(Tensor::from_rows3(&positions)));
        state.insert(EDGE_INDEX, Value::Edges(Rc::new(edges)));
        state.insert(SPECIES, Value::Index(Rc::new(species)));
        state.insert(BATCH, Value::Index(Rc::new(batch)));
        if any_shifts {
            state.insert(EDGE_SHIFTS, Value::Tensor(Tensor::from_rows3(&shifts)));
        }
        Ok(state)
    }

    /// Number of structures in a collated state, from its batch vector.
    pub fn num_structures(state: &GraphState) -> Result<usize, Error> {
        let batch = state.index(BATCH)?;
        Ok(batch.iter().max().map_or(0, |&m| m + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dimer() -> AtomicGraph {
        AtomicGraph::new(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]], vec![0, 1])
            .with_edges(vec![[0, 1], [1, 0]])
    }

    #[test]
    fn validate_accepts_consistent_graph() {
        dimer().validate().unwrap();
    }

    #[test]
    fn validate_rejects_length_mismatch() {
        let mut g = dimer();
        g.species.pop();
        assert!(matches!(g.validate(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn validate_rejects_out_of_range_edge() {
        let g = dimer().with_edges(vec![[0, 5]]);
        assert!(matches!(g.validate(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn validate_rejects_unshifted_self_edge() {
        let g = dimer().with_edges(vec![[0, 0]]);
        assert!(matches!(g.validate(), Err(Error::InvalidGraph(_))));
    }

    #[test]
    fn collate_offsets_edges_and_assigns_batch() {
        let state = GraphBatch::collate(&[dimer(), dimer()]).unwrap();

        let positions = state.tensor(POSITIONS).unwrap();
        assert_eq!(positions.shape(), &[4, 3]);

        let edges = state.edges(EDGE_INDEX).unwrap();
        assert_eq!(edges.as_slice(), &[[0, 1], [1, 0], [2, 3], [3, 2]]);

        let batch = state.index(BATCH).unwrap();
        assert_eq!(batch.as_slice(), &[0, 0, 1, 1]);

        assert_eq!(GraphBatch::num_structures(&state).unwrap(), 2);
    }

    #[test]
    fn collate_pads_missing_shifts_with_zeros() {
        let mut periodic = dimer();
        periodic.edge_shifts = Some(vec![[2.0, 0.0, 0.0], [-2.0, 0.0, 0.0]]);
        let state = GraphBatch::collate(&[periodic, dimer()]).unwrap();

        let shifts = state.tensor(EDGE_SHIFTS).unwrap();
        assert_eq!(shifts.shape(), &[4, 3]);
        assert_eq!(shifts.data()[[0, 0]], 2.0);
        assert_eq!(shifts.data()[[2, 0]], 0.0);
    }

    #[test]
    fn collate_rejects_empty_batch() {
        assert!(matches!(
            GraphBatch::collate(&[]),
            Err(Error::InvalidGraph(_))
        ));
    }

    #[test]
    fn state_accessors_distinguish_kinds() {
        let state = GraphBatch::collate(&[dimer()]).unwrap();
        assert!(state.tensor(POSITIONS).is_ok());
        assert!(matches!(
            state.tensor(SPECIES),
            Err(Error::UnexpectedTensorShape { .. })
        ));
        assert!(matches!(
            state.index("velocity"),
            Err(Error::UnexpectedTensorShape { .. })
        ));
    }
}
