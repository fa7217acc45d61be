//! Spatial indexing for cutoff neighbor enumeration.
//!
//! This module provides a simple grid-based spatial index for building the
//! directed edge list of an atomic graph: every ordered pair of distinct
//! atoms within the cutoff radius becomes one edge.
//!
//! The search is non-periodic. Periodic systems supply precomputed edges
//! and shift vectors directly on the [`AtomicGraph`](super::graph::AtomicGraph).

use std::collections::HashMap;

/// Grid-based spatial index for 3D point queries.
///
/// Divides space into uniform cubic cells and stores atom indices in each
/// cell. A within-cutoff query then only inspects the 27 cells surrounding
/// the query point.
#[derive(Debug)]
pub struct SpatialGrid {
    /// Inverse cell size for fast coordinate-to-cell conversion.
    inv_cell_size: f64,
    /// Map from cell coordinates to atom indices.
    cells: HashMap<(i32, i32, i32), Vec<usize>>,
}

impl SpatialGrid {
    /// Creates a new spatial grid with the given cell size.
    ///
    /// # Arguments
    ///
    /// * `cell_size` — Size of each cubic cell (typically the cutoff radius)
    ///
    /// # Panics
    ///
    /// Panics if `cell_size <= 0.0`.
    pub fn new(cell_size: f64) -> Self {
        assert!(cell_size > 0.0, "Cell size must be positive");
        Self {
            inv_cell_size: 1.0 / cell_size,
            cells: HashMap::new(),
        }
    }

    /// Creates a spatial grid and populates it with atom positions.
    pub fn from_positions(positions: &[[f64; 3]], cell_size: f64) -> Self {
        let mut grid = Self::new(cell_size);
        for (idx, pos) in positions.iter().enumerate() {
            grid.insert(idx, *pos);
        }
        grid
    }

    /// Computes the cell coordinates for a given position.
    fn cell_coords(&self, pos: [f64; 3]) -> (i32, i32, i32) {
        (
            (pos[0] * self.inv_cell_size).floor() as i32,
            (pos[1] * self.inv_cell_size).floor() as i32,
            (pos[2] * self.inv_cell_size).floor() as i32,
        )
    }

    /// Inserts an atom index at the given position.
    pub fn insert(&mut self, idx: usize, pos: [f64; 3]) {
        let cell = self.cell_coords(pos);
        self.cells.entry(cell).or_default().push(idx);
    }

    /// Finds all atom indices within the cutoff radius of a query point,
    /// excluding `exclude` itself.
    fn query_radius(
        &self,
        query: [f64; 3],
        positions: &[[f64; 3]],
        cutoff: f64,
        exclude: usize,
    ) -> Vec<usize> {
        let cutoff_sq = cutoff * cutoff;
        let (cx, cy, cz) = self.cell_coords(query);

        let mut results = Vec::new();
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let cell = (cx + dx, cy + dy, cz + dz);
                    if let Some(indices) = self.cells.get(&cell) {
                        for &idx in indices {
                            if idx == exclude {
                                continue;
                            }
                            let pos = positions[idx];
                            let dist_sq = (pos[0] - query[0]).powi(2)
                                + (pos[1] - query[1]).powi(2)
                                + (pos[2] - query[2]).powi(2);
                            if dist_sq <= cutoff_sq {
                                results.push(idx);
                            }
                        }
                    }
                }
            }
        }

        results.sort_unstable();
        results
    }
}

/// Enumerates all directed within-cutoff edges of a structure.
///
/// Every ordered pair `(center, neighbor)` of distinct atoms with
/// `|r_neighbor - r_center| <= cutoff` yields one edge; both directions are
/// present. Edges are sorted by center, then neighbor.
///
/// # Arguments
///
/// * `positions` — Slice of 3D positions [x, y, z] in Ångströms
/// * `cutoff` — Maximum neighbor distance
pub fn neighbor_list(positions: &[[f64; 3]], cutoff: f64) -> Vec<[usize; 2]> {
    let grid = SpatialGrid::from_positions(positions, cutoff);
    let mut edges = Vec::new();
    for (center, &pos) in positions.iter().enumerate() {
        for neighbor in grid.query_radius(pos, positions, cutoff, center) {
            edges.push([center, neighbor]);
        }
    }
    edges
}
