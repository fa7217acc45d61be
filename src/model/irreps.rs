//! Representation types for symmetry-typed tensor fields.
//!
//! Every tensor field on an atomic graph transforms in a known way under
//! rotations and inversion. This module provides the vocabulary for those
//! transformation behaviors:
//!
//! - [`Parity`] – behavior under inversion (even or odd).
//! - [`Irrep`] – one irreducible representation of O(3), a rotation order
//!   `l` paired with a parity.
//! - [`Irreps`] – a direct sum of irreps with multiplicities, e.g.
//!   `16x0e+8x1o`, describing the layout of a feature tensor's last axis.
//! - [`FieldType`] – either an [`Irreps`] contract or the unconstrained
//!   marker used for index and metadata fields.
//!
//! [`Irreps`] values round-trip through their string form, which is also the
//! form accepted in build-plan TOML.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Behavior of a representation under inversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    /// Invariant under inversion (`e`), like scalars and pseudovectors.
    Even,
    /// Sign flip under inversion (`o`), like Cartesian vectors.
    Odd,
}

impl Parity {
    /// Parity of the degree-`l` spherical harmonic, `(-1)^l`.
    #[inline]
    pub fn of_spherical_harmonic(l: u32) -> Self {
        if l % 2 == 0 { Parity::Even } else { Parity::Odd }
    }

    #[inline]
    fn symbol(self) -> char {
        match self {
            Parity::Even => 'e',
            Parity::Odd => 'o',
        }
    }
}

/// One irreducible representation of O(3): rotation order plus parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Irrep {
    /// Rotation order (angular degree). Dimension is `2l + 1`.
    pub l: u32,
    /// Behavior under inversion.
    pub parity: Parity,
}

impl Irrep {
    pub fn new(l: u32, parity: Parity) -> Self {
        Self { l, parity }
    }

    /// Dimension of the representation, `2l + 1`.
    #[inline]
    pub fn dim(&self) -> usize {
        2 * self.l as usize + 1
    }

    /// Whether this is the invariant scalar representation `0e`.
    #[inline]
    pub fn is_scalar(&self) -> bool {
        self.l == 0 && self.parity == Parity::Even
    }
}

impl fmt::Display for Irrep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.l, self.parity.symbol())
    }
}

impl FromStr for Irrep {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let s = s.trim();
        let parity = match s.chars().last() {
            Some('e') => Parity::Even,
            Some('o') => Parity::Odd,
            _ => return Err(Error::IrrepsParse(format!("missing parity in irrep '{}'", s))),
        };
        let l = s[..s.len() - 1]
            .parse::<u32>()
            .map_err(|_| Error::IrrepsParse(format!("invalid rotation order in irrep '{}'", s)))?;
        Ok(Irrep { l, parity })
    }
}

/// A direct sum of irreps with multiplicities.
///
/// Describes the symmetry layout of a feature tensor's last axis: the entry
/// `(mul, irrep)` contributes `mul * irrep.dim()` consecutive components.
/// The string form joins `MULxIRREP` terms with `+`, omitting `1x`
/// multiplicities on parse but not on display:
///
/// ```
/// use eqforge::Irreps;
///
/// let irreps: Irreps = "16x0e+8x1o".parse().unwrap();
/// assert_eq!(irreps.dim(), 16 + 8 * 3);
/// assert_eq!(irreps.to_string(), "16x0e+8x1o");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Irreps {
    entries: Vec<(usize, Irrep)>,
}

impl Irreps {
    /// Creates a direct sum from `(multiplicity, irrep)` entries.
    ///
    /// Zero-multiplicity entries are dropped; adjacent equal irreps are not
    /// merged, preserving the declared block order.
    pub fn new(entries: impl IntoIterator<Item = (usize, Irrep)>) -> Self {
        Self {
            entries: entries.into_iter().filter(|(mul, _)| *mul > 0).collect(),
        }
    }

    /// `n` copies of the invariant scalar `0e`.
    pub fn scalars(n: usize) -> Self {
        Self::new([(n, Irrep::new(0, Parity::Even))])
    }

    /// A single Cartesian vector, `1x1o`.
    pub fn vector() -> Self {
        Self::new([(1, Irrep::new(1, Parity::Odd))])
    }

    /// The direct sum of spherical harmonics of degrees `0..=lmax`, one copy
    /// each, with parity `(-1)^l`.
    pub fn spherical_harmonics(lmax: u32) -> Self {
        Self::new((0..=lmax).map(|l| (1, Irrep::new(l, Parity::of_spherical_harmonic(l)))))
    }

    /// Total dimension of the represented tensor axis.
    pub fn dim(&self) -> usize {
        self.entries.iter().map(|(mul, ir)| mul * ir.dim()).sum()
    }

    /// Number of `(multiplicity, irrep)` blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest rotation order present, or `None` for an empty sum.
    pub fn lmax(&self) -> Option<u32> {
        self.entries.iter().map(|(_, ir)| ir.l).max()
    }

    /// Whether every block is the invariant scalar `0e`.
    pub fn is_scalar(&self) -> bool {
        self.entries.iter().all(|(_, ir)| ir.is_scalar())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(usize, Irrep)> {
        self.entries.iter()
    }
}

impl fmt::Display for Irreps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "0x0e");
        }
        let mut first = true;
        for (mul, ir) in &self.entries {
            if !first {
                write!(f, "+")?;
            }
            write!(f, "{}x{}", mul, ir)?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Irreps {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut entries = Vec::new();
        for term in s.split('+') {
            let term = term.trim();
            if term.is_empty() {
                return Err(Error::IrrepsParse(format!("empty term in irreps '{}'", s)));
            }
            let (mul, irrep) = match term.split_once('x') {
                Some((mul, ir)) => {
                    let mul = mul.trim().parse::<usize>().map_err(|_| {
                        Error::IrrepsParse(format!("invalid multiplicity in term '{}'", term))
                    })?;
                    (mul, ir.parse::<Irrep>()?)
                }
                None => (1, term.parse::<Irrep>()?),
            };
            if mul > 0 {
                entries.push((mul, irrep));
            }
        }
        if entries.is_empty() {
            return Err(Error::IrrepsParse(format!("irreps '{}' has no nonzero terms", s)));
        }
        Ok(Irreps { entries })
    }
}

/// Symmetry contract of one named field in a type-state or schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// The field holds a tensor whose last axis follows the given layout.
    Irreps(Irreps),
    /// No symmetry contract; used for index and metadata fields, which skip
    /// type checking at module boundaries.
    Unconstrained,
}

impl FieldType {
    /// Convenience constructor parsing an irreps string.
    pub fn irreps(s: &str) -> Result<Self, Error> {
        Ok(FieldType::Irreps(s.parse()?))
    }

    /// The contained irreps, if constrained.
    pub fn as_irreps(&self) -> Option<&Irreps> {
        match self {
            FieldType::Irreps(ir) => Some(ir),
            FieldType::Unconstrained => None,
        }
    }

    #[inline]
    pub fn is_unconstrained(&self) -> bool {
        matches!(self, FieldType::Unconstrained)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Irreps(ir) => write!(f, "{}", ir),
            FieldType::Unconstrained => write!(f, "unconstrained"),
        }
    }
}

impl From<Irreps> for FieldType {
    fn from(ir: Irreps) -> Self {
        FieldType::Irreps(ir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn irrep_dims() {
        assert_eq!(Irrep::new(0, Parity::Even).dim(), 1);
        assert_eq!(Irrep::new(1, Parity::Odd).dim(), 3);
        assert_eq!(Irrep::new(3, Parity::Odd).dim(), 7);
    }

    #[test]
    fn irrep_round_trip() {
        for s in ["0e", "1o", "2e", "3o", "10e"] {
            let ir: Irrep = s.parse().unwrap();
            assert_eq!(ir.to_string(), s);
        }
    }

    #[test]
    fn irrep_rejects_garbage() {
        assert!(matches!("".parse::<Irrep>(), Err(Error::IrrepsParse(_))));
        assert!(matches!("1x".parse::<Irrep>(), Err(Error::IrrepsParse(_))));
        assert!(matches!("eo".parse::<Irrep>(), Err(Error::IrrepsParse(_))));
    }

    #[test]
    fn irreps_round_trip() {
        let ir: Irreps = "16x0e+8x1o+4x2e".parse().unwrap();
        assert_eq!(ir.to_string(), "16x0e+8x1o+4x2e");
        assert_eq!(ir.dim(), 16 + 24 + 20);
        assert_eq!(ir.num_blocks(), 3);
    }

    #[test]
    fn irreps_implicit_multiplicity() {
        let ir: Irreps = "0e + 1o".parse().unwrap();
        assert_eq!(ir, Irreps::spherical_harmonics(1));
    }

    #[test]
    fn irreps_drops_zero_multiplicity() {
        let ir: Irreps = "0x0e+2x1o".parse().unwrap();
        assert_eq!(ir.num_blocks(), 1);
        assert_eq!(ir.dim(), 6);
    }

    #[test]
    fn irreps_rejects_all_zero() {
        assert!(matches!("0x0e".parse::<Irreps>(), Err(Error::IrrepsParse(_))));
    }

    #[test]
    fn spherical_harmonics_layout() {
        let sh = Irreps::spherical_harmonics(2);
        assert_eq!(sh.to_string(), "1x0e+1x1o+1x2e");
        assert_eq!(sh.dim(), 9);
        assert_eq!(sh.lmax(), Some(2));
    }

    #[test]
    fn scalar_classification() {
        assert!(Irreps::scalars(8).is_scalar());
        assert!(!Irreps::vector().is_scalar());
        assert!(!Irreps::spherical_harmonics(1).is_scalar());
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::Unconstrained.to_string(), "unconstrained");
        assert_eq!(FieldType::Irreps(Irreps::vector()).to_string(), "1x1o");
    }
}
