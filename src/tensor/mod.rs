//! Dense f64 tensors with optional gradient recording.
//!
//! [`Tensor`] is a cheap-to-clone handle around an [`ndarray`] array. All
//! graph-state tensors in this crate are two-dimensional: rows index atoms,
//! edges, or structures; columns index the components laid out by the
//! field's irreps. Operations compute eagerly; when an operand descends
//! from a [`Tape`] leaf, the operation is additionally recorded so the tape
//! can run a reverse sweep afterwards.
//!
//! Shape errors in these kernels follow `ndarray` panic semantics. The
//! composition layer validates every declared shape before execution, so a
//! panic here indicates a module bug, not bad user input.

mod tape;

pub use tape::{Gradients, NodeId, Tape};

use std::rc::Rc;

use ndarray::{Array2, ArrayD, ArrayViewD, Axis};

use tape::{Op, Source};

/// A dense f64 tensor, optionally recorded on a gradient tape.
#[derive(Debug, Clone)]
pub struct Tensor {
    data: Rc<ArrayD<f64>>,
    node: Option<(Rc<Tape>, NodeId)>,
}

impl Tensor {
    /// Creates a constant tensor from a 2-D array.
    pub fn new(data: Array2<f64>) -> Self {
        Self::from_dyn(data.into_dyn())
    }

    /// Creates a constant tensor from a dynamic-dimensional array.
    pub fn from_dyn(data: ArrayD<f64>) -> Self {
        Self {
            data: Rc::new(data),
            node: None,
        }
    }

    /// An `n x 3` tensor from Cartesian rows.
    pub fn from_rows3(rows: &[[f64; 3]]) -> Self {
        let mut data = Array2::zeros((rows.len(), 3));
        for (i, row) in rows.iter().enumerate() {
            for (j, &x) in row.iter().enumerate() {
                data[[i, j]] = x;
            }
        }
        Self::new(data)
    }

    /// An `n x 1` column tensor from scalars.
    pub fn from_scalars(values: &[f64]) -> Self {
        Self::new(Array2::from_shape_fn((values.len(), 1), |(i, _)| values[i]))
    }

    /// A constant tensor of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::new(Array2::zeros((rows, cols)))
    }

    /// A constant tensor of ones.
    pub fn ones(rows: usize, cols: usize) -> Self {
        Self::new(Array2::ones((rows, cols)))
    }

    /// Registers this tensor's data as a leaf on `tape` and returns the
    /// tracked handle. Gradients of downstream results can then be looked
    /// up with respect to the returned tensor.
    pub fn tracked(&self, tape: &Rc<Tape>) -> Tensor {
        let id = tape.record(Op::Leaf);
        Tensor {
            data: Rc::clone(&self.data),
            node: Some((Rc::clone(tape), id)),
        }
    }

    /// A constant copy of this tensor, detached from any tape.
    pub fn detached(&self) -> Tensor {
        Tensor {
            data: Rc::clone(&self.data),
            node: None,
        }
    }

    #[inline]
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Row count of a 2-D tensor.
    #[inline]
    pub fn nrows(&self) -> usize {
        self.data.shape()[0]
    }

    /// Column count of a 2-D tensor.
    #[inline]
    pub fn ncols(&self) -> usize {
        self.data.shape()[1]
    }

    pub(crate) fn node_on(&self, tape: &Rc<Tape>) -> Option<NodeId> {
        match &self.node {
            Some((own, id)) if Rc::ptr_eq(own, tape) => Some(*id),
            _ => None,
        }
    }

    fn source(&self) -> Source {
        Source {
            id: self.node.as_ref().map(|(_, id)| *id),
            data: Rc::clone(&self.data),
        }
    }

    fn unary(&self, out: ArrayD<f64>, op: impl FnOnce(Source) -> Op) -> Tensor {
        let node = self
            .node
            .as_ref()
            .map(|(tape, _)| (Rc::clone(tape), tape.record(op(self.source()))));
        Tensor {
            data: Rc::new(out),
            node,
        }
    }

    fn binary(&self, other: &Tensor, out: ArrayD<f64>, op: impl FnOnce(Source, Source) -> Op) -> Tensor {
        let tape = join_tapes(&[self, other]);
        let node = tape.map(|tape| {
            let id = tape.record(op(self.source(), other.source()));
            (tape, id)
        });
        Tensor {
            data: Rc::new(out),
            node,
        }
    }

    /// Elementwise sum, broadcasting an `n x 1` operand across columns.
    pub fn add(&self, other: &Tensor) -> Tensor {
        let out = broadcast_zip(&self.data, &other.data, |a, b| a + b);
        self.binary(other, out, Op::Add)
    }

    /// Elementwise difference, with the same broadcasting as [`add`](Self::add).
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let out = broadcast_zip(&self.data, &other.data, |a, b| a - b);
        self.binary(other, out, Op::Sub)
    }

    /// Elementwise product, with the same broadcasting as [`add`](Self::add).
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let out = broadcast_zip(&self.data, &other.data, |a, b| a * b);
        self.binary(other, out, Op::Mul)
    }

    /// Elementwise quotient, with the same broadcasting as [`add`](Self::add).
    pub fn div(&self, other: &Tensor) -> Tensor {
        let out = broadcast_zip(&self.data, &other.data, |a, b| a / b);
        self.binary(other, out, Op::Div)
    }

    pub fn neg(&self) -> Tensor {
        self.unary(self.data.mapv(|x| -x), Op::Neg)
    }

    /// Multiplication by a compile-time constant.
    pub fn scale(&self, c: f64) -> Tensor {
        self.unary(self.data.mapv(|x| c * x), |a| Op::Scale(a, c))
    }

    /// Addition of a constant offset.
    pub fn shift(&self, c: f64) -> Tensor {
        self.unary(self.data.mapv(|x| x + c), Op::Shift)
    }

    /// 2-D matrix product `self @ other`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        let a = to_2d(&self.data);
        let b = to_2d(&other.data);
        let out = a.dot(&b).into_dyn();
        self.binary(other, out, Op::Matmul)
    }

    /// Elementwise integer power.
    pub fn powi(&self, n: i32) -> Tensor {
        self.unary(self.data.mapv(|x| x.powi(n)), |a| Op::Powi(a, n))
    }

    /// Elementwise square root.
    pub fn sqrt(&self) -> Tensor {
        let out = self.data.mapv(f64::sqrt);
        let saved = Rc::new(out.clone());
        self.unary(out, |a| Op::Sqrt(a, saved))
    }

    /// Elementwise sine.
    pub fn sin(&self) -> Tensor {
        self.unary(self.data.mapv(f64::sin), Op::Sin)
    }

    /// Elementwise SiLU, `x * sigmoid(x)`.
    pub fn silu(&self) -> Tensor {
        let out = self.data.mapv(|x| x / (1.0 + (-x).exp()));
        self.unary(out, Op::Silu)
    }

    /// Sum over the last axis, keeping it as a singleton: `n x k -> n x 1`.
    pub fn sum_last(&self) -> Tensor {
        let axis = Axis(self.data.ndim() - 1);
        let out = self.data.sum_axis(axis).insert_axis(axis);
        self.unary(out, Op::SumLast)
    }

    /// Selects rows by index: row `r` of the result is row `index[r]` of
    /// `self`. Gradients scatter-add back through repeated indices.
    pub fn gather(&self, index: &Rc<Vec<usize>>) -> Tensor {
        let out = self.data.select(Axis(0), index.as_slice());
        self.unary(out, |a| Op::Gather(a, Rc::clone(index)))
    }

    /// Sums rows into `segments` buckets: row `r` of `self` is added to row
    /// `index[r]` of the result. `index` must have one entry per row of
    /// `self`, each below `segments`.
    pub fn segment_sum(&self, index: &Rc<Vec<usize>>, segments: usize) -> Tensor {
        assert_eq!(
            index.len(),
            self.nrows(),
            "segment index must have one entry per row"
        );
        let mut out = ArrayD::zeros(ndarray::IxDyn(&[segments, self.ncols()]));
        for (row, &segment) in index.iter().enumerate() {
            let mut target = out.index_axis_mut(Axis(0), segment);
            target += &self.data.index_axis(Axis(0), row);
        }
        self.unary(out, |a| Op::SegmentSum(a, Rc::clone(index)))
    }

    /// Concatenates tensors along the column axis.
    pub fn concat_cols(parts: &[Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_cols requires at least one part");
        let views: Vec<ArrayViewD<'_, f64>> = parts.iter().map(|p| p.data.view()).collect();
        let out = match ndarray::concatenate(Axis(1), &views) {
            Ok(out) => out,
            Err(_) => panic!("concatenated parts must have equal row counts"),
        };
        let refs: Vec<&Tensor> = parts.iter().collect();
        let tape = join_tapes(&refs);
        let node = tape.map(|tape| {
            let id = tape.record(Op::ConcatCols(parts.iter().map(Tensor::source).collect()));
            (tape, id)
        });
        Tensor {
            data: Rc::new(out),
            node,
        }
    }

    /// Selects `width` consecutive columns starting at `start`.
    pub fn slice_cols(&self, start: usize, width: usize) -> Tensor {
        let out = self
            .data
            .slice_axis(Axis(1), ndarray::Slice::from(start..start + width))
            .to_owned();
        self.unary(out, |a| Op::SliceCols(a, start))
    }
}

/// The common tape of a set of operands, if any is tracked.
///
/// Mixing operands recorded on different tapes is a programming error.
fn join_tapes(tensors: &[&Tensor]) -> Option<Rc<Tape>> {
    let mut found: Option<Rc<Tape>> = None;
    for t in tensors {
        if let Some((tape, _)) = &t.node {
            match &found {
                Some(existing) => {
                    assert!(
                        Rc::ptr_eq(existing, tape),
                        "operands are recorded on different tapes"
                    );
                }
                None => found = Some(Rc::clone(tape)),
            }
        }
    }
    found
}

fn to_2d(data: &ArrayD<f64>) -> ndarray::ArrayView2<'_, f64> {
    match data.view().into_dimensionality::<ndarray::Ix2>() {
        Ok(view) => view,
        Err(_) => panic!("operation requires a 2-D tensor, got shape {:?}", data.shape()),
    }
}

/// Elementwise combine with NumPy-style broadcasting across singleton axes.
fn broadcast_zip(a: &ArrayD<f64>, b: &ArrayD<f64>, f: impl Fn(f64, f64) -> f64) -> ArrayD<f64> {
    let shape = broadcast_shape(a.shape(), b.shape());
    let av = broadcast_view(a, &shape);
    let bv = broadcast_view(b, &shape);
    ndarray::Zip::from(&av).and(&bv).map_collect(|&x, &y| f(x, y))
}

pub(crate) fn broadcast_mul(a: &ArrayD<f64>, b: &ArrayD<f64>) -> ArrayD<f64> {
    broadcast_zip(a, b, |x, y| x * y)
}

fn broadcast_shape(a: &[usize], b: &[usize]) -> Vec<usize> {
    assert_eq!(a.len(), b.len(), "operands must have equal rank");
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            assert!(
                x == y || x == 1 || y == 1,
                "shapes {:?} and {:?} are not broadcast-compatible",
                a,
                b
            );
            x.max(y)
        })
        .collect()
}

fn broadcast_view<'a>(data: &'a ArrayD<f64>, shape: &[usize]) -> ArrayViewD<'a, f64> {
    match data.broadcast(ndarray::IxDyn(shape)) {
        Some(view) => view,
        None => unreachable!("shape compatibility checked by broadcast_shape"),
    }
}

/// Sums a gradient over axes broadcast away from `shape`, restoring the
/// operand's singleton axes.
pub(crate) fn reduce_to(mut g: ArrayD<f64>, shape: &[usize]) -> ArrayD<f64> {
    for ax in 0..shape.len() {
        if shape[ax] == 1 && g.shape()[ax] != 1 {
            g = g.sum_axis(Axis(ax)).insert_axis(Axis(ax));
        }
    }
    g
}
