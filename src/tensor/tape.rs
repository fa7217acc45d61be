//! Reverse-mode differentiation over recorded tensor operations.
//!
//! The [`Tape`] records every primitive operation applied to tensors that
//! descend from one of its leaves. Because operations are recorded in
//! execution order, the recording order is already a topological order of
//! the computation, and [`Tape::backward`] accumulates vector-Jacobian
//! products in a single reverse sweep.
//!
//! A fresh tape is created per differentiated call; tapes are never shared
//! across batches or threads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use ndarray::{ArrayD, Axis};

use super::{broadcast_mul, reduce_to, Tensor};

/// Identifier of one recorded operation on a [`Tape`].
pub type NodeId = usize;

/// One operand of a recorded operation.
///
/// The operand's data is always saved for the backward rules; `id` is set
/// only when the operand itself was recorded on the tape (constants and
/// parameters receive no gradient).
#[derive(Debug, Clone)]
pub(crate) struct Source {
    pub(crate) id: Option<NodeId>,
    pub(crate) data: Rc<ArrayD<f64>>,
}

#[derive(Debug)]
pub(crate) enum Op {
    Leaf,
    Add(Source, Source),
    Sub(Source, Source),
    Neg(Source),
    Mul(Source, Source),
    Div(Source, Source),
    Scale(Source, f64),
    Shift(Source),
    Matmul(Source, Source),
    Powi(Source, i32),
    /// Saves the forward output: d√x = g / (2√x).
    Sqrt(Source, Rc<ArrayD<f64>>),
    Sin(Source),
    Silu(Source),
    SumLast(Source),
    Gather(Source, Rc<Vec<usize>>),
    SegmentSum(Source, Rc<Vec<usize>>),
    ConcatCols(Vec<Source>),
    SliceCols(Source, usize),
}

/// Recording of primitive tensor operations for one differentiated call.
#[derive(Debug, Default)]
pub struct Tape {
    nodes: RefCell<Vec<Op>>,
}

impl Tape {
    /// Creates an empty tape behind the shared handle tensors hold.
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Number of recorded operations.
    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub(crate) fn record(&self, op: Op) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        nodes.push(op);
        nodes.len() - 1
    }

    /// Runs the reverse sweep from `output`, seeding with ones.
    ///
    /// For a multi-row output this computes the gradient of the sum of its
    /// entries, which for per-structure outputs of a batched graph is the
    /// per-structure gradient (structures do not mix). An `output` that was
    /// never recorded on this tape depends on no leaf, so the result holds
    /// all-zero gradients.
    pub fn backward(self: &Rc<Self>, output: &Tensor) -> Gradients {
        let nodes = self.nodes.borrow();
        let mut grads: HashMap<NodeId, ArrayD<f64>> = HashMap::new();

        let seed_id = match output.node_on(self) {
            Some(id) => id,
            None => {
                return Gradients {
                    tape: Rc::clone(self),
                    grads,
                }
            }
        };
        grads.insert(seed_id, ArrayD::ones(output.data().raw_dim()));

        for id in (0..=seed_id).rev() {
            let g = match grads.remove(&id) {
                Some(g) => g,
                None => continue,
            };
            match &nodes[id] {
                Op::Leaf => {
                    // Leaves keep their accumulated gradient.
                    grads.insert(id, g);
                }
                Op::Add(a, b) => {
                    accumulate(&mut grads, a, g.clone());
                    accumulate(&mut grads, b, g);
                }
                Op::Sub(a, b) => {
                    accumulate(&mut grads, a, g.clone());
                    accumulate(&mut grads, b, -g);
                }
                Op::Neg(a) => accumulate(&mut grads, a, -g),
                Op::Mul(a, b) => {
                    accumulate(&mut grads, a, broadcast_mul(&g, &b.data));
                    accumulate(&mut grads, b, broadcast_mul(&g, &a.data));
                }
                Op::Div(a, b) => {
                    let ga = broadcast_mul(&g, &b.data.mapv(f64::recip));
                    accumulate(&mut grads, a, ga);
                    let b_sq_inv = b.data.mapv(|x| -1.0 / (x * x));
                    let gb = broadcast_mul(&broadcast_mul(&g, &a.data), &b_sq_inv);
                    accumulate(&mut grads, b, gb);
                }
                Op::Scale(a, c) => accumulate(&mut grads, a, g * *c),
                Op::Shift(a) => accumulate(&mut grads, a, g),
                Op::Matmul(a, b) => {
                    let g2 = as_2d(&g);
                    let a2 = as_2d(&a.data);
                    let b2 = as_2d(&b.data);
                    accumulate(&mut grads, a, g2.dot(&b2.t()).into_dyn());
                    accumulate(&mut grads, b, a2.t().dot(&g2).into_dyn());
                }
                Op::Powi(a, n) => {
                    let d = a.data.mapv(|x| *n as f64 * x.powi(n - 1));
                    accumulate(&mut grads, a, g * &d);
                }
                Op::Sqrt(a, out) => {
                    let d = out.mapv(|y| 0.5 / y);
                    accumulate(&mut grads, a, g * &d);
                }
                Op::Sin(a) => {
                    accumulate(&mut grads, a, g * &a.data.mapv(f64::cos));
                }
                Op::Silu(a) => {
                    let d = a.data.mapv(|x| {
                        let s = 1.0 / (1.0 + (-x).exp());
                        s + x * s * (1.0 - s)
                    });
                    accumulate(&mut grads, a, g * &d);
                }
                Op::SumLast(a) => {
                    let expanded = g
                        .broadcast(a.data.raw_dim())
                        .map(|view| view.to_owned());
                    match expanded {
                        Some(ga) => accumulate(&mut grads, a, ga),
                        None => unreachable!("sum_last gradient broadcasts to the input shape"),
                    }
                }
                Op::Gather(a, index) => {
                    let mut ga = ArrayD::zeros(a.data.raw_dim());
                    for (row, &src) in index.iter().enumerate() {
                        let mut target = ga.index_axis_mut(Axis(0), src);
                        target += &g.index_axis(Axis(0), row);
                    }
                    accumulate(&mut grads, a, ga);
                }
                Op::SegmentSum(a, index) => {
                    let mut ga = ArrayD::zeros(a.data.raw_dim());
                    for (row, &segment) in index.iter().enumerate() {
                        let mut target = ga.index_axis_mut(Axis(0), row);
                        target += &g.index_axis(Axis(0), segment);
                    }
                    accumulate(&mut grads, a, ga);
                }
                Op::ConcatCols(parts) => {
                    let mut start = 0;
                    for part in parts {
                        let width = part.data.shape()[1];
                        let slice = g
                            .slice_axis(Axis(1), ndarray::Slice::from(start..start + width))
                            .to_owned();
                        accumulate(&mut grads, part, slice);
                        start += width;
                    }
                }
                Op::SliceCols(a, start) => {
                    let width = g.shape()[1];
                    let mut ga = ArrayD::zeros(a.data.raw_dim());
                    ga.slice_axis_mut(Axis(1), ndarray::Slice::from(*start..*start + width))
                        .assign(&g);
                    accumulate(&mut grads, a, ga);
                }
            }
        }

        Gradients {
            tape: Rc::clone(self),
            grads,
        }
    }
}

/// Adds a vector-Jacobian contribution to a recorded operand, reducing
/// broadcast axes back to the operand's shape. Constants are skipped.
fn accumulate(grads: &mut HashMap<NodeId, ArrayD<f64>>, src: &Source, g: ArrayD<f64>) {
    let id = match src.id {
        Some(id) => id,
        None => return,
    };
    let g = reduce_to(g, src.data.shape());
    match grads.get_mut(&id) {
        Some(acc) => *acc += &g,
        None => {
            grads.insert(id, g);
        }
    }
}

fn as_2d(data: &ArrayD<f64>) -> ndarray::ArrayView2<'_, f64> {
    match data.view().into_dimensionality::<ndarray::Ix2>() {
        Ok(view) => view,
        Err(_) => unreachable!("matmul operands are recorded as 2-D"),
    }
}

/// Gradient lookup produced by [`Tape::backward`].
#[derive(Debug)]
pub struct Gradients {
    tape: Rc<Tape>,
    grads: HashMap<NodeId, ArrayD<f64>>,
}

impl Gradients {
    /// Gradient of the seeded output with respect to `tensor`.
    ///
    /// Returns zeros of the tensor's shape when no gradient flows to it:
    /// the tensor is a constant, lives on a different tape, or the output
    /// does not depend on it.
    pub fn wrt(&self, tensor: &Tensor) -> ArrayD<f64> {
        tensor
            .node_on(&self.tape)
            .and_then(|id| self.grads.get(&id))
            .cloned()
            .unwrap_or_else(|| ArrayD::zeros(tensor.data().raw_dim()))
    }
}
