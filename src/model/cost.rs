//! Costs: the scalar at the top of a backward pass.

use core::marker::PhantomData;

use super::delta_in;
use crate::backend::Device;
use crate::error::{Error, Result};
use crate::mapping::{ComponentId, ComponentKind};
use crate::meta::Meta;
use crate::space::{Axis, Space};
use crate::tensors::Ten64;

/// What [`CrossEntropy::fprop`] keeps for [`CrossEntropy::bprop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CostState {
    /// Whether the prediction came straight out of a softmax.
    pub fused: bool,
    pub batch: usize,
    /// Layout of the delta, `[c][b]`.
    pub space: Space,
}

/// Mean cross entropy `−Σ t·log(y) / batch` between class probabilities `y`
/// (laid out `[c][b]`) and targets of shape `(c, b)`.
///
/// Entries with a zero target are skipped, so one-hot targets never evaluate
/// `log(0)` for classes with zero probability.
#[derive(Debug, Clone, Default)]
pub struct CrossEntropy<D: Device>(PhantomData<D>);

impl<D: Device> CrossEntropy<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(ComponentKind::CrossEntropy, D::BACKEND)
    }

    fn arrange(&self, y: &D::Array, target: &D::Array, meta: &Meta) -> Result<(Ten64, Space)> {
        let space = meta.space_below.regroup(&[[Axis::Class], [Axis::Batch]])?;
        let y = delta_in::<D>(y, meta, &space)?;
        let target = D::host(target);
        if target.shape != y.shape {
            return Err(Error::mismatch("cross entropy target", y.shape.clone(), target.shape.clone()));
        }
        Ok((y, space))
    }

    /// # Errors
    /// [`Error::ShapeMismatch`] if `target` is not `(c, b)`; [`Error::Axis`]
    /// if `y` lacks a class or batch axis.
    pub fn fprop(&self, y: &D::Array, target: &D::Array, meta: &Meta) -> Result<(f64, Meta, CostState)> {
        let (y, space) = self.arrange(y, target, meta)?;
        let batch = space.extent(Axis::Batch)?;
        let total: f64 = y
            .data
            .iter()
            .zip(&D::host(target).data)
            .filter(|&(_, &t)| t != 0.0)
            .map(|(&y, &t)| t * y.ln())
            .sum();
        let cost = -total / batch.max(1) as f64;
        let state = CostState {
            fused: meta.produced_by == Some(ComponentKind::Softmax),
            batch,
            space,
        };
        Ok((cost, meta.clone(), state))
    }

    /// The delta of the cost. Behind a softmax it is taken w.r.t. the softmax
    /// logits (`(y − t)/batch`) and flagged in the returned meta; otherwise
    /// it is `−t/(y·batch)`.
    ///
    /// # Errors
    /// See [`CrossEntropy::fprop`].
    pub fn bprop(
        &self,
        y: &D::Array,
        target: &D::Array,
        meta: &Meta,
        state: &CostState,
    ) -> Result<(D::Array, Meta)> {
        let (y, _) = self.arrange(y, target, meta)?;
        let scale = state.batch.max(1) as f64;
        let target = D::host(target);
        let delta = if state.fused {
            y.zip_map(target, |&y, &t| (y - t) / scale)
        } else {
            y.zip_map(target, |&y, &t| if t == 0.0 { 0.0 } else { -t / (y * scale) })
        };
        let mut out_meta = meta.clone().with_space(state.space.clone());
        out_meta.logit_delta = state.fused;
        Ok((D::from_host(delta), out_meta))
    }
}
