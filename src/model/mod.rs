//! Layers and their composition.
//!
//! Every layer implements [`Layer`] for a [`Device`]. A forward pass returns
//! the output, the meta describing it and an [`FpropState`] the caller hands
//! back to the same layer for [`Layer::bprop`] and [`Layer::grads`].
//!
//! Deltas travel with a [`Meta`] whose `space_below` names their layout, so a
//! layer accepts its output delta in any layout carrying the same axes and
//! always returns the input delta laid out like the input it saw.

pub mod cost;
pub mod csm;
pub mod embedding;
pub mod encoding;
pub mod nonlinearity;
pub mod pooling;
pub mod spec;
pub mod transfer;
pub mod transport;

use core::fmt;

use rand::Rng;

pub use self::cost::{CostState, CrossEntropy};
pub use self::csm::Csm;
pub use self::embedding::{WordEmbedding, WordEmbeddingConfig};
pub use self::encoding::DictionaryEncoding;
pub use self::nonlinearity::{Relu, Tanh};
pub use self::pooling::{FoldingConfig, KMaxPooling, KMaxPoolingConfig, MaxFolding, SumFolding};
pub use self::spec::{LayerConfig, LayerSpec};
pub use self::transfer::{
    Bias, BiasConfig, Linear, LinearConfig, SentenceConvolution, SentenceConvolutionConfig,
    Softmax, SoftmaxConfig,
};
pub use self::transport::{DeviceToHost, HostToDevice};

use crate::backend::Device;
use crate::error::{Error, Result};
use crate::mapping::{ComponentId, ComponentKind};
use crate::meta::Meta;
use crate::space::{Axis, Space};
use crate::tensors::{Ten64, Tensor};

/// What a layer keeps from fprop for bprop and grads.
#[derive(Debug, Clone, PartialEq)]
pub enum Saved<D: Device> {
    Nothing,
    /// The (rearranged) input.
    Input(D::Array),
    Output(D::Array),
    /// Elementwise derivative mask.
    Mask(D::Array),
    InputOutput { input: D::Array, output: D::Array },
    /// Source position of every output element, `None` for padding.
    Selection(Vec<Option<usize>>),
    /// Per output element: whether the second member of its pair won.
    Switches(Vec<bool>),
    /// Validated lookup indices.
    Indices(Vec<usize>),
    /// One state per nested layer.
    Layers(Vec<FpropState<D>>),
}

/// The record a layer returns from fprop.
#[derive(Debug, Clone, PartialEq)]
pub struct FpropState<D: Device> {
    /// The meta the layer received.
    pub meta: Meta,
    pub saved: Saved<D>,
}

impl<D: Device> FpropState<D> {
    pub fn new(meta: Meta, saved: Saved<D>) -> Self {
        Self { meta, saved }
    }
}

/// The fprop/bprop/grads contract shared by every layer.
pub trait Layer<D: Device>: fmt::Debug {
    fn kind(&self) -> ComponentKind;

    fn id(&self) -> ComponentId {
        ComponentId::new(self.kind(), D::BACKEND)
    }

    /// Forward pass.
    ///
    /// # Errors
    /// Shape, axis or configuration errors for inputs the layer cannot consume.
    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)>;

    /// Backward pass: the delta w.r.t. the layer input, in the input layout,
    /// with the meta the layer received in fprop.
    ///
    /// # Panics
    /// Panics if `state` was not produced by this layer's fprop.
    ///
    /// # Errors
    /// Shape or axis errors if `delta` does not match the fprop output.
    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)>;

    /// Parameter gradients in [`Layer::params`] order.
    ///
    /// # Errors
    /// See [`Layer::bprop`].
    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let _ = (delta, meta, state);
        Ok(Vec::new())
    }

    fn params(&self) -> Vec<&D::Array> {
        Vec::new()
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        Vec::new()
    }

    /// Replaces every parameter. Shapes are fixed at construction.
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the count or any shape differs.
    fn set_params(&mut self, params: Vec<Ten64>) -> Result<()> {
        let slots = self.params_mut();
        if slots.len() != params.len() {
            return Err(Error::mismatch("parameter count", [slots.len()], [params.len()]));
        }
        for (slot, new) in slots.iter().zip(&params) {
            let current = &D::host(slot).shape;
            if *current != new.shape {
                return Err(Error::mismatch("parameter shape", current.clone(), new.shape.clone()));
            }
        }
        for (slot, new) in slots.into_iter().zip(params) {
            *slot = D::from_host(new);
        }
        Ok(())
    }

    /// Configuration plus host copies of the parameters.
    fn describe(&self) -> LayerSpec;
}

/// Uniform initialisation in `±1/√fan_in`.
pub(crate) fn uniform<R: Rng>(rng: &mut R, shape: Vec<usize>, fan_in: usize) -> Ten64 {
    let bound = 1.0 / (fan_in as f64).sqrt();
    Tensor::from_fn(shape, |_| rng.random_range(-bound..bound))
}

/// Checks a list of given parameters against the expected shapes.
pub(crate) fn check_params(
    component: &'static str,
    params: &[Ten64],
    shapes: &[Vec<usize>],
) -> Result<()> {
    if params.len() != shapes.len() {
        return Err(Error::mismatch(component, [shapes.len()], [params.len()]));
    }
    for (param, shape) in params.iter().zip(shapes) {
        if param.shape != *shape {
            return Err(Error::mismatch(component, shape.clone(), param.shape.clone()));
        }
    }
    Ok(())
}

pub(crate) fn host_params<D: Device>(params: &[&D::Array]) -> Vec<Ten64> {
    params.iter().map(|p| D::host(p).clone()).collect()
}

/// Brings `delta` (laid out as `meta.space_below`) into `space`.
pub(crate) fn delta_in<D: Device>(delta: &D::Array, meta: &Meta, space: &Space) -> Result<Ten64> {
    let host = D::host(delta);
    if meta.space_below == *space {
        if host.shape != space.shape() {
            return Err(Error::mismatch("delta", space.shape(), host.shape.clone()));
        }
        return Ok(host.clone());
    }
    meta.space_below.transform_to(host, space)
}

/// Adds an axis of extent 1 if `space` lacks it.
pub(crate) fn ensure_axis(x: &Ten64, space: &Space, axis: Axis) -> Result<(Ten64, Space)> {
    let space = space.ensure_axis(axis);
    let x = x.clone().reshape(space.shape())?;
    Ok((x, space))
}

/// Groups `leading` then the remaining axes of `space` then `trailing`,
/// leaving out empty groups.
pub(crate) fn groups(space: &Space, leading: &[Axis], trailing: &[Axis]) -> Vec<Vec<Axis>> {
    let mut excluded = leading.to_vec();
    excluded.extend_from_slice(trailing);
    let rest = space.axes_except(&excluded);
    let mut out: Vec<Vec<Axis>> = leading.iter().map(|&a| vec![a]).collect();
    if !rest.is_empty() {
        out.push(rest);
    }
    out.extend(trailing.iter().map(|&a| vec![a]));
    out
}

/// Views an arranged tensor as a matrix of `rows` rows.
pub(crate) fn as_matrix(x: Ten64, rows: usize) -> Result<Ten64> {
    let cols = if rows == 0 { 0 } else { x.len() / rows };
    x.reshape(vec![rows, cols])
}

pub(crate) fn check_lengths(meta: &Meta, batch: usize, width: usize) -> Result<()> {
    if meta.lengths.len() != batch {
        return Err(Error::mismatch("lengths", [batch], [meta.lengths.len()]));
    }
    if let Some(&too_long) = meta.lengths.iter().find(|&&l| l > width) {
        return Err(Error::mismatch("sentence length", [width], [too_long]));
    }
    Ok(())
}

/// Panics on a state of the wrong variant.
#[track_caller]
pub(crate) fn foreign_state(kind: ComponentKind) -> ! {
    unreachable!("{kind} received an fprop state it did not produce")
}
