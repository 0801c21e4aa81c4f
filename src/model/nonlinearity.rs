//! Elementwise nonlinearities.

use core::marker::PhantomData;

use super::{FpropState, Layer, LayerConfig, LayerSpec, Saved, delta_in, foreign_state};
use crate::backend::{Binary, Device, Unary};
use crate::error::Result;
use crate::mapping::ComponentKind;
use crate::meta::Meta;

/// `max(x, 0)`.
#[derive(Debug, Clone, Default)]
pub struct Relu<D: Device>(PhantomData<D>);

impl<D: Device> Relu<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<D: Device> Layer<D> for Relu<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Relu
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let y = D::unary(Unary::Relu, x);
        let mask = D::unary(Unary::ReluMask, x);
        let out_meta = meta.clone().produced(ComponentKind::Relu);
        Ok((y, out_meta, FpropState::new(meta, Saved::Mask(mask))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let Saved::Mask(mask) = &state.saved else {
            foreign_state(self.kind())
        };
        let delta = D::from_host(delta_in::<D>(delta, &meta, &state.meta.space_below)?);
        Ok((D::binary(Binary::Mul, &delta, mask), state.meta.clone()))
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::Relu, Vec::new())
    }
}

/// Hyperbolic tangent.
#[derive(Debug, Clone, Default)]
pub struct Tanh<D: Device>(PhantomData<D>);

impl<D: Device> Tanh<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<D: Device> Layer<D> for Tanh<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Tanh
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let y = D::unary(Unary::Tanh, x);
        let out_meta = meta.clone().produced(ComponentKind::Tanh);
        Ok((y.clone(), out_meta, FpropState::new(meta, Saved::Output(y))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let Saved::Output(y) = &state.saved else {
            foreign_state(self.kind())
        };
        let delta = D::from_host(delta_in::<D>(delta, &meta, &state.meta.space_below)?);
        Ok((D::binary(Binary::TanhGrad, &delta, y), state.meta.clone()))
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::Tanh, Vec::new())
    }
}
