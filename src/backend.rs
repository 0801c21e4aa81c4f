//! Backend selection module.
//!
//! This module defines the two computation backends every layer is written
//! against and the [`Device`] trait through which layers reach them.
//!
//! # Supported Backends
//!
//! - [`Cpu`]: host-resident [`Ten64`] arrays, kernels in [`ops::cpu`](crate::ops::cpu).
//! - [`Gpu`]: device-resident [`DeviceTensor`] arrays. Kernels are dispatched to
//!   `wgpu` compute shaders when the `wgpu` feature is enabled and a suitable
//!   adapter exists, and to the CPU kernels otherwise.
//!
//! A layer is instantiated for one backend at the type level (`Linear<Cpu>`,
//! `Linear<Gpu>`), so there is no global backend switch. Moving a model
//! between backends goes through the [`ComponentRegistry`](crate::mapping::ComponentRegistry).

use core::fmt;

use crate::ops::{cpu, dispatch};
use crate::tensors::Ten64;

/// Identifies which side of the host/device boundary a component lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Backend {
    /// Pure CPU-based backend (default).
    #[default]
    Cpu,
    /// Device-resident arrays, GPU-accelerated where available.
    Gpu,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cpu => "cpu",
            Self::Gpu => "gpu",
        })
    }
}

/// Elementwise single-input kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unary {
    /// `max(x, 0)`
    Relu,
    /// `1` where `x > 0`, else `0`
    ReluMask,
    Tanh,
}

/// Elementwise two-input kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binary {
    /// `a * b`
    Mul,
    /// `a * (1 - b * b)`: a delta through a tanh whose output is `b`.
    TanhGrad,
}

/// The array-computation collaborator of every layer.
///
/// Only the dense kernels that dominate a forward/backward pass go through
/// the device. Index-heavy bookkeeping (pooling, folding, embedding lookups)
/// reads the host view of the array.
pub trait Device: Copy + Default + fmt::Debug + Send + Sync + 'static {
    const BACKEND: Backend;

    /// The array type layers hold parameters and activations in.
    type Array: Clone + fmt::Debug + PartialEq + Send + Sync;

    fn from_host(tensor: Ten64) -> Self::Array;
    fn host(array: &Self::Array) -> &Ten64;
    fn host_mut(array: &mut Self::Array) -> &mut Ten64;
    fn into_host(array: Self::Array) -> Ten64;

    /// `op(a) × op(b)` where `op` optionally transposes a 2-D array.
    ///
    /// # Panics
    /// Panics if the operands are not 2-D or their inner dimensions differ.
    fn gemm(a: &Self::Array, trans_a: bool, b: &Self::Array, trans_b: bool) -> Self::Array;

    fn unary(op: Unary, x: &Self::Array) -> Self::Array;

    /// # Panics
    /// Panics if the operand shapes differ.
    fn binary(op: Binary, a: &Self::Array, b: &Self::Array) -> Self::Array;

    /// `param -= lr * grad` in place.
    ///
    /// # Panics
    /// Panics if the operand shapes differ.
    fn sgd(param: &mut Self::Array, grad: &Self::Array, lr: f64);
}

/// Host backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cpu;

/// Device backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Gpu;

impl Device for Cpu {
    const BACKEND: Backend = Backend::Cpu;
    type Array = Ten64;

    fn from_host(tensor: Ten64) -> Ten64 {
        tensor
    }

    fn host(array: &Ten64) -> &Ten64 {
        array
    }

    fn host_mut(array: &mut Ten64) -> &mut Ten64 {
        array
    }

    fn into_host(array: Ten64) -> Ten64 {
        array
    }

    fn gemm(a: &Ten64, trans_a: bool, b: &Ten64, trans_b: bool) -> Ten64 {
        cpu::gemm(a, trans_a, b, trans_b)
    }

    fn unary(op: Unary, x: &Ten64) -> Ten64 {
        cpu::unary(op, x)
    }

    fn binary(op: Binary, a: &Ten64, b: &Ten64) -> Ten64 {
        cpu::binary(op, a, b)
    }

    fn sgd(param: &mut Ten64, grad: &Ten64, lr: f64) {
        cpu::sgd(param, grad, lr);
    }
}

/// An array owned by the [`Gpu`] backend.
///
/// The buffer is mirrored in host memory; kernels upload it, run, and read
/// the result back before returning, so the mirror is always current.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceTensor {
    mirror: Ten64,
}

impl DeviceTensor {
    pub fn shape(&self) -> &[usize] {
        &self.mirror.shape
    }
}

impl Device for Gpu {
    const BACKEND: Backend = Backend::Gpu;
    type Array = DeviceTensor;

    fn from_host(tensor: Ten64) -> DeviceTensor {
        DeviceTensor { mirror: tensor }
    }

    fn host(array: &DeviceTensor) -> &Ten64 {
        &array.mirror
    }

    fn host_mut(array: &mut DeviceTensor) -> &mut Ten64 {
        &mut array.mirror
    }

    fn into_host(array: DeviceTensor) -> Ten64 {
        array.mirror
    }

    fn gemm(a: &DeviceTensor, trans_a: bool, b: &DeviceTensor, trans_b: bool) -> DeviceTensor {
        Self::from_host(dispatch::gemm(&a.mirror, trans_a, &b.mirror, trans_b))
    }

    fn unary(op: Unary, x: &DeviceTensor) -> DeviceTensor {
        Self::from_host(dispatch::unary(op, &x.mirror))
    }

    fn binary(op: Binary, a: &DeviceTensor, b: &DeviceTensor) -> DeviceTensor {
        Self::from_host(dispatch::binary(op, &a.mirror, &b.mirror))
    }

    fn sgd(param: &mut DeviceTensor, grad: &DeviceTensor, lr: f64) {
        dispatch::sgd(&mut param.mirror, &grad.mirror, lr);
    }
}
