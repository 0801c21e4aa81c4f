//! Operation Dispatch Layer
//!
//! Kernels of the [`Gpu`](crate::backend::Gpu) device land here. Each
//! function first tries the `wgpu` implementation (when the feature is
//! enabled and a context could be created) and falls back to the CPU kernel
//! otherwise, so results are available on every machine.
//!
//! # Example
//! ```rust
//! use csm::ops::dispatch;
//! use csm::tensor;
//!
//! let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let b = tensor!([[1.0], [1.0]]);
//! let c = dispatch::gemm(&a, false, &b, false); // uses GPU if available
//! assert_eq!(c.data, vec![3.0, 7.0]);
//! ```

use crate::backend::{Binary, Unary};
use crate::tensors::Ten64;

/// Dispatches matrix multiplication.
///
/// # Panics
/// Panics (in the CPU fallback) if the operands are not compatible 2-D arrays.
pub fn gemm(a: &Ten64, trans_a: bool, b: &Ten64, trans_b: bool) -> Ten64 {
    #[cfg(feature = "wgpu")]
    {
        if let Some(result) = super::wgpu::gemm(a, trans_a, b, trans_b) {
            return result;
        }
    }

    super::cpu::gemm(a, trans_a, b, trans_b)
}

/// Dispatches an elementwise single-input kernel.
pub fn unary(op: Unary, x: &Ten64) -> Ten64 {
    #[cfg(feature = "wgpu")]
    {
        if let Some(result) = super::wgpu::unary(op, x) {
            return result;
        }
    }

    super::cpu::unary(op, x)
}

/// Dispatches an elementwise two-input kernel.
pub fn binary(op: Binary, a: &Ten64, b: &Ten64) -> Ten64 {
    #[cfg(feature = "wgpu")]
    {
        if let Some(result) = super::wgpu::binary(op, a, b) {
            return result;
        }
    }

    super::cpu::binary(op, a, b)
}

/// Dispatches Stochastic Gradient Descent.
pub fn sgd(param: &mut Ten64, grad: &Ten64, lr: f64) {
    #[cfg(feature = "wgpu")]
    {
        if super::wgpu::sgd(param, grad, lr) {
            return;
        }
    }

    super::cpu::sgd(param, grad, lr)
}
