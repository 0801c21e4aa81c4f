//! Parallel CPU backend tensor operations
//!
//! # CPU Backend
//!
//! This module provides the host implementations of every kernel the layers
//! use. They back the [`Cpu`](crate::backend::Cpu) device directly and are the
//! fallback of the [`dispatch`](super::dispatch) layer for the GPU device.
//!
//! ## Implemented Ops
//!
//! - `gemm`: matrix multiplication with optional transposes
//! - `unary` / `binary`: elementwise activations and their derivatives
//! - `add_column`, `row_sums`: bias broadcast and reduction
//! - `softmax_columns`, `softmax_backward`: column-wise softmax
//! - `sentence_convolution` and its two backward kernels
//! - `sgd`: in-place stochastic gradient descent step
//!
//! ## Design Goals
//!
//! - Deterministic results: each output element is one sequential reduction
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)

use rayon::prelude::*;

use crate::backend::{Binary, Unary};
use crate::tensors::{Ten64, Tensor};

#[inline]
fn dims2(t: &Ten64, transposed: bool) -> (usize, usize) {
    assert_eq!(t.rank(), 2, "gemm operands must be 2-D, got shape {:?}", t.shape);
    let (r, c) = (t.shape[0], t.shape[1]);
    if transposed { (c, r) } else { (r, c) }
}

/// Performs `C = op(A) × op(B)` where `op` transposes when the flag is set.
///
/// # Panics
/// - If either operand is not 2-D.
/// - If the inner dimensions do not match.
///
/// # Example
/// ```rust
/// use csm::ops::cpu::gemm;
/// use csm::tensor;
///
/// let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// let b = tensor!([[1.0, 0.0], [0.0, 1.0]]);
/// assert_eq!(gemm(&a, true, &b, false).data, vec![1.0, 3.0, 2.0, 4.0]);
/// ```
pub fn gemm(a: &Ten64, trans_a: bool, b: &Ten64, trans_b: bool) -> Ten64 {
    let (m, k) = dims2(a, trans_a);
    let (k2, n) = dims2(b, trans_b);
    assert_eq!(k, k2, "gemm shape mismatch: {:?} x {:?}", a.shape, b.shape);

    let a_cols = a.shape[1];
    let b_cols = b.shape[1];
    let a_data = &a.data;
    let b_data = &b.data;
    let a_at = |i: usize, l: usize| if trans_a { a_data[l * a_cols + i] } else { a_data[i * a_cols + l] };
    let b_at = |l: usize, j: usize| if trans_b { b_data[j * b_cols + l] } else { b_data[l * b_cols + j] };

    let mut out_data = vec![0.0; m * n];
    if n > 0 {
        out_data.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, out) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += a_at(i, l) * b_at(l, j);
                }
                *out = sum;
            }
        });
    }

    Tensor::new(vec![m, n], out_data)
}

/// Applies an elementwise single-input kernel.
pub fn unary(op: Unary, x: &Ten64) -> Ten64 {
    let mut data = vec![0.0f64; x.len()];
    data.par_iter_mut().zip(x.data.par_iter()).for_each(|(y, &x)| {
        *y = match op {
            Unary::Relu => {
                if x > 0.0 {
                    x
                } else {
                    0.0
                }
            }
            Unary::ReluMask => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Unary::Tanh => x.tanh(),
        };
    });
    Tensor::new(x.shape.clone(), data)
}

/// Applies an elementwise two-input kernel.
///
/// # Panics
/// Panics if the shapes differ.
pub fn binary(op: Binary, a: &Ten64, b: &Ten64) -> Ten64 {
    assert_eq!(a.shape, b.shape, "elementwise shape mismatch");
    let mut data = vec![0.0f64; a.len()];
    data.par_iter_mut()
        .zip(a.data.par_iter().zip(b.data.par_iter()))
        .for_each(|(y, (&a, &b))| {
            *y = match op {
                Binary::Mul => a * b,
                Binary::TanhGrad => a * (1.0 - b * b),
            };
        });
    Tensor::new(a.shape.clone(), data)
}

/// Adds the column vector `bias` (m, 1) to every column of `x` (m, n).
///
/// # Panics
/// Panics if `bias` does not have one entry per row of `x`.
pub fn add_column(x: &Ten64, bias: &Ten64) -> Ten64 {
    let (m, n) = (x.shape[0], x.shape[1]);
    assert_eq!(bias.len(), m, "bias length mismatch");
    let mut out = x.clone();
    if n > 0 {
        out.data.par_chunks_mut(n).zip(bias.data.par_iter()).for_each(|(row, &b)| {
            for v in row {
                *v += b;
            }
        });
    }
    out
}

/// Sums every row of a 2-D tensor into an (m, 1) column.
pub fn row_sums(x: &Ten64) -> Ten64 {
    let (m, n) = (x.shape[0], x.shape[1]);
    let data = if n == 0 {
        vec![0.0; m]
    } else {
        x.data.par_chunks(n).map(|row| row.iter().sum()).collect()
    };
    Tensor::new(vec![m, 1], data)
}

/// Column-wise softmax of an (m, n) tensor, shifted by each column's max.
pub fn softmax_columns(z: &Ten64) -> Ten64 {
    let (m, n) = (z.shape[0], z.shape[1]);
    let mut out = vec![0.0; m * n];
    for j in 0..n {
        let max = (0..m).map(|i| z.data[i * n + j]).fold(f64::NEG_INFINITY, f64::max);
        let mut total = 0.0;
        for i in 0..m {
            let e = (z.data[i * n + j] - max).exp();
            out[i * n + j] = e;
            total += e;
        }
        for i in 0..m {
            out[i * n + j] /= total;
        }
    }
    Tensor::new(vec![m, n], out)
}

/// Pulls a delta w.r.t. softmax outputs back to the logits: `y ⊙ (δ − Σ y δ)`.
///
/// # Panics
/// Panics if the shapes differ.
pub fn softmax_backward(y: &Ten64, delta: &Ten64) -> Ten64 {
    assert_eq!(y.shape, delta.shape, "softmax delta shape mismatch");
    let (m, n) = (y.shape[0], y.shape[1]);
    let mut out = vec![0.0; m * n];
    for j in 0..n {
        let dot: f64 = (0..m).map(|i| y.data[i * n + j] * delta.data[i * n + j]).sum();
        for i in 0..m {
            out[i * n + j] = y.data[i * n + j] * (delta.data[i * n + j] - dot);
        }
    }
    Tensor::new(vec![m, n], out)
}

/// Full 1-D convolution, accumulated into `out` (`signal.len() + kernel.len() - 1`).
#[inline]
pub fn convolve_full(signal: &[f64], kernel: &[f64], out: &mut [f64]) {
    debug_assert_eq!(out.len() + 1, signal.len() + kernel.len());
    for (t, &s) in signal.iter().enumerate() {
        if s == 0.0 {
            continue;
        }
        for (j, &k) in kernel.iter().enumerate() {
            out[t + j] += s * k;
        }
    }
}

/// Valid-mode 1-D convolution, accumulated into `out` (`signal.len() - kernel.len() + 1`).
#[inline]
pub fn convolve_valid(signal: &[f64], kernel: &[f64], out: &mut [f64]) {
    let width = kernel.len();
    debug_assert_eq!(out.len() + width, signal.len() + 1);
    for (t, o) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (j, &k) in kernel.iter().enumerate() {
            sum += k * signal[t + width - 1 - j];
        }
        *o += sum;
    }
}

/// Reverses a slice.
pub fn flip(values: &[f64]) -> Vec<f64> {
    values.iter().rev().copied().collect()
}

/// Convolves every (batch, channel, depth) row of `x` (b, c, d, w) with the
/// kernel rows of `kernel` (f, c, d, k), summing over channels.
///
/// Returns a (b, f, d, w + k - 1) tensor.
///
/// # Panics
/// Panics if channel or depth extents disagree.
pub fn sentence_convolution(x: &Ten64, kernel: &Ten64) -> Ten64 {
    let [b, c, d, w] = x.shape[..] else {
        panic!("convolution input must be 4-D, got {:?}", x.shape)
    };
    let [f, kc, kd, k] = kernel.shape[..] else {
        panic!("convolution kernel must be 4-D, got {:?}", kernel.shape)
    };
    assert_eq!((c, d), (kc, kd), "convolution channel/depth mismatch");
    let out_w = w + k - 1;

    let mut out = vec![0.0; b * f * d * out_w];
    if !out.is_empty() {
        out.par_chunks_mut(f * d * out_w).enumerate().for_each(|(bi, batch)| {
            for fi in 0..f {
                for di in 0..d {
                    let row = &mut batch[(fi * d + di) * out_w..][..out_w];
                    for ci in 0..c {
                        let signal = &x.data[((bi * c + ci) * d + di) * w..][..w];
                        let taps = &kernel.data[((fi * c + ci) * d + di) * k..][..k];
                        convolve_full(signal, taps, row);
                    }
                }
            }
        });
    }
    Tensor::new(vec![b, f, d, out_w], out)
}

/// Delta w.r.t. the input of [`sentence_convolution`]: each delta row
/// (b, f, d, w + k - 1) convolved in valid mode with the width-flipped kernel,
/// summed over feature maps. Returns (b, c, d, w).
pub fn sentence_convolution_input_grad(delta: &Ten64, kernel: &Ten64) -> Ten64 {
    let [b, f, d, out_w] = delta.shape[..] else {
        panic!("convolution delta must be 4-D, got {:?}", delta.shape)
    };
    let [kf, c, kd, k] = kernel.shape[..] else {
        panic!("convolution kernel must be 4-D, got {:?}", kernel.shape)
    };
    assert_eq!((f, d), (kf, kd), "convolution feature/depth mismatch");
    let w = out_w + 1 - k;

    let flipped: Vec<Vec<f64>> = kernel.data.chunks(k).map(flip).collect();
    let mut out = vec![0.0; b * c * d * w];
    if !out.is_empty() {
        out.par_chunks_mut(c * d * w).enumerate().for_each(|(bi, batch)| {
            for ci in 0..c {
                for di in 0..d {
                    let row = &mut batch[(ci * d + di) * w..][..w];
                    for fi in 0..f {
                        let signal = &delta.data[((bi * f + fi) * d + di) * out_w..][..out_w];
                        convolve_valid(signal, &flipped[(fi * c + ci) * d + di], row);
                    }
                }
            }
        });
    }
    Tensor::new(vec![b, c, d, w], out)
}

/// Kernel gradient of [`sentence_convolution`]: correlation of each delta row
/// with the recorded input row, summed over the batch. Returns (f, c, d, k).
pub fn sentence_convolution_kernel_grad(delta: &Ten64, x: &Ten64) -> Ten64 {
    let [b, f, d, out_w] = delta.shape[..] else {
        panic!("convolution delta must be 4-D, got {:?}", delta.shape)
    };
    let [xb, c, xd, w] = x.shape[..] else {
        panic!("convolution input must be 4-D, got {:?}", x.shape)
    };
    assert_eq!((b, d), (xb, xd), "convolution batch/depth mismatch");
    let k = out_w + 1 - w;

    let mut out = vec![0.0; f * c * d * k];
    if !out.is_empty() {
        out.par_chunks_mut(k).enumerate().for_each(|(row_index, taps)| {
            let di = row_index % d;
            let ci = (row_index / d) % c;
            let fi = row_index / (d * c);
            for bi in 0..b {
                let signal = &delta.data[((bi * f + fi) * d + di) * out_w..][..out_w];
                let input = flip(&x.data[((bi * c + ci) * d + di) * w..][..w]);
                convolve_valid(signal, &input, taps);
            }
        });
    }
    Tensor::new(vec![f, c, d, k], out)
}

/// Performs one step of stochastic gradient descent on `param`.
///
/// # Formula
/// $$ w := w - \\text{lr} \\cdot \\frac{\\partial L}{\\partial w} $$
///
/// # Panics
/// Panics if the shapes differ.
pub fn sgd(param: &mut Ten64, grad: &Ten64, lr: f64) {
    assert_eq!(param.shape, grad.shape, "sgd shape mismatch");
    param
        .data
        .par_iter_mut()
        .zip(grad.data.par_iter())
        .for_each(|(p, &g)| *p -= lr * g);
}
