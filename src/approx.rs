//! Finite-difference gradient checks and approximate comparisons.

use crate::tensors::Ten64;

/// Step used by [`check_grad`].
pub const EPSILON: f64 = 1e-6;

/// Central-difference estimate of `∂f/∂x` for every element of `x`.
pub fn numerical_gradient(f: impl Fn(&Ten64) -> f64, x: &Ten64, eps: f64) -> Ten64 {
    let mut probe = x.clone();
    let mut grad = Ten64::zeros_like(x);
    for i in 0..x.len() {
        let original = probe.data[i];
        probe.data[i] = original + eps;
        let plus = f(&probe);
        probe.data[i] = original - eps;
        let minus = f(&probe);
        probe.data[i] = original;
        grad.data[i] = (plus - minus) / (2.0 * eps);
    }
    grad
}

/// `‖a − b‖ / (‖a‖ + ‖b‖)`, zero when both are zero.
///
/// # Panics
/// Panics if the shapes differ.
pub fn relative_error(a: &Ten64, b: &Ten64) -> f64 {
    assert_eq!(a.shape, b.shape, "comparing tensors of different shapes");
    let norm = |t: &Ten64| t.data.iter().map(|v| v * v).sum::<f64>().sqrt();
    let diff = a.zip_map(b, |a, b| a - b);
    let scale = norm(a) + norm(b);
    if scale == 0.0 { 0.0 } else { norm(&diff) / scale }
}

/// Relative error between `analytic` and the numerical gradient of `f` at `x`.
pub fn check_grad(f: impl Fn(&Ten64) -> f64, analytic: &Ten64, x: &Ten64) -> f64 {
    relative_error(analytic, &numerical_gradient(f, x, EPSILON))
}

/// Same shape and every element within `tol`.
pub fn allclose(a: &Ten64, b: &Ten64, tol: f64) -> bool {
    a.shape == b.shape && a.data.iter().zip(&b.data).all(|(a, b)| (a - b).abs() <= tol)
}
