//! Parameter updates.

use tracing::debug;

use crate::backend::Device;
use crate::error::{Error, Result};
use crate::model::Layer;

/// Applies gradients to the parameters of a layer or model.
pub trait Optimizer {
    /// Updates every parameter of `model` with the matching entry of
    /// `grads`, as returned by [`Layer::grads`].
    ///
    /// # Errors
    /// [`Error::ShapeMismatch`] if the gradients do not match the parameters
    /// in count or shape. Nothing is updated in that case.
    fn step<D: Device, L: Layer<D> + ?Sized>(&self, model: &mut L, grads: &[D::Array]) -> Result<()>;
}

/// Plain gradient descent: `param -= learning_rate * grad`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    /// # Errors
    /// [`Error::Configuration`] unless `learning_rate` is positive and finite.
    pub fn new(learning_rate: f64) -> Result<Self> {
        if !(learning_rate.is_finite() && learning_rate > 0.0) {
            return Err(Error::config(
                "Sgd",
                format!("learning rate must be positive, got {learning_rate}"),
            ));
        }
        Ok(Self { learning_rate })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Optimizer for Sgd {
    fn step<D: Device, L: Layer<D> + ?Sized>(&self, model: &mut L, grads: &[D::Array]) -> Result<()> {
        let params = model.params_mut();
        if params.len() != grads.len() {
            return Err(Error::mismatch("gradient count", [params.len()], [grads.len()]));
        }
        for (param, grad) in params.iter().zip(grads) {
            let (expected, found) = (&D::host(param).shape, &D::host(grad).shape);
            if expected != found {
                return Err(Error::mismatch("gradient shape", expected.clone(), found.clone()));
            }
        }
        debug!(params = params.len(), lr = self.learning_rate, "sgd step");
        for (param, grad) in params.into_iter().zip(grads) {
            D::sgd(param, grad, self.learning_rate);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Cpu, Gpu};
    use crate::meta::Meta;
    use crate::model::{Csm, CrossEntropy, LinearConfig, SoftmaxConfig};
    use crate::space::{Axis, Space};
    use crate::tensor;
    use crate::tensors::Ten64;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn learning_rate_must_be_positive() {
        for lr in [0.0, -0.1, f64::NAN] {
            assert_matches!(Sgd::new(lr), Err(Error::Configuration { component: "Sgd", .. }));
        }
    }

    #[test]
    fn step_subtracts_scaled_gradients() {
        let mut layer = LinearConfig { n_input_dimensions: 2, n_output_dimensions: 1 }
            .build::<Gpu>(&mut StdRng::seed_from_u64(5))
            .unwrap();
        layer.set_params(vec![tensor!([[1.0, 2.0]]), tensor!([[0.5]])]).unwrap();
        let grads = [tensor!([[1.0, -1.0]]), tensor!([[2.0]])].map(Gpu::from_host);
        Sgd::new(0.5).unwrap().step::<Gpu, _>(&mut layer, &grads).unwrap();
        let params: Vec<Ten64> = layer.params().into_iter().map(|p| Gpu::host(p).clone()).collect();
        assert_eq!(params, vec![tensor!([[0.5, 2.5]]), tensor!([[-0.5]])]);
    }

    #[test]
    fn mismatched_gradients_leave_parameters_alone() {
        let mut layer = LinearConfig { n_input_dimensions: 2, n_output_dimensions: 1 }
            .build::<Cpu>(&mut StdRng::seed_from_u64(6))
            .unwrap();
        let before: Vec<Ten64> = layer.params().into_iter().cloned().collect();
        let sgd = Sgd::new(0.1).unwrap();
        assert_matches!(sgd.step::<Cpu, _>(&mut layer, &[tensor!([[1.0, 1.0]])]), Err(Error::ShapeMismatch { .. }));
        assert_matches!(
            sgd.step::<Cpu, _>(&mut layer, &[tensor!([[1.0]]), tensor!([[1.0]])]),
            Err(Error::ShapeMismatch { .. })
        );
        let after: Vec<Ten64> = layer.params().into_iter().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn training_reduces_the_cost() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut model = Csm::<Cpu>::new(vec![Box::new(
            SoftmaxConfig { n_classes: 2, n_input_dimensions: 3 }.build::<Cpu>(&mut rng).unwrap(),
        )]);
        let x = tensor!([[1.0, -1.0], [0.5, 0.0], [-0.5, 1.0]]);
        let meta = Meta::full_width(Space::infer(&x, &[Axis::Depth, Axis::Batch]).unwrap());
        let target = tensor!([[1.0, 0.0], [0.0, 1.0]]);
        let cost = CrossEntropy::<Cpu>::new();
        let sgd = Sgd::new(0.5).unwrap();

        let mut costs = Vec::new();
        for _ in 0..50 {
            let (y, y_meta, state) = model.fprop(&x, meta.clone()).unwrap();
            let (value, _, cost_state) = cost.fprop(&y, &target, &y_meta).unwrap();
            let (delta, delta_meta) = cost.bprop(&y, &target, &y_meta, &cost_state).unwrap();
            let grads = model.grads(&delta, &delta_meta, &state).unwrap();
            sgd.step::<Cpu, _>(&mut model, &grads).unwrap();
            costs.push(value);
        }
        assert!(costs[49] < costs[0] * 0.8, "costs {costs:?}");
    }
}
