//! The convolutional sentence model: an ordered stack of layers.

use tracing::{debug, instrument};

use super::{FpropState, Layer, LayerConfig, LayerSpec, Saved, foreign_state};
use crate::backend::Device;
use crate::error::Result;
use crate::mapping::ComponentKind;
use crate::meta::Meta;

/// Layers applied in order. A `Csm` is itself a [`Layer`], so models nest.
///
/// ```rust
/// use csm::backend::Cpu;
/// use csm::model::{Csm, Layer, SentenceConvolutionConfig, SoftmaxConfig};
/// use rand::SeedableRng;
///
/// let mut rng = rand::rngs::StdRng::seed_from_u64(0);
/// let model = Csm::<Cpu>::new(vec![
///     Box::new(SentenceConvolutionConfig::new(2, 3, 1).build::<Cpu>(&mut rng).unwrap()),
///     Box::new(SoftmaxConfig { n_classes: 4, n_input_dimensions: 14 }.build::<Cpu>(&mut rng).unwrap()),
/// ]);
/// assert_eq!(model.params().len(), 3);
/// ```
#[derive(Debug)]
pub struct Csm<D: Device> {
    layers: Vec<Box<dyn Layer<D>>>,
}

impl<D: Device> Csm<D> {
    pub fn new(layers: Vec<Box<dyn Layer<D>>>) -> Self {
        Self { layers }
    }

    /// Rebuilds a model from [`Layer::describe`] output.
    ///
    /// # Errors
    /// Whatever [`LayerSpec::instantiate`] reports for a layer; a non-model
    /// spec is wrapped as a single-layer model.
    pub fn from_spec(spec: LayerSpec) -> Result<Self> {
        match spec.config {
            LayerConfig::Csm(children) => {
                let layers = children
                    .into_iter()
                    .map(LayerSpec::instantiate::<D>)
                    .collect::<Result<Vec<_>>>()?;
                Ok(Self::new(layers))
            }
            _ => Ok(Self::new(vec![spec.instantiate()?])),
        }
    }

    pub fn layers(&self) -> &[Box<dyn Layer<D>>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    fn states<'a>(&self, state: &'a FpropState<D>) -> &'a [FpropState<D>] {
        let Saved::Layers(states) = &state.saved else {
            foreign_state(ComponentKind::Csm)
        };
        assert_eq!(
            states.len(),
            self.layers.len(),
            "model with {} layers received {} layer states",
            self.layers.len(),
            states.len()
        );
        states
    }
}

impl<D: Device> Layer<D> for Csm<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Csm
    }

    #[instrument(skip_all, level = "debug", fields(backend = %D::BACKEND, layers = self.layers.len()))]
    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let mut states = Vec::with_capacity(self.layers.len());
        let mut current = (x.clone(), meta.clone());
        for layer in &self.layers {
            let (y, out_meta, state) = layer.fprop(&current.0, current.1)?;
            debug!(layer = %layer.id(), space = %out_meta.space_below, "fprop");
            states.push(state);
            current = (y, out_meta);
        }
        let (y, out_meta) = current;
        Ok((y, out_meta, FpropState::new(meta, Saved::Layers(states))))
    }

    /// # Panics
    /// Panics if `state` does not hold one state per layer.
    #[instrument(skip_all, level = "debug", fields(backend = %D::BACKEND))]
    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let states = self.states(state);
        let mut current = (delta.clone(), meta);
        for (layer, state) in self.layers.iter().zip(states).rev() {
            current = layer.bprop(&current.0, current.1, state)?;
            debug!(layer = %layer.id(), space = %current.1.space_below, "bprop");
        }
        Ok(current)
    }

    /// Gradients of every layer, in forward parameter order.
    #[instrument(skip_all, level = "debug", fields(backend = %D::BACKEND))]
    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let states = self.states(state);
        let mut per_layer = Vec::with_capacity(self.layers.len());
        let mut current = (delta.clone(), meta.clone());
        for (index, (layer, state)) in self.layers.iter().zip(states).enumerate().rev() {
            per_layer.push(layer.grads(&current.0, &current.1, state)?);
            // the first layer's input delta is never used
            if index > 0 {
                current = layer.bprop(&current.0, current.1, state)?;
            }
        }
        Ok(per_layer.into_iter().rev().flatten().collect())
    }

    fn params(&self) -> Vec<&D::Array> {
        self.layers.iter().flat_map(|l| l.params()).collect()
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        self.layers.iter_mut().flat_map(|l| l.params_mut()).collect()
    }

    fn describe(&self) -> LayerSpec {
        let children = self.layers.iter().map(|l| l.describe()).collect();
        LayerSpec::new(LayerConfig::Csm(children), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::check_grad;
    use crate::backend::Cpu;
    use crate::error::Error;
    use crate::model::{
        BiasConfig, FoldingConfig, KMaxPoolingConfig, LinearConfig, SentenceConvolutionConfig,
        Tanh,
    };
    use crate::space::{Axis, Space};
    use crate::tensors::Ten64;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn model(rng: &mut StdRng) -> Csm<Cpu> {
        // b=2, w=5, d=2 → conv(f=2, k=2): w 6 → fold d: 1 → kmax 3 → bias → tanh → linear
        Csm::new(vec![
            Box::new(SentenceConvolutionConfig::new(2, 2, 2).build::<Cpu>(rng).unwrap()),
            Box::new(FoldingConfig::along(Axis::Depth).build_sum::<Cpu>()),
            Box::new(KMaxPoolingConfig { k: 3 }.build::<Cpu>().unwrap()),
            Box::new(BiasConfig { n_feature_maps: 2, n_input_dimensions: 1 }.build::<Cpu>(rng).unwrap()),
            Box::new(Tanh::<Cpu>::new()),
            Box::new(LinearConfig { n_input_dimensions: 1, n_output_dimensions: 3 }.build::<Cpu>(rng).unwrap()),
        ])
    }

    fn input(rng: &mut StdRng) -> (Ten64, Meta) {
        use rand::Rng;
        let x = Ten64::from_fn(vec![2, 5, 2], |_| rng.random_range(-1.0..1.0));
        let meta = Meta::new(Space::infer(&x, &[Axis::Batch, Axis::Width, Axis::Depth]).unwrap(), vec![5, 3]);
        (x, meta)
    }

    #[test]
    fn nested_model_matches_flat_model() {
        let mut rng = StdRng::seed_from_u64(41);
        let flat = model(&mut rng);
        let (x, meta) = input(&mut rng);
        let nested = Csm::<Cpu>::from_spec(flat.describe()).unwrap();
        let outer = Csm::<Cpu>::new(vec![Box::new(nested)]);

        let (a, a_meta, _) = flat.fprop(&x, meta.clone()).unwrap();
        let (b, b_meta, _) = outer.fprop(&x, meta).unwrap();
        assert_eq!(a, b);
        assert_eq!(a_meta.space_below, b_meta.space_below);
        assert_eq!(flat.params(), outer.params());
    }

    #[test]
    fn gradients_through_the_stack() {
        let mut rng = StdRng::seed_from_u64(42);
        let model = model(&mut rng);
        let (x, meta) = input(&mut rng);
        let (y, out_meta, state) = model.fprop(&x, meta.clone()).unwrap();
        let probe = Ten64::from_fn(y.shape.clone(), |i| ((i * 7) % 5) as f64 - 2.0);
        let objective = |y: &Ten64| -> f64 { y.data.iter().zip(&probe.data).map(|(a, b)| a * b).sum() };

        let (dx, dx_meta) = model.bprop(&probe, out_meta.clone(), &state).unwrap();
        assert_eq!(dx_meta.space_below, meta.space_below);
        let err = check_grad(|x| objective(&model.fprop(x, meta.clone()).unwrap().0), &dx, &x);
        assert!(err < 1e-5, "input relative error {err}");

        let grads = model.grads(&probe, &out_meta, &state).unwrap();
        assert_eq!(grads.len(), model.params().len());
        let params: Vec<Ten64> = model.params().into_iter().cloned().collect();
        for (i, grad) in grads.iter().enumerate() {
            let err = check_grad(
                |p| {
                    let mut params = params.clone();
                    params[i] = p.clone();
                    let mut probe_model = Csm::<Cpu>::from_spec(model.describe()).unwrap();
                    probe_model.set_params(params).unwrap();
                    objective(&probe_model.fprop(&x, meta.clone()).unwrap().0)
                },
                grad,
                &params[i],
            );
            assert!(err < 1e-5, "parameter {i} relative error {err}");
        }
    }

    #[test]
    #[should_panic(expected = "layer states")]
    fn state_count_must_match() {
        let mut rng = StdRng::seed_from_u64(43);
        let model = model(&mut rng);
        let (x, meta) = input(&mut rng);
        let (y, out_meta, mut state) = model.fprop(&x, meta).unwrap();
        if let Saved::Layers(states) = &mut state.saved {
            states.pop();
        }
        let _ = model.bprop(&y, out_meta, &state);
    }

    #[test]
    fn set_params_checks_the_flattened_list() {
        let mut rng = StdRng::seed_from_u64(44);
        let mut model = model(&mut rng);
        assert_matches!(model.set_params(vec![]), Err(Error::ShapeMismatch { .. }));
        let mut params: Vec<Ten64> = model.params().into_iter().cloned().collect();
        params[0] = params[0].map(|_| 0.5);
        model.set_params(params.clone()).unwrap();
        assert_eq!(model.params()[0], &params[0]);
    }
}
