//! Transfer layers: the ones holding weight matrices or kernels.

use rand::Rng;
use tracing::debug;

use super::{
    FpropState, Layer, LayerConfig, LayerSpec, Saved, as_matrix, check_lengths, check_params,
    delta_in, ensure_axis, foreign_state, groups, host_params, uniform,
};
use crate::backend::Device;
use crate::error::{Error, Result};
use crate::mapping::ComponentKind;
use crate::meta::Meta;
use crate::ops::cpu;
use crate::space::{Axis, Space};
use crate::tensors::Ten64;

fn nonzero(component: &'static str, name: &str, value: usize) -> Result<()> {
    if value == 0 {
        return Err(Error::config(component, format!("{name} must be positive")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Linear

/// Builder for [`Linear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    pub n_input_dimensions: usize,
    pub n_output_dimensions: usize,
}

impl LinearConfig {
    fn validate(&self) -> Result<()> {
        nonzero("Linear", "n_input_dimensions", self.n_input_dimensions)?;
        nonzero("Linear", "n_output_dimensions", self.n_output_dimensions)
    }

    fn shapes(&self) -> [Vec<usize>; 2] {
        [
            vec![self.n_output_dimensions, self.n_input_dimensions],
            vec![self.n_output_dimensions, 1],
        ]
    }

    /// # Errors
    /// [`Error::Configuration`] if a dimension is zero.
    pub fn build<D: Device>(self, rng: &mut impl Rng) -> Result<Linear<D>> {
        self.validate()?;
        let [w, b] = self.shapes();
        Ok(Linear {
            config: self,
            weights: D::from_host(uniform(rng, w, self.n_input_dimensions)),
            bias: D::from_host(Ten64::zeros(b)),
        })
    }
}

/// `Y = W·X + b` along the depth axis.
#[derive(Debug, Clone)]
pub struct Linear<D: Device> {
    config: LinearConfig,
    weights: D::Array,
    bias: D::Array,
}

impl<D: Device> Linear<D> {
    /// Builds from given `[W, b]`.
    ///
    /// # Errors
    /// [`Error::Configuration`] for zero dimensions, [`Error::ShapeMismatch`]
    /// for parameters of the wrong count or shape.
    pub fn from_params(config: LinearConfig, params: Vec<Ten64>) -> Result<Self> {
        config.validate()?;
        check_params("Linear parameters", &params, &config.shapes())?;
        let [weights, bias]: [Ten64; 2] = params
            .try_into()
            .map_err(|_| Error::mismatch("Linear parameters", [2], [0]))?;
        Ok(Self {
            config,
            weights: D::from_host(weights),
            bias: D::from_host(bias),
        })
    }

    pub fn config(&self) -> LinearConfig {
        self.config
    }

    /// The input space arranged as `[d][rest]`, and the output space.
    fn spaces(&self, input: &Space) -> Result<(Space, Space)> {
        let arranged = input.regroup(&groups(input, &[Axis::Depth], &[]))?;
        let n_in = arranged.extent(Axis::Depth)?;
        if n_in != self.config.n_input_dimensions {
            return Err(Error::mismatch("Linear input depth", [self.config.n_input_dimensions], [n_in]));
        }
        let output = arranged.with_extent(Axis::Depth, self.config.n_output_dimensions)?;
        Ok((arranged, output))
    }

    fn delta_matrix(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<(Ten64, Space)> {
        let (arranged, output) = self.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, meta, &output)?;
        Ok((as_matrix(delta, self.config.n_output_dimensions)?, arranged))
    }
}

impl<D: Device> Layer<D> for Linear<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Linear
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.spaces(&meta.space_below)?;
        let x = meta.space_below.transform_to(D::host(x), &arranged)?;
        let x = D::from_host(as_matrix(x, self.config.n_input_dimensions)?);

        let y = D::gemm(&self.weights, false, &x, false);
        let y = cpu::add_column(D::host(&y), D::host(&self.bias)).reshape(output.shape())?;
        debug!(input = %meta.space_below, output = %output, "linear fprop");

        let out_meta = meta.clone().with_space(output).produced(ComponentKind::Linear);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Input(x))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let (delta, arranged) = self.delta_matrix(delta, &meta, state)?;
        let dx = D::gemm(&self.weights, true, &D::from_host(delta), false);
        let dx = D::into_host(dx).reshape(arranged.shape())?;
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let Saved::Input(x) = &state.saved else {
            foreign_state(self.kind())
        };
        let (delta, _) = self.delta_matrix(delta, meta, state)?;
        let bias = cpu::row_sums(&delta);
        let weights = D::gemm(&D::from_host(delta), false, x, true);
        Ok(vec![weights, D::from_host(bias)])
    }

    fn params(&self) -> Vec<&D::Array> {
        vec![&self.weights, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        vec![&mut self.weights, &mut self.bias]
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::Linear(self.config), host_params::<D>(&self.params()))
    }
}

// ---------------------------------------------------------------------------
// Bias

/// Builder for [`Bias`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiasConfig {
    pub n_feature_maps: usize,
    pub n_input_dimensions: usize,
}

impl BiasConfig {
    fn validate(&self) -> Result<()> {
        nonzero("Bias", "n_feature_maps", self.n_feature_maps)?;
        nonzero("Bias", "n_input_dimensions", self.n_input_dimensions)
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.n_feature_maps, self.n_input_dimensions]
    }

    /// Biases start at zero; `rng` is unused and taken for symmetry.
    ///
    /// # Errors
    /// [`Error::Configuration`] if a dimension is zero.
    pub fn build<D: Device>(self, _rng: &mut impl Rng) -> Result<Bias<D>> {
        self.validate()?;
        Ok(Bias {
            config: self,
            bias: D::from_host(Ten64::zeros(self.shape())),
        })
    }
}

/// Adds a learned `(f, d)` offset, broadcast over every other axis.
#[derive(Debug, Clone)]
pub struct Bias<D: Device> {
    config: BiasConfig,
    bias: D::Array,
}

impl<D: Device> Bias<D> {
    /// Builds from a given `[b]`.
    ///
    /// # Errors
    /// See [`Linear::from_params`].
    pub fn from_params(config: BiasConfig, mut params: Vec<Ten64>) -> Result<Self> {
        config.validate()?;
        check_params("Bias parameters", &params, &[config.shape()])?;
        let bias = params.remove(0);
        Ok(Self {
            config,
            bias: D::from_host(bias),
        })
    }

    pub fn config(&self) -> BiasConfig {
        self.config
    }

    /// The input space with a feature axis, arranged as `[rest][f][d]`.
    fn arranged(&self, input: &Space) -> Result<Space> {
        let input = input.ensure_axis(Axis::FeatureMap);
        let arranged = input.regroup(&groups(&input, &[], &[Axis::FeatureMap, Axis::Depth]))?;
        let found = [arranged.extent(Axis::FeatureMap)?, arranged.extent(Axis::Depth)?];
        let expected = [self.config.n_feature_maps, self.config.n_input_dimensions];
        if found != expected {
            return Err(Error::mismatch("Bias input", expected, found));
        }
        Ok(arranged)
    }
}

impl<D: Device> Layer<D> for Bias<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Bias
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let arranged = self.arranged(&meta.space_below)?;
        let (x, with_f) = ensure_axis(D::host(x), &meta.space_below, Axis::FeatureMap)?;
        let mut y = with_f.transform_to(&x, &arranged)?;

        let bias = &D::host(&self.bias).data;
        for row in y.data.chunks_mut(bias.len()) {
            for (v, b) in row.iter_mut().zip(bias) {
                *v += b;
            }
        }

        let out_meta = meta.clone().with_space(arranged).produced(ComponentKind::Bias);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Nothing)))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let arranged = self.arranged(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, &meta, &arranged)?;
        let dx = arranged.transform_to(&delta, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let arranged = self.arranged(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, meta, &arranged)?;
        let mut grad = Ten64::zeros(self.config.shape());
        let width = grad.len();
        for row in delta.data.chunks(width) {
            for (g, d) in grad.data.iter_mut().zip(row) {
                *g += d;
            }
        }
        Ok(vec![D::from_host(grad)])
    }

    fn params(&self) -> Vec<&D::Array> {
        vec![&self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        vec![&mut self.bias]
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::Bias(self.config), host_params::<D>(&self.params()))
    }
}

// ---------------------------------------------------------------------------
// SentenceConvolution

const CONV_LAYOUT: [[Axis; 1]; 4] = [[Axis::Batch], [Axis::FeatureMap], [Axis::Depth], [Axis::Width]];

/// Builder for [`SentenceConvolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceConvolutionConfig {
    pub n_feature_maps: usize,
    pub kernel_width: usize,
    pub n_input_dimensions: usize,
    /// Feature maps of the input; 1 for embeddings.
    pub n_channels: usize,
}

impl SentenceConvolutionConfig {
    /// A single-channel configuration.
    pub fn new(n_feature_maps: usize, kernel_width: usize, n_input_dimensions: usize) -> Self {
        Self {
            n_feature_maps,
            kernel_width,
            n_input_dimensions,
            n_channels: 1,
        }
    }

    #[must_use]
    pub fn with_channels(mut self, n_channels: usize) -> Self {
        self.n_channels = n_channels;
        self
    }

    fn validate(&self) -> Result<()> {
        const NAME: &str = "SentenceConvolution";
        nonzero(NAME, "n_feature_maps", self.n_feature_maps)?;
        nonzero(NAME, "kernel_width", self.kernel_width)?;
        nonzero(NAME, "n_input_dimensions", self.n_input_dimensions)?;
        nonzero(NAME, "n_channels", self.n_channels)
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.n_feature_maps, self.n_channels, self.n_input_dimensions, self.kernel_width]
    }

    /// # Errors
    /// [`Error::Configuration`] if a dimension is zero.
    pub fn build<D: Device>(self, rng: &mut impl Rng) -> Result<SentenceConvolution<D>> {
        self.validate()?;
        let fan_in = self.n_channels * self.kernel_width;
        Ok(SentenceConvolution {
            config: self,
            kernel: D::from_host(uniform(rng, self.shape(), fan_in)),
        })
    }
}

/// Full one-dimensional convolution along the width of every depth row.
///
/// Input channels come from the feature-map axis (absent means one channel).
/// The output is laid out `[b][f][d][w]` and is `kernel_width - 1` positions
/// wider than the input. Positions at or beyond a sentence's length are
/// zeroed before convolving, and each length grows by `kernel_width - 1`.
#[derive(Debug, Clone)]
pub struct SentenceConvolution<D: Device> {
    config: SentenceConvolutionConfig,
    kernel: D::Array,
}

impl<D: Device> SentenceConvolution<D> {
    /// Builds from a given `[W]` of shape `(f, c, d, k)`.
    ///
    /// # Errors
    /// See [`Linear::from_params`].
    pub fn from_params(config: SentenceConvolutionConfig, mut params: Vec<Ten64>) -> Result<Self> {
        config.validate()?;
        check_params("SentenceConvolution parameters", &params, &[config.shape()])?;
        let kernel = params.remove(0);
        Ok(Self {
            config,
            kernel: D::from_host(kernel),
        })
    }

    pub fn config(&self) -> SentenceConvolutionConfig {
        self.config
    }

    /// Input space as `[b][c][d][w]`, and the output space.
    fn spaces(&self, input: &Space) -> Result<(Space, Space)> {
        let arranged = input.ensure_axis(Axis::FeatureMap).regroup(&CONV_LAYOUT)?;
        let found = [arranged.extent(Axis::FeatureMap)?, arranged.extent(Axis::Depth)?];
        let expected = [self.config.n_channels, self.config.n_input_dimensions];
        if found != expected {
            return Err(Error::mismatch("SentenceConvolution input", expected, found));
        }
        let width = arranged.extent(Axis::Width)?;
        let output = arranged
            .with_extent(Axis::FeatureMap, self.config.n_feature_maps)?
            .with_extent(Axis::Width, width + self.config.kernel_width - 1)?;
        Ok((arranged, output))
    }
}

/// Zeroes every width position at or beyond the sentence length.
fn mask_lengths(x: &mut Ten64, lengths: &[usize]) {
    let width = x.shape[3];
    let per_batch = x.shape[1] * x.shape[2] * width;
    if width == 0 || per_batch == 0 {
        return;
    }
    for (batch, &length) in x.data.chunks_mut(per_batch).zip(lengths) {
        for row in batch.chunks_mut(width) {
            row[length.min(width)..].fill(0.0);
        }
    }
}

impl<D: Device> Layer<D> for SentenceConvolution<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::SentenceConvolution
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.spaces(&meta.space_below)?;
        check_lengths(&meta, arranged.extent(Axis::Batch)?, arranged.extent(Axis::Width)?)?;

        let (x, with_f) = ensure_axis(D::host(x), &meta.space_below, Axis::FeatureMap)?;
        let mut x = with_f.transform_to(&x, &arranged)?;
        mask_lengths(&mut x, &meta.lengths);

        let y = cpu::sentence_convolution(&x, D::host(&self.kernel));
        debug!(output = %output, kernel_width = self.config.kernel_width, "convolution fprop");

        let grow = self.config.kernel_width - 1;
        let mut out_meta = meta.clone().with_space(output).produced(ComponentKind::SentenceConvolution);
        out_meta.lengths.iter_mut().for_each(|l| *l += grow);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Input(D::from_host(x)))))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let (arranged, output) = self.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, &meta, &output)?;
        let mut dx = cpu::sentence_convolution_input_grad(&delta, D::host(&self.kernel));
        mask_lengths(&mut dx, &state.meta.lengths);
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let Saved::Input(x) = &state.saved else {
            foreign_state(self.kind())
        };
        let (_, output) = self.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, meta, &output)?;
        let grad = cpu::sentence_convolution_kernel_grad(&delta, D::host(x));
        Ok(vec![D::from_host(grad)])
    }

    fn params(&self) -> Vec<&D::Array> {
        vec![&self.kernel]
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        vec![&mut self.kernel]
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(
            LayerConfig::SentenceConvolution(self.config),
            host_params::<D>(&self.params()),
        )
    }
}

// ---------------------------------------------------------------------------
// Softmax

/// Builder for [`Softmax`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftmaxConfig {
    pub n_classes: usize,
    /// Product of every non-batch extent of the input.
    pub n_input_dimensions: usize,
}

impl SoftmaxConfig {
    fn validate(&self) -> Result<()> {
        nonzero("Softmax", "n_classes", self.n_classes)?;
        nonzero("Softmax", "n_input_dimensions", self.n_input_dimensions)
    }

    fn shapes(&self) -> [Vec<usize>; 2] {
        [vec![self.n_classes, self.n_input_dimensions], vec![self.n_classes, 1]]
    }

    /// # Errors
    /// [`Error::Configuration`] if a dimension is zero.
    pub fn build<D: Device>(self, rng: &mut impl Rng) -> Result<Softmax<D>> {
        self.validate()?;
        let [w, b] = self.shapes();
        Ok(Softmax {
            config: self,
            weights: D::from_host(uniform(rng, w, self.n_input_dimensions)),
            bias: D::from_host(Ten64::zeros(b)),
        })
    }
}

/// Affine map of every non-batch axis to class scores, normalised per batch
/// column. The output is laid out `[c][b]`.
#[derive(Debug, Clone)]
pub struct Softmax<D: Device> {
    config: SoftmaxConfig,
    weights: D::Array,
    bias: D::Array,
}

impl<D: Device> Softmax<D> {
    /// Builds from given `[W, b]`.
    ///
    /// # Errors
    /// See [`Linear::from_params`].
    pub fn from_params(config: SoftmaxConfig, params: Vec<Ten64>) -> Result<Self> {
        config.validate()?;
        check_params("Softmax parameters", &params, &config.shapes())?;
        let [weights, bias]: [Ten64; 2] = params
            .try_into()
            .map_err(|_| Error::mismatch("Softmax parameters", [2], [0]))?;
        Ok(Self {
            config,
            weights: D::from_host(weights),
            bias: D::from_host(bias),
        })
    }

    pub fn config(&self) -> SoftmaxConfig {
        self.config
    }

    /// Input space as `[rest][b]`, and the output space `[c][b]`.
    fn spaces(&self, input: &Space) -> Result<(Space, Space)> {
        let arranged = input.regroup(&groups(input, &[], &[Axis::Batch]))?;
        let batch = arranged.extent(Axis::Batch)?;
        let n = arranged.size() / batch.max(1);
        if n != self.config.n_input_dimensions {
            return Err(Error::mismatch("Softmax input", [self.config.n_input_dimensions], [n]));
        }
        let output = Space::from_groups(
            &[[Axis::Class], [Axis::Batch]],
            &[(Axis::Class, self.config.n_classes), (Axis::Batch, batch)],
        )?;
        Ok((arranged, output))
    }

    /// The delta w.r.t. the pre-softmax activations.
    fn logit_delta(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<(Ten64, Space)> {
        let Saved::InputOutput { output: y, .. } = &state.saved else {
            foreign_state(self.kind())
        };
        let (arranged, output) = self.spaces(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, meta, &output)?;
        let delta = if meta.logit_delta {
            delta
        } else {
            cpu::softmax_backward(D::host(y), &delta)
        };
        Ok((delta, arranged))
    }
}

impl<D: Device> Layer<D> for Softmax<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Softmax
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let (arranged, output) = self.spaces(&meta.space_below)?;
        let x = meta.space_below.transform_to(D::host(x), &arranged)?;
        let x = D::from_host(as_matrix(x, self.config.n_input_dimensions)?);

        let z = D::gemm(&self.weights, false, &x, false);
        let z = cpu::add_column(D::host(&z), D::host(&self.bias));
        let y = D::from_host(cpu::softmax_columns(&z));

        let mut out_meta = meta.clone().with_space(output).produced(ComponentKind::Softmax);
        out_meta.logit_delta = false;
        let state = FpropState::new(meta, Saved::InputOutput { input: x, output: y.clone() });
        Ok((y, out_meta, state))
    }

    fn bprop(&self, delta: &D::Array, meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let (delta, arranged) = self.logit_delta(delta, &meta, state)?;
        let dx = D::gemm(&self.weights, true, &D::from_host(delta), false);
        let dx = D::into_host(dx).reshape(arranged.shape())?;
        let dx = arranged.transform_to(&dx, &state.meta.space_below)?;
        Ok((D::from_host(dx), state.meta.clone()))
    }

    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let Saved::InputOutput { input: x, .. } = &state.saved else {
            foreign_state(self.kind())
        };
        let (delta, _) = self.logit_delta(delta, meta, state)?;
        let bias = cpu::row_sums(&delta);
        let weights = D::gemm(&D::from_host(delta), false, x, true);
        Ok(vec![weights, D::from_host(bias)])
    }

    fn params(&self) -> Vec<&D::Array> {
        vec![&self.weights, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        vec![&mut self.weights, &mut self.bias]
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::Softmax(self.config), host_params::<D>(&self.params()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approx::{allclose, check_grad};
    use crate::backend::Cpu;
    use crate::tensor;
    use crate::tensors::Tensor;
    use assert_matches::assert_matches;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn random(rng: &mut StdRng, shape: Vec<usize>) -> Ten64 {
        Tensor::from_fn(shape, |_| rng.random_range(-1.0..1.0))
    }

    fn meta_for(x: &Ten64, axes: &[Axis]) -> Meta {
        Meta::full_width(Space::infer(x, axes).unwrap())
    }

    /// Sum of `output * probe` as a scalar objective.
    fn objective<L: Layer<Cpu>>(layer: &L, x: &Ten64, meta: &Meta, probe: &Ten64) -> f64 {
        let (y, _, _) = layer.fprop(x, meta.clone()).unwrap();
        y.data.iter().zip(&probe.data).map(|(a, b)| a * b).sum()
    }

    fn check_input_grad<L: Layer<Cpu>>(layer: &L, x: &Ten64, meta: &Meta, rng: &mut StdRng) {
        let (y, out_meta, state) = layer.fprop(x, meta.clone()).unwrap();
        let probe = random(rng, y.shape.clone());
        let (dx, dx_meta) = layer.bprop(&probe, out_meta, &state).unwrap();
        assert_eq!(dx.shape, x.shape);
        assert_eq!(dx_meta, *meta);
        let err = check_grad(|x| objective(layer, x, meta, &probe), &dx, x);
        assert!(err < 1e-5, "input gradient relative error {err}");
    }

    fn check_param_grads<L: Layer<Cpu> + Clone>(layer: &L, x: &Ten64, meta: &Meta, rng: &mut StdRng) {
        let (y, out_meta, state) = layer.fprop(x, meta.clone()).unwrap();
        let probe = random(rng, y.shape.clone());
        let grads = layer.grads(&probe, &out_meta, &state).unwrap();
        let params: Vec<Ten64> = layer.params().into_iter().cloned().collect();
        assert_eq!(grads.len(), params.len());
        for (i, grad) in grads.iter().enumerate() {
            let err = check_grad(
                |p| {
                    let mut probe_layer = layer.clone();
                    let mut all = params.clone();
                    all[i] = p.clone();
                    probe_layer.set_params(all).unwrap();
                    objective(&probe_layer, x, meta, &probe)
                },
                grad,
                &params[i],
            );
            assert!(err < 1e-5, "parameter {i} relative error {err}");
        }
    }

    #[test]
    fn linear_maps_depth_and_keeps_other_axes() {
        let layer = Linear::<Cpu>::from_params(
            LinearConfig { n_input_dimensions: 2, n_output_dimensions: 1 },
            vec![tensor!([[1.0, 10.0]]), tensor!([[0.5]])],
        )
        .unwrap();
        // (b=2, d=2, w=3)
        let x = Tensor::from_fn(vec![2, 2, 3], |i| i as f64);
        let meta = meta_for(&x, &[Axis::Batch, Axis::Depth, Axis::Width]);
        let (y, out_meta, _) = layer.fprop(&x, meta).unwrap();
        assert_eq!(out_meta.space_below.axes(), &[vec![Axis::Depth], vec![Axis::Batch, Axis::Width]]);
        assert_eq!(y.shape, vec![1, 6]);
        // b=0, w=0: x[d=0]=0, x[d=1]=3
        assert_eq!(y.data[0], 0.0 + 30.0 + 0.5);
        // b=1, w=2: x[d=0]=8, x[d=1]=11
        assert_eq!(y.data[5], 8.0 + 110.0 + 0.5);
    }

    #[test]
    fn linear_gradients() {
        let mut rng = StdRng::seed_from_u64(7);
        let layer = LinearConfig { n_input_dimensions: 3, n_output_dimensions: 4 }
            .build::<Cpu>(&mut rng)
            .unwrap();
        let x = random(&mut rng, vec![2, 5, 3]);
        let meta = meta_for(&x, &[Axis::Batch, Axis::Width, Axis::Depth]);
        check_input_grad(&layer, &x, &meta, &mut rng);
        check_param_grads(&layer, &x, &meta, &mut rng);
    }

    #[test]
    fn bias_gradients_without_feature_axis() {
        let mut rng = StdRng::seed_from_u64(11);
        let layer = Bias::<Cpu>::from_params(
            BiasConfig { n_feature_maps: 1, n_input_dimensions: 3 },
            vec![random(&mut rng, vec![1, 3])],
        )
        .unwrap();
        let x = random(&mut rng, vec![2, 3, 4]);
        let meta = meta_for(&x, &[Axis::Batch, Axis::Depth, Axis::Width]);
        check_input_grad(&layer, &x, &meta, &mut rng);
        check_param_grads(&layer, &x, &meta, &mut rng);
    }

    #[test]
    fn bias_rejects_wrong_depth() {
        let layer = BiasConfig { n_feature_maps: 2, n_input_dimensions: 3 }
            .build::<Cpu>(&mut StdRng::seed_from_u64(0))
            .unwrap();
        let x = Ten64::zeros(vec![2, 2, 4]);
        let meta = meta_for(&x, &[Axis::Batch, Axis::FeatureMap, Axis::Depth]);
        assert_matches!(layer.fprop(&x, meta), Err(Error::ShapeMismatch { .. }));
    }

    #[test]
    fn convolution_widens_and_extends_lengths() {
        let mut rng = StdRng::seed_from_u64(3);
        let layer = SentenceConvolutionConfig::new(2, 3, 2).build::<Cpu>(&mut rng).unwrap();
        let x = random(&mut rng, vec![2, 5, 2]);
        let mut meta = meta_for(&x, &[Axis::Batch, Axis::Width, Axis::Depth]);
        meta.lengths = vec![5, 3];
        let (y, out_meta, _) = layer.fprop(&x, meta).unwrap();
        assert_eq!(y.shape, vec![2, 2, 2, 7]);
        assert_eq!(out_meta.lengths, vec![7, 5]);
        assert_eq!(out_meta.space_below.flat_axes(), vec![
            Axis::Batch,
            Axis::FeatureMap,
            Axis::Depth,
            Axis::Width
        ]);
    }

    #[test]
    fn convolution_ignores_padding() {
        let mut rng = StdRng::seed_from_u64(5);
        let layer = SentenceConvolutionConfig::new(1, 2, 1).build::<Cpu>(&mut rng).unwrap();
        let mut x = random(&mut rng, vec![1, 1, 4]);
        let mut meta = meta_for(&x, &[Axis::Batch, Axis::Depth, Axis::Width]);
        meta.lengths = vec![2];
        let (y1, _, _) = layer.fprop(&x, meta.clone()).unwrap();
        x.data[3] = 100.0;
        let (y2, _, _) = layer.fprop(&x, meta.clone()).unwrap();
        assert!(allclose(&y1, &y2, 0.0));

        let (y, out_meta, state) = layer.fprop(&x, meta).unwrap();
        let (dx, _) = layer.bprop(&Ten64::ones_like(&y), out_meta, &state).unwrap();
        assert_eq!(&dx.data[2..], &[0.0, 0.0]);
    }

    #[test]
    fn convolution_rejects_overlong_lengths() {
        let layer = SentenceConvolutionConfig::new(1, 2, 1)
            .build::<Cpu>(&mut StdRng::seed_from_u64(0))
            .unwrap();
        let x = Ten64::zeros(vec![1, 1, 4]);
        let mut meta = meta_for(&x, &[Axis::Batch, Axis::Depth, Axis::Width]);
        meta.lengths = vec![5];
        assert_matches!(layer.fprop(&x, meta), Err(Error::ShapeMismatch { .. }));
    }

    #[test]
    fn convolution_gradients_with_channels() {
        let mut rng = StdRng::seed_from_u64(13);
        let layer = SentenceConvolutionConfig::new(3, 2, 2)
            .with_channels(2)
            .build::<Cpu>(&mut rng)
            .unwrap();
        let x = random(&mut rng, vec![2, 2, 2, 6]);
        let mut meta = meta_for(&x, &[Axis::Batch, Axis::FeatureMap, Axis::Depth, Axis::Width]);
        meta.lengths = vec![6, 4];
        check_input_grad(&layer, &x, &meta, &mut rng);
        check_param_grads(&layer, &x, &meta, &mut rng);
    }

    #[test]
    fn softmax_columns_sum_to_one() {
        let mut rng = StdRng::seed_from_u64(17);
        let layer = SoftmaxConfig { n_classes: 4, n_input_dimensions: 6 }
            .build::<Cpu>(&mut rng)
            .unwrap();
        let x = random(&mut rng, vec![3, 2, 2]);
        let meta = meta_for(&x, &[Axis::Width, Axis::Batch, Axis::Depth]);
        let (y, out_meta, _) = layer.fprop(&x, meta).unwrap();
        assert_eq!(y.shape, vec![4, 2]);
        assert_eq!(out_meta.produced_by, Some(ComponentKind::Softmax));
        for j in 0..2 {
            let total: f64 = (0..4).map(|i| y.data[i * 2 + j]).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn softmax_gradients() {
        let mut rng = StdRng::seed_from_u64(19);
        let layer = SoftmaxConfig { n_classes: 3, n_input_dimensions: 4 }
            .build::<Cpu>(&mut rng)
            .unwrap();
        let x = random(&mut rng, vec![2, 2, 2]);
        let meta = meta_for(&x, &[Axis::Batch, Axis::Depth, Axis::Width]);
        check_input_grad(&layer, &x, &meta, &mut rng);
        check_param_grads(&layer, &x, &meta, &mut rng);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_matches!(
            LinearConfig { n_input_dimensions: 0, n_output_dimensions: 2 }.build::<Cpu>(&mut rng),
            Err(Error::Configuration { component: "Linear", .. })
        );
        assert_matches!(
            SentenceConvolutionConfig::new(1, 0, 1).build::<Cpu>(&mut rng),
            Err(Error::Configuration { .. })
        );
    }

    #[test]
    fn set_params_rejects_shape_changes() {
        let mut layer = SoftmaxConfig { n_classes: 2, n_input_dimensions: 2 }
            .build::<Cpu>(&mut StdRng::seed_from_u64(0))
            .unwrap();
        assert_matches!(
            layer.set_params(vec![Ten64::zeros(vec![2, 3]), Ten64::zeros(vec![2, 1])]),
            Err(Error::ShapeMismatch { .. })
        );
        assert_matches!(layer.set_params(vec![]), Err(Error::ShapeMismatch { .. }));
    }
}
