//! Word embeddings.

use rand::Rng;

use super::{FpropState, Layer, LayerConfig, LayerSpec, Saved, check_params, delta_in, foreign_state, host_params, uniform};
use crate::backend::Device;
use crate::error::{Error, Result};
use crate::mapping::ComponentKind;
use crate::meta::Meta;
use crate::space::{Axis, Space};
use crate::tensors::{Ten64, Tensor};

/// Builder for [`WordEmbedding`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WordEmbeddingConfig {
    pub vocabulary_size: usize,
    pub dimension: usize,
}

impl WordEmbeddingConfig {
    fn validate(&self) -> Result<()> {
        if self.vocabulary_size == 0 || self.dimension == 0 {
            return Err(Error::config(
                "WordEmbedding",
                "vocabulary_size and dimension must be positive",
            ));
        }
        Ok(())
    }

    fn shape(&self) -> Vec<usize> {
        vec![self.vocabulary_size, self.dimension]
    }

    /// Rows are drawn uniformly in `±1/√dimension`.
    ///
    /// # Errors
    /// [`Error::Configuration`] if a dimension is zero.
    pub fn build<D: Device>(self, rng: &mut impl Rng) -> Result<WordEmbedding<D>> {
        self.validate()?;
        Ok(WordEmbedding {
            config: self,
            table: D::from_host(uniform(rng, self.shape(), self.dimension)),
        })
    }
}

/// Looks up one row of a `(vocabulary, d)` table per index.
///
/// The output carries every input axis plus a trailing depth axis.
#[derive(Debug, Clone)]
pub struct WordEmbedding<D: Device> {
    config: WordEmbeddingConfig,
    table: D::Array,
}

impl<D: Device> WordEmbedding<D> {
    /// Builds from a given `[E]`.
    ///
    /// # Errors
    /// See [`Linear::from_params`](super::Linear::from_params).
    pub fn from_params(config: WordEmbeddingConfig, mut params: Vec<Ten64>) -> Result<Self> {
        config.validate()?;
        check_params("WordEmbedding parameters", &params, &[config.shape()])?;
        let table = params.remove(0);
        Ok(Self {
            config,
            table: D::from_host(table),
        })
    }

    pub fn config(&self) -> WordEmbeddingConfig {
        self.config
    }

    fn index(&self, value: f64) -> Result<usize> {
        let vocabulary_size = self.config.vocabulary_size;
        if value.fract() != 0.0 || value < 0.0 || value >= vocabulary_size as f64 {
            return Err(Error::InvalidIndex {
                index: value,
                vocabulary_size,
            });
        }
        Ok(value as usize)
    }

    fn output_space(&self, input: &Space) -> Result<Space> {
        input.with_trailing_axis(Axis::Depth, self.config.dimension)
    }
}

impl<D: Device> Layer<D> for WordEmbedding<D> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::WordEmbedding
    }

    fn fprop(&self, x: &D::Array, meta: Meta) -> Result<(D::Array, Meta, FpropState<D>)> {
        let output = self.output_space(&meta.space_below)?;
        let x = D::host(x);
        if x.shape != meta.space_below.shape() {
            return Err(Error::mismatch("embedding input", meta.space_below.shape(), x.shape.clone()));
        }
        let indices = x.data.iter().map(|&v| self.index(v)).collect::<Result<Vec<_>>>()?;

        let d = self.config.dimension;
        let table = &D::host(&self.table).data;
        let mut data = Vec::with_capacity(indices.len() * d);
        for &i in &indices {
            data.extend_from_slice(&table[i * d..][..d]);
        }
        let y = Tensor::new(output.shape(), data);

        let out_meta = meta.clone().with_space(output).produced(ComponentKind::WordEmbedding);
        Ok((D::from_host(y), out_meta, FpropState::new(meta, Saved::Indices(indices))))
    }

    /// Indices are not differentiable: the input delta is zero.
    fn bprop(&self, _delta: &D::Array, _meta: Meta, state: &FpropState<D>) -> Result<(D::Array, Meta)> {
        let zeros = Ten64::zeros(state.meta.space_below.shape());
        Ok((D::from_host(zeros), state.meta.clone()))
    }

    fn grads(&self, delta: &D::Array, meta: &Meta, state: &FpropState<D>) -> Result<Vec<D::Array>> {
        let Saved::Indices(indices) = &state.saved else {
            foreign_state(self.kind())
        };
        let output = self.output_space(&state.meta.space_below)?;
        let delta = delta_in::<D>(delta, meta, &output)?;
        let d = self.config.dimension;
        let mut grad = Ten64::zeros(self.config.shape());
        for (&i, row) in indices.iter().zip(delta.data.chunks(d)) {
            for (g, v) in grad.data[i * d..][..d].iter_mut().zip(row) {
                *g += v;
            }
        }
        Ok(vec![D::from_host(grad)])
    }

    fn params(&self) -> Vec<&D::Array> {
        vec![&self.table]
    }

    fn params_mut(&mut self) -> Vec<&mut D::Array> {
        vec![&mut self.table]
    }

    fn describe(&self) -> LayerSpec {
        LayerSpec::new(LayerConfig::WordEmbedding(self.config), host_params::<D>(&self.params()))
    }
}
