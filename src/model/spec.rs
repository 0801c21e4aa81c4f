//! Backend-neutral descriptions of layers.
//!
//! A [`LayerSpec`] is everything needed to rebuild a layer on any
//! [`Device`]: its configuration and host copies of its parameters.

use super::{
    BiasConfig, Csm, FoldingConfig, KMaxPoolingConfig, Layer, LinearConfig, Relu,
    SentenceConvolutionConfig, SoftmaxConfig, Tanh, WordEmbeddingConfig, check_params,
};
use super::{Bias, Linear, SentenceConvolution, Softmax, WordEmbedding};
use crate::backend::Device;
use crate::error::Result;
use crate::mapping::ComponentKind;
use crate::tensors::Ten64;

#[derive(Debug, Clone, PartialEq)]
pub enum LayerConfig {
    Linear(LinearConfig),
    Bias(BiasConfig),
    SentenceConvolution(SentenceConvolutionConfig),
    Softmax(SoftmaxConfig),
    KMaxPooling(KMaxPoolingConfig),
    MaxFolding(FoldingConfig),
    SumFolding(FoldingConfig),
    Relu,
    Tanh,
    WordEmbedding(WordEmbeddingConfig),
    /// A nested model, one spec per layer.
    Csm(Vec<LayerSpec>),
}

impl LayerConfig {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Linear(_) => ComponentKind::Linear,
            Self::Bias(_) => ComponentKind::Bias,
            Self::SentenceConvolution(_) => ComponentKind::SentenceConvolution,
            Self::Softmax(_) => ComponentKind::Softmax,
            Self::KMaxPooling(_) => ComponentKind::KMaxPooling,
            Self::MaxFolding(_) => ComponentKind::MaxFolding,
            Self::SumFolding(_) => ComponentKind::SumFolding,
            Self::Relu => ComponentKind::Relu,
            Self::Tanh => ComponentKind::Tanh,
            Self::WordEmbedding(_) => ComponentKind::WordEmbedding,
            Self::Csm(_) => ComponentKind::Csm,
        }
    }
}

/// A layer's configuration plus its parameters in [`Layer::params`] order.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub config: LayerConfig,
    pub params: Vec<Ten64>,
}

impl LayerSpec {
    pub fn new(config: LayerConfig, params: Vec<Ten64>) -> Self {
        Self { config, params }
    }

    pub fn kind(&self) -> ComponentKind {
        self.config.kind()
    }

    /// Builds the described layer on `D`.
    ///
    /// # Errors
    /// - [`Error::Configuration`](crate::Error::Configuration) for an invalid configuration
    /// - [`Error::ShapeMismatch`](crate::Error::ShapeMismatch) if the parameters do not fit it
    pub fn instantiate<D: Device>(self) -> Result<Box<dyn Layer<D>>> {
        let Self { config, params } = self;
        let layer: Box<dyn Layer<D>> = match config {
            LayerConfig::Linear(c) => Box::new(Linear::from_params(c, params)?),
            LayerConfig::Bias(c) => Box::new(Bias::from_params(c, params)?),
            LayerConfig::SentenceConvolution(c) => {
                Box::new(SentenceConvolution::from_params(c, params)?)
            }
            LayerConfig::Softmax(c) => Box::new(Softmax::from_params(c, params)?),
            LayerConfig::WordEmbedding(c) => Box::new(WordEmbedding::from_params(c, params)?),
            LayerConfig::KMaxPooling(c) => {
                check_params("KMaxPooling parameters", &params, &[])?;
                Box::new(c.build::<D>()?)
            }
            LayerConfig::MaxFolding(c) => {
                check_params("MaxFolding parameters", &params, &[])?;
                Box::new(c.build_max::<D>())
            }
            LayerConfig::SumFolding(c) => {
                check_params("SumFolding parameters", &params, &[])?;
                Box::new(c.build_sum::<D>())
            }
            LayerConfig::Relu => {
                check_params("Relu parameters", &params, &[])?;
                Box::new(Relu::<D>::new())
            }
            LayerConfig::Tanh => {
                check_params("Tanh parameters", &params, &[])?;
                Box::new(Tanh::<D>::new())
            }
            LayerConfig::Csm(children) => {
                check_params("Csm parameters", &params, &[])?;
                let layers = children
                    .into_iter()
                    .map(LayerSpec::instantiate::<D>)
                    .collect::<Result<Vec<_>>>()?;
                Box::new(Csm::new(layers))
            }
        };
        Ok(layer)
    }
}
