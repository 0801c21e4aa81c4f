//! csm: convolutional sentence model layers with hand-derived gradients.
//!
//! Every layer exposes an explicit forward pass, backward pass and parameter
//! gradients, and exists once per backend. Activations travel with a
//! [`Meta`] naming their axes, so layers rearrange inputs on demand instead
//! of imposing one layout on the whole model.
//!
//! # Features
//!
//! - Named-axis tensor layouts ([`space`]) with stride permutation.
//! - Layers: linear maps, bias, sentence convolution, softmax, k-max
//!   pooling, folding, nonlinearities, embeddings and cross entropy.
//! - [`Csm`] models that compose and nest layers.
//! - A fixed CPU ↔ GPU component table ([`mapping`]) used to translate
//!   whole models between backends.
//! - `wgpu` feature: dense kernels on a compute device, with host fallback.
//!
//! # Modules
//!
//! - [`tensors`]: the host tensor.
//! - [`backend`]: the [`Device`] trait and the `Cpu`/`Gpu` backends.
//! - [`model`]: layers, costs and model composition.
//! - [`optimize`]: parameter updates.
//! - [`approx`]: finite-difference gradient checks.
//!
//! # Example
//!
//! ```rust
//! use csm::backend::Cpu;
//! use csm::model::{Csm, Layer, SentenceConvolutionConfig, SoftmaxConfig};
//! use csm::{Axis, Meta, Space, tensor};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(1);
//! let model = Csm::<Cpu>::new(vec![
//!     Box::new(SentenceConvolutionConfig::new(1, 2, 1).build::<Cpu>(&mut rng).unwrap()),
//!     Box::new(SoftmaxConfig { n_classes: 2, n_input_dimensions: 4 }.build::<Cpu>(&mut rng).unwrap()),
//! ]);
//!
//! let x = tensor!([[[1.0], [-0.5], [2.0]]]);
//! let meta = Meta::full_width(Space::infer(&x, &[Axis::Batch, Axis::Width, Axis::Depth]).unwrap());
//! let (y, _, _) = model.fprop(&x, meta).unwrap();
//! assert_eq!(y.shape, vec![2, 1]);
//! ```

pub mod approx;
pub mod backend;
pub mod error;
pub mod mapping;
pub mod meta;
pub mod model;
pub mod ops;
pub mod optimize;
pub mod space;
pub mod tensors;

pub use backend::{Backend, Cpu, Device, Gpu};
pub use error::{Error, Result};
pub use mapping::{ComponentId, ComponentKind, ComponentRegistry};
pub use meta::Meta;
pub use model::{Csm, Layer};
pub use optimize::{Optimizer, Sgd};
pub use space::{Axis, Space};
pub use tensors::{Ten64, Tensor};
