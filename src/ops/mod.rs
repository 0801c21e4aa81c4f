//! # Operation Kernels
//!
//! Dense kernels behind the [`Device`](crate::backend::Device) trait.
//!
//! ## Submodules
//!
//! - [`cpu`]: multi-threaded CPU operations (default fallback backend)
//! - [`wgpu`] *(opt-in)*: GPU compute shader pipelines using `wgpu`
//! - [`dispatch`]: GPU-first entry points used by the `Gpu` device
//!
//! ## Feature Flags
//!
//! - `wgpu`: enables the `wgpu` (WebGPU) kernels

pub mod cpu;
pub mod dispatch;
#[cfg(feature = "wgpu")]
pub mod wgpu;
