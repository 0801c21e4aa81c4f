//! GPU-accelerated tensor operations using WGPU.
//!
//! This module implements the dense kernels of the [`Gpu`](crate::backend::Gpu)
//! device as WGSL compute shaders:
//!
//! - `gemm`: matrix multiplication with optional transposes
//! - `unary` / `binary`: elementwise activations and derivatives
//! - `sgd`: stochastic gradient descent update
//!
//! Every shader works in double precision, so the context is only created on
//! adapters exposing [`wgpu::Features::SHADER_F64`]. The context and its
//! pipelines are built once through `lazy_static`; if that fails the reason is
//! logged and every function here returns `None`, letting the dispatcher fall
//! back to the CPU kernels.

use std::sync::mpsc;

use wgpu::util::DeviceExt;

use crate::backend::{Binary, Unary};
use crate::tensors::{Ten64, Tensor};

const GEMM: &str = include_str!("shaders/gemm.wgsl");
const ELEMENTWISE: &str = include_str!("shaders/elementwise.wgsl");

const OP_RELU: u32 = 0;
const OP_RELU_MASK: u32 = 1;
const OP_MUL: u32 = 2;
const OP_TANH_GRAD: u32 = 3;
const OP_SGD: u32 = 4;

/// Common GPU errors.
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("adapter error: {0}")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("device error: {0}")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("adapter `{0}` does not support 64-bit float shaders")]
    MissingF64(String),
    #[error("device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("buffer mapping failed: {0}")]
    Map(#[from] wgpu::BufferAsyncError),
    #[error("buffer readback was abandoned")]
    Readback,
    #[error("{0} elements exceed the storage binding limit")]
    TooLarge(usize),
}

struct Kernel {
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Holds the WGPU device, queue and precompiled pipelines.
///
/// Initialized once globally and reused for all operations via `lazy_static`.
pub struct GpuContext {
    /// The actual GPU device.
    pub device: wgpu::Device,
    /// A queue for information related to the device.
    pub queue: wgpu::Queue,
    gemm: Kernel,
    elementwise: Kernel,
}

impl GpuContext {
    /// Selects the default adapter, creates a device with 64-bit float
    /// shader support and compiles every pipeline.
    ///
    /// # Errors
    /// Returns a [`GpuError`] if no adapter or device can be acquired, or if
    /// the adapter lacks [`wgpu::Features::SHADER_F64`].
    pub fn new() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::default();
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))?;
        if !adapter.features().contains(wgpu::Features::SHADER_F64) {
            return Err(GpuError::MissingF64(adapter.get_info().name));
        }
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("csm"),
            required_features: wgpu::Features::SHADER_F64,
            required_limits: wgpu::Limits::default(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::default(),
        }))?;

        let gemm = build_kernel(&device, "gemm", GEMM, &[
            uniform_entry(0),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, false),
        ]);
        let elementwise = build_kernel(&device, "elementwise", ELEMENTWISE, &[
            uniform_entry(0),
            storage_entry(1, true),
            storage_entry(2, true),
            storage_entry(3, false),
            storage_entry(4, true),
        ]);

        Ok(Self {
            device,
            queue,
            gemm,
            elementwise,
        })
    }

    fn fits(&self, len: usize) -> Result<(), GpuError> {
        let limit = self.device.limits().max_storage_buffer_binding_size as usize;
        if len == 0 || len * size_of::<f64>() > limit {
            return Err(GpuError::TooLarge(len));
        }
        Ok(())
    }

    fn storage(&self, label: &str, data: &[f64]) -> wgpu::Buffer {
        self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(data),
            usage: wgpu::BufferUsages::STORAGE,
        })
    }

    /// Runs `kernel` with `inputs` bound around the output buffer and reads
    /// `out_len` values back.
    fn run(
        &self,
        kernel: &Kernel,
        label: &str,
        dims: [u32; 4],
        inputs: &[&wgpu::Buffer],
        out_len: usize,
        workgroups: (u32, u32),
    ) -> Result<Vec<f64>, GpuError> {
        let size = (out_len * size_of::<f64>()) as u64;
        let dims_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("dims"),
            contents: bytemuck::cast_slice(&dims),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let out_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("out"),
            size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        // dims, the two operands, the output, then any trailing inputs
        let mut resources = vec![&dims_buffer];
        resources.extend(inputs.iter().take(2).copied());
        resources.push(&out_buffer);
        resources.extend(inputs.iter().skip(2).copied());
        let entries: Vec<wgpu::BindGroupEntry<'_>> = resources
            .iter()
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(label),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(label),
                timestamp_writes: None,
            });
            pass.set_pipeline(&kernel.pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.dispatch_workgroups(workgroups.0, workgroups.1, 1);
        }

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        encoder.copy_buffer_to_buffer(&out_buffer, 0, &staging, 0, size);
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::Wait)?;
        rx.recv().map_err(|_| GpuError::Readback)??;

        let view = slice.get_mapped_range();
        let out = bytemuck::pod_collect_to_vec::<u8, f64>(&view);
        drop(view);
        staging.unmap();
        Ok(out)
    }

    fn run_elementwise(&self, op: u32, a: &[f64], b: &[f64], scalar: f64) -> Result<Vec<f64>, GpuError> {
        self.fits(a.len())?;
        let a_buffer = self.storage("a", a);
        let b_buffer = self.storage("b", b);
        let scalars = self.storage("scalars", &[scalar]);
        self.run(
            &self.elementwise,
            "elementwise",
            [op, a.len() as u32, 0, 0],
            &[&a_buffer, &b_buffer, &scalars],
            a.len(),
            ((a.len() as u32).div_ceil(64), 1),
        )
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn build_kernel(
    device: &wgpu::Device,
    label: &str,
    source: &str,
    entries: &[wgpu::BindGroupLayoutEntry],
) -> Kernel {
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(label),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some("main"),
        cache: None,
        compilation_options: wgpu::PipelineCompilationOptions::default(),
    });
    Kernel { layout, pipeline }
}

lazy_static::lazy_static! {
    static ref GPU_CONTEXT: Option<GpuContext> = match GpuContext::new() {
        Ok(ctx) => Some(ctx),
        Err(err) => {
            tracing::warn!(error = %err, "GPU context unavailable, using CPU kernels");
            None
        }
    };
}

fn context() -> Option<&'static GpuContext> {
    GPU_CONTEXT.as_ref()
}

fn report<T>(op: &'static str, result: Result<T, GpuError>) -> Option<T> {
    result
        .inspect_err(|err| tracing::debug!(op, error = %err, "GPU kernel declined"))
        .ok()
}

/// Matrix multiplication `op(a) × op(b)` on the GPU.
///
/// Returns `None` if no context is available, a shape is unsupported or the
/// device fails.
pub fn gemm(a: &Ten64, trans_a: bool, b: &Ten64, trans_b: bool) -> Option<Ten64> {
    let ctx = context()?;
    if a.rank() != 2 || b.rank() != 2 {
        return None;
    }
    let (m, k) = if trans_a { (a.shape[1], a.shape[0]) } else { (a.shape[0], a.shape[1]) };
    let (k2, n) = if trans_b { (b.shape[1], b.shape[0]) } else { (b.shape[0], b.shape[1]) };
    if k != k2 || k == 0 {
        return None;
    }

    let result = ctx.fits(m * n).and_then(|()| {
        ctx.fits(a.len())?;
        ctx.fits(b.len())?;
        let a_buffer = ctx.storage("a", &a.data);
        let b_buffer = ctx.storage("b", &b.data);
        let flags = u32::from(trans_a) | (u32::from(trans_b) << 1);
        ctx.run(
            &ctx.gemm,
            "gemm",
            [m as u32, k as u32, n as u32, flags],
            &[&a_buffer, &b_buffer],
            m * n,
            ((n as u32).div_ceil(8), (m as u32).div_ceil(8)),
        )
    });
    report("gemm", result).map(|data| Tensor::new(vec![m, n], data))
}

/// Elementwise single-input kernel on the GPU. `Tanh` has no double
/// precision shader and always returns `None`.
pub fn unary(op: Unary, x: &Ten64) -> Option<Ten64> {
    let ctx = context()?;
    let code = match op {
        Unary::Relu => OP_RELU,
        Unary::ReluMask => OP_RELU_MASK,
        Unary::Tanh => return None,
    };
    report("unary", ctx.run_elementwise(code, &x.data, &x.data, 0.0))
        .map(|data| Tensor::new(x.shape.clone(), data))
}

/// Elementwise two-input kernel on the GPU.
pub fn binary(op: Binary, a: &Ten64, b: &Ten64) -> Option<Ten64> {
    let ctx = context()?;
    if a.shape != b.shape {
        return None;
    }
    let code = match op {
        Binary::Mul => OP_MUL,
        Binary::TanhGrad => OP_TANH_GRAD,
    };
    report("binary", ctx.run_elementwise(code, &a.data, &b.data, 0.0))
        .map(|data| Tensor::new(a.shape.clone(), data))
}

/// In-place `param -= lr * grad` on the GPU.
///
/// # Returns
/// - `true` if the update succeeded
/// - `false` if the caller must fall back
pub fn sgd(param: &mut Ten64, grad: &Ten64, lr: f64) -> bool {
    let Some(ctx) = context() else {
        return false;
    };
    if param.shape != grad.shape {
        return false;
    }
    match report("sgd", ctx.run_elementwise(OP_SGD, &param.data, &grad.data, lr)) {
        Some(data) => {
            param.data = data;
            true
        }
        None => false,
    }
}
