//! CPU ↔ GPU component identities and model translation.
//!
//! Every component exists once per backend. The [`ComponentRegistry`] holds
//! the fixed table pairing a host component with its device counterpart and
//! is the only place a model's layers are matched across backends.

use core::fmt;
use std::collections::BTreeMap;

use tracing::{debug, instrument};

use crate::backend::{Backend, Cpu, Device, Gpu};
use crate::error::{Error, Result};
use crate::model::spec::{LayerConfig, LayerSpec};
use crate::model::{Csm, Layer};

/// Every component the toolkit knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Linear,
    Bias,
    SentenceConvolution,
    Softmax,
    KMaxPooling,
    MaxFolding,
    SumFolding,
    Relu,
    Tanh,
    CrossEntropy,
    WordEmbedding,
    DictionaryEncoding,
    Csm,
    HostToDevice,
    DeviceToHost,
}

impl ComponentKind {
    pub const ALL: [Self; 15] = [
        Self::Linear,
        Self::Bias,
        Self::SentenceConvolution,
        Self::Softmax,
        Self::KMaxPooling,
        Self::MaxFolding,
        Self::SumFolding,
        Self::Relu,
        Self::Tanh,
        Self::CrossEntropy,
        Self::WordEmbedding,
        Self::DictionaryEncoding,
        Self::Csm,
        Self::HostToDevice,
        Self::DeviceToHost,
    ];

    /// Whether this kind moves data across the host/device boundary.
    pub const fn is_transport(self) -> bool {
        matches!(self, Self::HostToDevice | Self::DeviceToHost)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A component kind on a particular backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    pub kind: ComponentKind,
    pub backend: Backend,
}

impl ComponentId {
    pub const fn new(kind: ComponentKind, backend: Backend) -> Self {
        Self { kind, backend }
    }

    pub const fn cpu(kind: ComponentKind) -> Self {
        Self::new(kind, Backend::Cpu)
    }

    pub const fn gpu(kind: ComponentKind) -> Self {
        Self::new(kind, Backend::Gpu)
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.backend, self.kind)
    }
}

/// The fixed CPU ↔ GPU association table.
///
/// The host→device table pairs every non-transport CPU component with its
/// GPU twin. The two transport components are keyed by their GPU identity
/// and map onto the CPU transport of the same kind; they do not appear in the
/// device→host table.
///
/// ```rust
/// use csm::mapping::{ComponentId, ComponentKind, ComponentRegistry};
///
/// let registry = ComponentRegistry::new();
/// let gpu = ComponentId::gpu(ComponentKind::Softmax);
/// assert_eq!(registry.get_cpu_analog(gpu).unwrap(), ComponentId::cpu(ComponentKind::Softmax));
/// assert!(registry.get_cpu_analog(ComponentId::gpu(ComponentKind::HostToDevice)).is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRegistry {
    host_to_device: BTreeMap<ComponentId, ComponentId>,
    device_to_host: BTreeMap<ComponentId, ComponentId>,
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        let mut host_to_device = BTreeMap::new();
        let mut device_to_host = BTreeMap::new();
        for kind in ComponentKind::ALL {
            if kind.is_transport() {
                host_to_device.insert(ComponentId::gpu(kind), ComponentId::cpu(kind));
            } else {
                host_to_device.insert(ComponentId::cpu(kind), ComponentId::gpu(kind));
                device_to_host.insert(ComponentId::gpu(kind), ComponentId::cpu(kind));
            }
        }
        Self {
            host_to_device,
            device_to_host,
        }
    }

    /// The host→device table.
    pub fn host_to_device(&self) -> &BTreeMap<ComponentId, ComponentId> {
        &self.host_to_device
    }

    /// The device→host table.
    pub fn device_to_host(&self) -> &BTreeMap<ComponentId, ComponentId> {
        &self.device_to_host
    }

    /// Looks up the CPU twin of a GPU component.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `gpu` is not in the device→host table.
    pub fn get_cpu_analog(&self, gpu: ComponentId) -> Result<ComponentId> {
        self.device_to_host
            .get(&gpu)
            .copied()
            .ok_or(Error::NotFound(gpu))
    }

    /// Looks up the GPU twin of a CPU component.
    ///
    /// # Errors
    /// [`Error::NotFound`] if `cpu` is not a key of the host→device table
    /// with a GPU value.
    pub fn get_gpu_analog(&self, cpu: ComponentId) -> Result<ComponentId> {
        self.host_to_device
            .get(&cpu)
            .copied()
            .filter(|id| id.backend == Backend::Gpu)
            .ok_or(Error::NotFound(cpu))
    }

    /// The identity of `id` on `backend`.
    ///
    /// # Errors
    /// [`Error::NotFound`] if the table has no such pairing.
    pub fn analog(&self, id: ComponentId, backend: Backend) -> Result<ComponentId> {
        match (id.backend, backend) {
            (from, to) if from == to => Ok(id),
            (Backend::Cpu, Backend::Gpu) => self.get_gpu_analog(id),
            _ => self.get_cpu_analog(id),
        }
    }

    fn check(&self, spec: &LayerSpec, from: Backend, to: Backend) -> Result<()> {
        let id = ComponentId::new(spec.config.kind(), from);
        let analog = self.analog(id, to)?;
        debug!(from = %id, to = %analog, "mapped component");
        if let LayerConfig::Csm(children) = &spec.config {
            for child in children {
                self.check(child, from, to)?;
            }
        }
        Ok(())
    }

    /// Rebuilds `model` on backend `T`, copying every parameter.
    ///
    /// # Errors
    /// [`Error::NotFound`] if any (nested) layer has no analog on `T`.
    #[instrument(skip_all, level = "debug", fields(from = %S::BACKEND, to = %T::BACKEND))]
    pub fn translate<S: Device, T: Device>(&self, model: &Csm<S>) -> Result<Csm<T>> {
        let spec = model.describe();
        self.check(&spec, S::BACKEND, T::BACKEND)?;
        Csm::from_spec(spec)
    }

    /// Shorthand for `translate::<Cpu, Gpu>`.
    ///
    /// # Errors
    /// See [`ComponentRegistry::translate`].
    pub fn to_gpu(&self, model: &Csm<Cpu>) -> Result<Csm<Gpu>> {
        self.translate(model)
    }

    /// Shorthand for `translate::<Gpu, Cpu>`.
    ///
    /// # Errors
    /// See [`ComponentRegistry::translate`].
    pub fn to_cpu(&self, model: &Csm<Gpu>) -> Result<Csm<Cpu>> {
        self.translate(model)
    }
}
