//! Moving activations and deltas across the host/device boundary.
//!
//! Transports sit at the edges of a model: inputs are produced on the host,
//! pushed to the device for the layers and pulled back for inspection.
//! Content and meta pass through unchanged.

use core::marker::PhantomData;

use tracing::trace;

use crate::backend::Device;
use crate::mapping::{ComponentId, ComponentKind};
use crate::meta::Meta;
use crate::tensors::Ten64;

/// Copies host tensors onto `D`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostToDevice<D: Device>(PhantomData<D>);

impl<D: Device> HostToDevice<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(ComponentKind::HostToDevice, D::BACKEND)
    }

    pub fn fprop(&self, x: &Ten64, meta: Meta) -> (D::Array, Meta) {
        trace!(shape = ?x.shape, backend = %D::BACKEND, "host to device");
        (D::from_host(x.clone()), meta)
    }

    /// The delta w.r.t. the host input.
    pub fn bprop(&self, delta: &D::Array, meta: Meta) -> (Ten64, Meta) {
        (D::host(delta).clone(), meta)
    }
}

/// Copies `D` arrays back to the host.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceToHost<D: Device>(PhantomData<D>);

impl<D: Device> DeviceToHost<D> {
    pub fn new() -> Self {
        Self(PhantomData)
    }

    pub fn id(&self) -> ComponentId {
        ComponentId::new(ComponentKind::DeviceToHost, D::BACKEND)
    }

    pub fn fprop(&self, x: &D::Array, meta: Meta) -> (Ten64, Meta) {
        trace!(backend = %D::BACKEND, "device to host");
        (D::host(x).clone(), meta)
    }

    /// The delta w.r.t. the device input.
    pub fn bprop(&self, delta: &Ten64, meta: Meta) -> (D::Array, Meta) {
        (D::from_host(delta.clone()), meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, Gpu};
    use crate::mapping::ComponentRegistry;
    use crate::space::{Axis, Space};
    use crate::tensor;

    #[test]
    fn round_trip_preserves_content_and_meta() {
        let x = tensor!([[1.0, -2.0, 3.5], [0.0, 4.0, -1.0]]);
        let meta = Meta::new(Space::infer(&x, &[Axis::Batch, Axis::Width]).unwrap(), vec![3, 2]);

        let (on_device, device_meta) = HostToDevice::<Gpu>::new().fprop(&x, meta.clone());
        assert_eq!(on_device.shape(), &[2, 3]);
        let (back, host_meta) = DeviceToHost::<Gpu>::new().fprop(&on_device, device_meta);
        assert_eq!(back, x);
        assert_eq!(host_meta, meta);

        let (delta, _) = DeviceToHost::<Gpu>::new().bprop(&x, meta.clone());
        let (host_delta, _) = HostToDevice::<Gpu>::new().bprop(&delta, meta);
        assert_eq!(host_delta, x);
    }

    #[test]
    fn gpu_transports_map_to_host_transports() {
        let registry = ComponentRegistry::new();
        for id in [HostToDevice::<Gpu>::new().id(), DeviceToHost::<Gpu>::new().id()] {
            assert_eq!(id.backend, Backend::Gpu);
            let host = registry.host_to_device()[&id];
            assert_eq!(host, ComponentId::cpu(id.kind));
            assert!(registry.get_cpu_analog(id).is_err());
        }
    }
}
