use assert_matches::assert_matches;
use csm::model::{
    Csm, DictionaryEncoding, DeviceToHost, HostToDevice, KMaxPoolingConfig, Layer, Relu,
};
use csm::{Backend, ComponentId, ComponentKind, ComponentRegistry, Cpu, Error, Gpu};

#[test]
fn test_host_to_device_table_is_a_bijection() {
    let registry = ComponentRegistry::new();
    let mut seen = Vec::new();
    for kind in ComponentKind::ALL.into_iter().filter(|k| !k.is_transport()) {
        let gpu = registry.get_gpu_analog(ComponentId::cpu(kind)).unwrap();
        assert_eq!(gpu.backend, Backend::Gpu);
        assert!(!seen.contains(&gpu), "{gpu} mapped twice");
        seen.push(gpu);
        assert_eq!(registry.get_cpu_analog(gpu).unwrap(), ComponentId::cpu(kind));
    }
    assert_eq!(seen.len(), 13);
}

#[test]
fn test_transport_lookups() {
    let registry = ComponentRegistry::new();
    let upload = HostToDevice::<Gpu>::new().id();
    let download = DeviceToHost::<Gpu>::new().id();

    assert_eq!(registry.host_to_device()[&upload], HostToDevice::<Cpu>::new().id());
    assert_eq!(registry.host_to_device()[&download], DeviceToHost::<Cpu>::new().id());
    assert_matches!(registry.get_cpu_analog(upload), Err(Error::NotFound(id)) if id == upload);
    assert_matches!(registry.get_cpu_analog(download), Err(Error::NotFound(_)));
    assert_matches!(
        registry.get_gpu_analog(HostToDevice::<Cpu>::new().id()),
        Err(Error::NotFound(_))
    );
}

#[test]
fn test_wrong_direction_lookups_fail() {
    let registry = ComponentRegistry::new();
    let cpu_softmax = ComponentId::cpu(ComponentKind::Softmax);
    assert_matches!(registry.get_cpu_analog(cpu_softmax), Err(Error::NotFound(_)));
    assert_matches!(
        registry.get_gpu_analog(ComponentId::gpu(ComponentKind::Softmax)),
        Err(Error::NotFound(_))
    );
}

#[test]
fn test_layer_identities_follow_their_backend() {
    let registry = ComponentRegistry::new();
    let pooling = KMaxPoolingConfig { k: 2 }.build::<Gpu>().unwrap();
    assert_eq!(pooling.id().to_string(), "gpu::KMaxPooling");
    assert_eq!(
        registry.get_cpu_analog(pooling.id()).unwrap(),
        KMaxPoolingConfig { k: 2 }.build::<Cpu>().unwrap().id()
    );
    assert_eq!(
        registry.get_gpu_analog(DictionaryEncoding::<Cpu>::new(["x"]).id()).unwrap(),
        DictionaryEncoding::<Gpu>::new(["x"]).id()
    );
}

#[test]
fn test_translation_keeps_structure() {
    let registry = ComponentRegistry::new();
    let cpu = Csm::<Cpu>::new(vec![
        Box::new(Relu::<Cpu>::new()),
        Box::new(Csm::<Cpu>::new(vec![Box::new(Relu::<Cpu>::new())])),
    ]);
    let gpu = registry.to_gpu(&cpu).unwrap();
    assert_eq!(gpu.id(), ComponentId::gpu(ComponentKind::Csm));
    let kinds: Vec<_> = gpu.layers().iter().map(|l| l.id()).collect();
    assert_eq!(
        kinds,
        vec![ComponentId::gpu(ComponentKind::Relu), ComponentId::gpu(ComponentKind::Csm)]
    );
    assert_eq!(registry.to_cpu(&gpu).unwrap().describe(), cpu.describe());
}
