mod common;

use common::{Call, FailPoint, MockDevice};
use summit::*;

fn scratch_buffers(device: &MockDevice) -> Vec<(usize, BufferInfo)> {
    device
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::CreateBuffer {
                index,
                info,
                memory: Some(memory),
            } if memory.contains(MemoryUsage::TRANSIENT) => Some((index, info)),
            _ => None,
        })
        .collect()
}

fn storage_buffers(device: &MockDevice) -> Vec<(usize, BufferInfo)> {
    device
        .created_buffers()
        .into_iter()
        .filter(|(_, info)| {
            info.usage
                .contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE)
        })
        .collect()
}

fn destroyed_buffers(device: &MockDevice) -> Vec<usize> {
    device
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::DestroyBuffer { index } => Some(index),
            _ => None,
        })
        .collect()
}

fn build_infos(device: &MockDevice) -> Vec<AccelerationStructureBuildGeometryInfo> {
    device
        .submissions()
        .into_iter()
        .flatten()
        .filter_map(|command| match command {
            Command::BuildAccelerationStructure { infos } => Some(infos),
            _ => None,
        })
        .flatten()
        .collect()
}

#[test]
fn bottom_level_uses_reported_sizes() {
    let device = MockDevice::new();
    let scene = common::scene(&device);
    let geometry = PackedGeometry::pack(&scene);
    assert_eq!(geometry.len(), 2);

    let buffers = geometry.upload(&device).unwrap();
    device.clear_calls();

    let mut bottom = build_bottom_level(&device, &geometry, buffers.transforms.as_ref()).unwrap();

    let reported = MockDevice::reported_sizes(AccelerationStructureLevel::Bottom, 2);
    assert_eq!(*bottom.sizes(), reported);
    assert_ne!(reported.acceleration_structure_size, reported.build_scratch_size);

    let storage = storage_buffers(&device);
    assert_eq!(storage.len(), 1);
    assert_eq!(storage[0].1.size, reported.acceleration_structure_size);

    let scratch = scratch_buffers(&device);
    assert_eq!(scratch.len(), 1);
    assert_eq!(scratch[0].1.size, reported.build_scratch_size);

    // Scratch is released once the build completes. Storage stays.
    let destroyed = destroyed_buffers(&device);
    assert!(destroyed.contains(&scratch[0].0));
    assert!(!destroyed.contains(&storage[0].0));

    let infos = build_infos(&device);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].geometries.len(), 2);
    assert_eq!(
        infos[0].flags,
        AccelerationStructureBuildFlags::PREFER_FAST_TRACE
    );
    assert_eq!(
        infos[0].scratch,
        DeviceAddress::new(0x1_0000 * (scratch[0].0 as u64 + 1)).unwrap()
    );
    for geometry in &infos[0].geometries {
        match geometry {
            AccelerationStructureGeometry::Triangles { flags, .. } => {
                assert_eq!(*flags, GeometryFlags::empty())
            }
            other => panic!("Unexpected bottom level geometry {:?}", other),
        }
    }

    // Build is waited for before returning.
    let calls = device.calls();
    let submit = calls
        .iter()
        .position(|call| matches!(call, Call::Submit { .. }))
        .unwrap();
    assert!(matches!(calls[submit + 1], Call::Wait { .. }));

    bottom.destroy(&device);
    bottom.destroy(&device);
    assert!(bottom.is_empty());

    buffers.destroy(&device);
    common::destroy_scene(&device, scene);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn top_level_instances_bottom_level_once() {
    let device = MockDevice::new();
    let scene = common::scene(&device);
    let geometry = PackedGeometry::pack(&scene);
    let buffers = geometry.upload(&device).unwrap();
    let mut bottom = build_bottom_level(&device, &geometry, buffers.transforms.as_ref()).unwrap();
    device.clear_calls();

    let mut top = build_top_level(&device, &bottom).unwrap();

    let reported = MockDevice::reported_sizes(AccelerationStructureLevel::Top, 1);
    assert_eq!(top.level(), AccelerationStructureLevel::Top);
    assert_eq!(storage_buffers(&device)[0].1.size, reported.acceleration_structure_size);
    assert_eq!(scratch_buffers(&device)[0].1.size, reported.build_scratch_size);

    let instances: Vec<_> = device
        .created_buffers()
        .into_iter()
        .filter(|(_, info)| {
            info.usage
                .contains(BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT)
        })
        .collect();
    assert_eq!(instances.len(), 1);
    assert_eq!(
        instances[0].1.size,
        std::mem::size_of::<AccelerationStructureInstance>() as u64
    );
    assert!(destroyed_buffers(&device).contains(&instances[0].0));

    let infos = build_infos(&device);
    match &infos[0].geometries[..] {
        [AccelerationStructureGeometry::Instances {
            flags,
            primitive_count,
            ..
        }] => {
            assert_eq!(*flags, GeometryFlags::OPAQUE);
            assert_eq!(*primitive_count, 1);
        }
        other => panic!("Unexpected top level geometries {:?}", other),
    }

    top.destroy(&device);
    bottom.destroy(&device);
    buffers.destroy(&device);
    common::destroy_scene(&device, scene);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn empty_scene_builds() {
    let device = MockDevice::new();
    let geometry = PackedGeometry::pack(&Scene::default());
    assert!(geometry.is_empty());

    let buffers = geometry.upload(&device).unwrap();
    assert!(buffers.transforms.is_none());

    let mut bottom = build_bottom_level(&device, &geometry, None).unwrap();
    let mut top = build_top_level(&device, &bottom).unwrap();

    assert!(device.calls().contains(&Call::BuildSizes {
        level: AccelerationStructureLevel::Bottom,
        geometry_count: 0,
    }));
    assert!(top.address().is_some());

    top.destroy(&device);
    bottom.destroy(&device);
    buffers.destroy(&device);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn top_level_requires_bottom_level() {
    let device = MockDevice::new();
    let bottom = AccelerationStructureHandle::default();

    assert!(matches!(
        build_top_level(&device, &bottom),
        Err(BuildError::BottomLevelNotBuilt)
    ));
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn failed_build_submission_releases_scratch_and_storage() {
    let device = MockDevice::new();
    let scene = common::scene(&device);
    let geometry = PackedGeometry::pack(&scene);
    let buffers = geometry.upload(&device).unwrap();
    device.clear_calls();

    device.fail_on(FailPoint::Submit);
    let result = build_bottom_level(&device, &geometry, buffers.transforms.as_ref());
    assert!(matches!(
        result,
        Err(BuildError::Device {
            level: AccelerationStructureLevel::Bottom,
            step: BuildStep::Submit,
            geometry_count: 2,
            ..
        })
    ));

    let scratch = scratch_buffers(&device);
    let storage = storage_buffers(&device);
    assert_eq!(scratch.len(), 1);
    assert_eq!(storage.len(), 1);

    let destroyed = destroyed_buffers(&device);
    assert!(destroyed.contains(&scratch[0].0));
    assert!(destroyed.contains(&storage[0].0));
    assert!(device
        .calls()
        .iter()
        .any(|call| matches!(call, Call::DestroyAccelerationStructure { .. })));

    buffers.destroy(&device);
    common::destroy_scene(&device, scene);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn failed_size_query_creates_nothing() {
    let device = MockDevice::new();
    let geometry = PackedGeometry::pack(&Scene::default());

    device.fail_on(FailPoint::BuildSizes);
    assert!(matches!(
        build_bottom_level(&device, &geometry, None),
        Err(BuildError::Device {
            level: AccelerationStructureLevel::Bottom,
            step: BuildStep::SizeQuery,
            source: DeviceError::OutOfMemory { .. },
            ..
        })
    ));
    assert!(device.created_buffers().is_empty());
    assert!(device.live().is_empty(), "{:?}", device.live());
}
