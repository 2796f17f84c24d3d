mod common;

use common::{Call, FailPoint, Kind, MockDevice};
use summit::*;

fn compile(device: &MockDevice) -> (PathTracingBindings, RayTracingProgram) {
    let bindings = PathTracingBindings::new(device, 2).unwrap();
    let program = compile_pipeline(device, &common::programs(), &bindings.layout).unwrap();
    (bindings, program)
}

#[test]
fn table_holds_one_raygen_two_miss_two_hit_records() {
    let device = MockDevice::new();
    let (bindings, program) = compile(&device);
    assert_eq!(device.live_count(Kind::ShaderModule), 0);

    let table = build_binding_table(&device, &program).unwrap();

    assert!(device.calls().contains(&Call::GroupHandles { first: 0, count: 5 }));

    let raygen = table.table.raygen.as_ref().unwrap();
    let miss = table.table.miss.as_ref().unwrap();
    let hit = table.table.hit.as_ref().unwrap();
    assert!(table.table.callable.is_none());

    assert_eq!(raygen.count(), 1);
    assert_eq!(miss.count(), 2);
    assert_eq!(hit.count(), 2);
    assert_eq!(raygen.stride, 32);
    assert_eq!(raygen.region.offset, 0);
    assert_eq!(miss.region.offset, 64);
    assert_eq!(hit.region.offset, 128);

    for region in [raygen, miss, hit] {
        let address = region.region.address().unwrap().get();
        assert_eq!(address % 64, 0);
    }

    let data = device.buffer_data(&table.buffer);
    assert_eq!(data.len() as u64, table.layout.size);
    assert_eq!(&data[0..32], &[1; 32]);
    assert_eq!(&data[32..64], &[0; 32]);
    assert_eq!(&data[64..96], &[2; 32]);
    assert_eq!(&data[96..128], &[3; 32]);
    assert_eq!(&data[128..160], &[4; 32]);
    assert_eq!(&data[160..192], &[5; 32]);

    table.destroy(&device);
    program.destroy(&device);
    bindings.destroy(&device);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn short_handle_data_is_rejected() {
    let device = MockDevice::new();
    let (bindings, program) = compile(&device);
    device.fail_on(FailPoint::GroupHandles);

    let result = build_binding_table(&device, &program);
    assert!(matches!(
        result,
        Err(PipelineError::InsufficientHandles {
            group_count: 5,
            handle_size: 32,
            handle_bytes: 128,
        })
    ));
    assert_eq!(device.live_count(Kind::Buffer), 0);

    program.destroy(&device);
    bindings.destroy(&device);
}

#[test]
fn recursion_depth_is_checked_before_compilation() {
    let device = MockDevice::with_properties(DeviceProperties {
        shader_group_handle_size: 32,
        shader_group_handle_alignment: 32,
        shader_group_base_alignment: 64,
        max_ray_recursion_depth: 1,
        max_variable_descriptor_count: 64,
    });
    let bindings = PathTracingBindings::new(&device, 0).unwrap();

    let result = compile_pipeline(&device, &common::programs(), &bindings.layout);
    assert!(matches!(
        result,
        Err(PipelineError::RecursionDepth {
            requested: 2,
            supported: 1
        })
    ));
    assert_eq!(device.live_count(Kind::ShaderModule), 0);

    bindings.destroy(&device);
    assert!(device.live().is_empty(), "{:?}", device.live());
}

#[test]
fn failed_compilation_releases_layout_and_modules() {
    let device = MockDevice::new();
    let bindings = PathTracingBindings::new(&device, 2).unwrap();
    device.fail_on(FailPoint::Pipeline);

    let result = compile_pipeline(&device, &common::programs(), &bindings.layout);
    assert!(matches!(
        result,
        Err(PipelineError::Compile { group_count: 5, .. })
    ));
    assert_eq!(device.live_count(Kind::ShaderModule), 0);
    assert_eq!(device.live_count(Kind::PipelineLayout), 0);

    bindings.destroy(&device);
}

#[test]
fn invalid_shader_is_reported_with_stage() {
    let device = MockDevice::new();
    let bindings = PathTracingBindings::new(&device, 2).unwrap();
    let mut programs = common::programs();
    programs.any_hit = ShaderModuleInfo::spirv(vec![0u8; 7]);

    let result = compile_pipeline(&device, &programs, &bindings.layout);
    assert!(matches!(
        result,
        Err(PipelineError::ShaderModule {
            stage: ShaderStage::AnyHit,
            ..
        })
    ));
    assert_eq!(device.live_count(Kind::ShaderModule), 0);

    bindings.destroy(&device);
}

#[test]
fn texture_table_is_bounded_by_device() {
    let device = MockDevice::new();

    assert!(matches!(
        PathTracingBindings::new(&device, 65),
        Err(BindingError::TooManyTextures { count: 65, max: 64 })
    ));
    assert!(device.live().is_empty(), "{:?}", device.live());

    let bindings = PathTracingBindings::new(&device, 64).unwrap();
    assert_eq!(bindings.set.variable_count(), 64);
    bindings.destroy(&device);
}
