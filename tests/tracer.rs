mod common;

use common::{Call, FailPoint, Kind, MockDevice, MockPresenter};
use summit::*;

const EXTENT: Extent2d = Extent2d {
    width: 8,
    height: 4,
};

struct Fixture {
    device: MockDevice,
    scene: Scene,
    presenter: MockPresenter,
    tracer: PathTracer<MockDevice>,
    _output: tempfile::TempDir,
}

fn fixture(output_interval: u32) -> Fixture {
    let device = MockDevice::new();
    let scene = common::scene(&device);
    let presenter = MockPresenter::new(Format::BGRA8Unorm, EXTENT);
    let output = tempfile::tempdir().unwrap();

    let config = RenderConfig {
        extent: EXTENT,
        output_interval,
        output_dir: output.path().to_owned(),
        ..RenderConfig::default()
    };

    let tracer = PathTracer::prepare(
        device.clone(),
        config,
        &scene,
        &common::programs(),
        &presenter,
    )
    .unwrap();

    Fixture {
        device,
        scene,
        presenter,
        tracer,
        _output: output,
    }
}

impl Fixture {
    fn render(&mut self) -> FrameReport {
        self.tracer.render_frame(&mut self.presenter).unwrap()
    }

    fn published(&self) -> FrameUniforms {
        let buffer = self.tracer.dispatcher().unwrap().uniforms().buffer();
        bytemuck::pod_read_unaligned(&self.device.buffer_data(buffer))
    }

    fn shutdown(self) {
        let device = self.tracer.shutdown();
        common::destroy_scene(&device, self.scene);
        assert!(device.live().is_empty(), "{:?}", device.live());
    }
}

fn trace_extent(commands: &[Command]) -> Option<Extent3d> {
    commands.iter().find_map(|command| match command {
        Command::TraceRays { extent, .. } => Some(*extent),
        _ => None,
    })
}

#[test]
fn prepare_writes_every_binding() {
    let fixture = fixture(2500);
    let calls = fixture.device.calls();

    let writes = calls
        .iter()
        .rev()
        .find_map(|call| match call {
            Call::UpdateDescriptorSets { writes, .. } => Some(writes.clone()),
            _ => None,
        })
        .unwrap();
    let expected: Vec<(u32, usize)> = vec![(0, 1), (1, 1), (2, 1), (3, 1), (4, 1), (5, 2)];
    assert_eq!(writes, expected);

    assert!(calls.contains(&Call::CreateDescriptorSet {
        index: fixture.tracer.bindings().unwrap().set.index(),
        variable_count: 2,
    }));

    let geometry = fixture.tracer.geometry();
    assert_eq!(geometry.len(), 2);
    assert_eq!(geometry.skipped, 1);
    assert!(fixture.tracer.top_level().address().is_some());

    fixture.shutdown();
}

#[test]
fn frame_counter_accumulates_and_resets_on_camera_change() {
    let mut fixture = fixture(2500);

    for expected in 1..=5 {
        let report = fixture.render();
        assert_eq!(report.frame, expected);
        assert_eq!(report.samples, u64::from(expected) * 4);
        assert_eq!(fixture.published().frame, expected);
    }

    fixture
        .tracer
        .camera_mut()
        .translate(glam::Vec3::new(0.0, 0.0, 1.0));
    let report = fixture.render();
    assert_eq!(report.frame, 1);
    assert_eq!(fixture.published().frame, 1);

    let report = fixture.render();
    assert_eq!(report.frame, 2);

    let published = fixture.published();
    assert_eq!(published.light_count, 1);
    assert_eq!(published.sample_dimension, 2);
    assert!(published.random_seed <= MAX_RANDOM_SEED);

    fixture.shutdown();
}

#[test]
fn uniforms_are_published_after_previous_frame_completes() {
    let mut fixture = fixture(2500);
    fixture.render();
    fixture.device.clear_calls();

    fixture.render();

    let calls = fixture.device.calls();
    let wait = calls
        .iter()
        .position(|call| matches!(call, Call::Wait { .. }))
        .unwrap();
    let write = calls
        .iter()
        .position(|call| *call == Call::Other("write_buffer"))
        .unwrap();
    let submit = calls
        .iter()
        .position(|call| matches!(call, Call::Submit { .. }))
        .unwrap();
    assert!(wait < write);
    assert!(write < submit);

    fixture.shutdown();
}

#[test]
fn frame_commands_trace_then_copy_to_presentation_image() {
    let mut fixture = fixture(2500);
    fixture.device.clear_calls();
    fixture.render();

    let commands = fixture.device.submissions().pop().unwrap();
    assert!(matches!(commands[0], Command::BindRayTracingPipeline { .. }));
    assert!(matches!(
        commands[1],
        Command::BindRayTracingDescriptorSets { first_set: 0, .. }
    ));
    assert_eq!(trace_extent(&commands), Some(EXTENT.into_3d()));

    let output = fixture.tracer.dispatcher().unwrap().output().clone();
    let copies: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            Command::CopyImage {
                src_image,
                dst_image,
                ..
            } => Some((src_image.index(), dst_image.index())),
            _ => None,
        })
        .collect();
    assert_eq!(copies, [(output.index(), MockPresenter::FIRST_IMAGE)]);

    match commands.last() {
        Some(Command::PipelineBarrier { images }) => {
            assert_eq!(images[0].new, Layout::Present);
            assert_eq!(images[1].image, output);
            assert_eq!(images[1].new, Layout::General);
        }
        other => panic!("Unexpected last command {:?}", other),
    }

    assert_eq!(fixture.presenter.presented.len(), 1);

    fixture.shutdown();
}

#[test]
fn resize_rebinds_output_before_tracing() {
    let mut fixture = fixture(2500);
    fixture.render();
    fixture.render();

    let old_output = fixture.tracer.dispatcher().unwrap().output().index();
    let resized = Extent2d {
        width: 16,
        height: 4,
    };
    fixture.presenter.resize(resized);
    fixture.device.clear_calls();

    let report = fixture.render();
    assert_eq!(report.frame, 1);

    let new_output = fixture.tracer.dispatcher().unwrap().output().clone();
    assert_ne!(new_output.index(), old_output);
    assert_eq!(new_output.info().extent, resized);

    let calls = fixture.device.calls();
    let created = calls
        .iter()
        .position(|call| {
            matches!(call, Call::CreateImage { index, .. } if *index == new_output.index())
        })
        .unwrap();
    let rebound = calls
        .iter()
        .position(|call| {
            *call
                == Call::UpdateDescriptorSets {
                    writes: vec![(OUTPUT_IMAGE_BINDING, 1)],
                    storage_images: vec![new_output.index()],
                }
        })
        .unwrap();
    let traced = calls
        .iter()
        .position(|call| match call {
            Call::Submit { commands, .. } => trace_extent(commands).is_some(),
            _ => false,
        })
        .unwrap();

    assert!(created < rebound);
    assert!(rebound < traced);
    assert!(calls.contains(&Call::DestroyImage { index: old_output }));

    match &calls[traced] {
        Call::Submit { commands, .. } => {
            assert_eq!(trace_extent(commands), Some(resized.into_3d()))
        }
        _ => unreachable!(),
    }

    fixture.shutdown();
}

#[test]
fn snapshot_is_written_every_interval() {
    let mut fixture = fixture(3);

    let reports: Vec<_> = (0..6).map(|_| fixture.render()).collect();
    let written: Vec<_> = reports
        .iter()
        .filter_map(|report| report.snapshot.clone())
        .collect();

    assert_eq!(written.len(), 2);
    assert_eq!(reports[2].frame, 3);
    assert!(reports[2].snapshot.is_some());
    assert_eq!(written[0].file_name().unwrap(), "12.ppm");
    assert_eq!(written[1].file_name().unwrap(), "24.ppm");

    let ppm = std::fs::read(&written[0]).unwrap();
    let header = b"P6\n8\n4\n255\n";
    assert_eq!(&ppm[..header.len()], header);

    let payload = &ppm[header.len()..];
    assert_eq!(payload.len(), 8 * 4 * 3);

    // Presentation format is BGRA, so red and blue are swapped back.
    assert_eq!(&payload[0..3], &[0x80, 0, 0]);
    assert_eq!(&payload[3..6], &[0x80, 0, 1]);
    let last = &payload[payload.len() - 3..];
    assert_eq!(last, &[0x80, 3, 7]);

    fixture.shutdown();
}

#[test]
fn failed_prepare_releases_everything() {
    for point in [FailPoint::Pipeline, FailPoint::DescriptorSet] {
        let device = MockDevice::new();
        let scene = common::scene(&device);
        let presenter = MockPresenter::new(Format::RGBA8Unorm, EXTENT);
        device.fail_on(point);

        let result = PathTracer::prepare(
            device.clone(),
            RenderConfig::default(),
            &scene,
            &common::programs(),
            &presenter,
        );
        assert!(result.is_err());

        common::destroy_scene(&device, scene);
        assert!(device.live().is_empty(), "{:?}", device.live());
    }
}

#[test]
fn invalid_config_creates_nothing() {
    let device = MockDevice::new();
    let presenter = MockPresenter::new(Format::RGBA8Unorm, EXTENT);

    let result = PathTracer::prepare(
        device.clone(),
        RenderConfig {
            sample_dimension: 0,
            ..RenderConfig::default()
        },
        &Scene::default(),
        &common::programs(),
        &presenter,
    );

    assert!(matches!(
        result,
        Err(PrepareError::Config {
            source: ConfigError::ZeroSampleDimension
        })
    ));
    assert!(device.calls().is_empty());
    assert_eq!(device.live_count(Kind::Buffer), 0);
}
