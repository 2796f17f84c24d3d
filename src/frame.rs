use std::path::{Path, PathBuf};

use crate::{
    bindings::PathTracingBindings,
    camera::Camera,
    config::RenderConfig,
    device::{Device, DeviceError, Submission},
    encode::{Encoder, ImageCopy},
    error::{FrameError, PrepareError},
    image::{
        Extent2d, Format, Image, ImageInfo, ImageMemoryBarrier, ImageTiling, ImageUsage, Layout,
    },
    memory::MemoryUsage,
    pipeline::{PipelineLayout, RayTracingPipeline, ShaderBindingTable},
    snapshot::{export, should_export, StagingImage},
    uniforms::{FrameCounter, FrameState, UniformBuffer},
    OutOfMemory,
};

/// Source of images the accumulated result is copied to each frame.
pub trait Presenter {
    /// Format of presentation images.
    fn format(&self) -> Format;

    /// Layout presentation image must be left in.
    fn present_layout(&self) -> Layout {
        Layout::Present
    }

    /// Returns new viewport extent if it changed since last call.
    fn take_resized(&mut self) -> Option<Extent2d>;

    /// Returns image for the next frame.
    /// It must support `TRANSFER_DST` usage and match current viewport.
    fn acquire(&mut self) -> Result<Image, DeviceError>;

    /// Presents `image` once `submission` completes.
    fn present(&mut self, image: Image, submission: Submission) -> Result<(), DeviceError>;
}

/// Lifecycle of a single frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FramePhase {
    Idle,
    Recording,
    Submitted,
}

/// Pipeline objects used to trace a frame.
#[derive(Clone, Copy, Debug)]
pub struct FramePrograms<'a> {
    pub pipeline: &'a RayTracingPipeline,
    pub layout: &'a PipelineLayout,
    pub bindings: &'a PathTracingBindings,
    pub binding_table: &'a ShaderBindingTable,
}

/// Outcome of one rendered frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u32,

    /// Samples per pixel accumulated so far.
    pub samples: u64,

    pub snapshot: Option<PathBuf>,
}

/// Drives per-frame uniform publication, tracing, presentation and export.
#[derive(Debug)]
pub struct FrameDispatcher {
    state: FrameState,
    uniforms: UniformBuffer,
    output: Image,
    staging: StagingImage,
    format: Format,
    phase: FramePhase,
    in_flight: Option<Submission>,
    sample_count: u32,
    output_interval: u32,
    output_dir: PathBuf,
}

impl FrameDispatcher {
    /// Creates uniform buffer, storage output image and staging image.
    #[tracing::instrument(skip(device, config))]
    pub fn new<D>(
        device: &D,
        config: &RenderConfig,
        light_count: u32,
        format: Format,
    ) -> Result<Self, PrepareError>
    where
        D: Device + ?Sized,
    {
        let uniforms = UniformBuffer::new(device).map_err(|source| PrepareError::Upload {
            what: "frame uniforms",
            source,
        })?;

        let (output, staging) = match create_targets(device, config.extent, format) {
            Ok(targets) => targets,
            Err(err) => {
                uniforms.destroy(device);
                return Err(err.into());
            }
        };

        Ok(FrameDispatcher {
            state: FrameState::new(config, light_count),
            uniforms,
            output,
            staging,
            format,
            phase: FramePhase::Idle,
            in_flight: None,
            sample_count: config.sample_count(),
            output_interval: config.output_interval,
            output_dir: config.output_dir.clone(),
        })
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    pub fn frame(&self) -> u32 {
        self.state.frame()
    }

    pub fn counter(&self) -> FrameCounter {
        self.state.counter()
    }

    pub fn state(&self) -> &FrameState {
        &self.state
    }

    pub fn output(&self) -> &Image {
        &self.output
    }

    pub fn extent(&self) -> Extent2d {
        self.output.info().extent
    }

    pub fn uniforms(&self) -> &UniformBuffer {
        &self.uniforms
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Renders one frame.
    ///
    /// Waits for the previous frame before touching uniforms or bindings.
    pub fn render<D, P>(
        &mut self,
        device: &D,
        programs: &FramePrograms<'_>,
        camera: &mut Camera,
        presenter: &mut P,
    ) -> Result<FrameReport, FrameError>
    where
        D: Device + ?Sized,
        P: Presenter + ?Sized,
    {
        if self.phase == FramePhase::Recording {
            return Err(FrameError::InvalidPhase {
                frame: self.state.frame(),
            });
        }

        self.wait_in_flight(device)?;

        if let Some(extent) = presenter.take_resized() {
            self.resize(device, programs.bindings, camera, extent)?;
        }

        if camera.take_changed() {
            self.state.reset_accumulation();
        }

        let uniforms = self.state.advance(camera.view(), camera.projection());
        let frame = uniforms.frame;
        self.uniforms
            .publish(device, &uniforms)
            .map_err(|source| FrameError::Uniforms { source })?;

        self.phase = FramePhase::Recording;
        let result = self.record_and_submit(device, programs, presenter, frame);
        self.phase = match result {
            Ok(_) => FramePhase::Submitted,
            Err(_) => FramePhase::Idle,
        };
        let exporting = result?;

        let samples = u64::from(frame) * u64::from(self.sample_count);
        tracing::info!("Sample count: {}", samples);

        let snapshot = if exporting {
            self.wait_in_flight(device)?;
            Some(export(
                device,
                &self.staging,
                &self.output_dir,
                frame,
                self.sample_count,
                self.format.is_bgr(),
            )?)
        } else {
            None
        };

        Ok(FrameReport {
            frame,
            samples,
            snapshot,
        })
    }

    /// Waits for submitted frame and releases owned resources.
    pub fn destroy<D>(mut self, device: &D)
    where
        D: Device + ?Sized,
    {
        if let Err(err) = self.wait_in_flight(device) {
            tracing::error!("Failed to wait for last frame: {}", err);
        }

        self.staging.destroy(device);
        device.destroy_image(self.output);
        self.uniforms.destroy(device);
    }

    fn wait_in_flight<D>(&mut self, device: &D) -> Result<(), FrameError>
    where
        D: Device + ?Sized,
    {
        if let Some(submission) = self.in_flight.take() {
            device
                .wait(submission)
                .map_err(|source| FrameError::Wait {
                    frame: self.state.frame(),
                    source,
                })?;
        }
        self.phase = FramePhase::Idle;
        Ok(())
    }

    /// Recreates output and staging images and rebinds output.
    fn resize<D>(
        &mut self,
        device: &D,
        bindings: &PathTracingBindings,
        camera: &mut Camera,
        extent: Extent2d,
    ) -> Result<(), FrameError>
    where
        D: Device + ?Sized,
    {
        if extent.is_empty() {
            tracing::warn!(
                "Ignoring resize to empty {}x{} viewport",
                extent.width,
                extent.height
            );
            return Ok(());
        }

        if extent == self.extent() {
            return Ok(());
        }

        tracing::warn!(
            "Viewport resized to {}x{}, recreating output image",
            extent.width,
            extent.height
        );

        let (output, staging) = create_targets(device, extent, self.format)?;

        let old_output = std::mem::replace(&mut self.output, output);
        let old_staging = std::mem::replace(&mut self.staging, staging);
        old_staging.destroy(device);
        device.destroy_image(old_output);

        bindings.update_output_image(device, &self.output);
        camera.set_aspect(extent.aspect_ratio());
        self.state.reset_accumulation();
        Ok(())
    }

    /// Returns `true` if frame was copied to staging image for export.
    fn record_and_submit<D, P>(
        &mut self,
        device: &D,
        programs: &FramePrograms<'_>,
        presenter: &mut P,
        frame: u32,
    ) -> Result<bool, FrameError>
    where
        D: Device + ?Sized,
        P: Presenter + ?Sized,
    {
        let target = presenter
            .acquire()
            .map_err(|source| FrameError::Acquire { frame, source })?;

        let exporting = should_export(frame, self.output_interval);
        let extent = self.extent().into_3d();
        let region = [ImageCopy::whole(extent)];

        let mut encoder = Encoder::new();
        encoder.bind_ray_tracing_pipeline(programs.pipeline);
        encoder.bind_ray_tracing_descriptor_sets(programs.layout, 0, &[&programs.bindings.set]);
        encoder.trace_rays(programs.binding_table, extent);

        let mut barriers = vec![
            ImageMemoryBarrier::initialize(&target, Layout::TransferDstOptimal),
            ImageMemoryBarrier::transition(
                &self.output,
                Layout::General,
                Layout::TransferSrcOptimal,
            ),
        ];
        if exporting {
            barriers.push(ImageMemoryBarrier::initialize(
                self.staging.image(),
                Layout::TransferDstOptimal,
            ));
        }
        encoder.image_barriers(barriers);

        encoder.copy_image(
            &self.output,
            Layout::TransferSrcOptimal,
            &target,
            Layout::TransferDstOptimal,
            &region,
        );
        if exporting {
            encoder.copy_image(
                &self.output,
                Layout::TransferSrcOptimal,
                self.staging.image(),
                Layout::TransferDstOptimal,
                &region,
            );
        }

        let mut barriers = vec![
            ImageMemoryBarrier::transition(
                &target,
                Layout::TransferDstOptimal,
                presenter.present_layout(),
            ),
            ImageMemoryBarrier::transition(
                &self.output,
                Layout::TransferSrcOptimal,
                Layout::General,
            ),
        ];
        if exporting {
            barriers.push(ImageMemoryBarrier::transition(
                self.staging.image(),
                Layout::TransferDstOptimal,
                Layout::General,
            ));
        }
        encoder.image_barriers(barriers);

        let submission = device
            .submit(encoder.finish())
            .map_err(|source| FrameError::Submit { frame, source })?;
        self.in_flight = Some(submission);

        presenter
            .present(target, submission)
            .map_err(|source| FrameError::Present { frame, source })?;

        Ok(exporting)
    }
}

/// Creates storage output image in `General` layout and matching staging image.
fn create_targets<D>(
    device: &D,
    extent: Extent2d,
    format: Format,
) -> Result<(Image, StagingImage), FrameError>
where
    D: Device + ?Sized,
{
    let target_error = |what: &'static str| {
        move |source: OutOfMemory| FrameError::Target {
            what,
            width: extent.width,
            height: extent.height,
            source,
        }
    };

    let output = device
        .create_image(ImageInfo {
            extent,
            format,
            usage: ImageUsage::STORAGE | ImageUsage::TRANSFER_SRC,
            tiling: ImageTiling::Optimal,
            memory: MemoryUsage::FAST_DEVICE_ACCESS,
        })
        .map_err(target_error("output image"))?;

    let staging = match StagingImage::new(device, extent) {
        Ok(staging) => staging,
        Err(source) => {
            device.destroy_image(output);
            return Err(target_error("staging image")(source));
        }
    };

    let mut encoder = Encoder::new();
    encoder.image_barriers(vec![
        ImageMemoryBarrier::initialize(&output, Layout::General),
        ImageMemoryBarrier::initialize(staging.image(), Layout::General),
    ]);

    let result = device
        .submit(encoder.finish())
        .and_then(|submission| device.wait(submission));

    match result {
        Ok(()) => {
            tracing::debug!(
                "Output image {}x{} created",
                extent.width,
                extent.height
            );
            Ok((output, staging))
        }
        Err(source) => {
            staging.destroy(device);
            device.destroy_image(output);
            Err(FrameError::Submit { frame: 0, source })
        }
    }
}
