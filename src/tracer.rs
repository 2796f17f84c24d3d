use crate::{
    binding_table::{build_binding_table, BindingTable},
    bindings::{BoundResources, PathTracingBindings},
    buffer::Buffer,
    camera::{Camera, Movement},
    config::{ConfigError, RenderConfig},
    device::Device,
    error::{FrameError, PrepareError},
    frame::{FrameDispatcher, FramePrograms, FrameReport, Presenter},
    geometry::{GeometryBuffers, PackedGeometry},
    lights::{LightTable, MAX_LIGHTS},
    program::{compile_pipeline, PathTracingPrograms, RayTracingProgram},
    scene::Scene,
    structures::{build_bottom_level, build_top_level, AccelerationStructureHandle},
};

/// Everything created by [`PathTracer::prepare`].
///
/// Fields are filled in creation order and released in reverse.
#[derive(Debug, Default)]
struct Resources {
    geometry: Option<GeometryBuffers>,
    bottom: AccelerationStructureHandle,
    top: AccelerationStructureHandle,
    dispatcher: Option<FrameDispatcher>,
    lights: Option<Buffer>,
    bindings: Option<PathTracingBindings>,
    program: Option<RayTracingProgram>,
    binding_table: Option<BindingTable>,
}

impl Resources {
    fn release<D>(&mut self, device: &D)
    where
        D: Device + ?Sized,
    {
        if let Some(binding_table) = self.binding_table.take() {
            binding_table.destroy(device);
        }
        if let Some(program) = self.program.take() {
            program.destroy(device);
        }
        if let Some(bindings) = self.bindings.take() {
            bindings.destroy(device);
        }
        if let Some(lights) = self.lights.take() {
            device.destroy_buffer(lights);
        }
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.destroy(device);
        }
        self.top.destroy(device);
        self.bottom.destroy(device);
        if let Some(geometry) = self.geometry.take() {
            geometry.destroy(device);
        }
    }
}

/// Progressive path tracer.
///
/// Owns every device resource it creates. [`PathTracer::shutdown`] must be
/// called before the device is dropped.
#[derive(Debug)]
pub struct PathTracer<D: Device> {
    device: D,
    config: RenderConfig,
    camera: Camera,
    geometry: PackedGeometry,
    resources: Resources,
}

impl<D> PathTracer<D>
where
    D: Device,
{
    /// Builds acceleration structures, output images, bindings, pipeline
    /// and binding table for `scene`.
    ///
    /// On failure every resource created so far is released.
    #[tracing::instrument(skip_all, fields(width = config.extent.width, height = config.extent.height))]
    pub fn prepare<P>(
        device: D,
        config: RenderConfig,
        scene: &Scene,
        programs: &PathTracingPrograms,
        presenter: &P,
    ) -> Result<Self, PrepareError>
    where
        P: Presenter + ?Sized,
    {
        config.validate()?;

        let camera = Camera::new(&config.camera, config.extent.aspect_ratio());
        let geometry = PackedGeometry::pack(scene);

        let mut resources = Resources::default();
        let result = prepare_resources(
            &device,
            &config,
            scene,
            &geometry,
            programs,
            presenter,
            &mut resources,
        );

        match result {
            Ok(()) => {
                tracing::info!(
                    "Path tracer prepared: {} geometries, {} triangles, {} textures",
                    geometry.len(),
                    geometry.triangle_count(),
                    scene.textures.len(),
                );

                Ok(PathTracer {
                    device,
                    config,
                    camera,
                    geometry,
                    resources,
                })
            }
            Err(err) => {
                tracing::error!("Failed to prepare path tracer: {}", err);
                resources.release(&device);
                Err(err)
            }
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Camera changes reset accumulation on the next frame.
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn geometry(&self) -> &PackedGeometry {
        &self.geometry
    }

    pub fn bottom_level(&self) -> &AccelerationStructureHandle {
        &self.resources.bottom
    }

    pub fn top_level(&self) -> &AccelerationStructureHandle {
        &self.resources.top
    }

    pub fn binding_table(&self) -> Option<&BindingTable> {
        self.resources.binding_table.as_ref()
    }

    pub fn bindings(&self) -> Option<&PathTracingBindings> {
        self.resources.bindings.as_ref()
    }

    pub fn dispatcher(&self) -> Option<&FrameDispatcher> {
        self.resources.dispatcher.as_ref()
    }

    /// Applies input and renders one frame.
    pub fn update<P>(
        &mut self,
        movement: Movement,
        dt: f32,
        presenter: &mut P,
    ) -> Result<FrameReport, FrameError>
    where
        P: Presenter + ?Sized,
    {
        self.camera.advance(movement, dt);
        self.render_frame(presenter)
    }

    /// Traces one frame and presents it.
    pub fn render_frame<P>(&mut self, presenter: &mut P) -> Result<FrameReport, FrameError>
    where
        P: Presenter + ?Sized,
    {
        let resources = &mut self.resources;

        match (
            resources.dispatcher.as_mut(),
            resources.program.as_ref(),
            resources.bindings.as_ref(),
            resources.binding_table.as_ref(),
        ) {
            (Some(dispatcher), Some(program), Some(bindings), Some(binding_table)) => {
                let programs = FramePrograms {
                    pipeline: &program.pipeline,
                    layout: &program.layout,
                    bindings,
                    binding_table: &binding_table.table,
                };
                dispatcher.render(&self.device, &programs, &mut self.camera, presenter)
            }
            _ => Err(FrameError::InvalidPhase { frame: 0 }),
        }
    }

    /// Waits for the device and releases all resources in reverse creation order.
    pub fn shutdown(mut self) -> D {
        if let Err(err) = self.device.wait_idle() {
            tracing::error!("Failed to wait for device idle on shutdown: {}", err);
        }
        self.resources.release(&self.device);
        tracing::info!("Path tracer shut down");
        self.device
    }
}

fn prepare_resources<D, P>(
    device: &D,
    config: &RenderConfig,
    scene: &Scene,
    geometry: &PackedGeometry,
    programs: &PathTracingPrograms,
    presenter: &P,
    resources: &mut Resources,
) -> Result<(), PrepareError>
where
    D: Device + ?Sized,
    P: Presenter + ?Sized,
{
    let uploaded = geometry
        .upload(device)
        .map_err(|source| PrepareError::Upload {
            what: "geometry records",
            source,
        })?;
    let records = uploaded.records.clone();
    let transforms = uploaded.transforms.clone();
    resources.geometry = Some(uploaded);

    resources.bottom = build_bottom_level(device, geometry, transforms.as_ref())?;
    resources.top = build_top_level(device, &resources.bottom)?;

    let lights = LightTable::new(&config.lights).ok_or(ConfigError::TooManyLights {
        count: config.lights.len(),
        max: MAX_LIGHTS,
    })?;

    let dispatcher = FrameDispatcher::new(device, config, lights.len(), presenter.format())?;
    let output = dispatcher.output().clone();
    let frame_uniforms = dispatcher.uniforms().buffer().clone();
    resources.dispatcher = Some(dispatcher);

    let light_buffer = lights
        .upload(device)
        .map_err(|source| PrepareError::Upload {
            what: "lights",
            source,
        })?;
    resources.lights = Some(light_buffer.clone());

    let texture_count = scene.textures.len() as u32;
    let bindings = PathTracingBindings::new(device, texture_count)?;
    resources.bindings = Some(bindings.clone());

    let program = compile_pipeline(device, programs, &bindings.layout)?;
    resources.program = Some(program.clone());

    resources.binding_table = Some(build_binding_table(device, &program)?);

    bindings.write_all(
        device,
        &BoundResources {
            top_level: &resources.top,
            output: &output,
            frame_uniforms: &frame_uniforms,
            lights: &light_buffer,
            primitives: &records,
            textures: &scene.textures,
        },
    );

    Ok(())
}
