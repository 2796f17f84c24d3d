mod presenter;
mod scene;

use std::path::{Path, PathBuf};

use summit::{
    backend::{Graphics, VulkanDevice},
    Movement, PathTracer, PathTracingPrograms, RenderConfig, ShaderModuleInfo,
};
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

use self::{presenter::HeadlessPresenter, scene::DemoScene};

#[derive(Debug, serde::Deserialize)]
#[serde(default)]
struct DemoConfig {
    /// Number of frames to render before exiting.
    frames: u32,

    /// Directory with compiled SPIR-V programs.
    shaders: PathBuf,

    render: RenderConfig,
}

impl Default for DemoConfig {
    fn default() -> Self {
        let render = RenderConfig::default();
        DemoConfig {
            frames: render.output_interval * 2,
            shaders: PathBuf::from("shaders"),
            render,
        }
    }
}

fn load_config(path: Option<&Path>) -> eyre::Result<DemoConfig> {
    match path {
        None => Ok(DemoConfig::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            let config = toml::from_str(&text)?;
            tracing::info!("Config loaded from `{}`", path.display());
            Ok(config)
        }
    }
}

fn load_programs(dir: &Path) -> eyre::Result<PathTracingPrograms> {
    let load = |name: &str| -> eyre::Result<ShaderModuleInfo> {
        let path = dir.join(name);
        let code = std::fs::read(&path)
            .map_err(|err| eyre::eyre!("Failed to read `{}`: {}", path.display(), err))?;
        Ok(ShaderModuleInfo::spirv(code))
    };

    Ok(PathTracingPrograms {
        raygen: load("raygen.rgen.spv")?,
        miss: load("miss.rmiss.spv")?,
        shadow_miss: load("shadow.rmiss.spv")?,
        closest_hit: load("closesthit.rchit.spv")?,
        any_hit: load("anyhit.rahit.spv")?,
        shadow_closest_hit: load("shadow.rchit.spv")?,
    })
}

fn create_device() -> eyre::Result<VulkanDevice> {
    let graphics = Graphics::get_or_init()?;

    let physical = graphics
        .devices()?
        .into_iter()
        .filter(|physical| match physical.check_support() {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Skipping `{}`: {}", physical.name(), err);
                false
            }
        })
        .max_by_key(|physical| physical.is_discrete())
        .ok_or_else(|| eyre::eyre!("No device supports hardware ray tracing"))?;

    Ok(physical.create_device()?)
}

fn render(
    tracer: &mut PathTracer<VulkanDevice>,
    presenter: &mut HeadlessPresenter,
    frames: u32,
) -> eyre::Result<()> {
    let dt = 1.0 / 60.0;

    for _ in 0..frames {
        let report = tracer.update(Movement::default(), dt, presenter)?;
        if let Some(snapshot) = &report.snapshot {
            tracing::info!(
                "Frame {}: {} samples per pixel, snapshot `{}`",
                report.frame,
                report.samples,
                snapshot.display()
            );
        }
    }

    Ok(())
}

fn main() -> eyre::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    color_eyre::install()?;

    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = load_config(config_path.as_deref())?;
    config.render.validate()?;

    let programs = load_programs(&config.shaders)?;
    let device = create_device()?;

    let scene = DemoScene::build(&device)?;
    let mut presenter = match HeadlessPresenter::new(&device, config.render.extent) {
        Ok(presenter) => presenter,
        Err(err) => {
            scene.destroy(&device);
            return Err(err.into());
        }
    };

    // Tracer takes the device. It is handed back by `shutdown`,
    // or dropped with the error when preparation fails.
    let mut tracer = PathTracer::prepare(
        device,
        config.render.clone(),
        &scene.scene,
        &programs,
        &presenter,
    )?;

    let result = render(&mut tracer, &mut presenter, config.frames);

    let device = tracer.shutdown();
    presenter.destroy(&device);
    scene.destroy(&device);
    drop(device);

    result
}
