use std::path::PathBuf;

use crate::{
    image::Extent2d,
    lights::{Light, MAX_LIGHTS},
};

/// Configuration of the tracer. Fixed at startup.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-1",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct RenderConfig {
    /// Initial viewport size.
    pub extent: Extent2d,

    /// Maximum number of bounces traced by ray generation.
    pub recursive_depth: u32,

    /// Stratification factor. Each frame traces `sample_dimension²` samples per pixel.
    pub sample_dimension: u32,

    pub enable_direct_lighting: bool,

    /// Snapshot is written every `output_interval` frames.
    pub output_interval: u32,

    /// Directory snapshots are written to.
    pub output_dir: PathBuf,

    pub lights: Vec<Light>,

    pub camera: CameraConfig,
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            extent: Extent2d {
                width: 1280,
                height: 720,
            },
            recursive_depth: 10,
            sample_dimension: 2,
            enable_direct_lighting: true,
            output_interval: 2500,
            output_dir: PathBuf::from("."),
            lights: vec![Light::default()],
            camera: CameraConfig::default(),
        }
    }
}

impl RenderConfig {
    /// Samples per pixel traced each frame.
    pub fn sample_count(&self) -> u32 {
        self.sample_dimension.saturating_mul(self.sample_dimension)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.extent.is_empty() {
            return Err(ConfigError::EmptyViewport {
                width: self.extent.width,
                height: self.extent.height,
            });
        }

        if self.recursive_depth == 0 {
            return Err(ConfigError::ZeroRecursionDepth);
        }

        if self.sample_dimension == 0 {
            return Err(ConfigError::ZeroSampleDimension);
        }

        if self.output_interval == 0 {
            return Err(ConfigError::ZeroOutputInterval);
        }

        if self.lights.len() > MAX_LIGHTS {
            return Err(ConfigError::TooManyLights {
                count: self.lights.len(),
                max: MAX_LIGHTS,
            });
        }

        self.camera.validate()
    }
}

/// Initial placement and projection of the first-person camera.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde-1",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct CameraConfig {
    pub position: [f32; 3],

    /// Euler angles in degrees.
    pub rotation: [f32; 3],

    /// Vertical field of view in degrees.
    pub fov: f32,
    pub near: f32,
    pub far: f32,

    /// Units per second.
    pub movement_speed: f32,

    /// Degrees per pixel of cursor movement.
    pub rotation_speed: f32,

    pub flip_y: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig {
            position: [-0.5, 5.0, 3.5],
            rotation: [-15.0, 120.0, 0.0],
            fov: 60.0,
            near: 0.1,
            far: 512.0,
            movement_speed: 3.0,
            rotation_speed: 0.25,
            flip_y: true,
        }
    }
}

impl CameraConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let valid = self.fov > 0.0
            && self.fov < 180.0
            && self.near > 0.0
            && self.far > self.near;

        if !valid {
            return Err(ConfigError::InvalidProjection {
                fov: self.fov,
                near: self.near,
                far: self.far,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Viewport {width}x{height} is empty")]
    EmptyViewport { width: u32, height: u32 },

    #[error("Recursion depth must be at least 1")]
    ZeroRecursionDepth,

    #[error("Sample dimension must be at least 1")]
    ZeroSampleDimension,

    #[error("Output interval must be at least 1")]
    ZeroOutputInterval,

    #[error("{count} lights configured, at most {max} supported")]
    TooManyLights { count: usize, max: usize },

    #[error("Invalid projection: fov {fov}, near {near}, far {far}")]
    InvalidProjection { fov: f32, near: f32, far: f32 },
}
