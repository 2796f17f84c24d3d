use std::{fmt, path::PathBuf};

use crate::{
    accel::AccelerationStructureLevel, config::ConfigError, descriptor::DescriptorsAllocationError,
    device::DeviceError, shader::CreateShaderModuleError, shader::ShaderStage, MapError,
    OutOfMemory,
};

/// Step of acceleration structure construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuildStep {
    SizeQuery,
    Storage,
    Create,
    Scratch,
    Instances,
    Submit,
    Wait,
}

impl fmt::Display for BuildStep {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SizeQuery => fmt.write_str("build size query"),
            Self::Storage => fmt.write_str("storage allocation"),
            Self::Create => fmt.write_str("structure creation"),
            Self::Scratch => fmt.write_str("scratch allocation"),
            Self::Instances => fmt.write_str("instance upload"),
            Self::Submit => fmt.write_str("build submission"),
            Self::Wait => fmt.write_str("build completion"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{level:?} level {step} failed for {geometry_count} geometries")]
    Device {
        level: AccelerationStructureLevel,
        step: BuildStep,
        geometry_count: usize,
        #[source]
        source: DeviceError,
    },

    #[error("{level:?} level {step} of {size} bytes failed")]
    Allocation {
        level: AccelerationStructureLevel,
        step: BuildStep,
        size: u64,
        #[source]
        source: OutOfMemory,
    },

    #[error("Buffer for {level:?} level {step} has no device address")]
    MissingAddress {
        level: AccelerationStructureLevel,
        step: BuildStep,
    },

    #[error("Top level requires built bottom level structure")]
    BottomLevelNotBuilt,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to create {stage:?} shader module")]
    ShaderModule {
        stage: ShaderStage,
        #[source]
        source: CreateShaderModuleError,
    },

    #[error("Failed to create pipeline layout")]
    Layout {
        #[source]
        source: OutOfMemory,
    },

    #[error("Recursion depth {requested} exceeds device limit {supported}")]
    RecursionDepth { requested: u32, supported: u32 },

    #[error("Failed to compile ray tracing pipeline with {group_count} groups")]
    Compile {
        group_count: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to query handles of {group_count} shader groups")]
    HandleQuery {
        group_count: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Device returned {handle_bytes} bytes of group handles, {group_count} groups of {handle_size} bytes declared")]
    InsufficientHandles {
        group_count: u32,
        handle_size: u32,
        handle_bytes: usize,
    },

    #[error("Invalid shader group limits: handle size {handle_size}, handle alignment {handle_alignment}, base alignment {base_alignment}")]
    InvalidLimits {
        handle_size: u32,
        handle_alignment: u32,
        base_alignment: u32,
    },

    #[error("Failed to allocate {size} bytes for shader binding table")]
    BindingTable {
        size: u64,
        #[source]
        source: OutOfMemory,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum BindingError {
    #[error("Scene has {count} textures, device supports at most {max} in variable binding")]
    TooManyTextures { count: u32, max: u32 },

    #[error("Failed to create descriptor set layout")]
    Layout {
        #[source]
        source: OutOfMemory,
    },

    #[error("Failed to allocate descriptor set with {variable_count} textures")]
    Allocation {
        variable_count: u32,
        #[source]
        source: DescriptorsAllocationError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Failed to write snapshot `{}`", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to map staging image")]
    Map {
        #[from]
        source: MapError,
    },

    #[error("Staging image holds {available} bytes, {required} required for {width}x{height} snapshot")]
    Truncated {
        width: u32,
        height: u32,
        required: u64,
        available: u64,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Failed to create {what} for {width}x{height} viewport")]
    Target {
        what: &'static str,
        width: u32,
        height: u32,
        #[source]
        source: OutOfMemory,
    },

    #[error("Failed to publish frame uniforms")]
    Uniforms {
        #[source]
        source: MapError,
    },

    #[error("Failed to acquire presentation image for frame {frame}")]
    Acquire {
        frame: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to present frame {frame}")]
    Present {
        frame: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Failed to submit frame {frame}")]
    Submit {
        frame: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Failed waiting for frame {frame}")]
    Wait {
        frame: u32,
        #[source]
        source: DeviceError,
    },

    #[error("Frame {frame} started while previous one was left recording")]
    InvalidPhase { frame: u32 },

    #[error(transparent)]
    Snapshot {
        #[from]
        source: SnapshotError,
    },
}

/// Error raised while preparing tracer resources.
/// Preparation never partially succeeds.
#[derive(Debug, thiserror::Error)]
pub enum PrepareError {
    #[error(transparent)]
    Config {
        #[from]
        source: ConfigError,
    },

    #[error("Failed to upload {what}")]
    Upload {
        what: &'static str,
        #[source]
        source: OutOfMemory,
    },

    #[error(transparent)]
    Build {
        #[from]
        source: BuildError,
    },

    #[error(transparent)]
    Pipeline {
        #[from]
        source: PipelineError,
    },

    #[error(transparent)]
    Binding {
        #[from]
        source: BindingError,
    },

    #[error(transparent)]
    Frame {
        #[from]
        source: FrameError,
    },
}
