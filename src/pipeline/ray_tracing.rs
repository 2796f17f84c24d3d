use crate::{buffer::StridedBufferRegion, pipeline::PipelineLayout, shader::Shader};

/// Everything needed to compile a ray-tracing pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RayTracingPipelineInfo {
    pub shaders: Vec<Shader>,

    /// Group order defines group indices used by the binding table.
    pub groups: Vec<RayTracingShaderGroupInfo>,

    /// Must not exceed `DeviceProperties::max_ray_recursion_depth`.
    pub max_recursion_depth: u32,

    pub layout: PipelineLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
/// Shader group. Values are indices into [`RayTracingPipelineInfo::shaders`].
pub enum RayTracingShaderGroupInfo {
    Raygen { raygen: u32 },
    Miss { miss: u32 },
    Triangles {
        any_hit: Option<u32>,
        closest_hit: Option<u32>,
    },
}

/// Handle to a ray-tracing pipeline created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RayTracingPipeline {
    info: RayTracingPipelineInfo,
    index: usize,
}

impl RayTracingPipeline {
    pub fn new(info: RayTracingPipelineInfo, index: usize) -> Self {
        RayTracingPipeline { info, index }
    }

    pub fn info(&self) -> &RayTracingPipelineInfo {
        &self.info
    }

    pub fn layout(&self) -> &PipelineLayout {
        &self.info.layout
    }

    pub fn group_count(&self) -> u32 {
        self.info.groups.len() as u32
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Regions of a buffer holding shader group records, one per stage kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShaderBindingTable {
    pub raygen: Option<StridedBufferRegion>,
    pub miss: Option<StridedBufferRegion>,
    pub hit: Option<StridedBufferRegion>,
    pub callable: Option<StridedBufferRegion>,
}
