mod ray_tracing;

pub use self::ray_tracing::*;

use crate::{descriptor::DescriptorSetLayout, shader::ShaderStageFlags};

/// Push constant range. The path tracer declares none, but layouts accept them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct PushConstant {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct PipelineLayoutInfo {
    /// Set layouts in set-number order.
    pub sets: Vec<DescriptorSetLayout>,
    pub push_constants: Vec<PushConstant>,
}

/// Handle to a pipeline layout created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineLayout {
    info: PipelineLayoutInfo,
    index: usize,
}

impl PipelineLayout {
    pub fn new(info: PipelineLayoutInfo, index: usize) -> Self {
        PipelineLayout { info, index }
    }

    pub fn info(&self) -> &PipelineLayoutInfo {
        &self.info
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
