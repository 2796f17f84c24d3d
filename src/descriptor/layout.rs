use crate::shader::ShaderStageFlags;

bitflags::bitflags! {
    /// Per-binding options. Bit values match Vulkan 1.2.
    #[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
    pub struct DescriptorBindingFlags: u32 {
        /// Elements the shaders never index may stay unwritten.
        const PARTIALLY_BOUND = 0x00000004;

        /// Array length is picked when the set is created and `count` is only
        /// an upper bound. Texture tables use this, so it must be the last binding.
        const VARIABLE_DESCRIPTOR_COUNT = 0x00000008;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutInfo {
    /// Binding numbers must be unique.
    pub bindings: Vec<DescriptorSetLayoutBinding>,
}

impl DescriptorSetLayoutInfo {
    /// The binding sized on set creation, if any.
    pub fn variable_binding(&self) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings.iter().find(|binding| {
            binding
                .flags
                .contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
        })
    }

    pub fn binding(&self, index: u32) -> Option<&DescriptorSetLayoutBinding> {
        self.bindings.iter().find(|binding| binding.binding == index)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DescriptorSetLayoutBinding {
    pub binding: u32,
    pub ty: DescriptorType,

    /// Array length, or its upper bound for variable-count bindings.
    pub count: u32,
    pub stages: ShaderStageFlags,
    pub flags: DescriptorBindingFlags,
}

/// Descriptor kinds path-tracing programs bind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorType {
    /// Material textures.
    CombinedImageSampler,

    /// Accumulation output written by ray generation.
    StorageImage,

    /// Per-frame uniforms.
    UniformBuffer,

    /// Light block and primitive records.
    StorageBuffer,

    /// Top-level structure rays are traced against.
    AccelerationStructure,
}

/// Handle to a descriptor set layout created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayout {
    info: DescriptorSetLayoutInfo,
    index: usize,
}

impl DescriptorSetLayout {
    pub fn new(info: DescriptorSetLayoutInfo, index: usize) -> Self {
        DescriptorSetLayout { info, index }
    }

    pub fn info(&self) -> &DescriptorSetLayoutInfo {
        &self.info
    }

    pub fn index(&self) -> usize {
        self.index
    }
}
