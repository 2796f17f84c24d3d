mod layout;

pub use self::layout::*;

use crate::{
    accel::AccelerationStructure, buffer::BufferRegion, image::Image, image::Layout,
    sampler::Sampler, OutOfMemory,
};

/// Failure to carve a descriptor set out of the device pool.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub enum DescriptorsAllocationError {
    /// Device memory ran out while growing the pool.
    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    /// Every pool slot is taken or the free space is scattered.
    #[error("Failed to allocate descriptors due to fragmentation")]
    Fragmentation,

    /// Requested variable count exceeds count declared by layout.
    #[error("Variable descriptor count {count} exceeds layout bound {max}")]
    VariableCountTooLarge { count: u32, max: u32 },
}

/// Handle to a descriptor set created by a [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DescriptorSet {
    layout: DescriptorSetLayout,
    variable_count: u32,
    index: usize,
}

impl DescriptorSet {
    pub fn new(layout: DescriptorSetLayout, variable_count: u32, index: usize) -> Self {
        DescriptorSet {
            layout,
            variable_count,
            index,
        }
    }

    pub fn layout(&self) -> &DescriptorSetLayout {
        &self.layout
    }

    /// Number of descriptors allocated for the variable-count binding.
    pub fn variable_count(&self) -> u32 {
        self.variable_count
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// Writes descriptors into one binding of a set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WriteDescriptorSet<'a> {
    /// Set receiving the descriptors.
    pub set: &'a DescriptorSet,

    /// Slot inside the set layout.
    pub binding: u32,

    /// Array offset of the first written descriptor.
    /// Zero unless the binding is a texture array.
    pub element: u32,

    pub descriptors: Descriptors<'a>,
}

/// Image bound for storage access.
/// Shaders see it in `layout`, so a barrier must have moved it there first.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageDescriptor {
    pub image: Image,
    pub layout: Layout,
}

/// Sampled texture as closest-hit programs read it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CombinedImageSampler {
    pub image: Image,
    pub layout: Layout,
    pub sampler: Sampler,
}

/// Typed slice of descriptors for one [`WriteDescriptorSet`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Descriptors<'a> {
    CombinedImageSampler(&'a [CombinedImageSampler]),

    /// Accumulation and output targets.
    StorageImage(&'a [ImageDescriptor]),

    UniformBuffer(&'a [BufferRegion]),

    /// Geometry and material records.
    StorageBuffer(&'a [BufferRegion]),

    /// Top-level structures for ray queries.
    AccelerationStructure(&'a [AccelerationStructure]),
}

impl Descriptors<'_> {
    pub fn len(&self) -> usize {
        match self {
            Descriptors::CombinedImageSampler(slice) => slice.len(),
            Descriptors::StorageImage(slice) => slice.len(),
            Descriptors::UniformBuffer(slice) => slice.len(),
            Descriptors::StorageBuffer(slice) => slice.len(),
            Descriptors::AccelerationStructure(slice) => slice.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ty(&self) -> DescriptorType {
        match self {
            Descriptors::CombinedImageSampler(_) => DescriptorType::CombinedImageSampler,
            Descriptors::StorageImage(_) => DescriptorType::StorageImage,
            Descriptors::UniformBuffer(_) => DescriptorType::UniformBuffer,
            Descriptors::StorageBuffer(_) => DescriptorType::StorageBuffer,
            Descriptors::AccelerationStructure(_) => DescriptorType::AccelerationStructure,
        }
    }
}
