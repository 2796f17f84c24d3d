use {
    super::unexpected_result,
    crate::{
        out_of_host_memory, AccelerationStructureBuildFlags, AccelerationStructureLevel,
        BufferUsage, DescriptorBindingFlags, DescriptorType, DeviceError, DeviceLost, Extent3d,
        Filter, Format, GeometryFlags, ImageUsage, IndexType, Layout, MapError, MemoryUsage,
        MipmapMode, Offset3d, OutOfMemory, SamplerAddressMode, ShaderStage, ShaderStageFlags,
    },
    ash::vk,
};

pub(crate) trait ToAsh<T> {
    fn to_ash(self) -> T;
}

impl ToAsh<vk::Format> for Format {
    fn to_ash(self) -> vk::Format {
        match self {
            Format::RGBA8Unorm => vk::Format::R8G8B8A8_UNORM,
            Format::RGBA8Srgb => vk::Format::R8G8B8A8_SRGB,
            Format::BGRA8Unorm => vk::Format::B8G8R8A8_UNORM,
            Format::BGRA8Snorm => vk::Format::B8G8R8A8_SNORM,
            Format::BGRA8Srgb => vk::Format::B8G8R8A8_SRGB,
            Format::RGB32Sfloat => vk::Format::R32G32B32_SFLOAT,
            Format::RGBA32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
        }
    }
}

impl ToAsh<vk::BufferUsageFlags> for BufferUsage {
    fn to_ash(self) -> vk::BufferUsageFlags {
        let mut result = vk::BufferUsageFlags::empty();

        if self.contains(BufferUsage::TRANSFER_SRC) {
            result |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(BufferUsage::TRANSFER_DST) {
            result |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(BufferUsage::UNIFORM) {
            result |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        if self.contains(BufferUsage::STORAGE) {
            result |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(BufferUsage::ACCELERATION_STRUCTURE_BUILD_INPUT) {
            result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        }
        if self.contains(BufferUsage::ACCELERATION_STRUCTURE_STORAGE) {
            result |= vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR;
        }
        if self.contains(BufferUsage::SHADER_BINDING_TABLE) {
            result |= vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR;
        }
        if self.contains(BufferUsage::DEVICE_ADDRESS) {
            result |= vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS;
        }
        result
    }
}

impl ToAsh<vk::ImageUsageFlags> for ImageUsage {
    fn to_ash(self) -> vk::ImageUsageFlags {
        let mut result = vk::ImageUsageFlags::empty();

        if self.contains(ImageUsage::TRANSFER_SRC) {
            result |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(ImageUsage::TRANSFER_DST) {
            result |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        if self.contains(ImageUsage::SAMPLED) {
            result |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(ImageUsage::STORAGE) {
            result |= vk::ImageUsageFlags::STORAGE;
        }
        result
    }
}

impl ToAsh<vk::ImageLayout> for Option<Layout> {
    fn to_ash(self) -> vk::ImageLayout {
        match self {
            None => vk::ImageLayout::UNDEFINED,
            Some(layout) => layout.to_ash(),
        }
    }
}

impl ToAsh<vk::ImageLayout> for Layout {
    fn to_ash(self) -> vk::ImageLayout {
        match self {
            Layout::General => vk::ImageLayout::GENERAL,
            Layout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            Layout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            Layout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            Layout::Present => vk::ImageLayout::PRESENT_SRC_KHR,
        }
    }
}

impl ToAsh<vk::Extent3D> for Extent3d {
    fn to_ash(self) -> vk::Extent3D {
        vk::Extent3D {
            width: self.width,
            height: self.height,
            depth: self.depth,
        }
    }
}

impl ToAsh<vk::Offset3D> for Offset3d {
    fn to_ash(self) -> vk::Offset3D {
        vk::Offset3D {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

impl ToAsh<vk::Filter> for Filter {
    fn to_ash(self) -> vk::Filter {
        match self {
            Filter::Nearest => vk::Filter::NEAREST,
            Filter::Linear => vk::Filter::LINEAR,
        }
    }
}

impl ToAsh<vk::SamplerMipmapMode> for MipmapMode {
    fn to_ash(self) -> vk::SamplerMipmapMode {
        match self {
            MipmapMode::Nearest => vk::SamplerMipmapMode::NEAREST,
            MipmapMode::Linear => vk::SamplerMipmapMode::LINEAR,
        }
    }
}

impl ToAsh<vk::SamplerAddressMode> for SamplerAddressMode {
    fn to_ash(self) -> vk::SamplerAddressMode {
        match self {
            SamplerAddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
            SamplerAddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        }
    }
}

impl ToAsh<vk::ShaderStageFlags> for ShaderStageFlags {
    fn to_ash(self) -> vk::ShaderStageFlags {
        // Bits are laid out as in Vulkan.
        vk::ShaderStageFlags::from_raw(self.bits())
    }
}

impl ToAsh<vk::ShaderStageFlags> for ShaderStage {
    fn to_ash(self) -> vk::ShaderStageFlags {
        ShaderStageFlags::from(self).to_ash()
    }
}

impl ToAsh<vk::DescriptorType> for DescriptorType {
    fn to_ash(self) -> vk::DescriptorType {
        match self {
            DescriptorType::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            DescriptorType::StorageImage => vk::DescriptorType::STORAGE_IMAGE,
            DescriptorType::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            DescriptorType::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
            DescriptorType::AccelerationStructure => {
                vk::DescriptorType::ACCELERATION_STRUCTURE_KHR
            }
        }
    }
}

impl ToAsh<vk::DescriptorBindingFlags> for DescriptorBindingFlags {
    fn to_ash(self) -> vk::DescriptorBindingFlags {
        vk::DescriptorBindingFlags::from_raw(self.bits())
    }
}

impl ToAsh<vk::AccelerationStructureTypeKHR> for AccelerationStructureLevel {
    fn to_ash(self) -> vk::AccelerationStructureTypeKHR {
        match self {
            AccelerationStructureLevel::Bottom => vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
            AccelerationStructureLevel::Top => vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        }
    }
}

impl ToAsh<vk::BuildAccelerationStructureFlagsKHR> for AccelerationStructureBuildFlags {
    fn to_ash(self) -> vk::BuildAccelerationStructureFlagsKHR {
        vk::BuildAccelerationStructureFlagsKHR::from_raw(self.bits())
    }
}

impl ToAsh<vk::GeometryFlagsKHR> for GeometryFlags {
    fn to_ash(self) -> vk::GeometryFlagsKHR {
        vk::GeometryFlagsKHR::from_raw(self.bits())
    }
}

impl ToAsh<vk::IndexType> for IndexType {
    fn to_ash(self) -> vk::IndexType {
        match self {
            IndexType::U16 => vk::IndexType::UINT16,
            IndexType::U32 => vk::IndexType::UINT32,
        }
    }
}

impl ToAsh<vk::IndexType> for Option<IndexType> {
    fn to_ash(self) -> vk::IndexType {
        match self {
            None => vk::IndexType::NONE_KHR,
            Some(index_type) => index_type.to_ash(),
        }
    }
}

pub(crate) fn oom_error_from_ash(err: vk::Result) -> OutOfMemory {
    match err {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => out_of_host_memory(),
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => OutOfMemory,
        _ => unexpected_result(err),
    }
}

pub(crate) fn device_error_from_ash(err: vk::Result) -> DeviceError {
    match err {
        vk::Result::ERROR_OUT_OF_HOST_MEMORY => out_of_host_memory(),
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfMemory {
            source: OutOfMemory,
        },
        vk::Result::ERROR_DEVICE_LOST => DeviceError::DeviceLost { source: DeviceLost },
        _ => DeviceError::Failed {
            result: err.to_string(),
        },
    }
}

pub(crate) fn map_error_from_gpu_alloc(err: gpu_alloc::MapError) -> MapError {
    match err {
        gpu_alloc::MapError::OutOfDeviceMemory => MapError::OutOfMemory {
            source: OutOfMemory,
        },
        gpu_alloc::MapError::OutOfHostMemory => out_of_host_memory(),
        gpu_alloc::MapError::NonHostVisible => MapError::NonHostVisible,
        gpu_alloc::MapError::AlreadyMapped => MapError::AlreadyMapped,
        gpu_alloc::MapError::MapFailed => MapError::MapFailed,
    }
}

pub(crate) fn buffer_memory_usage_to_gpu_alloc(
    buffer_usage: BufferUsage,
    memory_usage: MemoryUsage,
) -> gpu_alloc::UsageFlags {
    use gpu_alloc::UsageFlags;

    let mut result = memory_usage_to_gpu_alloc(memory_usage);
    if buffer_usage.contains(BufferUsage::DEVICE_ADDRESS) {
        result |= UsageFlags::DEVICE_ADDRESS;
    }
    result
}

pub(crate) fn memory_usage_to_gpu_alloc(memory_usage: MemoryUsage) -> gpu_alloc::UsageFlags {
    use gpu_alloc::UsageFlags;

    let mut result = UsageFlags::empty();

    if memory_usage.is_host_visible() {
        result |= UsageFlags::HOST_ACCESS;
    }
    if memory_usage.contains(MemoryUsage::UPLOAD) {
        result |= UsageFlags::UPLOAD;
    }
    if memory_usage.contains(MemoryUsage::DOWNLOAD) {
        result |= UsageFlags::DOWNLOAD;
    }
    if memory_usage.contains(MemoryUsage::FAST_DEVICE_ACCESS) {
        result |= UsageFlags::FAST_DEVICE_ACCESS;
    }
    if memory_usage.contains(MemoryUsage::TRANSIENT) {
        result |= UsageFlags::TRANSIENT;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_stage_bits_match_vulkan() {
        assert_eq!(
            ShaderStageFlags::RAYGEN.to_ash(),
            vk::ShaderStageFlags::RAYGEN_KHR
        );
        assert_eq!(
            (ShaderStageFlags::CLOSEST_HIT | ShaderStageFlags::ANY_HIT | ShaderStageFlags::MISS)
                .to_ash(),
            vk::ShaderStageFlags::CLOSEST_HIT_KHR
                | vk::ShaderStageFlags::ANY_HIT_KHR
                | vk::ShaderStageFlags::MISS_KHR
        );
    }

    #[test]
    fn build_and_binding_flag_bits_match_vulkan() {
        assert_eq!(
            AccelerationStructureBuildFlags::PREFER_FAST_TRACE.to_ash(),
            vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE
        );
        assert_eq!(
            GeometryFlags::OPAQUE.to_ash(),
            vk::GeometryFlagsKHR::OPAQUE
        );
        assert_eq!(
            (DescriptorBindingFlags::PARTIALLY_BOUND
                | DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT)
                .to_ash(),
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT
        );
    }

    #[test]
    fn binding_table_buffers_get_device_address() {
        let usage = (BufferUsage::SHADER_BINDING_TABLE | BufferUsage::DEVICE_ADDRESS).to_ash();
        assert!(usage.contains(vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR));
        assert!(usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS));

        let flags = buffer_memory_usage_to_gpu_alloc(
            BufferUsage::DEVICE_ADDRESS,
            MemoryUsage::UPLOAD,
        );
        assert!(flags.contains(gpu_alloc::UsageFlags::DEVICE_ADDRESS));
        assert!(flags.contains(gpu_alloc::UsageFlags::HOST_ACCESS));
    }

    #[test]
    fn device_lost_is_reported() {
        assert_eq!(
            device_error_from_ash(vk::Result::ERROR_DEVICE_LOST),
            DeviceError::DeviceLost { source: DeviceLost }
        );
        assert!(matches!(
            device_error_from_ash(vk::Result::ERROR_INITIALIZATION_FAILED),
            DeviceError::Failed { .. }
        ));
    }
}
