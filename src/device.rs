use crate::{
    accel::{
        AccelerationStructure, AccelerationStructureBuildFlags,
        AccelerationStructureBuildSizesInfo, AccelerationStructureGeometryInfo,
        AccelerationStructureInfo, AccelerationStructureLevel,
    },
    buffer::{Buffer, BufferInfo},
    descriptor::{
        DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutInfo, DescriptorsAllocationError,
        WriteDescriptorSet,
    },
    encode::Command,
    image::{Image, ImageInfo, SubresourceLayout},
    memory::MemoryUsage,
    pipeline::{PipelineLayout, PipelineLayoutInfo, RayTracingPipeline, RayTracingPipelineInfo},
    sampler::{Sampler, SamplerInfo},
    shader::{CreateShaderModuleError, ShaderModule, ShaderModuleInfo},
    DeviceLost, MapError, OutOfMemory,
};

/// Ray-tracing limits reported by the device.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceProperties {
    /// Size of one shader group handle in bytes.
    pub shader_group_handle_size: u32,

    /// Required alignment of each record in a binding table.
    pub shader_group_handle_alignment: u32,

    /// Required alignment of each binding table region base address.
    pub shader_group_base_alignment: u32,

    pub max_ray_recursion_depth: u32,

    /// Largest array a variable-count sampled image binding may hold.
    pub max_variable_descriptor_count: u32,
}

/// Ticket for submitted work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Submission(u64);

impl Submission {
    pub fn new(epoch: u64) -> Self {
        Submission(epoch)
    }

    pub fn epoch(&self) -> u64 {
        self.0
    }
}

#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceError {
    #[error(transparent)]
    OutOfMemory {
        #[from]
        source: OutOfMemory,
    },

    #[error(transparent)]
    DeviceLost {
        #[from]
        source: DeviceLost,
    },

    #[error("Feature `{feature}` is not supported by the device")]
    Unsupported { feature: &'static str },

    #[error("Operation failed with device result `{result}`")]
    Failed { result: String },
}

/// Logical device the tracer runs on.
///
/// All functions are callable through shared reference.
/// Implementations synchronize internally.
pub trait Device {
    fn properties(&self) -> &DeviceProperties;

    fn create_buffer(&self, info: BufferInfo, memory: MemoryUsage) -> Result<Buffer, OutOfMemory>;

    /// Creates host-visible buffer initialized with `data`.
    fn create_buffer_static(&self, info: BufferInfo, data: &[u8]) -> Result<Buffer, OutOfMemory>;

    /// Writes `data` into host-visible buffer at `offset`.
    fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), MapError>;

    fn destroy_buffer(&self, buffer: Buffer);

    fn create_image(&self, info: ImageInfo) -> Result<Image, OutOfMemory>;

    fn destroy_image(&self, image: Image);

    /// Layout of linear image texels in its memory.
    fn image_subresource_layout(&self, image: &Image) -> SubresourceLayout;

    /// Maps memory of linear host-visible image and passes its bytes to `f`.
    fn read_image(&self, image: &Image, f: &mut dyn FnMut(&[u8])) -> Result<(), MapError>;

    fn create_sampler(&self, info: SamplerInfo) -> Result<Sampler, OutOfMemory>;

    fn destroy_sampler(&self, sampler: Sampler);

    /// Returns sizes required to build structure of `level` with given geometries.
    fn get_acceleration_structure_build_sizes(
        &self,
        level: AccelerationStructureLevel,
        flags: AccelerationStructureBuildFlags,
        geometry: &[AccelerationStructureGeometryInfo],
    ) -> Result<AccelerationStructureBuildSizesInfo, DeviceError>;

    fn create_acceleration_structure(
        &self,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory>;

    /// Destroys structure. Backing buffer is not destroyed.
    fn destroy_acceleration_structure(&self, accel: AccelerationStructure);

    fn create_shader_module(
        &self,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError>;

    fn destroy_shader_module(&self, module: ShaderModule);

    fn create_descriptor_set_layout(
        &self,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory>;

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout);

    fn create_pipeline_layout(&self, info: PipelineLayoutInfo)
        -> Result<PipelineLayout, OutOfMemory>;

    fn destroy_pipeline_layout(&self, layout: PipelineLayout);

    fn create_ray_tracing_pipeline(
        &self,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, DeviceError>;

    fn destroy_ray_tracing_pipeline(&self, pipeline: RayTracingPipeline);

    /// Returns opaque handles of `group_count` groups starting from `first_group`,
    /// packed tightly with `shader_group_handle_size` bytes each.
    fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, DeviceError>;

    /// Allocates set for `layout`.
    /// `variable_count` sizes the binding with `VARIABLE_DESCRIPTOR_COUNT` flag, if any.
    fn create_descriptor_set(
        &self,
        layout: &DescriptorSetLayout,
        variable_count: u32,
    ) -> Result<DescriptorSet, DescriptorsAllocationError>;

    fn destroy_descriptor_set(&self, set: DescriptorSet);

    fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet<'_>]);

    /// Submits commands to the single execution queue.
    fn submit(&self, commands: Vec<Command>) -> Result<Submission, DeviceError>;

    /// Blocks until submission completes.
    fn wait(&self, submission: Submission) -> Result<(), DeviceError>;

    fn wait_idle(&self) -> Result<(), DeviceError>;
}
