use {
    super::{
        convert::{
            buffer_memory_usage_to_gpu_alloc, device_error_from_ash, map_error_from_gpu_alloc,
            memory_usage_to_gpu_alloc, oom_error_from_ash, ToAsh as _,
        },
        graphics::Graphics,
        invalid_handle, null_device_address,
        physical::Properties,
        submissions::{Slot, Submissions},
        unexpected_result,
    },
    crate::{
        out_of_host_memory, AccelerationStructure, AccelerationStructureBuildFlags,
        AccelerationStructureBuildSizesInfo, AccelerationStructureGeometryInfo,
        AccelerationStructureInfo, AccelerationStructureLevel, Buffer, BufferInfo,
        BufferUsage, Command, CreateShaderModuleError, DescriptorSet, DescriptorSetLayout,
        DescriptorSetLayoutInfo, Descriptors, DescriptorsAllocationError, Device, DeviceAddress,
        DeviceError, DeviceProperties, Image, ImageInfo, ImageTiling, ImageUsage, MapError,
        MemoryUsage, OutOfMemory, PipelineLayout, PipelineLayoutInfo, RayTracingPipeline,
        RayTracingPipelineInfo, RayTracingShaderGroupInfo, Sampler, SamplerInfo, ShaderModule,
        ShaderModuleInfo, SubresourceLayout, Submission, WriteDescriptorSet,
    },
    ash::vk,
    gpu_alloc::{GpuAllocator, MemoryBlock, Request},
    gpu_alloc_ash::AshMemoryDevice,
    parking_lot::Mutex,
    slab::Slab,
    smallvec::SmallVec,
    std::{
        ffi::CString,
        fmt::{self, Debug},
    },
};

/// Upper bound of sets allocated from the descriptor pool.
const MAX_DESCRIPTOR_SETS: u32 = 16;

pub(super) struct BufferEntry {
    pub handle: vk::Buffer,
    block: MemoryBlock<vk::DeviceMemory>,
}

pub(super) struct ImageEntry {
    pub handle: vk::Image,

    /// Null for images without sampled or storage usage.
    pub view: vk::ImageView,
    block: MemoryBlock<vk::DeviceMemory>,
    layout: SubresourceLayout,
}

struct Queue {
    handle: vk::Queue,
    pool: vk::CommandPool,
    submissions: Submissions,
}

/// [`Device`] implementation over a Vulkan logical device
/// with ray-tracing extensions enabled.
pub struct VulkanDevice {
    pub(super) logical: ash::Device,
    pub(super) accel: ash::khr::acceleration_structure::Device,
    pub(super) rt: ash::khr::ray_tracing_pipeline::Device,
    physical: vk::PhysicalDevice,
    properties: DeviceProperties,
    allocator: Mutex<GpuAllocator<vk::DeviceMemory>>,
    queue: Mutex<Queue>,
    descriptor_pool: vk::DescriptorPool,

    pub(super) buffers: Mutex<Slab<BufferEntry>>,
    pub(super) images: Mutex<Slab<ImageEntry>>,
    pub(super) samplers: Mutex<Slab<vk::Sampler>>,
    pub(super) acceleration_structures: Mutex<Slab<vk::AccelerationStructureKHR>>,
    pub(super) shaders: Mutex<Slab<vk::ShaderModule>>,
    pub(super) descriptor_set_layouts: Mutex<Slab<vk::DescriptorSetLayout>>,
    pub(super) descriptor_sets: Mutex<Slab<vk::DescriptorSet>>,
    pub(super) pipeline_layouts: Mutex<Slab<vk::PipelineLayout>>,
    pub(super) pipelines: Mutex<Slab<vk::Pipeline>>,
}

impl Debug for VulkanDevice {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("VulkanDevice")
                .field("logical", &self.logical.handle())
                .field("physical", &self.physical)
                .field("properties", &self.properties)
                .finish()
        } else {
            Debug::fmt(&self.logical.handle(), fmt)
        }
    }
}

impl VulkanDevice {
    pub(super) fn new(
        graphics: &'static Graphics,
        logical: ash::Device,
        physical: vk::PhysicalDevice,
        properties: &Properties,
        family: u32,
    ) -> Result<Self, DeviceError> {
        let destroy_logical = |err| {
            unsafe { logical.destroy_device(None) }
            device_error_from_ash(err)
        };

        let allocator_properties = unsafe {
            gpu_alloc_ash::device_properties(
                &graphics.instance,
                graphics.version.min(vk::API_VERSION_1_2),
                physical,
            )
        }
        .map_err(destroy_logical)?;

        let pool = unsafe {
            logical.create_command_pool(
                &vk::CommandPoolCreateInfo::default()
                    .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
                    .queue_family_index(family),
                None,
            )
        }
        .map_err(destroy_logical)?;

        let device_properties = properties.device_properties();

        let pool_sizes = [
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_IMAGE,
                descriptor_count: MAX_DESCRIPTOR_SETS,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::UNIFORM_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::STORAGE_BUFFER,
                descriptor_count: MAX_DESCRIPTOR_SETS * 4,
            },
            vk::DescriptorPoolSize {
                ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                descriptor_count: device_properties.max_variable_descriptor_count.clamp(1, 4096),
            },
        ];

        let descriptor_pool = unsafe {
            logical.create_descriptor_pool(
                &vk::DescriptorPoolCreateInfo::default()
                    .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
                    .max_sets(MAX_DESCRIPTOR_SETS)
                    .pool_sizes(&pool_sizes),
                None,
            )
        };

        let descriptor_pool = match descriptor_pool {
            Ok(descriptor_pool) => descriptor_pool,
            Err(err) => {
                unsafe { logical.destroy_command_pool(pool, None) }
                return Err(destroy_logical(err));
            }
        };

        let queue = unsafe { logical.get_device_queue(family, 0) };

        let accel = ash::khr::acceleration_structure::Device::new(&graphics.instance, &logical);
        let rt = ash::khr::ray_tracing_pipeline::Device::new(&graphics.instance, &logical);

        tracing::info!(
            "Using device `{}`: handle size {}, max recursion depth {}",
            properties.name(),
            device_properties.shader_group_handle_size,
            device_properties.max_ray_recursion_depth,
        );

        Ok(VulkanDevice {
            logical,
            accel,
            rt,
            physical,
            properties: device_properties,
            allocator: Mutex::new(GpuAllocator::new(
                gpu_alloc::Config::i_am_prototyping(),
                allocator_properties,
            )),
            queue: Mutex::new(Queue {
                handle: queue,
                pool,
                submissions: Submissions::new(),
            }),
            descriptor_pool,
            buffers: Mutex::new(Slab::new()),
            images: Mutex::new(Slab::new()),
            samplers: Mutex::new(Slab::new()),
            acceleration_structures: Mutex::new(Slab::new()),
            shaders: Mutex::new(Slab::new()),
            descriptor_set_layouts: Mutex::new(Slab::new()),
            descriptor_sets: Mutex::new(Slab::new()),
            pipeline_layouts: Mutex::new(Slab::new()),
            pipelines: Mutex::new(Slab::new()),
        })
    }

    fn memory_device(&self) -> &AshMemoryDevice {
        AshMemoryDevice::wrap(&self.logical)
    }

    fn alloc(
        &self,
        reqs: vk::MemoryRequirements,
        align_mask: u64,
        usage: gpu_alloc::UsageFlags,
    ) -> Result<MemoryBlock<vk::DeviceMemory>, OutOfMemory> {
        debug_assert!(reqs.alignment.is_power_of_two());

        unsafe {
            self.allocator.lock().alloc(
                self.memory_device(),
                Request {
                    size: reqs.size,
                    align_mask: (reqs.alignment - 1) | align_mask,
                    memory_types: reqs.memory_type_bits,
                    usage,
                },
            )
        }
        .map_err(|err| {
            tracing::error!("{:#}", err);
            OutOfMemory
        })
    }

    fn dealloc(&self, block: MemoryBlock<vk::DeviceMemory>) {
        unsafe { self.allocator.lock().dealloc(self.memory_device(), block) }
    }

    #[tracing::instrument(skip(self, data))]
    fn create_buffer_impl(
        &self,
        info: BufferInfo,
        memory: MemoryUsage,
        data: Option<&[u8]>,
    ) -> Result<Buffer, OutOfMemory> {
        debug_assert!(info.is_valid());

        let handle = unsafe {
            self.logical.create_buffer(
                &vk::BufferCreateInfo::default()
                    .size(info.size)
                    .usage(info.usage.to_ash())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let reqs = unsafe { self.logical.get_buffer_memory_requirements(handle) };

        let mut block = match self.alloc(
            reqs,
            info.align,
            buffer_memory_usage_to_gpu_alloc(info.usage, memory),
        ) {
            Ok(block) => block,
            Err(err) => {
                unsafe { self.logical.destroy_buffer(handle, None) }
                return Err(err);
            }
        };

        let result = unsafe {
            self.logical
                .bind_buffer_memory(handle, *block.memory(), block.offset())
        }
        .map_err(oom_error_from_ash)
        .and_then(|()| match data {
            Some(data) => unsafe { block.write_bytes(self.memory_device(), 0, data) }.map_err(
                |err| {
                    tracing::error!("Failed to initialize buffer: {:#}", err);
                    OutOfMemory
                },
            ),
            None => Ok(()),
        });

        if let Err(err) = result {
            unsafe { self.logical.destroy_buffer(handle, None) }
            self.dealloc(block);
            return Err(err);
        }

        let address = if info.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            let address = unsafe {
                self.logical.get_buffer_device_address(
                    &vk::BufferDeviceAddressInfo::default().buffer(handle),
                )
            };
            match DeviceAddress::new(address) {
                Some(address) => Some(address),
                None => null_device_address(),
            }
        } else {
            None
        };

        let index = self
            .buffers
            .lock()
            .insert(BufferEntry { handle, block });

        tracing::debug!("Buffer created {:?}", handle);
        Ok(Buffer::new(info, address, index))
    }

    fn retire(&self, slots: Vec<Slot>, queue: &mut Queue) -> Result<(), DeviceError> {
        if slots.is_empty() {
            return Ok(());
        }

        let fences: SmallVec<[_; 8]> = slots.iter().map(|slot| slot.fence).collect();
        let result = unsafe { self.logical.reset_fences(&fences) }.and_then(|()| {
            slots.iter().try_for_each(|slot| unsafe {
                self.logical
                    .reset_command_buffer(slot.cbuf, vk::CommandBufferResetFlags::empty())
            })
        });

        queue.submissions.recycle(slots);
        result.map_err(device_error_from_ash)
    }

    fn new_slot(&self, pool: vk::CommandPool) -> Result<Slot, DeviceError> {
        let cbufs = unsafe {
            self.logical.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::default()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1),
            )
        }
        .map_err(device_error_from_ash)?;

        let cbuf = match cbufs.first() {
            Some(&cbuf) => cbuf,
            None => unexpected_result(vk::Result::ERROR_UNKNOWN),
        };

        let fence = unsafe {
            self.logical
                .create_fence(&vk::FenceCreateInfo::default(), None)
        };

        match fence {
            Ok(fence) => Ok(Slot { cbuf, fence }),
            Err(err) => {
                unsafe { self.logical.free_command_buffers(pool, &[cbuf]) }
                Err(device_error_from_ash(err))
            }
        }
    }
}

impl Device for VulkanDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn create_buffer(&self, info: BufferInfo, memory: MemoryUsage) -> Result<Buffer, OutOfMemory> {
        self.create_buffer_impl(info, memory, None)
    }

    fn create_buffer_static(&self, info: BufferInfo, data: &[u8]) -> Result<Buffer, OutOfMemory> {
        debug_assert!(data.len() as u64 <= info.size);
        self.create_buffer_impl(info, MemoryUsage::UPLOAD, Some(data))
    }

    fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), MapError> {
        let mut buffers = self.buffers.lock();
        let entry = match buffers.get_mut(buffer.index()) {
            Some(entry) => entry,
            None => invalid_handle("buffer", buffer.index()),
        };

        unsafe {
            entry
                .block
                .write_bytes(self.memory_device(), offset, data)
        }
        .map_err(map_error_from_gpu_alloc)
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let entry = self.buffers.lock().try_remove(buffer.index());
        if let Some(entry) = entry {
            unsafe { self.logical.destroy_buffer(entry.handle, None) }
            self.dealloc(entry.block);
        }
    }

    #[tracing::instrument(skip(self))]
    fn create_image(&self, info: ImageInfo) -> Result<Image, OutOfMemory> {
        let tiling = match info.tiling {
            ImageTiling::Optimal => vk::ImageTiling::OPTIMAL,
            ImageTiling::Linear => vk::ImageTiling::LINEAR,
        };

        let handle = unsafe {
            self.logical.create_image(
                &vk::ImageCreateInfo::default()
                    .image_type(vk::ImageType::TYPE_2D)
                    .format(info.format.to_ash())
                    .extent(info.extent.into_3d().to_ash())
                    .mip_levels(1)
                    .array_layers(1)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(tiling)
                    .usage(info.usage.to_ash())
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .initial_layout(vk::ImageLayout::UNDEFINED),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let reqs = unsafe { self.logical.get_image_memory_requirements(handle) };

        let block = match self.alloc(reqs, 0, memory_usage_to_gpu_alloc(info.memory)) {
            Ok(block) => block,
            Err(err) => {
                unsafe { self.logical.destroy_image(handle, None) }
                return Err(err);
            }
        };

        let result = unsafe {
            self.logical
                .bind_image_memory(handle, *block.memory(), block.offset())
        };

        if let Err(err) = result {
            unsafe { self.logical.destroy_image(handle, None) }
            self.dealloc(block);
            return Err(oom_error_from_ash(err));
        }

        let view = if info
            .usage
            .intersects(ImageUsage::SAMPLED | ImageUsage::STORAGE)
        {
            let result = unsafe {
                self.logical.create_image_view(
                    &vk::ImageViewCreateInfo::default()
                        .image(handle)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(info.format.to_ash())
                        .subresource_range(color_range()),
                    None,
                )
            };

            match result {
                Ok(view) => view,
                Err(err) => {
                    unsafe { self.logical.destroy_image(handle, None) }
                    self.dealloc(block);
                    return Err(oom_error_from_ash(err));
                }
            }
        } else {
            vk::ImageView::null()
        };

        let layout = match info.tiling {
            ImageTiling::Linear => {
                let layout = unsafe {
                    self.logical.get_image_subresource_layout(
                        handle,
                        vk::ImageSubresource {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            mip_level: 0,
                            array_layer: 0,
                        },
                    )
                };
                SubresourceLayout {
                    offset: layout.offset,
                    size: layout.size,
                    row_pitch: layout.row_pitch,
                }
            }
            ImageTiling::Optimal => SubresourceLayout::default(),
        };

        let index = self.images.lock().insert(ImageEntry {
            handle,
            view,
            block,
            layout,
        });

        tracing::debug!("Image created {:?}", handle);
        Ok(Image::new(info, index))
    }

    fn destroy_image(&self, image: Image) {
        let entry = self.images.lock().try_remove(image.index());
        if let Some(entry) = entry {
            unsafe {
                if entry.view != vk::ImageView::null() {
                    self.logical.destroy_image_view(entry.view, None);
                }
                self.logical.destroy_image(entry.handle, None);
            }
            self.dealloc(entry.block);
        }
    }

    fn image_subresource_layout(&self, image: &Image) -> SubresourceLayout {
        match self.images.lock().get(image.index()) {
            Some(entry) => entry.layout,
            None => invalid_handle("image", image.index()),
        }
    }

    fn read_image(&self, image: &Image, f: &mut dyn FnMut(&[u8])) -> Result<(), MapError> {
        let mut images = self.images.lock();
        let entry = match images.get_mut(image.index()) {
            Some(entry) => entry,
            None => invalid_handle("image", image.index()),
        };

        if image.info().tiling != ImageTiling::Linear {
            return Err(MapError::NonHostVisible);
        }

        let size = entry.layout.offset + entry.layout.size;
        let mut data = vec![0; size as usize];

        unsafe { entry.block.read_bytes(self.memory_device(), 0, &mut data) }
            .map_err(map_error_from_gpu_alloc)?;

        f(&data);
        Ok(())
    }

    fn create_sampler(&self, info: SamplerInfo) -> Result<Sampler, OutOfMemory> {
        let handle = unsafe {
            self.logical.create_sampler(
                &vk::SamplerCreateInfo::default()
                    .mag_filter(info.filter.to_ash())
                    .min_filter(info.filter.to_ash())
                    .mipmap_mode(info.mipmap_mode.to_ash())
                    .address_mode_u(info.address_mode.to_ash())
                    .address_mode_v(info.address_mode.to_ash())
                    .address_mode_w(info.address_mode.to_ash())
                    .anisotropy_enable(info.max_anisotropy.is_some())
                    .max_anisotropy(info.max_anisotropy.unwrap_or(1.0))
                    .max_lod(vk::LOD_CLAMP_NONE),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let index = self.samplers.lock().insert(handle);
        tracing::debug!("Sampler created {:?}", handle);
        Ok(Sampler::new(index))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        if let Some(handle) = self.samplers.lock().try_remove(sampler.index()) {
            unsafe { self.logical.destroy_sampler(handle, None) }
        }
    }

    #[tracing::instrument(skip(self, geometry), fields(geometry_count = geometry.len()))]
    fn get_acceleration_structure_build_sizes(
        &self,
        level: AccelerationStructureLevel,
        flags: AccelerationStructureBuildFlags,
        geometry: &[AccelerationStructureGeometryInfo],
    ) -> Result<AccelerationStructureBuildSizesInfo, DeviceError> {
        let geometries: Vec<_> = geometry
            .iter()
            .map(|info| match *info {
                AccelerationStructureGeometryInfo::Triangles {
                    index_type,
                    max_vertex_count,
                    vertex_format,
                    allows_transforms,
                    ..
                } => {
                    let mut triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                        .vertex_format(vertex_format.to_ash())
                        .max_vertex(max_vertex_count)
                        .index_type(index_type.to_ash());

                    if allows_transforms {
                        // Any non-null address marks transform as present for size queries.
                        triangles = triangles.transform_data(vk::DeviceOrHostAddressConstKHR {
                            device_address: 1,
                        });
                    }

                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
                }
                AccelerationStructureGeometryInfo::Instances { .. } => {
                    vk::AccelerationStructureGeometryKHR::default()
                        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                        .geometry(vk::AccelerationStructureGeometryDataKHR {
                            instances: vk::AccelerationStructureGeometryInstancesDataKHR::default(),
                        })
                }
            })
            .collect();

        let max_primitive_counts: Vec<u32> = geometry
            .iter()
            .map(AccelerationStructureGeometryInfo::max_primitive_count)
            .collect();

        let build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
            .ty(level.to_ash())
            .flags(flags.to_ash())
            .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
            .geometries(&geometries);

        let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
        unsafe {
            self.accel.get_acceleration_structure_build_sizes(
                vk::AccelerationStructureBuildTypeKHR::DEVICE,
                &build_info,
                &max_primitive_counts,
                &mut sizes,
            )
        }

        Ok(AccelerationStructureBuildSizesInfo {
            acceleration_structure_size: sizes.acceleration_structure_size,
            update_scratch_size: sizes.update_scratch_size,
            build_scratch_size: sizes.build_scratch_size,
        })
    }

    #[tracing::instrument(skip(self))]
    fn create_acceleration_structure(
        &self,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory> {
        let buffer = match self.buffers.lock().get(info.region.buffer.index()) {
            Some(entry) => entry.handle,
            None => invalid_handle("buffer", info.region.buffer.index()),
        };

        let handle = unsafe {
            self.accel.create_acceleration_structure(
                &vk::AccelerationStructureCreateInfoKHR::default()
                    .buffer(buffer)
                    .offset(info.region.offset)
                    .size(info.region.size)
                    .ty(info.level.to_ash()),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let address = unsafe {
            self.accel.get_acceleration_structure_device_address(
                &vk::AccelerationStructureDeviceAddressInfoKHR::default()
                    .acceleration_structure(handle),
            )
        };

        let address = match DeviceAddress::new(address) {
            Some(address) => address,
            None => null_device_address(),
        };

        let index = self.acceleration_structures.lock().insert(handle);

        tracing::debug!("AccelerationStructure created {:?}", handle);
        Ok(AccelerationStructure::new(info, address, index))
    }

    fn destroy_acceleration_structure(&self, accel: AccelerationStructure) {
        if let Some(handle) = self
            .acceleration_structures
            .lock()
            .try_remove(accel.index())
        {
            unsafe { self.accel.destroy_acceleration_structure(handle, None) }
        }
    }

    fn create_shader_module(
        &self,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError> {
        let words = info.spirv_words()?;

        let handle = unsafe {
            self.logical.create_shader_module(
                &vk::ShaderModuleCreateInfo::default().code(&words),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let index = self.shaders.lock().insert(handle);
        tracing::debug!("ShaderModule created {:?}", handle);
        Ok(ShaderModule::new(index))
    }

    fn destroy_shader_module(&self, module: ShaderModule) {
        if let Some(handle) = self.shaders.lock().try_remove(module.index()) {
            unsafe { self.logical.destroy_shader_module(handle, None) }
        }
    }

    #[tracing::instrument(skip(self))]
    fn create_descriptor_set_layout(
        &self,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory> {
        let bindings: SmallVec<[_; 8]> = info
            .bindings
            .iter()
            .map(|binding| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding.binding)
                    .descriptor_type(binding.ty.to_ash())
                    .descriptor_count(binding.count)
                    .stage_flags(binding.stages.to_ash())
            })
            .collect();

        let flags: SmallVec<[_; 8]> = info
            .bindings
            .iter()
            .map(|binding| binding.flags.to_ash())
            .collect();

        let mut flags_info =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&flags);

        let handle = unsafe {
            self.logical.create_descriptor_set_layout(
                &vk::DescriptorSetLayoutCreateInfo::default()
                    .bindings(&bindings)
                    .push_next(&mut flags_info),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let index = self.descriptor_set_layouts.lock().insert(handle);
        tracing::debug!("DescriptorSetLayout created {:?}", handle);
        Ok(DescriptorSetLayout::new(info, index))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        if let Some(handle) = self.descriptor_set_layouts.lock().try_remove(layout.index()) {
            unsafe { self.logical.destroy_descriptor_set_layout(handle, None) }
        }
    }

    fn create_pipeline_layout(
        &self,
        info: PipelineLayoutInfo,
    ) -> Result<PipelineLayout, OutOfMemory> {
        let set_layouts: SmallVec<[_; 4]> = {
            let layouts = self.descriptor_set_layouts.lock();
            info.sets
                .iter()
                .map(|set| match layouts.get(set.index()) {
                    Some(&handle) => handle,
                    None => invalid_handle("descriptor set layout", set.index()),
                })
                .collect()
        };

        let push_constants: SmallVec<[_; 4]> = info
            .push_constants
            .iter()
            .map(|pc| {
                vk::PushConstantRange::default()
                    .stage_flags(pc.stages.to_ash())
                    .offset(pc.offset)
                    .size(pc.size)
            })
            .collect();

        let handle = unsafe {
            self.logical.create_pipeline_layout(
                &vk::PipelineLayoutCreateInfo::default()
                    .set_layouts(&set_layouts)
                    .push_constant_ranges(&push_constants),
                None,
            )
        }
        .map_err(oom_error_from_ash)?;

        let index = self.pipeline_layouts.lock().insert(handle);
        tracing::debug!("PipelineLayout created {:?}", handle);
        Ok(PipelineLayout::new(info, index))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        if let Some(handle) = self.pipeline_layouts.lock().try_remove(layout.index()) {
            unsafe { self.logical.destroy_pipeline_layout(handle, None) }
        }
    }

    #[tracing::instrument(skip(self, info), fields(shaders = info.shaders.len(), groups = info.groups.len()))]
    fn create_ray_tracing_pipeline(
        &self,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, DeviceError> {
        if info.max_recursion_depth > self.properties.max_ray_recursion_depth {
            return Err(DeviceError::Unsupported {
                feature: "maxRayRecursionDepth",
            });
        }

        let entries = info
            .shaders
            .iter()
            .map(|shader| CString::new(shader.entry()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| DeviceError::Failed {
                result: err.to_string(),
            })?;

        let stages: Vec<_> = {
            let shaders = self.shaders.lock();
            info.shaders
                .iter()
                .zip(&entries)
                .map(|(shader, entry)| {
                    let module = match shaders.get(shader.module().index()) {
                        Some(&module) => module,
                        None => invalid_handle("shader module", shader.module().index()),
                    };
                    vk::PipelineShaderStageCreateInfo::default()
                        .stage(shader.stage().to_ash())
                        .module(module)
                        .name(entry)
                })
                .collect()
        };

        let groups: Vec<_> = info
            .groups
            .iter()
            .map(|group| {
                let base = vk::RayTracingShaderGroupCreateInfoKHR::default()
                    .general_shader(vk::SHADER_UNUSED_KHR)
                    .closest_hit_shader(vk::SHADER_UNUSED_KHR)
                    .any_hit_shader(vk::SHADER_UNUSED_KHR)
                    .intersection_shader(vk::SHADER_UNUSED_KHR);

                match *group {
                    RayTracingShaderGroupInfo::Raygen { raygen: general }
                    | RayTracingShaderGroupInfo::Miss { miss: general } => base
                        .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                        .general_shader(general),
                    RayTracingShaderGroupInfo::Triangles {
                        any_hit,
                        closest_hit,
                    } => base
                        .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                        .any_hit_shader(any_hit.unwrap_or(vk::SHADER_UNUSED_KHR))
                        .closest_hit_shader(closest_hit.unwrap_or(vk::SHADER_UNUSED_KHR)),
                }
            })
            .collect();

        let layout = match self.pipeline_layouts.lock().get(info.layout.index()) {
            Some(&layout) => layout,
            None => invalid_handle("pipeline layout", info.layout.index()),
        };

        let result = unsafe {
            self.rt.create_ray_tracing_pipelines(
                vk::DeferredOperationKHR::null(),
                vk::PipelineCache::null(),
                &[vk::RayTracingPipelineCreateInfoKHR::default()
                    .stages(&stages)
                    .groups(&groups)
                    .max_pipeline_ray_recursion_depth(info.max_recursion_depth)
                    .layout(layout)],
                None,
            )
        };

        let handle = match result {
            Ok(pipelines) => match pipelines.first() {
                Some(&pipeline) => pipeline,
                None => unexpected_result(vk::Result::ERROR_UNKNOWN),
            },
            Err((pipelines, err)) => {
                for pipeline in pipelines {
                    if pipeline != vk::Pipeline::null() {
                        unsafe { self.logical.destroy_pipeline(pipeline, None) }
                    }
                }
                return Err(device_error_from_ash(err));
            }
        };

        let index = self.pipelines.lock().insert(handle);
        tracing::debug!("RayTracingPipeline created {:?}", handle);
        Ok(RayTracingPipeline::new(info, index))
    }

    fn destroy_ray_tracing_pipeline(&self, pipeline: RayTracingPipeline) {
        if let Some(handle) = self.pipelines.lock().try_remove(pipeline.index()) {
            unsafe { self.logical.destroy_pipeline(handle, None) }
        }
    }

    fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, DeviceError> {
        let handle = match self.pipelines.lock().get(pipeline.index()) {
            Some(&handle) => handle,
            None => invalid_handle("pipeline", pipeline.index()),
        };

        let size = group_count as usize * self.properties.shader_group_handle_size as usize;

        unsafe {
            self.rt
                .get_ray_tracing_shader_group_handles(handle, first_group, group_count, size)
        }
        .map_err(device_error_from_ash)
    }

    #[tracing::instrument(skip(self, layout))]
    fn create_descriptor_set(
        &self,
        layout: &DescriptorSetLayout,
        variable_count: u32,
    ) -> Result<DescriptorSet, DescriptorsAllocationError> {
        let variable = layout.info().variable_binding().map(|binding| binding.count);
        if let Some(max) = variable {
            if variable_count > max {
                return Err(DescriptorsAllocationError::VariableCountTooLarge {
                    count: variable_count,
                    max,
                });
            }
        }

        let handle = match self.descriptor_set_layouts.lock().get(layout.index()) {
            Some(&handle) => handle,
            None => invalid_handle("descriptor set layout", layout.index()),
        };

        let layouts = [handle];
        let counts = [variable_count];
        let mut variable_info =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);

        let mut allocate_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);

        if variable.is_some() {
            allocate_info = allocate_info.push_next(&mut variable_info);
        }

        // Pool access is synchronized by sets lock.
        let mut sets = self.descriptor_sets.lock();

        let allocated = unsafe { self.logical.allocate_descriptor_sets(&allocate_info) }
            .map_err(|err| match err {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY => out_of_host_memory(),
                vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DescriptorsAllocationError::OutOfMemory {
                    source: OutOfMemory,
                },
                vk::Result::ERROR_FRAGMENTED_POOL | vk::Result::ERROR_OUT_OF_POOL_MEMORY => {
                    DescriptorsAllocationError::Fragmentation
                }
                _ => unexpected_result(err),
            })?;

        let set = match allocated.first() {
            Some(&set) => set,
            None => unexpected_result(vk::Result::ERROR_UNKNOWN),
        };

        let index = sets.insert(set);
        tracing::debug!("DescriptorSet created {:?}", set);
        Ok(DescriptorSet::new(layout.clone(), variable_count, index))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSet) {
        let mut sets = self.descriptor_sets.lock();
        if let Some(handle) = sets.try_remove(set.index()) {
            let result = unsafe {
                self.logical
                    .free_descriptor_sets(self.descriptor_pool, &[handle])
            };
            if let Err(err) = result {
                tracing::error!("Failed to free descriptor set: {}", err);
            }
        }
    }

    fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet<'_>]) {
        let sets = self.descriptor_sets.lock();
        let images = self.images.lock();
        let buffers = self.buffers.lock();
        let samplers = self.samplers.lock();
        let accels = self.acceleration_structures.lock();

        let view = |image: &Image| match images.get(image.index()) {
            Some(entry) => {
                debug_assert_ne!(entry.view, vk::ImageView::null());
                entry.view
            }
            None => invalid_handle("image", image.index()),
        };

        let buffer = |buffer: &Buffer| match buffers.get(buffer.index()) {
            Some(entry) => entry.handle,
            None => invalid_handle("buffer", buffer.index()),
        };

        for write in writes {
            let set = match sets.get(write.set.index()) {
                Some(&set) => set,
                None => invalid_handle("descriptor set", write.set.index()),
            };

            let base = vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(write.binding)
                .dst_array_element(write.element)
                .descriptor_type(write.descriptors.ty().to_ash());

            match write.descriptors {
                Descriptors::CombinedImageSampler(slice) => {
                    let infos: SmallVec<[_; 16]> = slice
                        .iter()
                        .map(|desc| {
                            let sampler = match samplers.get(desc.sampler.index()) {
                                Some(&sampler) => sampler,
                                None => invalid_handle("sampler", desc.sampler.index()),
                            };
                            vk::DescriptorImageInfo::default()
                                .sampler(sampler)
                                .image_view(view(&desc.image))
                                .image_layout(desc.layout.to_ash())
                        })
                        .collect();

                    unsafe {
                        self.logical
                            .update_descriptor_sets(&[base.image_info(&infos)], &[])
                    }
                }
                Descriptors::StorageImage(slice) => {
                    let infos: SmallVec<[_; 4]> = slice
                        .iter()
                        .map(|desc| {
                            vk::DescriptorImageInfo::default()
                                .image_view(view(&desc.image))
                                .image_layout(desc.layout.to_ash())
                        })
                        .collect();

                    unsafe {
                        self.logical
                            .update_descriptor_sets(&[base.image_info(&infos)], &[])
                    }
                }
                Descriptors::UniformBuffer(slice) | Descriptors::StorageBuffer(slice) => {
                    let infos: SmallVec<[_; 4]> = slice
                        .iter()
                        .map(|region| {
                            vk::DescriptorBufferInfo::default()
                                .buffer(buffer(&region.buffer))
                                .offset(region.offset)
                                .range(region.size)
                        })
                        .collect();

                    unsafe {
                        self.logical
                            .update_descriptor_sets(&[base.buffer_info(&infos)], &[])
                    }
                }
                Descriptors::AccelerationStructure(slice) => {
                    let handles: SmallVec<[_; 4]> = slice
                        .iter()
                        .map(|accel| match accels.get(accel.index()) {
                            Some(&handle) => handle,
                            None => invalid_handle("acceleration structure", accel.index()),
                        })
                        .collect();

                    let mut info = vk::WriteDescriptorSetAccelerationStructureKHR::default()
                        .acceleration_structures(&handles);

                    unsafe {
                        self.logical.update_descriptor_sets(
                            &[base
                                .descriptor_count(handles.len() as u32)
                                .push_next(&mut info)],
                            &[],
                        )
                    }
                }
            }
        }
    }

    #[tracing::instrument(skip(self, commands), fields(commands = commands.len()))]
    fn submit(&self, commands: Vec<Command>) -> Result<Submission, DeviceError> {
        let mut queue = self.queue.lock();

        let slot = match queue.submissions.take_free() {
            Some(slot) => slot,
            None => self.new_slot(queue.pool)?,
        };

        let cbufs = [slot.cbuf];
        let result = unsafe { self.record(slot.cbuf, &commands) }.and_then(|()| unsafe {
            self.logical.queue_submit(
                queue.handle,
                &[vk::SubmitInfo::default().command_buffers(&cbufs)],
                slot.fence,
            )
        });

        match result {
            Ok(()) => {
                let epoch = queue.submissions.push(slot);
                tracing::trace!("Submitted epoch {}", epoch);
                Ok(Submission::new(epoch))
            }
            Err(err) => {
                let reset = unsafe {
                    self.logical
                        .reset_command_buffer(slot.cbuf, vk::CommandBufferResetFlags::empty())
                };
                if reset.is_ok() {
                    queue.submissions.recycle([slot]);
                }
                Err(device_error_from_ash(err))
            }
        }
    }

    fn wait(&self, submission: Submission) -> Result<(), DeviceError> {
        let mut queue = self.queue.lock();

        let fence = match queue.submissions.fence(submission.epoch()) {
            Some(fence) => fence,
            None => return Ok(()),
        };

        unsafe { self.logical.wait_for_fences(&[fence], true, !0) }
            .map_err(device_error_from_ash)?;

        let slots = queue.submissions.retire(submission.epoch());
        self.retire(slots, &mut queue)
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        let mut queue = self.queue.lock();

        unsafe { self.logical.queue_wait_idle(queue.handle) }.map_err(device_error_from_ash)?;

        let slots = queue.submissions.retire_all();
        self.retire(slots, &mut queue)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        if let Err(err) = unsafe { self.logical.device_wait_idle() } {
            tracing::error!("Failed to wait for device idle on drop: {}", err);
        }

        let queue = self.queue.get_mut();
        unsafe {
            for slot in queue.submissions.drain() {
                self.logical.destroy_fence(slot.fence, None);
            }
            // Frees every command buffer allocated from it.
            self.logical.destroy_command_pool(queue.pool, None);
        }

        let leaked = self.buffers.get_mut().len()
            + self.images.get_mut().len()
            + self.acceleration_structures.get_mut().len()
            + self.pipelines.get_mut().len();
        if leaked > 0 {
            tracing::warn!("{} resources were not destroyed before device drop", leaked);
        }

        let allocator = self.allocator.get_mut();
        let memory_device = AshMemoryDevice::wrap(&self.logical);

        unsafe {
            for handle in self.pipelines.get_mut().drain() {
                self.logical.destroy_pipeline(handle, None);
            }
            for handle in self.pipeline_layouts.get_mut().drain() {
                self.logical.destroy_pipeline_layout(handle, None);
            }
            for handle in self.descriptor_set_layouts.get_mut().drain() {
                self.logical.destroy_descriptor_set_layout(handle, None);
            }
            for handle in self.shaders.get_mut().drain() {
                self.logical.destroy_shader_module(handle, None);
            }
            for handle in self.acceleration_structures.get_mut().drain() {
                self.accel.destroy_acceleration_structure(handle, None);
            }
            for handle in self.samplers.get_mut().drain() {
                self.logical.destroy_sampler(handle, None);
            }
            for entry in self.images.get_mut().drain() {
                if entry.view != vk::ImageView::null() {
                    self.logical.destroy_image_view(entry.view, None);
                }
                self.logical.destroy_image(entry.handle, None);
                allocator.dealloc(memory_device, entry.block);
            }
            for entry in self.buffers.get_mut().drain() {
                self.logical.destroy_buffer(entry.handle, None);
                allocator.dealloc(memory_device, entry.block);
            }
            self.descriptor_sets.get_mut().clear();
            self.logical
                .destroy_descriptor_pool(self.descriptor_pool, None);

            allocator.cleanup(memory_device);
            self.logical.destroy_device(None);
        }

        tracing::debug!("Device destroyed");
    }
}

pub(super) fn color_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}
