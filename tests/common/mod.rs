#![allow(dead_code)]

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use parking_lot::Mutex;
use summit::*;

/// Device call recorded by [`MockDevice`].
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateBuffer {
        index: usize,
        info: BufferInfo,
        memory: Option<MemoryUsage>,
    },
    DestroyBuffer {
        index: usize,
    },
    CreateImage {
        index: usize,
        info: ImageInfo,
    },
    DestroyImage {
        index: usize,
    },
    BuildSizes {
        level: AccelerationStructureLevel,
        geometry_count: usize,
    },
    CreateAccelerationStructure {
        index: usize,
        level: AccelerationStructureLevel,
        storage: usize,
    },
    DestroyAccelerationStructure {
        index: usize,
    },
    CreateRayTracingPipeline {
        index: usize,
        group_count: u32,
    },
    GroupHandles {
        first: u32,
        count: u32,
    },
    CreateDescriptorSet {
        index: usize,
        variable_count: u32,
    },
    UpdateDescriptorSets {
        /// Binding and number of descriptors of each write.
        writes: Vec<(u32, usize)>,

        /// Indices of storage images written.
        storage_images: Vec<usize>,
    },
    Submit {
        submission: Submission,
        commands: Vec<Command>,
    },
    Wait {
        submission: Submission,
    },
    WaitIdle,
    Other(&'static str),
}

/// Kind of live resource tracked by [`MockDevice`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Buffer,
    Image,
    Sampler,
    AccelerationStructure,
    ShaderModule,
    DescriptorSetLayout,
    PipelineLayout,
    Pipeline,
    DescriptorSet,
}

/// Operation a [`MockDevice`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Pipeline,
    GroupHandles,
    DescriptorSet,
    BuildSizes,
    Submit,
}

#[derive(Debug, Default)]
struct State {
    next_index: usize,
    next_epoch: u64,
    calls: Vec<Call>,
    live: BTreeSet<(Kind, usize)>,
    memory: HashMap<usize, Vec<u8>>,
    images: HashMap<usize, ImageInfo>,
    fail: Option<FailPoint>,
}

impl State {
    fn allocate(&mut self, kind: Kind) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        self.live.insert((kind, index));
        index
    }

    fn release(&mut self, kind: Kind, index: usize) {
        assert!(
            self.live.remove(&(kind, index)),
            "{:?} {} destroyed twice or never created",
            kind,
            index
        );
    }
}

/// Device that records every call and returns deterministic values.
///
/// Clones share recorded state.
#[derive(Clone, Debug)]
pub struct MockDevice {
    properties: DeviceProperties,
    state: Arc<Mutex<State>>,
}

/// Bytes between rows of linear images. Larger than tight packing.
pub const ROW_PADDING: u64 = 16;

/// Offset of the first texel of linear images.
pub const LINEAR_OFFSET: u64 = 8;

impl MockDevice {
    pub fn new() -> Self {
        Self::with_properties(DeviceProperties {
            shader_group_handle_size: 32,
            shader_group_handle_alignment: 32,
            shader_group_base_alignment: 64,
            max_ray_recursion_depth: 31,
            max_variable_descriptor_count: 64,
        })
    }

    pub fn with_properties(properties: DeviceProperties) -> Self {
        MockDevice {
            properties,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn fail_on(&self, point: FailPoint) {
        self.state.lock().fail = Some(point);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    pub fn live(&self) -> Vec<(Kind, usize)> {
        self.state.lock().live.iter().copied().collect()
    }

    pub fn live_count(&self, kind: Kind) -> usize {
        self.state.lock().live.iter().filter(|(k, _)| *k == kind).count()
    }

    /// Content of host-visible buffer.
    pub fn buffer_data(&self, buffer: &Buffer) -> Vec<u8> {
        self.state
            .lock()
            .memory
            .get(&buffer.index())
            .cloned()
            .unwrap_or_default()
    }

    /// All submitted command lists in submission order.
    pub fn submissions(&self) -> Vec<Vec<Command>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Submit { commands, .. } => Some(commands),
                _ => None,
            })
            .collect()
    }

    /// Created buffers with their infos.
    pub fn created_buffers(&self) -> Vec<(usize, BufferInfo)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::CreateBuffer { index, info, .. } => Some((index, info)),
                _ => None,
            })
            .collect()
    }

    /// Size of the sizes reported for builds of `level` with `count` geometries.
    pub fn reported_sizes(
        level: AccelerationStructureLevel,
        count: usize,
    ) -> AccelerationStructureBuildSizesInfo {
        let base = match level {
            AccelerationStructureLevel::Bottom => 4096,
            AccelerationStructureLevel::Top => 1024,
        };
        AccelerationStructureBuildSizesInfo {
            acceleration_structure_size: base + 256 * count as u64,
            update_scratch_size: 0,
            build_scratch_size: 3 * base + 512 * count as u64,
        }
    }

    fn address(index: usize) -> Option<DeviceAddress> {
        DeviceAddress::new(0x1_0000 * (index as u64 + 1))
    }

    fn push(&self, call: Call) {
        self.state.lock().calls.push(call);
    }

    fn other(&self, name: &'static str) {
        self.push(Call::Other(name));
    }

    fn linear_layout(info: &ImageInfo) -> SubresourceLayout {
        let row_pitch = u64::from(info.extent.width) * 4 + ROW_PADDING;
        SubresourceLayout {
            offset: LINEAR_OFFSET,
            size: row_pitch * u64::from(info.extent.height),
            row_pitch,
        }
    }
}

impl Device for MockDevice {
    fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    fn create_buffer(&self, info: BufferInfo, memory: MemoryUsage) -> Result<Buffer, OutOfMemory> {
        assert!(info.is_valid(), "Invalid buffer info {:?}", info);
        let mut state = self.state.lock();
        let index = state.allocate(Kind::Buffer);
        if memory.is_host_visible() {
            state.memory.insert(index, vec![0; info.size as usize]);
        }
        state.calls.push(Call::CreateBuffer {
            index,
            info,
            memory: Some(memory),
        });

        let address = if info.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            Self::address(index)
        } else {
            None
        };
        Ok(Buffer::new(info, address, index))
    }

    fn create_buffer_static(&self, info: BufferInfo, data: &[u8]) -> Result<Buffer, OutOfMemory> {
        assert!(info.is_valid(), "Invalid buffer info {:?}", info);
        assert!(data.len() as u64 <= info.size);
        let mut state = self.state.lock();
        let index = state.allocate(Kind::Buffer);
        let mut memory = data.to_vec();
        memory.resize(info.size as usize, 0);
        state.memory.insert(index, memory);
        state.calls.push(Call::CreateBuffer {
            index,
            info,
            memory: None,
        });

        let address = if info.usage.contains(BufferUsage::DEVICE_ADDRESS) {
            Self::address(index)
        } else {
            None
        };
        Ok(Buffer::new(info, address, index))
    }

    fn write_buffer(&self, buffer: &Buffer, offset: u64, data: &[u8]) -> Result<(), MapError> {
        let mut state = self.state.lock();
        let memory = state
            .memory
            .get_mut(&buffer.index())
            .ok_or(MapError::NonHostVisible)?;
        let offset = offset as usize;
        memory[offset..offset + data.len()].copy_from_slice(data);
        state.calls.push(Call::Other("write_buffer"));
        Ok(())
    }

    fn destroy_buffer(&self, buffer: Buffer) {
        let mut state = self.state.lock();
        state.release(Kind::Buffer, buffer.index());
        state.memory.remove(&buffer.index());
        state.calls.push(Call::DestroyBuffer {
            index: buffer.index(),
        });
    }

    fn create_image(&self, info: ImageInfo) -> Result<Image, OutOfMemory> {
        let mut state = self.state.lock();
        let index = state.allocate(Kind::Image);
        state.images.insert(index, info);
        state.calls.push(Call::CreateImage { index, info });
        Ok(Image::new(info, index))
    }

    fn destroy_image(&self, image: Image) {
        let mut state = self.state.lock();
        state.release(Kind::Image, image.index());
        state.images.remove(&image.index());
        state.calls.push(Call::DestroyImage {
            index: image.index(),
        });
    }

    fn image_subresource_layout(&self, image: &Image) -> SubresourceLayout {
        Self::linear_layout(image.info())
    }

    /// Texel `(x, y)` holds `[x, y, 0x80, 0xff]`. Row padding is `0xee`.
    fn read_image(&self, image: &Image, f: &mut dyn FnMut(&[u8])) -> Result<(), MapError> {
        let info = *image.info();
        if !info.memory.is_host_visible() || info.tiling != ImageTiling::Linear {
            return Err(MapError::NonHostVisible);
        }

        let layout = Self::linear_layout(&info);
        let mut data = vec![0xee; (layout.offset + layout.size) as usize];
        for y in 0..info.extent.height {
            for x in 0..info.extent.width {
                let at = (layout.offset + u64::from(y) * layout.row_pitch + u64::from(x) * 4)
                    as usize;
                data[at..at + 4].copy_from_slice(&[x as u8, y as u8, 0x80, 0xff]);
            }
        }

        self.other("read_image");
        f(&data);
        Ok(())
    }

    fn create_sampler(&self, _info: SamplerInfo) -> Result<Sampler, OutOfMemory> {
        let index = self.state.lock().allocate(Kind::Sampler);
        Ok(Sampler::new(index))
    }

    fn destroy_sampler(&self, sampler: Sampler) {
        self.state.lock().release(Kind::Sampler, sampler.index());
    }

    fn get_acceleration_structure_build_sizes(
        &self,
        level: AccelerationStructureLevel,
        _flags: AccelerationStructureBuildFlags,
        geometry: &[AccelerationStructureGeometryInfo],
    ) -> Result<AccelerationStructureBuildSizesInfo, DeviceError> {
        let mut state = self.state.lock();
        state.calls.push(Call::BuildSizes {
            level,
            geometry_count: geometry.len(),
        });
        if state.fail == Some(FailPoint::BuildSizes) {
            return Err(DeviceError::OutOfMemory {
                source: OutOfMemory,
            });
        }
        Ok(Self::reported_sizes(level, geometry.len()))
    }

    fn create_acceleration_structure(
        &self,
        info: AccelerationStructureInfo,
    ) -> Result<AccelerationStructure, OutOfMemory> {
        let mut state = self.state.lock();
        let index = state.allocate(Kind::AccelerationStructure);
        state.calls.push(Call::CreateAccelerationStructure {
            index,
            level: info.level,
            storage: info.region.buffer.index(),
        });
        let address = info
            .region
            .address()
            .ok_or(OutOfMemory)?;
        Ok(AccelerationStructure::new(info, address, index))
    }

    fn destroy_acceleration_structure(&self, accel: AccelerationStructure) {
        let mut state = self.state.lock();
        state.release(Kind::AccelerationStructure, accel.index());
        state
            .calls
            .push(Call::DestroyAccelerationStructure {
                index: accel.index(),
            });
    }

    fn create_shader_module(
        &self,
        info: ShaderModuleInfo,
    ) -> Result<ShaderModule, CreateShaderModuleError> {
        info.spirv_words()?;
        let index = self.state.lock().allocate(Kind::ShaderModule);
        self.other("create_shader_module");
        Ok(ShaderModule::new(index))
    }

    fn destroy_shader_module(&self, module: ShaderModule) {
        self.state.lock().release(Kind::ShaderModule, module.index());
        self.other("destroy_shader_module");
    }

    fn create_descriptor_set_layout(
        &self,
        info: DescriptorSetLayoutInfo,
    ) -> Result<DescriptorSetLayout, OutOfMemory> {
        let index = self.state.lock().allocate(Kind::DescriptorSetLayout);
        self.other("create_descriptor_set_layout");
        Ok(DescriptorSetLayout::new(info, index))
    }

    fn destroy_descriptor_set_layout(&self, layout: DescriptorSetLayout) {
        self.state
            .lock()
            .release(Kind::DescriptorSetLayout, layout.index());
        self.other("destroy_descriptor_set_layout");
    }

    fn create_pipeline_layout(
        &self,
        info: PipelineLayoutInfo,
    ) -> Result<PipelineLayout, OutOfMemory> {
        let index = self.state.lock().allocate(Kind::PipelineLayout);
        self.other("create_pipeline_layout");
        Ok(PipelineLayout::new(info, index))
    }

    fn destroy_pipeline_layout(&self, layout: PipelineLayout) {
        self.state.lock().release(Kind::PipelineLayout, layout.index());
        self.other("destroy_pipeline_layout");
    }

    fn create_ray_tracing_pipeline(
        &self,
        info: RayTracingPipelineInfo,
    ) -> Result<RayTracingPipeline, DeviceError> {
        let mut state = self.state.lock();
        if state.fail == Some(FailPoint::Pipeline) {
            return Err(DeviceError::Failed {
                result: "ERROR_UNKNOWN".to_owned(),
            });
        }
        let index = state.allocate(Kind::Pipeline);
        state.calls.push(Call::CreateRayTracingPipeline {
            index,
            group_count: info.groups.len() as u32,
        });
        Ok(RayTracingPipeline::new(info, index))
    }

    fn destroy_ray_tracing_pipeline(&self, pipeline: RayTracingPipeline) {
        self.state.lock().release(Kind::Pipeline, pipeline.index());
        self.other("destroy_ray_tracing_pipeline");
    }

    /// Handle of group `g` is `handle_size` bytes of `g + 1`.
    fn get_ray_tracing_shader_group_handles(
        &self,
        pipeline: &RayTracingPipeline,
        first_group: u32,
        group_count: u32,
    ) -> Result<Vec<u8>, DeviceError> {
        assert!(first_group + group_count <= pipeline.group_count());
        let mut state = self.state.lock();
        state.calls.push(Call::GroupHandles {
            first: first_group,
            count: group_count,
        });

        let handle_size = self.properties.shader_group_handle_size as usize;
        let count = if state.fail == Some(FailPoint::GroupHandles) {
            group_count - 1
        } else {
            group_count
        };

        Ok((first_group..first_group + count)
            .flat_map(|group| std::iter::repeat(group as u8 + 1).take(handle_size))
            .collect())
    }

    fn create_descriptor_set(
        &self,
        layout: &DescriptorSetLayout,
        variable_count: u32,
    ) -> Result<DescriptorSet, DescriptorsAllocationError> {
        let mut state = self.state.lock();
        if state.fail == Some(FailPoint::DescriptorSet) {
            return Err(DescriptorsAllocationError::Fragmentation);
        }
        let index = state.allocate(Kind::DescriptorSet);
        state.calls.push(Call::CreateDescriptorSet {
            index,
            variable_count,
        });
        Ok(DescriptorSet::new(layout.clone(), variable_count, index))
    }

    fn destroy_descriptor_set(&self, set: DescriptorSet) {
        self.state.lock().release(Kind::DescriptorSet, set.index());
        self.other("destroy_descriptor_set");
    }

    fn update_descriptor_sets(&self, writes: &[WriteDescriptorSet<'_>]) {
        let storage_images = writes
            .iter()
            .flat_map(|write| match write.descriptors {
                Descriptors::StorageImage(images) => {
                    images.iter().map(|d| d.image.index()).collect()
                }
                _ => Vec::new(),
            })
            .collect();

        self.push(Call::UpdateDescriptorSets {
            writes: writes
                .iter()
                .map(|write| (write.binding, write.descriptors.len()))
                .collect(),
            storage_images,
        });
    }

    fn submit(&self, commands: Vec<Command>) -> Result<Submission, DeviceError> {
        let mut state = self.state.lock();
        if state.fail == Some(FailPoint::Submit) {
            return Err(DeviceError::DeviceLost { source: DeviceLost });
        }
        state.next_epoch += 1;
        let submission = Submission::new(state.next_epoch);
        state.calls.push(Call::Submit {
            submission,
            commands,
        });
        Ok(submission)
    }

    fn wait(&self, submission: Submission) -> Result<(), DeviceError> {
        self.push(Call::Wait { submission });
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        self.push(Call::WaitIdle);
        Ok(())
    }
}

/// Presenter with a fixed set of presentation images that never touch the device.
#[derive(Debug)]
pub struct MockPresenter {
    pub format: Format,
    pub extent: Extent2d,
    pub resized: Option<Extent2d>,
    pub presented: Vec<(usize, Submission)>,
    next: usize,
}

impl MockPresenter {
    /// Indices of presentation images start here to never collide with device ones.
    pub const FIRST_IMAGE: usize = 1_000_000;

    pub fn new(format: Format, extent: Extent2d) -> Self {
        MockPresenter {
            format,
            extent,
            resized: None,
            presented: Vec::new(),
            next: 0,
        }
    }

    pub fn resize(&mut self, extent: Extent2d) {
        self.extent = extent;
        self.resized = Some(extent);
    }
}

impl Presenter for MockPresenter {
    fn format(&self) -> Format {
        self.format
    }

    fn take_resized(&mut self) -> Option<Extent2d> {
        self.resized.take()
    }

    fn acquire(&mut self) -> Result<Image, DeviceError> {
        let index = Self::FIRST_IMAGE + self.next % 3;
        self.next += 1;
        Ok(Image::new(
            ImageInfo {
                extent: self.extent,
                format: self.format,
                usage: ImageUsage::TRANSFER_DST,
                tiling: ImageTiling::Optimal,
                memory: MemoryUsage::FAST_DEVICE_ACCESS,
            },
            index,
        ))
    }

    fn present(&mut self, image: Image, submission: Submission) -> Result<(), DeviceError> {
        self.presented.push((image.index(), submission));
        Ok(())
    }
}

/// Minimal valid SPIR-V module header.
pub fn spirv() -> ShaderModuleInfo {
    let words: [u32; 5] = [0x0723_0203, 0x0001_0500, 0, 1, 0];
    ShaderModuleInfo::spirv(bytemuck::cast_slice::<u32, u8>(&words).to_vec())
}

pub fn programs() -> PathTracingPrograms {
    PathTracingPrograms {
        raygen: spirv(),
        miss: spirv(),
        shadow_miss: spirv(),
        closest_hit: spirv(),
        any_hit: spirv(),
        shadow_closest_hit: spirv(),
    }
}

fn textured_primitive(first_index: u32, index_count: u32) -> Primitive {
    Primitive {
        vertices: DeviceAddress::new(0x100_0000).unwrap(),
        vertex_count: 64,
        vertex_stride: 48,
        indices: DeviceAddress::new(0x200_0000).unwrap(),
        first_index,
        index_count,
        material: Material {
            base_color: Some(0),
            normal: Some(1),
        },
    }
}

/// Two textured primitives and one without normal map.
pub fn scene(device: &MockDevice) -> Scene {
    let texture = |device: &MockDevice| Texture {
        image: device
            .create_image(ImageInfo {
                extent: Extent2d {
                    width: 4,
                    height: 4,
                },
                format: Format::RGBA8Unorm,
                usage: ImageUsage::SAMPLED,
                tiling: ImageTiling::Optimal,
                memory: MemoryUsage::FAST_DEVICE_ACCESS,
            })
            .unwrap(),
        sampler: device.create_sampler(SamplerInfo::linear_repeat()).unwrap(),
    };

    let mut untextured = textured_primitive(36, 6);
    untextured.material.normal = None;

    Scene {
        roots: vec![Node::new(glam::Mat4::IDENTITY)
            .with_primitive(textured_primitive(0, 36))
            .with_primitive(untextured)
            .with_child(
                Node::new(glam::Mat4::from_translation(glam::Vec3::Y))
                    .with_primitive(textured_primitive(42, 12)),
            )],
        textures: vec![texture(device), texture(device)],
    }
}

pub fn destroy_scene(device: &MockDevice, scene: Scene) {
    for texture in scene.textures {
        device.destroy_image(texture.image);
        device.destroy_sampler(texture.sampler);
    }
}
