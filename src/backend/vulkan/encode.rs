use {
    super::{
        convert::ToAsh as _,
        device::{color_range, VulkanDevice},
        invalid_handle,
    },
    crate::{
        AccelerationStructureGeometry, Command, Image, IndexData, Layout, MemoryUsage,
        StridedBufferRegion,
    },
    ash::vk,
    smallvec::SmallVec,
};

fn color_layers() -> vk::ImageSubresourceLayers {
    vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn const_address(address: u64) -> vk::DeviceOrHostAddressConstKHR {
    vk::DeviceOrHostAddressConstKHR {
        device_address: address,
    }
}

fn strided_region(region: &Option<StridedBufferRegion>) -> vk::StridedDeviceAddressRegionKHR {
    match region {
        None => vk::StridedDeviceAddressRegionKHR::default(),
        Some(strided) => {
            let address = match strided.region.address() {
                Some(address) => address.get(),
                None => super::null_device_address(),
            };
            vk::StridedDeviceAddressRegionKHR {
                device_address: address,
                stride: strided.stride,
                size: strided.region.size,
            }
        }
    }
}

/// Access and stage for image in `layout`.
/// `None` stands for undefined layout.
fn layout_access(layout: Option<Layout>) -> (vk::AccessFlags, vk::PipelineStageFlags) {
    match layout {
        None => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
        Some(Layout::General) => (
            vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
            vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        ),
        Some(Layout::ShaderReadOnlyOptimal) => (
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        ),
        Some(Layout::TransferSrcOptimal) => (
            vk::AccessFlags::TRANSFER_READ,
            vk::PipelineStageFlags::TRANSFER,
        ),
        Some(Layout::TransferDstOptimal) => (
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TRANSFER,
        ),
        Some(Layout::Present) => (
            vk::AccessFlags::empty(),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        ),
    }
}

/// Images read back by host get host read access on transition to general layout.
fn host_access(image: &Image, new: Layout) -> Option<(vk::AccessFlags, vk::PipelineStageFlags)> {
    if new == Layout::General && image.info().memory.contains(MemoryUsage::DOWNLOAD) {
        Some((vk::AccessFlags::HOST_READ, vk::PipelineStageFlags::HOST))
    } else {
        None
    }
}

impl VulkanDevice {
    fn image_handle(&self, image: &Image) -> vk::Image {
        match self.images.lock().get(image.index()) {
            Some(entry) => entry.handle,
            None => invalid_handle("image", image.index()),
        }
    }

    /// Records `commands` into `cbuf` from the beginning.
    ///
    /// # Safety
    ///
    /// `cbuf` must be in initial state and not used by pending submissions.
    pub(super) unsafe fn record(
        &self,
        cbuf: vk::CommandBuffer,
        commands: &[Command],
    ) -> Result<(), vk::Result> {
        self.logical.begin_command_buffer(
            cbuf,
            &vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT),
        )?;

        for command in commands {
            self.record_command(cbuf, command);
        }

        self.logical.end_command_buffer(cbuf)
    }

    unsafe fn record_command(&self, cbuf: vk::CommandBuffer, command: &Command) {
        match command {
            Command::BindRayTracingPipeline { pipeline } => {
                let handle = match self.pipelines.lock().get(pipeline.index()) {
                    Some(&handle) => handle,
                    None => invalid_handle("pipeline", pipeline.index()),
                };

                self.logical.cmd_bind_pipeline(
                    cbuf,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    handle,
                );
            }

            Command::BindRayTracingDescriptorSets {
                layout,
                first_set,
                sets,
            } => {
                let layout = match self.pipeline_layouts.lock().get(layout.index()) {
                    Some(&handle) => handle,
                    None => invalid_handle("pipeline layout", layout.index()),
                };

                let sets: SmallVec<[_; 4]> = {
                    let handles = self.descriptor_sets.lock();
                    sets.iter()
                        .map(|set| match handles.get(set.index()) {
                            Some(&handle) => handle,
                            None => invalid_handle("descriptor set", set.index()),
                        })
                        .collect()
                };

                self.logical.cmd_bind_descriptor_sets(
                    cbuf,
                    vk::PipelineBindPoint::RAY_TRACING_KHR,
                    layout,
                    *first_set,
                    &sets,
                    &[],
                );
            }

            Command::BuildAccelerationStructure { infos } => {
                let accels = self.acceleration_structures.lock();
                let handle = |accel: &crate::AccelerationStructure| match accels.get(accel.index())
                {
                    Some(&handle) => handle,
                    None => invalid_handle("acceleration structure", accel.index()),
                };

                let geometries: Vec<Vec<_>> = infos
                    .iter()
                    .map(|info| info.geometries.iter().map(geometry_to_ash).collect())
                    .collect();

                let ranges: Vec<Vec<_>> = infos
                    .iter()
                    .map(|info| {
                        info.geometries
                            .iter()
                            .map(|geometry| {
                                let first_vertex = match *geometry {
                                    AccelerationStructureGeometry::Triangles {
                                        first_vertex,
                                        ..
                                    } => first_vertex,
                                    AccelerationStructureGeometry::Instances { .. } => 0,
                                };
                                vk::AccelerationStructureBuildRangeInfoKHR {
                                    primitive_count: geometry.primitive_count(),
                                    primitive_offset: 0,
                                    first_vertex,
                                    transform_offset: 0,
                                }
                            })
                            .collect()
                    })
                    .collect();

                let build_infos: Vec<_> = infos
                    .iter()
                    .zip(&geometries)
                    .map(|(info, geometries)| {
                        let mut build = vk::AccelerationStructureBuildGeometryInfoKHR::default()
                            .ty(info.dst.info().level.to_ash())
                            .flags(info.flags.to_ash())
                            .dst_acceleration_structure(handle(&info.dst))
                            .geometries(geometries)
                            .scratch_data(vk::DeviceOrHostAddressKHR {
                                device_address: info.scratch.get(),
                            });

                        build = match &info.src {
                            Some(src) => build
                                .mode(vk::BuildAccelerationStructureModeKHR::UPDATE)
                                .src_acceleration_structure(handle(src)),
                            None => build.mode(vk::BuildAccelerationStructureModeKHR::BUILD),
                        };
                        build
                    })
                    .collect();

                let range_slices: Vec<&[_]> = ranges.iter().map(Vec::as_slice).collect();

                self.accel
                    .cmd_build_acceleration_structures(cbuf, &build_infos, &range_slices);

                // Following builds and ray tracing read written structures.
                let barrier = vk::MemoryBarrier::default()
                    .src_access_mask(vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR)
                    .dst_access_mask(
                        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR
                            | vk::AccessFlags::SHADER_READ,
                    );

                self.logical.cmd_pipeline_barrier(
                    cbuf,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
                    vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR
                        | vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
                    vk::DependencyFlags::empty(),
                    &[barrier],
                    &[],
                    &[],
                );
            }

            Command::TraceRays {
                shader_binding_table,
                extent,
            } => {
                self.rt.cmd_trace_rays(
                    cbuf,
                    &strided_region(&shader_binding_table.raygen),
                    &strided_region(&shader_binding_table.miss),
                    &strided_region(&shader_binding_table.hit),
                    &strided_region(&shader_binding_table.callable),
                    extent.width,
                    extent.height,
                    extent.depth,
                );
            }

            Command::CopyImage {
                src_image,
                src_layout,
                dst_image,
                dst_layout,
                regions,
            } => {
                let regions: SmallVec<[_; 2]> = regions
                    .iter()
                    .map(|region| vk::ImageCopy {
                        src_subresource: color_layers(),
                        src_offset: region.src_offset.to_ash(),
                        dst_subresource: color_layers(),
                        dst_offset: region.dst_offset.to_ash(),
                        extent: region.extent.to_ash(),
                    })
                    .collect();

                self.logical.cmd_copy_image(
                    cbuf,
                    self.image_handle(src_image),
                    src_layout.to_ash(),
                    self.image_handle(dst_image),
                    dst_layout.to_ash(),
                    &regions,
                );
            }

            Command::CopyBufferImage {
                src_buffer,
                dst_image,
                dst_layout,
                regions,
            } => {
                let buffer = match self.buffers.lock().get(src_buffer.index()) {
                    Some(entry) => entry.handle,
                    None => invalid_handle("buffer", src_buffer.index()),
                };

                let regions: SmallVec<[_; 2]> = regions
                    .iter()
                    .map(|region| vk::BufferImageCopy {
                        buffer_offset: region.buffer_offset,
                        buffer_row_length: region.buffer_row_length,
                        buffer_image_height: region.buffer_image_height,
                        image_subresource: color_layers(),
                        image_offset: region.image_offset.to_ash(),
                        image_extent: region.image_extent.to_ash(),
                    })
                    .collect();

                self.logical.cmd_copy_buffer_to_image(
                    cbuf,
                    buffer,
                    self.image_handle(dst_image),
                    dst_layout.to_ash(),
                    &regions,
                );
            }

            Command::PipelineBarrier { images } => {
                let mut src_stages = vk::PipelineStageFlags::empty();
                let mut dst_stages = vk::PipelineStageFlags::empty();

                let barriers: SmallVec<[_; 4]> = images
                    .iter()
                    .map(|barrier| {
                        let (src_access, src_stage) = layout_access(barrier.old);
                        let (mut dst_access, mut dst_stage) = layout_access(Some(barrier.new));

                        if let Some((access, stage)) = host_access(&barrier.image, barrier.new) {
                            dst_access |= access;
                            dst_stage |= stage;
                        }

                        src_stages |= src_stage;
                        dst_stages |= dst_stage;

                        vk::ImageMemoryBarrier::default()
                            .src_access_mask(src_access)
                            .dst_access_mask(dst_access)
                            .old_layout(barrier.old.to_ash())
                            .new_layout(barrier.new.to_ash())
                            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                            .image(self.image_handle(&barrier.image))
                            .subresource_range(color_range())
                    })
                    .collect();

                if barriers.is_empty() {
                    return;
                }

                self.logical.cmd_pipeline_barrier(
                    cbuf,
                    src_stages,
                    dst_stages,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    &barriers,
                );
            }
        }
    }
}

fn geometry_to_ash(
    geometry: &AccelerationStructureGeometry,
) -> vk::AccelerationStructureGeometryKHR<'static> {
    match *geometry {
        AccelerationStructureGeometry::Triangles {
            flags,
            vertex_format,
            vertex_data,
            vertex_stride,
            vertex_count,
            index_data,
            transform_data,
            ..
        } => {
            let (index_type, index_address) = match index_data {
                None => (vk::IndexType::NONE_KHR, 0),
                Some(IndexData::U16(address)) => (vk::IndexType::UINT16, address.get()),
                Some(IndexData::U32(address)) => (vk::IndexType::UINT32, address.get()),
            };

            let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
                .vertex_format(vertex_format.to_ash())
                .vertex_data(const_address(vertex_data.get()))
                .vertex_stride(vertex_stride)
                .max_vertex(vertex_count.saturating_sub(1))
                .index_type(index_type)
                .index_data(const_address(index_address))
                .transform_data(const_address(transform_data.map_or(0, |a| a.get())));

            vk::AccelerationStructureGeometryKHR::default()
                .flags(flags.to_ash())
                .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        }
        AccelerationStructureGeometry::Instances {
            flags,
            data,
            ..
        } => {
            let instances = vk::AccelerationStructureGeometryInstancesDataKHR::default()
                .array_of_pointers(false)
                .data(const_address(data.get()));

            vk::AccelerationStructureGeometryKHR::default()
                .flags(flags.to_ash())
                .geometry_type(vk::GeometryTypeKHR::INSTANCES)
                .geometry(vk::AccelerationStructureGeometryDataKHR { instances })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_layout_waits_for_nothing() {
        let (access, stage) = layout_access(None);
        assert!(access.is_empty());
        assert_eq!(stage, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn general_layout_is_shader_accessible() {
        let (access, stage) = layout_access(Some(Layout::General));
        assert!(access.contains(vk::AccessFlags::SHADER_WRITE));
        assert_eq!(stage, vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR);
    }

    #[test]
    fn missing_table_region_is_zeroed() {
        let region = strided_region(&None);
        assert_eq!(region.device_address, 0);
        assert_eq!(region.stride, 0);
        assert_eq!(region.size, 0);
    }
}
