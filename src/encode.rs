use crate::{
    accel::AccelerationStructureBuildGeometryInfo,
    buffer::Buffer,
    descriptor::DescriptorSet,
    image::{Extent3d, Image, ImageMemoryBarrier, Layout, Offset3d},
    pipeline::{PipelineLayout, RayTracingPipeline, ShaderBindingTable},
};

/// Copy region between two color images.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct ImageCopy {
    pub src_offset: Offset3d,
    pub dst_offset: Offset3d,
    pub extent: Extent3d,
}

impl ImageCopy {
    pub fn whole(extent: Extent3d) -> Self {
        ImageCopy {
            src_offset: Offset3d::ZERO,
            dst_offset: Offset3d::ZERO,
            extent,
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
#[cfg_attr(feature = "serde-1", derive(serde::Serialize, serde::Deserialize))]
pub struct BufferImageCopy {
    pub buffer_offset: u64,
    pub buffer_row_length: u32,
    pub buffer_image_height: u32,
    pub image_offset: Offset3d,
    pub image_extent: Extent3d,
}

/// Recorded command.
///
/// Commands own the handles they reference so that recorded lists can be
/// inspected and replayed by any [`Device`](crate::Device).
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BindRayTracingPipeline {
        pipeline: RayTracingPipeline,
    },

    BindRayTracingDescriptorSets {
        layout: PipelineLayout,
        first_set: u32,
        sets: Vec<DescriptorSet>,
    },

    BuildAccelerationStructure {
        infos: Vec<AccelerationStructureBuildGeometryInfo>,
    },

    TraceRays {
        shader_binding_table: ShaderBindingTable,
        extent: Extent3d,
    },

    CopyImage {
        src_image: Image,
        src_layout: Layout,
        dst_image: Image,
        dst_layout: Layout,
        regions: Vec<ImageCopy>,
    },

    CopyBufferImage {
        src_buffer: Buffer,
        dst_image: Image,
        dst_layout: Layout,
        regions: Vec<BufferImageCopy>,
    },

    PipelineBarrier {
        images: Vec<ImageMemoryBarrier>,
    },
}

/// Records commands for later submission.
#[derive(Debug, Default)]
pub struct Encoder {
    commands: Vec<Command>,
}

impl Encoder {
    pub fn new() -> Self {
        Encoder::default()
    }

    pub fn bind_ray_tracing_pipeline(&mut self, pipeline: &RayTracingPipeline) {
        self.commands.push(Command::BindRayTracingPipeline {
            pipeline: pipeline.clone(),
        });
    }

    pub fn bind_ray_tracing_descriptor_sets(
        &mut self,
        layout: &PipelineLayout,
        first_set: u32,
        sets: &[&DescriptorSet],
    ) {
        self.commands.push(Command::BindRayTracingDescriptorSets {
            layout: layout.clone(),
            first_set,
            sets: sets.iter().map(|&set| set.clone()).collect(),
        });
    }

    /// Builds acceleration structures.
    pub fn build_acceleration_structure(
        &mut self,
        infos: Vec<AccelerationStructureBuildGeometryInfo>,
    ) {
        if infos.is_empty() {
            return;
        }

        // Checks.
        for (i, info) in infos.iter().enumerate() {
            for (j, other) in infos[..i].iter().enumerate() {
                assert_ne!(
                    other.dst, info.dst,
                    "`infos[{}].dst` and `infos[{}].dst` collision",
                    j, i,
                );
            }
        }

        self.commands
            .push(Command::BuildAccelerationStructure { infos })
    }

    pub fn trace_rays(&mut self, shader_binding_table: &ShaderBindingTable, extent: Extent3d) {
        self.commands.push(Command::TraceRays {
            shader_binding_table: shader_binding_table.clone(),
            extent,
        })
    }

    pub fn copy_image(
        &mut self,
        src_image: &Image,
        src_layout: Layout,
        dst_image: &Image,
        dst_layout: Layout,
        regions: &[ImageCopy],
    ) {
        self.commands.push(Command::CopyImage {
            src_image: src_image.clone(),
            src_layout,
            dst_image: dst_image.clone(),
            dst_layout,
            regions: regions.to_vec(),
        })
    }

    pub fn copy_buffer_to_image(
        &mut self,
        src_buffer: &Buffer,
        dst_image: &Image,
        dst_layout: Layout,
        regions: &[BufferImageCopy],
    ) {
        self.commands.push(Command::CopyBufferImage {
            src_buffer: src_buffer.clone(),
            dst_image: dst_image.clone(),
            dst_layout,
            regions: regions.to_vec(),
        })
    }

    pub fn image_barriers(&mut self, images: Vec<ImageMemoryBarrier>) {
        if images.is_empty() {
            return;
        }

        self.commands.push(Command::PipelineBarrier { images });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Finishes recording. Returned list is ready for submission.
    pub fn finish(self) -> Vec<Command> {
        self.commands
    }
}
