use crate::{
    buffer::{Buffer, BufferRegion},
    descriptor::{
        CombinedImageSampler, DescriptorSet, DescriptorSetLayout, DescriptorSetLayoutInfo,
        Descriptors, ImageDescriptor, WriteDescriptorSet,
    },
    device::Device,
    error::BindingError,
    image::{Image, Layout},
    scene::Texture,
    structures::AccelerationStructureHandle,
};

pub const TOP_LEVEL_BINDING: u32 = 0;
pub const OUTPUT_IMAGE_BINDING: u32 = 1;
pub const FRAME_UNIFORMS_BINDING: u32 = 2;
pub const LIGHTS_BINDING: u32 = 3;
pub const PRIMITIVES_BINDING: u32 = 4;
pub const TEXTURES_BINDING: u32 = 5;

/// Layout of the single descriptor set used by path tracing programs.
///
/// `max_textures` bounds the variable-count texture array.
pub fn path_tracing_layout_info(max_textures: u32) -> DescriptorSetLayoutInfo {
    DescriptorSetLayoutInfo {
        bindings: crate::descriptor_set_layout_bindings! {
            AccelerationStructure @ 0 for RAYGEN | CLOSEST_HIT;
            StorageImage @ 1 for RAYGEN;
            UniformBuffer @ 2 for RAYGEN | CLOSEST_HIT | MISS;
            UniformBuffer @ 3 for CLOSEST_HIT;
            StorageBuffer @ 4 for CLOSEST_HIT | ANY_HIT;
            CombinedImageSampler(max_textures.max(1)) @ 5 for CLOSEST_HIT | ANY_HIT,
                flags: PARTIALLY_BOUND | VARIABLE_DESCRIPTOR_COUNT;
        },
    }
}

/// Checks that `texture_count` fits into variable binding supported by device.
pub fn validate_texture_count(texture_count: u32, max: u32) -> Result<(), BindingError> {
    if texture_count > max {
        return Err(BindingError::TooManyTextures {
            count: texture_count,
            max,
        });
    }
    Ok(())
}

/// Resources bound to path tracing descriptor set.
#[derive(Clone, Copy, Debug)]
pub struct BoundResources<'a> {
    pub top_level: &'a AccelerationStructureHandle,
    pub output: &'a Image,
    pub frame_uniforms: &'a Buffer,
    pub lights: &'a Buffer,
    pub primitives: &'a Buffer,
    pub textures: &'a [Texture],
}

/// Descriptor set layout and set of the tracer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathTracingBindings {
    pub layout: DescriptorSetLayout,
    pub set: DescriptorSet,
}

impl PathTracingBindings {
    /// Creates layout sized for `texture_count` textures and allocates set.
    #[tracing::instrument(skip(device))]
    pub fn new<D>(device: &D, texture_count: u32) -> Result<Self, BindingError>
    where
        D: Device + ?Sized,
    {
        validate_texture_count(
            texture_count,
            device.properties().max_variable_descriptor_count,
        )?;

        let layout = device
            .create_descriptor_set_layout(path_tracing_layout_info(texture_count))
            .map_err(|source| BindingError::Layout { source })?;

        match device.create_descriptor_set(&layout, texture_count) {
            Ok(set) => Ok(PathTracingBindings { layout, set }),
            Err(source) => {
                device.destroy_descriptor_set_layout(layout);
                Err(BindingError::Allocation {
                    variable_count: texture_count,
                    source,
                })
            }
        }
    }

    /// Writes every binding.
    pub fn write_all<D>(&self, device: &D, resources: &BoundResources<'_>)
    where
        D: Device + ?Sized,
    {
        let accels: Vec<_> = resources.top_level.accel().cloned().into_iter().collect();
        let output = [ImageDescriptor {
            image: resources.output.clone(),
            layout: Layout::General,
        }];
        let frame_uniforms = [BufferRegion::whole(resources.frame_uniforms.clone())];
        let lights = [BufferRegion::whole(resources.lights.clone())];
        let primitives = [BufferRegion::whole(resources.primitives.clone())];
        let textures: Vec<_> = resources
            .textures
            .iter()
            .map(|texture| CombinedImageSampler {
                image: texture.image.clone(),
                layout: Layout::ShaderReadOnlyOptimal,
                sampler: texture.sampler.clone(),
            })
            .collect();

        let mut writes = vec![
            self.write(TOP_LEVEL_BINDING, Descriptors::AccelerationStructure(&accels)),
            self.write(OUTPUT_IMAGE_BINDING, Descriptors::StorageImage(&output)),
            self.write(
                FRAME_UNIFORMS_BINDING,
                Descriptors::UniformBuffer(&frame_uniforms),
            ),
            self.write(LIGHTS_BINDING, Descriptors::UniformBuffer(&lights)),
            self.write(PRIMITIVES_BINDING, Descriptors::StorageBuffer(&primitives)),
            self.write(
                TEXTURES_BINDING,
                Descriptors::CombinedImageSampler(&textures),
            ),
        ];
        writes.retain(|write| !write.descriptors.is_empty());

        device.update_descriptor_sets(&writes);
    }

    /// Points output binding to new image. Used after viewport change.
    pub fn update_output_image<D>(&self, device: &D, output: &Image)
    where
        D: Device + ?Sized,
    {
        let output = [ImageDescriptor {
            image: output.clone(),
            layout: Layout::General,
        }];

        device.update_descriptor_sets(&[
            self.write(OUTPUT_IMAGE_BINDING, Descriptors::StorageImage(&output))
        ]);

        tracing::debug!("Output image binding updated");
    }

    pub fn destroy<D>(self, device: &D)
    where
        D: Device + ?Sized,
    {
        device.destroy_descriptor_set(self.set);
        device.destroy_descriptor_set_layout(self.layout);
    }

    fn write<'a>(&'a self, binding: u32, descriptors: Descriptors<'a>) -> WriteDescriptorSet<'a> {
        WriteDescriptorSet {
            set: &self.set,
            binding,
            element: 0,
            descriptors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DescriptorBindingFlags, DescriptorType, ShaderStageFlags};

    #[test]
    fn layout_declares_six_bindings() {
        let info = path_tracing_layout_info(7);

        assert_eq!(info.bindings.len(), 6);
        assert_eq!(
            info.binding(TOP_LEVEL_BINDING).map(|b| b.ty),
            Some(DescriptorType::AccelerationStructure)
        );
        assert_eq!(
            info.binding(FRAME_UNIFORMS_BINDING).map(|b| b.stages),
            Some(ShaderStageFlags::RAYGEN | ShaderStageFlags::CLOSEST_HIT | ShaderStageFlags::MISS)
        );
        assert_eq!(
            info.binding(PRIMITIVES_BINDING).map(|b| b.ty),
            Some(DescriptorType::StorageBuffer)
        );

        let textures = info.variable_binding().unwrap();
        assert_eq!(textures.binding, TEXTURES_BINDING);
        assert_eq!(textures.count, 7);
        assert!(textures
            .flags
            .contains(DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT));
    }

    #[test]
    fn empty_texture_table_keeps_nonzero_bound() {
        let info = path_tracing_layout_info(0);
        assert_eq!(info.variable_binding().map(|b| b.count), Some(1));
    }

    #[test]
    fn texture_count_is_checked_against_device_limit() {
        assert!(validate_texture_count(0, 16).is_ok());
        assert!(validate_texture_count(16, 16).is_ok());
        assert!(matches!(
            validate_texture_count(17, 16),
            Err(BindingError::TooManyTextures { count: 17, max: 16 })
        ));
    }
}
