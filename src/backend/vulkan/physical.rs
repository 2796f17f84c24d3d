use {
    super::{convert::device_error_from_ash, device::VulkanDevice, graphics::Graphics},
    crate::{out_of_host_memory, DeviceError, DeviceProperties},
    ash::vk,
    smallvec::SmallVec,
    std::{
        ffi::CStr,
        fmt::{self, Debug},
    },
};

/// Extensions ray tracing device must support.
const REQUIRED_EXTENSIONS: [&CStr; 3] = [
    ash::khr::acceleration_structure::NAME,
    ash::khr::ray_tracing_pipeline::NAME,
    ash::khr::deferred_host_operations::NAME,
];

#[derive(Clone, Debug)]
pub(crate) struct Properties {
    pub(crate) v10: vk::PhysicalDeviceProperties,
    pub(crate) rt: vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'static>,
    pub(crate) extensions: Vec<vk::ExtensionProperties>,
    pub(crate) families: Vec<vk::QueueFamilyProperties>,
}

impl Properties {
    pub(crate) fn has_extension(&self, name: &CStr) -> bool {
        self.extensions
            .iter()
            .any(|p| p.extension_name_as_c_str().map_or(false, |n| n == name))
    }

    /// Limits the tracer depends on.
    pub(crate) fn device_properties(&self) -> DeviceProperties {
        let limits = &self.v10.limits;

        DeviceProperties {
            shader_group_handle_size: self.rt.shader_group_handle_size,
            shader_group_handle_alignment: self.rt.shader_group_handle_alignment,
            shader_group_base_alignment: self.rt.shader_group_base_alignment,
            max_ray_recursion_depth: self.rt.max_ray_recursion_depth,
            max_variable_descriptor_count: limits
                .max_per_stage_descriptor_sampled_images
                .min(limits.max_descriptor_set_sampled_images),
        }
    }

    pub(crate) fn name(&self) -> String {
        self.v10
            .device_name_as_c_str()
            .map_or_else(|_| String::from("<unnamed>"), |n| n.to_string_lossy().into_owned())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Features {
    pub(crate) v10: vk::PhysicalDeviceFeatures,
    pub(crate) v12: vk::PhysicalDeviceVulkan12Features<'static>,
    pub(crate) acc: vk::PhysicalDeviceAccelerationStructureFeaturesKHR<'static>,
    pub(crate) rt: vk::PhysicalDeviceRayTracingPipelineFeaturesKHR<'static>,
}

impl Features {
    /// Returns first feature required for path tracing that is not supported.
    pub(crate) fn missing(&self) -> Option<&'static str> {
        let required = [
            ("accelerationStructure", self.acc.acceleration_structure),
            ("rayTracingPipeline", self.rt.ray_tracing_pipeline),
            ("bufferDeviceAddress", self.v12.buffer_device_address),
            ("runtimeDescriptorArray", self.v12.runtime_descriptor_array),
            (
                "shaderSampledImageArrayNonUniformIndexing",
                self.v12.shader_sampled_image_array_non_uniform_indexing,
            ),
            (
                "descriptorBindingPartiallyBound",
                self.v12.descriptor_binding_partially_bound,
            ),
            (
                "descriptorBindingVariableDescriptorCount",
                self.v12.descriptor_binding_variable_descriptor_count,
            ),
        ];

        required
            .iter()
            .find(|(_, supported)| *supported == vk::FALSE)
            .map(|(name, _)| *name)
    }
}

unsafe fn collect_properties_and_features(
    instance: &ash::Instance,
    physical: vk::PhysicalDevice,
) -> Result<(Properties, Features), vk::Result> {
    let extensions = instance.enumerate_device_extension_properties(physical)?;
    let families = instance.get_physical_device_queue_family_properties(physical);

    let has_extension = |name: &CStr| {
        extensions
            .iter()
            .any(|p| p.extension_name_as_c_str().map_or(false, |n| n == name))
    };
    let has_ray_tracing = has_extension(ash::khr::ray_tracing_pipeline::NAME);
    let has_acceleration_structure = has_extension(ash::khr::acceleration_structure::NAME);

    let mut rt_properties = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut properties2 = vk::PhysicalDeviceProperties2::default();
    if has_ray_tracing {
        properties2 = properties2.push_next(&mut rt_properties);
    }
    instance.get_physical_device_properties2(physical, &mut properties2);
    let v10 = properties2.properties;

    let mut v12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut acc = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut rt = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut v12);
    if has_acceleration_structure {
        features2 = features2.push_next(&mut acc);
    }
    if has_ray_tracing {
        features2 = features2.push_next(&mut rt);
    }
    instance.get_physical_device_features2(physical, &mut features2);
    let v10_features = features2.features;

    // Chains point into this stack frame.
    rt_properties.p_next = std::ptr::null_mut();
    v12.p_next = std::ptr::null_mut();
    acc.p_next = std::ptr::null_mut();
    rt.p_next = std::ptr::null_mut();

    Ok((
        Properties {
            v10,
            rt: rt_properties,
            extensions,
            families,
        },
        Features {
            v10: v10_features,
            v12,
            acc,
            rt,
        },
    ))
}

/// Physical device as enumerated by [`Graphics::devices`].
pub struct PhysicalDevice {
    graphics: &'static Graphics,
    physical: vk::PhysicalDevice,
    properties: Properties,
    features: Features,
}

impl Debug for PhysicalDevice {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("PhysicalDevice")
                .field("physical", &self.physical)
                .field("name", &self.properties.name())
                .finish()
        } else {
            Debug::fmt(&self.physical, fmt)
        }
    }
}

impl PhysicalDevice {
    /// # Safety
    ///
    /// `physical` must be enumerated from `graphics` instance.
    pub(crate) unsafe fn new(graphics: &'static Graphics, physical: vk::PhysicalDevice) -> Self {
        let (properties, features) =
            match collect_properties_and_features(&graphics.instance, physical) {
                Ok(collected) => collected,
                Err(vk::Result::ERROR_OUT_OF_HOST_MEMORY) => out_of_host_memory(),
                Err(err) => {
                    tracing::warn!("Failed to query device {:?}: {}", physical, err);
                    (
                        Properties {
                            v10: graphics.instance.get_physical_device_properties(physical),
                            rt: Default::default(),
                            extensions: Vec::new(),
                            families: Vec::new(),
                        },
                        Features::default(),
                    )
                }
            };

        PhysicalDevice {
            graphics,
            physical,
            properties,
            features,
        }
    }

    pub fn name(&self) -> String {
        self.properties.name()
    }

    pub fn is_discrete(&self) -> bool {
        self.properties.v10.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    /// Ray-tracing limits this device would report.
    pub fn properties(&self) -> DeviceProperties {
        self.properties.device_properties()
    }

    /// Checks that device can run the path tracer.
    pub fn check_support(&self) -> Result<(), DeviceError> {
        for &extension in &REQUIRED_EXTENSIONS {
            if !self.properties.has_extension(extension) {
                return Err(DeviceError::Unsupported {
                    feature: extension_feature_name(extension),
                });
            }
        }

        if let Some(feature) = self.features.missing() {
            return Err(DeviceError::Unsupported { feature });
        }

        if self.queue_family().is_none() {
            return Err(DeviceError::Unsupported {
                feature: "graphics and compute queue",
            });
        }

        Ok(())
    }

    fn queue_family(&self) -> Option<u32> {
        let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;

        self.properties
            .families
            .iter()
            .position(|family| family.queue_flags.contains(required) && family.queue_count > 0)
            .map(|index| index as u32)
    }

    /// Creates logical device with ray-tracing extensions and single queue.
    #[tracing::instrument(skip(self), fields(device = %self.name()))]
    pub fn create_device(self) -> Result<VulkanDevice, DeviceError> {
        self.check_support()?;

        let family = match self.queue_family() {
            Some(family) => family,
            None => {
                return Err(DeviceError::Unsupported {
                    feature: "graphics and compute queue",
                })
            }
        };

        let mut enable_exts = SmallVec::<[_; 4]>::new();

        // Pushes extension and asserts it's available.
        let mut push_ext = |name: &'static CStr| {
            assert!(self.properties.has_extension(name));
            tracing::trace!("Pick extension {:?}", name);
            enable_exts.push(name.as_ptr());
        };

        for &extension in &REQUIRED_EXTENSIONS {
            push_ext(extension);
        }

        let supported = &self.features;

        let features10 = vk::PhysicalDeviceFeatures::default()
            .sampler_anisotropy(supported.v10.sampler_anisotropy != 0)
            .shader_int64(supported.v10.shader_int64 != 0);

        let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
            .buffer_device_address(true)
            .runtime_descriptor_array(true)
            .shader_sampled_image_array_non_uniform_indexing(true)
            .descriptor_binding_partially_bound(true)
            .descriptor_binding_variable_descriptor_count(true)
            .descriptor_indexing(supported.v12.descriptor_indexing != 0)
            .scalar_block_layout(supported.v12.scalar_block_layout != 0);

        let mut features_acc =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);

        let mut features_rt =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(family)
            .queue_priorities(&priorities)];

        let result = unsafe {
            self.graphics.instance.create_device(
                self.physical,
                &vk::DeviceCreateInfo::default()
                    .queue_create_infos(&queue_infos)
                    .enabled_extension_names(&enable_exts)
                    .enabled_features(&features10)
                    .push_next(&mut features12)
                    .push_next(&mut features_acc)
                    .push_next(&mut features_rt),
                None,
            )
        };

        let logical = result.map_err(|err| match err {
            vk::Result::ERROR_FEATURE_NOT_PRESENT | vk::Result::ERROR_EXTENSION_NOT_PRESENT => {
                DeviceError::Unsupported {
                    feature: "ray tracing",
                }
            }
            _ => device_error_from_ash(err),
        })?;

        tracing::debug!("Device {:p} created", logical.handle());

        VulkanDevice::new(
            self.graphics,
            logical,
            self.physical,
            &self.properties,
            family,
        )
    }
}

fn extension_feature_name(extension: &CStr) -> &'static str {
    if extension == ash::khr::acceleration_structure::NAME {
        "VK_KHR_acceleration_structure"
    } else if extension == ash::khr::ray_tracing_pipeline::NAME {
        "VK_KHR_ray_tracing_pipeline"
    } else {
        "VK_KHR_deferred_host_operations"
    }
}
