use {
    super::{physical::PhysicalDevice, unexpected_result},
    crate::{out_of_host_memory, DeviceError, OutOfMemory},
    ash::vk,
    once_cell::sync::OnceCell,
    smallvec::SmallVec,
    std::{
        ffi::{c_void, CStr},
        fmt::{self, Debug},
    },
};

/// Root object of the Vulkan backend.
pub struct Graphics {
    pub(crate) instance: ash::Instance,
    pub(crate) version: u32,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    _entry: ash::Entry,
}

static GLOBAL_GRAPHICS: OnceCell<Graphics> = OnceCell::new();

impl Debug for Graphics {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        if fmt.alternate() {
            fmt.debug_struct("Graphics")
                .field("instance", &self.instance.handle())
                .field("version", &self.version)
                .field("debug_utils", &self.debug_utils.is_some())
                .finish()
        } else {
            Debug::fmt(&self.instance.handle(), fmt)
        }
    }
}

/// Failure to bring up the Vulkan instance.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error(transparent)]
    Loading {
        #[from]
        source: ash::LoadingError,
    },

    #[error("Vulkan 1.2 is required, found {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    #[error("Instance creation failed")]
    CreateInstance {
        #[from]
        source: vk::Result,
    },
}

impl Graphics {
    /// Loads Vulkan and creates the process-wide instance on first call.
    pub fn get_or_init() -> Result<&'static Graphics, InitError> {
        GLOBAL_GRAPHICS.get_or_try_init(Self::new)
    }

    #[tracing::instrument]
    fn new() -> Result<Self, InitError> {
        let entry = unsafe { ash::Entry::load() }?;

        let version = unsafe { entry.try_enumerate_instance_version() }?
            .unwrap_or(vk::API_VERSION_1_0);

        if version < vk::API_VERSION_1_2 {
            return Err(InitError::UnsupportedVersion {
                major: vk::api_version_major(version),
                minor: vk::api_version_minor(version),
            });
        }

        let mut enable_layers = SmallVec::<[_; 1]>::new();
        if cfg!(debug_assertions) {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }?;
            let validation = c"VK_LAYER_KHRONOS_validation";
            if layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str() == Ok(validation))
            {
                enable_layers.push(validation.as_ptr());
            } else {
                tracing::debug!("Validation layer is not installed");
            }
        }

        // Messenger forwards validation output into `tracing`.
        let debug_utils = cfg!(debug_assertions) && {
            let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }?;
            extensions
                .iter()
                .any(|ext| ext.extension_name_as_c_str() == Ok(ash::ext::debug_utils::NAME))
        };

        let mut enable_exts = SmallVec::<[_; 1]>::new();
        if debug_utils {
            enable_exts.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let application_info = vk::ApplicationInfo::default()
            .engine_name(c"summit")
            .application_name(c"summit")
            .api_version(vk::API_VERSION_1_2);

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::default()
                    .application_info(&application_info)
                    .enabled_layer_names(&enable_layers)
                    .enabled_extension_names(&enable_exts),
                None,
            )
        }?;

        let debug_utils = if debug_utils {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = unsafe {
                loader.create_debug_utils_messenger(
                    &vk::DebugUtilsMessengerCreateInfoEXT::default()
                        .message_severity(
                            vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                                | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
                        )
                        .message_type(
                            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                        )
                        .pfn_user_callback(Some(debug_utils_callback)),
                    None,
                )
            };

            match messenger {
                Ok(messenger) => Some((loader, messenger)),
                Err(err) => {
                    tracing::warn!("Failed to create debug messenger: {}", err);
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            "Instance created. Vulkan {}.{}",
            vk::api_version_major(version),
            vk::api_version_minor(version)
        );

        Ok(Graphics {
            instance,
            version,
            debug_utils,
            _entry: entry,
        })
    }

    #[tracing::instrument]
    pub fn devices(&'static self) -> Result<Vec<PhysicalDevice>, DeviceError> {
        let devices = unsafe { self.instance.enumerate_physical_devices() }.map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY => out_of_host_memory(),
            vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => DeviceError::OutOfMemory {
                source: OutOfMemory,
            },
            vk::Result::ERROR_INITIALIZATION_FAILED => DeviceError::Failed {
                result: err.to_string(),
            },
            _ => unexpected_result(err),
        })?;

        tracing::debug!("{} physical devices found", devices.len());

        Ok(devices
            .into_iter()
            .map(|physical| unsafe { PhysicalDevice::new(self, physical) })
            .collect())
    }
}

unsafe extern "system" fn debug_utils_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    let message = data
        .as_ref()
        .and_then(|data| data.message_as_c_str())
        .map_or_else(Default::default, CStr::to_string_lossy);

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        tracing::error!("{:?} | {}", ty, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        tracing::warn!("{:?} | {}", ty, message);
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        tracing::debug!("{:?} | {}", ty, message);
    } else {
        tracing::trace!("{:?} | {}", ty, message);
    }

    vk::FALSE
}
