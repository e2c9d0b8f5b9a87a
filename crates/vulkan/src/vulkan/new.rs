use core::ffi::c_char;

use ash::{ext, khr, vk};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{VkError, debug::vulkan_debug_callback, try_name};

use super::{DebugUtils, SubmissionTracker, Vulkan};

const VALIDATION_LAYER: &core::ffi::CStr = c"VK_LAYER_KHRONOS_validation";

/// Settings used when creating the Vulkan context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulkanSettings {
    /// Request the validation layer and debug utils. Ignored if they are unavailable.
    pub debug: bool,
}

impl Vulkan {
    /// Creates a new headless Vulkan context targetting Vulkan 1.2.
    pub unsafe fn new(settings: &VulkanSettings) -> Result<Self, Error> {
        let entry = unsafe { ash::Entry::load() }?;

        // If validation is available and debug is wanted, then we should debug.
        let should_debug = settings.debug && {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(|e| VkError::new(e, "vkEnumerateInstanceLayerProperties"))?;

            let has_validation = layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str().unwrap_or(c"") == VALIDATION_LAYER);

            if !has_validation {
                warn!("Debug was requested but the validation layer is not available");
            }

            has_validation
        };

        // Create instance.
        let (instance, supports_portability_enumeration) = {
            let extensions = unsafe { entry.enumerate_instance_extension_properties(None) }
                .map_err(|e| VkError::new(e, "vkEnumerateInstanceExtensionProperties"))?;

            let supports_portability_enumeration = extensions.iter().any(|properties| {
                properties.extension_name_as_c_str().unwrap_or(c"")
                    == khr::portability_enumeration::NAME
            });

            let mut enabled_extensions: Vec<*const c_char> = vec![];
            let mut enabled_layers: Vec<*const c_char> = vec![];

            if supports_portability_enumeration {
                enabled_extensions.push(khr::portability_enumeration::NAME.as_ptr());
            }

            if should_debug {
                enabled_extensions.push(ext::debug_utils::NAME.as_ptr());
                enabled_layers.push(VALIDATION_LAYER.as_ptr());
            }

            let flags = if supports_portability_enumeration {
                vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
            } else {
                vk::InstanceCreateFlags::empty()
            };

            let app_info = vk::ApplicationInfo::default()
                .api_version(vk::API_VERSION_1_2)
                .application_name(c"Thermesh")
                .engine_name(c"Thermesh");

            let create_info = vk::InstanceCreateInfo::default()
                .flags(flags)
                .application_info(&app_info)
                .enabled_layer_names(&enabled_layers)
                .enabled_extension_names(&enabled_extensions);

            let instance = unsafe { entry.create_instance(&create_info, None) }
                .map_err(|e| VkError::new(e, "vkCreateInstance"))?;

            (instance, supports_portability_enumeration)
        };

        // Select a physical device and its graphics + compute queue family.
        let (physical_device, queue_family_index) = {
            unsafe { instance.enumerate_physical_devices() }
                .map_err(|e| VkError::new(e, "vkEnumeratePhysicalDevices"))?
                .into_iter()
                .filter_map(|device| {
                    let queue_properties =
                        unsafe { instance.get_physical_device_queue_family_properties(device) };

                    queue_properties
                        .into_iter()
                        .position(|properties| {
                            properties
                                .queue_flags
                                .contains(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
                        })
                        .map(|index| (device, index as u32))
                })
                .min_by_key(|&(device, _)| {
                    let properties = unsafe { instance.get_physical_device_properties(device) };

                    match properties.device_type {
                        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
                        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
                        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
                        vk::PhysicalDeviceType::CPU => 3,
                        vk::PhysicalDeviceType::OTHER => 4,
                        _ => 5,
                    }
                })
                .ok_or(Error::UnsupportedDevice)?
        };

        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        // Create logical device.
        let device = {
            let mut additional_extensions = vec![];

            // Request portability if the device supports it.
            if supports_portability_enumeration {
                let extensions =
                    unsafe { instance.enumerate_device_extension_properties(physical_device) }
                        .map_err(|e| VkError::new(e, "vkEnumerateDeviceExtensionProperties"))?;

                let supports_portability = extensions.into_iter().any(|properties| {
                    properties.extension_name_as_c_str().unwrap_or(c"")
                        == khr::portability_subset::NAME
                });

                if supports_portability {
                    additional_extensions.push(khr::portability_subset::NAME.as_ptr());
                }
            }

            let queue_priorities = [1.0];
            let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
                .queue_family_index(queue_family_index)
                .queue_priorities(&queue_priorities)];

            let create_info = vk::DeviceCreateInfo::default()
                .queue_create_infos(&queue_create_infos)
                .enabled_extension_names(&additional_extensions);

            unsafe { instance.create_device(physical_device, &create_info, None) }
                .map_err(|e| VkError::new(e, "vkCreateDevice"))?
        };

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        // Create debug utils if we should debug
        let debug_utils = if should_debug {
            let debug_instance = ext::debug_utils::Instance::new(&entry, &instance);

            let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));

            let messenger =
                unsafe { debug_instance.create_debug_utils_messenger(&create_info, None) }
                    .map_err(|e| VkError::new(e, "vkCreateDebugUtilsMessengerEXT"))?;

            Some(DebugUtils {
                device: ext::debug_utils::Device::new(&instance, &device),
                instance: debug_instance,
                messenger,
            })
        } else {
            None
        };

        let vulkan = Self {
            entry,
            instance,
            physical_device,
            device,
            memory_properties,
            queue_family_index,
            queue: Mutex::new(queue),
            debug_utils,
            submissions: SubmissionTracker::default(),
        };

        info!("Created Vulkan Context: {:?}", vulkan);

        // Name objects
        try_name(&vulkan, queue, "Graphics + Compute Queue");
        try_name(&vulkan, vulkan.device.handle(), "Main Device");

        Ok(vulkan)
    }
}

/// Error variants from trying to create the Vulkan Context.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The Vulkan library could not be loaded.
    #[error("Failed to load the Vulkan library:\n{0}")]
    Loading(#[from] ash::LoadingError),

    /// A Vulkan call returned an error.
    #[allow(clippy::enum_variant_names)]
    #[error(transparent)]
    VkError(#[from] VkError),

    /// No Physical Devices have a queue family supporting graphics and compute.
    #[error("No Physical Devices meet the requirements.")]
    UnsupportedDevice,
}
