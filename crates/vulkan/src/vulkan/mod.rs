use core::fmt::Debug;

pub use new::{Error as VulkanCreationError, VulkanSettings};
pub(crate) use submission::SubmissionTracker;

use ash::{ext, vk};
use parking_lot::{Mutex, MutexGuard};
use tracing::error;

mod drop;
mod new;
mod submission;

/// The debug utils objects, only present when validation was requested and is available.
pub(crate) struct DebugUtils {
    pub instance: ext::debug_utils::Instance,
    pub device: ext::debug_utils::Device,
    pub messenger: vk::DebugUtilsMessengerEXT,
}

/// The Vulkan Context, contains the core objects for using Vulkan.
///
/// A single queue is created for both graphics and compute work. The queue is only reachable
/// through its mutex, which serialises every submission made by every component.
pub struct Vulkan {
    entry: ash::Entry,
    instance: ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,

    memory_properties: vk::PhysicalDeviceMemoryProperties,

    queue_family_index: u32,
    queue: Mutex<vk::Queue>,

    debug_utils: Option<DebugUtils>,

    submissions: SubmissionTracker,
}

impl Debug for Vulkan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let properties = unsafe {
            self.instance
                .get_physical_device_properties(self.physical_device)
        };

        let api_version = {
            let major = vk::api_version_major(properties.api_version);
            let minor = vk::api_version_minor(properties.api_version);
            let patch = vk::api_version_patch(properties.api_version);

            format!("{major}.{minor}.{patch}")
        };

        let device_name = properties.device_name_as_c_str().unwrap_or(c"Invalid name");

        let instance_version = match unsafe { self.entry.try_enumerate_instance_version() } {
            Ok(Some(version)) => format!(
                "{}.{}",
                vk::api_version_major(version),
                vk::api_version_minor(version)
            ),
            Ok(None) => "1.0".to_string(),
            Err(_) => "unknown".to_string(),
        };

        f.debug_struct("Vulkan")
            .field("device_name", &device_name)
            .field("device_type", &properties.device_type)
            .field("api_version", &api_version)
            .field("instance_version", &instance_version)
            .field("queue_family_index", &self.queue_family_index)
            .field("memory_types", &self.memory_properties.memory_type_count)
            .field("debug", &self.debug_utils.is_some())
            .finish_non_exhaustive()
    }
}

impl Vulkan {
    /// The Vulkan instance.
    #[inline]
    pub fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// The logical device.
    #[inline]
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// The selected physical device.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// The queue family index of the graphics + compute queue.
    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// The queue family index as a slice, for create infos.
    #[inline]
    pub fn queue_family_index_as_slice(&self) -> &[u32] {
        core::slice::from_ref(&self.queue_family_index)
    }

    /// Returns the mutex for the graphics + compute queue.
    ///
    /// The mutex must be held for the whole of any submission and any wait on the queue.
    #[inline]
    pub unsafe fn queue(&self) -> &Mutex<vk::Queue> {
        &self.queue
    }

    /// The debug utils device, if debug utils is enabled.
    #[inline]
    pub(crate) fn debug_utils(&self) -> Option<&ext::debug_utils::Device> {
        self.debug_utils
            .as_ref()
            .map(|debug_utils| &debug_utils.device)
    }

    /// Finds the index of the first memory type that is allowed by `memory_type_bits` and contains
    /// all of the property `flags`.
    pub fn find_memory_type_index(
        &self,
        memory_requirements: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Option<u32> {
        self.memory_properties.memory_types[..self.memory_properties.memory_type_count as usize]
            .iter()
            .enumerate()
            .find(|(index, memory_type)| {
                (1 << index) & memory_requirements.memory_type_bits != 0
                    && memory_type.property_flags.contains(flags)
            })
            .map(|(index, _memory_type)| index as u32)
    }

    /// The property flags of the memory type at `index`, empty if there is no such type.
    pub fn memory_type_flags(&self, index: u32) -> vk::MemoryPropertyFlags {
        self.memory_properties.memory_types[..self.memory_properties.memory_type_count as usize]
            .get(index as usize)
            .map(|memory_type| memory_type.property_flags)
            .unwrap_or_default()
    }

    /// Waits for the device to idle.
    /// Takes and returns a lock on the queue.
    #[must_use]
    pub unsafe fn device_wait_idle(&self) -> MutexGuard<'_, vk::Queue> {
        let lock = self.queue.lock();

        if let Err(error) = unsafe { self.device.device_wait_idle() } {
            error!("Failed to wait for device idle: {error}");
        }

        lock
    }

    /// The number of submissions made to the queue.
    pub fn submission_count(&self) -> u64 {
        self.submissions.count()
    }

    /// The number of submissions that have been submitted and not yet waited on.
    pub fn submissions_in_flight(&self) -> u32 {
        self.submissions.in_flight()
    }

    /// The largest number of submissions that were ever in flight at the same time.
    pub fn peak_submissions_in_flight(&self) -> u32 {
        self.submissions.peak_in_flight()
    }

    /// Runs `submit` with the locked queue, counting it as in flight until it returns.
    pub(crate) fn submit_serialized<R, F>(&self, submit: F) -> R
    where
        F: FnOnce(vk::Queue) -> R,
    {
        submission::submit_serialized(&self.queue, &self.submissions, |queue| submit(*queue))
    }
}
