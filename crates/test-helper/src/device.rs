use alloc::sync::Arc;

use tracing::warn;
use vulkan::{Vulkan, VulkanSettings};

use crate::init_logger;

/// Creates a Vulkan context with validation if available.
///
/// Returns `None` when there is no Vulkan loader or no suitable device, so tests that need a GPU
/// can return early on machines without one.
pub fn try_vulkan() -> Option<Arc<Vulkan>> {
    init_logger();

    match unsafe { Vulkan::new(&VulkanSettings { debug: true }) } {
        Ok(vulkan) => Some(Arc::new(vulkan)),
        Err(e) => {
            warn!("Skipping test that requires a Vulkan device: {e}");
            None
        }
    }
}
