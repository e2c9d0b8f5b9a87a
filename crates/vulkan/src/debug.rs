use alloc::ffi::CString;
use core::ffi::{CStr, c_void};

use ash::vk;
use tracing::{debug, error, info, warn};

use crate::Vulkan;

/// Tries to name a Vulkan object through debug utils, does nothing if debug utils is not enabled
/// or the name could not be applied.
pub fn try_name<H: vk::Handle>(vulkan: &Vulkan, handle: H, name: &str) {
    let Some(debug_utils) = vulkan.debug_utils() else {
        return;
    };

    let Ok(name) = CString::new(name) else {
        return;
    };

    let name_info = vk::DebugUtilsObjectNameInfoEXT::default()
        .object_handle(handle)
        .object_name(&name);

    if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&name_info) } {
        warn!("Failed to name object {name:?}: {e}");
    }
}

/// Forwards validation layer messages to `tracing`.
pub unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let message = unsafe {
        let callback_data = *p_callback_data;
        if callback_data.p_message.is_null() {
            return vk::FALSE;
        }
        CStr::from_ptr(callback_data.p_message).to_string_lossy()
    };

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[{message_type:?}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[{message_type:?}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => info!("[{message_type:?}] {message}"),
        _ => debug!("[{message_type:?}] {message}"),
    }

    vk::FALSE
}
