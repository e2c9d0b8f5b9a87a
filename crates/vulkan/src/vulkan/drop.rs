use tracing::debug;

use super::Vulkan;

impl Drop for Vulkan {
    fn drop(&mut self) {
        unsafe {
            drop(self.device_wait_idle());

            debug!(
                "Dropping Vulkan Context after {} submissions, peak in flight: {}",
                self.submission_count(),
                self.peak_submissions_in_flight()
            );

            self.device.destroy_device(None);

            if let Some(debug_utils) = self.debug_utils.as_ref() {
                debug_utils
                    .instance
                    .destroy_debug_utils_messenger(debug_utils.messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}
