use ash::vk;
use thiserror::Error;

/// A Vulkan call returned an error.
#[derive(Debug, Clone, Copy, Error)]
#[error("{call} returned {result:?}")]
pub struct VkError {
    /// The Vulkan entry point that failed, e.g. `vkAllocateMemory`.
    pub call: &'static str,

    /// The result returned by the call.
    pub result: vk::Result,
}

impl VkError {
    /// Wraps a `vk::Result` with the name of the call that produced it.
    #[inline]
    pub fn new(result: vk::Result, call: &'static str) -> Self {
        Self { call, result }
    }
}
