use alloc::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::{VkError, Vulkan, try_name};

mod operations;
mod record;

/// A command pool for recording one-shot command buffers.
///
/// Allocating and freeing command buffers is guarded by the pool's own lock, so each thread can
/// record on its own pool in parallel. Submissions from every pool are serialised by the queue
/// lock of the [`Vulkan`] context.
pub struct CommandPool {
    vulkan: Arc<Vulkan>,
    pool: Mutex<vk::CommandPool>,
    name: String,
}

impl CommandPool {
    /// Creates a command pool on the graphics + compute queue family whose command buffers can be
    /// freed individually.
    pub fn new(vulkan: Arc<Vulkan>, debug_name: &str) -> Result<Self, CommandError> {
        let pool = {
            let create_info = vk::CommandPoolCreateInfo::default()
                .flags(
                    vk::CommandPoolCreateFlags::TRANSIENT
                        | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                )
                .queue_family_index(vulkan.queue_family_index());

            unsafe { vulkan.device().create_command_pool(&create_info, None) }
                .map_err(|e| VkError::new(e, "vkCreateCommandPool"))?
        };

        try_name(&vulkan, pool, debug_name);
        debug!("Created command pool {debug_name}");

        Ok(Self {
            vulkan,
            pool: Mutex::new(pool),
            name: debug_name.to_string(),
        })
    }

    /// The Vulkan context the pool was created on.
    #[inline]
    pub fn vulkan(&self) -> &Arc<Vulkan> {
        &self.vulkan
    }

    /// The debug name of the pool.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        let pool = self.pool.lock();
        unsafe { self.vulkan.device().destroy_command_pool(*pool, None) };
        drop(pool);

        debug!("Destroyed command pool {}", self.name);
    }
}

/// Command pool error variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CommandError {
    /// A Vulkan call returned an error.
    #[error(transparent)]
    VkError(#[from] VkError),

    /// Only `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
    /// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` are supported.
    #[error("Unsupported image layout transition {old:?} -> {new:?}")]
    UnsupportedTransition {
        /// The requested old layout.
        old: vk::ImageLayout,

        /// The requested new layout.
        new: vk::ImageLayout,
    },
}
