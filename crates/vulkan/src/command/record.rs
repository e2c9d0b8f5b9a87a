use core::slice;
use std::time::Instant;

use ash::vk;
use tracing::{trace, warn};
use utilities::display_duration;

use crate::VkError;

use super::{CommandError, CommandPool};

impl CommandPool {
    /// Allocates a primary command buffer from the pool and begins recording it for a single
    /// submission.
    ///
    /// The command buffer must be passed to [`CommandPool::end_commands`] of the same pool and
    /// must not be used after that.
    pub unsafe fn begin_commands(&self) -> Result<vk::CommandBuffer, CommandError> {
        let device = self.vulkan.device();

        let command_buffer = {
            let pool = self.pool.lock();

            let allocate_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(*pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);

            unsafe { device.allocate_command_buffers(&allocate_info) }
                .map_err(|e| VkError::new(e, "vkAllocateCommandBuffers"))?[0]
        };

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(e) = unsafe { device.begin_command_buffer(command_buffer, &begin_info) } {
            unsafe { self.free_command_buffer(command_buffer) };
            return Err(VkError::new(e, "vkBeginCommandBuffer").into());
        }

        Ok(command_buffer)
    }

    /// Ends recording, submits the command buffer, waits for the queue to idle and then frees the
    /// command buffer.
    ///
    /// Submission and the wait happen while holding the queue lock, so no other submission can
    /// interleave with them. If the wait fails after a successful submit the command buffer may
    /// still be pending, so it is left to be freed with the pool.
    pub unsafe fn end_commands(
        &self,
        command_buffer: vk::CommandBuffer,
    ) -> Result<(), CommandError> {
        let Err(error) = (unsafe { self.submit_and_wait(command_buffer) }) else {
            unsafe { self.free_command_buffer(command_buffer) };
            return Ok(());
        };

        if error.may_be_pending() {
            warn!(
                "[{}] Wait after submission failed, keeping {command_buffer:?} until the pool is \
                 destroyed",
                self.name()
            );
        } else {
            unsafe { self.free_command_buffer(command_buffer) };
        }

        Err(error.into_inner())
    }

    /// Records the commands from `record` into a one-shot command buffer, then submits and waits
    /// for them.
    pub unsafe fn onetime_command<F>(&self, record: F) -> Result<(), CommandError>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let command_buffer = unsafe { self.begin_commands()? };

        record(self.vulkan.device(), command_buffer);

        unsafe { self.end_commands(command_buffer) }
    }

    unsafe fn submit_and_wait(&self, command_buffer: vk::CommandBuffer) -> Result<(), SubmitError> {
        let device = self.vulkan.device();

        unsafe { device.end_command_buffer(command_buffer) }
            .map_err(|e| SubmitError::NotSubmitted(VkError::new(e, "vkEndCommandBuffer").into()))?;

        let start = Instant::now();

        self.vulkan.submit_serialized(|queue| {
            let submit_info =
                vk::SubmitInfo::default().command_buffers(slice::from_ref(&command_buffer));

            unsafe { device.queue_submit(queue, slice::from_ref(&submit_info), vk::Fence::null()) }
                .map_err(|e| SubmitError::NotSubmitted(VkError::new(e, "vkQueueSubmit").into()))?;

            unsafe { device.queue_wait_idle(queue) }
                .map_err(|e| SubmitError::MaybePending(VkError::new(e, "vkQueueWaitIdle").into()))
        })?;

        trace!(
            "[{}] One-shot submission took {}",
            self.name(),
            display_duration(start.elapsed())
        );

        Ok(())
    }

    unsafe fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let pool = self.pool.lock();

        unsafe {
            self.vulkan
                .device()
                .free_command_buffers(*pool, slice::from_ref(&command_buffer));
        }
    }
}

/// How a submission failed, decides whether the command buffer can be freed.
#[derive(Debug)]
enum SubmitError {
    /// The queue never received the command buffer.
    NotSubmitted(CommandError),

    /// The command buffer was submitted but the wait for it failed.
    MaybePending(CommandError),
}

impl SubmitError {
    fn may_be_pending(&self) -> bool {
        matches!(self, Self::MaybePending(_))
    }

    fn into_inner(self) -> CommandError {
        match self {
            Self::NotSubmitted(error) | Self::MaybePending(error) => error,
        }
    }
}
