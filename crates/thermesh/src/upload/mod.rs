//! Staged uploads of scene data into device local memory.

use ash::vk;
use thiserror::Error;
use tracing::warn;
use vulkan::{
    Allocation, AllocationError, CommandError, CommandPool, FreeError, MemoryAllocator, VkError,
};

pub use texture::Texture;
pub use workers::{UploadJob, Uploaded, run_uploads};

mod texture;
mod workers;

const STAGING_PROPERTIES: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
        | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Every device local buffer shares one pool class.
const DEVICE_USAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::from_raw(
    vk::BufferUsageFlags::VERTEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::INDEX_BUFFER.as_raw()
        | vk::BufferUsageFlags::STORAGE_BUFFER.as_raw()
        | vk::BufferUsageFlags::TRANSFER_DST.as_raw(),
);

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Failed to allocate:\n{0}")]
    Allocation(#[from] AllocationError),

    #[error("Failed to free:\n{0}")]
    Free(#[from] FreeError),

    #[error("Failed to submit commands:\n{0}")]
    Command(#[from] CommandError),

    #[error(transparent)]
    VkError(#[from] VkError),

    #[error("No memory type is {0:?}")]
    NoSuitableMemoryType(vk::MemoryPropertyFlags),
}

/// Uploads through one command pool, the allocator may be shared with other uploaders.
pub struct Uploader<'a> {
    allocator: &'a MemoryAllocator,
    pool: &'a CommandPool,
    alignment: vk::DeviceSize,
}

impl<'a> Uploader<'a> {
    pub fn new(allocator: &'a MemoryAllocator, pool: &'a CommandPool) -> Self {
        let vulkan = pool.vulkan();

        let limits = unsafe {
            vulkan
                .instance()
                .get_physical_device_properties(vulkan.physical_device())
        }
        .limits;

        let alignment = limits
            .min_storage_buffer_offset_alignment
            .max(limits.min_uniform_buffer_offset_alignment)
            .max(4);

        Self {
            allocator,
            pool,
            alignment,
        }
    }

    /// Copies `bytes` into a new device local allocation.
    pub fn upload_buffer(&self, bytes: &[u8]) -> Result<Allocation, UploadError> {
        let size = bytes.len() as vk::DeviceSize;
        let staging = self.stage(bytes)?;

        let result = self
            .allocator
            .allocate(
                size,
                DEVICE_USAGE,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
                self.alignment,
            )
            .map_err(UploadError::from)
            .and_then(|allocation| {
                let copy = unsafe {
                    self.pool.copy_buffer(
                        staging.buffer,
                        staging.offset,
                        allocation.buffer,
                        allocation.offset,
                        size,
                    )
                };

                match copy {
                    Ok(()) => Ok(allocation),
                    Err(e) => {
                        self.release(allocation);
                        Err(e.into())
                    }
                }
            });

        self.allocator.free(staging.buffer, staging.offset)?;

        result
    }

    /// Writes `bytes` into a new host visible staging allocation.
    fn stage(&self, bytes: &[u8]) -> Result<Allocation, UploadError> {
        let staging = self.allocator.allocate(
            bytes.len() as vk::DeviceSize,
            vk::BufferUsageFlags::TRANSFER_SRC,
            STAGING_PROPERTIES,
            4,
        )?;

        if let Err(e) = unsafe { self.allocator.write(staging, bytes) } {
            self.release(staging);
            return Err(e.into());
        }

        Ok(staging)
    }

    fn release(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation.buffer, allocation.offset) {
            warn!("Failed to release allocation after an upload error: {e}");
        }
    }
}
