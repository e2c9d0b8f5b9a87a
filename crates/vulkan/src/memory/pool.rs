use core::ptr::NonNull;

use ash::vk;
use tracing::debug;
use utilities::{DebugTime, display_bytes};

use super::{
    AllocationError, PoolBackend, PoolResources,
    block::{BlockList, Fit},
};

/// A single fixed size buffer and its memory, subdivided into blocks.
pub struct MemoryPool {
    resources: PoolResources,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    blocks: BlockList,
}

// The mapped pointer is only handed out, the pool never reads or writes through it.
unsafe impl Send for MemoryPool {}

impl MemoryPool {
    /// Creates the pool's buffer and memory through `backend`.
    pub unsafe fn new(
        backend: &dyn PoolBackend,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self, AllocationError> {
        let _timer = DebugTime::start(format!("Creating {} memory pool", display_bytes(size)));

        let resources = unsafe { backend.create_pool(size, usage, properties)? };

        debug!(
            "Created memory pool of {} ({} of memory) for {usage:?} {properties:?}, mapped: {}",
            display_bytes(size),
            display_bytes(resources.memory_size),
            resources.mapped.is_some()
        );

        Ok(Self {
            resources,
            usage,
            properties,
            blocks: BlockList::new(size),
        })
    }

    /// Destroys the pool's buffer and memory.
    pub unsafe fn destroy(self, backend: &dyn PoolBackend) {
        debug!(
            "Destroying memory pool of {} for {:?} {:?}, {} allocations still live",
            display_bytes(self.size()),
            self.usage,
            self.properties,
            self.blocks.used_count()
        );

        unsafe { backend.destroy_pool(self.resources) };
    }

    /// The pool's buffer.
    #[inline]
    pub fn buffer(&self) -> vk::Buffer {
        self.resources.buffer
    }

    /// The device objects backing the pool.
    #[inline]
    pub fn resources(&self) -> &PoolResources {
        &self.resources
    }

    /// The size of the pool's buffer.
    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.blocks.size()
    }

    /// The pool's blocks.
    #[inline]
    pub fn blocks(&self) -> &BlockList {
        &self.blocks
    }

    /// The smallest free block that holds `size` bytes at `alignment`.
    #[inline]
    pub fn best_fit(&self, size: vk::DeviceSize, alignment: vk::DeviceSize) -> Option<Fit> {
        self.blocks.best_fit(size, alignment)
    }

    /// Marks the range described by `fit` as used.
    #[inline]
    pub fn allocate(&mut self, fit: Fit, size: vk::DeviceSize) -> vk::DeviceSize {
        self.blocks.allocate(fit, size)
    }

    /// Frees the used block at `offset`, returns its size if it existed.
    #[inline]
    pub fn free(&mut self, offset: vk::DeviceSize) -> Option<vk::DeviceSize> {
        self.blocks.free(offset)
    }

    /// Sorts and merges the pool's free blocks.
    #[inline]
    pub fn defragment(&mut self) {
        self.blocks.defragment();
    }

    /// The host pointer to `offset` within the pool, if the pool is mapped and `offset` is in
    /// range.
    pub fn mapped_pointer(&self, offset: vk::DeviceSize) -> Option<NonNull<u8>> {
        let base = self.resources.mapped?;

        if offset >= self.size() {
            return None;
        }

        let offset = usize::try_from(offset).ok()?;

        // SAFETY: offset is within the mapped range of the pool.
        Some(unsafe { base.add(offset) })
    }
}
