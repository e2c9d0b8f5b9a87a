use alloc::sync::Arc;
use core::ptr::NonNull;

use ash::vk;

use crate::{AllocationError, VkError, Vulkan, try_name};

/// The device objects backing a single memory pool.
#[derive(Debug, Clone, Copy)]
pub struct PoolResources {
    /// The buffer spanning the whole pool.
    pub buffer: vk::Buffer,

    /// The memory bound to `buffer` at offset 0.
    pub memory: vk::DeviceMemory,

    /// The size of `memory`, may be larger than the buffer.
    pub memory_size: vk::DeviceSize,

    /// The persistent host mapping of `memory`, present for host visible pools.
    pub mapped: Option<NonNull<u8>>,

    /// If host writes to `mapped` are visible to the device without a flush.
    pub coherent: bool,
}

/// Creates and destroys the buffer and memory behind memory pools.
pub trait PoolBackend: Send + Sync {
    /// Creates a buffer of `size` bytes with `usage`, binds it to new memory with `properties`
    /// and maps the memory if it is host visible.
    unsafe fn create_pool(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<PoolResources, AllocationError>;

    /// Destroys the buffer and frees the memory of a pool.
    ///
    /// # Safety
    /// No pending GPU work may reference the pool.
    unsafe fn destroy_pool(&self, resources: PoolResources);

    /// Makes host writes to `size` bytes at `offset` of a mapped, non-coherent pool visible to
    /// the device.
    ///
    /// # Safety
    /// `resources` must belong to a live, mapped pool.
    unsafe fn flush(
        &self,
        resources: &PoolResources,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), AllocationError>;
}

impl PoolBackend for Arc<Vulkan> {
    unsafe fn create_pool(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<PoolResources, AllocationError> {
        let device = self.device();

        let buffer = {
            let create_info = vk::BufferCreateInfo::default()
                .queue_family_indices(self.queue_family_index_as_slice())
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .size(size)
                .usage(usage);

            unsafe { device.create_buffer(&create_info, None) }
                .map_err(|e| VkError::new(e, "vkCreateBuffer"))?
        };

        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let Some(memory_type_index) = self.find_memory_type_index(&requirements, properties)
        else {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(AllocationError::NoSuitableMemoryType { properties });
        };
        let coherent = self
            .memory_type_flags(memory_type_index)
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT);

        let memory = {
            let allocate_info = vk::MemoryAllocateInfo::default()
                .allocation_size(requirements.size)
                .memory_type_index(memory_type_index);

            match unsafe { device.allocate_memory(&allocate_info, None) } {
                Ok(memory) => memory,
                Err(e) => {
                    unsafe { device.destroy_buffer(buffer, None) };
                    return Err(VkError::new(e, "vkAllocateMemory").into());
                }
            }
        };

        let bound_and_mapped = unsafe {
            device
                .bind_buffer_memory(buffer, memory, 0)
                .map_err(|e| VkError::new(e, "vkBindBufferMemory"))
                .and_then(|_| {
                    if !properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
                        return Ok(None);
                    }

                    device
                        .map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
                        .map(|pointer| NonNull::new(pointer.cast::<u8>()))
                        .map_err(|e| VkError::new(e, "vkMapMemory"))
                })
        };

        let mapped = match bound_and_mapped {
            Ok(mapped) => mapped,
            Err(e) => {
                unsafe {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                return Err(e.into());
            }
        };

        try_name(self, buffer, &format!("Memory Pool {usage:?} {properties:?}"));
        try_name(self, memory, &format!("Memory Pool Memory {properties:?}"));

        Ok(PoolResources {
            buffer,
            memory,
            memory_size: requirements.size,
            mapped,
            coherent,
        })
    }

    unsafe fn destroy_pool(&self, resources: PoolResources) {
        unsafe {
            // Freeing the memory also releases the mapping.
            self.device().destroy_buffer(resources.buffer, None);
            self.device().free_memory(resources.memory, None);
        }
    }

    unsafe fn flush(
        &self,
        resources: &PoolResources,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), AllocationError> {
        let atom_size = unsafe {
            self.instance()
                .get_physical_device_properties(self.physical_device())
                .limits
                .non_coherent_atom_size
        }
        .max(1);

        // Flushed ranges must start and end on a multiple of the atom size, or at the end of
        // the memory.
        let start = offset / atom_size * atom_size;
        let end = (offset + size).div_ceil(atom_size) * atom_size;
        let size = if end >= resources.memory_size {
            vk::WHOLE_SIZE
        } else {
            end - start
        };

        let range = vk::MappedMemoryRange::default()
            .memory(resources.memory)
            .offset(start)
            .size(size);

        unsafe { self.device().flush_mapped_memory_ranges(&[range]) }
            .map_err(|e| VkError::new(e, "vkFlushMappedMemoryRanges"))?;

        Ok(())
    }
}
