use alloc::sync::Arc;
use core::ptr::NonNull;
use std::collections::HashMap;

use ash::vk;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace, warn};

pub use backend::{PoolBackend, PoolResources};
pub use block::Suballocation;
use pool::MemoryPool;

use crate::{VkError, Vulkan};

mod backend;
mod block;
mod pool;

/// The size of a new pool when the request fits within it, 256MiB.
pub const DEFAULT_POOL_SIZE: vk::DeviceSize = 256 * 1024 * 1024;

/// The padding the allocator used to add to every allocation to hide aliasing between neighbours.
pub const LEGACY_SAFETY_PADDING: vk::DeviceSize = 2048;

/// Settings for the memory allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSettings {
    /// The size of newly created pools, larger requests get a pool of their own size.
    pub default_pool_size: vk::DeviceSize,

    /// Bytes added to the end of every allocation.
    pub safety_padding: vk::DeviceSize,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            default_pool_size: DEFAULT_POOL_SIZE,
            safety_padding: 0,
        }
    }
}

/// A suballocation of a pool's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Allocation {
    /// The pool's buffer, shared with every other allocation from the pool.
    pub buffer: vk::Buffer,

    /// The aligned byte offset of the allocation within `buffer`.
    pub offset: vk::DeviceSize,

    /// The number of bytes reserved, including alignment rounding and padding.
    pub size: vk::DeviceSize,
}

/// A point in time summary of every pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    /// The capacity of all pools.
    pub total_allocated: vk::DeviceSize,

    /// Bytes in used blocks.
    pub used_bytes: vk::DeviceSize,

    /// The number of live allocations.
    pub allocation_count: usize,

    /// The number of pools.
    pub pool_count: usize,
}

/// The usage and memory properties a pool was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PoolClass {
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
}

/// Best fit suballocator over a growing set of pools, keyed by usage and memory properties.
///
/// Every operation takes a single allocator wide lock.
pub struct MemoryAllocator {
    backend: Box<dyn PoolBackend>,
    settings: AllocatorSettings,
    pools: Mutex<HashMap<PoolClass, Vec<MemoryPool>>>,
}

impl MemoryAllocator {
    /// Creates an allocator that creates its pools on the device of `vulkan`.
    pub fn new(vulkan: Arc<Vulkan>, settings: AllocatorSettings) -> Self {
        Self::with_backend(vulkan, settings)
    }

    /// Creates an allocator that creates its pools through `backend`.
    pub fn with_backend<B: PoolBackend + 'static>(
        backend: B,
        settings: AllocatorSettings,
    ) -> Self {
        Self {
            backend: Box::new(backend),
            settings,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// The settings the allocator was created with.
    #[inline]
    pub fn settings(&self) -> AllocatorSettings {
        self.settings
    }

    /// Allocates `size` bytes from a pool with `usage` and `properties`, starting at an offset
    /// aligned to `alignment`.
    ///
    /// The smallest free block that fits is used. A new pool is created if no pool of the class
    /// can hold the request.
    pub fn allocate(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        alignment: vk::DeviceSize,
    ) -> Result<Allocation, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSized);
        }

        let alignment = alignment.max(1);
        if !alignment.is_power_of_two() {
            return Err(AllocationError::InvalidAlignment(alignment));
        }

        let required = size
            .checked_next_multiple_of(alignment)
            .and_then(|size| size.checked_add(self.settings.safety_padding))
            .ok_or(AllocationError::TooLarge(size))?;

        let class = PoolClass { usage, properties };
        let mut pools = self.pools.lock();
        let class_pools = pools.entry(class).or_default();

        let best = class_pools
            .iter()
            .enumerate()
            .filter_map(|(pool_index, pool)| {
                pool.best_fit(required, alignment)
                    .map(|fit| (pool_index, fit))
            })
            .fold(None, |best: Option<(usize, block::Fit)>, candidate| match best {
                Some(best) if best.1.block_size <= candidate.1.block_size => Some(best),
                _ => Some(candidate),
            });

        let (pool_index, fit) = match best {
            Some(best) => best,
            None => {
                let pool_size = self.settings.default_pool_size.max(required);
                let pool = unsafe {
                    MemoryPool::new(self.backend.as_ref(), pool_size, usage, properties)?
                };

                class_pools.push(pool);
                let pool_index = class_pools.len() - 1;

                let fit = class_pools[pool_index]
                    .best_fit(required, alignment)
                    .ok_or(AllocationError::TooLarge(size))?;

                (pool_index, fit)
            }
        };

        let pool = &mut class_pools[pool_index];
        let offset = pool.allocate(fit, required);
        debug_assert!(pool.blocks().is_partition());

        let allocation = Allocation {
            buffer: pool.buffer(),
            offset,
            size: required,
        };

        trace!(
            "Allocated {required} bytes at {offset} in {:?} for {usage:?} {properties:?}",
            allocation.buffer
        );

        Ok(allocation)
    }

    /// Frees the allocation at exactly `offset` in `buffer` and merges the free neighbours.
    ///
    /// Nothing changes if no live allocation starts at `offset`, the mismatch is returned as
    /// [`FreeError::UnknownAllocation`].
    pub fn free(&self, buffer: vk::Buffer, offset: vk::DeviceSize) -> Result<(), FreeError> {
        let mut pools = self.pools.lock();

        let freed = pools
            .values_mut()
            .flatten()
            .find(|pool| pool.buffer() == buffer)
            .and_then(|pool| {
                let size = pool.free(offset)?;
                debug_assert!(pool.blocks().is_partition());
                Some(size)
            });

        match freed {
            Some(size) => {
                trace!("Freed {size} bytes at {offset} in {buffer:?}");
                Ok(())
            }
            None => {
                warn!("Free of unknown allocation at {offset} in {buffer:?}");
                Err(FreeError::UnknownAllocation { buffer, offset })
            }
        }
    }

    /// Sorts the blocks of every pool and merges adjacent free blocks. Live allocations never
    /// move.
    pub fn defragment(&self) {
        let mut pools = self.pools.lock();

        pools
            .values_mut()
            .flatten()
            .for_each(MemoryPool::defragment);
    }

    /// Summarises every pool.
    pub fn stats(&self) -> AllocatorStats {
        let pools = self.pools.lock();

        pools
            .values()
            .flatten()
            .fold(AllocatorStats::default(), |stats, pool| AllocatorStats {
                total_allocated: stats.total_allocated + pool.size(),
                used_bytes: stats.used_bytes + pool.blocks().used_bytes(),
                allocation_count: stats.allocation_count + pool.blocks().used_count(),
                pool_count: stats.pool_count + 1,
            })
    }

    /// The host pointer to `offset` within `buffer`.
    ///
    /// Returns `None` if `buffer` is not a pool buffer, its pool is not host visible, or `offset`
    /// is past the end of the pool.
    pub fn mapped_pointer(
        &self,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) -> Option<NonNull<u8>> {
        let pools = self.pools.lock();

        pools
            .values()
            .flatten()
            .find(|pool| pool.buffer() == buffer)
            .and_then(|pool| pool.mapped_pointer(offset))
    }

    /// Copies `bytes` into a host visible allocation, flushing the written range if the pool's
    /// memory is not host coherent.
    ///
    /// # Safety
    /// No GPU work may be accessing the allocation.
    pub unsafe fn write(
        &self,
        allocation: Allocation,
        bytes: &[u8],
    ) -> Result<(), AllocationError> {
        if bytes.len() as u64 > allocation.size {
            return Err(AllocationError::TooLarge(bytes.len() as u64));
        }

        let pools = self.pools.lock();

        let pool = pools
            .values()
            .flatten()
            .find(|pool| pool.buffer() == allocation.buffer)
            .ok_or(AllocationError::NotHostVisible)?;

        let pointer = pool
            .mapped_pointer(allocation.offset)
            .ok_or(AllocationError::NotHostVisible)?;

        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), pointer.as_ptr(), bytes.len());
        }

        if !pool.resources().coherent && !bytes.is_empty() {
            unsafe {
                self.backend
                    .flush(pool.resources(), allocation.offset, bytes.len() as u64)?;
            }
        }

        Ok(())
    }

    /// A copy of the blocks of the pool owning `buffer`, empty if `buffer` is not a pool buffer.
    pub fn pool_blocks(&self, buffer: vk::Buffer) -> Vec<Suballocation> {
        let pools = self.pools.lock();

        pools
            .values()
            .flatten()
            .find(|pool| pool.buffer() == buffer)
            .map(|pool| pool.blocks().blocks().to_vec())
            .unwrap_or_default()
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        let pools = core::mem::take(self.pools.get_mut());

        debug!(
            "Dropping memory allocator with {} pools",
            pools.values().map(Vec::len).sum::<usize>()
        );

        for pool in pools.into_values().flatten() {
            unsafe { pool.destroy(self.backend.as_ref()) };
        }
    }
}

/// Allocation error variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AllocationError {
    /// A Vulkan call returned an error.
    #[error(transparent)]
    VkError(#[from] VkError),

    /// No memory type supports both the buffer and the requested properties.
    #[error("No memory type supports the buffer with properties {properties:?}")]
    NoSuitableMemoryType {
        /// The requested memory properties.
        properties: vk::MemoryPropertyFlags,
    },

    /// A zero sized allocation was requested.
    #[error("Allocations must not be zero sized")]
    ZeroSized,

    /// The alignment was not a power of two.
    #[error("Alignment {0} is not a power of two")]
    InvalidAlignment(vk::DeviceSize),

    /// The request overflowed once aligned and padded, or did not fit the target.
    #[error("Request of {0} bytes is too large")]
    TooLarge(vk::DeviceSize),

    /// The allocation's pool is not host visible.
    #[error("The allocation is not host visible")]
    NotHostVisible,
}

/// Free error variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FreeError {
    /// No live allocation starts at the offset in the buffer.
    #[error("No live allocation at offset {offset} in {buffer:?}")]
    UnknownAllocation {
        /// The buffer passed to free.
        buffer: vk::Buffer,

        /// The offset passed to free.
        offset: vk::DeviceSize,
    },
}

#[cfg(test)]
mod test {
    use alloc::sync::Arc;
    use core::{
        ptr::NonNull,
        sync::atomic::{AtomicU64, Ordering},
    };
    use std::collections::HashMap;

    use ash::vk::{self, Handle};
    use parking_lot::Mutex;

    use super::{
        AllocationError, AllocatorSettings, FreeError, MemoryAllocator, PoolBackend,
        PoolResources, Suballocation,
    };

    const DEVICE_LOCAL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HOST: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
        vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw()
            | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
    );
    const HOST_VISIBLE: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const STORAGE: vk::BufferUsageFlags = vk::BufferUsageFlags::STORAGE_BUFFER;

    /// Backs pools with host memory, handles are counters.
    #[derive(Default)]
    struct HostBackend {
        next_handle: AtomicU64,
        memory: Mutex<HashMap<u64, Box<[u8]>>>,
        destroyed: AtomicU64,
        flushes: Mutex<Vec<(vk::Buffer, vk::DeviceSize, vk::DeviceSize)>>,
    }

    impl PoolBackend for Arc<HostBackend> {
        unsafe fn create_pool(
            &self,
            size: vk::DeviceSize,
            _usage: vk::BufferUsageFlags,
            properties: vk::MemoryPropertyFlags,
        ) -> Result<PoolResources, AllocationError> {
            let handle = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;

            let mapped = if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
                let mut memory = vec![0u8; size as usize].into_boxed_slice();
                let pointer = NonNull::new(memory.as_mut_ptr());
                self.memory.lock().insert(handle, memory);
                pointer
            } else {
                None
            };

            Ok(PoolResources {
                buffer: vk::Buffer::from_raw(handle),
                memory: vk::DeviceMemory::from_raw(handle),
                memory_size: size,
                mapped,
                coherent: properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT),
            })
        }

        unsafe fn destroy_pool(&self, resources: PoolResources) {
            self.memory.lock().remove(&resources.buffer.as_raw());
            self.destroyed.fetch_add(1, Ordering::Relaxed);
        }

        unsafe fn flush(
            &self,
            resources: &PoolResources,
            offset: vk::DeviceSize,
            size: vk::DeviceSize,
        ) -> Result<(), AllocationError> {
            self.flushes.lock().push((resources.buffer, offset, size));
            Ok(())
        }
    }

    fn allocator(
        default_pool_size: u64,
        safety_padding: u64,
    ) -> (MemoryAllocator, Arc<HostBackend>) {
        let backend = Arc::new(HostBackend::default());
        let allocator = MemoryAllocator::with_backend(
            Arc::clone(&backend),
            AllocatorSettings {
                default_pool_size,
                safety_padding,
            },
        );

        (allocator, backend)
    }

    #[test]
    fn best_fit_across_fragmented_pool() {
        let (allocator, _backend) = allocator(1024, 0);

        let a = allocator.allocate(100, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let _b = allocator.allocate(10, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let c = allocator.allocate(50, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let _d = allocator.allocate(10, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let e = allocator.allocate(30, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let _f = allocator.allocate(824, STORAGE, DEVICE_LOCAL, 1).unwrap();

        allocator.free(a.buffer, a.offset).unwrap();
        allocator.free(c.buffer, c.offset).unwrap();
        allocator.free(e.buffer, e.offset).unwrap();

        let fit = allocator.allocate(40, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!(fit.buffer, c.buffer);
        assert_eq!(fit.offset, c.offset);
        assert_eq!(allocator.stats().pool_count, 1);
    }

    #[test]
    fn best_fit_counts_padding() {
        let (allocator, _backend) = allocator(4096, 16);

        let a = allocator.allocate(100 - 16, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let _b = allocator.allocate(10, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let c = allocator.allocate(50 - 16, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let _d = allocator.allocate(10, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let e = allocator.allocate(30 - 16, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!(a.size, 100);
        assert_eq!(c.size, 50);
        assert_eq!(e.size, 30);

        allocator.free(a.buffer, a.offset).unwrap();
        allocator.free(c.buffer, c.offset).unwrap();
        allocator.free(e.buffer, e.offset).unwrap();

        // 24 bytes + 16 padding needs 40 bytes, only the 50 byte block is the best fit.
        let fit = allocator.allocate(24, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!(fit.offset, c.offset);
        assert_eq!(fit.size, 40);
    }

    #[test]
    fn offsets_are_not_reused_while_live() {
        let (allocator, _backend) = allocator(4096, 0);

        let mut live = vec![];
        for size in [64, 128, 32, 256, 16, 512, 8] {
            let allocation = allocator.allocate(size, STORAGE, DEVICE_LOCAL, 16).unwrap();
            assert!(!live.contains(&(allocation.buffer, allocation.offset)));
            live.push((allocation.buffer, allocation.offset));
        }

        let (buffer, offset) = live.remove(2);
        allocator.free(buffer, offset).unwrap();

        let reused = allocator.allocate(32, STORAGE, DEVICE_LOCAL, 16).unwrap();
        assert_eq!((reused.buffer, reused.offset), (buffer, offset));
        assert!(!live.contains(&(reused.buffer, reused.offset)));
    }

    #[test]
    fn free_merges_adjacent_blocks() {
        let (allocator, _backend) = allocator(1024, 0);

        let a = allocator.allocate(100, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let b = allocator.allocate(100, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let c = allocator.allocate(100, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!([a.offset, b.offset, c.offset], [0, 100, 200]);

        allocator.free(a.buffer, a.offset).unwrap();
        allocator.free(b.buffer, b.offset).unwrap();

        assert_eq!(
            allocator.pool_blocks(a.buffer),
            vec![
                Suballocation {
                    offset: 0,
                    size: 200,
                    is_free: true
                },
                Suballocation {
                    offset: 200,
                    size: 100,
                    is_free: false
                },
                Suballocation {
                    offset: 300,
                    size: 724,
                    is_free: true
                },
            ]
        );
    }

    #[test]
    fn large_request_gets_its_own_pool() {
        let (allocator, _backend) = allocator(1024, 0);

        let allocation = allocator.allocate(4096, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!(allocation.offset, 0);

        let stats = allocator.stats();
        assert_eq!(stats.pool_count, 1);
        assert_eq!(stats.total_allocated, 4096);
        assert_eq!(stats.used_bytes, 4096);
        assert_eq!(stats.allocation_count, 1);
    }

    #[test]
    fn pools_are_separated_by_class() {
        let (allocator, _backend) = allocator(1024, 0);

        let device = allocator.allocate(64, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let host = allocator.allocate(64, STORAGE, HOST, 1).unwrap();
        let vertex = allocator
            .allocate(64, vk::BufferUsageFlags::VERTEX_BUFFER, DEVICE_LOCAL, 1)
            .unwrap();
        let device_again = allocator.allocate(64, STORAGE, DEVICE_LOCAL, 1).unwrap();

        assert_ne!(device.buffer, host.buffer);
        assert_ne!(device.buffer, vertex.buffer);
        assert_eq!(device.buffer, device_again.buffer);
        assert_eq!(allocator.stats().pool_count, 3);
    }

    #[test]
    fn full_pool_grows_class() {
        let (allocator, _backend) = allocator(256, 0);

        let first = allocator.allocate(200, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let second = allocator.allocate(200, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_ne!(first.buffer, second.buffer);

        // The remainder of the first pool is still used for small requests.
        let small = allocator.allocate(56, STORAGE, DEVICE_LOCAL, 1).unwrap();
        assert_eq!(small.buffer, first.buffer);

        let stats = allocator.stats();
        assert_eq!(stats.pool_count, 2);
        assert_eq!(stats.total_allocated, 512);
        assert_eq!(stats.used_bytes, 456);
        assert_eq!(stats.allocation_count, 3);
    }

    #[test]
    fn mapped_pointer_reads_back_writes() {
        let (allocator, _backend) = allocator(1024, 0);

        let _first = allocator.allocate(100, STORAGE, HOST, 1).unwrap();
        let allocation = allocator.allocate(64, STORAGE, HOST, 1).unwrap();

        let data: Vec<u8> = (0..64).collect();
        unsafe { allocator.write(allocation, &data).unwrap() };

        let pointer = allocator
            .mapped_pointer(allocation.buffer, allocation.offset)
            .unwrap();
        let read = unsafe { core::slice::from_raw_parts(pointer.as_ptr(), data.len()) };
        assert_eq!(read, data.as_slice());

        let base = allocator.mapped_pointer(allocation.buffer, 0).unwrap();
        assert_eq!(
            pointer.as_ptr() as usize - base.as_ptr() as usize,
            allocation.offset as usize
        );
    }

    #[test]
    fn non_coherent_writes_are_flushed() {
        let (allocator, backend) = allocator(1024, 0);

        let coherent = allocator.allocate(64, STORAGE, HOST, 1).unwrap();
        unsafe { allocator.write(coherent, &[1; 64]).unwrap() };
        assert!(backend.flushes.lock().is_empty());

        let _first = allocator.allocate(100, STORAGE, HOST_VISIBLE, 1).unwrap();
        let allocation = allocator.allocate(64, STORAGE, HOST_VISIBLE, 1).unwrap();
        unsafe { allocator.write(allocation, &[2; 48]).unwrap() };

        assert_eq!(
            backend.flushes.lock().as_slice(),
            &[(allocation.buffer, allocation.offset, 48)]
        );

        let pointer = allocator
            .mapped_pointer(allocation.buffer, allocation.offset)
            .unwrap();
        let read = unsafe { core::slice::from_raw_parts(pointer.as_ptr(), 48) };
        assert_eq!(read, [2u8; 48].as_slice());
    }

    #[test]
    fn settings_are_kept() {
        let (allocator, _backend) = allocator(2048, 8);

        let settings = allocator.settings();
        assert_eq!(settings.default_pool_size, 2048);
        assert_eq!(settings.safety_padding, 8);
    }

    #[test]
    fn device_local_pool_is_not_mapped() {
        let (allocator, _backend) = allocator(1024, 0);

        let allocation = allocator.allocate(64, STORAGE, DEVICE_LOCAL, 1).unwrap();

        assert!(
            allocator
                .mapped_pointer(allocation.buffer, allocation.offset)
                .is_none()
        );
        assert!(matches!(
            unsafe { allocator.write(allocation, &[1, 2, 3]) },
            Err(AllocationError::NotHostVisible)
        ));
        assert!(
            allocator
                .mapped_pointer(vk::Buffer::from_raw(999), 0)
                .is_none()
        );
    }

    #[test]
    fn unmatched_free_is_reported_without_change() {
        let (allocator, _backend) = allocator(1024, 0);

        let allocation = allocator.allocate(64, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let before = allocator.pool_blocks(allocation.buffer);

        assert!(matches!(
            allocator.free(allocation.buffer, allocation.offset + 1),
            Err(FreeError::UnknownAllocation { .. })
        ));
        assert!(matches!(
            allocator.free(vk::Buffer::from_raw(999), 0),
            Err(FreeError::UnknownAllocation { .. })
        ));
        assert_eq!(allocator.pool_blocks(allocation.buffer), before);

        allocator.free(allocation.buffer, allocation.offset).unwrap();
        assert!(
            allocator
                .free(allocation.buffer, allocation.offset)
                .is_err()
        );
        assert_eq!(allocator.stats().allocation_count, 0);
    }

    #[test]
    fn invalid_requests_are_rejected() {
        let (allocator, _backend) = allocator(1024, 0);

        assert!(matches!(
            allocator.allocate(0, STORAGE, DEVICE_LOCAL, 1),
            Err(AllocationError::ZeroSized)
        ));
        assert!(matches!(
            allocator.allocate(16, STORAGE, DEVICE_LOCAL, 3),
            Err(AllocationError::InvalidAlignment(3))
        ));
        assert!(matches!(
            allocator.allocate(u64::MAX, STORAGE, DEVICE_LOCAL, 16),
            Err(AllocationError::TooLarge(_))
        ));
        assert_eq!(allocator.stats().pool_count, 0);
    }

    #[test]
    fn alignment_is_honoured() {
        let (allocator, _backend) = allocator(4096, 0);

        let _unaligned = allocator.allocate(3, STORAGE, DEVICE_LOCAL, 1).unwrap();
        let aligned = allocator.allocate(10, STORAGE, DEVICE_LOCAL, 256).unwrap();

        assert_eq!(aligned.offset, 256);
        assert_eq!(aligned.size, 256);
    }

    #[test]
    fn defragment_keeps_live_offsets() {
        let (allocator, _backend) = allocator(1024, 0);

        let allocations: Vec<_> = (0..8)
            .map(|_| allocator.allocate(64, STORAGE, DEVICE_LOCAL, 1).unwrap())
            .collect();

        for allocation in allocations.iter().step_by(2) {
            allocator.free(allocation.buffer, allocation.offset).unwrap();
        }

        allocator.defragment();

        for allocation in allocations.iter().skip(1).step_by(2) {
            assert!(allocator
                .pool_blocks(allocation.buffer)
                .contains(&Suballocation {
                    offset: allocation.offset,
                    size: allocation.size,
                    is_free: false
                }));
        }

        for allocation in allocations.iter().skip(1).step_by(2) {
            allocator.free(allocation.buffer, allocation.offset).unwrap();
        }

        assert_eq!(
            allocator.pool_blocks(allocations[0].buffer),
            vec![Suballocation {
                offset: 0,
                size: 1024,
                is_free: true
            }]
        );
    }

    #[test]
    fn drop_destroys_every_pool() {
        let (allocator, backend) = allocator(128, 0);

        for _ in 0..3 {
            allocator.allocate(100, STORAGE, HOST, 1).unwrap();
        }
        assert_eq!(allocator.stats().pool_count, 3);

        drop(allocator);

        assert_eq!(backend.destroyed.load(Ordering::Relaxed), 3);
        assert!(backend.memory.lock().is_empty());
    }

    #[test]
    fn concurrent_allocations_do_not_overlap() {
        let (allocator, _backend) = allocator(64 * 1024, 0);
        let allocator = Arc::new(allocator);

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let allocator = Arc::clone(&allocator);
                std::thread::spawn(move || {
                    (0..64)
                        .map(|_| allocator.allocate(100, STORAGE, DEVICE_LOCAL, 4).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut allocations: Vec<_> = threads
            .into_iter()
            .flat_map(|thread| thread.join().unwrap())
            .collect();
        allocations.sort_by_key(|allocation| (allocation.buffer.as_raw(), allocation.offset));

        for pair in allocations.windows(2) {
            if pair[0].buffer == pair[1].buffer {
                assert!(pair[0].offset + pair[0].size <= pair[1].offset);
            }
        }
        assert_eq!(allocator.stats().allocation_count, 256);
    }
}
