//! # Vulkan
//! Contains the Vulkan context, the suballocating memory allocator and the one-shot command pool
//! used by Thermesh.
//!

#![warn(missing_docs)]

extern crate alloc;

pub use command::{CommandError, CommandPool};
pub use debug::try_name;
pub use error::VkError;
pub use memory::{
    Allocation, AllocationError, AllocatorSettings, AllocatorStats, DEFAULT_POOL_SIZE, FreeError,
    LEGACY_SAFETY_PADDING, MemoryAllocator, PoolBackend, PoolResources, Suballocation,
};
pub use vulkan::{Vulkan, VulkanCreationError, VulkanSettings};

mod command;
mod debug;
mod error;
mod memory;
mod vulkan;
