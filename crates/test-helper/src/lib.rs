//! # Test Helper
//! Shared setup for tests that need logging or a Vulkan device.
//!

extern crate alloc;

pub use device::try_vulkan;
pub use logger::init_logger;

mod device;
mod logger;
