//! Backend implementations

pub mod common;
pub mod cpu;
#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use cpu::{CpuBackend, CpuConfig};
#[cfg(feature = "vulkan")]
pub use vulkan::{VulkanAdapter, VulkanBackend, VulkanConfig};
