//! Backend layer of the lumen compute runtime
//!
//! This crate provides:
//! - **Backend trait**: byte-level buffers, heaps, transfers and dispatch
//! - **CPU backend**: multi-core host execution, always available
//! - **Vulkan backend**: wgpu on Vulkan, behind the `vulkan` feature
//! - **Kernel model**: kernel definitions, work-item geometry and device-side assertions
//! - **Fences**: completion tokens for queued work
//!
//! Typed buffers, views and launch options live one layer up in `lumen-core`.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use lumen_backends::kernel::{KernelDefinition, LaunchGeometry};
//! use lumen_backends::{
//!     Backend, BufferFlag, BufferUsage, CpuBackend, CpuConfig, DispatchArg, DispatchRequest, Submission,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = CpuBackend::new(CpuConfig::default())?;
//! let heap = backend.select_heap(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
//! let buffer = backend.allocate(heap, 64 * 4)?;
//!
//! let double = KernelDefinition::builder("double")
//!     .buffer::<f32>()
//!     .cpu(|item, args| {
//!         let data = args.buffer::<f32>(0)?;
//!         let i = item.global_id(0) as usize;
//!         data.set(i, data.get(i)? * 2.0)
//!     })
//!     .build()?;
//!
//! let geometry = LaunchGeometry::new(1, &[64], &[], backend.info().work_group_size(), backend.info().max_work_group_count())?;
//! let submission = backend.dispatch(DispatchRequest {
//!     kernel: Arc::new(double),
//!     args: vec![DispatchArg::Buffer { handle: buffer, offset: 0, len: 64 * 4 }],
//!     geometry,
//!     queue: 0,
//!     want_fence: true,
//!     label: None,
//! })?;
//! if let Submission::Queued(fence) = submission {
//!     fence.wait()?;
//! }
//! backend.free(buffer)?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod backends;
pub mod device_info;
pub mod error;
pub mod fence;
pub mod kernel;

pub use backend::{
    Backend, BackendType, BufferFlag, BufferHandle, BufferUsage, CopyRequest, DispatchArg, DispatchRequest, FillRequest,
    MappedRegion, MemoryProperties,
};
pub use backends::{CpuBackend, CpuConfig};
#[cfg(feature = "vulkan")]
pub use backends::{VulkanAdapter, VulkanBackend, VulkanConfig};
pub use device_info::{DeviceInfo, HeapUsage, MemoryHeapInfo};
pub use error::{BackendError, Result};
pub use fence::{CompletionSignal, Fence, FenceSignal, Submission};
pub use kernel::{KernelAssertion, KernelDefinition, KernelInitParams, KernelSet};

/// Whether this build can drive `backend_type` at all.
pub fn is_compiled(backend_type: BackendType) -> bool {
    match backend_type {
        BackendType::Cpu => true,
        BackendType::Vulkan => cfg!(feature = "vulkan"),
    }
}
