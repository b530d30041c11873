//! Backend trait for buffer management and kernel execution
//!
//! A backend drives one compute device. The runtime layer owns typing,
//! views and option validation; a backend only sees byte ranges, heap
//! indices and prepared dispatches.
//!
//! ```text
//!             lumen-core (Device, Buffer<T>, Kernel)
//!                          │
//!                 Arc<dyn Backend>
//!                          │
//!            ┌─────────────┴─────────────┐
//!            ▼                           ▼
//!      ┌───────────┐              ┌─────────────┐
//!      │    CPU    │              │   Vulkan    │
//!      │  Backend  │              │   Backend   │
//!      └───────────┘              └─────────────┘
//! ```
//!
//! All methods take `&self`; implementations synchronise internally so a
//! device can be shared between threads.

use crate::backend::types::{
    BufferFlag, BufferHandle, BufferUsage, CopyRequest, DispatchRequest, FillRequest, MappedRegion, MemoryProperties,
};
use crate::device_info::{DeviceInfo, MemoryHeapInfo};
use crate::error::Result;
use crate::fence::Submission;

pub trait Backend: Send + Sync {
    /// Static capabilities of the device.
    fn info(&self) -> &DeviceInfo;

    /// Number of independent submission queues.
    fn num_queues(&self) -> usize;

    /// Live snapshot of one heap, or `None` for an unknown index.
    fn heap_usage(&self, heap_index: usize) -> Option<MemoryHeapInfo>;

    /// [`info`](Backend::info) with every heap replaced by its live usage.
    fn snapshot(&self) -> DeviceInfo {
        let static_info = self.info();
        let heaps = (0..static_info.heaps().len())
            .map(|index| self.heap_usage(index).unwrap_or(static_info.heaps()[index]))
            .collect();
        static_info.with_heaps(heaps)
    }

    /// Pick the heap for a buffer with the given placement and host access.
    ///
    /// # Errors
    ///
    /// `UnsupportedBufferCombination` when no heap can satisfy the request.
    fn select_heap(&self, usage: BufferUsage, flag: BufferFlag) -> Result<usize>;

    /// Properties a buffer on `heap_index` with `flag` will have.
    fn memory_properties(&self, heap_index: usize, flag: BufferFlag) -> MemoryProperties;

    /// Reserve `size_bytes` of zeroed storage on `heap_index`.
    ///
    /// Fails without side effects when the request exceeds the allocation
    /// limit, the heap budget, the buffer count limit or host memory.
    fn allocate(&self, heap_index: usize, size_bytes: usize) -> Result<BufferHandle>;

    /// Release an allocation. Work already queued against it still completes.
    fn free(&self, handle: BufferHandle) -> Result<()>;

    /// Size in bytes of a live allocation.
    fn allocation_size(&self, handle: BufferHandle) -> Result<usize>;

    /// Make `[offset, offset + len)` addressable from the host.
    ///
    /// Waits for queued work that may touch the allocation first.
    fn map(&self, handle: BufferHandle, offset: usize, len: usize) -> Result<MappedRegion>;

    /// End a mapping. With `commit` set, host writes become visible to
    /// subsequent device work.
    fn unmap(&self, handle: BufferHandle, region: MappedRegion, commit: bool) -> Result<()>;

    fn copy(&self, request: CopyRequest) -> Result<Submission>;

    fn fill(&self, request: FillRequest) -> Result<Submission>;

    /// Submit a kernel. Argument layout has been validated by the caller;
    /// the backend still checks buffer ranges and queue index.
    fn dispatch(&self, request: DispatchRequest) -> Result<Submission>;

    /// Block until every queue is idle and report the first asynchronous
    /// failure since the previous wait, if any.
    fn wait_idle(&self) -> Result<()>;
}
