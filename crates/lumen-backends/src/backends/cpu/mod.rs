//! CPU backend
//!
//! Runs kernels on the host. Memory is a single host heap with a logical
//! budget; buffers are 64-byte aligned, zeroed allocations.
//!
//! # Execution model
//!
//! - Each queue is an in-order worker thread. Kernel dispatches are queued
//!   and return immediately with a [`Submission::Queued`].
//! - A dispatch splits its work-groups across a shared rayon pool.
//! - Copy, fill and map are host operations: they drain every queue first
//!   and complete before returning.

mod executor;
mod memory;
mod queue;

use std::ptr;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::{
    Backend, BackendType, BufferFlag, BufferHandle, BufferUsage, CopyRequest, DispatchArg, DispatchRequest, FillRequest,
    MappedRegion, MemoryProperties,
};
use crate::backends::common::HostAllocation;
use crate::device_info::{DeviceInfo, HeapTracker, MemoryHeapInfo};
use crate::error::{BackendError, Result};
use crate::fence::{CompletionSignal, Fence, Submission};

use executor::{BoundArg, DispatchJob};
use memory::MemoryManager;
use queue::CpuQueue;

/// Logical budget of the host heap when none is configured (8 GiB).
pub const DEFAULT_HEAP_SIZE: u64 = 8 << 30;
pub const DEFAULT_MAX_BUFFER_COUNT: usize = 1 << 20;
pub const DEFAULT_NUM_QUEUES: usize = 2;
/// Work-items per work-group on the CPU.
pub const WORK_GROUP_SIZE: u32 = 128;

/// Configuration of a [`CpuBackend`]. Zero means "use the default".
#[derive(Debug, Clone, Default)]
pub struct CpuConfig {
    pub name: String,
    pub num_threads: usize,
    pub task_batch_size: usize,
    pub heap_size: u64,
    pub max_buffer_count: usize,
    pub num_queues: usize,
    pub debug: bool,
}

impl CpuConfig {
    fn heap_size(&self) -> u64 {
        match self.heap_size {
            0 => DEFAULT_HEAP_SIZE,
            size => size,
        }
    }

    fn max_buffer_count(&self) -> usize {
        match self.max_buffer_count {
            0 => DEFAULT_MAX_BUFFER_COUNT,
            count => count,
        }
    }

    fn num_queues(&self) -> usize {
        match self.num_queues {
            0 => DEFAULT_NUM_QUEUES,
            count => count,
        }
    }

    fn task_batch_size(&self) -> usize {
        self.task_batch_size.max(1)
    }
}

/// Host execution backend.
pub struct CpuBackend {
    info: DeviceInfo,
    config: CpuConfig,
    memory: RwLock<MemoryManager>,
    heaps: Arc<HeapTracker>,
    queues: Vec<CpuQueue>,
    pool: Arc<ThreadPool>,
}

impl CpuBackend {
    /// Capabilities a backend built from `config` will report.
    pub fn describe(config: &CpuConfig) -> DeviceInfo {
        let heap_size = config.heap_size();
        let name = if config.name.is_empty() {
            "lumen cpu".to_string()
        } else {
            config.name.clone()
        };
        DeviceInfo {
            backend_type: BackendType::Cpu,
            name,
            heaps: vec![MemoryHeapInfo::new(true, heap_size)],
            max_allocation_size: heap_size.min(isize::MAX as u64),
            max_buffer_count: config.max_buffer_count(),
            work_group_size: WORK_GROUP_SIZE,
            max_work_group_count: [u32::MAX; 3],
        }
    }

    pub fn new(config: CpuConfig) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.num_threads)
            .thread_name(|i| format!("lumen-cpu-worker-{i}"))
            .build()
            .map_err(|err| BackendError::DeviceUnavailable(format!("cannot build CPU thread pool: {err}")))?;

        let queues = (0..config.num_queues())
            .map(CpuQueue::new)
            .collect::<Result<Vec<_>>>()?;

        let info = Self::describe(&config);
        tracing::info!(
            device = info.name(),
            threads = pool.current_num_threads(),
            queues = queues.len(),
            heap_bytes = config.heap_size(),
            "CPU backend initialised"
        );

        Ok(Self {
            heaps: Arc::new(HeapTracker::new(info.heaps())),
            info,
            config,
            memory: RwLock::new(MemoryManager::new()),
            queues,
            pool: Arc::new(pool),
        })
    }

    fn queue(&self, index: usize) -> Result<&CpuQueue> {
        self.queues.get(index).ok_or(BackendError::InvalidQueue {
            index,
            count: self.queues.len(),
        })
    }

    fn drain_all(&self) {
        for queue in &self.queues {
            queue.drain();
        }
    }

    fn storage(&self, handle: BufferHandle) -> Result<Arc<HostAllocation>> {
        Ok(Arc::clone(&self.memory.read().get(handle)?.storage))
    }

    fn bind_args(&self, args: &[DispatchArg]) -> Result<Vec<BoundArg>> {
        let memory = self.memory.read();
        args.iter()
            .map(|arg| match arg {
                DispatchArg::Buffer { handle, offset, len } => {
                    let storage = Arc::clone(&memory.get(*handle)?.storage);
                    BackendError::check_range(*offset, *len, storage.len())?;
                    Ok(BoundArg::Buffer {
                        storage,
                        offset: *offset,
                        len: *len,
                    })
                }
                DispatchArg::Pod(bytes) => Ok(BoundArg::Pod(bytes.clone())),
            })
            .collect()
    }
}

impl Backend for CpuBackend {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn num_queues(&self) -> usize {
        self.queues.len()
    }

    fn heap_usage(&self, heap_index: usize) -> Option<MemoryHeapInfo> {
        self.heaps.snapshot(heap_index)
    }

    fn select_heap(&self, _usage: BufferUsage, _flag: BufferFlag) -> Result<usize> {
        Ok(0)
    }

    fn memory_properties(&self, _heap_index: usize, _flag: BufferFlag) -> MemoryProperties {
        MemoryProperties {
            device_local: true,
            host_visible: true,
            host_coherent: true,
            host_cached: true,
        }
    }

    fn allocate(&self, heap_index: usize, size_bytes: usize) -> Result<BufferHandle> {
        let requested = size_bytes as u64;
        if requested > self.info.max_allocation_size {
            return Err(BackendError::AllocationTooLarge {
                requested,
                max: self.info.max_allocation_size,
            });
        }

        let mut memory = self.memory.write();
        if memory.len() >= self.info.max_buffer_count {
            return Err(BackendError::BufferCountExceeded(self.info.max_buffer_count));
        }

        let (charge, used) = self.heaps.charge(heap_index, requested)?;
        let storage = HostAllocation::zeroed(size_bytes)?.charged(charge);
        let handle = memory.insert(storage, heap_index);
        lumen_tracing::performance::record_allocation("allocate", heap_index, size_bytes, used);
        Ok(handle)
    }

    /// Heap usage is credited back once queued work holding the storage
    /// has finished with it.
    fn free(&self, handle: BufferHandle) -> Result<()> {
        let allocation = self.memory.write().remove(handle)?;
        if Arc::strong_count(&allocation.storage) > 1 {
            tracing::trace!(buffer = handle.id(), "freed storage still held by queued work");
        }
        Ok(())
    }

    fn allocation_size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.memory.read().get(handle)?.storage.len())
    }

    fn map(&self, handle: BufferHandle, offset: usize, len: usize) -> Result<MappedRegion> {
        self.drain_all();
        let storage = self.storage(handle)?;
        BackendError::check_range(offset, len, storage.len())?;
        Ok(MappedRegion::direct(storage, offset, len))
    }

    fn unmap(&self, handle: BufferHandle, _region: MappedRegion, _commit: bool) -> Result<()> {
        // Host memory is coherent; writes already landed in place.
        self.memory.read().get(handle).map(|_| ())
    }

    fn copy(&self, request: CopyRequest) -> Result<Submission> {
        self.queue(request.queue)?;
        let src = self.storage(request.src)?;
        let dst = self.storage(request.dst)?;
        BackendError::check_range(request.src_offset, request.len, src.len())?;
        BackendError::check_range(request.dst_offset, request.len, dst.len())?;

        self.drain_all();
        let start = Instant::now();
        // SAFETY: both ranges are in bounds and no queued work is running.
        // `ptr::copy` handles overlap when source and destination coincide.
        unsafe {
            ptr::copy(
                src.as_ptr().add(request.src_offset),
                dst.as_ptr().add(request.dst_offset),
                request.len,
            );
        }
        lumen_tracing::performance::record_transfer("copy", request.len, start.elapsed().as_micros() as u64);
        Ok(Submission::Completed)
    }

    fn fill(&self, request: FillRequest) -> Result<Submission> {
        self.queue(request.queue)?;
        if request.pattern.is_empty() || request.len % request.pattern.len() != 0 {
            return Err(BackendError::InvalidLaunch(format!(
                "fill length {} is not a multiple of the {}-byte pattern",
                request.len,
                request.pattern.len()
            )));
        }
        let dst = self.storage(request.dst)?;
        BackendError::check_range(request.offset, request.len, dst.len())?;

        self.drain_all();
        let start = Instant::now();
        // SAFETY: range checked above; queues are drained.
        let bytes = unsafe { dst.slice_mut(request.offset, request.len) };
        for chunk in bytes.chunks_exact_mut(request.pattern.len()) {
            chunk.copy_from_slice(&request.pattern);
        }
        lumen_tracing::performance::record_transfer("fill", request.len, start.elapsed().as_micros() as u64);
        Ok(Submission::Completed)
    }

    fn dispatch(&self, request: DispatchRequest) -> Result<Submission> {
        let queue = self.queue(request.queue)?;
        let body = request.kernel.cpu_body().cloned().ok_or_else(|| {
            BackendError::Unsupported(format!("kernel `{}` has no CPU implementation", request.kernel.name()))
        })?;
        let args = self.bind_args(&request.args)?;

        if self.config.debug {
            let geometry = &request.geometry;
            tracing::debug!(
                kernel = request.kernel.name(),
                label = request.label.as_deref().unwrap_or(""),
                queue = request.queue,
                work_size = ?geometry.work_size(),
                group_size = ?geometry.group_size(),
                group_count = ?geometry.group_count(),
                "dispatch"
            );
        }

        let signal = request.want_fence.then(CompletionSignal::new);
        let fence = match &signal {
            Some(signal) => Fence::new(signal.clone()),
            None => Fence::invalid(),
        };

        let job = DispatchJob {
            pool: Arc::clone(&self.pool),
            batch: self.config.task_batch_size(),
            kernel: request.kernel,
            body,
            args,
            geometry: request.geometry,
            queue: request.queue,
            debug: self.config.debug,
        };
        queue.submit(Box::new(move || job.run()), signal)?;
        Ok(Submission::Queued(fence))
    }

    fn wait_idle(&self) -> Result<()> {
        let mut first_error = None;
        for queue in &self.queues {
            if let Err(err) = queue.wait_idle() {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for CpuBackend {
    fn drop(&mut self) {
        if let Err(err) = self.wait_idle() {
            tracing::warn!(error = %err, "CPU backend dropped with a failed operation outstanding");
        }
    }
}
