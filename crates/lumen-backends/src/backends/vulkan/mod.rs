//! Vulkan backend
//!
//! Built on wgpu restricted to the Vulkan API. Requires the `vulkan` cargo
//! feature.
//!
//! - Heap 0 is device-local memory, heap 1 is host memory. wgpu does not
//!   expose real heaps, so both carry a logical budget.
//! - Host access is staged: mapping reads the range back into a host window
//!   and a committing unmap writes the window back through the queue.
//! - There is one queue. Fences wait on wgpu submission indices.
//! - Copies and fills that are not 4-byte aligned fall back to a staged
//!   host round trip and complete synchronously.

mod memory;
mod pipeline;

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::{
    Backend, BackendType, BufferFlag, BufferHandle, BufferUsage, CopyRequest, DispatchArg, DispatchRequest, FillRequest,
    MappedRegion, MemoryProperties,
};
use crate::device_info::{DeviceInfo, HeapTracker, MemoryHeapInfo};
use crate::error::{BackendError, Result};
use crate::fence::{Fence, FenceSignal, Submission};
use crate::kernel::KernelDefinition;

use memory::{align_down, align_up, is_aligned, read_back, BufferTable, VulkanAllocation};
use pipeline::PipelineCache;

pub const DEFAULT_HEAP_SIZE: u64 = 4 << 30;
pub const DEFAULT_MAX_BUFFER_COUNT: usize = 1 << 20;
/// Work-items per work-group. WGSL kernels declare this shape.
pub const WORK_GROUP_SIZE: u32 = 64;

const DEVICE_HEAP: usize = 0;
const HOST_HEAP: usize = 1;

/// Configuration of a [`VulkanBackend`]. Zero means "use the default".
#[derive(Debug, Clone, Default)]
pub struct VulkanConfig {
    pub device_heap_size: u64,
    pub host_heap_size: u64,
    pub debug: bool,
}

/// An enumerated Vulkan adapter that a backend can be opened on.
pub struct VulkanAdapter {
    adapter: wgpu::Adapter,
    info: DeviceInfo,
}

impl VulkanAdapter {
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }
}

/// Vulkan compute device.
pub struct VulkanBackend {
    info: DeviceInfo,
    config: VulkanConfig,
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: RwLock<BufferTable>,
    heaps: HeapTracker,
    pipelines: PipelineCache,
}

impl VulkanBackend {
    /// List the Vulkan adapters of this machine.
    pub fn enumerate(config: &VulkanConfig) -> Vec<VulkanAdapter> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::VULKAN,
            ..Default::default()
        });

        instance
            .enumerate_adapters(wgpu::Backends::VULKAN)
            .into_iter()
            .filter_map(|adapter| {
                let info = describe(&adapter, config);
                if let Err(err) = check_limits(&adapter.limits()) {
                    tracing::warn!(device = info.name(), error = %err, "skipping Vulkan adapter");
                    return None;
                }
                tracing::debug!(device = info.name(), "found Vulkan adapter");
                Some(VulkanAdapter { adapter, info })
            })
            .collect()
    }

    pub fn new(adapter: &VulkanAdapter, config: VulkanConfig) -> Result<Self> {
        check_limits(&adapter.adapter.limits())?;
        let (device, queue) = pollster::block_on(adapter.adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lumen"),
            required_limits: adapter.adapter.limits(),
            ..Default::default()
        }))
        .map_err(|err| BackendError::DeviceUnavailable(format!("{}: {err}", adapter.info.name())))?;

        let info = describe(&adapter.adapter, &config);
        tracing::info!(device = info.name(), "Vulkan backend initialised");

        Ok(Self {
            heaps: HeapTracker::new(info.heaps()),
            info,
            config,
            device,
            queue,
            buffers: RwLock::new(BufferTable::new()),
            pipelines: PipelineCache::default(),
        })
    }

    fn check_queue(&self, index: usize) -> Result<()> {
        if index == 0 {
            Ok(())
        } else {
            Err(BackendError::InvalidQueue { index, count: 1 })
        }
    }

    fn poll_wait(&self, submission_index: Option<wgpu::SubmissionIndex>) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index,
                timeout: None,
            })
            .map(|_| ())
            .map_err(|err| BackendError::DeviceLost(format!("{err:?}")))
    }

    fn fence_for(&self, submission: wgpu::SubmissionIndex, want_fence: bool) -> Fence {
        if !want_fence {
            return Fence::invalid();
        }
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue.on_submitted_work_done(move || flag.store(true, Ordering::Release));
        Fence::new(Arc::new(SubmissionSignal {
            device: self.device.clone(),
            submission,
            done,
        }))
    }

    /// Run `update` on a host copy of `[offset, offset + len)` and write it back.
    fn staged_update(&self, handle: BufferHandle, offset: usize, len: usize, update: impl FnOnce(&mut [u8])) -> Result<()> {
        let mut region = self.map(handle, offset, len)?;
        // SAFETY: the staged window is private to this call.
        update(unsafe { region.as_bytes_mut() });
        self.unmap(handle, region, true)
    }

    /// Run `build` inside a validation scope; nothing is submitted on error.
    fn validated<T>(&self, kernel: &KernelDefinition, build: impl FnOnce() -> T) -> Result<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let built = build();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(BackendError::InvalidLaunch(format!(
                "kernel `{}` rejected by the device: {err}",
                kernel.name()
            ))),
            None => Ok(built),
        }
    }
}

/// Kernels are compiled for [`WORK_GROUP_SIZE`] invocations along x.
fn check_limits(limits: &wgpu::Limits) -> Result<()> {
    if limits.max_compute_invocations_per_workgroup < WORK_GROUP_SIZE
        || limits.max_compute_workgroup_size_x < WORK_GROUP_SIZE
    {
        return Err(BackendError::DeviceUnavailable(format!(
            "adapter runs at most {} invocations per work-group ({} along x), {WORK_GROUP_SIZE} required",
            limits.max_compute_invocations_per_workgroup, limits.max_compute_workgroup_size_x
        )));
    }
    Ok(())
}

fn describe(adapter: &wgpu::Adapter, config: &VulkanConfig) -> DeviceInfo {
    let limits = adapter.limits();
    let device_heap = match config.device_heap_size {
        0 => DEFAULT_HEAP_SIZE,
        size => size,
    };
    let host_heap = match config.host_heap_size {
        0 => DEFAULT_HEAP_SIZE,
        size => size,
    };
    let max_groups = limits.max_compute_workgroups_per_dimension;

    DeviceInfo {
        backend_type: BackendType::Vulkan,
        name: adapter.get_info().name,
        heaps: vec![MemoryHeapInfo::new(true, device_heap), MemoryHeapInfo::new(false, host_heap)],
        max_allocation_size: limits
            .max_buffer_size
            .min(limits.max_storage_buffer_binding_size as u64),
        max_buffer_count: DEFAULT_MAX_BUFFER_COUNT,
        work_group_size: WORK_GROUP_SIZE,
        max_work_group_count: [max_groups; 3],
    }
}

struct SubmissionSignal {
    device: wgpu::Device,
    submission: wgpu::SubmissionIndex,
    done: Arc<AtomicBool>,
}

impl FenceSignal for SubmissionSignal {
    fn wait(&self) -> Result<()> {
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(self.submission.clone()),
                timeout: None,
            })
            .map(|_| ())
            .map_err(|err| BackendError::DeviceLost(format!("{err:?}")))
    }

    fn is_signaled(&self) -> bool {
        if !self.done.load(Ordering::Acquire) {
            let _ = self.device.poll(wgpu::PollType::Poll);
        }
        self.done.load(Ordering::Acquire)
    }
}

impl Backend for VulkanBackend {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn num_queues(&self) -> usize {
        1
    }

    fn heap_usage(&self, heap_index: usize) -> Option<MemoryHeapInfo> {
        self.heaps.snapshot(heap_index)
    }

    fn select_heap(&self, usage: BufferUsage, flag: BufferFlag) -> Result<usize> {
        match (usage, flag) {
            (BufferUsage::PreferDevice, _) => Ok(DEVICE_HEAP),
            // A host-heap buffer without host access has no purpose.
            (BufferUsage::PreferHost, BufferFlag::None) => {
                Err(BackendError::UnsupportedBufferCombination { usage, flag })
            }
            (BufferUsage::PreferHost, _) => Ok(HOST_HEAP),
        }
    }

    fn memory_properties(&self, heap_index: usize, flag: BufferFlag) -> MemoryProperties {
        if heap_index == DEVICE_HEAP {
            MemoryProperties {
                device_local: true,
                host_visible: flag != BufferFlag::None,
                host_coherent: false,
                host_cached: false,
            }
        } else {
            MemoryProperties {
                device_local: false,
                host_visible: true,
                host_coherent: true,
                host_cached: flag.is_host_readable(),
            }
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

        let mut buffers = self.buffers.write();
        if buffers.len() >= self.info.max_buffer_count {
            return Err(BackendError::BufferCountExceeded(self.info.max_buffer_count));
        }
        let used = self.heaps.reserve(heap_index, requested)?;

        let padded = align_up(size_bytes).max(memory::COPY_ALIGNMENT);
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lumen_buffer"),
            size: padded as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            self.heaps.release(heap_index, requested);
            tracing::warn!(error = %err, size_bytes, "device allocation failed");
            return Err(BackendError::HeapExhausted {
                heap_index,
                requested,
                available: 0,
            });
        }

        let handle = buffers.insert(VulkanAllocation {
            buffer,
            size: size_bytes,
            heap_index,
        });
        lumen_tracing::performance::record_allocation("allocate", heap_index, size_bytes, used);
        Ok(handle)
    }

    fn free(&self, handle: BufferHandle) -> Result<()> {
        let allocation = self.buffers.write().remove(handle)?;
        let used = self.heaps.release(allocation.heap_index, allocation.size as u64);
        lumen_tracing::performance::record_allocation("free", allocation.heap_index, allocation.size, used);
        // Dropping the wgpu buffer defers destruction until submitted work using it is done.
        drop(allocation);
        Ok(())
    }

    fn allocation_size(&self, handle: BufferHandle) -> Result<usize> {
        Ok(self.buffers.read().get(handle)?.size)
    }

    fn map(&self, handle: BufferHandle, offset: usize, len: usize) -> Result<MappedRegion> {
        let buffers = self.buffers.read();
        let allocation = buffers.get(handle)?;
        BackendError::check_range(offset, len, allocation.size)?;

        let origin = align_down(offset);
        let end = align_up(offset + len);
        let window = read_back(&self.device, &self.queue, &allocation.buffer, origin, end - origin)?;
        Ok(MappedRegion::staged(window, origin, offset - origin, len))
    }

    fn unmap(&self, handle: BufferHandle, region: MappedRegion, commit: bool) -> Result<()> {
        let buffers = self.buffers.read();
        let allocation = buffers.get(handle)?;
        if commit && !region.window().is_empty() {
            // SAFETY: the region was handed back by value; nobody else sees the window.
            let bytes = unsafe { region.window().slice(0, region.window().len()) };
            self.queue.write_buffer(&allocation.buffer, region.origin() as u64, bytes);
            self.queue.submit(std::iter::empty());
        }
        Ok(())
    }

    fn copy(&self, request: CopyRequest) -> Result<Submission> {
        self.check_queue(request.queue)?;
        let buffers = self.buffers.read();
        let src = buffers.get(request.src)?;
        let dst = buffers.get(request.dst)?;
        BackendError::check_range(request.src_offset, request.len, src.size)?;
        BackendError::check_range(request.dst_offset, request.len, dst.size)?;
        if request.len == 0 {
            return Ok(Submission::Completed);
        }

        let aligned = is_aligned(request.src_offset) && is_aligned(request.dst_offset) && is_aligned(request.len);
        if !aligned || request.src == request.dst {
            drop(buffers);
            let source = self.map(request.src, request.src_offset, request.len)?;
            // SAFETY: staged window owned by this call.
            let bytes = unsafe { source.as_bytes() }.to_vec();
            self.unmap(request.src, source, false)?;
            self.staged_update(request.dst, request.dst_offset, request.len, |dst| dst.copy_from_slice(&bytes))?;
            return Ok(Submission::Completed);
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("lumen_copy"),
        });
        encoder.copy_buffer_to_buffer(
            &src.buffer,
            request.src_offset as u64,
            &dst.buffer,
            request.dst_offset as u64,
            request.len as u64,
        );
        let submission = self.queue.submit(Some(encoder.finish()));
        Ok(Submission::Queued(self.fence_for(submission, request.want_fence)))
    }

    fn fill(&self, request: FillRequest) -> Result<Submission> {
        self.check_queue(request.queue)?;
        if request.pattern.is_empty() || request.len % request.pattern.len() != 0 {
            return Err(BackendError::InvalidLaunch(format!(
                "fill length {} is not a multiple of the {}-byte pattern",
                request.len,
                request.pattern.len()
            )));
        }
        let buffers = self.buffers.read();
        let dst = buffers.get(request.dst)?;
        BackendError::check_range(request.offset, request.len, dst.size)?;
        if request.len == 0 {
            return Ok(Submission::Completed);
        }

        let repeat = |bytes: &mut [u8]| {
            for chunk in bytes.chunks_exact_mut(request.pattern.len()) {
                chunk.copy_from_slice(&request.pattern);
            }
        };

        if !(is_aligned(request.offset) && is_aligned(request.len)) {
            drop(buffers);
            self.staged_update(request.dst, request.offset, request.len, repeat)?;
            return Ok(Submission::Completed);
        }

        let mut data = vec![0u8; request.len];
        repeat(&mut data);
        self.queue.write_buffer(&dst.buffer, request.offset as u64, &data);
        let submission = self.queue.submit(std::iter::empty());
        Ok(Submission::Queued(self.fence_for(submission, request.want_fence)))
    }

    fn dispatch(&self, request: DispatchRequest) -> Result<Submission> {
        self.check_queue(request.queue)?;
        let cached = self.pipelines.get_or_create(&self.device, &request.kernel)?;
        let geometry = request.geometry;

        let mut params: Vec<u32> = Vec::with_capacity(8);
        params.extend_from_slice(&geometry.global_offset());
        params.push(0);
        params.extend_from_slice(&geometry.work_size());
        params.push(0);
        let mut uniform: Vec<u8> = bytemuck::cast_slice(&params).to_vec();
        for arg in &request.args {
            if let DispatchArg::Pod(bytes) = arg {
                uniform.extend_from_slice(bytes);
                uniform.resize(uniform.len().next_multiple_of(16), 0);
            }
        }

        let params_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("lumen_kernel_params"),
            size: uniform.len() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let buffers = self.buffers.read();
        let storage_alignment = self.device.limits().min_storage_buffer_offset_alignment as usize;
        let mut entries = Vec::with_capacity(request.args.len());
        for arg in &request.args {
            if let DispatchArg::Buffer { handle, offset, len } = arg {
                let allocation = buffers.get(*handle)?;
                BackendError::check_range(*offset, *len, allocation.size)?;
                if offset % storage_alignment != 0 {
                    return Err(BackendError::InvalidLaunch(format!(
                        "buffer argument offset {offset} is not a multiple of {storage_alignment}"
                    )));
                }
                entries.push(wgpu::BindGroupEntry {
                    binding: entries.len() as u32,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &allocation.buffer,
                        offset: *offset as u64,
                        size: NonZeroU64::new(align_up(*len) as u64),
                    }),
                });
            }
        }
        entries.push(wgpu::BindGroupEntry {
            binding: entries.len() as u32,
            resource: params_buffer.as_entire_binding(),
        });

        let bind_group = self.validated(&request.kernel, || {
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: request.label.as_deref(),
                layout: &cached.layout,
                entries: &entries,
            })
        })?;

        let commands = self.validated(&request.kernel, || {
            let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("lumen_dispatch"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: request.label.as_deref(),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&cached.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                let [x, y, z] = geometry.group_count();
                pass.dispatch_workgroups(x, y, z);
            }
            encoder.finish()
        })?;

        self.queue.write_buffer(&params_buffer, 0, &uniform);
        let submission = self.queue.submit(Some(commands));

        if self.config.debug {
            tracing::debug!(
                kernel = request.kernel.name(),
                group_count = ?geometry.group_count(),
                "dispatch submitted"
            );
        }
        Ok(Submission::Queued(self.fence_for(submission, request.want_fence)))
    }

    fn wait_idle(&self) -> Result<()> {
        self.poll_wait(None)
    }
}
