//! Devices: queues, heaps and the factories for buffers and kernels

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use lumen_backends::{Backend, BackendError, BackendType, BufferFlag, BufferUsage, DeviceInfo, Fence, KernelInitParams, MemoryHeapInfo};

use crate::buffer::{Buffer, RawBuffer};
use crate::error::Result;
use crate::kernel::Kernel;

pub(crate) struct DeviceShared {
    pub index: usize,
    pub backend: Box<dyn Backend>,
    pub debug: bool,
}

impl DeviceShared {
    pub fn info(&self) -> &DeviceInfo {
        self.backend.info()
    }
}

/// One compute device of a [`Context`](crate::Context).
///
/// Cloning is cheap; all clones refer to the same device, which lives as
/// long as its longest holder (buffers and kernels included).
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl Device {
    pub(crate) fn from_shared(shared: Arc<DeviceShared>) -> Self {
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    /// Index of the device in its context.
    pub fn index(&self) -> usize {
        self.shared.index
    }

    /// Capabilities of the device, with heap usage as of this call.
    pub fn info(&self) -> DeviceInfo {
        self.shared.backend.snapshot()
    }

    pub fn backend_type(&self) -> BackendType {
        self.shared.info().backend_type()
    }

    pub fn num_of_queues(&self) -> usize {
        self.shared.backend.num_queues()
    }

    /// Live usage of heap `heap_index`.
    pub fn memory_heap_info(&self, heap_index: usize) -> Option<MemoryHeapInfo> {
        self.shared.backend.heap_usage(heap_index)
    }

    /// Whether two handles refer to the same device instance.
    pub fn same_device(&self, other: &Device) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Create an empty buffer of `T` placed according to `usage` and `flag`.
    #[tracing::instrument(skip(self), fields(device = self.index(), element_size = std::mem::size_of::<T>()))]
    pub fn create_buffer<T: Pod>(&self, usage: BufferUsage, flag: BufferFlag) -> Result<Buffer<T>> {
        if std::mem::size_of::<T>() == 0 {
            return Err(crate::Error::InvalidUsage("zero-sized element types cannot be stored".to_string()));
        }
        let heap_index = self.shared.backend.select_heap(usage, flag)?;
        let properties = self.shared.backend.memory_properties(heap_index, flag);
        let raw = RawBuffer::new(Arc::clone(&self.shared), usage, flag, heap_index, std::mem::size_of::<T>(), properties);
        tracing::debug!(heap_index, ?usage, ?flag, "buffer created");
        Ok(Buffer::from_raw(raw))
    }

    /// Bind a kernel produced by [`kernel_params!`](crate::kernel_params).
    pub fn create_kernel(&self, params: &KernelInitParams) -> Result<Kernel> {
        let definition = params.definition();
        let runnable = match self.backend_type() {
            BackendType::Cpu => definition.cpu_body().is_some(),
            BackendType::Vulkan => definition.wgsl().is_some(),
        };
        if !runnable {
            return Err(BackendError::Unsupported(format!(
                "kernel `{}` has no {} implementation",
                definition.name(),
                self.backend_type()
            ))
            .into());
        }
        Ok(Kernel::new(self.clone(), Arc::clone(definition)))
    }

    /// Block until all work submitted to this device has finished.
    pub fn wait_for_completion(&self) -> Result<()> {
        Ok(self.shared.backend.wait_idle()?)
    }

    /// Block until the operation behind `fence` has finished.
    pub fn wait_for_completion_fence(&self, fence: &Fence) -> Result<()> {
        Ok(fence.wait()?)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.same_device(other)
    }
}

impl Eq for Device {}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("index", &self.index())
            .field("backend", &self.backend_type())
            .field("name", &self.shared.info().name())
            .finish()
    }
}
