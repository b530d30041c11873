//! Types shared between the runtime and its backends

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::common::HostAllocation;
use crate::kernel::{KernelDefinition, LaunchGeometry};

/// Opaque handle to a backend allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u64);

impl BufferHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Kind of execution backend behind a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Multi-core host execution
    Cpu,
    /// Vulkan compute through wgpu
    Vulkan,
}

impl BackendType {
    pub const ALL: [BackendType; 2] = [BackendType::Cpu, BackendType::Vulkan];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Cpu => "cpu",
            BackendType::Vulkan => "vulkan",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Placement hint for a buffer, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferUsage {
    PreferDevice,
    PreferHost,
}

/// Host access capability of a buffer, fixed at creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferFlag {
    /// No host access; the buffer may be host-invisible.
    None,
    /// Host reads and writes.
    RandomAccessible,
    /// Host write-only streaming.
    SequentialWritable,
}

impl BufferFlag {
    pub fn is_host_readable(&self) -> bool {
        matches!(self, BufferFlag::RandomAccessible)
    }

    pub fn is_host_writable(&self) -> bool {
        matches!(self, BufferFlag::RandomAccessible | BufferFlag::SequentialWritable)
    }
}

/// Memory properties of the heap a buffer was placed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryProperties {
    pub device_local: bool,
    pub host_visible: bool,
    pub host_coherent: bool,
    pub host_cached: bool,
}

/// Byte-level copy between two allocations of the same device
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub src: BufferHandle,
    pub src_offset: usize,
    pub dst: BufferHandle,
    pub dst_offset: usize,
    pub len: usize,
    pub queue: usize,
    pub want_fence: bool,
}

/// Repeat `pattern` over `[offset, offset + len)`; `len` is a multiple of the pattern length.
#[derive(Debug, Clone)]
pub struct FillRequest {
    pub dst: BufferHandle,
    pub offset: usize,
    pub len: usize,
    pub pattern: Vec<u8>,
    pub queue: usize,
    pub want_fence: bool,
}

/// One positional kernel argument as seen by a backend
#[derive(Debug, Clone)]
pub enum DispatchArg {
    Buffer {
        handle: BufferHandle,
        offset: usize,
        len: usize,
    },
    Pod(Vec<u8>),
}

/// Everything a backend needs to run a kernel once
#[derive(Clone)]
pub struct DispatchRequest {
    pub kernel: Arc<KernelDefinition>,
    pub args: Vec<DispatchArg>,
    pub geometry: LaunchGeometry,
    pub queue: usize,
    pub want_fence: bool,
    pub label: Option<String>,
}

impl fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("kernel", &self.kernel.name())
            .field("args", &self.args.len())
            .field("geometry", &self.geometry)
            .field("queue", &self.queue)
            .field("want_fence", &self.want_fence)
            .field("label", &self.label)
            .finish()
    }
}

/// Host view over a byte range of an allocation.
///
/// A direct region aliases the allocation itself; a staged region is a copy
/// that the backend writes back on a committing unmap.
pub struct MappedRegion {
    storage: Arc<HostAllocation>,
    offset: usize,
    len: usize,
    origin: usize,
    staged: bool,
}

impl MappedRegion {
    pub(crate) fn direct(storage: Arc<HostAllocation>, offset: usize, len: usize) -> Self {
        Self {
            storage,
            offset,
            len,
            origin: offset,
            staged: false,
        }
    }

    /// `window` holds the allocation bytes starting at `origin`; the mapped
    /// range is `[offset, offset + len)` of the window.
    #[cfg_attr(not(feature = "vulkan"), allow(dead_code))]
    pub(crate) fn staged(window: HostAllocation, origin: usize, offset: usize, len: usize) -> Self {
        Self {
            storage: Arc::new(window),
            offset,
            len,
            origin,
            staged: true,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_staged(&self) -> bool {
        self.staged
    }

    /// Byte offset in the allocation where the backing storage starts.
    pub fn origin(&self) -> usize {
        self.origin
    }

    #[cfg_attr(not(feature = "vulkan"), allow(dead_code))]
    pub(crate) fn window(&self) -> &HostAllocation {
        &self.storage
    }

    /// # Safety
    ///
    /// No mutable access to the same bytes may happen while the slice is alive.
    pub unsafe fn as_bytes(&self) -> &[u8] {
        self.storage.slice(self.offset, self.len)
    }

    /// # Safety
    ///
    /// The caller must be the only accessor of these bytes while the slice is alive.
    pub unsafe fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.storage.slice_mut(self.offset, self.len)
    }
}

impl fmt::Debug for MappedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedRegion")
            .field("origin", &self.origin)
            .field("offset", &self.offset)
            .field("len", &self.len)
            .field("staged", &self.staged)
            .finish()
    }
}
