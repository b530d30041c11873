//! Untyped buffer state shared by typed buffers and their views

use std::sync::Arc;

use lumen_backends::{BufferFlag, BufferHandle, BufferUsage, CopyRequest, MemoryProperties, Submission};
use parking_lot::{Mutex, MutexGuard};

use crate::device::DeviceShared;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
pub(crate) struct StorageState {
    pub handle: Option<BufferHandle>,
    pub size_bytes: usize,
    pub capacity_bytes: usize,
    readers: usize,
    writer: bool,
}

impl StorageState {
    pub fn is_mapped(&self) -> bool {
        self.writer || self.readers > 0
    }

    pub fn ensure_unmapped(&self, operation: &str) -> Result<()> {
        if self.is_mapped() {
            Err(Error::BufferMapped(format!("cannot {operation} while a mapping is alive")))
        } else {
            Ok(())
        }
    }
}

/// Owner of one backend allocation. Usage, flag, heap and element size are
/// fixed at creation; storage changes only through [`RawBuffer::resize_bytes`].
pub struct RawBuffer {
    pub(crate) device: Arc<DeviceShared>,
    usage: BufferUsage,
    flag: BufferFlag,
    heap_index: usize,
    element_size: usize,
    properties: MemoryProperties,
    state: Mutex<StorageState>,
}

impl RawBuffer {
    pub(crate) fn new(
        device: Arc<DeviceShared>,
        usage: BufferUsage,
        flag: BufferFlag,
        heap_index: usize,
        element_size: usize,
        properties: MemoryProperties,
    ) -> Self {
        Self {
            device,
            usage,
            flag,
            heap_index,
            element_size,
            properties,
            state: Mutex::new(StorageState::default()),
        }
    }

    pub(crate) fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub(crate) fn flag(&self) -> BufferFlag {
        self.flag
    }

    pub(crate) fn heap_index(&self) -> usize {
        self.heap_index
    }

    pub(crate) fn element_size(&self) -> usize {
        self.element_size
    }

    pub(crate) fn properties(&self) -> MemoryProperties {
        self.properties
    }

    pub(crate) fn size_bytes(&self) -> usize {
        self.state.lock().size_bytes
    }

    pub(crate) fn capacity_bytes(&self) -> usize {
        self.state.lock().capacity_bytes
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StorageState> {
        self.state.lock()
    }

    pub(crate) fn same_device(&self, other: &RawBuffer) -> bool {
        Arc::ptr_eq(&self.device, &other.device)
    }

    /// Set the byte size. Growing past capacity allocates new storage,
    /// copies the live prefix and only then releases the old storage. Any
    /// failure leaves size, capacity and contents as they were.
    pub(crate) fn resize_bytes(&self, new_size: usize) -> Result<()> {
        let mut state = self.state.lock();
        state.ensure_unmapped("resize")?;

        if new_size <= state.capacity_bytes {
            state.size_bytes = new_size;
            return Ok(());
        }

        let backend = &self.device.backend;
        let handle = backend.allocate(self.heap_index, new_size)?;

        if let (Some(old), true) = (state.handle, state.size_bytes > 0) {
            let copied = backend
                .copy(CopyRequest {
                    src: old,
                    src_offset: 0,
                    dst: handle,
                    dst_offset: 0,
                    len: state.size_bytes,
                    queue: 0,
                    want_fence: true,
                })
                .and_then(|submission| match submission {
                    Submission::Completed => Ok(()),
                    Submission::Queued(fence) => fence.wait(),
                });
            if let Err(err) = copied {
                self.release(handle);
                return Err(err.into());
            }
        }

        if let Some(old) = state.handle.replace(handle) {
            self.release(old);
        }
        tracing::debug!(
            old_bytes = state.size_bytes,
            new_bytes = new_size,
            heap_index = self.heap_index,
            "buffer storage reallocated"
        );
        state.size_bytes = new_size;
        state.capacity_bytes = new_size;
        Ok(())
    }

    pub(crate) fn clear(&self) {
        self.state.lock().size_bytes = 0;
    }

    pub(crate) fn begin_mapping(state: &mut StorageState, writable: bool) -> Result<()> {
        if state.writer || (writable && state.readers > 0) {
            return Err(Error::BufferMapped("conflicting mapping is alive".to_string()));
        }
        if writable {
            state.writer = true;
        } else {
            state.readers += 1;
        }
        Ok(())
    }

    pub(crate) fn end_mapping(&self, writable: bool) {
        let mut state = self.state.lock();
        if writable {
            state.writer = false;
        } else {
            state.readers = state.readers.saturating_sub(1);
        }
    }

    fn release(&self, handle: BufferHandle) {
        if let Err(err) = self.device.backend.free(handle) {
            tracing::warn!(error = %err, handle = handle.id(), "failed to release buffer storage");
        }
    }
}

impl Drop for RawBuffer {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().handle.take() {
            self.release(handle);
        }
    }
}

/// Lock the storage of several buffers in a consistent order.
///
/// Duplicates are locked once; `index_of` finds a buffer's guard.
pub(crate) struct LockedSet<'a> {
    entries: Vec<(&'a RawBuffer, MutexGuard<'a, StorageState>)>,
}

impl<'a> LockedSet<'a> {
    pub fn lock(buffers: &[&'a RawBuffer]) -> Self {
        let mut unique: Vec<&'a RawBuffer> = buffers.to_vec();
        unique.sort_by_key(|raw| *raw as *const RawBuffer as usize);
        unique.dedup_by(|a, b| std::ptr::eq(*a, *b));
        Self {
            entries: unique.into_iter().map(|raw| (raw, raw.lock())).collect(),
        }
    }

    pub fn state(&self, raw: &RawBuffer) -> Option<&StorageState> {
        self.entries
            .iter()
            .find(|(locked, _)| std::ptr::eq(*locked, raw))
            .map(|(_, guard)| &**guard)
    }

    pub fn ensure_unmapped(&self, operation: &str) -> Result<()> {
        self.entries.iter().try_for_each(|(_, guard)| guard.ensure_unmapped(operation))
    }

    /// Handle of `raw`, which must be part of the set and have storage.
    pub fn handle(&self, raw: &RawBuffer) -> Result<BufferHandle> {
        self.state(raw)
            .and_then(|state| state.handle)
            .ok_or_else(|| Error::InvalidUsage("buffer has no storage; call set_size first".to_string()))
    }
}
