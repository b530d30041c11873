use std::fmt;
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::ptr::NonNull;
use std::slice::SliceIndex;

use bytemuck::Pod;
use lumen_backends::{BufferFlag, BufferHandle, MappedRegion};

use super::RawBuffer;
use crate::error::{Error, Result};

struct Mapping<'a> {
    raw: &'a RawBuffer,
    handle: BufferHandle,
    region: MappedRegion,
    writable: bool,
}

/// Live host pointer shared by both mapping kinds; releases on drop.
struct Mapped<'a, T: Pod> {
    inner: Option<Mapping<'a>>,
    ptr: NonNull<T>,
    len: usize,
}

impl<'a, T: Pod> Mapped<'a, T> {
    fn new(raw: &'a RawBuffer, writable: bool) -> Result<Self> {
        let flag = raw.flag();
        if !raw.properties().host_visible || flag == BufferFlag::None {
            return Err(Error::NotHostVisible(format!(
                "buffer on heap {} with flag {:?}",
                raw.heap_index(),
                flag
            )));
        }
        if !writable && !flag.is_host_readable() {
            return Err(Error::InvalidUsage(
                "sequential-writable buffers can only be mapped for writing".to_string(),
            ));
        }

        let mut state = raw.lock();
        let len_bytes = state.size_bytes / std::mem::size_of::<T>() * std::mem::size_of::<T>();
        let handle = match state.handle {
            Some(handle) if len_bytes > 0 => handle,
            _ => return Ok(Self::empty()),
        };
        RawBuffer::begin_mapping(&mut state, writable)?;
        drop(state);

        let mut region = match raw.device.backend.map(handle, 0, len_bytes) {
            Ok(region) => region,
            Err(err) => {
                raw.end_mapping(writable);
                return Err(err.into());
            }
        };

        // SAFETY: the region stays alive inside `Mapping` for as long as the
        // pointer is used, and the buffer's mapping state admits either one
        // writer or any number of readers.
        let cast = unsafe {
            if writable {
                bytemuck::try_cast_slice_mut::<u8, T>(region.as_bytes_mut()).map(|s| (s.as_mut_ptr(), s.len()))
            } else {
                bytemuck::try_cast_slice::<u8, T>(region.as_bytes()).map(|s| (s.as_ptr() as *mut T, s.len()))
            }
        };
        let mapping = Mapping {
            raw,
            handle,
            region,
            writable,
        };
        match cast.ok().and_then(|(ptr, len)| NonNull::new(ptr).map(|ptr| (ptr, len))) {
            Some((ptr, len)) => Ok(Self {
                inner: Some(mapping),
                ptr,
                len,
            }),
            None => {
                release(mapping);
                Err(Error::InvalidUsage("mapped bytes are not aligned for the element type".to_string()))
            }
        }
    }

    fn empty() -> Self {
        Self {
            inner: None,
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    fn as_slice(&self) -> &[T] {
        // SAFETY: `ptr` and `len` describe the live region owned by `inner`
        // (or a dangling pointer with `len == 0`).
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// # Safety
    ///
    /// Only for mappings created writable.
    unsafe fn as_mut_slice(&mut self) -> &mut [T] {
        std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len)
    }
}

impl<T: Pod> Drop for Mapped<'_, T> {
    fn drop(&mut self) {
        if let Some(mapping) = self.inner.take() {
            release(mapping);
        }
    }
}

/// Scoped read-write host access to the contents of a buffer or view.
///
/// The mapping covers the whole buffer from element 0. Writes go through
/// [`set`](Self::set), [`as_mut_slice`](Self::as_mut_slice) or `IndexMut`.
/// Dropping the mapping commits them so subsequent device work sees them.
///
/// A default mapping is empty and invalid.
pub struct MappedMemory<'a, T: Pod>(Mapped<'a, T>);

/// Scoped read-only host access; see [`MappedMemory`].
///
/// Writing through it does not compile:
///
/// ```compile_fail
/// # use lumen_core::prelude::*;
/// # fn main() -> lumen_core::Result<()> {
/// let context = Context::new(ContextOptions::default())?;
/// let device = context.query_device(0)?;
/// let buffer = device.create_buffer::<u32>(BufferUsage::PreferHost, BufferFlag::RandomAccessible)?;
/// buffer.set_size(1)?;
/// let mut mapped = buffer.map_memory_read()?;
/// mapped[0] = 1;
/// # Ok(())
/// # }
/// ```
pub struct MappedMemoryRead<'a, T: Pod>(Mapped<'a, T>);

impl<'a, T: Pod> MappedMemory<'a, T> {
    pub(crate) fn new(raw: &'a RawBuffer) -> Result<Self> {
        Mapped::new(raw, true).map(Self)
    }

    /// Number of mapped elements.
    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// False for a default mapping or a mapping of an empty buffer.
    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn as_slice(&self) -> &[T] {
        self.0.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        // SAFETY: built with `writable` set; `&mut self` makes this the only accessor.
        unsafe { self.0.as_mut_slice() }
    }

    /// Store `value` at `index`.
    pub fn set(&mut self, index: usize, value: T) -> Result<()> {
        let len = self.len();
        let slot = self.as_mut_slice().get_mut(index).ok_or(Error::RangeOutOfBounds {
            offset: index,
            size: 1,
            buffer_size: len,
        })?;
        *slot = value;
        Ok(())
    }
}

impl<'a, T: Pod> MappedMemoryRead<'a, T> {
    pub(crate) fn new(raw: &'a RawBuffer) -> Result<Self> {
        Mapped::new(raw, false).map(Self)
    }

    /// Number of mapped elements.
    pub fn len(&self) -> usize {
        self.0.len
    }

    pub fn is_empty(&self) -> bool {
        self.0.len == 0
    }

    /// False for a default mapping or a mapping of an empty buffer.
    pub fn is_valid(&self) -> bool {
        self.0.is_valid()
    }

    pub fn as_slice(&self) -> &[T] {
        self.0.as_slice()
    }
}

impl<T: Pod> Default for MappedMemory<'_, T> {
    fn default() -> Self {
        Self(Mapped::empty())
    }
}

impl<T: Pod> Default for MappedMemoryRead<'_, T> {
    fn default() -> Self {
        Self(Mapped::empty())
    }
}

impl<T: Pod> Deref for MappedMemory<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod> DerefMut for MappedMemory<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

impl<T: Pod> Deref for MappedMemoryRead<'_, T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T: Pod, I: SliceIndex<[T]>> Index<I> for MappedMemory<'_, T> {
    type Output = I::Output;

    fn index(&self, index: I) -> &I::Output {
        &self.as_slice()[index]
    }
}

impl<T: Pod, I: SliceIndex<[T]>> IndexMut<I> for MappedMemory<'_, T> {
    fn index_mut(&mut self, index: I) -> &mut I::Output {
        &mut self.as_mut_slice()[index]
    }
}

impl<T: Pod, I: SliceIndex<[T]>> Index<I> for MappedMemoryRead<'_, T> {
    type Output = I::Output;

    fn index(&self, index: I) -> &I::Output {
        &self.as_slice()[index]
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for MappedMemory<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedMemory")
            .field("valid", &self.is_valid())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Pod + fmt::Debug> fmt::Debug for MappedMemoryRead<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedMemoryRead")
            .field("valid", &self.is_valid())
            .field("len", &self.len())
            .finish()
    }
}

fn release(mapping: Mapping<'_>) {
    let Mapping {
        raw,
        handle,
        region,
        writable,
    } = mapping;
    if let Err(err) = raw.device.backend.unmap(handle, region, writable) {
        tracing::warn!(error = %err, handle = handle.id(), "failed to unmap buffer");
    }
    raw.end_mapping(writable);
}
