//! Typed buffers, reinterpreted views and host mappings
//!
//! A [`Buffer<T>`] owns device storage. A [`ReinterpBuffer<U>`] borrows a
//! buffer (or another view) and presents the same bytes as elements of `U`.
//! Every capability query on a view resolves to the owning buffer.
//!
//! ```text
//!  Buffer<u32> ──reinterp::<u8>()──▶ ReinterpBuffer<u8> ──reinterp::<u16>()──▶ ReinterpBuffer<u16>
//!       ▲                                  │ parent                               │ parent
//!       └──────────────── own ─────────────┴──────────────────────────────────────┘
//! ```

mod mapped;
mod ops;
mod raw;
mod reinterp;

use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;
use lumen_backends::{BackendError, BackendType, BufferFlag, BufferUsage, MemoryProperties};

use crate::device::Device;
use crate::error::{Error, Result};
use crate::launch::{BufferLaunchOptions, LaunchResult};

pub use mapped::{MappedMemory, MappedMemoryRead};
pub use ops::copy;
pub(crate) use raw::{LockedSet, RawBuffer};
pub use reinterp::ReinterpBuffer;

mod sealed {
    pub trait Sealed {
        fn raw_buffer(&self) -> &super::RawBuffer;
    }
}

/// Queries shared by buffers and views. Sizes are in the implementor's
/// element type; everything else comes from the owning buffer.
pub trait BufferCommon: sealed::Sealed {
    /// Size of one element of this buffer or view in bytes.
    fn element_size(&self) -> usize;

    fn size(&self) -> usize {
        self.size_in_bytes() / self.element_size()
    }

    fn size_in_bytes(&self) -> usize {
        self.raw_buffer().size_bytes()
    }

    fn capacity(&self) -> usize {
        self.capacity_in_bytes() / self.element_size()
    }

    fn capacity_in_bytes(&self) -> usize {
        self.raw_buffer().capacity_bytes()
    }

    fn usage(&self) -> BufferUsage {
        self.raw_buffer().usage()
    }

    fn flag(&self) -> BufferFlag {
        self.raw_buffer().flag()
    }

    fn heap_index(&self) -> usize {
        self.raw_buffer().heap_index()
    }

    fn memory_properties(&self) -> MemoryProperties {
        self.raw_buffer().properties()
    }

    fn is_device_local(&self) -> bool {
        self.memory_properties().device_local
    }

    fn is_host_visible(&self) -> bool {
        self.memory_properties().host_visible
    }

    fn is_host_coherent(&self) -> bool {
        self.memory_properties().host_coherent
    }

    fn is_host_cached(&self) -> bool {
        self.memory_properties().host_cached
    }

    fn is_host_readable(&self) -> bool {
        self.is_host_visible() && self.flag().is_host_readable()
    }

    fn is_host_writable(&self) -> bool {
        self.is_host_visible() && self.flag().is_host_writable()
    }

    fn backend_type(&self) -> BackendType {
        self.raw_buffer().device.info().backend_type()
    }

    fn device(&self) -> Device {
        Device::from_shared(self.raw_buffer().device.clone())
    }
}

/// Typed device storage.
///
/// Created empty by [`Device::create_buffer`]. Resizing and clearing take
/// `&self` so that views borrowed from the buffer stay usable; a resize
/// fails while a [`MappedMemory`] of the buffer is alive.
pub struct Buffer<T: Pod> {
    raw: RawBuffer,
    _marker: PhantomData<T>,
}

impl<T: Pod> sealed::Sealed for Buffer<T> {
    fn raw_buffer(&self) -> &RawBuffer {
        &self.raw
    }
}

impl<T: Pod> BufferCommon for Buffer<T> {
    fn element_size(&self) -> usize {
        size_of::<T>()
    }
}

impl<T: Pod> Buffer<T> {
    pub(crate) fn from_raw(raw: RawBuffer) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Resize to exactly `count` elements.
    ///
    /// Capacity is kept when shrinking. On failure the size, capacity and
    /// contents are unchanged.
    #[tracing::instrument(skip(self), fields(element_size = size_of::<T>()))]
    pub fn set_size(&self, count: usize) -> Result<()> {
        let bytes = count.checked_mul(size_of::<T>()).ok_or(BackendError::SizeOverflow {
            count,
            element_size: size_of::<T>(),
        })?;
        self.raw.resize_bytes(bytes)
    }

    /// Set the size to zero, keeping capacity.
    pub fn clear(&self) {
        self.raw.clear();
    }

    /// View the bytes of this buffer as elements of `U`.
    pub fn reinterp<U: Pod>(&self) -> ReinterpBuffer<'_, U> {
        ReinterpBuffer::new(&self.raw, self, self)
    }

    /// Map for host reads and writes; writes are committed when the mapping drops.
    pub fn map_memory(&self) -> Result<MappedMemory<'_, T>> {
        MappedMemory::new(&self.raw)
    }

    /// Map for host reads only.
    pub fn map_memory_read(&self) -> Result<MappedMemoryRead<'_, T>> {
        MappedMemoryRead::new(&self.raw)
    }

    /// Fill `[dest_offset, dest_offset + size)` with `value`.
    pub fn fill(&self, value: T, options: &BufferLaunchOptions) -> Result<LaunchResult> {
        ops::fill(self, bytemuck::bytes_of(&value), options)
    }

    /// Resize to `data.len()` and upload `data`.
    pub fn write_slice(&self, data: &[T]) -> Result<()> {
        self.set_size(data.len())?;
        let mut mapped = self.map_memory()?;
        mapped.as_mut_slice().copy_from_slice(data);
        Ok(())
    }

    /// Download the whole buffer.
    pub fn read_to_vec(&self) -> Result<Vec<T>> {
        Ok(self.map_memory_read()?.to_vec())
    }
}

impl<T: Pod> fmt::Debug for Buffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("element_size", &size_of::<T>())
            .field("size", &self.size())
            .field("capacity", &self.capacity())
            .field("usage", &self.usage())
            .field("flag", &self.flag())
            .field("heap_index", &self.heap_index())
            .finish()
    }
}

pub(crate) fn raw_of<B>(buffer: &B) -> &RawBuffer
where
    B: BufferCommon + ?Sized,
{
    buffer.raw_buffer()
}

/// Convert an element range of `view` to a byte range of the owning buffer.
///
/// `count` defaults to the rest of the buffer. Both ends must fall on whole
/// elements of the owning buffer.
pub(crate) fn byte_range<B>(view: &B, offset: usize, count: Option<usize>) -> Result<(usize, usize)>
where
    B: BufferCommon + ?Sized,
{
    let size = view.size();
    let count = match count {
        Some(count) => count,
        None => size.saturating_sub(offset),
    };
    match offset.checked_add(count) {
        Some(end) if end <= size => {}
        _ => {
            return Err(Error::RangeOutOfBounds {
                offset,
                size: count,
                buffer_size: size,
            })
        }
    }

    let element_size = view.element_size();
    let root_size = view.raw_buffer().element_size();
    for units in [offset, count] {
        if (units * element_size) % root_size != 0 {
            return Err(Error::NonIntegralReinterp {
                count: units,
                view_size: element_size,
                root_size,
            });
        }
    }
    Ok((offset * element_size, count * element_size))
}
