use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;
use lumen_backends::BackendError;

use super::{ops, sealed, BufferCommon, MappedMemory, MappedMemoryRead, RawBuffer};
use crate::error::{Error, Result};
use crate::launch::{BufferLaunchOptions, LaunchResult};

/// Zero-copy view of a buffer's bytes as elements of `U`.
///
/// Built by [`Buffer::reinterp`](super::Buffer::reinterp) or by calling
/// [`reinterp`](ReinterpBuffer::reinterp) on another view. Sizes are counted
/// in `U`; capability queries and storage belong to the owning buffer.
pub struct ReinterpBuffer<'a, U: Pod> {
    root: &'a RawBuffer,
    parent: &'a dyn BufferCommon,
    own: &'a dyn BufferCommon,
    _marker: PhantomData<U>,
}

impl<U: Pod> sealed::Sealed for ReinterpBuffer<'_, U> {
    fn raw_buffer(&self) -> &RawBuffer {
        self.root
    }
}

impl<U: Pod> BufferCommon for ReinterpBuffer<'_, U> {
    fn element_size(&self) -> usize {
        size_of::<U>()
    }
}

impl<'a, U: Pod> ReinterpBuffer<'a, U> {
    pub(crate) fn new(root: &'a RawBuffer, parent: &'a dyn BufferCommon, own: &'a dyn BufferCommon) -> Self {
        const { assert!(size_of::<U>() > 0, "cannot reinterpret as a zero-sized type") };
        Self {
            root,
            parent,
            own,
            _marker: PhantomData,
        }
    }

    /// Always true: a view is built from a buffer or another view.
    pub fn has_parent(&self) -> bool {
        true
    }

    /// The buffer or view this view was built from.
    pub fn parent(&self) -> &'a dyn BufferCommon {
        self.parent
    }

    /// The buffer that owns the storage.
    pub fn own(&self) -> &'a dyn BufferCommon {
        self.own
    }

    /// Resize the owning buffer to `count * size_of::<U>()` bytes.
    ///
    /// Fails with [`Error::NonIntegralReinterp`] when that byte count is not a
    /// whole number of the owner's elements.
    #[tracing::instrument(skip(self), fields(view_size = size_of::<U>(), root_size = self.root.element_size()))]
    pub fn set_size(&self, count: usize) -> Result<()> {
        let bytes = count.checked_mul(size_of::<U>()).ok_or(BackendError::SizeOverflow {
            count,
            element_size: size_of::<U>(),
        })?;
        if bytes % self.root.element_size() != 0 {
            return Err(Error::NonIntegralReinterp {
                count,
                view_size: size_of::<U>(),
                root_size: self.root.element_size(),
            });
        }
        self.root.resize_bytes(bytes)
    }

    pub fn clear(&self) {
        self.root.clear();
    }

    /// Compose a further view over the same storage.
    pub fn reinterp<V: Pod>(&self) -> ReinterpBuffer<'_, V> {
        ReinterpBuffer::new(self.root, self, self.own)
    }

    pub fn map_memory(&self) -> Result<MappedMemory<'_, U>> {
        MappedMemory::new(self.root)
    }

    pub fn map_memory_read(&self) -> Result<MappedMemoryRead<'_, U>> {
        MappedMemoryRead::new(self.root)
    }

    /// Fill a range counted in `U` elements; it must cover whole owner elements.
    pub fn fill(&self, value: U, options: &BufferLaunchOptions) -> Result<LaunchResult> {
        ops::fill(self, bytemuck::bytes_of(&value), options)
    }
}

impl<U: Pod> fmt::Debug for ReinterpBuffer<'_, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReinterpBuffer")
            .field("view_size", &size_of::<U>())
            .field("root_size", &self.root.element_size())
            .field("size", &self.size())
            .field("heap_index", &self.heap_index())
            .finish()
    }
}
