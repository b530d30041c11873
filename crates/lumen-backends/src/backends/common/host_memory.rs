//! Aligned, zero-initialised host allocations

use std::alloc::{self, Layout};
use std::ptr::NonNull;

use crate::device_info::HeapCharge;
use crate::error::{BackendError, Result};

/// Alignment of every host allocation; covers any `Pod` element type.
pub const HOST_ALIGNMENT: usize = 64;

#[repr(C, align(64))]
struct AlignedBlock([u8; HOST_ALIGNMENT]);

/// Heap block of `len` zeroed bytes aligned to [`HOST_ALIGNMENT`].
///
/// Allocation failure is reported as an error instead of aborting. A heap
/// charge attached with [`charged`](Self::charged) is released after the
/// bytes are freed.
pub struct HostAllocation {
    ptr: NonNull<u8>,
    len: usize,
    charge: Option<HeapCharge>,
}

// SAFETY: the block is plain bytes owned by this value; shared access is
// coordinated by the backends (queue draining and mapping rules).
unsafe impl Send for HostAllocation {}
unsafe impl Sync for HostAllocation {}

impl HostAllocation {
    pub fn zeroed(len: usize) -> Result<Self> {
        if len == 0 {
            return Ok(Self {
                ptr: NonNull::<AlignedBlock>::dangling().cast(),
                len: 0,
                charge: None,
            });
        }

        let layout = Layout::from_size_align(len, HOST_ALIGNMENT).map_err(|_| BackendError::AllocationTooLarge {
            requested: len as u64,
            max: isize::MAX as u64,
        })?;

        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(BackendError::OutOfHostMemory(len))?;
        Ok(Self { ptr, len, charge: None })
    }

    pub(crate) fn charged(mut self, charge: HeapCharge) -> Self {
        self.charge = Some(charge);
        self
    }

    /// Zeroed allocation holding a copy of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let allocation = Self::zeroed(bytes.len())?;
        // SAFETY: fresh allocation of exactly bytes.len() bytes, not shared yet.
        unsafe { allocation.slice_mut(0, bytes.len()) }.copy_from_slice(bytes);
        Ok(allocation)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed the allocation and no mutable access to
    /// the range may overlap the returned borrow.
    pub unsafe fn slice(&self, offset: usize, len: usize) -> &[u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len)
    }

    /// # Safety
    ///
    /// `offset + len` must not exceed the allocation and the caller must be
    /// the only accessor of the range while the borrow lives.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn slice_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        debug_assert!(offset + len <= self.len);
        std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len)
    }
}

impl Drop for HostAllocation {
    fn drop(&mut self) {
        if self.len > 0 {
            // SAFETY: allocated in `zeroed` with this exact layout.
            unsafe {
                alloc::dealloc(
                    self.ptr.as_ptr(),
                    Layout::from_size_align_unchecked(self.len, HOST_ALIGNMENT),
                )
            };
        }
    }
}

impl std::fmt::Debug for HostAllocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostAllocation").field("len", &self.len).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocations_are_zeroed_and_aligned() {
        let allocation = HostAllocation::zeroed(1000).unwrap();
        assert_eq!(allocation.as_ptr() as usize % HOST_ALIGNMENT, 0);
        assert!(unsafe { allocation.slice(0, 1000) }.iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_allocation_is_aligned() {
        let allocation = HostAllocation::zeroed(0).unwrap();
        assert!(allocation.is_empty());
        assert_eq!(allocation.as_ptr() as usize % HOST_ALIGNMENT, 0);
    }

    #[test]
    fn impossible_layout_is_an_error() {
        assert!(matches!(
            HostAllocation::zeroed(usize::MAX - 8),
            Err(BackendError::AllocationTooLarge { .. })
        ));
    }

    #[test]
    fn from_bytes_copies() {
        let allocation = HostAllocation::from_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(unsafe { allocation.slice(0, 3) }, &[1, 2, 3]);
    }
}
