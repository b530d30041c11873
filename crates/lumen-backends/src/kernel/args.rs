use std::marker::PhantomData;
use std::mem::size_of;

use bytemuck::Pod;

use super::KernelAssertion;

pub(crate) enum ArgSlot {
    Buffer { ptr: *mut u8, len: usize },
    Pod(Vec<u8>),
}

/// Positional arguments of a running CPU kernel.
///
/// Buffer arguments are shared by every work-item of the dispatch. Accesses
/// are bounds-checked; writes to the same element from different work-items
/// are a race in the kernel, exactly as on a GPU.
pub struct KernelArgs<'a> {
    slots: Vec<ArgSlot>,
    _storage: PhantomData<&'a mut [u8]>,
}

// SAFETY: the raw buffer pointers stay valid for 'a (the backend holds the
// allocations for the whole dispatch) and all element access goes through
// unaligned reads and writes of `Pod` values.
unsafe impl Send for KernelArgs<'_> {}
unsafe impl Sync for KernelArgs<'_> {}

impl<'a> KernelArgs<'a> {
    /// # Safety
    ///
    /// Every buffer slot must point to `len` bytes that stay valid and are not
    /// accessed through references for the lifetime `'a`.
    pub(crate) unsafe fn from_slots(slots: Vec<ArgSlot>) -> Self {
        Self {
            slots,
            _storage: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Buffer argument `index` viewed as elements of `T`.
    pub fn buffer<T: Pod>(&self, index: usize) -> Result<GlobalSlice<'_, T>, KernelAssertion> {
        match self.slots.get(index) {
            Some(ArgSlot::Buffer { ptr, len }) => Ok(GlobalSlice {
                ptr: *ptr,
                len: len / size_of::<T>().max(1),
                _marker: PhantomData,
            }),
            _ => Err(KernelAssertion::new(
                "argument is not a buffer",
                vec![format!("index = {index}")],
            )),
        }
    }

    /// Plain-data argument `index` read as `T`.
    pub fn pod<T: Pod>(&self, index: usize) -> Result<T, KernelAssertion> {
        match self.slots.get(index) {
            Some(ArgSlot::Pod(bytes)) => bytemuck::try_pod_read_unaligned(bytes).map_err(|_| {
                KernelAssertion::new(
                    "pod argument size mismatch",
                    vec![
                        format!("index = {index}"),
                        format!("expected = {}", size_of::<T>()),
                        format!("actual = {}", bytes.len()),
                    ],
                )
            }),
            _ => Err(KernelAssertion::new(
                "argument is not a pod value",
                vec![format!("index = {index}")],
            )),
        }
    }
}

/// Typed, bounds-checked view of a buffer argument inside a kernel body.
pub struct GlobalSlice<'a, T> {
    ptr: *mut u8,
    len: usize,
    _marker: PhantomData<&'a [T]>,
}

impl<T: Pod> GlobalSlice<'_, T> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> Result<T, KernelAssertion> {
        self.check(index)?;
        // SAFETY: index < len, so the element lies inside the argument range.
        Ok(unsafe { self.ptr.add(index * size_of::<T>()).cast::<T>().read_unaligned() })
    }

    pub fn set(&self, index: usize, value: T) -> Result<(), KernelAssertion> {
        self.check(index)?;
        // SAFETY: as in `get`.
        unsafe { self.ptr.add(index * size_of::<T>()).cast::<T>().write_unaligned(value) };
        Ok(())
    }

    fn check(&self, index: usize) -> Result<(), KernelAssertion> {
        if index < self.len {
            Ok(())
        } else {
            Err(KernelAssertion::new(
                "buffer index out of bounds",
                vec![format!("index = {index}"), format!("len = {}", self.len)],
            ))
        }
    }
}
