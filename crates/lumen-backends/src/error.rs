//! Error types for backend operations

use crate::backend::{BufferFlag, BufferUsage};
use crate::kernel::KernelAssertion;

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while allocating, transferring or dispatching on a backend.
///
/// Errors are `Clone` because an asynchronous failure is reported both through
/// the fence of the failed operation and by the next device-wide wait.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    /// Byte range outside of a buffer
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// A single allocation larger than the device allows
    #[error("allocation of {requested} bytes exceeds the device limit of {max} bytes")]
    AllocationTooLarge { requested: u64, max: u64 },

    /// Not enough budget left in the selected heap
    #[error("heap {heap_index} exhausted: requested {requested} bytes, {available} available")]
    HeapExhausted {
        heap_index: usize,
        requested: u64,
        available: u64,
    },

    /// `count * element_size` does not fit the address space
    #[error("size overflow: {count} elements of {element_size} bytes")]
    SizeOverflow { count: usize, element_size: usize },

    /// Too many live buffers on the device
    #[error("buffer count limit of {0} reached")]
    BufferCountExceeded(usize),

    /// The host allocator refused the request
    #[error("out of host memory allocating {0} bytes")]
    OutOfHostMemory(usize),

    /// The device cannot place a buffer with this usage and flag
    #[error("unsupported buffer combination: usage {usage:?} with flag {flag:?}")]
    UnsupportedBufferCombination { usage: BufferUsage, flag: BufferFlag },

    /// Queue index outside `0..count`
    #[error("invalid queue index {index}: device has {count} queue(s)")]
    InvalidQueue { index: usize, count: usize },

    /// Geometry or argument layout the backend cannot execute
    #[error("invalid launch: {0}")]
    InvalidLaunch(String),

    /// A kernel body reported a failed device-side assertion
    #[error(transparent)]
    KernelAssertion(#[from] KernelAssertion),

    /// The device stopped responding or was removed
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// Operation not supported by this backend
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// Backend could not be initialised on this machine
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
}

impl BackendError {
    /// Errors after which the device can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::DeviceLost(_) | BackendError::KernelAssertion(_))
    }

    /// Errors raised while reserving memory.
    pub fn is_allocation_failure(&self) -> bool {
        matches!(
            self,
            BackendError::AllocationTooLarge { .. }
                | BackendError::HeapExhausted { .. }
                | BackendError::SizeOverflow { .. }
                | BackendError::BufferCountExceeded(_)
                | BackendError::OutOfHostMemory(_)
        )
    }

    pub(crate) fn check_range(offset: usize, size: usize, buffer_size: usize) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= buffer_size => Ok(()),
            _ => Err(BackendError::BufferOutOfBounds {
                offset,
                size,
                buffer_size,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_check_rejects_overflowing_offsets() {
        assert!(BackendError::check_range(0, 16, 16).is_ok());
        assert!(BackendError::check_range(16, 0, 16).is_ok());
        assert!(matches!(
            BackendError::check_range(8, 9, 16),
            Err(BackendError::BufferOutOfBounds { .. })
        ));
        assert!(BackendError::check_range(usize::MAX, 2, 16).is_err());
    }

    #[test]
    fn classifies_errors() {
        let assertion = KernelAssertion::new("x < n", vec!["5".into()]);
        assert!(BackendError::from(assertion).is_fatal());
        assert!(BackendError::DeviceLost("reset".into()).is_fatal());
        assert!(!BackendError::InvalidBufferHandle(3).is_fatal());
        assert!(BackendError::BufferCountExceeded(4).is_allocation_failure());
        assert!(!BackendError::Unsupported("fill".into()).is_allocation_failure());
    }
}
