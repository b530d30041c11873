//! Error types for lumen-core operations

use lumen_backends::{BackendError, BackendType};

/// Result type for lumen-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid index, option or argument; detected before any submission.
    Configuration,
    /// Allocation refused; the affected buffer is unchanged.
    Allocation,
    /// A kernel body failed a device-side assertion.
    DeviceTrap,
    /// Any other backend failure.
    Backend,
}

/// Errors that can occur in lumen-core operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// No device at this index
    #[error("device index {index} out of range: context has {count} device(s)")]
    DeviceIndexOutOfRange { index: usize, count: usize },

    /// A requested backend cannot be used
    #[error("backend {backend} unavailable: {reason}")]
    BackendUnavailable { backend: BackendType, reason: String },

    /// Operation not allowed for this buffer usage or flag
    #[error("invalid usage: {0}")]
    InvalidUsage(String),

    /// Kernel arguments do not match the compiled signature
    #[error("kernel `{kernel}` argument mismatch: {reason}")]
    ArgumentMismatch { kernel: String, reason: String },

    /// View resize or offset does not land on a whole root element
    #[error("{count} elements of {view_size} bytes is not a whole number of {root_size}-byte root elements")]
    NonIntegralReinterp {
        count: usize,
        view_size: usize,
        root_size: usize,
    },

    /// Element range outside a buffer
    #[error("range out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    RangeOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// Buffer cannot be mapped to the host
    #[error("buffer is not host visible: {0}")]
    NotHostVisible(String),

    /// Buffer has live mappings that would be invalidated or aliased
    #[error("buffer is mapped: {0}")]
    BufferMapped(String),

    /// Inconsistent launch or context options
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Backend error
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DeviceIndexOutOfRange { .. }
            | Error::BackendUnavailable { .. }
            | Error::InvalidUsage(_)
            | Error::ArgumentMismatch { .. }
            | Error::NonIntegralReinterp { .. }
            | Error::RangeOutOfBounds { .. }
            | Error::NotHostVisible(_)
            | Error::BufferMapped(_)
            | Error::InvalidOptions(_) => ErrorKind::Configuration,
            Error::Backend(err) if err.is_allocation_failure() => ErrorKind::Allocation,
            Error::Backend(BackendError::KernelAssertion(_)) => ErrorKind::DeviceTrap,
            Error::Backend(
                BackendError::InvalidBufferHandle(_)
                | BackendError::BufferOutOfBounds { .. }
                | BackendError::UnsupportedBufferCombination { .. }
                | BackendError::InvalidQueue { .. }
                | BackendError::InvalidLaunch(_),
            ) => ErrorKind::Configuration,
            Error::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Conditions that leave the device untrustworthy and must reach the top level.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Backend(err) if err.is_fatal())
    }
}
