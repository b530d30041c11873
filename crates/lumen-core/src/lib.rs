//! # lumen-core
//!
//! Caller-facing layer of the lumen compute runtime.
//!
//! A [`Context`] enumerates devices of the enabled backends. A [`Device`]
//! creates typed [`Buffer`]s and binds [`Kernel`]s. Buffers can be viewed
//! under another element type with [`ReinterpBuffer`], mapped to the host
//! with [`MappedMemory`] or [`MappedMemoryRead`], copied with [`copy`] and filled in place.
//! Operations that run on a device queue return a [`LaunchResult`] whose
//! [`Fence`] can be waited on.
//!
//! ## Example
//!
//! ```rust
//! use lumen_core::prelude::*;
//!
//! # fn main() -> lumen_core::Result<()> {
//! let context = Context::new(ContextOptions::default())?;
//! let device = context.query_device(0)?;
//!
//! let buffer = device.create_buffer::<u32>(BufferUsage::PreferDevice, BufferFlag::RandomAccessible)?;
//! buffer.write_slice(&[1, 2, 3, 4])?;
//!
//! let bytes = buffer.reinterp::<u8>();
//! assert_eq!(bytes.size(), 16);
//!
//! buffer.fill(7, &BufferLaunchOptions::new().with_dest_offset(2))?.wait()?;
//! assert_eq!(buffer.read_to_vec()?, vec![1, 2, 7, 7]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every fallible operation returns [`Error`]. Configuration and allocation
//! errors are reported before anything is submitted and leave buffers
//! unchanged; [`Error::is_fatal`] marks device-level failures.

pub mod buffer;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod kernel;
pub mod launch;
pub mod selector;

pub use buffer::{copy, Buffer, BufferCommon, MappedMemory, MappedMemoryRead, ReinterpBuffer};
pub use config::ContextOptions;
pub use context::Context;
pub use device::Device;
pub use error::{Error, ErrorKind, Result};
pub use kernel::{Kernel, KernelArg};
pub use launch::{BufferLaunchOptions, KernelLaunchOptions, LaunchResult};
pub use selector::DeviceSelector;

pub use lumen_backends::kernel::{ArgKind, GlobalSlice, KernelArgs, LaunchGeometry, WorkItem};
pub use lumen_backends::{
    kernel_assert, kernel_params, BackendError, BackendType, BufferFlag, BufferUsage, DeviceInfo, Fence, HeapUsage,
    KernelAssertion, KernelDefinition, KernelInitParams, KernelSet, MemoryHeapInfo, MemoryProperties,
};

/// Common imports for applications.
pub mod prelude {
    pub use crate::{
        copy, Buffer, BufferCommon, BufferFlag, BufferLaunchOptions, BufferUsage, Context, ContextOptions, Device,
        Kernel, KernelArg, KernelDefinition, KernelLaunchOptions, KernelSet, LaunchResult, MappedMemory,
        MappedMemoryRead, ReinterpBuffer,
    };
}
