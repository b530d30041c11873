//! Kernel descriptions and the work-item execution model
//!
//! Kernels are compiled outside of lumen. What the runtime receives is a
//! [`KernelDefinition`]: the signature the compiler produced plus a body for
//! each backend that can run it (a Rust closure for the CPU backend, WGSL for
//! Vulkan). Definitions are grouped in a [`KernelSet`] and bound by name with
//! [`kernel_params!`](crate::kernel_params).

mod args;
mod assertion;
mod definition;
mod geometry;

pub use args::{GlobalSlice, KernelArgs};
pub use assertion::KernelAssertion;
pub use definition::{
    ArgKind, KernelBody, KernelBuilder, KernelDefinition, KernelInitParams, KernelSet, WgslSource,
};
pub use geometry::{LaunchGeometry, WorkItem};

pub(crate) use args::ArgSlot;
