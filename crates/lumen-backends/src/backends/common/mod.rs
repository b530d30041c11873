//! Infrastructure shared by the backend implementations

mod host_memory;

pub use host_memory::HostAllocation;
