//! Backend abstraction: the trait every execution target implements and the
//! plain data types that cross it.

pub mod traits;
pub mod types;

pub use traits::Backend;
pub use types::{
    BackendType, BufferFlag, BufferHandle, BufferUsage, CopyRequest, DispatchArg, DispatchRequest, FillRequest,
    MappedRegion, MemoryProperties,
};
