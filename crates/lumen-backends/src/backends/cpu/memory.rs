//! Allocation table for the CPU backend

use std::collections::HashMap;
use std::sync::Arc;

use crate::backend::BufferHandle;
use crate::backends::common::HostAllocation;
use crate::error::{BackendError, Result};

/// A live allocation and the heap it is charged to.
#[derive(Debug, Clone)]
pub(crate) struct Allocation {
    pub storage: Arc<HostAllocation>,
    pub heap_index: usize,
}

/// Maps buffer handles to host storage.
///
/// Storage is reference counted so queued kernels keep using it even after
/// the handle has been freed.
#[derive(Debug)]
pub(crate) struct MemoryManager {
    buffers: HashMap<u64, Allocation>,
    next_buffer_id: u64,
}

impl MemoryManager {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn insert(&mut self, storage: HostAllocation, heap_index: usize) -> BufferHandle {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(
            id,
            Allocation {
                storage: Arc::new(storage),
                heap_index,
            },
        );
        BufferHandle::new(id)
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&Allocation> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn remove(&mut self, handle: BufferHandle) -> Result<Allocation> {
        self.buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_unique_and_removable() {
        let mut memory = MemoryManager::new();
        let a = memory.insert(HostAllocation::zeroed(8).unwrap(), 0);
        let b = memory.insert(HostAllocation::zeroed(16).unwrap(), 0);
        assert_ne!(a, b);
        assert_eq!(memory.len(), 2);

        assert_eq!(memory.get(b).unwrap().storage.len(), 16);
        memory.remove(a).unwrap();
        assert!(matches!(memory.get(a), Err(BackendError::InvalidBufferHandle(_))));
        assert!(memory.remove(a).is_err());
        assert_eq!(memory.len(), 1);
    }
}
