//! Buffer table and host staging for the Vulkan backend

use std::collections::HashMap;
use std::sync::mpsc;

use crate::backend::BufferHandle;
use crate::backends::common::HostAllocation;
use crate::error::{BackendError, Result};

/// Copy and queue-write granularity.
pub(crate) const COPY_ALIGNMENT: usize = wgpu::COPY_BUFFER_ALIGNMENT as usize;

pub(crate) fn align_down(value: usize) -> usize {
    value & !(COPY_ALIGNMENT - 1)
}

pub(crate) fn align_up(value: usize) -> usize {
    align_down(value + COPY_ALIGNMENT - 1)
}

pub(crate) fn is_aligned(value: usize) -> bool {
    value % COPY_ALIGNMENT == 0
}

/// A device buffer; `size` is the requested size, the wgpu buffer is
/// padded to the copy alignment.
pub(crate) struct VulkanAllocation {
    pub buffer: wgpu::Buffer,
    pub size: usize,
    pub heap_index: usize,
}

pub(crate) struct BufferTable {
    buffers: HashMap<u64, VulkanAllocation>,
    next_buffer_id: u64,
}

impl BufferTable {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_buffer_id: 1,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn insert(&mut self, allocation: VulkanAllocation) -> BufferHandle {
        let id = self.next_buffer_id;
        self.next_buffer_id += 1;
        self.buffers.insert(id, allocation);
        BufferHandle::new(id)
    }

    pub fn get(&self, handle: BufferHandle) -> Result<&VulkanAllocation> {
        self.buffers
            .get(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }

    pub fn remove(&mut self, handle: BufferHandle) -> Result<VulkanAllocation> {
        self.buffers
            .remove(&handle.id())
            .ok_or(BackendError::InvalidBufferHandle(handle.id()))
    }
}

/// Read `[start, start + len)` of `buffer` back to the host. Both bounds
/// must be copy-aligned.
pub(crate) fn read_back(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    start: usize,
    len: usize,
) -> Result<HostAllocation> {
    if len == 0 {
        return HostAllocation::zeroed(0);
    }

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("lumen_staging_read"),
        size: len as u64,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("lumen_read_back"),
    });
    encoder.copy_buffer_to_buffer(buffer, start as u64, &staging, 0, len as u64);
    let submission = queue.submit(Some(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        })
        .map_err(|err| BackendError::DeviceLost(format!("poll failed during read-back: {err:?}")))?;

    receiver
        .recv()
        .map_err(|_| BackendError::DeviceLost("read-back mapping was dropped".to_string()))?
        .map_err(|err| BackendError::DeviceLost(format!("read-back mapping failed: {err}")))?;

    let window = {
        let view = slice.get_mapped_range();
        HostAllocation::from_bytes(&view)?
    };
    staging.unmap();
    Ok(window)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(7), 4);
        assert_eq!(align_up(7), 8);
        assert_eq!(align_up(8), 8);
        assert_eq!(align_up(0), 0);
        assert!(is_aligned(12));
        assert!(!is_aligned(13));
    }
}
