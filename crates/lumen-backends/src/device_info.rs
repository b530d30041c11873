//! Device capability snapshots and per-heap usage accounting

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::BackendType;
use crate::error::{BackendError, Result};

/// Bytes currently held by buffers on a heap and the high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeapUsage {
    pub current: u64,
    pub peak: u64,
}

/// One memory heap of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryHeapInfo {
    pub(crate) is_device_local: bool,
    pub(crate) total_size: u64,
    pub(crate) available_size: u64,
    pub(crate) used_for_buffer: HeapUsage,
}

impl MemoryHeapInfo {
    pub fn new(is_device_local: bool, total_size: u64) -> Self {
        Self {
            is_device_local,
            total_size,
            available_size: total_size,
            used_for_buffer: HeapUsage::default(),
        }
    }

    pub fn is_device_local(&self) -> bool {
        self.is_device_local
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn available_size(&self) -> u64 {
        self.available_size
    }

    pub fn used_size_for_buffer(&self) -> HeapUsage {
        self.used_for_buffer
    }
}

/// Immutable capability snapshot of one device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub(crate) backend_type: BackendType,
    pub(crate) name: String,
    pub(crate) heaps: Vec<MemoryHeapInfo>,
    pub(crate) max_allocation_size: u64,
    pub(crate) max_buffer_count: usize,
    pub(crate) work_group_size: u32,
    pub(crate) max_work_group_count: [u32; 3],
}

impl DeviceInfo {
    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Heaps with their usage at the time this snapshot was taken.
    pub fn heaps(&self) -> &[MemoryHeapInfo] {
        &self.heaps
    }

    pub(crate) fn with_heaps(&self, heaps: Vec<MemoryHeapInfo>) -> Self {
        Self {
            backend_type: self.backend_type,
            name: self.name.clone(),
            heaps,
            max_allocation_size: self.max_allocation_size,
            max_buffer_count: self.max_buffer_count,
            work_group_size: self.work_group_size,
            max_work_group_count: self.max_work_group_count,
        }
    }

    pub fn max_allocation_size(&self) -> u64 {
        self.max_allocation_size
    }

    pub fn max_buffer_count(&self) -> usize {
        self.max_buffer_count
    }

    /// Work-items per work-group. Fixed by the device.
    pub fn work_group_size(&self) -> u32 {
        self.work_group_size
    }

    pub fn max_work_group_count(&self) -> [u32; 3] {
        self.max_work_group_count
    }
}

/// Budget and usage bookkeeping for a device's heaps.
///
/// `reserve` fails without changing anything; `peak` never decreases.
#[derive(Debug)]
pub(crate) struct HeapTracker {
    heaps: Mutex<Vec<MemoryHeapInfo>>,
}

impl HeapTracker {
    pub(crate) fn new(heaps: &[MemoryHeapInfo]) -> Self {
        Self {
            heaps: Mutex::new(heaps.to_vec()),
        }
    }

    /// Account for `bytes` on `heap_index`; returns the new usage.
    pub(crate) fn reserve(&self, heap_index: usize, bytes: u64) -> Result<u64> {
        let mut heaps = self.heaps.lock();
        let heap = heaps
            .get_mut(heap_index)
            .ok_or_else(|| BackendError::Unsupported(format!("no heap with index {heap_index}")))?;

        if bytes > heap.available_size {
            return Err(BackendError::HeapExhausted {
                heap_index,
                requested: bytes,
                available: heap.available_size,
            });
        }

        heap.available_size -= bytes;
        heap.used_for_buffer.current += bytes;
        heap.used_for_buffer.peak = heap.used_for_buffer.peak.max(heap.used_for_buffer.current);
        Ok(heap.used_for_buffer.current)
    }

    /// Return `bytes` to `heap_index`; returns the new usage.
    pub(crate) fn release(&self, heap_index: usize, bytes: u64) -> u64 {
        let mut heaps = self.heaps.lock();
        match heaps.get_mut(heap_index) {
            Some(heap) => {
                let bytes = bytes.min(heap.used_for_buffer.current);
                heap.used_for_buffer.current -= bytes;
                heap.available_size += bytes;
                heap.used_for_buffer.current
            }
            None => 0,
        }
    }

    pub(crate) fn snapshot(&self, heap_index: usize) -> Option<MemoryHeapInfo> {
        self.heaps.lock().get(heap_index).copied()
    }

    /// Reserve `bytes` and tie their release to the returned charge.
    pub(crate) fn charge(self: &Arc<Self>, heap_index: usize, bytes: u64) -> Result<(HeapCharge, u64)> {
        let used = self.reserve(heap_index, bytes)?;
        let charge = HeapCharge {
            tracker: Arc::clone(self),
            heap_index,
            bytes,
        };
        Ok((charge, used))
    }
}

/// Bytes reserved on a heap until this value is dropped.
#[derive(Debug)]
pub(crate) struct HeapCharge {
    tracker: Arc<HeapTracker>,
    heap_index: usize,
    bytes: u64,
}

impl Drop for HeapCharge {
    fn drop(&mut self) {
        let used = self.tracker.release(self.heap_index, self.bytes);
        lumen_tracing::performance::record_allocation("free", self.heap_index, self.bytes as usize, used);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_release_track_peak() {
        let tracker = HeapTracker::new(&[MemoryHeapInfo::new(true, 1024)]);

        assert_eq!(tracker.reserve(0, 512).unwrap(), 512);
        assert_eq!(tracker.reserve(0, 256).unwrap(), 768);
        assert_eq!(tracker.release(0, 512), 256);

        let heap = tracker.snapshot(0).unwrap();
        assert_eq!(heap.used_size_for_buffer(), HeapUsage { current: 256, peak: 768 });
        assert_eq!(heap.available_size(), 768);
        assert_eq!(heap.total_size(), 1024);
    }

    #[test]
    fn exhausted_heap_is_left_untouched() {
        let tracker = HeapTracker::new(&[MemoryHeapInfo::new(false, 100)]);
        tracker.reserve(0, 60).unwrap();

        let err = tracker.reserve(0, 41).unwrap_err();
        assert!(matches!(
            err,
            BackendError::HeapExhausted {
                heap_index: 0,
                requested: 41,
                available: 40
            }
        ));
        assert_eq!(tracker.snapshot(0).unwrap().used_size_for_buffer().current, 60);
    }

    #[test]
    fn charge_releases_on_drop() {
        let tracker = Arc::new(HeapTracker::new(&[MemoryHeapInfo::new(true, 1024)]));

        let (charge, used) = tracker.charge(0, 300).unwrap();
        assert_eq!(used, 300);
        assert_eq!(tracker.snapshot(0).unwrap().available_size(), 724);

        drop(charge);
        let heap = tracker.snapshot(0).unwrap();
        assert_eq!(heap.used_size_for_buffer(), HeapUsage { current: 0, peak: 300 });
        assert_eq!(heap.available_size(), 1024);
    }

    #[test]
    fn unknown_heap_is_rejected() {
        let tracker = HeapTracker::new(&[]);
        assert!(tracker.reserve(3, 1).is_err());
        assert!(tracker.snapshot(3).is_none());
        assert_eq!(tracker.release(3, 1), 0);
    }
}
