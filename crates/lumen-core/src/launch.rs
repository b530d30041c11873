//! Launch options and results for buffer operations and kernel dispatch

use lumen_backends::{Fence, Submission};

use crate::error::Result;

/// Options for [`copy`](crate::copy) and `fill`.
///
/// Offsets and `size` are in elements of the buffer or view they apply to:
/// `source_offset` and `size` in source elements, `dest_offset` in
/// destination elements. `size` defaults to the rest of the buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BufferLaunchOptions {
    pub source_offset: usize,
    pub dest_offset: usize,
    pub size: Option<usize>,
    pub queue_index: usize,
    pub request_fence: bool,
    pub label: Option<String>,
}

impl BufferLaunchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_offset(mut self, offset: usize) -> Self {
        self.source_offset = offset;
        self
    }

    pub fn with_dest_offset(mut self, offset: usize) -> Self {
        self.dest_offset = offset;
        self
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_queue(mut self, queue_index: usize) -> Self {
        self.queue_index = queue_index;
        self
    }

    pub fn with_fence(mut self, request: bool) -> Self {
        self.request_fence = request;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Options for [`Kernel::run`](crate::Kernel::run).
///
/// Obtain defaults from [`Kernel::create_options`](crate::Kernel::create_options);
/// `work_size` must be filled in before running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelLaunchOptions {
    pub dimension: u32,
    pub work_size: Vec<u32>,
    /// Empty means all zero.
    pub global_id_offset: Vec<u32>,
    pub queue_index: usize,
    pub request_fence: bool,
    pub label: Option<String>,
}

impl KernelLaunchOptions {
    pub fn new(dimension: u32) -> Self {
        Self {
            dimension,
            work_size: Vec::new(),
            global_id_offset: Vec::new(),
            queue_index: 0,
            request_fence: false,
            label: None,
        }
    }

    pub fn with_work_size(mut self, work_size: impl Into<Vec<u32>>) -> Self {
        self.work_size = work_size.into();
        self
    }

    pub fn with_global_id_offset(mut self, offset: impl Into<Vec<u32>>) -> Self {
        self.global_id_offset = offset.into();
        self
    }

    pub fn with_queue(mut self, queue_index: usize) -> Self {
        self.queue_index = queue_index;
        self
    }

    pub fn with_fence(mut self, request: bool) -> Self {
        self.request_fence = request;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Number of logical work-items.
    pub fn total_work_items(&self) -> u64 {
        self.work_size.iter().map(|&n| n as u64).product()
    }
}

/// Outcome of submitting an operation.
///
/// `Immediate` work has finished when the call returns. `Pending` work runs
/// on a device queue; its fence is invalid unless one was requested, in
/// which case [`Device::wait_for_completion`](crate::Device::wait_for_completion)
/// is the only way to wait for it.
#[derive(Debug, Clone)]
#[must_use = "pending work may still be running"]
pub enum LaunchResult {
    Immediate,
    Pending(Fence),
}

impl LaunchResult {
    pub(crate) fn from_submission(submission: Submission, fence_requested: bool) -> Self {
        match submission {
            Submission::Completed => LaunchResult::Immediate,
            Submission::Queued(fence) if fence_requested => LaunchResult::Pending(fence),
            Submission::Queued(_) => LaunchResult::Pending(Fence::invalid()),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, LaunchResult::Pending(_))
    }

    /// The completion token, present for every pending result.
    pub fn fence(&self) -> Option<&Fence> {
        match self {
            LaunchResult::Immediate => None,
            LaunchResult::Pending(fence) => Some(fence),
        }
    }

    pub fn has_valid_fence(&self) -> bool {
        self.fence().is_some_and(Fence::is_valid)
    }

    /// Wait on the fence, if there is a valid one.
    pub fn wait(&self) -> Result<()> {
        match self {
            LaunchResult::Immediate => Ok(()),
            LaunchResult::Pending(fence) => Ok(fence.wait()?),
        }
    }
}
