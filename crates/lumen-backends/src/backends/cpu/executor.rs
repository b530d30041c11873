//! Kernel execution on the CPU backend
//!
//! Work-groups are distributed across a rayon pool. Each rayon task runs at
//! least `batch` consecutive groups, and within a group work-items run
//! sequentially in local-id order.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use rayon::ThreadPool;

use crate::backends::common::HostAllocation;
use crate::error::{BackendError, Result};
use crate::kernel::{ArgSlot, KernelArgs, KernelAssertion, KernelBody, KernelDefinition, LaunchGeometry};

/// A resolved kernel argument holding its storage alive.
pub(crate) enum BoundArg {
    Buffer {
        storage: Arc<HostAllocation>,
        offset: usize,
        len: usize,
    },
    Pod(Vec<u8>),
}

pub(crate) struct DispatchJob {
    pub pool: Arc<ThreadPool>,
    pub batch: usize,
    pub kernel: Arc<KernelDefinition>,
    pub body: KernelBody,
    pub args: Vec<BoundArg>,
    pub geometry: LaunchGeometry,
    pub queue: usize,
    pub debug: bool,
}

impl DispatchJob {
    pub fn run(self) -> Result<()> {
        let _span = self.debug.then(|| lumen_tracing::perf_span!("cpu.dispatch"));
        let start = Instant::now();

        let slots = self
            .args
            .iter()
            .map(|arg| match arg {
                BoundArg::Buffer { storage, offset, len } => ArgSlot::Buffer {
                    // SAFETY: offset + len was checked against the allocation.
                    ptr: unsafe { storage.as_ptr().add(*offset) },
                    len: *len,
                },
                BoundArg::Pod(bytes) => ArgSlot::Pod(bytes.clone()),
            })
            .collect();
        // SAFETY: `self.args` owns every allocation until this function returns.
        let args = unsafe { KernelArgs::from_slots(slots) };

        let groups = usize::try_from(self.geometry.total_groups())
            .map_err(|_| BackendError::InvalidLaunch("work-group count exceeds the address space".to_string()))?;
        let geometry = &self.geometry;
        let body = &self.body;

        let outcome = self.pool.install(|| {
            (0..groups)
                .into_par_iter()
                .with_min_len(self.batch)
                .try_for_each(|group| {
                    for item in geometry.group_items(group as u64) {
                        body(&item, &args)?;
                    }
                    Ok::<(), KernelAssertion>(())
                })
        });

        match outcome {
            Ok(()) => {
                if self.debug {
                    lumen_tracing::performance::record_dispatch(
                        self.kernel.name(),
                        geometry.total_items(),
                        self.queue,
                        start.elapsed().as_micros() as u64,
                    );
                }
                Ok(())
            }
            Err(assertion) => {
                let assertion = assertion.with_kernel(self.kernel.name());
                tracing::error!(
                    kernel = self.kernel.name(),
                    message = assertion.message(),
                    values = ?assertion.values(),
                    "kernel assertion failed"
                );
                Err(BackendError::KernelAssertion(assertion))
            }
        }
    }
}
