//! Timing spans and structured records for runtime operations.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use tracing::{span, Level, Span};

static ENABLED: AtomicBool = AtomicBool::new(cfg!(debug_assertions));
// u64::MAX means "no threshold".
static THRESHOLD_US: AtomicU64 = AtomicU64::new(u64::MAX);

/// Set the process-wide performance tracing switches.
pub fn configure(enabled: bool, threshold_us: Option<u64>) {
    ENABLED.store(enabled, Ordering::Relaxed);
    THRESHOLD_US.store(threshold_us.unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Whether performance spans are currently reported.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

fn global_threshold() -> Option<u64> {
    match THRESHOLD_US.load(Ordering::Relaxed) {
        u64::MAX => None,
        value => Some(value),
    }
}

/// A span that logs its own duration when dropped.
pub struct PerformanceSpan {
    name: &'static str,
    span: Span,
    start: Instant,
    threshold_us: Option<u64>,
    enabled: bool,
}

impl PerformanceSpan {
    pub fn new(name: &'static str) -> Self {
        Self::with_level(name, Level::DEBUG)
    }

    pub fn with_level(name: &'static str, level: Level) -> Self {
        let enabled = is_enabled();
        let span = if !enabled {
            Span::none()
        } else if level == Level::TRACE {
            span!(Level::TRACE, "perf", op = name)
        } else if level == Level::INFO {
            span!(Level::INFO, "perf", op = name)
        } else {
            span!(Level::DEBUG, "perf", op = name)
        };

        Self {
            name,
            span,
            start: Instant::now(),
            threshold_us: global_threshold(),
            enabled,
        }
    }

    /// Override the reporting threshold for this span only.
    pub fn with_threshold(mut self, threshold_us: u64) -> Self {
        self.threshold_us = Some(threshold_us);
        self
    }

    pub fn elapsed_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> span::Entered<'_> {
        self.span.enter()
    }
}

impl Drop for PerformanceSpan {
    fn drop(&mut self) {
        if !self.enabled {
            return;
        }
        let duration_us = self.elapsed_us();
        if self.threshold_us.is_none_or(|threshold| duration_us >= threshold) {
            let _entered = self.span.enter();
            tracing::debug!(op = self.name, duration_us, "operation complete");
        }
    }
}

/// Record a buffer allocation or release.
pub fn record_allocation(op: &str, heap_index: usize, size_bytes: usize, heap_used_bytes: u64) {
    tracing::debug!(
        op,
        heap_index,
        size_bytes,
        heap_used_bytes,
        "allocation"
    );
}

/// Record a copy or fill with its effective bandwidth.
pub fn record_transfer(op: &str, size_bytes: usize, duration_us: u64) {
    let bandwidth_mbps = if duration_us > 0 {
        size_bytes as f64 / duration_us as f64
    } else {
        0.0
    };
    tracing::debug!(op, size_bytes, duration_us, bandwidth_mbps, "transfer");
}

/// Record a kernel dispatch.
pub fn record_dispatch(kernel: &str, work_items: u64, queue: usize, duration_us: u64) {
    tracing::debug!(kernel, work_items, queue, duration_us, "dispatch");
}
