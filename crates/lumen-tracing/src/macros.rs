//! Shorthand for timing blocks of runtime code.

/// Create a [`PerformanceSpan`](crate::performance::PerformanceSpan) guard.
///
/// ```
/// let _span = lumen_tracing::perf_span!("buffer.resize");
/// let _slow_only = lumen_tracing::perf_span!("queue.drain", threshold_us = 500);
/// ```
#[macro_export]
macro_rules! perf_span {
    ($name:expr) => {
        $crate::performance::PerformanceSpan::new($name)
    };
    ($name:expr, threshold_us = $threshold:expr) => {
        $crate::performance::PerformanceSpan::new($name).with_threshold($threshold)
    };
}

/// Emit a debug event tagged with an operation name and extra fields.
#[macro_export]
macro_rules! perf_event {
    ($op:expr $(, $key:ident = $value:expr)* $(,)?) => {
        $crate::tracing::debug!(op = $op $(, $key = $value)*, "perf event")
    };
}

/// Run `$body`, log how long it took, and yield its value.
#[macro_export]
macro_rules! timed_block {
    ($name:expr, $body:block) => {{
        let __start = ::std::time::Instant::now();
        let __result = $body;
        $crate::tracing::debug!(
            op = $name,
            duration_us = __start.elapsed().as_micros() as u64,
            "timed block"
        );
        __result
    }};
}
