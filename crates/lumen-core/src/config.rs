//! Context configuration

use std::env;

use lumen_backends::{BackendType, CpuConfig};
use serde::{Deserialize, Serialize};

/// Options recognised by [`Context::new`](crate::Context::new).
///
/// Numeric CPU options use 0 for "choose automatically".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextOptions {
    pub context_name: String,
    pub version_major: u32,
    pub version_minor: u32,
    pub version_patch: u32,
    /// Backends the context should initialise.
    pub enabled_backends: Vec<BackendType>,
    pub enable_debug_mode: bool,
    pub cpu_num_of_threads: usize,
    pub cpu_task_batch_size: usize,
    /// Logical budget of the CPU heap in bytes (0 = 8 GiB).
    pub cpu_heap_size: u64,
    pub cpu_max_buffer_count: usize,
    /// Submission queues of the CPU device (0 = 2).
    pub cpu_num_of_queues: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            context_name: "lumen".to_string(),
            version_major: 0,
            version_minor: 1,
            version_patch: 0,
            enabled_backends: vec![BackendType::Cpu],
            enable_debug_mode: false,
            cpu_num_of_threads: 0,
            cpu_task_batch_size: 0,
            cpu_heap_size: 0,
            cpu_max_buffer_count: 0,
            cpu_num_of_queues: 0,
        }
    }
}

impl ContextOptions {
    /// Defaults overlaid with environment variables.
    ///
    /// | variable | option |
    /// |---|---|
    /// | `LUMEN_CONTEXT_NAME` | `context_name` |
    /// | `LUMEN_DEBUG` | `enable_debug_mode` (`1`/`true`/`yes`) |
    /// | `LUMEN_CPU_THREADS` | `cpu_num_of_threads` |
    /// | `LUMEN_CPU_BATCH_SIZE` | `cpu_task_batch_size` |
    /// | `LUMEN_CPU_HEAP_SIZE` | `cpu_heap_size` |
    /// | `LUMEN_ENABLE_VULKAN` | enables the Vulkan backend (`1`/`true`/`yes`) |
    ///
    /// Unparseable numbers are ignored.
    pub fn from_env() -> Self {
        let mut options = Self::default();

        if let Ok(name) = env::var("LUMEN_CONTEXT_NAME") {
            if !name.trim().is_empty() {
                options.context_name = name;
            }
        }
        if let Some(debug) = env_flag("LUMEN_DEBUG") {
            options.enable_debug_mode = debug;
        }
        if let Some(threads) = env_number("LUMEN_CPU_THREADS") {
            options.cpu_num_of_threads = threads as usize;
        }
        if let Some(batch) = env_number("LUMEN_CPU_BATCH_SIZE") {
            options.cpu_task_batch_size = batch as usize;
        }
        if let Some(heap) = env_number("LUMEN_CPU_HEAP_SIZE") {
            options.cpu_heap_size = heap;
        }
        if let Some(vulkan) = env_flag("LUMEN_ENABLE_VULKAN") {
            options.enable_backend(BackendType::Vulkan, vulkan);
        }

        options
    }

    pub fn enable_backend(&mut self, backend: BackendType, enabled: bool) -> &mut Self {
        self.enabled_backends.retain(|b| *b != backend);
        if enabled {
            self.enabled_backends.push(backend);
        }
        self
    }

    pub fn is_backend_enabled(&self, backend: BackendType) -> bool {
        self.enabled_backends.contains(&backend)
    }

    pub fn with_context_name(mut self, name: impl Into<String>) -> Self {
        self.context_name = name.into();
        self
    }

    pub fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.version_major = major;
        self.version_minor = minor;
        self.version_patch = patch;
        self
    }

    pub fn with_backend(mut self, backend: BackendType, enabled: bool) -> Self {
        self.enable_backend(backend, enabled);
        self
    }

    pub fn with_debug_mode(mut self, enabled: bool) -> Self {
        self.enable_debug_mode = enabled;
        self
    }

    pub fn with_cpu_threads(mut self, threads: usize) -> Self {
        self.cpu_num_of_threads = threads;
        self
    }

    pub fn with_cpu_task_batch_size(mut self, batch: usize) -> Self {
        self.cpu_task_batch_size = batch;
        self
    }

    pub fn with_cpu_heap_size(mut self, bytes: u64) -> Self {
        self.cpu_heap_size = bytes;
        self
    }

    pub fn with_cpu_max_buffer_count(mut self, count: usize) -> Self {
        self.cpu_max_buffer_count = count;
        self
    }

    pub fn with_cpu_queues(mut self, queues: usize) -> Self {
        self.cpu_num_of_queues = queues;
        self
    }

    pub(crate) fn cpu_config(&self) -> CpuConfig {
        CpuConfig {
            name: format!("{} cpu", self.context_name),
            num_threads: self.cpu_num_of_threads,
            task_batch_size: self.cpu_task_batch_size,
            heap_size: self.cpu_heap_size,
            max_buffer_count: self.cpu_max_buffer_count,
            num_queues: self.cpu_num_of_queues,
            debug: self.enable_debug_mode,
        }
    }
}

fn env_flag(key: &str) -> Option<bool> {
    env::var(key).ok().map(|value| {
        let value = value.trim();
        value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
    })
}

fn env_number(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
