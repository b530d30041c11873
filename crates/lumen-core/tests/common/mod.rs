//! Shared setup for lumen-core integration tests

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use lumen_core::{BufferFlag, BufferUsage, Context, ContextOptions, Device, Result};

static GLOBAL_CONTEXT: OnceLock<Arc<Context>> = OnceLock::new();

/// Every valid placement/access combination on the CPU backend.
pub const ALL_COMBINATIONS: [(BufferUsage, BufferFlag); 6] = [
    (BufferUsage::PreferDevice, BufferFlag::None),
    (BufferUsage::PreferDevice, BufferFlag::RandomAccessible),
    (BufferUsage::PreferDevice, BufferFlag::SequentialWritable),
    (BufferUsage::PreferHost, BufferFlag::None),
    (BufferUsage::PreferHost, BufferFlag::RandomAccessible),
    (BufferUsage::PreferHost, BufferFlag::SequentialWritable),
];

fn test_options() -> ContextOptions {
    ContextOptions::default()
        .with_context_name("lumen-tests")
        .with_cpu_threads(4)
        .with_debug_mode(true)
}

/// Test environment holding one context.
///
/// With `enable_global_context` every environment shares one context for
/// the whole test binary; otherwise each gets a fresh one.
pub struct TestEnv {
    context: Arc<Context>,
}

impl TestEnv {
    pub fn new(enable_global_context: bool) -> Result<Self> {
        let context = if enable_global_context {
            match GLOBAL_CONTEXT.get() {
                Some(context) => Arc::clone(context),
                None => {
                    let context = Arc::new(Context::new(test_options())?);
                    Arc::clone(GLOBAL_CONTEXT.get_or_init(|| context))
                }
            }
        } else {
            Arc::new(Context::new(test_options())?)
        };
        Ok(Self { context })
    }

    pub fn shared() -> Result<Self> {
        Self::new(true)
    }

    pub fn isolated() -> Result<Self> {
        Self::new(false)
    }

    pub fn isolated_with(options: ContextOptions) -> Result<Self> {
        Ok(Self {
            context: Arc::new(Context::new(options)?),
        })
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn device(&self) -> Result<Device> {
        self.context.query_device(0)
    }
}
