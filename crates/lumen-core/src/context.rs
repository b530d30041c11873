//! Contexts: device enumeration and the device registry

use std::fmt;
use std::sync::{Arc, Weak};

use lumen_backends::{Backend, BackendType, CpuBackend, CpuConfig, DeviceInfo};
#[cfg(feature = "vulkan")]
use lumen_backends::{VulkanAdapter, VulkanBackend, VulkanConfig};
use parking_lot::Mutex;

use crate::config::ContextOptions;
use crate::device::{Device, DeviceShared};
use crate::error::{Error, Result};

enum DeviceSource {
    Cpu(CpuConfig, DeviceInfo),
    #[cfg(feature = "vulkan")]
    Vulkan(VulkanAdapter, VulkanConfig),
}

impl DeviceSource {
    fn info(&self) -> &DeviceInfo {
        match self {
            DeviceSource::Cpu(_, info) => info,
            #[cfg(feature = "vulkan")]
            DeviceSource::Vulkan(adapter, _) => adapter.info(),
        }
    }

    fn open(&self) -> Result<Box<dyn Backend>> {
        match self {
            DeviceSource::Cpu(config, _) => Ok(Box::new(CpuBackend::new(config.clone())?)),
            #[cfg(feature = "vulkan")]
            DeviceSource::Vulkan(adapter, config) => Ok(Box::new(VulkanBackend::new(adapter, config.clone())?)),
        }
    }
}

/// Entry point of the runtime: enumerates devices and hands them out.
///
/// Devices are created on first query and shared afterwards. The context
/// keeps only weak references, so a device is torn down once every holder
/// has released it and is recreated by the next query.
pub struct Context {
    options: ContextOptions,
    sources: Vec<DeviceSource>,
    registry: Mutex<Vec<Weak<DeviceShared>>>,
}

impl Context {
    /// Create a context with every backend enabled in `options`.
    ///
    /// # Errors
    ///
    /// `InvalidOptions` when no backend is enabled, `BackendUnavailable`
    /// when an enabled backend is not compiled in or finds no device.
    #[tracing::instrument(skip(options), fields(context = %options.context_name))]
    pub fn new(options: ContextOptions) -> Result<Self> {
        if options.enabled_backends.is_empty() {
            return Err(Error::InvalidOptions("no backend enabled".to_string()));
        }

        let mut sources = Vec::new();
        for backend in BackendType::ALL {
            if !options.is_backend_enabled(backend) {
                continue;
            }
            if !lumen_backends::is_compiled(backend) {
                return Err(Error::BackendUnavailable {
                    backend,
                    reason: format!("built without the `{backend}` feature"),
                });
            }
            match backend {
                BackendType::Cpu => {
                    let config = options.cpu_config();
                    let info = CpuBackend::describe(&config);
                    sources.push(DeviceSource::Cpu(config, info));
                }
                BackendType::Vulkan => sources.extend(vulkan_sources(&options)?),
            }
        }

        tracing::info!(
            devices = sources.len(),
            version = %format!("{}.{}.{}", options.version_major, options.version_minor, options.version_patch),
            "context created"
        );

        Ok(Self {
            registry: Mutex::new(vec![Weak::new(); sources.len()]),
            options,
            sources,
        })
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    /// Capabilities of every device, in index order.
    ///
    /// Heap usage is live for devices that are currently open; a device
    /// nobody holds has no buffers and reports zero usage.
    pub fn device_info_list(&self) -> impl ExactSizeIterator<Item = DeviceInfo> + '_ {
        (0..self.sources.len()).map(move |index| self.device_info(index))
    }

    fn device_info(&self, index: usize) -> DeviceInfo {
        let open = self.registry.lock()[index].upgrade();
        match open {
            Some(shared) => shared.backend.snapshot(),
            None => self.sources[index].info().clone(),
        }
    }

    pub fn device_count(&self) -> usize {
        self.sources.len()
    }

    /// Whether any device of the context runs on `backend`.
    pub fn has_backend(&self, backend: BackendType) -> bool {
        self.sources.iter().any(|source| source.info().backend_type() == backend)
    }

    /// Device `index`, shared with every other live holder of it.
    pub fn query_device(&self, index: usize) -> Result<Device> {
        let source = self.sources.get(index).ok_or(Error::DeviceIndexOutOfRange {
            index,
            count: self.sources.len(),
        })?;

        let mut registry = self.registry.lock();
        if let Some(shared) = registry[index].upgrade() {
            return Ok(Device::from_shared(shared));
        }

        let shared = Arc::new(DeviceShared {
            index,
            backend: source.open()?,
            debug: self.options.enable_debug_mode,
        });
        registry[index] = Arc::downgrade(&shared);
        tracing::info!(index, device = source.info().name(), "device opened");
        Ok(Device::from_shared(shared))
    }
}

#[cfg(feature = "vulkan")]
fn vulkan_sources(options: &ContextOptions) -> Result<Vec<DeviceSource>> {
    let config = VulkanConfig {
        debug: options.enable_debug_mode,
        ..VulkanConfig::default()
    };
    let adapters = VulkanBackend::enumerate(&config);
    if adapters.is_empty() {
        return Err(Error::BackendUnavailable {
            backend: BackendType::Vulkan,
            reason: "no Vulkan adapter found".to_string(),
        });
    }
    Ok(adapters
        .into_iter()
        .map(|adapter| DeviceSource::Vulkan(adapter, config.clone()))
        .collect())
}

#[cfg(not(feature = "vulkan"))]
fn vulkan_sources(_options: &ContextOptions) -> Result<Vec<DeviceSource>> {
    Err(Error::BackendUnavailable {
        backend: BackendType::Vulkan,
        reason: "built without the `vulkan` feature".to_string(),
    })
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.options.context_name)
            .field("devices", &self.sources.iter().map(|source| source.info().name()).collect::<Vec<_>>())
            .finish()
    }
}
