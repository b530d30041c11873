//! Compute pipeline cache for the Vulkan backend
//!
//! Pipelines are created once per kernel and reused. The layout always has
//! one read-write storage binding per buffer argument followed by a uniform
//! parameter block.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{BackendError, Result};
use crate::kernel::KernelDefinition;

pub(crate) struct CachedPipeline {
    pub pipeline: wgpu::ComputePipeline,
    pub layout: wgpu::BindGroupLayout,
}

#[derive(Default)]
pub(crate) struct PipelineCache {
    map: Mutex<HashMap<String, Arc<CachedPipeline>>>,
}

impl PipelineCache {
    pub fn get_or_create(&self, device: &wgpu::Device, kernel: &KernelDefinition) -> Result<Arc<CachedPipeline>> {
        let key = format!("{}::{}", kernel.set(), kernel.name());
        if let Some(cached) = self.map.lock().get(&key) {
            return Ok(Arc::clone(cached));
        }

        let created = Arc::new(lumen_tracing::timed_block!("vulkan.pipeline_create", {
            create_pipeline(device, kernel)
        })?);
        self.map.lock().insert(key, Arc::clone(&created));
        Ok(created)
    }
}

fn create_pipeline(device: &wgpu::Device, kernel: &KernelDefinition) -> Result<CachedPipeline> {
    let wgsl = kernel.wgsl().ok_or_else(|| {
        BackendError::Unsupported(format!("kernel `{}` has no WGSL implementation", kernel.name()))
    })?;

    let buffer_count = kernel.buffer_count();
    let mut entries = Vec::with_capacity(buffer_count + 1);
    for binding in 0..buffer_count {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: binding as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only: false },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        });
    }
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: buffer_count as u32,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    });

    device.push_error_scope(wgpu::ErrorFilter::Validation);

    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(kernel.name()),
        source: wgpu::ShaderSource::Wgsl(wgsl.source.as_str().into()),
    });
    let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("lumen_kernel_bgl"),
        entries: &entries,
    });
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("lumen_kernel_layout"),
        bind_group_layouts: &[&layout],
        push_constant_ranges: &[],
    });
    let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(kernel.name()),
        layout: Some(&pipeline_layout),
        module: &module,
        entry_point: Some(wgsl.entry_point.as_str()),
        compilation_options: Default::default(),
        cache: None,
    });

    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(BackendError::InvalidLaunch(format!(
            "kernel `{}` failed to compile: {err}",
            kernel.name()
        )));
    }

    tracing::debug!(kernel = kernel.name(), bindings = buffer_count + 1, "compute pipeline created");
    Ok(CachedPipeline { pipeline, layout })
}
