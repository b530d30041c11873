use std::collections::BTreeMap;
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use bytemuck::Pod;

use super::{KernelArgs, KernelAssertion, WorkItem};
use crate::error::{BackendError, Result};

/// CPU implementation of a kernel, invoked once per work-item.
pub type KernelBody = Arc<dyn Fn(&WorkItem, &KernelArgs<'_>) -> std::result::Result<(), KernelAssertion> + Send + Sync>;

/// Kind of one positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgKind {
    Buffer { element_size: usize },
    Pod { size: usize },
}

impl ArgKind {
    pub fn buffer<T: Pod>() -> Self {
        ArgKind::Buffer {
            element_size: size_of::<T>(),
        }
    }

    pub fn pod<T: Pod>() -> Self {
        ArgKind::Pod { size: size_of::<T>() }
    }

    pub fn is_buffer(&self) -> bool {
        matches!(self, ArgKind::Buffer { .. })
    }
}

/// WGSL module for the Vulkan backend.
///
/// Bindings follow one convention: buffer arguments at `@binding(0..N)` of
/// group 0 in argument order, then a uniform at `@binding(N)` holding the
/// global id offset and the work size as two `vec4<u32>`, followed by the
/// pod arguments, each padded to 16 bytes. The shader declares the device's
/// work-group shape and skips ids outside the work size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WgslSource {
    pub source: String,
    pub entry_point: String,
}

/// Compiled signature of one kernel and its backend bodies.
#[derive(Clone)]
pub struct KernelDefinition {
    set: String,
    name: String,
    dimension: u32,
    args: Vec<ArgKind>,
    cpu_body: Option<KernelBody>,
    wgsl: Option<WgslSource>,
}

impl KernelDefinition {
    pub fn builder(name: impl Into<String>) -> KernelBuilder {
        KernelBuilder {
            name: name.into(),
            dimension: 1,
            args: Vec::new(),
            cpu_body: None,
            wgsl: None,
        }
    }

    /// Name of the kernel set this definition was registered in.
    pub fn set(&self) -> &str {
        &self.set
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn args(&self) -> &[ArgKind] {
        &self.args
    }

    pub fn buffer_count(&self) -> usize {
        self.args.iter().filter(|arg| arg.is_buffer()).count()
    }

    pub fn pod_count(&self) -> usize {
        self.args.len() - self.buffer_count()
    }

    pub fn cpu_body(&self) -> Option<&KernelBody> {
        self.cpu_body.as_ref()
    }

    pub fn wgsl(&self) -> Option<&WgslSource> {
        self.wgsl.as_ref()
    }
}

impl fmt::Debug for KernelDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDefinition")
            .field("set", &self.set)
            .field("name", &self.name)
            .field("dimension", &self.dimension)
            .field("args", &self.args)
            .field("cpu_body", &self.cpu_body.is_some())
            .field("wgsl", &self.wgsl.is_some())
            .finish()
    }
}

/// Builder for [`KernelDefinition`].
pub struct KernelBuilder {
    name: String,
    dimension: u32,
    args: Vec<ArgKind>,
    cpu_body: Option<KernelBody>,
    wgsl: Option<WgslSource>,
}

impl KernelBuilder {
    pub fn dimension(mut self, dimension: u32) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn arg(mut self, kind: ArgKind) -> Self {
        self.args.push(kind);
        self
    }

    pub fn buffer<T: Pod>(self) -> Self {
        self.arg(ArgKind::buffer::<T>())
    }

    pub fn pod<T: Pod>(self) -> Self {
        self.arg(ArgKind::pod::<T>())
    }

    pub fn cpu<F>(mut self, body: F) -> Self
    where
        F: Fn(&WorkItem, &KernelArgs<'_>) -> std::result::Result<(), KernelAssertion> + Send + Sync + 'static,
    {
        self.cpu_body = Some(Arc::new(body));
        self
    }

    pub fn wgsl(mut self, source: impl Into<String>, entry_point: impl Into<String>) -> Self {
        self.wgsl = Some(WgslSource {
            source: source.into(),
            entry_point: entry_point.into(),
        });
        self
    }

    pub fn build(self) -> Result<KernelDefinition> {
        if !(1..=3).contains(&self.dimension) {
            return Err(BackendError::InvalidLaunch(format!(
                "kernel `{}` declares dimension {}",
                self.name, self.dimension
            )));
        }
        if self.args.iter().any(|arg| matches!(arg, ArgKind::Buffer { element_size: 0 })) {
            return Err(BackendError::InvalidLaunch(format!(
                "kernel `{}` has a buffer argument of zero-sized elements",
                self.name
            )));
        }
        Ok(KernelDefinition {
            set: String::new(),
            name: self.name,
            dimension: self.dimension,
            args: self.args,
            cpu_body: self.cpu_body,
            wgsl: self.wgsl,
        })
    }
}

/// Named collection of kernels produced by one compilation.
#[derive(Debug, Clone, Default)]
pub struct KernelSet {
    name: String,
    kernels: BTreeMap<String, Arc<KernelDefinition>>,
}

impl KernelSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kernels: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register `definition`, replacing any kernel with the same name.
    pub fn insert(&mut self, mut definition: KernelDefinition) {
        definition.set = self.name.clone();
        self.kernels.insert(definition.name.clone(), Arc::new(definition));
    }

    pub fn with_kernel(mut self, definition: KernelDefinition) -> Self {
        self.insert(definition);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<KernelDefinition>> {
        self.kernels.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kernels.keys().map(String::as_str)
    }

    /// Bind kernel `name` compiled for `dimension` dimensions.
    pub fn params(&self, name: &str, dimension: u32) -> Result<KernelInitParams> {
        let definition = self.get(name).ok_or_else(|| {
            BackendError::InvalidLaunch(format!("kernel set `{}` has no kernel `{name}`", self.name))
        })?;
        if definition.dimension != dimension {
            return Err(BackendError::InvalidLaunch(format!(
                "kernel `{}::{name}` is {}-dimensional, requested {dimension}",
                self.name, definition.dimension
            )));
        }
        Ok(KernelInitParams {
            definition: Arc::clone(definition),
        })
    }
}

/// Opaque value from which a device creates a kernel.
#[derive(Debug, Clone)]
pub struct KernelInitParams {
    definition: Arc<KernelDefinition>,
}

impl KernelInitParams {
    pub fn definition(&self) -> &Arc<KernelDefinition> {
        &self.definition
    }
}

/// Bind a kernel of a [`KernelSet`] by identifier and dimensionality.
///
/// ```
/// use lumen_backends::kernel::{KernelDefinition, KernelSet};
/// use lumen_backends::kernel_params;
///
/// let set = KernelSet::new("math").with_kernel(
///     KernelDefinition::builder("scale").buffer::<f32>().pod::<f32>().build()?,
/// );
/// let params = kernel_params!(set, scale, 1)?;
/// assert_eq!(params.definition().set(), "math");
/// # Ok::<(), lumen_backends::BackendError>(())
/// ```
#[macro_export]
macro_rules! kernel_params {
    ($set:expr, $kernel:ident, $dimension:expr) => {
        $set.params(::core::stringify!($kernel), $dimension)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saxpy() -> KernelDefinition {
        KernelDefinition::builder("saxpy")
            .buffer::<f32>()
            .buffer::<f32>()
            .pod::<f32>()
            .cpu(|_, _| Ok(()))
            .build()
            .unwrap()
    }

    #[test]
    fn signature_counts() {
        let definition = saxpy();
        assert_eq!(definition.dimension(), 1);
        assert_eq!(definition.args().len(), 3);
        assert_eq!(definition.buffer_count(), 2);
        assert_eq!(definition.pod_count(), 1);
        assert!(definition.cpu_body().is_some());
        assert!(definition.wgsl().is_none());
    }

    #[test]
    fn params_match_name_and_dimension() {
        let set = KernelSet::new("blas").with_kernel(saxpy());

        let params = kernel_params!(set, saxpy, 1).unwrap();
        assert_eq!(params.definition().set(), "blas");
        assert_eq!(params.definition().name(), "saxpy");

        assert!(kernel_params!(set, saxpy, 2).is_err());
        assert!(kernel_params!(set, gemm, 1).is_err());
        assert_eq!(set.names().collect::<Vec<_>>(), ["saxpy"]);
    }

    #[test]
    fn builder_rejects_invalid_dimension() {
        assert!(KernelDefinition::builder("k").dimension(4).build().is_err());
        assert!(KernelDefinition::builder("k").dimension(0).build().is_err());
        assert!(KernelDefinition::builder("k").buffer::<()>().build().is_err());
    }
}
