//! Kernels bound to a device, their arguments and dispatch

use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use lumen_backends::kernel::{ArgKind, LaunchGeometry};
use lumen_backends::{DispatchArg, DispatchRequest, KernelDefinition};

use crate::buffer::{raw_of, Buffer, BufferCommon, LockedSet, RawBuffer, ReinterpBuffer};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::launch::{KernelLaunchOptions, LaunchResult};

/// One positional kernel argument.
pub enum KernelArg<'a> {
    /// A buffer or view, bound over its whole current size.
    Buffer(&'a dyn BufferCommon),
    /// Plain data, passed by value.
    Pod(Vec<u8>),
}

impl<'a> KernelArg<'a> {
    pub fn buffer<B: BufferCommon>(buffer: &'a B) -> Self {
        KernelArg::Buffer(buffer)
    }

    pub fn pod<T: Pod>(value: T) -> Self {
        KernelArg::Pod(bytemuck::bytes_of(&value).to_vec())
    }
}

impl<'a, T: Pod> From<&'a Buffer<T>> for KernelArg<'a> {
    fn from(buffer: &'a Buffer<T>) -> Self {
        KernelArg::Buffer(buffer)
    }
}

impl<'a, 'b: 'a, U: Pod> From<&'a ReinterpBuffer<'b, U>> for KernelArg<'a> {
    fn from(view: &'a ReinterpBuffer<'b, U>) -> Self {
        KernelArg::Buffer(view)
    }
}

impl fmt::Debug for KernelArg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Buffer(buffer) => f
                .debug_struct("Buffer")
                .field("element_size", &buffer.element_size())
                .field("size", &buffer.size())
                .finish(),
            KernelArg::Pod(bytes) => f.debug_tuple("Pod").field(&bytes.len()).finish(),
        }
    }
}

/// A compiled kernel bound to one device.
///
/// The signature (dimension, argument kinds) is fixed by the definition it
/// was created from.
#[derive(Clone)]
pub struct Kernel {
    device: Device,
    definition: Arc<KernelDefinition>,
}

impl Kernel {
    pub(crate) fn new(device: Device, definition: Arc<KernelDefinition>) -> Self {
        Self { device, definition }
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    pub fn set_name(&self) -> &str {
        self.definition.set()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn definition(&self) -> &Arc<KernelDefinition> {
        &self.definition
    }

    pub fn dimension_size(&self) -> u32 {
        self.definition.dimension()
    }

    pub fn arg_size(&self) -> usize {
        self.definition.args().len()
    }

    pub fn buffer_size(&self) -> usize {
        self.definition.buffer_count()
    }

    pub fn pod_size(&self) -> usize {
        self.definition.pod_count()
    }

    /// Defaults for [`run`](Self::run): the kernel's dimension, queue 0, no
    /// offset and no fence. The work size is left empty.
    pub fn create_options(&self) -> KernelLaunchOptions {
        KernelLaunchOptions::new(self.dimension_size())
    }

    /// Bind `args` positionally and submit one dispatch.
    ///
    /// Arguments, options and geometry are checked before anything is
    /// submitted.
    ///
    /// # Errors
    ///
    /// `ArgumentMismatch` when the count or the kind of an argument differs
    /// from the signature, `InvalidOptions` for a wrong dimension or a
    /// missing work size, `BufferMapped` when an argument is mapped.
    #[tracing::instrument(
        skip_all,
        fields(
            kernel = %self.definition.name(),
            queue = options.queue_index,
            work_size = ?options.work_size
        )
    )]
    pub fn run(&self, args: &[KernelArg<'_>], options: &KernelLaunchOptions) -> Result<LaunchResult> {
        self.check_args(args)?;
        if options.dimension != self.dimension_size() {
            return Err(Error::InvalidOptions(format!(
                "kernel `{}` is {}-dimensional, options ask for {}",
                self.name(),
                self.dimension_size(),
                options.dimension
            )));
        }
        if options.work_size.is_empty() {
            return Err(Error::InvalidOptions("work size is not set".to_string()));
        }

        let info = self.device.shared().info();
        let geometry = LaunchGeometry::new(
            options.dimension,
            &options.work_size,
            &options.global_id_offset,
            info.work_group_size(),
            info.max_work_group_count(),
        )?;

        let raws: Vec<&RawBuffer> = args
            .iter()
            .filter_map(|arg| match arg {
                KernelArg::Buffer(buffer) => Some(raw_of(*buffer)),
                KernelArg::Pod(_) => None,
            })
            .collect();
        let locked = LockedSet::lock(&raws);
        locked.ensure_unmapped("run a kernel on")?;

        let mut bound = Vec::with_capacity(args.len());
        for arg in args {
            bound.push(match arg {
                KernelArg::Buffer(buffer) => {
                    let raw = raw_of(*buffer);
                    DispatchArg::Buffer {
                        handle: locked.handle(raw)?,
                        offset: 0,
                        len: locked.state(raw).map_or(0, |state| state.size_bytes),
                    }
                }
                KernelArg::Pod(bytes) => DispatchArg::Pod(bytes.clone()),
            });
        }

        let shared = self.device.shared();
        let submission = shared.backend.dispatch(DispatchRequest {
            kernel: Arc::clone(&self.definition),
            args: bound,
            geometry,
            queue: options.queue_index,
            want_fence: options.request_fence,
            label: options.label.clone(),
        })?;
        if shared.debug {
            tracing::debug!(
                device = shared.index,
                work_items = options.total_work_items(),
                fence = options.request_fence,
                "kernel submitted"
            );
        }
        Ok(LaunchResult::from_submission(submission, options.request_fence))
    }

    fn check_args(&self, args: &[KernelArg<'_>]) -> Result<()> {
        let mismatch = |reason: String| Error::ArgumentMismatch {
            kernel: self.name().to_string(),
            reason,
        };
        let expected = self.definition.args();
        if args.len() != expected.len() {
            return Err(mismatch(format!("expected {} argument(s), got {}", expected.len(), args.len())));
        }

        for (index, (arg, kind)) in args.iter().zip(expected).enumerate() {
            match (arg, kind) {
                (KernelArg::Buffer(buffer), ArgKind::Buffer { element_size }) => {
                    if buffer.element_size() != *element_size {
                        return Err(mismatch(format!(
                            "argument {index}: buffer of {}-byte elements, expected {element_size}-byte elements",
                            buffer.element_size()
                        )));
                    }
                    if !Arc::ptr_eq(&raw_of(*buffer).device, self.device.shared()) {
                        return Err(Error::InvalidUsage(format!(
                            "argument {index} of kernel `{}` lives on another device",
                            self.name()
                        )));
                    }
                }
                (KernelArg::Pod(bytes), ArgKind::Pod { size }) => {
                    if bytes.len() != *size {
                        return Err(mismatch(format!(
                            "argument {index}: {} byte(s) of plain data, expected {size}",
                            bytes.len()
                        )));
                    }
                }
                (KernelArg::Buffer(_), ArgKind::Pod { .. }) => {
                    return Err(mismatch(format!("argument {index}: expected plain data, got a buffer")));
                }
                (KernelArg::Pod(_), ArgKind::Buffer { .. }) => {
                    return Err(mismatch(format!("argument {index}: expected a buffer, got plain data")));
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("set", &self.set_name())
            .field("name", &self.name())
            .field("dimension", &self.dimension_size())
            .field("args", &self.arg_size())
            .field("device", &self.device.index())
            .finish()
    }
}
