use std::fmt;

/// Failed device-side assertion raised by a kernel body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelAssertion {
    kernel: String,
    message: String,
    values: Vec<String>,
}

impl KernelAssertion {
    /// The kernel name is filled in by the backend that ran the body.
    pub fn new(message: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            kernel: String::new(),
            message: message.into(),
            values,
        }
    }

    pub fn with_kernel(mut self, kernel: &str) -> Self {
        if self.kernel.is_empty() {
            self.kernel = kernel.to_string();
        }
        self
    }

    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Offending values, rendered as `name = value`.
    pub fn values(&self) -> &[String] {
        &self.values
    }
}

impl fmt::Display for KernelAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kernel `{}` assertion failed: {}", self.kernel, self.message)?;
        if !self.values.is_empty() {
            write!(f, " [{}]", self.values.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for KernelAssertion {}

/// Abort the current kernel dispatch when `cond` is false.
///
/// Usable inside CPU kernel bodies, which return
/// `Result<(), KernelAssertion>`. Trailing expressions are captured as
/// `name = value` pairs for the error report.
///
/// ```
/// use lumen_backends::kernel::{KernelArgs, KernelAssertion, WorkItem};
/// use lumen_backends::kernel_assert;
///
/// fn body(item: &WorkItem, _args: &KernelArgs<'_>) -> Result<(), KernelAssertion> {
///     let i = item.global_id(0);
///     kernel_assert!(i < 1024, "index in range", i);
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! kernel_assert {
    ($cond:expr $(,)?) => {
        $crate::kernel_assert!($cond, "assertion failed")
    };
    ($cond:expr, $msg:expr $(, $value:expr)* $(,)?) => {
        if !($cond) {
            return ::core::result::Result::Err($crate::kernel::KernelAssertion::new(
                ::std::format!("{} ({})", $msg, ::core::stringify!($cond)),
                ::std::vec![$(::std::format!("{} = {:?}", ::core::stringify!($value), $value)),*],
            ));
        }
    };
}
