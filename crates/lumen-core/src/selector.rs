//! Device selection by name: `cpu` or `vulkanN`

use std::fmt;
use std::str::FromStr;

use lumen_backends::BackendType;

use crate::context::Context;
use crate::error::{Error, Result};

/// A device named by backend and ordinal within that backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    Cpu,
    /// The n-th Vulkan adapter of the context.
    Vulkan(usize),
}

impl DeviceSelector {
    pub fn parse(text: &str) -> Result<Self> {
        text.parse()
    }

    pub fn backend_type(&self) -> BackendType {
        match self {
            DeviceSelector::Cpu => BackendType::Cpu,
            DeviceSelector::Vulkan(_) => BackendType::Vulkan,
        }
    }

    fn ordinal(&self) -> usize {
        match self {
            DeviceSelector::Cpu => 0,
            DeviceSelector::Vulkan(n) => *n,
        }
    }

    /// Context index of the selected device.
    ///
    /// # Errors
    ///
    /// `BackendUnavailable` when the context has no device of that backend,
    /// `DeviceIndexOutOfRange` when the ordinal is past the last one.
    pub fn resolve(&self, context: &Context) -> Result<usize> {
        let backend = self.backend_type();
        let matching: Vec<usize> = context
            .device_info_list()
            .enumerate()
            .filter(|(_, info)| info.backend_type() == backend)
            .map(|(index, _)| index)
            .collect();
        if matching.is_empty() {
            return Err(Error::BackendUnavailable {
                backend,
                reason: "no such device in this context".to_string(),
            });
        }
        matching
            .get(self.ordinal())
            .copied()
            .ok_or(Error::DeviceIndexOutOfRange {
                index: self.ordinal(),
                count: matching.len(),
            })
    }
}

impl FromStr for DeviceSelector {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let text = text.trim().to_ascii_lowercase();
        if text == "cpu" {
            return Ok(DeviceSelector::Cpu);
        }
        if let Some(ordinal) = text.strip_prefix("vulkan") {
            if ordinal.is_empty() {
                return Ok(DeviceSelector::Vulkan(0));
            }
            if let Ok(n) = ordinal.parse::<usize>() {
                return Ok(DeviceSelector::Vulkan(n));
            }
        }
        Err(Error::InvalidOptions(format!(
            "unknown device `{text}`; expected `cpu` or `vulkanN`"
        )))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Cpu => f.write_str("cpu"),
            DeviceSelector::Vulkan(n) => write!(f, "vulkan{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContextOptions;

    #[test]
    fn parse_names() {
        assert_eq!(DeviceSelector::parse("cpu").unwrap(), DeviceSelector::Cpu);
        assert_eq!(DeviceSelector::parse("CPU").unwrap(), DeviceSelector::Cpu);
        assert_eq!(DeviceSelector::parse("vulkan").unwrap(), DeviceSelector::Vulkan(0));
        assert_eq!(DeviceSelector::parse("vulkan2").unwrap(), DeviceSelector::Vulkan(2));
        assert!(DeviceSelector::parse("vulkan-1").is_err());
        assert!(DeviceSelector::parse("metal").is_err());
        assert_eq!(DeviceSelector::Vulkan(3).to_string(), "vulkan3");
    }

    #[test]
    fn resolve_against_context() {
        let context = Context::new(ContextOptions::default().with_cpu_threads(1)).unwrap();
        assert_eq!(DeviceSelector::Cpu.resolve(&context).unwrap(), 0);
        assert!(matches!(
            DeviceSelector::Vulkan(0).resolve(&context),
            Err(Error::BackendUnavailable {
                backend: BackendType::Vulkan,
                ..
            })
        ));
    }
}
