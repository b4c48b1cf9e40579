//! Memory-domain tags for container placement.

use std::fmt;

/// The memory domain a container's buffers belong to.
///
/// The core library never copies across a bus; the tag records intended
/// placement so an execution backend can act on it. Freshly constructed
/// containers live on [`Device::Host`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Device {
    /// Process memory.
    #[default]
    Host,
    /// An accelerator ordinal (`0..world_size` within a topology).
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host => write!(f, "host"),
            Self::Accelerator(ordinal) => write!(f, "accel:{ordinal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_display() {
        assert_eq!(format!("{}", Device::Host), "host");
        assert_eq!(format!("{}", Device::Accelerator(2)), "accel:2");
    }
}
