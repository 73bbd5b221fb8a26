//! Bridge configuration: argument-table limits and recording options

use crate::backend::DeviceLimits;

/// Overrides of the argument-table size
///
/// Values above what the device reports are clamped to the device limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BindingLimits {
    /// Number of buffer slots; the device limit when unset
    pub max_buffer_slots: Option<u32>,
    /// Number of texture slots; the device limit when unset
    pub max_texture_slots: Option<u32>,
}

impl BindingLimits {
    pub(crate) fn apply(&self, mut limits: DeviceLimits) -> DeviceLimits {
        if let Some(slots) = self.max_buffer_slots {
            limits.max_buffer_slots = limits.max_buffer_slots.min(slots);
        }
        if let Some(slots) = self.max_texture_slots {
            limits.max_texture_slots = limits.max_texture_slots.min(slots);
        }
        limits
    }
}

/// Bridge-wide settings
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Argument-table size overrides
    pub binding_limits: BindingLimits,
    /// Largest inline constant block accepted by `set_bytes`
    pub max_inline_bytes: usize,
    /// Attach debug labels to native passes
    pub labels: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            binding_limits: BindingLimits::default(),
            max_inline_bytes: 4096,
            labels: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_limits_never_exceed_device() {
        let device = DeviceLimits {
            max_buffer_slots: 31,
            max_texture_slots: 16,
            max_buffer_size: 1 << 20,
            max_texture_dimension: 4096,
            max_threads_per_threadgroup: 256,
            copy_alignment: 4,
        };

        let unchanged = BindingLimits::default().apply(device);
        assert_eq!(unchanged, device);

        let limited = BindingLimits {
            max_buffer_slots: Some(8),
            max_texture_slots: Some(64),
        }
        .apply(device);
        assert_eq!(limited.max_buffer_slots, 8);
        assert_eq!(limited.max_texture_slots, 16);
    }
}
