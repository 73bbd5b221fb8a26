//! Opaque handles exchanged with the caller
//!
//! A handle is a 64-bit value packing a slot index and a generation tag. The
//! caller can only pass it back to the bridge or release it. `0` is never issued
//! and serves as the null handle on the flat C surface.

use slotmap::{Key, KeyData};

slotmap::new_key_type! {
    /// Registry slot key; the generation tag makes released keys unresolvable
    pub(crate) struct ObjectKey;
}

impl ObjectKey {
    /// Decodes a raw handle value
    ///
    /// Returns `None` for the null handle and for values that could not have
    /// been produced by [`ObjectKey::to_raw`].
    pub(crate) fn from_raw(raw: u64) -> Option<Self> {
        if raw == 0 {
            return None;
        }
        let data = KeyData::from_ffi(raw);
        // from_ffi normalizes the generation; anything that does not survive the
        // round trip was never issued
        (data.as_ffi() == raw).then(|| data.into())
    }

    pub(crate) fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }
}

/// Common surface of the typed handles, used by the registry
pub(crate) trait RawHandle: Copy {
    /// Object kind named in error messages
    const KIND: &'static str;

    fn raw(self) -> u64;

    fn from_key(key: ObjectKey) -> Self;
}

macro_rules! define_handles {
    ($($(#[$meta:meta])* $name:ident => $label:literal;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            #[repr(transparent)]
            pub struct $name(u64);

            impl $name {
                /// Human-readable object kind, used in error messages
                pub const KIND: &'static str = $label;

                /// The null handle
                pub const NULL: Self = Self(0);

                /// Wraps a raw handle value received across the boundary
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// Raw value to hand across the boundary
                pub const fn to_raw(self) -> u64 {
                    self.0
                }

                /// Whether this is the null handle
                pub const fn is_null(self) -> bool {
                    self.0 == 0
                }
            }

            impl RawHandle for $name {
                const KIND: &'static str = $label;

                fn raw(self) -> u64 {
                    self.0
                }

                fn from_key(key: ObjectKey) -> Self {
                    Self(key.to_raw())
                }
            }

            impl From<$name> for u64 {
                fn from(handle: $name) -> u64 {
                    handle.0
                }
            }
        )*
    };
}

define_handles! {
    /// A logical GPU device
    DeviceHandle => "device";
    /// An ordered submission channel bound to one device
    CommandQueueHandle => "command queue";
    /// A compiled shader library
    LibraryHandle => "library";
    /// A named entry point inside a library
    FunctionHandle => "function";
    /// A linked compute pipeline
    ComputePipelineHandle => "compute pipeline";
    /// A linked render pipeline
    RenderPipelineHandle => "render pipeline";
    /// A linear memory resource
    BufferHandle => "buffer";
    /// A 2D image resource
    TextureHandle => "texture";
    /// A unit of submission
    CommandBufferHandle => "command buffer";
    /// A scoped recording session inside a command buffer
    EncoderHandle => "encoder";
    /// A presentable surface texture
    DrawableHandle => "drawable";
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_raw_round_trip() {
        let mut slots = SlotMap::<ObjectKey, ()>::with_key();
        let key = slots.insert(());
        let raw = key.to_raw();
        assert_ne!(raw, 0);
        assert_eq!(ObjectKey::from_raw(raw), Some(key));
        assert_eq!(BufferHandle::from_key(key).to_raw(), raw);
    }

    #[test]
    fn test_null_and_malformed_values_are_rejected() {
        assert_eq!(ObjectKey::from_raw(0), None);
        // Generation tags of live keys are always odd
        assert_eq!(ObjectKey::from_raw(2 << 32), None);
        assert!(DeviceHandle::NULL.is_null());
    }
}
