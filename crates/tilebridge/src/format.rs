//! Numeric constants and plain descriptor records
//!
//! The integer values of every enumeration here match the native API's own
//! enumeration values (`MTLPixelFormat`, `MTLBlendFactor`, ...), so callers on the
//! other side of the flat C boundary can pass them through without a translation
//! table.

use crate::error::BridgeError;

/// Declares a `#[repr(u32)]` enum together with its `TryFrom<u32>` conversion
macro_rules! numeric_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl TryFrom<u32> for $name {
            type Error = BridgeError;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)*
                    _ => Err(BridgeError::argument(format!("{value} is not a valid {}", stringify!($name)))),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

numeric_enum! {
    /// Texel formats supported for textures and render targets
    pub enum PixelFormat {
        R8Unorm = 10,
        R32Float = 55,
        Rgba8Unorm = 70,
        Rgba8UnormSrgb = 71,
        Bgra8Unorm = 80,
        Bgra8UnormSrgb = 81,
        Rg32Float = 105,
        Rgba16Float = 115,
        Rgba32Float = 125,
    }
}

impl PixelFormat {
    /// Size of one texel in bytes
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R32Float | Self::Rgba8Unorm | Self::Rgba8UnormSrgb | Self::Bgra8Unorm | Self::Bgra8UnormSrgb => 4,
            Self::Rg32Float | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Whether shaders may write this format through a storage binding
    pub const fn supports_storage(self) -> bool {
        matches!(self, Self::R32Float | Self::Rgba8Unorm | Self::Rg32Float | Self::Rgba16Float | Self::Rgba32Float)
    }
}

numeric_enum! {
    /// CPU/GPU visibility policy of a buffer
    ///
    /// The values are the storage-mode bits of the native resource options word.
    pub enum StorageMode {
        /// CPU and GPU read and write the same memory
        Shared = 0,
        /// Separate CPU and GPU copies, synchronized on transfer
        Managed = 16,
        /// GPU-only; populated through blit copies
        Private = 32,
    }
}

impl StorageMode {
    /// Mask selecting the storage-mode bits of a resource options word
    pub const OPTIONS_MASK: u32 = 0xf0;

    /// Extracts the storage mode from a raw resource options word
    ///
    /// Bits outside [`Self::OPTIONS_MASK`] are rejected; the bridge exposes no
    /// other resource options.
    pub fn from_options(options: u32) -> Result<Self, BridgeError> {
        if options & !Self::OPTIONS_MASK != 0 {
            return Err(BridgeError::argument(format!("unsupported resource options {options:#x}")));
        }
        Self::try_from(options)
    }

    /// Whether the CPU may read or write the buffer contents directly
    pub const fn is_cpu_visible(self) -> bool {
        !matches!(self, Self::Private)
    }
}

numeric_enum! {
    /// Source or destination factor of the blend equation
    pub enum BlendFactor {
        Zero = 0,
        One = 1,
        SourceColor = 2,
        OneMinusSourceColor = 3,
        SourceAlpha = 4,
        OneMinusSourceAlpha = 5,
        DestinationColor = 6,
        OneMinusDestinationColor = 7,
        DestinationAlpha = 8,
        OneMinusDestinationAlpha = 9,
    }
}

numeric_enum! {
    /// Operation combining the weighted source and destination
    pub enum BlendOperation {
        Add = 0,
        Subtract = 1,
        ReverseSubtract = 2,
        Min = 3,
        Max = 4,
    }
}

numeric_enum! {
    /// Primitive topology of a draw call
    pub enum PrimitiveType {
        Point = 0,
        Line = 1,
        LineStrip = 2,
        Triangle = 3,
        TriangleStrip = 4,
    }
}

impl PrimitiveType {
    /// All topologies, in numeric order
    pub const ALL: [Self; 5] = [Self::Point, Self::Line, Self::LineStrip, Self::Triangle, Self::TriangleStrip];
}

numeric_enum! {
    /// What happens to the attachment contents when a render pass begins
    pub enum LoadAction {
        DontCare = 0,
        Load = 1,
        Clear = 2,
    }
}

numeric_enum! {
    /// What happens to the attachment contents when a render pass ends
    pub enum StoreAction {
        DontCare = 0,
        Store = 1,
    }
}

/// RGBA clear color in normalized floating point
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[repr(C)]
pub struct ClearColor {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
    pub alpha: f64,
}

impl ClearColor {
    pub const fn new(red: f64, green: f64, blue: f64, alpha: f64) -> Self {
        Self { red, green, blue, alpha }
    }
}

/// Allocation parameters of a 2D texture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDescriptor {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// Texel format
    pub format: PixelFormat,
    /// Whether shaders may write the texture through a storage binding
    pub writable: bool,
}

impl TextureDescriptor {
    /// RGBA8 texture of the given size, read-only to shaders
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: PixelFormat::Rgba8Unorm,
            writable: false,
        }
    }

    /// Returns a copy with the given format
    pub const fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Returns a copy with the writable flag set
    pub const fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    /// Tightly packed row length in bytes
    pub const fn row_bytes(&self) -> u64 {
        self.width as u64 * self.format.bytes_per_pixel() as u64
    }
}

/// Fixed-function color blending of a render pipeline
///
/// Mirrors a standard alpha-compositing blend unit: separate factors and
/// operations for the RGB and alpha channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendState {
    pub rgb_source_factor: BlendFactor,
    pub rgb_destination_factor: BlendFactor,
    pub rgb_operation: BlendOperation,
    pub alpha_source_factor: BlendFactor,
    pub alpha_destination_factor: BlendFactor,
    pub alpha_operation: BlendOperation,
}

impl BlendState {
    /// Replaces the destination with the source
    pub const REPLACE: Self = Self {
        rgb_source_factor: BlendFactor::One,
        rgb_destination_factor: BlendFactor::Zero,
        rgb_operation: BlendOperation::Add,
        alpha_source_factor: BlendFactor::One,
        alpha_destination_factor: BlendFactor::Zero,
        alpha_operation: BlendOperation::Add,
    };

    /// Classic "source over" alpha compositing with non-premultiplied color
    pub const ALPHA_BLENDING: Self = Self {
        rgb_source_factor: BlendFactor::SourceAlpha,
        rgb_destination_factor: BlendFactor::OneMinusSourceAlpha,
        rgb_operation: BlendOperation::Add,
        alpha_source_factor: BlendFactor::One,
        alpha_destination_factor: BlendFactor::OneMinusSourceAlpha,
        alpha_operation: BlendOperation::Add,
    };
}

impl Default for BlendState {
    fn default() -> Self {
        Self::REPLACE
    }
}

/// Fixed-function state of a render pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderPipelineDescriptor {
    /// Format of the single color attachment
    pub pixel_format: PixelFormat,
    /// Whether blending is enabled; when false `blend` is ignored
    pub blend_enabled: bool,
    /// Blend equation used when `blend_enabled` is set
    pub blend: BlendState,
}

impl RenderPipelineDescriptor {
    /// Opaque rendering into the given format
    pub const fn new(pixel_format: PixelFormat) -> Self {
        Self {
            pixel_format,
            blend_enabled: false,
            blend: BlendState::REPLACE,
        }
    }

    /// Returns a copy with blending enabled using the given equation
    pub const fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend_enabled = true;
        self.blend = blend;
        self
    }

    /// The blend equation in effect, if any
    pub const fn effective_blend(&self) -> Option<BlendState> {
        if self.blend_enabled { Some(self.blend) } else { None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_values_match_native_enumerations() {
        assert_eq!(u32::from(PixelFormat::Rgba8Unorm), 70);
        assert_eq!(u32::from(PixelFormat::Bgra8Unorm), 80);
        assert_eq!(u32::from(BlendFactor::OneMinusSourceAlpha), 5);
        assert_eq!(u32::from(BlendOperation::Add), 0);
        assert_eq!(u32::from(PrimitiveType::TriangleStrip), 4);
        assert_eq!(u32::from(StorageMode::Managed), 1 << 4);
        assert_eq!(u32::from(StorageMode::Private), 2 << 4);
    }

    #[test]
    fn test_try_from_rejects_unknown_values() {
        assert_eq!(PixelFormat::try_from(125).unwrap(), PixelFormat::Rgba32Float);
        assert!(PixelFormat::try_from(0).is_err());
        assert!(BlendFactor::try_from(10).is_err());
        assert!(PrimitiveType::try_from(5).is_err());
        assert!(LoadAction::try_from(3).is_err());
    }

    #[test]
    fn test_storage_mode_from_options() {
        assert_eq!(StorageMode::from_options(0).unwrap(), StorageMode::Shared);
        assert_eq!(StorageMode::from_options(1 << 4).unwrap(), StorageMode::Managed);
        assert_eq!(StorageMode::from_options(2 << 4).unwrap(), StorageMode::Private);
        // Cache-mode bits and undefined storage modes are not accepted
        assert!(StorageMode::from_options(1).is_err());
        assert!(StorageMode::from_options(3 << 4).is_err());
    }

    #[test]
    fn test_descriptor_helpers() {
        let texture = TextureDescriptor::new(3, 2).with_format(PixelFormat::Rgba32Float);
        assert_eq!(texture.row_bytes(), 48);
        assert!(!texture.writable);

        let opaque = RenderPipelineDescriptor::new(PixelFormat::Bgra8Unorm);
        assert_eq!(opaque.effective_blend(), None);
        let blended = opaque.with_blend(BlendState::ALPHA_BLENDING);
        assert_eq!(blended.effective_blend(), Some(BlendState::ALPHA_BLENDING));
    }
}
