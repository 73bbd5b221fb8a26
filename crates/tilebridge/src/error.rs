//! Error taxonomy of the bridge
//!
//! Every fallible bridge call returns [`BridgeError`]. Handle and lifecycle
//! violations are detected locally before any native call is made; only shader
//! compilation and pipeline linking carry free-form diagnostics from the native
//! compiler.

use thiserror::Error;

/// Result type used by every bridge operation
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Coarse classification of a [`BridgeError`]
///
/// This is what crosses the flat C boundary and what callers usually match on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorKind {
    InvalidHandle = 1,
    InvalidState = 2,
    InvalidArgument = 3,
    SizeMismatch = 4,
    SymbolNotFound = 5,
    CompileFailure = 6,
    LinkFailure = 7,
    DeviceUnavailable = 8,
    UnsupportedOperation = 9,
}

/// Errors reported by the bridge
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Stale, unknown, released, null, or wrongly typed handle
    #[error("invalid {expected} handle {raw:#x}")]
    InvalidHandle {
        /// Kind of object the caller passed the handle as
        expected: &'static str,
        /// Raw handle value
        raw: u64,
    },
    /// Operation attempted outside its valid lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Zero or out-of-range size, count, index, or enumeration value
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Transfer length or row stride does not match the resource allocation
    #[error("size mismatch: {0}")]
    SizeMismatch(String),
    /// Named shader entry point is absent from the library
    #[error("entry point `{0}` not found in library")]
    SymbolNotFound(String),
    /// Shader source rejected by the compiler (carries the diagnostic text)
    #[error("shader compilation failed:\n{0}")]
    CompileFailure(String),
    /// Pipeline rejected while linking (carries the diagnostic text)
    #[error("pipeline link failed: {0}")]
    LinkFailure(String),
    /// No usable GPU, adapter index out of range, or device lost
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    /// Operation not supported for this resource (e.g. CPU access to private storage)
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),
}

impl BridgeError {
    /// Returns the coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidHandle { .. } => ErrorKind::InvalidHandle,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::SizeMismatch(_) => ErrorKind::SizeMismatch,
            Self::SymbolNotFound(_) => ErrorKind::SymbolNotFound,
            Self::CompileFailure(_) => ErrorKind::CompileFailure,
            Self::LinkFailure(_) => ErrorKind::LinkFailure,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
        }
    }

    /// Returns the diagnostic text for errors that carry one
    ///
    /// Only compilation and link failures carry text meant for the user; the
    /// flat C surface copies it into the caller's error slot.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            Self::CompileFailure(text) | Self::LinkFailure(text) => Some(text),
            _ => None,
        }
    }

    pub(crate) fn state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub(crate) fn argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub(crate) fn size(message: impl Into<String>) -> Self {
        Self::SizeMismatch(message.into())
    }

    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }
}
