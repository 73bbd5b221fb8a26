//! Flat C call surface of tilebridge
//!
//! Every function takes the context created by [`tilebridge_context_create`] as
//! its first argument, so there is no hidden process-wide state. Handles cross
//! the boundary as `uint64_t` values with `0` as the null handle. Failures
//! return the null handle, `false`, a zero length, a null pointer or the status
//! `UINT32_MAX`; the message of the most recent failure is available through
//! [`tilebridge_last_error`].

use std::ffi::{CStr, CString, c_char};
use tilebridge::backend::{HeadlessBackend, WgpuBackend};
use tilebridge::{Bridge, BridgeError};
use tracing_subscriber::EnvFilter;

mod commands;
mod device;
mod pipelines;
mod resources;

pub use commands::TilebridgeRenderPassDescriptor;
pub use pipelines::TilebridgeRenderPipelineDescriptor;

/// `backend_kind` selecting wgpu on real hardware
pub const TILEBRIDGE_BACKEND_NATIVE: u32 = 0;
/// `backend_kind` selecting the CPU reference backend
pub const TILEBRIDGE_BACKEND_HEADLESS: u32 = 1;

/// Status returned when a status query fails
pub const TILEBRIDGE_STATUS_INVALID: u32 = u32::MAX;

enum AnyBridge {
    Native(Bridge<WgpuBackend>),
    Headless(Bridge<HeadlessBackend>),
}

/// Registry and backend behind one C caller
pub struct Context {
    bridge: AnyBridge,
    last_error: Option<CString>,
}

impl Context {
    pub fn native(backend: WgpuBackend) -> Self {
        Self {
            bridge: AnyBridge::Native(Bridge::new(backend)),
            last_error: None,
        }
    }

    pub fn headless(backend: HeadlessBackend) -> Self {
        Self {
            bridge: AnyBridge::Headless(Bridge::new(backend)),
            last_error: None,
        }
    }

    /// Records the outcome of a call, keeping the message of a failure
    fn settle<T>(&mut self, result: Result<T, BridgeError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(kind = ?error.kind(), %error, "call failed");
                self.last_error = CString::new(error.to_string()).ok();
                None
            }
        }
    }
}

/// Runs `$body` against whichever bridge the context holds and settles the result
macro_rules! with_bridge {
    ($context:expr, |$bridge:ident| $body:expr) => {{
        let context: &mut $crate::Context = $context;
        let result = match &mut context.bridge {
            $crate::AnyBridge::Native($bridge) => $body,
            $crate::AnyBridge::Headless($bridge) => $body,
        };
        context.settle(result)
    }};
}
pub(crate) use with_bridge;

/// Resolves the context pointer, returning `$fail` from the caller when null
macro_rules! context {
    ($pointer:expr, $fail:expr) => {
        // SAFETY: the caller passes a pointer from tilebridge_context_create
        match unsafe { $pointer.as_mut() } {
            Some(context) => context,
            None => return $fail,
        }
    };
}
pub(crate) use context;

/// Borrows a caller-supplied byte range; `len == 0` never dereferences `data`
///
/// # Safety
/// When `len > 0`, `data` must be null or valid for reads of `len` bytes.
pub(crate) unsafe fn bytes<'a>(data: *const u8, len: usize) -> Result<&'a [u8], BridgeError> {
    if len == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(BridgeError::InvalidArgument("null data pointer".to_string()));
    }
    // SAFETY: guaranteed by the caller
    Ok(unsafe { std::slice::from_raw_parts(data, len) })
}

/// Mutable counterpart of [`bytes`]
///
/// # Safety
/// When `len > 0`, `data` must be null or valid for writes of `len` bytes.
pub(crate) unsafe fn bytes_mut<'a>(data: *mut u8, len: usize) -> Result<&'a mut [u8], BridgeError> {
    if len == 0 {
        return Ok(&mut []);
    }
    if data.is_null() {
        return Err(BridgeError::InvalidArgument("null data pointer".to_string()));
    }
    // SAFETY: guaranteed by the caller
    Ok(unsafe { std::slice::from_raw_parts_mut(data, len) })
}

/// Borrows a NUL-terminated UTF-8 string
///
/// # Safety
/// `text` must be null or point to a NUL-terminated string.
pub(crate) unsafe fn text<'a>(text: *const c_char) -> Result<&'a str, BridgeError> {
    if text.is_null() {
        return Err(BridgeError::InvalidArgument("null string pointer".to_string()));
    }
    // SAFETY: guaranteed by the caller
    unsafe { CStr::from_ptr(text) }
        .to_str()
        .map_err(|error| BridgeError::InvalidArgument(format!("string is not UTF-8: {error}")))
}

/// Hands a string to the caller; free it with [`tilebridge_string_free`]
pub(crate) fn owned_string(text: &str) -> *mut c_char {
    CString::new(text.replace('\0', " ")).map_or(std::ptr::null_mut(), CString::into_raw)
}

/// Writes the diagnostic of `error` to an optional `char **` out-parameter
///
/// # Safety
/// `error_msg` must be null or valid for a pointer-sized write.
pub(crate) unsafe fn write_error(error_msg: *mut *mut c_char, error: &BridgeError) {
    if error_msg.is_null() {
        return;
    }
    let message = error.diagnostic().map_or_else(|| error.to_string(), str::to_string);
    // SAFETY: guaranteed by the caller
    unsafe { *error_msg = owned_string(&message) };
}

/// Installs a `tracing` subscriber filtered by `TILEBRIDGE_LOG`
///
/// # Returns
/// `false` if a global subscriber was already installed
#[unsafe(no_mangle)]
pub extern "C" fn tilebridge_init_logging() -> bool {
    let filter = EnvFilter::try_from_env("TILEBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init().is_ok()
}

/// Creates a context on the given backend kind
///
/// # Returns
/// The context, or null for an unknown `backend_kind`
#[unsafe(no_mangle)]
pub extern "C" fn tilebridge_context_create(backend_kind: u32) -> *mut Context {
    let context = match backend_kind {
        TILEBRIDGE_BACKEND_NATIVE => Context::native(WgpuBackend::default()),
        TILEBRIDGE_BACKEND_HEADLESS => Context::headless(HeadlessBackend::default()),
        other => {
            tracing::warn!(backend_kind = other, "unknown backend kind");
            return std::ptr::null_mut();
        }
    };
    Box::into_raw(Box::new(context))
}

/// Destroys a context and every handle it issued
///
/// # Safety
/// `context` must be null or a pointer from [`tilebridge_context_create`] that
/// has not been destroyed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_context_destroy(context: *mut Context) {
    if !context.is_null() {
        // SAFETY: guaranteed by the caller
        drop(unsafe { Box::from_raw(context) });
    }
}

/// Message of the most recent failed call on this context
///
/// The pointer stays valid until the next failing call or until the context is
/// destroyed. Null when no call has failed yet.
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_last_error(context: *const Context) -> *const c_char {
    // SAFETY: guaranteed by the caller
    match unsafe { context.as_ref() } {
        Some(context) => context.last_error.as_deref().map_or(std::ptr::null(), CStr::as_ptr),
        None => std::ptr::null(),
    }
}

/// Frees a string returned by this library
///
/// # Safety
/// `text` must be null or a string returned by this library, freed once.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_string_free(text: *mut c_char) {
    if !text.is_null() {
        // SAFETY: guaranteed by the caller
        drop(unsafe { CString::from_raw(text) });
    }
}


#[cfg(test)]
mod tests {
    use super::testing::TestContext;
    use super::*;

    #[test]
    fn test_unknown_backend_kind_is_null() {
        assert!(tilebridge_context_create(7).is_null());
    }

    #[test]
    fn test_headless_backend_kind_creates_context() {
        let context = tilebridge_context_create(TILEBRIDGE_BACKEND_HEADLESS);
        assert!(!context.is_null());
        assert_ne!(unsafe { device::tilebridge_create_default_device(context) }, 0);
        unsafe { tilebridge_context_destroy(context) };
    }

    #[test]
    fn test_null_context_is_tolerated() {
        unsafe {
            assert!(tilebridge_last_error(std::ptr::null()).is_null());
            tilebridge_context_destroy(std::ptr::null_mut());
            tilebridge_string_free(std::ptr::null_mut());
        }
    }

    #[test]
    fn test_last_error_tracks_failures() {
        let context = TestContext::new();
        assert!(unsafe { tilebridge_last_error(context.0) }.is_null());
        assert_eq!(unsafe { device::tilebridge_create_device(context.0, 9) }, 0);
        assert!(context.last_error().contains("adapter"));
    }
}
