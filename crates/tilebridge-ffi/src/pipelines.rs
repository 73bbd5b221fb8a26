use crate::{Context, context, text, with_bridge, write_error};
use std::ffi::c_char;
use tilebridge::{
    BlendFactor, BlendOperation, BlendState, BridgeError, ComputePipelineHandle, DeviceHandle, FunctionHandle, LibraryHandle, PixelFormat, RenderPipelineDescriptor,
    RenderPipelineHandle,
};

/// Fixed-function state of a render pipeline, with native enumeration values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct TilebridgeRenderPipelineDescriptor {
    pub pixel_format: u32,
    pub blend_enabled: bool,
    pub rgb_source_factor: u32,
    pub rgb_destination_factor: u32,
    pub rgb_operation: u32,
    pub alpha_source_factor: u32,
    pub alpha_destination_factor: u32,
    pub alpha_operation: u32,
}

impl TilebridgeRenderPipelineDescriptor {
    /// Validates the numeric values
    pub fn to_descriptor(&self) -> Result<RenderPipelineDescriptor, BridgeError> {
        let descriptor = RenderPipelineDescriptor::new(PixelFormat::try_from(self.pixel_format)?);
        if !self.blend_enabled {
            return Ok(descriptor);
        }
        Ok(descriptor.with_blend(BlendState {
            rgb_source_factor: BlendFactor::try_from(self.rgb_source_factor)?,
            rgb_destination_factor: BlendFactor::try_from(self.rgb_destination_factor)?,
            rgb_operation: BlendOperation::try_from(self.rgb_operation)?,
            alpha_source_factor: BlendFactor::try_from(self.alpha_source_factor)?,
            alpha_destination_factor: BlendFactor::try_from(self.alpha_destination_factor)?,
            alpha_operation: BlendOperation::try_from(self.alpha_operation)?,
        }))
    }
}

/// Settles a result, copying the diagnostic of a failure to `error_msg`
///
/// # Safety
/// `error_msg` must be null or valid for a pointer-sized write.
unsafe fn settle_reporting<T>(context: &mut Context, result: Result<T, BridgeError>, error_msg: *mut *mut c_char) -> Option<T> {
    if let Err(error) = &result {
        // SAFETY: guaranteed by the caller
        unsafe { write_error(error_msg, error) };
    }
    context.settle(result)
}

/// Compiles shader source into a library
///
/// On failure `*error_msg` receives the compiler diagnostic with line and
/// column information; free it with `tilebridge_string_free`.
///
/// # Safety
/// `context` must be null or a live context, `source` a NUL-terminated string
/// and `error_msg` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_library_from_source(context: *mut Context, device: u64, source: *const c_char, error_msg: *mut *mut c_char) -> u64 {
    let context = context!(context, 0);
    // SAFETY: guaranteed by the caller
    let source = unsafe { text(source) };
    let result = match &mut context.bridge {
        crate::AnyBridge::Native(bridge) => source.and_then(|source| bridge.create_library_from_source(DeviceHandle::from_raw(device), source)),
        crate::AnyBridge::Headless(bridge) => source.and_then(|source| bridge.create_library_from_source(DeviceHandle::from_raw(device), source)),
    };
    // SAFETY: guaranteed by the caller
    unsafe { settle_reporting(context, result, error_msg) }.map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_library(context: *mut Context, library: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_library(LibraryHandle::from_raw(library))).is_some()
}

/// Looks up an entry point by name; null for a null or unknown library
///
/// # Safety
/// `context` must be null or a live context and `name` a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_function(context: *mut Context, library: u64, name: *const c_char) -> u64 {
    let context = context!(context, 0);
    // SAFETY: guaranteed by the caller
    let name = unsafe { text(name) };
    with_bridge!(context, |bridge| name.and_then(|name| bridge.create_function(LibraryHandle::from_raw(library), name))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_function(context: *mut Context, function: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_function(FunctionHandle::from_raw(function))).is_some()
}

/// Links a compute pipeline
///
/// # Safety
/// `context` must be null or a live context and `error_msg` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_compute_pipeline(context: *mut Context, device: u64, function: u64, error_msg: *mut *mut c_char) -> u64 {
    let context = context!(context, 0);
    let (device, function) = (DeviceHandle::from_raw(device), FunctionHandle::from_raw(function));
    let result = match &mut context.bridge {
        crate::AnyBridge::Native(bridge) => bridge.create_compute_pipeline(device, function),
        crate::AnyBridge::Headless(bridge) => bridge.create_compute_pipeline(device, function),
    };
    // SAFETY: guaranteed by the caller
    unsafe { settle_reporting(context, result, error_msg) }.map_or(0, u64::from)
}

/// Links a render pipeline from a vertex and a fragment function
///
/// # Safety
/// `context` must be null or a live context, `descriptor` null or readable and
/// `error_msg` null or writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_render_pipeline(
    context: *mut Context,
    device: u64,
    vertex: u64,
    fragment: u64,
    descriptor: *const TilebridgeRenderPipelineDescriptor,
    error_msg: *mut *mut c_char,
) -> u64 {
    let context = context!(context, 0);
    // SAFETY: guaranteed by the caller
    let descriptor = match unsafe { descriptor.as_ref() } {
        Some(raw) => raw.to_descriptor(),
        None => Err(BridgeError::InvalidArgument("null render pipeline descriptor".to_string())),
    };
    let (device, vertex, fragment) = (DeviceHandle::from_raw(device), FunctionHandle::from_raw(vertex), FunctionHandle::from_raw(fragment));
    let result = match &mut context.bridge {
        crate::AnyBridge::Native(bridge) => descriptor.and_then(|descriptor| bridge.create_render_pipeline(device, vertex, fragment, &descriptor)),
        crate::AnyBridge::Headless(bridge) => descriptor.and_then(|descriptor| bridge.create_render_pipeline(device, vertex, fragment, &descriptor)),
    };
    // SAFETY: guaranteed by the caller
    unsafe { settle_reporting(context, result, error_msg) }.map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_compute_pipeline(context: *mut Context, pipeline: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_compute_pipeline(ComputePipelineHandle::from_raw(pipeline))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_render_pipeline(context: *mut Context, pipeline: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_render_pipeline(RenderPipelineHandle::from_raw(pipeline))).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::tilebridge_create_default_device;
    use crate::testing::{ADD_ONE, TestContext};
    use crate::tilebridge_string_free;
    use std::ffi::CStr;

    #[test]
    fn test_compile_failure_reports_diagnostic() {
        let context = TestContext::new();
        unsafe {
            let device = tilebridge_create_default_device(context.0);
            let mut error_msg: *mut c_char = std::ptr::null_mut();
            let library = tilebridge_create_library_from_source(context.0, device, c"fn broken( {".as_ptr(), &mut error_msg);
            assert_eq!(library, 0);
            assert!(!error_msg.is_null());
            assert!(!CStr::from_ptr(error_msg).to_bytes().is_empty());
            tilebridge_string_free(error_msg);

            assert_eq!(tilebridge_create_function(context.0, library, c"add_one".as_ptr()), 0);
        }
    }

    #[test]
    fn test_compute_pipeline_from_source() {
        let context = TestContext::new();
        unsafe {
            let device = tilebridge_create_default_device(context.0);
            let mut error_msg: *mut c_char = std::ptr::null_mut();
            let library = tilebridge_create_library_from_source(context.0, device, ADD_ONE.as_ptr(), &mut error_msg);
            assert_ne!(library, 0);
            assert!(error_msg.is_null());

            assert_eq!(tilebridge_create_function(context.0, library, c"missing".as_ptr()), 0);
            let function = tilebridge_create_function(context.0, library, c"add_one".as_ptr());
            let pipeline = tilebridge_create_compute_pipeline(context.0, device, function, &mut error_msg);
            assert_ne!(pipeline, 0);
            assert!(tilebridge_release_library(context.0, library));
            assert!(!tilebridge_release_function(context.0, function));
            assert!(tilebridge_release_compute_pipeline(context.0, pipeline));
        }
    }

    #[test]
    fn test_render_descriptor_conversion() {
        let mut raw = TilebridgeRenderPipelineDescriptor {
            pixel_format: 80,
            blend_enabled: true,
            rgb_source_factor: 4,
            rgb_destination_factor: 5,
            rgb_operation: 0,
            alpha_source_factor: 1,
            alpha_destination_factor: 5,
            alpha_operation: 0,
        };
        let descriptor = raw.to_descriptor().unwrap();
        assert_eq!(descriptor, RenderPipelineDescriptor::new(PixelFormat::Bgra8Unorm).with_blend(BlendState::ALPHA_BLENDING));

        raw.rgb_operation = 9;
        assert!(raw.to_descriptor().is_err());
        raw.blend_enabled = false;
        assert_eq!(raw.to_descriptor().unwrap().effective_blend(), None);
    }
}
