use crate::{Context, context, owned_string, with_bridge};
use std::ffi::c_char;
use tilebridge::{CommandQueueHandle, DeviceHandle};

/// Whether the context's backend exposes any adapter
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_is_available(context: *mut Context) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| Ok(bridge.is_available())).unwrap_or(false)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_device_count(context: *mut Context) -> u32 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| Ok(bridge.device_count())).map_or(0, |count| count as u32)
}

/// Creates a device on the adapter at `index`
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_device(context: *mut Context, index: u32) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_device(index as usize)).map_or(0, u64::from)
}

/// Creates a device on the preferred adapter
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_default_device(context: *mut Context) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_default_device()).map_or(0, u64::from)
}

/// Adapter name of a device; free with `tilebridge_string_free`
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_device_name(context: *mut Context, device: u64) -> *mut c_char {
    let context = context!(context, std::ptr::null_mut());
    with_bridge!(context, |bridge| bridge.device_name(DeviceHandle::from_raw(device)).map(owned_string)).unwrap_or(std::ptr::null_mut())
}

/// Releases a device and every handle created from it
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_device(context: *mut Context, device: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_device(DeviceHandle::from_raw(device))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_command_queue(context: *mut Context, device: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_command_queue(DeviceHandle::from_raw(device))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_command_queue(context: *mut Context, queue: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_command_queue(CommandQueueHandle::from_raw(queue))).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestContext;
    use crate::tilebridge_string_free;
    use std::ffi::CStr;

    #[test]
    fn test_device_and_queue_lifecycle() {
        let context = TestContext::new();
        unsafe {
            assert!(tilebridge_is_available(context.0));
            assert_eq!(tilebridge_device_count(context.0), 1);

            let device = tilebridge_create_default_device(context.0);
            assert_ne!(device, 0);
            let name = tilebridge_device_name(context.0, device);
            assert_eq!(CStr::from_ptr(name).to_str().unwrap(), "Headless Reference Device");
            tilebridge_string_free(name);

            let queue = tilebridge_create_command_queue(context.0, device);
            assert_ne!(queue, 0);
            assert!(tilebridge_release_device(context.0, device));
            assert!(!tilebridge_release_command_queue(context.0, queue));
            assert!(tilebridge_device_name(context.0, device).is_null());
        }
    }

    #[test]
    fn test_null_handles_are_rejected() {
        let context = TestContext::new();
        unsafe {
            assert_eq!(tilebridge_create_command_queue(context.0, 0), 0);
            assert!(!tilebridge_release_device(context.0, 0));
            assert!(!tilebridge_is_available(std::ptr::null_mut()));
        }
    }
}
