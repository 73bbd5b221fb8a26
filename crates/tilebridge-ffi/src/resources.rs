use crate::{Context, bytes, bytes_mut, context, with_bridge};
use tilebridge::{BufferHandle, DeviceHandle, PixelFormat, StorageMode, TextureDescriptor, TextureHandle};

/// Creates a shared-storage buffer
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_buffer(context: *mut Context, device: u64, size: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_buffer(DeviceHandle::from_raw(device), size, StorageMode::Shared)).map_or(0, u64::from)
}

/// Creates a buffer with a raw resource options word (storage mode bits only)
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_buffer_with_options(context: *mut Context, device: u64, size: u64, options: u32) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_buffer_with_options(DeviceHandle::from_raw(device), size, options)).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_buffer(context: *mut Context, buffer: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_buffer(BufferHandle::from_raw(buffer))).is_some()
}

/// Copies `size` bytes from `data` to the start of the buffer
///
/// # Safety
/// `context` must be null or a live context; `data` must be valid for reads of
/// `size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_buffer_upload(context: *mut Context, buffer: u64, data: *const u8, size: usize) -> bool {
    let context = context!(context, false);
    // SAFETY: guaranteed by the caller
    let data = unsafe { bytes(data, size) };
    with_bridge!(context, |bridge| data.and_then(|data| bridge.buffer_upload(BufferHandle::from_raw(buffer), data))).is_some()
}

/// Copies the first `size` bytes of the buffer into `data`
///
/// # Safety
/// `context` must be null or a live context; `data` must be valid for writes of
/// `size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_buffer_download(context: *mut Context, buffer: u64, data: *mut u8, size: usize) -> bool {
    let context = context!(context, false);
    // SAFETY: guaranteed by the caller
    let data = unsafe { bytes_mut(data, size) };
    with_bridge!(context, |bridge| data.and_then(|data| bridge.buffer_download(BufferHandle::from_raw(buffer), data))).is_some()
}

/// CPU pointer to the contents of a shared or managed buffer
///
/// Valid until the buffer is released. Writes through it reach the GPU at the
/// next commit that uses the buffer; results are visible after completion.
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_buffer_contents(context: *mut Context, buffer: u64) -> *mut u8 {
    let context = context!(context, std::ptr::null_mut());
    with_bridge!(context, |bridge| bridge.buffer_contents(BufferHandle::from_raw(buffer))).map_or(std::ptr::null_mut(), |pointer| pointer.as_ptr())
}

/// Size of the buffer in bytes, `0` for an invalid handle
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_buffer_length(context: *mut Context, buffer: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.buffer_length(BufferHandle::from_raw(buffer))).unwrap_or(0)
}

/// Creates a 2D texture; `pixel_format` uses the native format numbering
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_texture(context: *mut Context, device: u64, width: u32, height: u32, pixel_format: u32, writable: bool) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| PixelFormat::try_from(pixel_format).and_then(|format| {
        let descriptor = TextureDescriptor::new(width, height).with_format(format).writable(writable);
        bridge.create_texture(DeviceHandle::from_raw(device), descriptor)
    }))
    .map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_texture(context: *mut Context, texture: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_texture(TextureHandle::from_raw(texture))).is_some()
}

/// Uploads a `width` x `height` region with rows `bytes_per_row` apart
///
/// # Safety
/// `context` must be null or a live context; `data` must be valid for reads of
/// `bytes_per_row * height` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_texture_upload(context: *mut Context, texture: u64, data: *const u8, width: u32, height: u32, bytes_per_row: u32) -> bool {
    let context = context!(context, false);
    // SAFETY: guaranteed by the caller
    let data = unsafe { bytes(data, bytes_per_row as usize * height as usize) };
    with_bridge!(context, |bridge| data.and_then(|data| bridge.texture_upload(TextureHandle::from_raw(texture), data, width, height, bytes_per_row))).is_some()
}

/// Downloads a `width` x `height` region into rows `bytes_per_row` apart
///
/// # Safety
/// `context` must be null or a live context; `data` must be valid for writes of
/// `bytes_per_row * height` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_texture_download(context: *mut Context, texture: u64, data: *mut u8, width: u32, height: u32, bytes_per_row: u32) -> bool {
    let context = context!(context, false);
    // SAFETY: guaranteed by the caller
    let data = unsafe { bytes_mut(data, bytes_per_row as usize * height as usize) };
    with_bridge!(context, |bridge| data.and_then(|data| bridge.texture_download(TextureHandle::from_raw(texture), data, width, height, bytes_per_row))).is_some()
}
