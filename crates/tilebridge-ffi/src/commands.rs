use crate::{Context, TILEBRIDGE_STATUS_INVALID, bytes, context, owned_string, with_bridge};
use std::ffi::c_char;
use tilebridge::{
    BridgeError, BufferHandle, ClearColor, CommandBufferHandle, CommandQueueHandle, ComputePipelineHandle, DeviceHandle, DrawableHandle, EncoderHandle, LoadAction, PixelFormat,
    PrimitiveType, RenderPassDescriptor, RenderPipelineHandle, StoreAction, TextureHandle,
};

/// Color attachment of a render encoder, with native enumeration values
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(C)]
pub struct TilebridgeRenderPassDescriptor {
    pub texture: u64,
    pub load_action: u32,
    pub store_action: u32,
    pub clear_color: ClearColor,
}

impl TilebridgeRenderPassDescriptor {
    /// Validates the numeric values
    pub fn to_descriptor(&self) -> Result<RenderPassDescriptor, BridgeError> {
        Ok(RenderPassDescriptor {
            texture: TextureHandle::from_raw(self.texture),
            load_action: LoadAction::try_from(self.load_action)?,
            store_action: StoreAction::try_from(self.store_action)?,
            clear_color: self.clear_color,
        })
    }
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_command_buffer(context: *mut Context, queue: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_command_buffer(CommandQueueHandle::from_raw(queue))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_command_buffer(context: *mut Context, command_buffer: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_command_buffer(CommandBufferHandle::from_raw(command_buffer))).is_some()
}

/// Submits a command buffer without waiting
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_commit_command_buffer(context: *mut Context, command_buffer: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.commit(CommandBufferHandle::from_raw(command_buffer))).is_some()
}

/// Blocks until a committed buffer finishes
///
/// # Returns
/// The final status (3 completed, 4 failed) or `UINT32_MAX`
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_wait_for_completion(context: *mut Context, command_buffer: u64) -> u32 {
    let context = context!(context, TILEBRIDGE_STATUS_INVALID);
    with_bridge!(context, |bridge| bridge.wait_for_completion(CommandBufferHandle::from_raw(command_buffer))).map_or(TILEBRIDGE_STATUS_INVALID, |status| status as u32)
}

/// Non-blocking status: 0 recording, 1 encoding, 2 committed, 3 completed,
/// 4 failed, `UINT32_MAX` on error
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_command_buffer_status(context: *mut Context, command_buffer: u64) -> u32 {
    let context = context!(context, TILEBRIDGE_STATUS_INVALID);
    with_bridge!(context, |bridge| bridge.command_buffer_status(CommandBufferHandle::from_raw(command_buffer))).map_or(TILEBRIDGE_STATUS_INVALID, |status| status as u32)
}

/// Fault text of a failed buffer; null otherwise. Free with `tilebridge_string_free`.
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_command_buffer_error(context: *mut Context, command_buffer: u64) -> *mut c_char {
    let context = context!(context, std::ptr::null_mut());
    with_bridge!(context, |bridge| bridge
        .command_buffer_error(CommandBufferHandle::from_raw(command_buffer))
        .map(|error| error.map_or(std::ptr::null_mut(), owned_string)))
    .unwrap_or(std::ptr::null_mut())
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_compute_encoder(context: *mut Context, command_buffer: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_compute_encoder(CommandBufferHandle::from_raw(command_buffer))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_blit_encoder(context: *mut Context, command_buffer: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.create_blit_encoder(CommandBufferHandle::from_raw(command_buffer))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context and `descriptor` null or readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_render_encoder(context: *mut Context, command_buffer: u64, descriptor: *const TilebridgeRenderPassDescriptor) -> u64 {
    let context = context!(context, 0);
    // SAFETY: guaranteed by the caller
    let descriptor = match unsafe { descriptor.as_ref() } {
        Some(raw) => raw.to_descriptor(),
        None => Err(BridgeError::InvalidArgument("null render pass descriptor".to_string())),
    };
    with_bridge!(context, |bridge| descriptor.and_then(|descriptor| bridge.create_render_encoder(CommandBufferHandle::from_raw(command_buffer), &descriptor))).map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_set_compute_pipeline(context: *mut Context, encoder: u64, pipeline: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.set_compute_pipeline(EncoderHandle::from_raw(encoder), ComputePipelineHandle::from_raw(pipeline))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_set_render_pipeline(context: *mut Context, encoder: u64, pipeline: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.set_render_pipeline(EncoderHandle::from_raw(encoder), RenderPipelineHandle::from_raw(pipeline))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_set_buffer(context: *mut Context, encoder: u64, buffer: u64, offset: u64, index: u32) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.set_buffer(EncoderHandle::from_raw(encoder), BufferHandle::from_raw(buffer), offset, index)).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_set_texture(context: *mut Context, encoder: u64, texture: u64, index: u32) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.set_texture(EncoderHandle::from_raw(encoder), TextureHandle::from_raw(texture), index)).is_some()
}

/// Copies `length` bytes of constants into buffer slot `index`
///
/// # Safety
/// `context` must be null or a live context and `data` valid for reads of
/// `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_set_bytes(context: *mut Context, encoder: u64, data: *const u8, length: usize, index: u32) -> bool {
    let context = context!(context, false);
    // SAFETY: guaranteed by the caller
    let data = unsafe { bytes(data, length) };
    with_bridge!(context, |bridge| data.and_then(|data| bridge.set_bytes(EncoderHandle::from_raw(encoder), data, index))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_dispatch(context: *mut Context, encoder: u64, grid_width: u32, grid_height: u32, group_width: u32, group_height: u32) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.dispatch(EncoderHandle::from_raw(encoder), [grid_width, grid_height], [group_width, group_height])).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_draw(context: *mut Context, encoder: u64, primitive: u32, vertex_start: u32, vertex_count: u32) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| PrimitiveType::try_from(primitive).and_then(|primitive| bridge.draw(EncoderHandle::from_raw(encoder), primitive, vertex_start, vertex_count))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_blit_copy_buffer(
    context: *mut Context,
    encoder: u64,
    source: u64,
    source_offset: u64,
    destination: u64,
    destination_offset: u64,
    size: u64,
) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.copy_buffer(
        EncoderHandle::from_raw(encoder),
        BufferHandle::from_raw(source),
        source_offset,
        BufferHandle::from_raw(destination),
        destination_offset,
        size
    ))
    .is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_encoder_end(context: *mut Context, encoder: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.end_encoding(EncoderHandle::from_raw(encoder))).is_some()
}

/// Releases an encoder, ending it first when still open
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_encoder(context: *mut Context, encoder: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_encoder(EncoderHandle::from_raw(encoder))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_create_offscreen_drawable(context: *mut Context, device: u64, width: u32, height: u32, pixel_format: u32) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| PixelFormat::try_from(pixel_format).and_then(|format| bridge.create_offscreen_drawable(DeviceHandle::from_raw(device), width, height, format)))
        .map_or(0, u64::from)
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_drawable_texture(context: *mut Context, drawable: u64) -> u64 {
    let context = context!(context, 0);
    with_bridge!(context, |bridge| bridge.drawable_texture(DrawableHandle::from_raw(drawable))).map_or(0, u64::from)
}

/// Schedules a drawable for presentation once the command buffer's work is done
///
/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_present_drawable(context: *mut Context, command_buffer: u64, drawable: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.present_drawable(CommandBufferHandle::from_raw(command_buffer), DrawableHandle::from_raw(drawable))).is_some()
}

/// # Safety
/// `context` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tilebridge_release_drawable(context: *mut Context, drawable: u64) -> bool {
    let context = context!(context, false);
    with_bridge!(context, |bridge| bridge.release_drawable(DrawableHandle::from_raw(drawable))).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{tilebridge_create_command_queue, tilebridge_create_default_device};
    use crate::pipelines::{tilebridge_create_compute_pipeline, tilebridge_create_function, tilebridge_create_library_from_source};
    use crate::resources::{tilebridge_buffer_download, tilebridge_buffer_upload, tilebridge_create_buffer};
    use crate::testing::{ADD_ONE, TestContext};

    #[test]
    fn test_compute_submission() {
        let context = TestContext::new();
        unsafe {
            let device = tilebridge_create_default_device(context.0);
            let queue = tilebridge_create_command_queue(context.0, device);
            let library = tilebridge_create_library_from_source(context.0, device, ADD_ONE.as_ptr(), std::ptr::null_mut());
            let function = tilebridge_create_function(context.0, library, c"add_one".as_ptr());
            let pipeline = tilebridge_create_compute_pipeline(context.0, device, function, std::ptr::null_mut());
            let buffer = tilebridge_create_buffer(context.0, device, 16);
            let data: Vec<u8> = (0..16).collect();
            assert!(tilebridge_buffer_upload(context.0, buffer, data.as_ptr(), data.len()));

            let command_buffer = tilebridge_create_command_buffer(context.0, queue);
            assert_eq!(tilebridge_wait_for_completion(context.0, command_buffer), TILEBRIDGE_STATUS_INVALID);
            let encoder = tilebridge_create_compute_encoder(context.0, command_buffer);
            assert!(tilebridge_encoder_set_compute_pipeline(context.0, encoder, pipeline));
            assert!(tilebridge_encoder_set_buffer(context.0, encoder, buffer, 0, 0));
            assert!(tilebridge_encoder_dispatch(context.0, encoder, 16, 1, 16, 1));
            assert!(!tilebridge_commit_command_buffer(context.0, command_buffer));
            assert_eq!(tilebridge_command_buffer_status(context.0, command_buffer), 1);
            assert!(tilebridge_encoder_end(context.0, encoder));
            assert!(!tilebridge_encoder_dispatch(context.0, encoder, 4, 1, 4, 1));

            assert!(tilebridge_commit_command_buffer(context.0, command_buffer));
            assert_eq!(tilebridge_wait_for_completion(context.0, command_buffer), 3);
            assert_eq!(tilebridge_wait_for_completion(context.0, command_buffer), 3);
            assert!(tilebridge_command_buffer_error(context.0, command_buffer).is_null());

            let mut out = vec![0u8; 16];
            assert!(tilebridge_buffer_download(context.0, buffer, out.as_mut_ptr(), out.len()));
            assert_eq!(out, (1u8..=16).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_clear_offscreen_drawable() {
        let context = TestContext::new();
        unsafe {
            let device = tilebridge_create_default_device(context.0);
            let queue = tilebridge_create_command_queue(context.0, device);
            let drawable = tilebridge_create_offscreen_drawable(context.0, device, 2, 1, 70);
            let texture = tilebridge_drawable_texture(context.0, drawable);
            assert_ne!(texture, 0);

            let command_buffer = tilebridge_create_command_buffer(context.0, queue);
            let descriptor = TilebridgeRenderPassDescriptor {
                texture,
                load_action: 2,
                store_action: 1,
                clear_color: ClearColor::new(0.0, 0.0, 1.0, 1.0),
            };
            let encoder = tilebridge_create_render_encoder(context.0, command_buffer, &descriptor);
            assert!(tilebridge_release_encoder(context.0, encoder));

            assert!(tilebridge_present_drawable(context.0, command_buffer, drawable));
            assert!(!tilebridge_present_drawable(context.0, command_buffer, drawable));
            assert!(tilebridge_commit_command_buffer(context.0, command_buffer));
            assert_eq!(tilebridge_wait_for_completion(context.0, command_buffer), 3);
            assert_eq!(tilebridge_drawable_texture(context.0, drawable), 0);
        }
    }

    #[test]
    fn test_invalid_numeric_values() {
        let context = TestContext::new();
        unsafe {
            let device = tilebridge_create_default_device(context.0);
            let queue = tilebridge_create_command_queue(context.0, device);
            let command_buffer = tilebridge_create_command_buffer(context.0, queue);
            let descriptor = TilebridgeRenderPassDescriptor {
                texture: 0,
                load_action: 7,
                store_action: 1,
                clear_color: ClearColor::default(),
            };
            assert_eq!(tilebridge_create_render_encoder(context.0, command_buffer, &descriptor), 0);
            assert_eq!(tilebridge_create_render_encoder(context.0, command_buffer, std::ptr::null()), 0);
            assert_eq!(tilebridge_create_offscreen_drawable(context.0, device, 4, 4, 1), 0);
            assert_eq!(tilebridge_command_buffer_status(context.0, 0), TILEBRIDGE_STATUS_INVALID);
        }
    }
}
