use super::Bridge;
use crate::backend::Backend;
use crate::error::{BridgeError, Result};
use crate::format::{PixelFormat, TextureDescriptor};
use crate::handle::{CommandBufferHandle, DeviceHandle, DrawableHandle, ObjectKey, RawHandle, TextureHandle};
use crate::object::{BufferState, CommandBufferState, DeviceState, DrawableState, QueueState, TextureState};
use crate::recorder::CommandBufferStatus;

impl<B: Backend> Bridge<B> {
    /// Submits a command buffer to its queue without waiting
    ///
    /// CPU mirrors written through [`Bridge::buffer_contents`] since their last
    /// upload are flushed first. Drawables
    /// scheduled with [`Bridge::present_drawable`] are handed to the backend and
    /// their handles become invalid.
    pub fn commit(&mut self, command_buffer: CommandBufferHandle) -> Result<()> {
        let (key, state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        let device = state.device;
        let device_state = self.live_device(device)?;
        let mut phase = state.phase;
        phase.commit()?;

        // Only host-written mirrors are uploaded; the rest may be stale behind earlier work on the queue
        let mut flushed = Vec::new();
        for buffer in &state.mirrored {
            let Some(BufferState {
                native,
                mirror: Some(mirror),
                mirror_dirty: true,
                ..
            }) = self.registry.by_key::<BufferState<B>>(*buffer)
            else {
                continue;
            };
            self.backend.write_buffer(&device_state.native, native, 0, mirror)?;
            flushed.push(*buffer);
        }
        for buffer in flushed {
            if let Some(state) = self.registry.by_key_mut::<BufferState<B>>(buffer) {
                state.mirror_dirty = false;
            }
        }

        let (_, state) = self.registry.get_mut::<CommandBufferState<B>>(command_buffer)?;
        state.phase = phase;
        let passes = std::mem::take(&mut state.passes);
        let presents = std::mem::take(&mut state.presents);
        let queue = state.queue;

        let mut drawables = Vec::with_capacity(presents.len());
        for drawable in presents {
            if let Some(native) = self.registry.by_key_mut::<DrawableState<B>>(drawable).and_then(|state| state.native.take()) {
                drawables.push(native);
            }
            self.registry.remove(drawable);
        }

        let device_state = self.live_device(device)?;
        let queue_state = self.registry.by_key::<QueueState<B>>(queue).ok_or_else(|| BridgeError::state("command queue was released"))?;
        tracing::debug!(handle = command_buffer.to_raw(), passes = passes.len(), presents = drawables.len(), "command buffer committed");
        let submission = self.backend.submit(&device_state.native, &queue_state.native, passes, drawables);

        if let Some(state) = self.registry.by_key_mut::<CommandBufferState<B>>(key) {
            state.submission = Some(submission);
        }
        Ok(())
    }

    /// Records the outcome of a committed buffer and refreshes its CPU mirrors
    ///
    /// Only the first outcome sticks; later calls are no-ops. Mirrors holding
    /// host writes not yet uploaded are left alone.
    fn settle(&mut self, key: ObjectKey, outcome: std::result::Result<(), String>) -> CommandBufferStatus {
        let Some(state) = self.registry.by_key_mut::<CommandBufferState<B>>(key) else {
            return CommandBufferStatus::Failed;
        };
        if state.phase.status() != CommandBufferStatus::Committed {
            return state.phase.status();
        }

        state.phase.complete(outcome.is_err());
        if let Err(fault) = outcome {
            tracing::warn!(%fault, "command buffer failed");
            state.error = Some(fault);
        }
        let status = state.phase.status();
        let (device, mirrored) = (state.device, state.mirrored.clone());

        for buffer in mirrored {
            let contents = {
                let (Some(device), Some(state)) = (self.registry.by_key::<DeviceState<B>>(device), self.registry.by_key::<BufferState<B>>(buffer)) else {
                    continue;
                };
                if state.mirror_dirty {
                    continue;
                }
                let mut contents = vec![0u8; state.length as usize];
                if let Err(error) = self.backend.read_buffer(&device.native, &state.native, 0, &mut contents) {
                    tracing::warn!(%error, "could not refresh a buffer mirror");
                    continue;
                }
                contents
            };
            if let Some(mirror) = self.registry.by_key_mut::<BufferState<B>>(buffer).and_then(|state| state.mirror.as_mut()) {
                mirror.copy_from_slice(&contents);
            }
        }
        status
    }

    /// Blocks until a committed buffer finishes
    ///
    /// # Returns
    /// [`CommandBufferStatus::Completed`] or [`CommandBufferStatus::Failed`].
    /// Waiting again returns the same status without blocking.
    pub fn wait_for_completion(&mut self, command_buffer: CommandBufferHandle) -> Result<CommandBufferStatus> {
        let (key, state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        match state.phase.status() {
            CommandBufferStatus::Committed => {}
            status @ (CommandBufferStatus::Completed | CommandBufferStatus::Failed) => return Ok(status),
            _ => return Err(BridgeError::state("command buffer was not committed")),
        }

        let device_key = state.device;
        if let Err(error) = self.live_device(device_key) {
            self.settle(key, Err(error.to_string()));
            return Err(error);
        }

        let (_, state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        let device = self.live_device(device_key)?;
        let outcome = match &state.submission {
            Some(submission) => self.backend.wait(&device.native, submission),
            None => Err("command buffer was never submitted".to_string()),
        };
        Ok(self.settle(key, outcome))
    }

    /// Current status; polls the backend while the buffer is in flight
    pub fn command_buffer_status(&mut self, command_buffer: CommandBufferHandle) -> Result<CommandBufferStatus> {
        let (key, state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        let status = state.phase.status();
        if status != CommandBufferStatus::Committed {
            return Ok(status);
        }

        let device = self.live_device(state.device)?;
        let outcome = state.submission.as_ref().and_then(|submission| self.backend.poll(&device.native, submission));
        Ok(match outcome {
            Some(outcome) => self.settle(key, outcome),
            None => status,
        })
    }

    /// Fault text of a failed buffer, `None` otherwise
    pub fn command_buffer_error(&self, command_buffer: CommandBufferHandle) -> Result<Option<&str>> {
        Ok(self.registry.get::<CommandBufferState<B>>(command_buffer)?.1.error.as_deref())
    }

    /// Registers a drawable and its backing texture
    fn register_drawable(&mut self, device: ObjectKey, native: B::Drawable) -> DrawableHandle {
        let (texture, descriptor) = self.backend.drawable_texture(&native);
        let (handle, key) = self.registry.insert(
            Some(device),
            DrawableState {
                native: Some(native),
                texture: ObjectKey::default(),
                presenter: None,
                device,
            },
        );
        let (_, texture) = self.registry.insert::<TextureState<B>>(
            Some(key),
            TextureState {
                native: texture,
                descriptor,
                device,
            },
        );
        if let Some(state) = self.registry.by_key_mut::<DrawableState<B>>(key) {
            state.texture = texture;
        }
        tracing::trace!(handle = handle.to_raw(), width = descriptor.width, height = descriptor.height, "drawable registered");
        handle
    }

    /// Takes ownership of a drawable produced by a windowing layer
    pub fn adopt_drawable(&mut self, device: DeviceHandle, native: B::Drawable) -> Result<DrawableHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        self.live_device(key)?;
        Ok(self.register_drawable(key, native))
    }

    /// Creates a drawable backed by an offscreen texture
    pub fn create_offscreen_drawable(&mut self, device: DeviceHandle, width: u32, height: u32, format: PixelFormat) -> Result<DrawableHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let state = self.live_device(key)?;
        let limit = state.limits.max_texture_dimension;
        if width == 0 || height == 0 || width > limit || height > limit {
            return Err(BridgeError::argument(format!("drawable of {width}x{height} is outside 1..={limit}")));
        }

        let descriptor = TextureDescriptor::new(width, height).with_format(format);
        let native = self.backend.create_offscreen_drawable(&state.native, &descriptor)?;
        Ok(self.register_drawable(key, native))
    }

    /// Texture to render into; invalid once the drawable is presented
    pub fn drawable_texture(&self, drawable: DrawableHandle) -> Result<TextureHandle> {
        let (_, state) = self.registry.get::<DrawableState<B>>(drawable)?;
        if !self.registry.contains(state.texture) {
            return Err(BridgeError::state("drawable texture was released"));
        }
        Ok(<TextureHandle as RawHandle>::from_key(state.texture))
    }

    /// Schedules a drawable for presentation after the buffer's work
    pub fn present_drawable(&mut self, command_buffer: CommandBufferHandle, drawable: DrawableHandle) -> Result<()> {
        let (buffer_key, buffer) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        let (drawable_key, state) = self.registry.get::<DrawableState<B>>(drawable)?;
        self.live_device(buffer.device)?;
        buffer.phase.ensure_recording()?;
        if state.device != buffer.device {
            return Err(BridgeError::argument("drawable belongs to another device"));
        }
        if state.presenter.is_some_and(|presenter| self.registry.contains(presenter)) {
            return Err(BridgeError::state("drawable is already scheduled for presentation"));
        }

        if let Some(state) = self.registry.by_key_mut::<DrawableState<B>>(drawable_key) {
            state.presenter = Some(buffer_key);
        }
        if let Some(buffer) = self.registry.by_key_mut::<CommandBufferState<B>>(buffer_key) {
            buffer.presents.push(drawable_key);
        }
        tracing::trace!(drawable = drawable.to_raw(), command_buffer = command_buffer.to_raw(), "present scheduled");
        Ok(())
    }

    /// Releases a drawable and its texture without presenting it
    pub fn release_drawable(&mut self, drawable: DrawableHandle) -> Result<()> {
        let (key, state) = self.registry.get::<DrawableState<B>>(drawable)?;
        if let Some(presenter) = state.presenter {
            if let Some(buffer) = self.registry.by_key_mut::<CommandBufferState<B>>(presenter) {
                buffer.presents.retain(|scheduled| *scheduled != key);
            }
        }
        self.registry.release::<DrawableState<B>>(drawable)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{RenderPassDescriptor, testing};
    use super::*;
    use crate::backend::{WgpuBackend, WgpuConfig};
    use crate::error::ErrorKind;
    use crate::format::{ClearColor, StorageMode};
    use crate::handle::{BufferHandle, CommandQueueHandle, ComputePipelineHandle};

    /// Records `add_one` over `buffer` into a fresh command buffer and commits it
    fn commit_add_one<B: Backend>(bridge: &mut Bridge<B>, queue: CommandQueueHandle, pipeline: ComputePipelineHandle, buffer: BufferHandle, grid: [u32; 2], group: [u32; 2]) -> CommandBufferHandle {
        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let encoder = bridge.create_compute_encoder(command_buffer).unwrap();
        bridge.set_compute_pipeline(encoder, pipeline).unwrap();
        bridge.set_buffer(encoder, buffer, 0, 0).unwrap();
        bridge.dispatch(encoder, grid, group).unwrap();
        bridge.end_encoding(encoder).unwrap();
        bridge.commit(command_buffer).unwrap();
        command_buffer
    }

    fn add_one_pipeline<B: Backend>(bridge: &mut Bridge<B>, device: DeviceHandle) -> ComputePipelineHandle {
        let library = bridge.create_library_from_source(device, testing::ADD_ONE).unwrap();
        let function = bridge.create_function(library, "add_one").unwrap();
        bridge.create_compute_pipeline(device, function).unwrap()
    }

    /// Runs `add_one` over 16 bytes holding 0..16
    fn add_one<B: Backend>(bridge: &mut Bridge<B>, device: DeviceHandle, queue: CommandQueueHandle, grid: [u32; 2], group: [u32; 2]) -> Vec<u8> {
        let pipeline = add_one_pipeline(bridge, device);
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();
        bridge.buffer_upload(buffer, &(0u8..16).collect::<Vec<_>>()).unwrap();

        let command_buffer = commit_add_one(bridge, queue, pipeline, buffer, grid, group);
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);

        let mut out = vec![0u8; 16];
        bridge.buffer_download(buffer, &mut out).unwrap();
        out
    }

    /// Runs `add_one` twice over one buffer, the second pass committed before the first is waited on
    fn add_one_twice<B: Backend>(bridge: &mut Bridge<B>, device: DeviceHandle, queue: CommandQueueHandle) -> Vec<u8> {
        let pipeline = add_one_pipeline(bridge, device);
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();
        bridge.buffer_upload(buffer, &(0u8..16).collect::<Vec<_>>()).unwrap();

        let first = commit_add_one(bridge, queue, pipeline, buffer, [4, 1], [4, 1]);
        let second = commit_add_one(bridge, queue, pipeline, buffer, [4, 1], [4, 1]);
        assert_eq!(bridge.wait_for_completion(first).unwrap(), CommandBufferStatus::Completed);
        assert_eq!(bridge.wait_for_completion(second).unwrap(), CommandBufferStatus::Completed);

        let mut out = vec![0u8; 16];
        bridge.buffer_download(buffer, &mut out).unwrap();
        out
    }

    fn wgpu_bridge() -> Option<(Bridge<WgpuBackend>, DeviceHandle, CommandQueueHandle)> {
        let mut bridge = Bridge::new(WgpuBackend::new(WgpuConfig::from_env()));
        if !bridge.is_available() {
            return None;
        }
        let device = bridge.create_default_device().unwrap();
        let queue = bridge.create_command_queue(device).unwrap();
        Some((bridge, device, queue))
    }

    #[test]
    fn test_add_one_headless() {
        let (mut bridge, device, queue) = testing::bridge();
        assert_eq!(add_one(&mut bridge, device, queue, [4, 1], [4, 1]), (1u8..=16).collect::<Vec<_>>());
        assert_eq!(bridge.backend().stats().kernel_runs(), 1);
    }

    #[test]
    fn test_add_one_grid_wider_than_data() {
        let (mut bridge, device, queue) = testing::bridge();
        assert_eq!(add_one(&mut bridge, device, queue, [16, 1], [16, 1]), (1u8..=16).collect::<Vec<_>>());

        let (mut bridge, device, queue) = testing::mirrored_bridge();
        assert_eq!(add_one(&mut bridge, device, queue, [16, 1], [16, 1]), (1u8..=16).collect::<Vec<_>>());
    }

    #[test]
    fn test_add_one_wgpu() {
        let Some((mut bridge, device, queue)) = wgpu_bridge() else {
            return;
        };
        assert_eq!(add_one(&mut bridge, device, queue, [4, 1], [4, 1]), (1u8..=16).collect::<Vec<_>>());
        assert_eq!(add_one(&mut bridge, device, queue, [16, 1], [16, 1]), (1u8..=16).collect::<Vec<_>>());
    }

    #[test]
    fn test_chained_buffers_keep_queue_order() {
        let (mut bridge, device, queue) = testing::bridge();
        assert_eq!(add_one_twice(&mut bridge, device, queue), (2u8..=17).collect::<Vec<_>>());

        let (mut bridge, device, queue) = testing::mirrored_bridge();
        assert_eq!(add_one_twice(&mut bridge, device, queue), (2u8..=17).collect::<Vec<_>>());
        assert_eq!(bridge.backend().stats().kernel_runs(), 2);
    }

    #[test]
    fn test_chained_buffers_keep_queue_order_wgpu() {
        let Some((mut bridge, device, queue)) = wgpu_bridge() else {
            return;
        };
        assert_eq!(add_one_twice(&mut bridge, device, queue), (2u8..=17).collect::<Vec<_>>());
    }

    #[test]
    fn test_status_polling_reaches_completion_wgpu() {
        let Some((mut bridge, device, queue)) = wgpu_bridge() else {
            return;
        };
        let pipeline = add_one_pipeline(&mut bridge, device);
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();
        let command_buffer = commit_add_one(&mut bridge, queue, pipeline, buffer, [4, 1], [4, 1]);

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        let mut status = bridge.command_buffer_status(command_buffer).unwrap();
        while status == CommandBufferStatus::Committed && std::time::Instant::now() < deadline {
            std::thread::yield_now();
            status = bridge.command_buffer_status(command_buffer).unwrap();
        }
        assert_eq!(status, CommandBufferStatus::Completed);
        assert_eq!(bridge.command_buffer_error(command_buffer).unwrap(), None);
    }

    #[test]
    fn test_commit_lifecycle() {
        let (mut bridge, _, queue) = testing::bridge();
        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap_err().kind(), ErrorKind::InvalidState);

        let encoder = bridge.create_blit_encoder(command_buffer).unwrap();
        assert_eq!(bridge.commit(command_buffer).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(bridge.command_buffer_status(command_buffer).unwrap(), CommandBufferStatus::Encoding);
        bridge.end_encoding(encoder).unwrap();

        bridge.commit(command_buffer).unwrap();
        assert_eq!(bridge.commit(command_buffer).unwrap_err().kind(), ErrorKind::InvalidState);
        assert_eq!(bridge.create_compute_encoder(command_buffer).unwrap_err().kind(), ErrorKind::InvalidState);

        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);
        assert_eq!(bridge.command_buffer_status(command_buffer).unwrap(), CommandBufferStatus::Completed);
        assert_eq!(bridge.command_buffer_error(command_buffer).unwrap(), None);
    }

    #[test]
    fn test_oversized_threadgroup_fails_buffer() {
        let (mut bridge, device, queue) = testing::bridge();
        let library = bridge.create_library_from_source(device, testing::ADD_ONE).unwrap();
        let function = bridge.create_function(library, "add_one").unwrap();
        let pipeline = bridge.create_compute_pipeline(device, function).unwrap();
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();

        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let encoder = bridge.create_compute_encoder(command_buffer).unwrap();
        bridge.set_compute_pipeline(encoder, pipeline).unwrap();
        bridge.set_buffer(encoder, buffer, 0, 0).unwrap();
        bridge.dispatch(encoder, [4096, 1], [2048, 1]).unwrap();
        bridge.end_encoding(encoder).unwrap();
        bridge.commit(command_buffer).unwrap();

        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Failed);
        assert!(bridge.command_buffer_error(command_buffer).unwrap().unwrap().contains("threadgroup"));
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Failed);
    }

    #[test]
    fn test_contents_pointer_is_flushed_and_refreshed() {
        let (mut bridge, device, queue) = testing::mirrored_bridge();
        let source = bridge.create_buffer(device, 8, StorageMode::Shared).unwrap();
        let destination = bridge.create_buffer(device, 8, StorageMode::Shared).unwrap();

        let pointer = bridge.buffer_contents(source).unwrap();
        // SAFETY: the buffer is 8 bytes long and alive
        unsafe { std::ptr::copy_nonoverlapping([9u8; 8].as_ptr(), pointer.as_ptr(), 8) };
        let view = bridge.buffer_contents(destination).unwrap();

        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let encoder = bridge.create_blit_encoder(command_buffer).unwrap();
        bridge.copy_buffer(encoder, source, 0, destination, 0, 8).unwrap();
        bridge.end_encoding(encoder).unwrap();
        bridge.commit(command_buffer).unwrap();
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);

        let mut out = [0u8; 8];
        bridge.buffer_download(destination, &mut out).unwrap();
        assert_eq!(out, [9u8; 8]);
        // SAFETY: the mirror outlives the handle lookups above and is 8 bytes long
        let seen = unsafe { std::slice::from_raw_parts(view.as_ptr(), 8) };
        assert_eq!(seen, &[9u8; 8]);
    }

    #[test]
    fn test_mirror_is_refreshed_on_wait() {
        let (mut bridge, device, queue) = testing::mirrored_bridge();
        let pipeline = add_one_pipeline(&mut bridge, device);
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();
        bridge.buffer_upload(buffer, &[0u8; 16]).unwrap();
        let view = bridge.buffer_contents(buffer).unwrap();

        let command_buffer = commit_add_one(&mut bridge, queue, pipeline, buffer, [4, 1], [4, 1]);
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);

        // SAFETY: the buffer is 16 bytes long and alive
        let seen = unsafe { std::slice::from_raw_parts(view.as_ptr(), 16) };
        assert_eq!(seen, &[1u8; 16]);
    }

    #[test]
    fn test_host_writes_after_commit_need_another_contents_call() {
        let (mut bridge, device, queue) = testing::mirrored_bridge();
        let pipeline = add_one_pipeline(&mut bridge, device);
        let buffer = bridge.create_buffer(device, 16, StorageMode::Shared).unwrap();
        let first = commit_add_one(&mut bridge, queue, pipeline, buffer, [4, 1], [4, 1]);
        bridge.wait_for_completion(first).unwrap();

        let pointer = bridge.buffer_contents(buffer).unwrap();
        // SAFETY: the buffer is 16 bytes long and alive
        unsafe { std::ptr::write_bytes(pointer.as_ptr(), 40, 16) };
        let second = commit_add_one(&mut bridge, queue, pipeline, buffer, [4, 1], [4, 1]);
        bridge.wait_for_completion(second).unwrap();

        let mut out = [0u8; 16];
        bridge.buffer_download(buffer, &mut out).unwrap();
        assert_eq!(out, [41u8; 16]);
    }

    #[test]
    fn test_offscreen_drawable_presentation() {
        let (mut bridge, device, queue) = testing::bridge();
        let drawable = bridge.create_offscreen_drawable(device, 4, 4, PixelFormat::Rgba8Unorm).unwrap();
        let texture = bridge.drawable_texture(drawable).unwrap();

        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let red = ClearColor {
            red: 1.0,
            green: 0.0,
            blue: 0.0,
            alpha: 1.0,
        };
        let encoder = bridge.create_render_encoder(command_buffer, &RenderPassDescriptor::clear(texture, red)).unwrap();
        bridge.end_encoding(encoder).unwrap();

        bridge.present_drawable(command_buffer, drawable).unwrap();
        assert_eq!(bridge.present_drawable(command_buffer, drawable).unwrap_err().kind(), ErrorKind::InvalidState);
        let other = bridge.create_command_buffer(queue).unwrap();
        assert_eq!(bridge.present_drawable(other, drawable).unwrap_err().kind(), ErrorKind::InvalidState);

        bridge.commit(command_buffer).unwrap();
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Completed);
        assert_eq!(bridge.drawable_texture(drawable).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.texture_descriptor(texture).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.backend().stats().presents(), 1);
    }

    #[test]
    fn test_render_clear_reaches_texture() {
        let (mut bridge, device, queue) = testing::bridge();
        let texture = bridge.create_texture(device, TextureDescriptor::new(2, 2)).unwrap();
        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let green = ClearColor {
            red: 0.0,
            green: 1.0,
            blue: 0.0,
            alpha: 1.0,
        };
        let encoder = bridge.create_render_encoder(command_buffer, &RenderPassDescriptor::clear(texture, green)).unwrap();
        bridge.end_encoding(encoder).unwrap();
        bridge.commit(command_buffer).unwrap();
        bridge.wait_for_completion(command_buffer).unwrap();

        let mut out = vec![0u8; 16];
        bridge.texture_download(texture, &mut out, 2, 2, 8).unwrap();
        assert_eq!(out, [0, 255, 0, 255].repeat(4));
    }

    #[test]
    fn test_device_release_invalidates_everything() {
        let (mut bridge, device, queue) = testing::bridge();
        let buffer = bridge.create_buffer(device, 4, StorageMode::Shared).unwrap();
        let library = bridge.create_library_from_source(device, testing::ADD_ONE).unwrap();
        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let drawable = bridge.create_offscreen_drawable(device, 2, 2, PixelFormat::Bgra8Unorm).unwrap();

        bridge.release_device(device).unwrap();
        assert_eq!(bridge.live_handles(), 0);
        assert_eq!(bridge.buffer_length(buffer).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.library_function_names(library).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.command_buffer_status(command_buffer).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.drawable_texture(drawable).unwrap_err().kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_device_loss_fails_pending_work() {
        let (mut bridge, device, queue) = testing::bridge();
        let command_buffer = bridge.create_command_buffer(queue).unwrap();
        let encoder = bridge.create_blit_encoder(command_buffer).unwrap();
        bridge.end_encoding(encoder).unwrap();
        bridge.commit(command_buffer).unwrap();

        bridge.backend().lose_device(0);
        assert_eq!(bridge.create_buffer(device, 4, StorageMode::Shared).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap_err().kind(), ErrorKind::DeviceUnavailable);
        assert_eq!(bridge.wait_for_completion(command_buffer).unwrap(), CommandBufferStatus::Failed);
        assert!(bridge.command_buffer_error(command_buffer).unwrap().is_some());
    }
}
