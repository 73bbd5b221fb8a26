use super::Bridge;
use crate::backend::{Backend, Binding, BlitCommand, ColorAttachment, ComputeCommand, Pass, RenderCommand};
use crate::error::{BridgeError, Result};
use crate::format::{ClearColor, LoadAction, PrimitiveType, StoreAction};
use crate::handle::{BufferHandle, CommandBufferHandle, CommandQueueHandle, ComputePipelineHandle, EncoderHandle, ObjectKey, RenderPipelineHandle, TextureHandle};
use crate::object::{BufferState, CommandBufferState, ComputePipelineState, EncoderState, QueueState, RenderPipelineState, TextureState};
use crate::recorder::{EncoderKind, Phase};
use bytes::Bytes;
use std::collections::BTreeSet;

/// Color attachment of a render encoder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPassDescriptor {
    /// Texture rendered into
    pub texture: TextureHandle,
    /// Contents at the start of the pass
    pub load_action: LoadAction,
    /// Contents at the end of the pass
    pub store_action: StoreAction,
    /// Used when `load_action` is [`LoadAction::Clear`]
    pub clear_color: ClearColor,
}

impl RenderPassDescriptor {
    /// Clears the texture to `clear_color` and keeps the result
    pub const fn clear(texture: TextureHandle, clear_color: ClearColor) -> Self {
        Self {
            texture,
            load_action: LoadAction::Clear,
            store_action: StoreAction::Store,
            clear_color,
        }
    }
}

const BINDING_ENCODERS: &[EncoderKind] = &[EncoderKind::Compute, EncoderKind::Render];

impl<B: Backend> Bridge<B> {
    /// Starts a command buffer on a queue
    pub fn create_command_buffer(&mut self, queue: CommandQueueHandle) -> Result<CommandBufferHandle> {
        let (key, state) = self.registry.get::<QueueState<B>>(queue)?;
        let device = state.device;
        self.live_device(device)?;

        let (handle, _) = self.registry.insert(
            Some(key),
            CommandBufferState {
                queue: key,
                device,
                phase: Phase::new(),
                passes: Vec::new(),
                presents: Vec::new(),
                mirrored: BTreeSet::new(),
                submission: None,
                error: None,
                encoders: 0,
            },
        );
        tracing::trace!(handle = handle.to_raw(), "command buffer created");
        Ok(handle)
    }

    /// Releases a command buffer and its encoders
    ///
    /// Committed work keeps running; only the handle goes away.
    pub fn release_command_buffer(&mut self, command_buffer: CommandBufferHandle) -> Result<()> {
        self.registry.release::<CommandBufferState<B>>(command_buffer)?;
        Ok(())
    }

    /// Opens an encoder on a command buffer with no other open encoder
    fn open_encoder(&mut self, command_buffer: CommandBufferHandle, kind: EncoderKind, pass: Pass<B>, attachment: Option<crate::format::PixelFormat>) -> Result<EncoderHandle> {
        let (key, state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        self.live_device(state.device)?;
        state.phase.ensure_recording()?;

        let (handle, encoder) = self.registry.insert(
            Some(key),
            EncoderState {
                kind,
                command_buffer: key,
                pass: Some(pass),
                bound_buffers: BTreeSet::new(),
                bound_textures: BTreeSet::new(),
                layout: None,
                attachment,
            },
        );

        let begun = match self.registry.by_key_mut::<CommandBufferState<B>>(key) {
            Some(state) => state.phase.begin_encoder(encoder).map(|()| state.encoders += 1),
            None => Err(BridgeError::state("command buffer vanished")),
        };
        if let Err(error) = begun {
            self.registry.remove(encoder);
            return Err(error);
        }
        tracing::trace!(handle = handle.to_raw(), kind = kind.name(), "encoder opened");
        Ok(handle)
    }

    fn pass_label(&self, command_buffer: CommandBufferHandle, kind: EncoderKind) -> Option<String> {
        let index = self.registry.get::<CommandBufferState<B>>(command_buffer).map(|(_, state)| state.encoders).unwrap_or_default();
        self.label(|| format!("{} pass {index} of command buffer {:#x}", kind.name(), command_buffer.to_raw()))
    }

    pub fn create_compute_encoder(&mut self, command_buffer: CommandBufferHandle) -> Result<EncoderHandle> {
        let label = self.pass_label(command_buffer, EncoderKind::Compute);
        self.open_encoder(command_buffer, EncoderKind::Compute, Pass::Compute { label, commands: Vec::new() }, None)
    }

    pub fn create_blit_encoder(&mut self, command_buffer: CommandBufferHandle) -> Result<EncoderHandle> {
        let label = self.pass_label(command_buffer, EncoderKind::Blit);
        self.open_encoder(command_buffer, EncoderKind::Blit, Pass::Blit { label, commands: Vec::new() }, None)
    }

    /// Opens a render encoder drawing into the descriptor's color attachment
    pub fn create_render_encoder(&mut self, command_buffer: CommandBufferHandle, descriptor: &RenderPassDescriptor) -> Result<EncoderHandle> {
        let (_, buffer_state) = self.registry.get::<CommandBufferState<B>>(command_buffer)?;
        let (_, texture) = self.registry.get::<TextureState<B>>(descriptor.texture)?;
        if texture.device != buffer_state.device {
            return Err(BridgeError::argument("attachment texture belongs to another device"));
        }

        let format = texture.descriptor.format;
        let target = ColorAttachment {
            texture: texture.native.clone(),
            format,
            load: descriptor.load_action,
            store: descriptor.store_action,
            clear_color: descriptor.clear_color,
        };
        let label = self.pass_label(command_buffer, EncoderKind::Render);
        self.open_encoder(
            command_buffer,
            EncoderKind::Render,
            Pass::Render {
                label,
                target,
                commands: Vec::new(),
            },
            Some(format),
        )
    }

    /// Resolves an encoder that must be open and of one of the `kinds`
    ///
    /// # Returns
    /// The encoder key and the device key of its command buffer
    fn recording(&self, encoder: EncoderHandle, kinds: &[EncoderKind]) -> Result<(ObjectKey, ObjectKey)> {
        let (key, state) = self.registry.get::<EncoderState<B>>(encoder)?;
        let command_buffer = self
            .registry
            .by_key::<CommandBufferState<B>>(state.command_buffer)
            .ok_or_else(|| BridgeError::state("command buffer was released"))?;
        self.live_device(command_buffer.device)?;

        if state.pass.is_none() || !command_buffer.phase.is_open(key) {
            return Err(BridgeError::state("encoder has already ended"));
        }
        if !kinds.contains(&state.kind) {
            return Err(BridgeError::state(format!("operation is not valid on a {} encoder", state.kind.name())));
        }
        Ok((key, command_buffer.device))
    }

    fn encoder_mut(&mut self, key: ObjectKey) -> Result<&mut EncoderState<B>> {
        self.registry.by_key_mut::<EncoderState<B>>(key).ok_or_else(|| BridgeError::state("encoder was released"))
    }

    /// Appends a binding to the open pass
    fn bind(&mut self, key: ObjectKey, binding: Binding<B>) -> Result<()> {
        let encoder = self.encoder_mut(key)?;
        match &binding {
            Binding::Buffer { slot, .. } | Binding::Bytes { slot, .. } => encoder.bound_buffers.insert(*slot),
            Binding::Texture { slot, .. } => encoder.bound_textures.insert(*slot),
        };
        match encoder.pass.as_mut() {
            Some(Pass::Compute { commands, .. }) => commands.push(ComputeCommand::Bind(binding)),
            Some(Pass::Render { commands, .. }) => commands.push(RenderCommand::Bind(binding)),
            _ => return Err(BridgeError::state("encoder does not accept bindings")),
        }
        Ok(())
    }

    /// Marks a mirrored buffer as used by the encoder's command buffer
    fn touch_buffer(&mut self, encoder: ObjectKey, buffer: ObjectKey) {
        let mirrored = self.registry.by_key::<BufferState<B>>(buffer).is_some_and(|state| state.mirror.is_some());
        let command_buffer = self.registry.by_key::<EncoderState<B>>(encoder).map(|state| state.command_buffer);
        if let (true, Some(command_buffer)) = (mirrored, command_buffer) {
            if let Some(state) = self.registry.by_key_mut::<CommandBufferState<B>>(command_buffer) {
                state.mirrored.insert(buffer);
            }
        }
    }

    fn slot_limit(&self, device: ObjectKey, texture: bool) -> Result<u32> {
        let limits = self.live_device(device)?.limits;
        Ok(if texture { limits.max_texture_slots } else { limits.max_buffer_slots })
    }

    pub fn set_compute_pipeline(&mut self, encoder: EncoderHandle, pipeline: ComputePipelineHandle) -> Result<()> {
        let (key, device) = self.recording(encoder, &[EncoderKind::Compute])?;
        let (_, state) = self.registry.get::<ComputePipelineState<B>>(pipeline)?;
        if state.device != device {
            return Err(BridgeError::argument("pipeline belongs to another device"));
        }
        let (native, layout) = (state.native.clone(), state.layout.clone());

        let encoder = self.encoder_mut(key)?;
        encoder.layout = Some(layout);
        if let Some(Pass::Compute { commands, .. }) = encoder.pass.as_mut() {
            commands.push(ComputeCommand::SetPipeline(native));
        }
        Ok(())
    }

    /// Sets the render pipeline; its pixel format must match the attachment
    pub fn set_render_pipeline(&mut self, encoder: EncoderHandle, pipeline: RenderPipelineHandle) -> Result<()> {
        let (key, device) = self.recording(encoder, &[EncoderKind::Render])?;
        let (_, state) = self.registry.get::<RenderPipelineState<B>>(pipeline)?;
        if state.device != device {
            return Err(BridgeError::argument("pipeline belongs to another device"));
        }
        let attachment = self.registry.by_key::<EncoderState<B>>(key).and_then(|encoder| encoder.attachment);
        if attachment != Some(state.descriptor.pixel_format) {
            return Err(BridgeError::argument(format!(
                "pipeline renders {:?} but the attachment is {attachment:?}",
                state.descriptor.pixel_format
            )));
        }
        let (native, layout) = (state.native.clone(), state.layout.clone());

        let encoder = self.encoder_mut(key)?;
        encoder.layout = Some(layout);
        if let Some(Pass::Render { commands, .. }) = encoder.pass.as_mut() {
            commands.push(RenderCommand::SetPipeline(native));
        }
        Ok(())
    }

    /// Binds a buffer at a byte offset to a buffer slot
    pub fn set_buffer(&mut self, encoder: EncoderHandle, buffer: BufferHandle, offset: u64, slot: u32) -> Result<()> {
        let (key, device) = self.recording(encoder, BINDING_ENCODERS)?;
        let (buffer_key, state) = self.registry.get::<BufferState<B>>(buffer)?;
        if state.device != device {
            return Err(BridgeError::argument("buffer belongs to another device"));
        }
        if offset >= state.length {
            return Err(BridgeError::argument(format!("offset {offset} is past the end of the {}-byte buffer", state.length)));
        }
        let limit = self.slot_limit(device, false)?;
        if slot >= limit {
            return Err(BridgeError::argument(format!("buffer slot {slot} exceeds the {limit} available")));
        }

        let native = state.native.clone();
        tracing::trace!(slot, offset, buffer = buffer.to_raw(), "buffer bound");
        self.bind(key, Binding::Buffer { slot, buffer: native, offset })?;
        self.touch_buffer(key, buffer_key);
        Ok(())
    }

    /// Binds a texture to a texture slot
    pub fn set_texture(&mut self, encoder: EncoderHandle, texture: TextureHandle, slot: u32) -> Result<()> {
        let (key, device) = self.recording(encoder, BINDING_ENCODERS)?;
        let (_, state) = self.registry.get::<TextureState<B>>(texture)?;
        if state.device != device {
            return Err(BridgeError::argument("texture belongs to another device"));
        }
        let limit = self.slot_limit(device, true)?;
        if slot >= limit {
            return Err(BridgeError::argument(format!("texture slot {slot} exceeds the {limit} available")));
        }

        let native = state.native.clone();
        tracing::trace!(slot, texture = texture.to_raw(), "texture bound");
        self.bind(key, Binding::Texture { slot, texture: native })
    }

    /// Copies a small block of constants into a buffer slot at record time
    pub fn set_bytes(&mut self, encoder: EncoderHandle, data: &[u8], slot: u32) -> Result<()> {
        let (key, device) = self.recording(encoder, BINDING_ENCODERS)?;
        if data.is_empty() || data.len() > self.config.max_inline_bytes {
            return Err(BridgeError::argument(format!(
                "inline data of {} bytes is outside 1..={}",
                data.len(),
                self.config.max_inline_bytes
            )));
        }
        let limit = self.slot_limit(device, false)?;
        if slot >= limit {
            return Err(BridgeError::argument(format!("buffer slot {slot} exceeds the {limit} available")));
        }

        tracing::trace!(slot, len = data.len(), "inline bytes bound");
        self.bind(
            key,
            Binding::Bytes {
                slot,
                data: Bytes::copy_from_slice(data),
            },
        )
    }

    /// Checks that a pipeline is set and every slot it reads is bound
    fn check_bound(&self, key: ObjectKey, kind: EncoderKind) -> Result<()> {
        let encoder = self.registry.by_key::<EncoderState<B>>(key).ok_or_else(|| BridgeError::state("encoder was released"))?;
        let layout = encoder.layout.as_ref().ok_or_else(|| BridgeError::state(format!("no {} pipeline set", kind.name())))?;
        if let Some(slot) = layout.buffer_slots().find(|slot| !encoder.bound_buffers.contains(slot)) {
            return Err(BridgeError::state(format!("buffer slot {slot} read by the pipeline is unbound")));
        }
        if let Some(slot) = layout.texture_slots().find(|slot| !encoder.bound_textures.contains(slot)) {
            return Err(BridgeError::state(format!("texture slot {slot} read by the pipeline is unbound")));
        }
        Ok(())
    }

    /// Records a dispatch over `grid` threads in threadgroups of `group` threads
    ///
    /// Threadgroup sizes above the device limit are not rejected here; they
    /// fault during execution and fail the command buffer.
    pub fn dispatch(&mut self, encoder: EncoderHandle, grid: [u32; 2], group: [u32; 2]) -> Result<()> {
        let (key, _) = self.recording(encoder, &[EncoderKind::Compute])?;
        if grid.contains(&0) || group.contains(&0) {
            return Err(BridgeError::argument(format!("dispatch of {grid:?} threads in groups of {group:?} has a zero component")));
        }
        self.check_bound(key, EncoderKind::Compute)?;

        tracing::trace!(?grid, ?group, "dispatch recorded");
        if let Some(Pass::Compute { commands, .. }) = self.encoder_mut(key)?.pass.as_mut() {
            commands.push(ComputeCommand::Dispatch { grid, group });
        }
        Ok(())
    }

    /// Records a non-indexed draw of `count` vertices starting at `start`
    pub fn draw(&mut self, encoder: EncoderHandle, primitive: PrimitiveType, start: u32, count: u32) -> Result<()> {
        let (key, _) = self.recording(encoder, &[EncoderKind::Render])?;
        if count == 0 {
            return Ok(());
        }
        self.check_bound(key, EncoderKind::Render)?;
        if start.checked_add(count).is_none() {
            return Err(BridgeError::argument(format!("vertex range {start}+{count} overflows")));
        }

        tracing::trace!(?primitive, start, count, "draw recorded");
        if let Some(Pass::Render { commands, .. }) = self.encoder_mut(key)?.pass.as_mut() {
            commands.push(RenderCommand::Draw { primitive, start, count });
        }
        Ok(())
    }

    /// Records a buffer-to-buffer copy
    pub fn copy_buffer(&mut self, encoder: EncoderHandle, source: BufferHandle, source_offset: u64, destination: BufferHandle, destination_offset: u64, size: u64) -> Result<()> {
        let (key, device) = self.recording(encoder, &[EncoderKind::Blit])?;
        let (source_key, src) = self.registry.get::<BufferState<B>>(source)?;
        let (destination_key, dst) = self.registry.get::<BufferState<B>>(destination)?;
        if src.device != device || dst.device != device {
            return Err(BridgeError::argument("buffer belongs to another device"));
        }
        if source_key == destination_key {
            return Err(BridgeError::argument("source and destination are the same buffer"));
        }
        if size == 0 {
            return Ok(());
        }

        let in_bounds = |offset: u64, length: u64| offset.checked_add(size).is_some_and(|end| end <= length);
        if !in_bounds(source_offset, src.length) || !in_bounds(destination_offset, dst.length) {
            return Err(BridgeError::size(format!(
                "copy of {size} bytes from {source_offset} (of {}) to {destination_offset} (of {}) is out of bounds",
                src.length, dst.length
            )));
        }
        let alignment = self.live_device(device)?.limits.copy_alignment.max(1);
        if [source_offset, destination_offset, size].iter().any(|value| value % alignment != 0) {
            return Err(BridgeError::argument(format!("copy offsets and size must be multiples of {alignment}")));
        }

        let command = BlitCommand::CopyBuffer {
            source: src.native.clone(),
            source_offset,
            destination: dst.native.clone(),
            destination_offset,
            size,
        };
        tracing::trace!(size, source_offset, destination_offset, "buffer copy recorded");
        if let Some(Pass::Blit { commands, .. }) = self.encoder_mut(key)?.pass.as_mut() {
            commands.push(command);
        }
        self.touch_buffer(key, source_key);
        self.touch_buffer(key, destination_key);
        Ok(())
    }

    /// Closes the encoder and appends its pass to the command buffer
    pub fn end_encoding(&mut self, encoder: EncoderHandle) -> Result<()> {
        let (key, state) = self.registry.get_mut::<EncoderState<B>>(encoder)?;
        let command_buffer = state.command_buffer;
        let pass = state.pass.take().ok_or_else(|| BridgeError::state("encoder has already ended"))?;

        let state = self
            .registry
            .by_key_mut::<CommandBufferState<B>>(command_buffer)
            .ok_or_else(|| BridgeError::state("command buffer was released"))?;
        state.phase.end_encoder(key)?;
        state.passes.push(pass);
        tracing::trace!(handle = encoder.to_raw(), "encoder ended");
        Ok(())
    }

    pub fn encoder_kind(&self, encoder: EncoderHandle) -> Result<EncoderKind> {
        Ok(self.registry.get::<EncoderState<B>>(encoder)?.1.kind)
    }

    /// Releases an encoder, ending it first when it is still open
    pub fn release_encoder(&mut self, encoder: EncoderHandle) -> Result<()> {
        let (_, state) = self.registry.get::<EncoderState<B>>(encoder)?;
        if state.pass.is_some() {
            tracing::warn!(handle = encoder.to_raw(), "encoder released while open; ending it");
            self.end_encoding(encoder)?;
        }
        self.registry.release::<EncoderState<B>>(encoder)?;
        Ok(())
    }
}
