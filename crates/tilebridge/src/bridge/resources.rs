use super::Bridge;
use crate::backend::Backend;
use crate::error::{BridgeError, Result};
use crate::format::{StorageMode, TextureDescriptor};
use crate::handle::{BufferHandle, DeviceHandle, TextureHandle};
use crate::object::{BufferState, DeviceState, TextureState};
use std::ptr::NonNull;

/// Checks a texture transfer against the allocation
///
/// # Arguments
/// * `descriptor` - Allocation of the texture
/// * `len` - Length of the caller's data
/// * `width`, `height` - Transfer region, which must cover the whole texture
/// * `bytes_per_row` - Row stride of the caller's data
fn check_texture_transfer(descriptor: &TextureDescriptor, len: usize, width: u32, height: u32, bytes_per_row: u32) -> Result<()> {
    if (width, height) != (descriptor.width, descriptor.height) {
        return Err(BridgeError::size(format!(
            "transfer of {width}x{height} texels does not match the {}x{} texture",
            descriptor.width, descriptor.height
        )));
    }
    let row = descriptor.row_bytes();
    if u64::from(bytes_per_row) < row {
        return Err(BridgeError::size(format!("bytes_per_row {bytes_per_row} is less than the {row} bytes of a row")));
    }
    let required = u64::from(bytes_per_row) * u64::from(height - 1) + row;
    if (len as u64) < required {
        return Err(BridgeError::size(format!("{len} bytes given but the transfer needs {required}")));
    }
    Ok(())
}

impl<B: Backend> Bridge<B> {
    /// Allocates a zero-initialized buffer
    ///
    /// # Arguments
    /// * `device` - Owning device
    /// * `size` - Length in bytes; must be positive and within the device limit
    /// * `storage` - CPU/GPU visibility policy, fixed for the buffer's lifetime
    pub fn create_buffer(&mut self, device: DeviceHandle, size: u64, storage: StorageMode) -> Result<BufferHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let state = self.live_device(key)?;
        if size == 0 || size > state.limits.max_buffer_size {
            return Err(BridgeError::argument(format!(
                "buffer size {size} is outside 1..={}",
                state.limits.max_buffer_size
            )));
        }

        let native = self.backend.create_buffer(&state.native, size)?;
        // Without unified memory the CPU-visible modes are served from a mirror
        let mirror = (storage.is_cpu_visible() && self.backend.buffer_contents(&native).is_none()).then(|| vec![0u8; size as usize].into_boxed_slice());

        let (handle, _) = self.registry.insert(
            Some(key),
            BufferState {
                native,
                length: size,
                storage,
                mirror,
                mirror_dirty: false,
                device: key,
            },
        );
        tracing::debug!(handle = handle.to_raw(), size, ?storage, "buffer created");
        Ok(handle)
    }

    /// Allocates a buffer from a raw resource options word
    pub fn create_buffer_with_options(&mut self, device: DeviceHandle, size: u64, options: u32) -> Result<BufferHandle> {
        self.create_buffer(device, size, StorageMode::from_options(options)?)
    }

    /// Copies `data` to the start of the buffer; work committed afterwards sees it
    pub fn buffer_upload(&mut self, buffer: BufferHandle, data: &[u8]) -> Result<()> {
        let (key, state) = self.registry.get::<BufferState<B>>(buffer)?;
        let device = self.live_device(state.device)?;
        if !state.storage.is_cpu_visible() {
            return Err(BridgeError::unsupported("private buffers are populated with blit copies"));
        }
        if data.len() as u64 > state.length {
            return Err(BridgeError::size(format!("{} bytes do not fit the {}-byte buffer", data.len(), state.length)));
        }
        if data.is_empty() {
            return Ok(());
        }

        if state.mirror.is_none() {
            self.backend.write_buffer(&device.native, &state.native, 0, data)?;
            return Ok(());
        }

        // The GPU copy is written from the mirror so an unaligned tail keeps the bytes after `data`
        let (device_key, length) = (state.device, state.length);
        let end = (data.len() as u64).next_multiple_of(device.limits.copy_alignment.max(1)).min(length) as usize;
        if let Some(mirror) = self.registry.by_key_mut::<BufferState<B>>(key).and_then(|state| state.mirror.as_mut()) {
            mirror[..data.len()].copy_from_slice(data);
        }
        let device = self.live_device(device_key)?;
        if let Some(BufferState { native, mirror: Some(mirror), .. }) = self.registry.by_key::<BufferState<B>>(key) {
            self.backend.write_buffer(&device.native, native, 0, &mirror[..end])?;
        }
        Ok(())
    }

    /// Copies the start of the buffer into `out`
    pub fn buffer_download(&self, buffer: BufferHandle, out: &mut [u8]) -> Result<()> {
        let (_, state) = self.registry.get::<BufferState<B>>(buffer)?;
        let device = self.live_device(state.device)?;
        if !state.storage.is_cpu_visible() {
            return Err(BridgeError::unsupported("private buffers cannot be read by the CPU"));
        }
        if out.len() as u64 > state.length {
            return Err(BridgeError::size(format!("{} bytes requested from the {}-byte buffer", out.len(), state.length)));
        }
        if out.is_empty() {
            return Ok(());
        }

        match &state.mirror {
            Some(mirror) => out.copy_from_slice(&mirror[..out.len()]),
            None => self.backend.read_buffer(&device.native, &state.native, 0, out)?,
        }
        Ok(())
    }

    /// CPU pointer to the buffer contents, valid until the buffer is released
    ///
    /// Writes through the pointer reach the GPU no later than the next commit of
    /// a command buffer that uses the buffer; GPU writes are visible once such a
    /// command buffer has been observed complete.
    ///
    /// Without unified memory the pointer addresses a CPU mirror. Each call marks
    /// the mirror as host-written, so the next commit that uses the buffer uploads
    /// it; host writes made after that commit need another call.
    pub fn buffer_contents(&mut self, buffer: BufferHandle) -> Result<NonNull<u8>> {
        let (key, state) = self.registry.get::<BufferState<B>>(buffer)?;
        self.live_device(state.device)?;
        if !state.storage.is_cpu_visible() {
            return Err(BridgeError::unsupported("private buffers have no CPU contents"));
        }
        if state.mirror.is_none() {
            return self
                .backend
                .buffer_contents(&state.native)
                .ok_or_else(|| BridgeError::unsupported("backend exposes no CPU pointer for this buffer"));
        }

        self.registry
            .by_key_mut::<BufferState<B>>(key)
            .and_then(|state| {
                state.mirror_dirty = true;
                state.mirror.as_mut()
            })
            .and_then(|mirror| NonNull::new(mirror.as_mut_ptr()))
            .ok_or_else(|| BridgeError::unsupported("buffer has no CPU contents"))
    }

    pub fn buffer_length(&self, buffer: BufferHandle) -> Result<u64> {
        Ok(self.registry.get::<BufferState<B>>(buffer)?.1.length)
    }

    pub fn buffer_storage_mode(&self, buffer: BufferHandle) -> Result<StorageMode> {
        Ok(self.registry.get::<BufferState<B>>(buffer)?.1.storage)
    }

    /// Releases the handle; command buffers that bound the buffer keep the memory alive
    pub fn release_buffer(&mut self, buffer: BufferHandle) -> Result<()> {
        self.registry.release::<BufferState<B>>(buffer)?;
        Ok(())
    }

    /// Allocates a 2D texture
    pub fn create_texture(&mut self, device: DeviceHandle, descriptor: TextureDescriptor) -> Result<TextureHandle> {
        let (key, _) = self.registry.get::<DeviceState<B>>(device)?;
        let state = self.live_device(key)?;
        let max = state.limits.max_texture_dimension;
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.width > max || descriptor.height > max {
            return Err(BridgeError::argument(format!(
                "texture size {}x{} is outside 1..={max}",
                descriptor.width, descriptor.height
            )));
        }
        if descriptor.writable && !descriptor.format.supports_storage() {
            return Err(BridgeError::unsupported(format!("{:?} textures cannot be written by shaders", descriptor.format)));
        }

        let native = self.backend.create_texture(&state.native, &descriptor)?;
        let (handle, _) = self.registry.insert(Some(key), TextureState { native, descriptor, device: key });
        tracing::debug!(handle = handle.to_raw(), ?descriptor, "texture created");
        Ok(handle)
    }

    /// Replaces the whole texture contents, blocking until visible to the GPU
    pub fn texture_upload(&mut self, texture: TextureHandle, data: &[u8], width: u32, height: u32, bytes_per_row: u32) -> Result<()> {
        let (_, state) = self.registry.get::<TextureState<B>>(texture)?;
        let device = self.live_device(state.device)?;
        check_texture_transfer(&state.descriptor, data.len(), width, height, bytes_per_row)?;
        self.backend.write_texture(&device.native, &state.native, &state.descriptor, data, bytes_per_row)?;
        Ok(())
    }

    /// Reads the whole texture, blocking until the data is on the CPU
    pub fn texture_download(&self, texture: TextureHandle, out: &mut [u8], width: u32, height: u32, bytes_per_row: u32) -> Result<()> {
        let (_, state) = self.registry.get::<TextureState<B>>(texture)?;
        let device = self.live_device(state.device)?;
        check_texture_transfer(&state.descriptor, out.len(), width, height, bytes_per_row)?;
        self.backend.read_texture(&device.native, &state.native, &state.descriptor, out, bytes_per_row)?;
        Ok(())
    }

    pub fn texture_descriptor(&self, texture: TextureHandle) -> Result<TextureDescriptor> {
        Ok(self.registry.get::<TextureState<B>>(texture)?.1.descriptor)
    }

    pub fn release_texture(&mut self, texture: TextureHandle) -> Result<()> {
        self.registry.release::<TextureState<B>>(texture)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::error::ErrorKind;
    use crate::format::PixelFormat;

    #[test]
    fn test_shared_buffer_round_trips() {
        let (mut bridge, device, _) = testing::bridge();
        let capacity = 8192;
        let buffer = bridge.create_buffer(device, capacity, StorageMode::Shared).unwrap();

        for len in [0, 1, 4096, capacity as usize] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            bridge.buffer_upload(buffer, &data).unwrap();
            let mut out = vec![0u8; len];
            bridge.buffer_download(buffer, &mut out).unwrap();
            assert_eq!(out, data, "length {len}");
        }
    }

    #[test]
    fn test_buffer_size_and_options_validation() {
        let (mut bridge, device, _) = testing::bridge();
        assert_eq!(bridge.create_buffer(device, 0, StorageMode::Shared).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(bridge.create_buffer(device, u64::MAX, StorageMode::Shared).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(bridge.create_buffer_with_options(device, 16, 3 << 4).unwrap_err().kind(), ErrorKind::InvalidArgument);

        let managed = bridge.create_buffer_with_options(device, 16, 1 << 4).unwrap();
        assert_eq!(bridge.buffer_storage_mode(managed).unwrap(), StorageMode::Managed);
        assert_eq!(bridge.buffer_length(managed).unwrap(), 16);
        assert_eq!(bridge.buffer_upload(managed, &[0u8; 17]).unwrap_err().kind(), ErrorKind::SizeMismatch);
        assert_eq!(bridge.buffer_download(managed, &mut [0u8; 17]).unwrap_err().kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_private_buffer_has_no_cpu_access() {
        let (mut bridge, device, _) = testing::bridge();
        let private = bridge.create_buffer(device, 64, StorageMode::Private).unwrap();
        assert_eq!(bridge.buffer_contents(private).unwrap_err().kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(bridge.buffer_upload(private, &[1, 2, 3]).unwrap_err().kind(), ErrorKind::UnsupportedOperation);
        assert_eq!(bridge.buffer_download(private, &mut [0; 3]).unwrap_err().kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_contents_pointer_sees_uploads() {
        let (mut bridge, device, _) = testing::bridge();
        let buffer = bridge.create_buffer(device, 4, StorageMode::Shared).unwrap();
        bridge.buffer_upload(buffer, &[9, 8, 7, 6]).unwrap();

        let contents = bridge.buffer_contents(buffer).unwrap();
        // SAFETY: the buffer is 4 bytes long and alive for the whole block
        let bytes = unsafe { std::slice::from_raw_parts_mut(contents.as_ptr(), 4) };
        assert_eq!(bytes, &[9, 8, 7, 6]);
        bytes[0] = 1;

        let mut out = [0u8; 4];
        bridge.buffer_download(buffer, &mut out).unwrap();
        assert_eq!(out, [1, 8, 7, 6]);
    }

    #[test]
    fn test_released_buffer_is_invalid() {
        let (mut bridge, device, _) = testing::bridge();
        let buffer = bridge.create_buffer(device, 4, StorageMode::Shared).unwrap();
        bridge.release_buffer(buffer).unwrap();
        assert_eq!(bridge.buffer_length(buffer).unwrap_err().kind(), ErrorKind::InvalidHandle);
        assert_eq!(bridge.release_buffer(buffer).unwrap_err().kind(), ErrorKind::InvalidHandle);
    }

    #[test]
    fn test_texture_transfer_with_padded_rows() {
        let (mut bridge, device, _) = testing::bridge();
        let texture = bridge.create_texture(device, TextureDescriptor::new(2, 2)).unwrap();

        // Two RGBA8 rows of 8 bytes, padded to a 12-byte stride; the last row needs no padding
        let data = [1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0, 9, 10, 11, 12, 13, 14, 15, 16];
        bridge.texture_upload(texture, &data, 2, 2, 12).unwrap();

        let mut tight = [0u8; 16];
        bridge.texture_download(texture, &mut tight, 2, 2, 8).unwrap();
        assert_eq!(tight, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
    }

    #[test]
    fn test_texture_transfer_mismatches() {
        let (mut bridge, device, _) = testing::bridge();
        let texture = bridge.create_texture(device, TextureDescriptor::new(4, 4)).unwrap();
        let data = [0u8; 64];

        assert_eq!(bridge.texture_upload(texture, &data, 4, 3, 16).unwrap_err().kind(), ErrorKind::SizeMismatch);
        assert_eq!(bridge.texture_upload(texture, &data, 4, 4, 8).unwrap_err().kind(), ErrorKind::SizeMismatch);
        assert_eq!(bridge.texture_upload(texture, &data[..63], 4, 4, 16).unwrap_err().kind(), ErrorKind::SizeMismatch);
        assert_eq!(bridge.texture_download(texture, &mut [0u8; 16], 4, 4, 16).unwrap_err().kind(), ErrorKind::SizeMismatch);
    }

    #[test]
    fn test_texture_creation_validation() {
        let (mut bridge, device, _) = testing::bridge();
        assert_eq!(bridge.create_texture(device, TextureDescriptor::new(0, 4)).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(bridge.create_texture(device, TextureDescriptor::new(1 << 20, 4)).unwrap_err().kind(), ErrorKind::InvalidArgument);

        let srgb = TextureDescriptor::new(4, 4).with_format(PixelFormat::Bgra8UnormSrgb).writable(true);
        assert_eq!(bridge.create_texture(device, srgb).unwrap_err().kind(), ErrorKind::UnsupportedOperation);

        let storage = TextureDescriptor::new(4, 4).with_format(PixelFormat::Rgba32Float).writable(true);
        let texture = bridge.create_texture(device, storage).unwrap();
        assert_eq!(bridge.texture_descriptor(texture).unwrap(), storage);
    }
}
