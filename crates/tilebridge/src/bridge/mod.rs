//! The handle-based bridge surface
//!
//! [`Bridge`] owns the handle registry and a [`Backend`]. Every operation first
//! resolves its handles, checks the lifecycle state of the objects involved and
//! the health of the owning device, and only then calls into the backend. The
//! operations are split by component:
//!
//! - `device`: availability, adapter enumeration, devices and queues
//! - `resources`: buffers and textures
//! - `pipelines`: shader libraries, functions, compute and render pipelines
//! - `commands`: command buffers and encoders
//! - `submission`: commit, completion, drawables

use crate::backend::{Backend, NativeError};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::handle::ObjectKey;
use crate::object::DeviceState;
use crate::registry::Registry;
use std::fmt;

mod commands;
mod device;
mod pipelines;
mod resources;
mod submission;

pub use commands::RenderPassDescriptor;
pub use device::DeviceInfo;

impl From<NativeError> for BridgeError {
    fn from(error: NativeError) -> Self {
        match error {
            NativeError::DeviceLost(message) => Self::DeviceUnavailable(message),
            NativeError::Rejected(message) | NativeError::OutOfMemory(message) => Self::InvalidArgument(message),
        }
    }
}

/// Handle-based command and resource bridge over a native backend
///
/// The bridge is single-threaded by contract: every operation takes `&mut self`
/// or `&self` and none of them spawn work. Blocking is limited to the explicit
/// transfer and wait operations.
pub struct Bridge<B: Backend> {
    backend: B,
    config: BridgeConfig,
    registry: Registry<B>,
}

impl<B: Backend> Bridge<B> {
    /// Creates a bridge with the default configuration
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, BridgeConfig::default())
    }

    /// Creates a bridge with an explicit configuration
    pub fn with_config(backend: B, config: BridgeConfig) -> Self {
        Self {
            backend,
            config,
            registry: Registry::default(),
        }
    }

    /// The native backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Number of handles currently valid
    pub fn live_handles(&self) -> usize {
        self.registry.len()
    }

    /// Owning device of an object, failing once the device was lost
    fn live_device(&self, device: ObjectKey) -> Result<&DeviceState<B>> {
        let state = self
            .registry
            .by_key::<DeviceState<B>>(device)
            .ok_or_else(|| BridgeError::DeviceUnavailable("device was released".to_string()))?;
        if self.backend.is_device_lost(&state.native) {
            return Err(BridgeError::DeviceUnavailable(format!("device `{}` was lost", state.info.name)));
        }
        Ok(state)
    }

    fn label(&self, make: impl FnOnce() -> String) -> Option<String> {
        self.config.labels.then(make)
    }
}

impl<B: Backend> fmt::Debug for Bridge<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("backend", &self.backend)
            .field("config", &self.config)
            .field("live_handles", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::backend::{HeadlessBackend, HeadlessConfig};
    use crate::handle::{CommandQueueHandle, DeviceHandle};

    /// Adds one to every byte of a buffer, one 32-bit word per thread
    pub const ADD_ONE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(16)
fn add_one(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + 0x01010101u;
    }
}
"#;

    /// Full-screen quad filled with a uniform color
    pub const QUAD: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;

@vertex
fn vs(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32(index & 1u) * 2.0 - 1.0;
    let y = f32(index >> 1u) * 2.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
    return tint;
}
"#;

    /// Headless backend running `add_one` on the CPU
    pub fn headless() -> HeadlessBackend {
        headless_with(HeadlessConfig::default())
    }

    /// [`headless`] with a custom configuration
    pub fn headless_with(config: HeadlessConfig) -> HeadlessBackend {
        HeadlessBackend::new(config).with_kernel("add_one", |invocation| {
            let grid = invocation.grid[0] as usize;
            let data = invocation.buffer_mut(0).ok_or("buffer slot 0 is unbound")?;
            for word in data.chunks_exact_mut(4).take(grid) {
                let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]).wrapping_add(0x0101_0101);
                word.copy_from_slice(&value.to_le_bytes());
            }
            Ok(())
        })
    }

    /// Bridge over the headless backend with one device and one queue
    pub fn bridge() -> (Bridge<HeadlessBackend>, DeviceHandle, CommandQueueHandle) {
        let mut bridge = Bridge::new(headless());
        let device = bridge.create_default_device().unwrap();
        let queue = bridge.create_command_queue(device).unwrap();
        (bridge, device, queue)
    }

    /// Like [`bridge`], but buffers are not CPU-addressable so the bridge keeps mirrors
    pub fn mirrored_bridge() -> (Bridge<HeadlessBackend>, DeviceHandle, CommandQueueHandle) {
        let config = HeadlessConfig {
            unified_memory: false,
            ..Default::default()
        };
        let mut bridge = Bridge::new(headless_with(config));
        let device = bridge.create_default_device().unwrap();
        let queue = bridge.create_command_queue(device).unwrap();
        (bridge, device, queue)
    }
}
