//! Handle-based command and resource bridge for tile-based GPUs
//!
//! This crate exposes a Metal-style object model (devices, queues, shader
//! libraries, pipelines, buffers, textures, command buffers and encoders) behind
//! opaque 64-bit handles. Work is recorded into command buffers through
//! encoders, committed to a queue and observed through completion status, the
//! way a tile-based GPU driver is driven.
//!
//! Two backends implement the native side:
//!
//! - [`backend::WgpuBackend`] drives real hardware through wgpu
//! - [`backend::HeadlessBackend`] executes recorded work on the CPU, for
//!   machines without a GPU and for tests
//!
//! ```no_run
//! use tilebridge::backend::WgpuBackend;
//! use tilebridge::{Bridge, StorageMode};
//!
//! let mut bridge = Bridge::new(WgpuBackend::default());
//! let device = bridge.create_default_device()?;
//! let queue = bridge.create_command_queue(device)?;
//! let buffer = bridge.create_buffer(device, 16, StorageMode::Shared)?;
//! let command_buffer = bridge.create_command_buffer(queue)?;
//! # let _ = (buffer, command_buffer);
//! # Ok::<(), tilebridge::BridgeError>(())
//! ```

pub mod backend;
mod bridge;
mod config;
mod error;
mod format;
mod handle;
mod object;
mod recorder;
mod registry;
pub mod shader;

pub use bridge::{Bridge, DeviceInfo, RenderPassDescriptor};
pub use config::{BindingLimits, BridgeConfig};
pub use error::{BridgeError, ErrorKind, Result};
pub use format::{BlendFactor, BlendOperation, BlendState, ClearColor, LoadAction, PixelFormat, PrimitiveType, RenderPipelineDescriptor, StorageMode, StoreAction, TextureDescriptor};
pub use handle::{
    BufferHandle, CommandBufferHandle, CommandQueueHandle, ComputePipelineHandle, DeviceHandle, DrawableHandle, EncoderHandle, FunctionHandle, LibraryHandle, RenderPipelineHandle,
    TextureHandle,
};
pub use recorder::{CommandBufferStatus, EncoderKind};
