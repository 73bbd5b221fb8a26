//! Native layer abstraction
//!
//! The bridge validates handles and lifecycle state itself and only then calls
//! into a [`Backend`]. A backend owns the native object model: devices, queues,
//! shader modules, pipelines, memory, and the execution of recorded passes.
//!
//! Two backends ship with the crate:
//! - [`WgpuBackend`] drives a real GPU through wgpu
//! - [`HeadlessBackend`] is a CPU reference used by tests and GPU-less machines

use crate::format::{ClearColor, LoadAction, PixelFormat, PrimitiveType, RenderPipelineDescriptor, StoreAction, TextureDescriptor};
use crate::shader::{BindingLayout, EntryPoint};
use bytes::Bytes;
use std::fmt;
use thiserror::Error;

mod headless;
mod wgpu_backend;

pub use headless::{
    HeadlessBackend, HeadlessBuffer, HeadlessComputePipeline, HeadlessConfig, HeadlessDevice, HeadlessDrawable, HeadlessQueue, HeadlessRenderPipeline, HeadlessShaderModule,
    HeadlessStats, HeadlessSubmission, HeadlessTexture, KernelFn, KernelInvocation,
};
pub use wgpu_backend::{WgpuBackend, WgpuComputePipeline, WgpuConfig, WgpuDevice, WgpuDrawable, WgpuRenderPipeline, WgpuSubmission};

/// Errors reported by the native layer
#[derive(Debug, Clone, Error)]
pub enum NativeError {
    /// The device was lost or never became usable
    #[error("device lost: {0}")]
    DeviceLost(String),
    /// The native layer rejected the request
    #[error("{0}")]
    Rejected(String),
    /// An allocation could not be satisfied
    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

/// Result type of native calls
pub type NativeResult<T> = Result<T, NativeError>;

/// Kind of physical adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterKind {
    Integrated,
    Discrete,
    Virtual,
    Cpu,
    Other,
}

/// Description of a physical adapter, stable for the lifetime of the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name as reported by the driver
    pub name: String,
    /// Native API the adapter is driven through
    pub api: String,
    /// Adapter kind
    pub kind: AdapterKind,
}

/// Hardware limits the bridge validates against locally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Number of buffer slots in the argument table
    pub max_buffer_slots: u32,
    /// Number of texture slots in the argument table
    pub max_texture_slots: u32,
    /// Largest buffer allocation in bytes
    pub max_buffer_size: u64,
    /// Largest texture width or height
    pub max_texture_dimension: u32,
    /// Largest number of threads in one threadgroup
    pub max_threads_per_threadgroup: u32,
    /// Alignment of blit copy offsets and sizes
    pub copy_alignment: u64,
}

/// A resource bound into an argument-table slot
#[derive(Debug)]
pub enum Binding<B: Backend> {
    /// A buffer bound at a byte offset
    Buffer { slot: u32, buffer: B::Buffer, offset: u64 },
    /// Inline constant data, copied at record time
    Bytes { slot: u32, data: Bytes },
    /// A texture
    Texture { slot: u32, texture: B::Texture },
}

/// A command recorded by a compute encoder
#[derive(Debug)]
pub enum ComputeCommand<B: Backend> {
    SetPipeline(B::ComputePipeline),
    Bind(Binding<B>),
    Dispatch { grid: [u32; 2], group: [u32; 2] },
}

/// A command recorded by a render encoder
#[derive(Debug)]
pub enum RenderCommand<B: Backend> {
    SetPipeline(B::RenderPipeline),
    Bind(Binding<B>),
    Draw { primitive: PrimitiveType, start: u32, count: u32 },
}

/// A command recorded by a blit encoder
#[derive(Debug)]
pub enum BlitCommand<B: Backend> {
    CopyBuffer {
        source: B::Buffer,
        source_offset: u64,
        destination: B::Buffer,
        destination_offset: u64,
        size: u64,
    },
}

/// Color attachment of a render pass
#[derive(Debug)]
pub struct ColorAttachment<B: Backend> {
    pub texture: B::Texture,
    pub format: PixelFormat,
    pub load: LoadAction,
    pub store: StoreAction,
    pub clear_color: ClearColor,
}

/// One encoder's worth of recorded work
#[derive(Debug)]
pub enum Pass<B: Backend> {
    Compute { label: Option<String>, commands: Vec<ComputeCommand<B>> },
    Render { label: Option<String>, target: ColorAttachment<B>, commands: Vec<RenderCommand<B>> },
    Blit { label: Option<String>, commands: Vec<BlitCommand<B>> },
}

/// Native object model driven by the bridge
///
/// Resource types are cheaply cloneable references: a recorded command keeps
/// its own reference, so a resource stays alive while any command buffer that
/// binds it is pending, independently of the caller's handle.
pub trait Backend: fmt::Debug + Sized + 'static {
    type Device: fmt::Debug;
    type Queue: fmt::Debug;
    type ShaderModule: Clone + fmt::Debug;
    type ComputePipeline: Clone + fmt::Debug;
    type RenderPipeline: Clone + fmt::Debug;
    type Buffer: Clone + fmt::Debug;
    type Texture: Clone + fmt::Debug;
    type Drawable: fmt::Debug;
    type Submission: fmt::Debug;

    /// Adapters in index order; never changes after construction
    fn adapters(&self) -> &[AdapterInfo];

    /// Creates a logical device on the adapter at `index`
    fn open_device(&self, index: usize) -> NativeResult<Self::Device>;

    /// Limits of an open device
    fn device_limits(&self, device: &Self::Device) -> DeviceLimits;

    /// Whether the device has been lost since it was opened
    fn is_device_lost(&self, device: &Self::Device) -> bool;

    /// Creates a submission queue on the device
    fn create_queue(&self, device: &Self::Device) -> NativeResult<Self::Queue>;

    /// Hands validated source text to the native compiler
    fn create_shader_module(&self, device: &Self::Device, source: &str) -> NativeResult<Self::ShaderModule>;

    /// Links a compute pipeline from one entry point
    fn create_compute_pipeline(&self, device: &Self::Device, module: &Self::ShaderModule, entry: &EntryPoint, layout: &BindingLayout) -> NativeResult<Self::ComputePipeline>;

    /// Links a render pipeline from a vertex and a fragment entry point
    fn create_render_pipeline(
        &self,
        device: &Self::Device,
        vertex: (&Self::ShaderModule, &EntryPoint),
        fragment: (&Self::ShaderModule, &EntryPoint),
        layout: &BindingLayout,
        descriptor: &RenderPipelineDescriptor,
    ) -> NativeResult<Self::RenderPipeline>;

    /// Allocates a buffer of `size` bytes, zero-initialized
    fn create_buffer(&self, device: &Self::Device, size: u64) -> NativeResult<Self::Buffer>;

    /// Copies `data` into the buffer at `offset` without waiting for the GPU
    ///
    /// The write is ordered before every later submission. `offset` is a multiple
    /// of [`DeviceLimits::copy_alignment`]; bytes between the end of `data` and the
    /// next alignment boundary may be zeroed.
    fn write_buffer(&self, device: &Self::Device, buffer: &Self::Buffer, offset: u64, data: &[u8]) -> NativeResult<()>;

    /// Copies buffer contents at `offset` into `out`, blocking until the data is on the CPU
    fn read_buffer(&self, device: &Self::Device, buffer: &Self::Buffer, offset: u64, out: &mut [u8]) -> NativeResult<()>;

    /// Direct CPU pointer to the buffer memory, when the backend has unified memory
    ///
    /// Returning `None` makes the bridge keep a CPU mirror and synchronize it
    /// around submissions.
    fn buffer_contents(&self, buffer: &Self::Buffer) -> Option<std::ptr::NonNull<u8>>;

    /// Allocates a 2D texture
    fn create_texture(&self, device: &Self::Device, descriptor: &TextureDescriptor) -> NativeResult<Self::Texture>;

    /// Writes the whole texture from rows of `bytes_per_row` bytes
    fn write_texture(&self, device: &Self::Device, texture: &Self::Texture, descriptor: &TextureDescriptor, data: &[u8], bytes_per_row: u32) -> NativeResult<()>;

    /// Reads the whole texture into rows of `bytes_per_row` bytes
    fn read_texture(&self, device: &Self::Device, texture: &Self::Texture, descriptor: &TextureDescriptor, out: &mut [u8], bytes_per_row: u32) -> NativeResult<()>;

    /// Creates a drawable not backed by a window surface
    fn create_offscreen_drawable(&self, device: &Self::Device, descriptor: &TextureDescriptor) -> NativeResult<Self::Drawable>;

    /// Backing texture and its description
    fn drawable_texture(&self, drawable: &Self::Drawable) -> (Self::Texture, TextureDescriptor);

    /// Encodes the passes, submits them, and schedules presentation of `drawables`
    ///
    /// Faults found while encoding or executing are reported through the
    /// returned submission, never through a panic.
    fn submit(&self, device: &Self::Device, queue: &Self::Queue, passes: Vec<Pass<Self>>, drawables: Vec<Self::Drawable>) -> Self::Submission;

    /// Non-blocking completion check: `None` while the GPU is still working
    fn poll(&self, device: &Self::Device, submission: &Self::Submission) -> Option<Result<(), String>>;

    /// Blocks until the submission finished and returns its outcome
    fn wait(&self, device: &Self::Device, submission: &Self::Submission) -> Result<(), String>;
}
