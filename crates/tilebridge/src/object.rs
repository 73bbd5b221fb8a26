//! Registry payloads: the native object behind every handle plus the bookkeeping
//! the bridge validates against

use crate::backend::{AdapterInfo, Backend, DeviceLimits, Pass};
use crate::format::{PixelFormat, RenderPipelineDescriptor, StorageMode, TextureDescriptor};
use crate::handle::{
    BufferHandle, CommandBufferHandle, CommandQueueHandle, ComputePipelineHandle, DeviceHandle, DrawableHandle, EncoderHandle, FunctionHandle, LibraryHandle, ObjectKey,
    RawHandle, RenderPipelineHandle, TextureHandle,
};
use crate::recorder::{EncoderKind, Phase};
use crate::shader::{BindingLayout, EntryPoint, ShaderLibrary};
use std::collections::BTreeSet;
use std::sync::Arc;

pub(crate) struct DeviceState<B: Backend> {
    pub native: B::Device,
    pub index: usize,
    pub info: AdapterInfo,
    /// Device limits with the configured binding limits applied
    pub limits: DeviceLimits,
}

pub(crate) struct QueueState<B: Backend> {
    pub native: B::Queue,
    pub device: ObjectKey,
}

pub(crate) struct LibraryState<B: Backend> {
    pub module: B::ShaderModule,
    pub library: Arc<ShaderLibrary>,
    pub device: ObjectKey,
}

pub(crate) struct FunctionState<B: Backend> {
    pub module: B::ShaderModule,
    pub entry: Arc<EntryPoint>,
    pub device: ObjectKey,
}

pub(crate) struct ComputePipelineState<B: Backend> {
    pub native: B::ComputePipeline,
    pub layout: Arc<BindingLayout>,
    pub device: ObjectKey,
}

pub(crate) struct RenderPipelineState<B: Backend> {
    pub native: B::RenderPipeline,
    pub layout: Arc<BindingLayout>,
    pub descriptor: RenderPipelineDescriptor,
    pub device: ObjectKey,
}

pub(crate) struct BufferState<B: Backend> {
    pub native: B::Buffer,
    pub length: u64,
    pub storage: StorageMode,
    /// CPU copy of the contents when the backend has no unified memory
    pub mirror: Option<Box<[u8]>>,
    /// The mirror may hold host writes the GPU copy has not seen yet
    pub mirror_dirty: bool,
    pub device: ObjectKey,
}

pub(crate) struct TextureState<B: Backend> {
    pub native: B::Texture,
    pub descriptor: TextureDescriptor,
    pub device: ObjectKey,
}

pub(crate) struct DrawableState<B: Backend> {
    /// Taken when the presenting command buffer commits
    pub native: Option<B::Drawable>,
    pub texture: ObjectKey,
    /// Command buffer the drawable is scheduled on
    pub presenter: Option<ObjectKey>,
    pub device: ObjectKey,
}

pub(crate) struct CommandBufferState<B: Backend> {
    pub queue: ObjectKey,
    pub device: ObjectKey,
    pub phase: Phase,
    pub passes: Vec<Pass<B>>,
    pub presents: Vec<ObjectKey>,
    /// Mirrored buffers the recorded work reads or writes
    pub mirrored: BTreeSet<ObjectKey>,
    pub submission: Option<B::Submission>,
    /// GPU fault text of a failed buffer
    pub error: Option<String>,
    pub encoders: u32,
}

pub(crate) struct EncoderState<B: Backend> {
    pub kind: EncoderKind,
    pub command_buffer: ObjectKey,
    /// Work recorded so far; `None` once the encoder has ended
    pub pass: Option<Pass<B>>,
    pub bound_buffers: BTreeSet<u32>,
    pub bound_textures: BTreeSet<u32>,
    /// Slots the current pipeline reads
    pub layout: Option<Arc<BindingLayout>>,
    /// Format of the render attachment
    pub attachment: Option<PixelFormat>,
}

/// Typed view of one registry payload kind
pub(crate) trait Kind<B: Backend>: Sized {
    type Handle: RawHandle;

    fn project(object: &Object<B>) -> Option<&Self>;

    fn project_mut(object: &mut Object<B>) -> Option<&mut Self>;

    fn wrap(self) -> Object<B>;
}

macro_rules! object_kinds {
    ($($variant:ident($state:ident) => $handle:ident;)*) => {
        pub(crate) enum Object<B: Backend> {
            $($variant($state<B>),)*
        }

        $(
            impl<B: Backend> Kind<B> for $state<B> {
                type Handle = $handle;

                fn project(object: &Object<B>) -> Option<&Self> {
                    match object {
                        Object::$variant(state) => Some(state),
                        _ => None,
                    }
                }

                fn project_mut(object: &mut Object<B>) -> Option<&mut Self> {
                    match object {
                        Object::$variant(state) => Some(state),
                        _ => None,
                    }
                }

                fn wrap(self) -> Object<B> {
                    Object::$variant(self)
                }
            }
        )*
    };
}

object_kinds! {
    Device(DeviceState) => DeviceHandle;
    Queue(QueueState) => CommandQueueHandle;
    Library(LibraryState) => LibraryHandle;
    Function(FunctionState) => FunctionHandle;
    ComputePipeline(ComputePipelineState) => ComputePipelineHandle;
    RenderPipeline(RenderPipelineState) => RenderPipelineHandle;
    Buffer(BufferState) => BufferHandle;
    Texture(TextureState) => TextureHandle;
    Drawable(DrawableState) => DrawableHandle;
    CommandBuffer(CommandBufferState) => CommandBufferHandle;
    Encoder(EncoderState) => EncoderHandle;
}
