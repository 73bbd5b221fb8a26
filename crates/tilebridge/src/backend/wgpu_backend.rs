//! wgpu implementation of the native contract
//!
//! The argument-table model is mapped onto bind groups with the slot convention
//! documented in [`crate::shader`]. Pipelines use automatically derived layouts;
//! bind groups are built per dispatch or draw from the slots bound at that point.
//!
//! Metal selects the primitive topology per draw call while wgpu fixes it in the
//! pipeline, so a render pipeline is linked once for every topology.

use super::{
    AdapterInfo, AdapterKind, Backend, Binding, BlitCommand, ColorAttachment, ComputeCommand, DeviceLimits, NativeError, NativeResult, Pass, RenderCommand,
};
use crate::format::{BlendFactor, BlendOperation, BlendState, LoadAction, PixelFormat, PrimitiveType, RenderPipelineDescriptor, StoreAction, TextureDescriptor};
use crate::shader::{BUFFER_GROUP, BindingLayout, EntryPoint, TEXTURE_GROUP};
use bytes::Bytes;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use wgpu::util::DeviceExt;

/// Highest argument-table slot count exposed, matching the native API's buffer table
const MAX_TABLE_SLOTS: u32 = 31;

/// Inline constant buffers are padded to the uniform alignment
const INLINE_BYTES_ALIGNMENT: usize = 16;

/// Texture usage flags for every bridge texture
const TEXTURE_USAGE: wgpu::TextureUsages = wgpu::TextureUsages::TEXTURE_BINDING
    .union(wgpu::TextureUsages::COPY_SRC)
    .union(wgpu::TextureUsages::COPY_DST)
    .union(wgpu::TextureUsages::RENDER_ATTACHMENT);

/// Buffer usage flags for every bridge buffer
const BUFFER_USAGE: wgpu::BufferUsages = wgpu::BufferUsages::STORAGE
    .union(wgpu::BufferUsages::UNIFORM)
    .union(wgpu::BufferUsages::COPY_SRC)
    .union(wgpu::BufferUsages::COPY_DST);

/// Adapter selection for [`WgpuBackend`]
#[derive(Debug, Clone)]
pub struct WgpuConfig {
    /// Native APIs to enumerate adapters from
    pub backends: wgpu::Backends,
    /// Adapters matching this preference are enumerated first
    pub power_preference: wgpu::PowerPreference,
    /// Only expose software adapters
    pub force_fallback_adapter: bool,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::PRIMARY,
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

impl WgpuConfig {
    /// Default configuration overridden by `WGPU_BACKEND` and `WGPU_POWER_PREF`
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            backends: wgpu::Backends::from_env().unwrap_or(default.backends),
            power_preference: wgpu::PowerPreference::from_env().unwrap_or(default.power_preference),
            force_fallback_adapter: default.force_fallback_adapter,
        }
    }
}

/// A logical wgpu device with the state the bridge needs alongside it
#[derive(Debug)]
pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    sampler: wgpu::Sampler,
    limits: DeviceLimits,
    lost: Arc<AtomicBool>,
}

/// Compute pipeline together with the slots it reads
#[derive(Debug, Clone)]
pub struct WgpuComputePipeline {
    pipeline: wgpu::ComputePipeline,
    layout: Arc<BindingLayout>,
    workgroup_size: [u32; 3],
}

/// Render pipeline linked for every primitive topology
#[derive(Debug, Clone)]
pub struct WgpuRenderPipeline {
    variants: Arc<[wgpu::RenderPipeline]>,
    layout: Arc<BindingLayout>,
}

/// A presentable texture
#[derive(Debug)]
pub enum WgpuDrawable {
    /// Frame acquired from a window surface
    Surface { frame: wgpu::SurfaceTexture, format: PixelFormat },
    /// Texture not shown on screen
    Offscreen { texture: wgpu::Texture, descriptor: TextureDescriptor },
}

impl WgpuDrawable {
    /// Wraps a surface frame acquired by the windowing layer
    ///
    /// # Returns
    /// `None` when the surface format has no bridge pixel format
    pub fn from_surface_texture(frame: wgpu::SurfaceTexture) -> Option<Self> {
        let format = pixel_format_of(frame.texture.format())?;
        Some(Self::Surface { frame, format })
    }
}

/// Handle to in-flight GPU work
#[derive(Debug)]
pub struct WgpuSubmission {
    index: Option<wgpu::SubmissionIndex>,
    done: Arc<AtomicBool>,
    fault: Option<String>,
}

/// Native backend driving a GPU through wgpu
#[derive(Debug)]
pub struct WgpuBackend {
    instance: wgpu::Instance,
    adapters: Vec<wgpu::Adapter>,
    infos: Vec<AdapterInfo>,
}

impl Default for WgpuBackend {
    fn default() -> Self {
        Self::new(WgpuConfig::from_env())
    }
}

impl WgpuBackend {
    /// Enumerates adapters once; the order is stable for the lifetime of the backend
    pub fn new(config: WgpuConfig) -> Self {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let mut adapters: Vec<wgpu::Adapter> = instance
            .enumerate_adapters(config.backends)
            .into_iter()
            .filter(|adapter| !config.force_fallback_adapter || adapter.get_info().device_type == wgpu::DeviceType::Cpu)
            .collect();
        adapters.sort_by_key(|adapter| preference_rank(config.power_preference, adapter.get_info().device_type));

        let infos = adapters
            .iter()
            .map(|adapter| {
                let info = adapter.get_info();
                AdapterInfo {
                    name: info.name,
                    api: format!("{:?}", info.backend),
                    kind: match info.device_type {
                        wgpu::DeviceType::IntegratedGpu => AdapterKind::Integrated,
                        wgpu::DeviceType::DiscreteGpu => AdapterKind::Discrete,
                        wgpu::DeviceType::VirtualGpu => AdapterKind::Virtual,
                        wgpu::DeviceType::Cpu => AdapterKind::Cpu,
                        wgpu::DeviceType::Other => AdapterKind::Other,
                    },
                }
            })
            .collect();
        tracing::debug!(?infos, "wgpu adapters enumerated");

        Self { instance, adapters, infos }
    }

    /// Whether at least one adapter was found
    pub fn is_available(&self) -> bool {
        !self.adapters.is_empty()
    }

    /// The instance, for creating window surfaces that supply drawables
    pub fn instance(&self) -> &wgpu::Instance {
        &self.instance
    }

    fn encode(&self, device: &WgpuDevice, passes: Vec<Pass<Self>>) -> Result<wgpu::CommandBuffer, String> {
        let mut encoder = device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("tilebridge command buffer"),
        });

        for pass in passes {
            match pass {
                Pass::Compute { label, commands } => encode_compute(device, &mut encoder, label.as_deref(), commands)?,
                Pass::Render { label, target, commands } => encode_render(device, &mut encoder, label.as_deref(), target, commands)?,
                Pass::Blit { commands, .. } => {
                    for command in commands {
                        let BlitCommand::CopyBuffer {
                            source,
                            source_offset,
                            destination,
                            destination_offset,
                            size,
                        } = command;
                        encoder.copy_buffer_to_buffer(&source, source_offset, &destination, destination_offset, size);
                    }
                }
            }
        }

        Ok(encoder.finish())
    }
}

/// Sort key placing adapters matching the preference first
fn preference_rank(preference: wgpu::PowerPreference, device_type: wgpu::DeviceType) -> u8 {
    match (preference, device_type) {
        (wgpu::PowerPreference::HighPerformance, wgpu::DeviceType::DiscreteGpu) => 0,
        (wgpu::PowerPreference::LowPower, wgpu::DeviceType::IntegratedGpu) => 0,
        (_, wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu) => 1,
        (_, wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other) => 2,
        (_, wgpu::DeviceType::Cpu) => 3,
    }
}

/// Runs `op` inside validation and out-of-memory error scopes
fn capture<T>(device: &wgpu::Device, op: impl FnOnce() -> T) -> NativeResult<T> {
    device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = op();
    let validation = pollster::block_on(device.pop_error_scope());
    let memory = pollster::block_on(device.pop_error_scope());

    if let Some(error) = memory {
        return Err(NativeError::OutOfMemory(error.to_string()));
    }
    if let Some(error) = validation {
        return Err(NativeError::Rejected(error.to_string()));
    }
    Ok(value)
}

/// Blocks until every queued operation on the device has finished
fn flush(device: &WgpuDevice) -> NativeResult<()> {
    device.queue.submit(std::iter::empty());
    device.device.poll(wgpu::PollType::Wait).map_err(|e| NativeError::Rejected(e.to_string()))?;
    Ok(())
}

/// Maps a staging buffer for reading and blocks until it is mapped
fn map_read(device: &WgpuDevice, staging: &wgpu::Buffer) -> NativeResult<()> {
    let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
    staging.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    device.device.poll(wgpu::PollType::Wait).map_err(|e| NativeError::Rejected(e.to_string()))?;
    pollster::block_on(receiver.receive())
        .ok_or_else(|| NativeError::DeviceLost("buffer mapping was abandoned".to_string()))?
        .map_err(|e| NativeError::Rejected(e.to_string()))
}

fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("tilebridge implicit sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Nearest,
        lod_min_clamp: 0.0,
        lod_max_clamp: 0.0,
        compare: None,
        anisotropy_clamp: 1,
        border_color: None,
    })
}

fn extent(descriptor: &TextureDescriptor) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: descriptor.width,
        height: descriptor.height,
        depth_or_array_layers: 1,
    }
}

fn texture_format(format: PixelFormat) -> wgpu::TextureFormat {
    match format {
        PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
    }
}

fn pixel_format_of(format: wgpu::TextureFormat) -> Option<PixelFormat> {
    Some(match format {
        wgpu::TextureFormat::R8Unorm => PixelFormat::R8Unorm,
        wgpu::TextureFormat::R32Float => PixelFormat::R32Float,
        wgpu::TextureFormat::Rgba8Unorm => PixelFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => PixelFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => PixelFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => PixelFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rg32Float => PixelFormat::Rg32Float,
        wgpu::TextureFormat::Rgba16Float => PixelFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba32Float => PixelFormat::Rgba32Float,
        _ => return None,
    })
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SourceColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSourceColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SourceAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSourceAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DestinationColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDestinationColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DestinationAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDestinationAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_operation(operation: BlendOperation) -> wgpu::BlendOperation {
    match operation {
        BlendOperation::Add => wgpu::BlendOperation::Add,
        BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
        BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOperation::Min => wgpu::BlendOperation::Min,
        BlendOperation::Max => wgpu::BlendOperation::Max,
    }
}

fn blend_state(blend: BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: blend_factor(blend.rgb_source_factor),
            dst_factor: blend_factor(blend.rgb_destination_factor),
            operation: blend_operation(blend.rgb_operation),
        },
        alpha: wgpu::BlendComponent {
            src_factor: blend_factor(blend.alpha_source_factor),
            dst_factor: blend_factor(blend.alpha_destination_factor),
            operation: blend_operation(blend.alpha_operation),
        },
    }
}

fn topology(primitive: PrimitiveType) -> wgpu::PrimitiveTopology {
    match primitive {
        PrimitiveType::Point => wgpu::PrimitiveTopology::PointList,
        PrimitiveType::Line => wgpu::PrimitiveTopology::LineList,
        PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveType::Triangle => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

/// Resources bound to argument-table slots while encoding one pass
#[derive(Default)]
struct ArgumentTable {
    buffers: BTreeMap<u32, (wgpu::Buffer, u64)>,
    textures: BTreeMap<u32, wgpu::Texture>,
}

impl ArgumentTable {
    fn bind(&mut self, device: &WgpuDevice, binding: Binding<WgpuBackend>) {
        match binding {
            Binding::Buffer { slot, buffer, offset } => {
                self.buffers.insert(slot, (buffer, offset));
            }
            Binding::Bytes { slot, data } => {
                self.buffers.insert(slot, (inline_buffer(device, &data), 0));
            }
            Binding::Texture { slot, texture } => {
                self.textures.insert(slot, texture);
            }
        }
    }

    /// Builds one bind group per group index the layout spans
    ///
    /// # Arguments
    /// * `device` - Device owning the implicit sampler
    /// * `layout` - Slots the pipeline reads
    /// * `group_layout` - Bind group layout of the pipeline for a group index
    fn bind_groups(&self, device: &WgpuDevice, layout: &BindingLayout, group_layout: impl Fn(u32) -> wgpu::BindGroupLayout) -> Result<Vec<wgpu::BindGroup>, String> {
        let views: BTreeMap<u32, wgpu::TextureView> = layout
            .texture_slots()
            .filter_map(|slot| self.textures.get(&slot).map(|texture| (slot, texture.create_view(&wgpu::TextureViewDescriptor::default()))))
            .collect();

        let Some(last_group) = layout.bindings.iter().map(|binding| binding.group).max() else {
            return Ok(Vec::new());
        };

        let mut groups = Vec::with_capacity(last_group as usize + 1);
        for group in 0..=last_group {
            let mut entries = Vec::new();
            for binding in layout.bindings.iter().filter(|binding| binding.group == group) {
                let resource = match binding.group {
                    BUFFER_GROUP => {
                        let (buffer, offset) = self.buffers.get(&binding.binding).ok_or_else(|| format!("buffer slot {} is unbound", binding.binding))?;
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding { buffer, offset: *offset, size: None })
                    }
                    TEXTURE_GROUP => wgpu::BindingResource::TextureView(views.get(&binding.binding).ok_or_else(|| format!("texture slot {} is unbound", binding.binding))?),
                    _ => wgpu::BindingResource::Sampler(&device.sampler),
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: binding.binding,
                    resource,
                });
            }

            groups.push(device.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &group_layout(group),
                entries: &entries,
            }));
        }
        Ok(groups)
    }
}

/// Uploads inline constant data into a dedicated small buffer
fn inline_buffer(device: &WgpuDevice, data: &Bytes) -> wgpu::Buffer {
    let mut contents = data.to_vec();
    contents.resize(contents.len().next_multiple_of(INLINE_BYTES_ALIGNMENT), 0);
    device.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("tilebridge inline bytes"),
        contents: &contents,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
    })
}

fn encode_compute(device: &WgpuDevice, encoder: &mut wgpu::CommandEncoder, label: Option<&str>, commands: Vec<ComputeCommand<WgpuBackend>>) -> Result<(), String> {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor { label, timestamp_writes: None });
    let mut table = ArgumentTable::default();
    let mut pipeline: Option<WgpuComputePipeline> = None;

    for command in commands {
        match command {
            ComputeCommand::SetPipeline(next) => {
                pass.set_pipeline(&next.pipeline);
                pipeline = Some(next);
            }
            ComputeCommand::Bind(binding) => table.bind(device, binding),
            ComputeCommand::Dispatch { grid, group } => {
                let pipeline = pipeline.as_ref().ok_or("dispatch without a compute pipeline")?;
                let threads = u64::from(group[0]) * u64::from(group[1]);
                if threads > u64::from(device.limits.max_threads_per_threadgroup) {
                    return Err(format!(
                        "threadgroup of {}x{} threads exceeds the device limit of {}",
                        group[0], group[1], device.limits.max_threads_per_threadgroup
                    ));
                }

                let bind_groups = table.bind_groups(device, &pipeline.layout, |index| pipeline.pipeline.get_bind_group_layout(index))?;
                for (index, bind_group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, bind_group, &[]);
                }

                // The grid is given in threads; the workgroup size is fixed by the shader
                let [width, height, _] = pipeline.workgroup_size;
                pass.dispatch_workgroups(grid[0].div_ceil(width.max(1)), grid[1].div_ceil(height.max(1)), 1);
            }
        }
    }
    Ok(())
}

fn encode_render(
    device: &WgpuDevice,
    encoder: &mut wgpu::CommandEncoder,
    label: Option<&str>,
    target: ColorAttachment<WgpuBackend>,
    commands: Vec<RenderCommand<WgpuBackend>>,
) -> Result<(), String> {
    let view = target.texture.create_view(&wgpu::TextureViewDescriptor::default());
    let color = target.clear_color;
    let load = match target.load {
        LoadAction::Clear => wgpu::LoadOp::Clear(wgpu::Color {
            r: color.red,
            g: color.green,
            b: color.blue,
            a: color.alpha,
        }),
        LoadAction::Load | LoadAction::DontCare => wgpu::LoadOp::Load,
    };
    let store = match target.store {
        StoreAction::Store => wgpu::StoreOp::Store,
        StoreAction::DontCare => wgpu::StoreOp::Discard,
    };

    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label,
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &view,
            resolve_target: None,
            ops: wgpu::Operations { load, store },
        })],
        ..Default::default()
    });
    let mut table = ArgumentTable::default();
    let mut pipeline: Option<WgpuRenderPipeline> = None;

    for command in commands {
        match command {
            RenderCommand::SetPipeline(next) => pipeline = Some(next),
            RenderCommand::Bind(binding) => table.bind(device, binding),
            RenderCommand::Draw { primitive, start, count } => {
                let pipeline = pipeline.as_ref().ok_or("draw without a render pipeline")?;
                let variant = &pipeline.variants[primitive as usize];
                pass.set_pipeline(variant);

                // Derived layouts are only compatible with the pipeline they came from
                let bind_groups = table.bind_groups(device, &pipeline.layout, |index| variant.get_bind_group_layout(index))?;
                for (index, bind_group) in bind_groups.iter().enumerate() {
                    pass.set_bind_group(index as u32, bind_group, &[]);
                }
                pass.draw(start..start + count, 0..1);
            }
        }
    }
    Ok(())
}

impl Backend for WgpuBackend {
    type Device = WgpuDevice;
    type Queue = wgpu::Queue;
    type ShaderModule = wgpu::ShaderModule;
    type ComputePipeline = WgpuComputePipeline;
    type RenderPipeline = WgpuRenderPipeline;
    type Buffer = wgpu::Buffer;
    type Texture = wgpu::Texture;
    type Drawable = WgpuDrawable;
    type Submission = WgpuSubmission;

    fn adapters(&self) -> &[AdapterInfo] {
        &self.infos
    }

    fn open_device(&self, index: usize) -> NativeResult<WgpuDevice> {
        let adapter = self.adapters.get(index).ok_or_else(|| NativeError::DeviceLost(format!("no wgpu adapter at index {index}")))?;

        // Float32 filtering is optional; request it when the adapter has it
        let required_features = adapter.features() & wgpu::Features::FLOAT32_FILTERABLE;
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("tilebridge device"),
            required_features,
            required_limits: adapter.limits(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: Default::default(),
        }))
        .map_err(|e| NativeError::DeviceLost(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            tracing::error!(%error, "uncaptured wgpu error");
        }));
        let lost = Arc::new(AtomicBool::new(false));
        let flag = lost.clone();
        device.set_device_lost_callback(move |reason, message| {
            flag.store(true, Ordering::SeqCst);
            tracing::warn!(?reason, %message, "wgpu device lost");
        });

        let native = device.limits();
        let limits = DeviceLimits {
            max_buffer_slots: MAX_TABLE_SLOTS.min(native.max_bindings_per_bind_group),
            max_texture_slots: MAX_TABLE_SLOTS.min(native.max_bindings_per_bind_group),
            max_buffer_size: native.max_buffer_size,
            max_texture_dimension: native.max_texture_dimension_2d,
            max_threads_per_threadgroup: native.max_compute_invocations_per_workgroup,
            copy_alignment: wgpu::COPY_BUFFER_ALIGNMENT,
        };

        Ok(WgpuDevice {
            sampler: create_sampler(&device),
            device,
            queue,
            limits,
            lost,
        })
    }

    fn device_limits(&self, device: &WgpuDevice) -> DeviceLimits {
        device.limits
    }

    fn is_device_lost(&self, device: &WgpuDevice) -> bool {
        device.lost.load(Ordering::SeqCst)
    }

    fn create_queue(&self, device: &WgpuDevice) -> NativeResult<wgpu::Queue> {
        // wgpu exposes one queue per device; every bridge queue submits to it
        Ok(device.queue.clone())
    }

    fn create_shader_module(&self, device: &WgpuDevice, source: &str) -> NativeResult<wgpu::ShaderModule> {
        capture(&device.device, || {
            device.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: None,
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source)),
            })
        })
    }

    fn create_compute_pipeline(&self, device: &WgpuDevice, module: &wgpu::ShaderModule, entry: &EntryPoint, layout: &BindingLayout) -> NativeResult<WgpuComputePipeline> {
        let pipeline = capture(&device.device, || {
            device.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry.name.as_str()),
                layout: None,
                module,
                entry_point: Some(entry.name.as_str()),
                compilation_options: Default::default(),
                cache: None,
            })
        })?;

        Ok(WgpuComputePipeline {
            pipeline,
            layout: Arc::new(layout.clone()),
            workgroup_size: entry.workgroup_size,
        })
    }

    fn create_render_pipeline(
        &self,
        device: &WgpuDevice,
        vertex: (&wgpu::ShaderModule, &EntryPoint),
        fragment: (&wgpu::ShaderModule, &EntryPoint),
        layout: &BindingLayout,
        descriptor: &RenderPipelineDescriptor,
    ) -> NativeResult<WgpuRenderPipeline> {
        let targets = [Some(wgpu::ColorTargetState {
            format: texture_format(descriptor.pixel_format),
            blend: descriptor.effective_blend().map(blend_state),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let variants = PrimitiveType::ALL
            .iter()
            .map(|&primitive| {
                capture(&device.device, || {
                    device.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(fragment.1.name.as_str()),
                        layout: None,
                        cache: None,
                        vertex: wgpu::VertexState {
                            module: vertex.0,
                            buffers: &[],
                            compilation_options: Default::default(),
                            entry_point: Some(vertex.1.name.as_str()),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: fragment.0,
                            targets: &targets,
                            compilation_options: Default::default(),
                            entry_point: Some(fragment.1.name.as_str()),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: topology(primitive),
                            strip_index_format: None,
                            cull_mode: None,
                            front_face: wgpu::FrontFace::Ccw,
                            polygon_mode: wgpu::PolygonMode::Fill,
                            conservative: false,
                            unclipped_depth: false,
                        },
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        depth_stencil: None,
                    })
                })
            })
            .collect::<NativeResult<Vec<_>>>()?;

        Ok(WgpuRenderPipeline {
            variants: variants.into(),
            layout: Arc::new(layout.clone()),
        })
    }

    fn create_buffer(&self, device: &WgpuDevice, size: u64) -> NativeResult<wgpu::Buffer> {
        capture(&device.device, || {
            device.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("tilebridge buffer"),
                size: size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
                usage: BUFFER_USAGE,
                mapped_at_creation: false,
            })
        })
    }

    fn write_buffer(&self, device: &WgpuDevice, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) -> NativeResult<()> {
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(NativeError::Rejected(format!("buffer write offset {offset} is not a multiple of {}", wgpu::COPY_BUFFER_ALIGNMENT)));
        }
        let padded_len = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT) as usize;

        // Staged by the queue and applied before the next submission
        capture(&device.device, || {
            if padded_len == data.len() {
                device.queue.write_buffer(buffer, offset, data);
            } else {
                let mut padded = data.to_vec();
                padded.resize(padded_len, 0);
                device.queue.write_buffer(buffer, offset, &padded);
            }
        })
    }

    fn read_buffer(&self, device: &WgpuDevice, buffer: &wgpu::Buffer, offset: u64, out: &mut [u8]) -> NativeResult<()> {
        let aligned_start = offset - offset % wgpu::COPY_BUFFER_ALIGNMENT;
        let aligned_end = (offset + out.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let size = aligned_end - aligned_start;

        let staging = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tilebridge readback"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback encoder") });
        encoder.copy_buffer_to_buffer(buffer, aligned_start, &staging, 0, size);
        device.queue.submit(std::iter::once(encoder.finish()));

        map_read(device, &staging)?;
        let at = (offset - aligned_start) as usize;
        out.copy_from_slice(&staging.slice(..).get_mapped_range()[at..at + out.len()]);
        staging.unmap();
        Ok(())
    }

    fn buffer_contents(&self, _buffer: &wgpu::Buffer) -> Option<NonNull<u8>> {
        None
    }

    fn create_texture(&self, device: &WgpuDevice, descriptor: &TextureDescriptor) -> NativeResult<wgpu::Texture> {
        let usage = if descriptor.writable {
            TEXTURE_USAGE | wgpu::TextureUsages::STORAGE_BINDING
        } else {
            TEXTURE_USAGE
        };
        capture(&device.device, || {
            device.device.create_texture(&wgpu::TextureDescriptor {
                label: Some("tilebridge texture"),
                size: extent(descriptor),
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format(descriptor.format),
                usage,
                view_formats: &[],
            })
        })
    }

    fn write_texture(&self, device: &WgpuDevice, texture: &wgpu::Texture, descriptor: &TextureDescriptor, data: &[u8], bytes_per_row: u32) -> NativeResult<()> {
        capture(&device.device, || {
            device.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(descriptor.height),
                },
                extent(descriptor),
            );
        })?;
        flush(device)
    }

    fn read_texture(&self, device: &WgpuDevice, texture: &wgpu::Texture, descriptor: &TextureDescriptor, out: &mut [u8], bytes_per_row: u32) -> NativeResult<()> {
        let row = descriptor.row_bytes();
        // Texture-to-buffer copies need rows aligned to 256 bytes
        let padded_row = row.next_multiple_of(u64::from(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT));

        let staging = device.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("tilebridge texture readback"),
            size: padded_row * u64::from(descriptor.height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = device.device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("texture readback encoder") });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row as u32),
                    rows_per_image: Some(descriptor.height),
                },
            },
            extent(descriptor),
        );
        device.queue.submit(std::iter::once(encoder.finish()));

        map_read(device, &staging)?;
        {
            let mapped = staging.slice(..).get_mapped_range();
            let row = row as usize;
            for (y, source) in mapped.chunks_exact(padded_row as usize).enumerate() {
                let at = y * bytes_per_row as usize;
                out[at..at + row].copy_from_slice(&source[..row]);
            }
        }
        staging.unmap();
        Ok(())
    }

    fn create_offscreen_drawable(&self, device: &WgpuDevice, descriptor: &TextureDescriptor) -> NativeResult<WgpuDrawable> {
        Ok(WgpuDrawable::Offscreen {
            texture: self.create_texture(device, descriptor)?,
            descriptor: *descriptor,
        })
    }

    fn drawable_texture(&self, drawable: &WgpuDrawable) -> (wgpu::Texture, TextureDescriptor) {
        match drawable {
            WgpuDrawable::Surface { frame, format } => {
                let size = frame.texture.size();
                (frame.texture.clone(), TextureDescriptor::new(size.width, size.height).with_format(*format))
            }
            WgpuDrawable::Offscreen { texture, descriptor } => (texture.clone(), *descriptor),
        }
    }

    fn submit(&self, device: &WgpuDevice, queue: &wgpu::Queue, passes: Vec<Pass<Self>>, drawables: Vec<WgpuDrawable>) -> WgpuSubmission {
        let done = Arc::new(AtomicBool::new(false));

        let submitted = capture(&device.device, || self.encode(device, passes).map(|command_buffer| queue.submit(std::iter::once(command_buffer))));
        let (index, fault) = match submitted {
            Ok(Ok(index)) => {
                let flag = done.clone();
                queue.on_submitted_work_done(move || flag.store(true, Ordering::SeqCst));
                (Some(index), None)
            }
            Ok(Err(fault)) => (None, Some(fault)),
            Err(error) => (None, Some(error.to_string())),
        };
        if let Some(fault) = &fault {
            tracing::warn!(%fault, "wgpu submission faulted");
        }

        for drawable in drawables {
            if let WgpuDrawable::Surface { frame, .. } = drawable {
                frame.present();
            }
        }

        WgpuSubmission { index, done, fault }
    }

    fn poll(&self, device: &WgpuDevice, submission: &WgpuSubmission) -> Option<Result<(), String>> {
        if let Some(fault) = &submission.fault {
            return Some(Err(fault.clone()));
        }
        if self.is_device_lost(device) {
            return Some(Err("device lost while the command buffer was in flight".to_string()));
        }
        if let Err(error) = device.device.poll(wgpu::PollType::Poll) {
            return Some(Err(NativeError::DeviceLost(error.to_string()).to_string()));
        }
        submission.done.load(Ordering::SeqCst).then_some(Ok(()))
    }

    fn wait(&self, device: &WgpuDevice, submission: &WgpuSubmission) -> Result<(), String> {
        if let Some(fault) = &submission.fault {
            return Err(fault.clone());
        }
        if let Some(index) = &submission.index {
            device.device.poll(wgpu::PollType::WaitForSubmissionIndex(index.clone())).map_err(|e| e.to_string())?;
        }
        if self.is_device_lost(device) {
            return Err("device lost while the command buffer was in flight".to_string());
        }
        Ok(())
    }
}
