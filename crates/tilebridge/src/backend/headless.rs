//! CPU reference backend
//!
//! Implements the native contract entirely in host memory: buffers and textures
//! are plain byte allocations with unified CPU/GPU visibility, transfers and blit
//! copies are executed on the calling thread at submission, and render passes
//! apply their load/store actions. Shader work runs only for compute entry points
//! that have a CPU kernel registered under the same name; draws and unknown
//! dispatches are validated and counted but not executed.
//!
//! The backend never blocks: a submission has completed by the time `submit`
//! returns, so `wait` only reports the stored outcome.

use super::{
    AdapterInfo, AdapterKind, Backend, Binding, BlitCommand, ColorAttachment, ComputeCommand, DeviceLimits, NativeError, NativeResult, Pass, RenderCommand,
};
use crate::format::{ClearColor, LoadAction, PixelFormat, RenderPipelineDescriptor, TextureDescriptor};
use crate::shader::{BindingLayout, EntryPoint};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// CPU implementation of a compute entry point
pub type KernelFn = Arc<dyn Fn(&mut KernelInvocation) -> Result<(), String> + Send + Sync>;

/// Configuration of the headless backend
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// One adapter is exposed per name, in order
    pub adapter_names: Vec<String>,
    /// Dispatches with larger threadgroups fault at execution time
    pub max_threads_per_threadgroup: u32,
    /// Largest buffer allocation in bytes
    pub max_buffer_size: u64,
    /// Largest texture width or height
    pub max_texture_dimension: u32,
    /// Buffer slots in the argument table
    pub max_buffer_slots: u32,
    /// Texture slots in the argument table
    pub max_texture_slots: u32,
    /// Alignment of blit copy offsets and sizes
    pub copy_alignment: u64,
    /// Expose buffer memory to the CPU directly; when off the bridge keeps CPU
    /// mirrors, as it does for discrete GPUs
    pub unified_memory: bool,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            adapter_names: vec!["Headless Reference Device".to_string()],
            max_threads_per_threadgroup: 1024,
            max_buffer_size: 256 << 20,
            max_texture_dimension: 16384,
            max_buffer_slots: 31,
            max_texture_slots: 31,
            copy_alignment: 1,
            unified_memory: true,
        }
    }
}

/// Counters of the work the backend executed
#[derive(Debug, Default)]
pub struct HeadlessStats {
    submissions: AtomicU64,
    dispatches: AtomicU64,
    kernel_runs: AtomicU64,
    draws: AtomicU64,
    copies: AtomicU64,
    presents: AtomicU64,
}

impl HeadlessStats {
    /// Command buffers submitted
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Compute dispatches executed or skipped for lack of a kernel
    pub fn dispatches(&self) -> u64 {
        self.dispatches.load(Ordering::Relaxed)
    }

    /// Dispatches that ran a registered CPU kernel
    pub fn kernel_runs(&self) -> u64 {
        self.kernel_runs.load(Ordering::Relaxed)
    }

    /// Draw calls
    pub fn draws(&self) -> u64 {
        self.draws.load(Ordering::Relaxed)
    }

    /// Blit copies
    pub fn copies(&self) -> u64 {
        self.copies.load(Ordering::Relaxed)
    }

    /// Drawables presented
    pub fn presents(&self) -> u64 {
        self.presents.load(Ordering::Relaxed)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Arguments of one CPU kernel dispatch
///
/// Buffer contents are copied in before the kernel runs and written back after
/// it returns successfully.
#[derive(Debug)]
pub struct KernelInvocation {
    /// Grid size in threads
    pub grid: [u32; 2],
    /// Threadgroup size in threads
    pub group: [u32; 2],
    buffers: BTreeMap<u32, Vec<u8>>,
    bytes: BTreeMap<u32, Bytes>,
}

impl KernelInvocation {
    /// Contents of the buffer bound at `slot`, starting at its binding offset
    pub fn buffer(&self, slot: u32) -> Option<&[u8]> {
        self.buffers.get(&slot).map(Vec::as_slice)
    }

    /// Mutable contents of the buffer bound at `slot`
    pub fn buffer_mut(&mut self, slot: u32) -> Option<&mut [u8]> {
        self.buffers.get_mut(&slot).map(Vec::as_mut_slice)
    }

    /// Inline bytes bound at `slot`
    pub fn bytes(&self, slot: u32) -> Option<&[u8]> {
        self.bytes.get(&slot).map(|data| data.as_ref())
    }
}

type Memory = Arc<Mutex<Box<[u8]>>>;

fn allocate(size: usize) -> Memory {
    Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice()))
}

/// Logical device of the headless backend
#[derive(Debug)]
pub struct HeadlessDevice {
    index: usize,
    lost: Arc<AtomicBool>,
}

/// Submission queue of the headless backend
#[derive(Debug)]
pub struct HeadlessQueue {
    device_index: usize,
}

/// Shader module of the headless backend
#[derive(Debug, Clone)]
pub struct HeadlessShaderModule;

/// Compute pipeline of the headless backend
#[derive(Debug, Clone)]
pub struct HeadlessComputePipeline {
    entry: Arc<str>,
}

/// Render pipeline of the headless backend
#[derive(Debug, Clone)]
pub struct HeadlessRenderPipeline {
    format: PixelFormat,
}

/// Buffer of the headless backend
#[derive(Clone)]
pub struct HeadlessBuffer {
    memory: Memory,
}

impl fmt::Debug for HeadlessBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBuffer").field("len", &self.memory.lock().len()).finish()
    }
}

/// Texture of the headless backend; texels are tightly packed rows
#[derive(Clone)]
pub struct HeadlessTexture {
    memory: Memory,
    descriptor: TextureDescriptor,
}

impl HeadlessTexture {
    /// Copy of the texel data, tightly packed
    pub fn snapshot(&self) -> Vec<u8> {
        self.memory.lock().to_vec()
    }
}

impl fmt::Debug for HeadlessTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessTexture").field("descriptor", &self.descriptor).finish()
    }
}

/// Offscreen drawable of the headless backend
#[derive(Debug)]
pub struct HeadlessDrawable {
    texture: HeadlessTexture,
}

/// Outcome of a headless submission
#[derive(Debug)]
pub struct HeadlessSubmission {
    outcome: Result<(), String>,
}

/// CPU reference backend
pub struct HeadlessBackend {
    config: HeadlessConfig,
    adapters: Vec<AdapterInfo>,
    lost: Vec<Arc<AtomicBool>>,
    kernels: HashMap<String, KernelFn>,
    stats: Arc<HeadlessStats>,
}

impl fmt::Debug for HeadlessBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessBackend")
            .field("adapters", &self.adapters)
            .field("kernels", &self.kernels.keys().collect::<Vec<_>>())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(HeadlessConfig::default())
    }
}

impl HeadlessBackend {
    /// Creates a backend exposing one adapter per configured name
    pub fn new(config: HeadlessConfig) -> Self {
        let adapters = config
            .adapter_names
            .iter()
            .map(|name| AdapterInfo {
                name: name.clone(),
                api: "headless".to_string(),
                kind: AdapterKind::Cpu,
            })
            .collect::<Vec<_>>();
        let lost = adapters.iter().map(|_| Arc::new(AtomicBool::new(false))).collect();
        Self {
            config,
            adapters,
            lost,
            kernels: HashMap::new(),
            stats: Arc::new(HeadlessStats::default()),
        }
    }

    /// Whether the backend can serve at least one device; never fails
    pub fn is_available(&self) -> bool {
        !self.adapters.is_empty()
    }

    /// Registers a CPU kernel run for dispatches of the entry point `name`
    pub fn with_kernel(mut self, name: impl Into<String>, kernel: impl Fn(&mut KernelInvocation) -> Result<(), String> + Send + Sync + 'static) -> Self {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    /// Work counters
    pub fn stats(&self) -> &HeadlessStats {
        &self.stats
    }

    /// Simulates loss of every device opened on the adapter at `index`
    pub fn lose_device(&self, index: usize) {
        if let Some(flag) = self.lost.get(index) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn execute(&self, passes: Vec<Pass<Self>>) -> Result<(), String> {
        for pass in passes {
            match pass {
                Pass::Compute { commands, .. } => self.execute_compute(commands)?,
                Pass::Render { target, commands, .. } => self.execute_render(target, commands)?,
                Pass::Blit { commands, .. } => self.execute_blit(commands)?,
            }
        }
        Ok(())
    }

    fn execute_compute(&self, commands: Vec<ComputeCommand<Self>>) -> Result<(), String> {
        let mut pipeline: Option<HeadlessComputePipeline> = None;
        let mut buffers: BTreeMap<u32, (HeadlessBuffer, u64)> = BTreeMap::new();
        let mut bytes: BTreeMap<u32, Bytes> = BTreeMap::new();

        for command in commands {
            match command {
                ComputeCommand::SetPipeline(next) => pipeline = Some(next),
                ComputeCommand::Bind(Binding::Buffer { slot, buffer, offset }) => {
                    bytes.remove(&slot);
                    buffers.insert(slot, (buffer, offset));
                }
                ComputeCommand::Bind(Binding::Bytes { slot, data }) => {
                    buffers.remove(&slot);
                    bytes.insert(slot, data);
                }
                ComputeCommand::Bind(Binding::Texture { .. }) => {}
                ComputeCommand::Dispatch { grid, group } => {
                    HeadlessStats::bump(&self.stats.dispatches);
                    let threads = u64::from(group[0]) * u64::from(group[1]);
                    if threads > u64::from(self.config.max_threads_per_threadgroup) {
                        return Err(format!(
                            "threadgroup of {}x{} threads exceeds the device limit of {}",
                            group[0], group[1], self.config.max_threads_per_threadgroup
                        ));
                    }
                    let Some(pipeline) = pipeline.as_ref() else {
                        return Err("dispatch without a compute pipeline".to_string());
                    };
                    if let Some(kernel) = self.kernels.get(pipeline.entry.as_ref()) {
                        self.run_kernel(kernel, &pipeline.entry, grid, group, &buffers, &bytes)?;
                    } else {
                        tracing::trace!(entry = %pipeline.entry, "no CPU kernel registered, dispatch skipped");
                    }
                }
            }
        }
        Ok(())
    }

    fn run_kernel(
        &self,
        kernel: &KernelFn,
        entry: &str,
        grid: [u32; 2],
        group: [u32; 2],
        buffers: &BTreeMap<u32, (HeadlessBuffer, u64)>,
        bytes: &BTreeMap<u32, Bytes>,
    ) -> Result<(), String> {
        let mut invocation = KernelInvocation {
            grid,
            group,
            buffers: buffers
                .iter()
                .map(|(slot, (buffer, offset))| (*slot, buffer.memory.lock()[*offset as usize..].to_vec()))
                .collect(),
            bytes: bytes.clone(),
        };

        kernel(&mut invocation).map_err(|e| format!("kernel `{entry}` faulted: {e}"))?;
        HeadlessStats::bump(&self.stats.kernel_runs);

        for (slot, contents) in invocation.buffers {
            if let Some((buffer, offset)) = buffers.get(&slot) {
                let mut memory = buffer.memory.lock();
                let start = *offset as usize;
                memory[start..start + contents.len()].copy_from_slice(&contents);
            }
        }
        Ok(())
    }

    fn execute_render(&self, target: ColorAttachment<Self>, commands: Vec<RenderCommand<Self>>) -> Result<(), String> {
        if target.load == LoadAction::Clear {
            let texel = encode_clear_color(target.format, target.clear_color);
            let mut memory = target.texture.memory.lock();
            for chunk in memory.chunks_exact_mut(texel.len()) {
                chunk.copy_from_slice(&texel);
            }
        }

        for command in commands {
            match command {
                RenderCommand::SetPipeline(pipeline) if pipeline.format != target.format => {
                    return Err(format!("pipeline renders {:?} but the attachment is {:?}", pipeline.format, target.format));
                }
                RenderCommand::Draw { .. } => HeadlessStats::bump(&self.stats.draws),
                _ => {}
            }
        }
        Ok(())
    }

    fn execute_blit(&self, commands: Vec<BlitCommand<Self>>) -> Result<(), String> {
        for command in commands {
            let BlitCommand::CopyBuffer {
                source,
                source_offset,
                destination,
                destination_offset,
                size,
            } = command;
            let (src, dst, len) = (source_offset as usize, destination_offset as usize, size as usize);

            if Arc::ptr_eq(&source.memory, &destination.memory) {
                let mut memory = source.memory.lock();
                if src + len > memory.len() || dst + len > memory.len() {
                    return Err("blit copy out of bounds".to_string());
                }
                memory.copy_within(src..src + len, dst);
            } else {
                let source = source.memory.lock();
                let mut destination = destination.memory.lock();
                if src + len > source.len() || dst + len > destination.len() {
                    return Err("blit copy out of bounds".to_string());
                }
                destination[dst..dst + len].copy_from_slice(&source[src..src + len]);
            }
            HeadlessStats::bump(&self.stats.copies);
        }
        Ok(())
    }

    fn check_device(&self, device: &HeadlessDevice) -> NativeResult<()> {
        if device.lost.load(Ordering::SeqCst) {
            return Err(NativeError::DeviceLost(format!("headless adapter {} was lost", device.index)));
        }
        Ok(())
    }
}

impl Backend for HeadlessBackend {
    type Device = HeadlessDevice;
    type Queue = HeadlessQueue;
    type ShaderModule = HeadlessShaderModule;
    type ComputePipeline = HeadlessComputePipeline;
    type RenderPipeline = HeadlessRenderPipeline;
    type Buffer = HeadlessBuffer;
    type Texture = HeadlessTexture;
    type Drawable = HeadlessDrawable;
    type Submission = HeadlessSubmission;

    fn adapters(&self) -> &[AdapterInfo] {
        &self.adapters
    }

    fn open_device(&self, index: usize) -> NativeResult<HeadlessDevice> {
        let lost = self.lost.get(index).ok_or_else(|| NativeError::DeviceLost(format!("no headless adapter at index {index}")))?;
        let device = HeadlessDevice { index, lost: lost.clone() };
        self.check_device(&device)?;
        Ok(device)
    }

    fn device_limits(&self, _device: &HeadlessDevice) -> DeviceLimits {
        DeviceLimits {
            max_buffer_slots: self.config.max_buffer_slots,
            max_texture_slots: self.config.max_texture_slots,
            max_buffer_size: self.config.max_buffer_size,
            max_texture_dimension: self.config.max_texture_dimension,
            max_threads_per_threadgroup: self.config.max_threads_per_threadgroup,
            copy_alignment: self.config.copy_alignment,
        }
    }

    fn is_device_lost(&self, device: &HeadlessDevice) -> bool {
        device.lost.load(Ordering::SeqCst)
    }

    fn create_queue(&self, device: &HeadlessDevice) -> NativeResult<HeadlessQueue> {
        self.check_device(device)?;
        Ok(HeadlessQueue { device_index: device.index })
    }

    fn create_shader_module(&self, device: &HeadlessDevice, source: &str) -> NativeResult<HeadlessShaderModule> {
        self.check_device(device)?;
        tracing::trace!(bytes = source.len(), "headless shader module created");
        Ok(HeadlessShaderModule)
    }

    fn create_compute_pipeline(&self, device: &HeadlessDevice, _module: &HeadlessShaderModule, entry: &EntryPoint, _layout: &BindingLayout) -> NativeResult<HeadlessComputePipeline> {
        self.check_device(device)?;
        Ok(HeadlessComputePipeline { entry: Arc::from(entry.name.as_str()) })
    }

    fn create_render_pipeline(
        &self,
        device: &HeadlessDevice,
        _vertex: (&HeadlessShaderModule, &EntryPoint),
        _fragment: (&HeadlessShaderModule, &EntryPoint),
        _layout: &BindingLayout,
        descriptor: &RenderPipelineDescriptor,
    ) -> NativeResult<HeadlessRenderPipeline> {
        self.check_device(device)?;
        Ok(HeadlessRenderPipeline { format: descriptor.pixel_format })
    }

    fn create_buffer(&self, device: &HeadlessDevice, size: u64) -> NativeResult<HeadlessBuffer> {
        self.check_device(device)?;
        if size > self.config.max_buffer_size {
            return Err(NativeError::OutOfMemory(format!("{size} bytes requested")));
        }
        Ok(HeadlessBuffer { memory: allocate(size as usize) })
    }

    fn write_buffer(&self, device: &HeadlessDevice, buffer: &HeadlessBuffer, offset: u64, data: &[u8]) -> NativeResult<()> {
        self.check_device(device)?;
        let start = offset as usize;
        buffer.memory.lock()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, device: &HeadlessDevice, buffer: &HeadlessBuffer, offset: u64, out: &mut [u8]) -> NativeResult<()> {
        self.check_device(device)?;
        let start = offset as usize;
        out.copy_from_slice(&buffer.memory.lock()[start..start + out.len()]);
        Ok(())
    }

    fn buffer_contents(&self, buffer: &HeadlessBuffer) -> Option<NonNull<u8>> {
        if !self.config.unified_memory {
            return None;
        }
        // The boxed slice never moves or resizes, so the pointer stays valid for
        // as long as any reference to the buffer is alive
        NonNull::new(buffer.memory.lock().as_mut_ptr())
    }

    fn create_texture(&self, device: &HeadlessDevice, descriptor: &TextureDescriptor) -> NativeResult<HeadlessTexture> {
        self.check_device(device)?;
        let size = descriptor.row_bytes() * u64::from(descriptor.height);
        Ok(HeadlessTexture {
            memory: allocate(size as usize),
            descriptor: *descriptor,
        })
    }

    fn write_texture(&self, device: &HeadlessDevice, texture: &HeadlessTexture, descriptor: &TextureDescriptor, data: &[u8], bytes_per_row: u32) -> NativeResult<()> {
        self.check_device(device)?;
        let row = descriptor.row_bytes() as usize;
        let mut memory = texture.memory.lock();
        for (y, dst) in memory.chunks_exact_mut(row).enumerate() {
            let src = y * bytes_per_row as usize;
            dst.copy_from_slice(&data[src..src + row]);
        }
        Ok(())
    }

    fn read_texture(&self, device: &HeadlessDevice, texture: &HeadlessTexture, descriptor: &TextureDescriptor, out: &mut [u8], bytes_per_row: u32) -> NativeResult<()> {
        self.check_device(device)?;
        let row = descriptor.row_bytes() as usize;
        let memory = texture.memory.lock();
        for (y, src) in memory.chunks_exact(row).enumerate() {
            let dst = y * bytes_per_row as usize;
            out[dst..dst + row].copy_from_slice(src);
        }
        Ok(())
    }

    fn create_offscreen_drawable(&self, device: &HeadlessDevice, descriptor: &TextureDescriptor) -> NativeResult<HeadlessDrawable> {
        Ok(HeadlessDrawable {
            texture: self.create_texture(device, descriptor)?,
        })
    }

    fn drawable_texture(&self, drawable: &HeadlessDrawable) -> (HeadlessTexture, TextureDescriptor) {
        (drawable.texture.clone(), drawable.texture.descriptor)
    }

    fn submit(&self, device: &HeadlessDevice, queue: &HeadlessQueue, passes: Vec<Pass<Self>>, drawables: Vec<HeadlessDrawable>) -> HeadlessSubmission {
        HeadlessStats::bump(&self.stats.submissions);
        let outcome = self.check_device(device).map_err(|e| e.to_string()).and_then(|()| self.execute(passes));
        if let Err(fault) = &outcome {
            tracing::warn!(device = queue.device_index, %fault, "headless submission faulted");
        }
        for drawable in drawables {
            tracing::trace!(texture = ?drawable.texture, "drawable presented");
            HeadlessStats::bump(&self.stats.presents);
        }
        HeadlessSubmission { outcome }
    }

    fn poll(&self, _device: &HeadlessDevice, submission: &HeadlessSubmission) -> Option<Result<(), String>> {
        Some(submission.outcome.clone())
    }

    fn wait(&self, _device: &HeadlessDevice, submission: &HeadlessSubmission) -> Result<(), String> {
        submission.outcome.clone()
    }
}

/// Encodes a clear color as one texel of `format`
fn encode_clear_color(format: PixelFormat, color: ClearColor) -> Vec<u8> {
    let unorm = |c: f64| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    let srgb = |c: f64| {
        let c = c.clamp(0.0, 1.0);
        let encoded = if c <= 0.003_130_8 { c * 12.92 } else { 1.055 * c.powf(1.0 / 2.4) - 0.055 };
        unorm(encoded)
    };
    let ClearColor { red, green, blue, alpha } = color;

    match format {
        PixelFormat::R8Unorm => vec![unorm(red)],
        PixelFormat::Rgba8Unorm => vec![unorm(red), unorm(green), unorm(blue), unorm(alpha)],
        PixelFormat::Rgba8UnormSrgb => vec![srgb(red), srgb(green), srgb(blue), unorm(alpha)],
        PixelFormat::Bgra8Unorm => vec![unorm(blue), unorm(green), unorm(red), unorm(alpha)],
        PixelFormat::Bgra8UnormSrgb => vec![srgb(blue), srgb(green), srgb(red), unorm(alpha)],
        PixelFormat::R32Float => bytemuck::bytes_of(&(red as f32)).to_vec(),
        PixelFormat::Rg32Float => bytemuck::cast_slice(&[red as f32, green as f32]).to_vec(),
        PixelFormat::Rgba16Float => [red, green, blue, alpha].iter().flat_map(|&c| half::f16::from_f64(c).to_le_bytes()).collect(),
        PixelFormat::Rgba32Float => bytemuck::cast_slice(&[red as f32, green as f32, blue as f32, alpha as f32]).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_color_encoding() {
        let color = ClearColor::new(1.0, 0.5, 0.0, 1.0);
        assert_eq!(encode_clear_color(PixelFormat::Rgba8Unorm, color), vec![255, 128, 0, 255]);
        assert_eq!(encode_clear_color(PixelFormat::Bgra8Unorm, color), vec![0, 128, 255, 255]);
        assert_eq!(encode_clear_color(PixelFormat::R8Unorm, color), vec![255]);
        assert_eq!(encode_clear_color(PixelFormat::Rgba32Float, color).len(), 16);
        assert_eq!(encode_clear_color(PixelFormat::Rgba16Float, color).len(), 8);
        // sRGB encoding brightens mid-grey
        assert_eq!(encode_clear_color(PixelFormat::Rgba8UnormSrgb, color)[1], 188);
    }

    #[test]
    fn test_lost_adapter_cannot_be_opened() {
        let backend = HeadlessBackend::default();
        let device = backend.open_device(0).unwrap();
        assert!(!backend.is_device_lost(&device));

        backend.lose_device(0);
        assert!(backend.is_device_lost(&device));
        assert!(matches!(backend.open_device(0), Err(NativeError::DeviceLost(_))));
        assert!(matches!(backend.open_device(7), Err(NativeError::DeviceLost(_))));
    }

    #[test]
    fn test_blit_copy_within_one_buffer() {
        let backend = HeadlessBackend::default();
        let device = backend.open_device(0).unwrap();
        let queue = backend.create_queue(&device).unwrap();
        let buffer = backend.create_buffer(&device, 8).unwrap();
        backend.write_buffer(&device, &buffer, 0, &[1, 2, 3, 4]).unwrap();

        let pass = Pass::Blit {
            label: None,
            commands: vec![BlitCommand::CopyBuffer {
                source: buffer.clone(),
                source_offset: 0,
                destination: buffer.clone(),
                destination_offset: 4,
                size: 4,
            }],
        };
        let submission = backend.submit(&device, &queue, vec![pass], Vec::new());
        assert_eq!(backend.wait(&device, &submission), Ok(()));

        let mut out = [0u8; 8];
        backend.read_buffer(&device, &buffer, 0, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 1, 2, 3, 4]);
        assert_eq!(backend.stats().copies(), 1);
    }

    #[test]
    fn test_memory_model_switches() {
        let backend = HeadlessBackend::default();
        let device = backend.open_device(0).unwrap();
        assert!(backend.buffer_contents(&backend.create_buffer(&device, 4).unwrap()).is_some());
        assert_eq!(backend.device_limits(&device).copy_alignment, 1);

        let backend = HeadlessBackend::new(HeadlessConfig {
            copy_alignment: 4,
            unified_memory: false,
            ..Default::default()
        });
        let device = backend.open_device(0).unwrap();
        assert!(backend.buffer_contents(&backend.create_buffer(&device, 4).unwrap()).is_none());
        assert_eq!(backend.device_limits(&device).copy_alignment, 4);
    }
}
