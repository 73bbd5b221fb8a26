//! tilebridge command-line tool
//!
//! A command-line tool exercising the bridge end to end against either the
//! wgpu backend or the headless CPU backend.
//!
//! # Usage
//! ```bash
//! tilebridge-cli devices
//! tilebridge-cli smoke --headless
//! tilebridge-cli triangle triangle.png --width 256 --height 256
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tilebridge::backend::{Backend, HeadlessBackend, HeadlessConfig, WgpuBackend, WgpuConfig};
use tilebridge::{
    Bridge, ClearColor, CommandBufferStatus, PixelFormat, PrimitiveType, RenderPassDescriptor, RenderPipelineDescriptor, StorageMode, TextureDescriptor,
};
use tracing_subscriber::EnvFilter;

/// Increments every byte of a buffer, one 32-bit word per thread
const ADD_ONE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn add_one(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x < arrayLength(&data)) {
        data[id.x] = data[id.x] + 0x01010101u;
    }
}
"#;

/// Single triangle filled with a uniform color
const TRIANGLE: &str = r#"
@group(0) @binding(0) var<uniform> tint: vec4<f32>;

@vertex
fn vs(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var positions = array<vec2<f32>, 3>(vec2<f32>(0.0, 0.8), vec2<f32>(-0.8, -0.8), vec2<f32>(0.8, -0.8));
    return vec4<f32>(positions[index], 0.0, 1.0);
}

@fragment
fn fs() -> @location(0) vec4<f32> {
    return tint;
}
"#;

#[derive(Parser)]
#[command(version, about = "List GPU adapters and run smoke scenarios through tilebridge")]
struct Args {
    /// Use the CPU reference backend instead of the GPU
    #[arg(long, global = true)]
    headless: bool,

    /// Log at debug level unless TILEBRIDGE_LOG is set
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List adapters with their limits
    Devices,
    /// Increment a buffer with a compute kernel and check the result
    Smoke {
        /// Buffer size in bytes, a multiple of 4
        #[arg(long, default_value = "1024")]
        size: u32,
    },
    /// Clear a texture, draw a triangle and save it as PNG
    Triangle {
        /// Output image file path
        output: PathBuf,

        #[arg(long, default_value = "256")]
        width: u32,

        #[arg(long, default_value = "256")]
        height: u32,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("TILEBRIDGE_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.headless {
        let backend = HeadlessBackend::new(HeadlessConfig::default()).with_kernel("add_one", |invocation| {
            let words = invocation.grid[0] as usize;
            let data = invocation.buffer_mut(0).ok_or("buffer slot 0 is unbound")?;
            for word in data.chunks_exact_mut(4).take(words) {
                let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]).wrapping_add(0x0101_0101);
                word.copy_from_slice(&value.to_le_bytes());
            }
            Ok(())
        });
        run(Bridge::new(backend), args.command)
    } else {
        run(Bridge::new(WgpuBackend::new(WgpuConfig::from_env())), args.command)
    }
}

fn run<B: Backend>(mut bridge: Bridge<B>, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    tracing::debug!(?bridge, adapters = bridge.device_count(), "bridge ready");
    match command {
        Command::Devices => devices(&mut bridge),
        Command::Smoke { size } => smoke(&mut bridge, size),
        Command::Triangle { output, width, height } => triangle(&mut bridge, &output, width, height),
    }
}

fn devices<B: Backend>(bridge: &mut Bridge<B>) -> Result<(), Box<dyn std::error::Error>> {
    if !bridge.is_available() {
        println!("No adapters available");
        return Ok(());
    }

    for device in bridge.enumerate_devices()? {
        let info = bridge.device_info(device)?;
        println!("[{}] {} ({}, {:?})", info.index, info.name, info.api, info.kind);
        println!("    buffer slots: {}, texture slots: {}", info.limits.max_buffer_slots, info.limits.max_texture_slots);
        println!("    max buffer size: {} bytes", info.limits.max_buffer_size);
        println!("    max texture dimension: {}", info.limits.max_texture_dimension);
        println!("    max threads per threadgroup: {}", info.limits.max_threads_per_threadgroup);
        bridge.release_device(device)?;
    }
    Ok(())
}

/// Runs `add_one` over a buffer of `size` bytes holding `0, 1, 2, ...`
fn smoke<B: Backend>(bridge: &mut Bridge<B>, size: u32) -> Result<(), Box<dyn std::error::Error>> {
    if size == 0 || size % 4 != 0 {
        return Err(format!("size {size} is not a positive multiple of 4").into());
    }

    let device = bridge.create_default_device()?;
    println!("Using {}", bridge.device_name(device)?);
    let queue = bridge.create_command_queue(device)?;

    let library = bridge.create_library_from_source(device, ADD_ONE)?;
    let function = bridge.create_function(library, "add_one")?;
    let pipeline = bridge.create_compute_pipeline(device, function)?;

    let input: Vec<u8> = (0..size).map(|index| index as u8).collect();
    let buffer = bridge.create_buffer(device, u64::from(size), StorageMode::Shared)?;
    bridge.buffer_upload(buffer, &input)?;

    let words = size / 4;
    let command_buffer = bridge.create_command_buffer(queue)?;
    let encoder = bridge.create_compute_encoder(command_buffer)?;
    bridge.set_compute_pipeline(encoder, pipeline)?;
    bridge.set_buffer(encoder, buffer, 0, 0)?;
    bridge.dispatch(encoder, [words, 1], [words.min(64), 1])?;
    bridge.end_encoding(encoder)?;
    bridge.commit(command_buffer)?;

    let status = bridge.wait_for_completion(command_buffer)?;
    if status != CommandBufferStatus::Completed {
        let fault = bridge.command_buffer_error(command_buffer)?.unwrap_or("unknown fault");
        return Err(format!("command buffer {status:?}: {fault}").into());
    }

    let mut output = vec![0u8; size as usize];
    bridge.buffer_download(buffer, &mut output)?;
    let mismatches = input.iter().zip(&output).filter(|(before, after)| before.wrapping_add(1) != **after).count();
    bridge.release_device(device)?;

    if mismatches > 0 {
        return Err(format!("{mismatches} of {size} bytes were not incremented").into());
    }
    println!("Smoke test passed: {size} bytes incremented");
    Ok(())
}

/// Renders an orange triangle on a dark blue background into a PNG file
fn triangle<B: Backend>(bridge: &mut Bridge<B>, output: &std::path::Path, width: u32, height: u32) -> Result<(), Box<dyn std::error::Error>> {
    let device = bridge.create_default_device()?;
    println!("Using {}", bridge.device_name(device)?);
    let queue = bridge.create_command_queue(device)?;

    let library = bridge.create_library_from_source(device, TRIANGLE)?;
    let vertex = bridge.create_function(library, "vs")?;
    let fragment = bridge.create_function(library, "fs")?;
    let pipeline = bridge.create_render_pipeline(device, vertex, fragment, &RenderPipelineDescriptor::new(PixelFormat::Rgba8Unorm))?;
    let target = bridge.create_texture(device, TextureDescriptor::new(width, height))?;

    let command_buffer = bridge.create_command_buffer(queue)?;
    let background = ClearColor::new(0.05, 0.05, 0.2, 1.0);
    let encoder = bridge.create_render_encoder(command_buffer, &RenderPassDescriptor::clear(target, background))?;
    bridge.set_render_pipeline(encoder, pipeline)?;
    bridge.set_bytes(encoder, bytemuck::cast_slice(&[1.0f32, 0.5, 0.1, 1.0]), 0)?;
    bridge.draw(encoder, PrimitiveType::Triangle, 0, 3)?;
    bridge.end_encoding(encoder)?;
    bridge.commit(command_buffer)?;

    let status = bridge.wait_for_completion(command_buffer)?;
    if status != CommandBufferStatus::Completed {
        let fault = bridge.command_buffer_error(command_buffer)?.unwrap_or("unknown fault");
        return Err(format!("command buffer {status:?}: {fault}").into());
    }

    let bytes_per_row = width * 4;
    let mut pixels = vec![0u8; (bytes_per_row * height) as usize];
    bridge.texture_download(target, &mut pixels, width, height, bytes_per_row)?;
    bridge.release_device(device)?;

    let image = image::RgbaImage::from_raw(width, height, pixels).ok_or("texture readback has the wrong size")?;
    image.save(output)?;
    println!("Saved {width}x{height} image to {}", output.display());
    Ok(())
}
