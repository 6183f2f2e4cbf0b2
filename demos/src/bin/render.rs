//! Draws a colored triangle into an offscreen texture and writes it to a PNG.
//!
//! ```bash
//! cargo run -p redlilium-gpu-demos --bin render -- triangle.png
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use redlilium_gpu::{
    ClearColor, CommandBufferStatus, CompileOptions, GpuError, LoadAction, NativeFunctions,
    PixelFormat, PrimitiveType, Region, RenderPassColorAttachment, RenderPassDescriptor,
    RenderPipelineDescriptor, ResourceOptions, StorageMode, StoreAction, TextureDescriptor,
    TextureUsage, VertexOutput,
};

const SIZE: u32 = 256;
const FORMAT: PixelFormat = PixelFormat::Bgra8Unorm;
const CLEAR: ClearColor = ClearColor::new(0.35, 0.65, 0.85, 1.0);

const SOURCE: &str = r#"
struct Vertex {
    position: vec4<f32>,
    color: vec4<f32>,
}
@group(0) @binding(0) var<storage, read> vertices: array<Vertex>;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn vertex_main(@builtin(vertex_index) index: u32) -> VertexOut {
    var out: VertexOut;
    out.position = vertices[index].position;
    out.color = vertices[index].color;
    return out;
}

@fragment
fn fragment_main(in: VertexOut) -> @location(0) vec4<f32> {
    return in.color;
}
"#;

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Vertex {
    position: [f32; 4],
    color: [f32; 4],
}

const VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0, 1.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0, 1.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0, 1.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

fn natives() -> NativeFunctions {
    NativeFunctions::new()
        .with_vertex("vertex_main", |ctx| {
            let vertex: Vertex = ctx.read(0, ctx.vertex_id as usize);
            VertexOutput::new(vertex.position).with_varyings(vertex.color)
        })
        .with_fragment("fragment_main", |ctx| {
            [ctx.varyings[0], ctx.varyings[1], ctx.varyings[2], ctx.varyings[3]]
        })
}

/// Render the triangle and return tightly packed BGRA8 rows.
fn render() -> Result<Vec<u8>, GpuError> {
    let device = redlilium_gpu_demos::create_device(natives())?;
    let storage_mode = if device.supports_storage_mode(StorageMode::Managed) {
        StorageMode::Managed
    } else {
        StorageMode::Shared
    };

    let library = device.new_library_with_source(SOURCE, &CompileOptions::default())?;
    let pipeline = device.new_render_pipeline_state(
        &RenderPipelineDescriptor::new()
            .with_label("triangle")
            .with_vertex_function(&library.function_named("vertex_main")?)
            .with_fragment_function(&library.function_named("fragment_main")?)
            .with_color_attachment_format(0, FORMAT),
    )?;

    let vertices = device.new_buffer_with_bytes(
        bytemuck::cast_slice(&VERTICES),
        ResourceOptions::default().with_storage_mode(storage_mode),
    )?;
    let target = device.new_texture(
        &TextureDescriptor::new_2d(FORMAT, SIZE, SIZE)
            .with_label("triangle target")
            .with_storage_mode(storage_mode)
            .with_usage(TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ),
    )?;

    let queue = device.new_command_queue()?;
    let command_buffer = queue.new_command_buffer();

    let descriptor = RenderPassDescriptor::new().with_color_attachment(
        0,
        RenderPassColorAttachment::new(&target)
            .with_load_action(LoadAction::Clear)
            .with_store_action(StoreAction::Store)
            .with_clear_color(CLEAR),
    );
    let mut encoder = command_buffer.new_render_command_encoder(&descriptor);
    encoder.set_render_pipeline_state(&pipeline);
    encoder.set_vertex_buffer(&vertices, 0, 0);
    encoder.draw_primitives(PrimitiveType::Triangle, 0, VERTICES.len());
    encoder.end_encoding();

    let mut blit = command_buffer.new_blit_command_encoder();
    blit.synchronize_resource(&target);
    blit.end_encoding();

    command_buffer.commit();
    command_buffer.wait_until_completed();
    if command_buffer.status() != CommandBufferStatus::Completed {
        return Err(command_buffer.error().unwrap_or_else(|| {
            GpuError::ExecutionFailed("command buffer did not complete".to_string())
        }));
    }

    let bytes_per_row = SIZE as usize * FORMAT.bytes_per_pixel();
    let mut pixels = vec![0u8; bytes_per_row * SIZE as usize];
    target.get_bytes(&mut pixels, bytes_per_row, Region::make_2d(0, 0, SIZE, SIZE), 0);
    Ok(pixels)
}

fn main() -> ExitCode {
    redlilium_gpu_demos::init_logging();
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("triangle.png"));

    let mut pixels = match render() {
        Ok(pixels) => pixels,
        Err(e) => {
            log::error!("Render failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    // BGRA to RGBA
    for pixel in pixels.chunks_exact_mut(4) {
        pixel.swap(0, 2);
    }
    let Some(image) = image::RgbaImage::from_raw(SIZE, SIZE, pixels) else {
        log::error!("Pixel buffer does not match a {SIZE}x{SIZE} image");
        return ExitCode::FAILURE;
    };
    if let Err(e) = image.save(&path) {
        log::error!("Failed to write {}: {e}", path.display());
        return ExitCode::FAILURE;
    }
    log::info!("Wrote {}", path.display());
    ExitCode::SUCCESS
}
