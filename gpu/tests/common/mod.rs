//! Common utilities for GPU integration tests.
//!
//! Every test builds its shaders from the WGSL below. The software backend
//! runs the matching native functions from [`native_functions`]; the wgpu
//! backend compiles the WGSL itself.

use std::sync::Arc;

use redlilium_gpu::{
    BackendType, Buffer, CommandBuffer, CommandBufferStatus, CommandQueue, CompileOptions,
    ComputePipelineState, Device, Instance, InstanceParameters, NativeFunctions, PixelFormat,
    Region, RenderPipelineDescriptor, RenderPipelineState, ResourceOptions, SoftwareConfig,
    Texture, TextureDescriptor, TextureUsage, VertexOutput,
};

/// Kernels. Each entry point owns distinct binding indices.
pub const COMPUTE_SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read> in_a: array<f32>;
@group(0) @binding(1) var<storage, read> in_b: array<f32>;
@group(0) @binding(2) var<storage, read_write> result: array<f32>;

struct Params {
    factor: f32,
}
@group(0) @binding(3) var<uniform> params: Params;

@group(0) @binding(4) var<storage, read_write> counters: array<u32>;

@compute @workgroup_size(4)
fn add_arrays(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&result)) {
        return;
    }
    result[i] = in_a[i] + in_b[i];
}

@compute @workgroup_size(4)
fn scale(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&result)) {
        return;
    }
    result[i] = result[i] * params.factor;
}

@compute @workgroup_size(1)
fn increment(@builtin(global_invocation_id) id: vec3<u32>) {
    counters[id.x] = counters[id.x] + 1u;
}
"#;

/// Vertex stage reads positions from slot 0 and colors from slot 1; the
/// tint fragment stage reads its color from fragment slot 0.
pub const RENDER_SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read> positions: array<vec2<f32>>;
@group(0) @binding(1) var<storage, read> colors: array<vec4<f32>>;

@group(1) @binding(0) var<uniform> tint: vec4<f32>;

struct VertexOut {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}

@vertex
fn triangle_vertex(@builtin(vertex_index) index: u32) -> VertexOut {
    var out: VertexOut;
    out.position = vec4<f32>(positions[index], 0.0, 1.0);
    out.color = colors[index];
    return out;
}

@fragment
fn triangle_fragment(in: VertexOut) -> @location(0) vec4<f32> {
    return in.color;
}

@fragment
fn tint_fragment(in: VertexOut) -> @location(0) vec4<f32> {
    return tint;
}
"#;

/// Triangle vertex positions in clip space.
pub const TRIANGLE_POSITIONS: [[f32; 2]; 3] = [[0.0, 0.5], [-0.5, -0.5], [0.5, -0.5]];

/// Red, green and blue corners.
pub const TRIANGLE_COLORS: [[f32; 4]; 3] = [
    [1.0, 0.0, 0.0, 1.0],
    [0.0, 1.0, 0.0, 1.0],
    [0.0, 0.0, 1.0, 1.0],
];

/// Native equivalents of the WGSL entry points.
pub fn native_functions() -> NativeFunctions {
    NativeFunctions::new()
        .with_kernel("add_arrays", |ctx| {
            let i = ctx.global_id();
            let a: f32 = ctx.read(0, i);
            let b: f32 = ctx.read(1, i);
            ctx.write(2, i, a + b);
        })
        .with_kernel("scale", |ctx| {
            let i = ctx.global_id();
            let factor: f32 = ctx.read(3, 0);
            let value: f32 = ctx.read(2, i);
            ctx.write(2, i, value * factor);
        })
        .with_kernel("increment", |ctx| {
            let i = ctx.global_id();
            let value: u32 = ctx.read(4, i);
            ctx.write(4, i, value + 1);
        })
        .with_vertex("triangle_vertex", |ctx| {
            let index = ctx.vertex_id as usize;
            let [x, y]: [f32; 2] = ctx.read(0, index);
            let color: [f32; 4] = ctx.read(1, index);
            VertexOutput::new([x, y, 0.0, 1.0]).with_varyings(color)
        })
        .with_fragment("triangle_fragment", |ctx| {
            [ctx.varyings[0], ctx.varyings[1], ctx.varyings[2], ctx.varyings[3]]
        })
        .with_fragment("tint_fragment", |ctx| ctx.read(0, 0))
}

/// Install a test logger once per process.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Available backends for testing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// CPU execution with native functions.
    Software,
    /// Hardware execution through wgpu.
    WebGpu,
}

impl Backend {
    /// Check if this backend is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Backend::Software => true,
            Backend::WebGpu => cfg!(feature = "wgpu-backend"),
        }
    }

    pub fn to_instance_parameters(self) -> InstanceParameters {
        match self {
            Backend::Software => InstanceParameters::new()
                .with_backend(BackendType::Software)
                .with_software_config(
                    SoftwareConfig::default()
                        .with_name("Test Device")
                        .with_native_functions(native_functions()),
                ),
            Backend::WebGpu => InstanceParameters::new().with_backend(BackendType::Wgpu),
        }
    }
}

// ============================================================================
// Test Context
// ============================================================================

/// A device and queue for one test, with helpers for common operations.
pub struct TestContext {
    #[allow(dead_code)]
    pub backend: Backend,
    pub device: Arc<Device>,
    pub queue: CommandQueue,
}

impl TestContext {
    /// Create a test context for `backend`.
    ///
    /// Returns `None` if the backend is not compiled in or has no adapter.
    pub fn new(backend: Backend) -> Option<Self> {
        init_logging();
        if !backend.is_available() {
            return None;
        }
        let instance = Instance::new(backend.to_instance_parameters()).ok()?;
        let device = instance.create_default_device().ok()?;
        let queue = device.new_command_queue().ok()?;
        Some(Self {
            backend,
            device,
            queue,
        })
    }

    #[allow(dead_code)]
    pub fn compute_pipeline(&self, name: &str) -> Arc<ComputePipelineState> {
        let library = self
            .device
            .new_library_with_source(COMPUTE_SOURCE, &CompileOptions::default())
            .expect("compute library");
        let function = library.function_named(name).expect("kernel function");
        self.device
            .new_compute_pipeline_state(&function)
            .expect("compute pipeline")
    }

    #[allow(dead_code)]
    pub fn render_pipeline(&self, fragment: &str, format: PixelFormat) -> Arc<RenderPipelineState> {
        let library = self
            .device
            .new_library_with_source(RENDER_SOURCE, &CompileOptions::default())
            .expect("render library");
        let descriptor = RenderPipelineDescriptor::new()
            .with_label(fragment)
            .with_vertex_function(&library.function_named("triangle_vertex").expect("vertex"))
            .with_fragment_function(&library.function_named(fragment).expect("fragment"))
            .with_color_attachment_format(0, format);
        self.device
            .new_render_pipeline_state(&descriptor)
            .expect("render pipeline")
    }

    /// Create a buffer holding `data`.
    pub fn buffer_with<T: bytemuck::Pod>(
        &self,
        data: &[T],
        options: ResourceOptions,
    ) -> Arc<Buffer> {
        self.device
            .new_buffer_with_bytes(bytemuck::cast_slice(data), options)
            .expect("buffer")
    }

    #[allow(dead_code)]
    pub fn buffer_with_length(&self, length: usize, options: ResourceOptions) -> Arc<Buffer> {
        self.device
            .new_buffer_with_length(length, options)
            .expect("buffer")
    }

    #[allow(dead_code)]
    pub fn render_target(&self, width: u32, height: u32, format: PixelFormat) -> Arc<Texture> {
        self.device
            .new_texture(
                &TextureDescriptor::new_2d(format, width, height)
                    .with_usage(TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ),
            )
            .expect("render target")
    }

    /// Record with `encode`, commit, wait and assert success.
    pub fn submit(&self, encode: impl FnOnce(&CommandBuffer)) -> CommandBuffer {
        let command_buffer = self.queue.new_command_buffer();
        encode(&command_buffer);
        command_buffer.commit();
        command_buffer.wait_until_completed();
        assert_eq!(
            command_buffer.status(),
            CommandBufferStatus::Completed,
            "command buffer failed: {:?}",
            command_buffer.error()
        );
        command_buffer
    }
}

/// Read the whole of mip 0 of a 2D texture.
#[allow(dead_code)]
pub fn read_pixels(texture: &Texture) -> Vec<u8> {
    let bytes_per_row = texture.width() as usize * texture.pixel_format().bytes_per_pixel();
    let mut pixels = vec![0u8; bytes_per_row * texture.height() as usize];
    texture.get_bytes(
        &mut pixels,
        bytes_per_row,
        Region::make_2d(0, 0, texture.width(), texture.height()),
        0,
    );
    pixels
}

/// The 4-byte pixel at `(x, y)` of a tightly packed image.
#[allow(dead_code)]
pub fn pixel(pixels: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let offset = ((y * width + x) * 4) as usize;
    [
        pixels[offset],
        pixels[offset + 1],
        pixels[offset + 2],
        pixels[offset + 3],
    ]
}
