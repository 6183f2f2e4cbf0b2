//! Adds two arrays on the GPU and prints the result.
//!
//! ```bash
//! cargo run -p redlilium-gpu-demos --bin calc
//! cargo run -p redlilium-gpu-demos --features wgpu-backend --bin calc
//! ```

use std::process::ExitCode;

use redlilium_gpu::{
    CommandBufferStatus, CompileOptions, GpuError, NativeFunctions, ResourceOptions, Size,
};

const SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read> in_a: array<f32>;
@group(0) @binding(1) var<storage, read> in_b: array<f32>;
@group(0) @binding(2) var<storage, read_write> result: array<f32>;

@compute @workgroup_size(4)
fn add_arrays(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&result)) {
        return;
    }
    result[i] = in_a[i] + in_b[i];
}
"#;

fn natives() -> NativeFunctions {
    NativeFunctions::new().with_kernel("add_arrays", |ctx| {
        let i = ctx.global_id();
        let a: f32 = ctx.read(0, i);
        let b: f32 = ctx.read(1, i);
        ctx.write(2, i, a + b);
    })
}

fn run() -> Result<Vec<f32>, GpuError> {
    let device = redlilium_gpu_demos::create_device(natives())?;
    let library = device.new_library_with_source(SOURCE, &CompileOptions::default())?;
    let pipeline = device.new_compute_pipeline_state(&library.function_named("add_arrays")?)?;

    let input = [0.0f32, 1.0, 2.0, 3.0];
    let a = device.new_buffer_with_bytes(
        bytemuck::cast_slice(&input),
        ResourceOptions::STORAGE_MODE_SHARED,
    )?;
    let b = device.new_buffer_with_bytes(
        bytemuck::cast_slice(&input),
        ResourceOptions::STORAGE_MODE_SHARED,
    )?;
    let result = device.new_buffer_with_length(
        std::mem::size_of_val(&input),
        ResourceOptions::STORAGE_MODE_SHARED,
    )?;

    let queue = device.new_command_queue()?;
    let command_buffer = queue.new_command_buffer();
    let mut encoder = command_buffer.new_compute_command_encoder();
    encoder.set_compute_pipeline_state(&pipeline);
    encoder.set_buffer(&a, 0, 0);
    encoder.set_buffer(&b, 0, 1);
    encoder.set_buffer(&result, 0, 2);
    let width = pipeline
        .max_total_threads_per_threadgroup()
        .min(input.len() as u32);
    encoder.dispatch_threads(Size::new_1d(input.len() as u32), Size::new_1d(width));
    encoder.end_encoding();

    command_buffer.commit();
    command_buffer.wait_until_completed();
    if command_buffer.status() != CommandBufferStatus::Completed {
        return Err(command_buffer.error().unwrap_or_else(|| {
            GpuError::ExecutionFailed("command buffer did not complete".to_string())
        }));
    }

    Ok(result.contents().as_slice::<f32>().to_vec())
}

fn main() -> ExitCode {
    redlilium_gpu_demos::init_logging();
    match run() {
        Ok(values) => {
            println!("{values:?}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("calc failed: {e}");
            ExitCode::FAILURE
        }
    }
}
