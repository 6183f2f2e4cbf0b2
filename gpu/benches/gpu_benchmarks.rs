use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use redlilium_gpu::{
    BackendType, CompileOptions, CpuCacheMode, Device, HazardTrackingMode, Instance,
    InstanceParameters, NativeFunctions, ResourceOptions, Size, SoftwareConfig, StorageMode,
};

const SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read> in_a: array<f32>;
@group(0) @binding(1) var<storage, read> in_b: array<f32>;
@group(0) @binding(2) var<storage, read_write> result: array<f32>;

@compute @workgroup_size(64)
fn add_arrays(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= arrayLength(&result)) {
        return;
    }
    result[i] = in_a[i] + in_b[i];
}
"#;

fn software_device() -> Arc<Device> {
    let natives = NativeFunctions::new().with_kernel("add_arrays", |ctx| {
        let i = ctx.global_id();
        let a: f32 = ctx.read(0, i);
        let b: f32 = ctx.read(1, i);
        ctx.write(2, i, a + b);
    });
    Instance::new(
        InstanceParameters::new()
            .with_backend(BackendType::Software)
            .with_software_config(SoftwareConfig::default().with_native_functions(natives)),
    )
    .and_then(|instance| instance.create_default_device())
    .expect("software device")
}

// ---------------------------------------------------------------------------
// ResourceOptions codec
// ---------------------------------------------------------------------------

fn bench_resource_options_encode(c: &mut Criterion) {
    c.bench_function("resource_options_encode_all", |b| {
        b.iter(|| {
            for cache in CpuCacheMode::ALL {
                for storage in StorageMode::ALL {
                    for hazard in HazardTrackingMode::ALL {
                        black_box(ResourceOptions::encode(
                            black_box(cache),
                            black_box(storage),
                            black_box(hazard),
                        ));
                    }
                }
            }
        });
    });
}

fn bench_resource_options_decode(c: &mut Criterion) {
    let options = ResourceOptions::encode(
        CpuCacheMode::WriteCombined,
        StorageMode::Managed,
        HazardTrackingMode::Tracked,
    );
    c.bench_function("resource_options_decode", |b| {
        b.iter(|| black_box(black_box(options).decode()));
    });
}

fn bench_resource_options_from_bits(c: &mut Criterion) {
    c.bench_function("resource_options_from_bits_u16", |b| {
        b.iter(|| {
            for bits in 0..=u16::MAX {
                black_box(ResourceOptions::from_bits(black_box(bits)));
            }
        });
    });
}

// ---------------------------------------------------------------------------
// Command submission
// ---------------------------------------------------------------------------

fn bench_empty_command_buffer(c: &mut Criterion) {
    let device = software_device();
    let queue = device.new_command_queue().expect("queue");
    c.bench_function("commit_wait_empty", |b| {
        b.iter(|| {
            let command_buffer = queue.new_command_buffer();
            command_buffer.commit();
            command_buffer.wait_until_completed();
        });
    });
}

fn bench_compute_round_trip(c: &mut Criterion) {
    const COUNT: usize = 4096;

    let device = software_device();
    let queue = device.new_command_queue().expect("queue");
    let library = device
        .new_library_with_source(SOURCE, &CompileOptions::default())
        .expect("library");
    let pipeline = device
        .new_compute_pipeline_state(&library.function_named("add_arrays").expect("function"))
        .expect("pipeline");

    let input: Vec<f32> = (0..COUNT).map(|i| i as f32).collect();
    let a = device
        .new_buffer_with_bytes(bytemuck::cast_slice(&input), ResourceOptions::STORAGE_MODE_SHARED)
        .expect("buffer");
    let b_buffer = device
        .new_buffer_with_bytes(bytemuck::cast_slice(&input), ResourceOptions::STORAGE_MODE_SHARED)
        .expect("buffer");
    let result = device
        .new_buffer_with_length(COUNT * 4, ResourceOptions::STORAGE_MODE_SHARED)
        .expect("buffer");
    let width = pipeline.max_total_threads_per_threadgroup().min(64);

    c.bench_function("compute_add_arrays_4096", |b| {
        b.iter(|| {
            let command_buffer = queue.new_command_buffer();
            let mut encoder = command_buffer.new_compute_command_encoder();
            encoder.set_compute_pipeline_state(&pipeline);
            encoder.set_buffer(&a, 0, 0);
            encoder.set_buffer(&b_buffer, 0, 1);
            encoder.set_buffer(&result, 0, 2);
            encoder.dispatch_threads(Size::new_1d(COUNT as u32), Size::new_1d(width));
            encoder.end_encoding();
            command_buffer.commit();
            command_buffer.wait_until_completed();
        });
    });
}

criterion_group!(
    benches,
    bench_resource_options_encode,
    bench_resource_options_decode,
    bench_resource_options_from_bits,
    bench_empty_command_buffer,
    bench_compute_round_trip,
);
criterion_main!(benches);
