//! Blit encoder and queue ordering integration tests.

mod common;

use std::sync::Arc;

use rstest::rstest;

use common::{Backend, TestContext, read_pixels};
use redlilium_gpu::{
    AnyResource, CommandBufferStatus, Origin, PixelFormat, Region, ResourceOptions, Size,
    StorageMode, TextureDescriptor,
};

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_copy_and_fill_buffer(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let source = ctx.buffer_with(&[1u32, 2, 3, 4], ResourceOptions::STORAGE_MODE_SHARED);
    let destination = ctx.buffer_with_length(32, ResourceOptions::STORAGE_MODE_SHARED);

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.fill_buffer(&destination, 0..32, 0xff);
        encoder.copy_from_buffer(&source, 4, &destination, 8, 8);
        encoder.end_encoding();
    });

    assert_eq!(
        destination.contents().as_slice::<u32>(),
        &[u32::MAX, u32::MAX, 2, 3, u32::MAX, u32::MAX, u32::MAX, u32::MAX]
    );
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_private_buffer_round_trip(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let data: Vec<u32> = (0..64).collect();
    let upload = ctx.buffer_with(&data, ResourceOptions::STORAGE_MODE_SHARED);
    let private = ctx.buffer_with_length(256, ResourceOptions::STORAGE_MODE_PRIVATE);
    let readback = ctx.buffer_with_length(256, ResourceOptions::STORAGE_MODE_SHARED);

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_buffer(&upload, 0, &private, 0, 256);
        encoder.copy_from_buffer(&private, 0, &readback, 0, 256);
        encoder.end_encoding();
    });

    assert_eq!(readback.contents().as_slice::<u32>(), data.as_slice());
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_copy_texture_region(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let descriptor = TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 4, 4);
    let source = ctx.device.new_texture(&descriptor).unwrap();
    let destination = ctx.device.new_texture(&descriptor).unwrap();

    let pattern: Vec<u8> = (0..64).collect();
    source.replace_region(Region::make_2d(0, 0, 4, 4), 0, &pattern, 16);

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_texture(
            &source,
            0,
            0,
            Origin::new(2, 2, 0),
            Size::new_2d(2, 2),
            &destination,
            0,
            0,
            Origin::new(0, 0, 0),
        );
        encoder.end_encoding();
    });

    let mut copied = [0u8; 16];
    destination.get_bytes(&mut copied, 8, Region::make_2d(0, 0, 2, 2), 0);
    let expected: Vec<u8> = [40u8..48, 56..64].into_iter().flatten().collect();
    assert_eq!(copied.as_slice(), expected.as_slice());

    // Outside the copied region the destination is untouched.
    let pixels = read_pixels(&destination);
    assert!(pixels[8..16].iter().all(|b| *b == 0));
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_copy_between_array_slices(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let texture = ctx
        .device
        .new_texture(&TextureDescriptor::new_2d_array(PixelFormat::R32Uint, 4, 4, 2))
        .unwrap();
    let values: Vec<u32> = (100..116).collect();
    texture.replace_region_in_slice(
        Region::make_2d(0, 0, 4, 4),
        0,
        0,
        bytemuck::cast_slice(&values),
        16,
        64,
    );

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_texture(
            &texture,
            0,
            0,
            Origin::new(0, 0, 0),
            Size::new_2d(4, 4),
            &texture,
            1,
            0,
            Origin::new(0, 0, 0),
        );
        encoder.end_encoding();
    });

    let mut copied = vec![0u8; 64];
    texture.get_bytes_from_slice(&mut copied, 16, 64, Region::make_2d(0, 0, 4, 4), 0, 1);
    assert_eq!(bytemuck::cast_slice::<u8, u32>(&copied), values.as_slice());
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_synchronize_managed_buffer(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    if !ctx.device.supports_storage_mode(StorageMode::Managed) {
        return;
    }

    let source = ctx.buffer_with(&[7u32; 4], ResourceOptions::STORAGE_MODE_SHARED);
    let managed = ctx.buffer_with_length(16, ResourceOptions::STORAGE_MODE_MANAGED);

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_buffer(&source, 0, &managed, 0, 16);
        encoder.synchronize_resource(&managed);
        encoder.end_encoding();
    });

    assert_eq!(managed.contents().as_slice::<u32>(), &[7, 7, 7, 7]);
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_managed_host_edits_reach_the_gpu(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };
    if !ctx.device.supports_storage_mode(StorageMode::Managed) {
        return;
    }

    let managed = ctx.buffer_with_length(16, ResourceOptions::STORAGE_MODE_MANAGED);
    let readback = ctx.buffer_with_length(16, ResourceOptions::STORAGE_MODE_SHARED);
    managed.contents().as_mut_slice::<u32>()[1] = 9;
    managed.did_modify_range(4..8);

    ctx.submit(|command_buffer| {
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_buffer(&managed, 0, &readback, 0, 16);
        encoder.end_encoding();
    });

    assert_eq!(readback.contents().as_slice::<u32>(), &[0, 9, 0, 0]);
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_queue_executes_in_commit_order(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let pipeline = ctx.compute_pipeline("increment");
    let counters = ctx.buffer_with(&[0u32; 4], ResourceOptions::STORAGE_MODE_SHARED);
    let snapshot = ctx.buffer_with_length(16, ResourceOptions::STORAGE_MODE_SHARED);

    // A: increment; B: copy what A produced.
    let first = ctx.queue.new_command_buffer();
    let mut encoder = first.new_compute_command_encoder();
    encoder.set_compute_pipeline_state(&pipeline);
    encoder.set_buffer(&counters, 0, 4);
    encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(1));
    encoder.end_encoding();

    let second = ctx.queue.new_command_buffer();
    let mut blit = second.new_blit_command_encoder();
    blit.copy_from_buffer(&counters, 0, &snapshot, 0, 16);
    blit.end_encoding();

    first.commit();
    second.commit();
    second.wait_until_completed();

    assert_eq!(first.status(), CommandBufferStatus::Completed);
    assert_eq!(second.status(), CommandBufferStatus::Completed);
    assert_eq!(snapshot.contents().as_slice::<u32>(), &[1, 1, 1, 1]);
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_queues_progress_independently(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let other_queue = ctx.device.new_command_queue().unwrap();
    let buffers: Vec<_> = (0..2)
        .map(|_| ctx.buffer_with_length(64, ResourceOptions::STORAGE_MODE_SHARED))
        .collect();

    let command_buffers: Vec<_> = [&ctx.queue, &other_queue]
        .into_iter()
        .zip(&buffers)
        .enumerate()
        .map(|(i, (queue, buffer))| {
            let command_buffer = queue.new_command_buffer();
            let mut encoder = command_buffer.new_blit_command_encoder();
            encoder.fill_buffer(buffer, 0..64, i as u8 + 1);
            encoder.end_encoding();
            command_buffer.commit();
            command_buffer
        })
        .collect();

    for command_buffer in &command_buffers {
        command_buffer.wait_until_completed();
        assert_eq!(command_buffer.status(), CommandBufferStatus::Completed);
    }
    for (i, buffer) in buffers.iter().enumerate() {
        assert!(buffer.contents().iter().all(|b| *b == i as u8 + 1));
    }
}

#[rstest]
#[case::software(Backend::Software)]
#[case::webgpu(Backend::WebGpu)]
fn test_commands_keep_resources_alive(#[case] backend: Backend) {
    let Some(ctx) = TestContext::new(backend) else {
        eprintln!("Backend {:?} not available, skipping", backend);
        return;
    };

    let destination = ctx.buffer_with_length(16, ResourceOptions::STORAGE_MODE_SHARED);
    let command_buffer = ctx.queue.new_command_buffer();
    {
        let source = ctx.buffer_with(&[5u32; 4], ResourceOptions::STORAGE_MODE_SHARED);
        let weak = Arc::downgrade(&source);
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_buffer(&source, 0, &destination, 0, 16);
        encoder.synchronize_resource(AnyResource::Buffer(Arc::clone(&source)));
        encoder.end_encoding();
        drop(source);
        assert!(weak.upgrade().is_some());
    }
    command_buffer.commit();
    command_buffer.wait_until_completed();
    assert_eq!(destination.contents().as_slice::<u32>(), &[5, 5, 5, 5]);
}
