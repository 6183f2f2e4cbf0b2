//! Command queues, command buffers and encoders.
//!
//! Work is recorded on the CPU and executed asynchronously by the queue that
//! issued the command buffer.
//!
//! # Architecture
//!
//! | Layer | Type | Purpose |
//! |-------|------|---------|
//! | Queue | [`CommandQueue`] | FIFO submission, one worker thread per queue |
//! | Buffer | [`CommandBuffer`] | Ordered passes, committed once |
//! | Encoder | [`ComputeCommandEncoder`], [`RenderCommandEncoder`], [`BlitCommandEncoder`] | One pass of one kind |
//!
//! A command buffer has at most one open encoder. Every encoder must be
//! closed with `end_encoding` before the next one is created or the buffer
//! is committed:
//!
//! ```text
//!  new_*_command_encoder        end_encoding              commit
//! ──────────────────────► Open ─────────────► Idle ──────────────► Committed
//!          ▲                                   │
//!          └───────────────────────────────────┘
//! ```
//!
//! After commit the status moves through `Scheduled` to `Completed` or
//! `Error`. Violations of the recording protocol are programming errors and
//! panic.
//!
//! # Example
//!
//! ```ignore
//! let queue = device.new_command_queue()?;
//! let command_buffer = queue.new_command_buffer();
//!
//! let mut encoder = command_buffer.new_compute_command_encoder();
//! encoder.set_compute_pipeline_state(&pipeline);
//! encoder.set_buffer(&a, 0, 0);
//! encoder.set_buffer(&b, 0, 1);
//! encoder.set_buffer(&result, 0, 2);
//! encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(4));
//! encoder.end_encoding();
//!
//! command_buffer.commit();
//! command_buffer.wait_until_completed();
//! ```

mod blit;
mod buffer;
mod compute;
mod pass;
mod queue;
mod render;
mod sync;

pub use blit::BlitCommandEncoder;
pub use buffer::{CommandBuffer, CommandBufferStatus};
pub use compute::ComputeCommandEncoder;
pub use pass::{MAX_BUFFER_BINDINGS, MAX_COLOR_ATTACHMENTS};
pub use queue::CommandQueue;
pub use render::{RenderCommandEncoder, RenderPassColorAttachment, RenderPassDescriptor};

pub(crate) use pass::{
    BindingSlot, BindingTable, BlitCommand, ColorTarget, DispatchCommand, DrawCommand,
    EncodedPass, RenderPass,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::rstest;

    use super::buffer::EncoderKind;
    use super::*;
    use crate::backend::software::{NativeFunctions, SoftwareConfig};
    use crate::device::Device;
    use crate::instance::{BackendType, Instance, InstanceParameters};
    use crate::pipeline::{ComputePipelineState, RenderPipelineDescriptor};
    use crate::shader::CompileOptions;
    use crate::types::{
        ClearColor, LoadAction, PixelFormat, PrimitiveType, ResourceOptions, Size, StorageMode,
        StoreAction, TextureDescriptor, TextureUsage,
    };

    const SOURCE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn increment(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] + 1u;
}

@vertex
fn vertex_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(0.0, 0.0, 0.0, 1.0);
}

@fragment
fn fragment_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

    fn device() -> Arc<Device> {
        let natives = NativeFunctions::new()
            .with_kernel("increment", |ctx| {
                let i = ctx.global_id();
                let value: u32 = ctx.read(0, i);
                ctx.write(0, i, value + 1);
            })
            .with_vertex("vertex_main", |_| {
                crate::backend::software::VertexOutput::new([0.0, 0.0, 0.0, 1.0])
            })
            .with_fragment("fragment_main", |_| [1.0, 0.0, 0.0, 1.0]);
        Instance::new(
            InstanceParameters::new()
                .with_backend(BackendType::Software)
                .with_software_config(SoftwareConfig::default().with_native_functions(natives)),
        )
        .and_then(|instance| instance.create_default_device())
        .expect("software device")
    }

    fn kernel(device: &Arc<Device>) -> Arc<ComputePipelineState> {
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let function = library.function_named("increment").unwrap();
        device.new_compute_pipeline_state(&function).unwrap()
    }

    fn render_target(device: &Arc<Device>) -> Arc<crate::resources::Texture> {
        device
            .new_texture(
                &TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 4, 4)
                    .with_usage(TextureUsage::RENDER_TARGET),
            )
            .unwrap()
    }

    #[test]
    fn test_new_command_buffer_is_not_enqueued() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        assert_eq!(command_buffer.status(), CommandBufferStatus::NotEnqueued);
        assert!(command_buffer.error().is_none());
    }

    #[test]
    fn test_empty_command_buffer_completes() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        command_buffer.commit();
        command_buffer.wait_until_completed();
        assert_eq!(command_buffer.status(), CommandBufferStatus::Completed);
        // A second wait returns immediately.
        command_buffer.wait_until_completed();
    }

    #[test]
    fn test_sequential_encoders_are_allowed() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        command_buffer.new_compute_command_encoder().end_encoding();
        command_buffer.new_blit_command_encoder().end_encoding();
        command_buffer.new_compute_command_encoder().end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();
        assert_eq!(command_buffer.status(), CommandBufferStatus::Completed);
    }

    /// Open an encoder of `kind` and leave it open.
    fn open_encoder(command_buffer: &CommandBuffer, kind: EncoderKind, device: &Arc<Device>) {
        match kind {
            EncoderKind::Compute => std::mem::forget(command_buffer.new_compute_command_encoder()),
            EncoderKind::Blit => std::mem::forget(command_buffer.new_blit_command_encoder()),
            EncoderKind::Render => {
                let target = render_target(device);
                let descriptor = RenderPassDescriptor::new()
                    .with_color_attachment(0, RenderPassColorAttachment::new(&target));
                std::mem::forget(command_buffer.new_render_command_encoder(&descriptor));
            }
        }
    }

    #[rstest]
    #[case::compute_compute(EncoderKind::Compute, EncoderKind::Compute)]
    #[case::compute_render(EncoderKind::Compute, EncoderKind::Render)]
    #[case::compute_blit(EncoderKind::Compute, EncoderKind::Blit)]
    #[case::render_compute(EncoderKind::Render, EncoderKind::Compute)]
    #[case::render_render(EncoderKind::Render, EncoderKind::Render)]
    #[case::render_blit(EncoderKind::Render, EncoderKind::Blit)]
    #[case::blit_compute(EncoderKind::Blit, EncoderKind::Compute)]
    #[case::blit_render(EncoderKind::Blit, EncoderKind::Render)]
    #[case::blit_blit(EncoderKind::Blit, EncoderKind::Blit)]
    #[should_panic(expected = "encoder is open; call end_encoding first")]
    fn test_second_encoder_while_open_panics(
        #[case] first: EncoderKind,
        #[case] second: EncoderKind,
    ) {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        open_encoder(&command_buffer, first, &device);
        open_encoder(&command_buffer, second, &device);
    }

    #[test]
    #[should_panic(expected = "commit called while a blit encoder is open")]
    fn test_commit_with_open_encoder_panics() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let _open = command_buffer.new_blit_command_encoder();
        command_buffer.commit();
    }

    #[test]
    #[should_panic(expected = "command buffer committed twice")]
    fn test_double_commit_panics() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        command_buffer.commit();
        command_buffer.commit();
    }

    #[test]
    #[should_panic(expected = "never committed")]
    fn test_wait_before_commit_panics() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        queue.new_command_buffer().wait_until_completed();
    }

    #[test]
    #[should_panic(expected = "dispatch_threads called before set_compute_pipeline_state")]
    fn test_dispatch_without_pipeline_panics() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(4));
    }

    #[test]
    #[should_panic(expected = "exceeds the pipeline maximum")]
    fn test_oversized_threadgroup_panics() {
        let device = device();
        let pipeline = kernel(&device);
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&pipeline);
        encoder.dispatch_threads(Size::new_1d(4096), Size::new(64, 32, 1));
    }

    #[test]
    #[should_panic(expected = "dispatch grid width overflows")]
    fn test_threadgroup_grid_overflow_panics() {
        let device = device();
        let pipeline = kernel(&device);
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.set_compute_pipeline_state(&pipeline);
        encoder.dispatch_threadgroups(Size::new_1d(8_000_000), Size::new_1d(1024));
    }

    #[test]
    #[should_panic(expected = "buffer index 31 out of range")]
    fn test_buffer_index_out_of_range_panics() {
        let device = device();
        let buffer = device
            .new_buffer_with_length(16, ResourceOptions::default())
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.set_buffer(&buffer, 0, MAX_BUFFER_BINDINGS);
    }

    #[test]
    #[should_panic(expected = "offset 17 exceeds the length 16")]
    fn test_buffer_offset_past_end_panics() {
        let device = device();
        let buffer = device
            .new_buffer_with_length(16, ResourceOptions::default())
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.set_buffer(&buffer, 0, 0);
        encoder.set_buffer_offset(17, 0);
    }

    #[test]
    fn test_buffer_bound_before_pipeline_is_kept() {
        let device = device();
        let pipeline = kernel(&device);
        let data = device
            .new_buffer_with_bytes(
                bytemuck::cast_slice(&[1u32, 2, 3, 4]),
                ResourceOptions::default(),
            )
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_compute_command_encoder();
        encoder.set_buffer(&data, 0, 0);
        encoder.set_compute_pipeline_state(&pipeline);
        encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(4));
        encoder.end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();
        assert_eq!(data.contents().as_slice::<u32>(), &[2, 3, 4, 5]);
    }

    #[test]
    fn test_dropped_encoder_blocks_commit() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        drop(command_buffer.new_compute_command_encoder());
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            command_buffer.commit();
        }));
        assert!(result.is_err());
        assert_eq!(command_buffer.status(), CommandBufferStatus::NotEnqueued);
    }

    #[test]
    fn test_completed_handlers_run_in_order() {
        let device = device();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let (sender, receiver) = std::sync::mpsc::channel();
        for i in 0..3 {
            let sender = sender.clone();
            command_buffer.add_completed_handler(move |cb| {
                sender.send((i, cb.status())).unwrap();
            });
        }
        command_buffer.commit();
        let observed: Vec<_> = (0..3).map(|_| receiver.recv().unwrap()).collect();
        assert_eq!(
            observed,
            vec![
                (0, CommandBufferStatus::Completed),
                (1, CommandBufferStatus::Completed),
                (2, CommandBufferStatus::Completed),
            ]
        );
    }

    #[test]
    #[should_panic(expected = "was not created with RENDER_TARGET usage")]
    fn test_render_pass_requires_render_target_usage() {
        let device = device();
        let texture = device
            .new_texture(
                &TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 4, 4)
                    .with_usage(TextureUsage::SHADER_READ),
            )
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let descriptor = RenderPassDescriptor::new()
            .with_color_attachment(0, RenderPassColorAttachment::new(&texture));
        let _encoder = command_buffer.new_render_command_encoder(&descriptor);
    }

    #[test]
    #[should_panic(expected = "cannot be stored")]
    fn test_memoryless_attachment_cannot_store() {
        let device = device();
        let texture = device
            .new_texture(
                &TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 4, 4)
                    .with_storage_mode(StorageMode::Memoryless)
                    .with_usage(TextureUsage::RENDER_TARGET),
            )
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let descriptor = RenderPassDescriptor::new().with_color_attachment(
            0,
            RenderPassColorAttachment::new(&texture).with_load_action(LoadAction::Clear),
        );
        let _encoder = command_buffer.new_render_command_encoder(&descriptor);
    }

    #[test]
    #[should_panic(expected = "draw_primitives called before set_render_pipeline_state")]
    fn test_draw_without_pipeline_panics() {
        let device = device();
        let target = render_target(&device);
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let descriptor = RenderPassDescriptor::new()
            .with_color_attachment(0, RenderPassColorAttachment::new(&target));
        let mut encoder = command_buffer.new_render_command_encoder(&descriptor);
        encoder.draw_primitives(PrimitiveType::Triangle, 0, 3);
    }

    #[test]
    #[should_panic(expected = "does not match the render pass attachment format")]
    fn test_pipeline_format_mismatch_panics() {
        let device = device();
        let target = render_target(&device);
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let descriptor = RenderPipelineDescriptor::new()
            .with_vertex_function(&library.function_named("vertex_main").unwrap())
            .with_fragment_function(&library.function_named("fragment_main").unwrap())
            .with_color_attachment_format(0, PixelFormat::Rgba8Unorm);
        let pipeline = device.new_render_pipeline_state(&descriptor).unwrap();

        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let pass = RenderPassDescriptor::new()
            .with_color_attachment(0, RenderPassColorAttachment::new(&target));
        let mut encoder = command_buffer.new_render_command_encoder(&pass);
        encoder.set_render_pipeline_state(&pipeline);
    }

    #[test]
    fn test_clear_only_pass_clears() {
        let device = device();
        let target = render_target(&device);
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let descriptor = RenderPassDescriptor::new().with_color_attachment(
            0,
            RenderPassColorAttachment::new(&target)
                .with_load_action(LoadAction::Clear)
                .with_store_action(StoreAction::Store)
                .with_clear_color(ClearColor::new(0.35, 0.65, 0.85, 1.0)),
        );
        command_buffer
            .new_render_command_encoder(&descriptor)
            .end_encoding();
        command_buffer.commit();
        command_buffer.wait_until_completed();

        let mut pixels = vec![0u8; 4 * 4 * 4];
        target.get_bytes(&mut pixels, 16, crate::types::Region::make_2d(0, 0, 4, 4), 0);
        for texel in pixels.chunks_exact(4) {
            assert_eq!(texel, &[217, 166, 89, 255]);
        }
    }

    #[test]
    #[should_panic(expected = "exceeds the buffer length")]
    fn test_copy_from_buffer_out_of_bounds_panics() {
        let device = device();
        let a = device
            .new_buffer_with_length(16, ResourceOptions::default())
            .unwrap();
        let b = device
            .new_buffer_with_length(8, ResourceOptions::default())
            .unwrap();
        let queue = device.new_command_queue().unwrap();
        let command_buffer = queue.new_command_buffer();
        let mut encoder = command_buffer.new_blit_command_encoder();
        encoder.copy_from_buffer(&a, 0, &b, 0, 16);
    }
}
