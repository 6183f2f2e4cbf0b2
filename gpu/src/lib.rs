//! # RedLilium GPU
//!
//! Host-side GPU command submission: devices, resources, pipeline states,
//! command queues, command buffers and encoders.
//!
//! ## Overview
//!
//! This crate provides:
//! - [`Device`] - Factory for queues, resources, libraries and pipeline states
//! - [`CommandQueue`] / [`CommandBuffer`] - Ordered asynchronous submission
//! - [`ComputeCommandEncoder`], [`RenderCommandEncoder`], [`BlitCommandEncoder`] -
//!   Per-pass recording with a strict begin/end protocol
//! - [`ResourceOptions`] - Packed cache, storage and hazard tracking modes
//! - Backends: a CPU software backend that is always available, and wgpu
//!   behind the `wgpu-backend` feature
//!
//! ## Example
//!
//! ```ignore
//! use redlilium_gpu::{ResourceOptions, Size};
//!
//! let device = redlilium_gpu::create_system_default_device()?;
//! let library = device.new_library_with_source(SOURCE, &Default::default())?;
//! let pipeline = device.new_compute_pipeline_state(&library.function_named("add_arrays")?)?;
//! let result = device.new_buffer_with_length(16, ResourceOptions::STORAGE_MODE_SHARED)?;
//!
//! let queue = device.new_command_queue()?;
//! let command_buffer = queue.new_command_buffer();
//! let mut encoder = command_buffer.new_compute_command_encoder();
//! encoder.set_compute_pipeline_state(&pipeline);
//! encoder.set_buffer(&result, 0, 2);
//! encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(4));
//! encoder.end_encoding();
//! command_buffer.commit();
//! command_buffer.wait_until_completed();
//! ```

pub mod backend;
pub mod command;
pub mod device;
pub mod error;
pub mod instance;
pub mod pipeline;
pub mod resources;
pub mod shader;
pub mod types;

pub use backend::has_gpu_backend;
pub use backend::software::{
    ComputeContext, FragmentContext, NativeFunctions, ShaderResources, SoftwareConfig,
    VertexContext, VertexOutput,
};
pub use command::{
    BlitCommandEncoder, CommandBuffer, CommandBufferStatus, CommandQueue, ComputeCommandEncoder,
    MAX_BUFFER_BINDINGS, MAX_COLOR_ATTACHMENTS, RenderCommandEncoder, RenderPassColorAttachment,
    RenderPassDescriptor,
};
pub use device::{Device, DeviceCapabilities, DeviceInfo, DeviceLimits, GpuFamily};
pub use error::GpuError;
pub use instance::{
    AdapterInfo, AdapterType, BackendType, Instance, InstanceParameters, copy_all_devices,
    create_system_default_device,
};
pub use pipeline::{
    ComputePipelineState, RenderPipelineColorAttachment, RenderPipelineDescriptor,
    RenderPipelineState,
};
pub use resources::{AnyResource, Buffer, BufferContents, Resource, ResourceId, Texture};
pub use shader::{
    BindingKind, CompileOptions, Function, FunctionBinding, FunctionType, LanguageVersion, Library,
};
pub use types::{
    ClearColor, CpuCacheMode, HazardTrackingMode, LoadAction, Origin, PixelFormat, PrimitiveType,
    Region, ResourceOptions, Size, StorageMode, StoreAction, TextureDescriptor, TextureType,
    TextureUsage,
};

/// GPU library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_gpu_backend_flag_matches_features() {
        assert_eq!(has_gpu_backend(), cfg!(feature = "wgpu-backend"));
    }
}
