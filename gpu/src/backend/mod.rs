//! GPU backend abstraction layer.
//!
//! The frontend (device, resources, encoders) records work into
//! [`EncodedPass`] lists; a backend turns those into real execution.
//!
//! # Available Backends
//!
//! - `software` (always compiled): executes on the CPU, running kernels and
//!   shader stages as registered native Rust functions
//! - `wgpu-backend`: cross-platform hardware backend using wgpu
//!
//! # Architecture
//!
//! Each backend implements the [`GpuBackend`] trait, which provides:
//! - Device identity and capabilities
//! - Resource and pipeline creation
//! - Execution of a committed command buffer's passes

pub(crate) mod software;

#[cfg(feature = "wgpu-backend")]
pub(crate) mod wgpu_backend;

use std::sync::Arc;

use crate::command::EncodedPass;
use crate::device::{DeviceCapabilities, DeviceInfo};
use crate::error::GpuError;
use crate::pipeline::RenderPipelineDescriptor;
use crate::shader::Function;
use crate::types::{ResourceOptions, TextureDescriptor};

use software::native::{FragmentFn, KernelFn, VertexFn};

/// Handle to a backend buffer allocation.
pub(crate) enum GpuBuffer {
    /// Software backend (host memory is the allocation)
    Software,
    /// wgpu backend buffer
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Buffer>),
}

impl std::fmt::Debug for GpuBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "GpuBuffer::Software"),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(buffer) => f.debug_tuple("GpuBuffer::Wgpu").field(buffer).finish(),
        }
    }
}

/// Handle to a backend texture allocation.
pub(crate) enum GpuTexture {
    /// Software backend (host memory is the allocation)
    Software,
    /// wgpu backend texture
    #[cfg(feature = "wgpu-backend")]
    Wgpu(Arc<wgpu::Texture>),
}

impl std::fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Software => write!(f, "GpuTexture::Software"),
            #[cfg(feature = "wgpu-backend")]
            Self::Wgpu(texture) => f.debug_tuple("GpuTexture::Wgpu").field(texture).finish(),
        }
    }
}

/// Backend form of a compute pipeline.
pub(crate) enum GpuComputePipeline {
    /// Native kernel run once per thread
    Software(Arc<KernelFn>),
    /// wgpu compute pipeline and the kernel's declared workgroup size
    #[cfg(feature = "wgpu-backend")]
    Wgpu {
        pipeline: Arc<wgpu::ComputePipeline>,
        workgroup_size: [u32; 3],
    },
}

/// Backend form of a render pipeline.
pub(crate) enum GpuRenderPipeline {
    /// Native vertex and fragment stages
    Software {
        vertex: Arc<VertexFn>,
        fragment: Option<Arc<FragmentFn>>,
    },
    /// wgpu pipelines, built per primitive topology on first use
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu_backend::WgpuRenderPipeline),
}

/// GPU backend trait for abstracting different execution engines.
pub(crate) trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Identity of the device this backend drives.
    fn device_info(&self) -> DeviceInfo;

    /// Families, limits and storage modes the device supports.
    fn capabilities(&self) -> DeviceCapabilities;

    /// Create a buffer allocation of `length` bytes.
    fn create_buffer(
        &self,
        length: usize,
        options: ResourceOptions,
    ) -> Result<GpuBuffer, GpuError>;

    /// Create a texture allocation.
    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GpuError>;

    /// Make a kernel function executable.
    fn create_compute_pipeline(&self, function: &Function) -> Result<GpuComputePipeline, GpuError>;

    /// Make a vertex/fragment pair executable.
    fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, GpuError>;

    /// Execute the passes of one command buffer, in order, and block until
    /// their effects are visible in every resource's host copy that the
    /// storage mode makes visible.
    fn execute(&self, passes: &[EncodedPass]) -> Result<(), GpuError>;
}

/// Check if a hardware GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "wgpu-backend")
}
