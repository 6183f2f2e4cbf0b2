//! Software backend.
//!
//! Executes command buffers on the CPU against each resource's host memory.
//! Shader stages run as native Rust closures looked up by entry-point name
//! in the [`NativeFunctions`] registry of the [`SoftwareConfig`]. The backend
//! is always available and is the fallback when no hardware adapter exists.

mod bindings;
mod blit;
mod compute;
mod format;
pub(crate) mod native;
mod raster;

pub use bindings::ShaderResources;
pub use native::{
    ComputeContext, FragmentContext, NativeFunctions, VertexContext, VertexOutput,
};

use crate::command::EncodedPass;
use crate::device::{DeviceCapabilities, DeviceInfo, DeviceLimits, GpuFamily};
use crate::error::GpuError;
use crate::pipeline::RenderPipelineDescriptor;
use crate::shader::Function;
use crate::types::{ResourceOptions, StorageMode, TextureDescriptor};

use super::{GpuBackend, GpuBuffer, GpuComputePipeline, GpuRenderPipeline, GpuTexture};

/// Configuration of the software device.
///
/// # Example
///
/// ```ignore
/// let config = SoftwareConfig::default()
///     .with_name("Test Device")
///     .with_native_functions(functions);
/// let instance = Instance::new(InstanceParameters::new()
///     .with_backend(BackendType::Software)
///     .with_software_config(config))?;
/// ```
#[derive(Debug, Clone)]
pub struct SoftwareConfig {
    pub name: String,
    pub max_threads_per_threadgroup: u32,
    pub families: Vec<GpuFamily>,
    pub storage_modes: Vec<StorageMode>,
    pub headless: bool,
    pub low_power: bool,
    pub removable: bool,
    pub native_functions: NativeFunctions,
}

impl Default for SoftwareConfig {
    fn default() -> Self {
        Self {
            name: "RedLilium Software Device".to_string(),
            max_threads_per_threadgroup: 1024,
            families: vec![
                GpuFamily::Apple7,
                GpuFamily::Mac2,
                GpuFamily::Common1,
                GpuFamily::Common2,
                GpuFamily::Common3,
                GpuFamily::Metal3,
            ],
            storage_modes: StorageMode::ALL.to_vec(),
            headless: true,
            low_power: false,
            removable: false,
            native_functions: NativeFunctions::default(),
        }
    }
}

impl SoftwareConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_threads_per_threadgroup(mut self, max: u32) -> Self {
        self.max_threads_per_threadgroup = max;
        self
    }

    pub fn with_families(mut self, families: Vec<GpuFamily>) -> Self {
        self.families = families;
        self
    }

    pub fn with_storage_modes(mut self, modes: Vec<StorageMode>) -> Self {
        self.storage_modes = modes;
        self
    }

    pub fn with_low_power(mut self, low_power: bool) -> Self {
        self.low_power = low_power;
        self
    }

    pub fn with_removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }

    pub fn with_native_functions(mut self, functions: NativeFunctions) -> Self {
        self.native_functions = functions;
        self
    }
}

/// CPU execution backend.
#[derive(Debug)]
pub(crate) struct SoftwareBackend {
    config: SoftwareConfig,
}

impl SoftwareBackend {
    pub(crate) fn new(config: SoftwareConfig) -> Self {
        log::info!(
            "SoftwareBackend: {} ({} native functions)",
            config.name,
            config.native_functions.len()
        );
        Self { config }
    }
}

impl GpuBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.config.name.clone(),
            headless: self.config.headless,
            low_power: self.config.low_power,
            removable: self.config.removable,
            unified_memory: true,
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities {
            families: self.config.families.clone(),
            limits: DeviceLimits {
                max_threads_per_threadgroup: self.config.max_threads_per_threadgroup,
                ..DeviceLimits::default()
            },
            storage_modes: self.config.storage_modes.clone(),
        }
    }

    fn create_buffer(
        &self,
        length: usize,
        options: ResourceOptions,
    ) -> Result<GpuBuffer, GpuError> {
        log::trace!("SoftwareBackend: creating buffer ({length} bytes, {options:?})");
        Ok(GpuBuffer::Software)
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GpuError> {
        log::trace!(
            "SoftwareBackend: creating texture {:?} ({}x{}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth
        );
        Ok(GpuTexture::Software)
    }

    fn create_compute_pipeline(&self, function: &Function) -> Result<GpuComputePipeline, GpuError> {
        self.config
            .native_functions
            .kernel(function.name())
            .map(GpuComputePipeline::Software)
            .ok_or_else(|| missing_native("kernel", function))
    }

    fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, GpuError> {
        let functions = &self.config.native_functions;
        let vertex_function = descriptor.vertex_function.as_ref().ok_or_else(|| {
            GpuError::PipelineCreationFailed("vertex function is not set".to_string())
        })?;
        let vertex = functions
            .vertex(vertex_function.name())
            .ok_or_else(|| missing_native("vertex", vertex_function))?;
        let fragment = descriptor
            .fragment_function
            .as_ref()
            .map(|function| {
                functions
                    .fragment(function.name())
                    .ok_or_else(|| missing_native("fragment", function))
            })
            .transpose()?;
        Ok(GpuRenderPipeline::Software { vertex, fragment })
    }

    fn execute(&self, passes: &[EncodedPass]) -> Result<(), GpuError> {
        for pass in passes {
            log::trace!(
                "SoftwareBackend: executing {} pass ({} commands)",
                pass.kind(),
                pass.command_count()
            );
            match pass {
                EncodedPass::Compute(dispatches) => {
                    for dispatch in dispatches {
                        compute::execute_dispatch(dispatch)?;
                    }
                }
                EncodedPass::Render(render_pass) => raster::execute_render_pass(render_pass)?,
                EncodedPass::Blit(commands) => commands.iter().for_each(blit::execute_blit),
            }
        }
        Ok(())
    }
}

fn missing_native(stage: &str, function: &Function) -> GpuError {
    GpuError::PipelineCreationFailed(format!(
        "no native {stage} implementation registered for {:?}",
        function.name()
    ))
}
