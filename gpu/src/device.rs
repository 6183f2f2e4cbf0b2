//! GPU device.
//!
//! The [`Device`] is the factory and capability root: it creates command
//! queues, resources, libraries and pipeline states. Devices are created by
//! [`Instance::create_device`](crate::Instance::create_device) or the
//! [`create_system_default_device`](crate::create_system_default_device)
//! shortcut.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::backend::GpuBackend;
use crate::command::{CommandQueue, MAX_BUFFER_BINDINGS, MAX_COLOR_ATTACHMENTS};
use crate::error::GpuError;
use crate::instance::AdapterInfo;
use crate::pipeline::{ComputePipelineState, RenderPipelineDescriptor, RenderPipelineState};
use crate::resources::memory::HostMemory;
use crate::resources::{Buffer, Texture};
use crate::shader::{CompileOptions, Function, FunctionType, Library};
use crate::types::{ResourceOptions, StorageMode, TextureDescriptor, TextureType, TextureUsage};

/// A GPU feature set.
///
/// Codes match Metal's `MTLGPUFamily` raw values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum GpuFamily {
    Apple1 = 1001,
    Apple2 = 1002,
    Apple3 = 1003,
    Apple4 = 1004,
    Apple5 = 1005,
    Apple6 = 1006,
    Apple7 = 1007,
    Apple8 = 1008,
    Mac2 = 2002,
    Common1 = 3001,
    Common2 = 3002,
    Common3 = 3003,
    Metal3 = 5001,
}

impl GpuFamily {
    pub const ALL: [Self; 13] = [
        Self::Apple1,
        Self::Apple2,
        Self::Apple3,
        Self::Apple4,
        Self::Apple5,
        Self::Apple6,
        Self::Apple7,
        Self::Apple8,
        Self::Mac2,
        Self::Common1,
        Self::Common2,
        Self::Common3,
        Self::Metal3,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.code() == code)
    }
}

impl fmt::Display for GpuFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity and placement of a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    /// The device drives no display.
    pub headless: bool,
    pub low_power: bool,
    pub removable: bool,
    /// CPU and GPU share one memory pool.
    pub unified_memory: bool,
}

/// Numeric limits of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceLimits {
    /// Upper bound on `width * height * depth` of a threadgroup.
    pub max_threads_per_threadgroup: u32,
    /// SIMD width reported for compute pipelines.
    pub thread_execution_width: u32,
    pub max_buffer_length: usize,
    pub max_texture_dimension_2d: u32,
    pub max_texture_dimension_3d: u32,
    pub max_texture_array_layers: u32,
    /// Buffer slots per shader stage.
    pub max_buffer_bindings: usize,
    /// Largest `set_bytes` / `set_vertex_bytes` payload.
    pub max_inline_bytes: usize,
    pub max_color_attachments: usize,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_threads_per_threadgroup: 1024,
            thread_execution_width: 32,
            max_buffer_length: 1 << 30, // 1 GB
            max_texture_dimension_2d: 16384,
            max_texture_dimension_3d: 2048,
            max_texture_array_layers: 2048,
            max_buffer_bindings: MAX_BUFFER_BINDINGS,
            max_inline_bytes: 4096,
            max_color_attachments: MAX_COLOR_ATTACHMENTS,
        }
    }
}

/// What a device can do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub families: Vec<GpuFamily>,
    pub limits: DeviceLimits,
    pub storage_modes: Vec<StorageMode>,
}

/// A GPU device for creating queues, resources and pipelines.
///
/// # Thread Safety
///
/// `Device` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let device = redlilium_gpu::create_system_default_device()?;
/// let queue = device.new_command_queue()?;
/// let buffer = device.new_buffer_with_length(1024, ResourceOptions::STORAGE_MODE_SHARED)?;
/// ```
pub struct Device {
    adapter: AdapterInfo,
    info: DeviceInfo,
    capabilities: DeviceCapabilities,
    registry_id: u64,
    backend: Arc<dyn GpuBackend>,
    // Track allocated resources (weak references for accounting)
    buffers: RwLock<Vec<Weak<Buffer>>>,
    textures: RwLock<Vec<Weak<Texture>>>,
}

impl Device {
    /// Create a new device (called by Instance).
    pub(crate) fn new(adapter: AdapterInfo, backend: Arc<dyn GpuBackend>) -> Self {
        static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            adapter,
            info: backend.device_info(),
            capabilities: backend.capabilities(),
            registry_id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            backend,
            buffers: RwLock::new(Vec::new()),
            textures: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn backend(&self) -> &Arc<dyn GpuBackend> {
        &self.backend
    }

    /// The adapter this device was created on.
    pub fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn is_headless(&self) -> bool {
        self.info.headless
    }

    pub fn is_low_power(&self) -> bool {
        self.info.low_power
    }

    pub fn is_removable(&self) -> bool {
        self.info.removable
    }

    pub fn has_unified_memory(&self) -> bool {
        self.info.unified_memory
    }

    /// Process-unique identifier of this device.
    pub fn registry_id(&self) -> u64 {
        self.registry_id
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.capabilities.limits
    }

    pub fn supports_family(&self, family: GpuFamily) -> bool {
        self.capabilities.families.contains(&family)
    }

    pub fn supports_storage_mode(&self, mode: StorageMode) -> bool {
        self.capabilities.storage_modes.contains(&mode)
    }

    /// Bytes held by live buffers and textures created by this device.
    pub fn current_allocated_size(&self) -> usize {
        let buffers: usize = self
            .buffers
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|buffer| buffer.length())
            .sum();
        let textures: usize = self
            .textures
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|texture| {
                texture
                    .subresources()
                    .read()
                    .iter()
                    .map(HostMemory::len)
                    .sum::<usize>()
            })
            .sum();
        buffers + textures
    }

    /// Create a command queue with its own worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Internal`] if the worker thread cannot be started.
    pub fn new_command_queue(self: &Arc<Self>) -> Result<CommandQueue, GpuError> {
        CommandQueue::new(Arc::clone(self))
    }

    /// Create a zero-filled buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is zero or exceeds device limits, or
    /// the device cannot provide the requested storage mode.
    pub fn new_buffer_with_length(
        self: &Arc<Self>,
        length: usize,
        options: ResourceOptions,
    ) -> Result<Arc<Buffer>, GpuError> {
        self.validate_buffer(length, options)?;
        self.create_buffer(HostMemory::zeroed(length), options)
    }

    /// Create a buffer holding a copy of `bytes`.
    ///
    /// The copy is complete when this returns; later changes to `bytes` do
    /// not affect the buffer.
    pub fn new_buffer_with_bytes(
        self: &Arc<Self>,
        bytes: &[u8],
        options: ResourceOptions,
    ) -> Result<Arc<Buffer>, GpuError> {
        self.validate_buffer(bytes.len(), options)?;
        self.create_buffer(HostMemory::from_bytes(bytes), options)
    }

    /// Checks run before any host memory is allocated.
    fn validate_buffer(&self, length: usize, options: ResourceOptions) -> Result<(), GpuError> {
        let limits = self.limits();
        if length == 0 {
            return Err(GpuError::InvalidParameter(
                "buffer length cannot be zero".to_string(),
            ));
        }
        if length > limits.max_buffer_length {
            return Err(GpuError::InvalidParameter(format!(
                "buffer length {length} exceeds maximum {}",
                limits.max_buffer_length
            )));
        }
        let mode = options.storage_mode();
        if mode == StorageMode::Memoryless {
            return Err(GpuError::FeatureNotSupported(
                "memoryless storage is only available for render target textures".to_string(),
            ));
        }
        self.check_storage_mode(mode)
    }

    fn create_buffer(
        self: &Arc<Self>,
        memory: HostMemory,
        options: ResourceOptions,
    ) -> Result<Arc<Buffer>, GpuError> {
        let length = memory.len();
        let gpu = self.backend.create_buffer(length, options)?;
        let buffer = Arc::new(Buffer::new(self, memory, options, gpu));

        // Track it
        let mut buffers = self.buffers.write();
        buffers.retain(|weak| weak.strong_count() > 0);
        buffers.push(Arc::downgrade(&buffer));

        log::trace!(
            "Device: created buffer {}, length={}, options={:?}",
            crate::resources::Resource::resource_id(buffer.as_ref()),
            length,
            options
        );

        Ok(buffer)
    }

    /// Create a texture.
    ///
    /// # Errors
    ///
    /// Returns an error if the descriptor is inconsistent, exceeds device
    /// limits, or asks for a storage mode the device cannot provide.
    pub fn new_texture(
        self: &Arc<Self>,
        descriptor: &TextureDescriptor,
    ) -> Result<Arc<Texture>, GpuError> {
        self.validate_texture_descriptor(descriptor)?;

        let gpu = self.backend.create_texture(descriptor)?;
        let texture = Arc::new(Texture::new(self, descriptor.clone(), gpu));

        let mut textures = self.textures.write();
        textures.retain(|weak| weak.strong_count() > 0);
        textures.push(Arc::downgrade(&texture));

        log::trace!(
            "Device: created texture {:?} {}x{}x{}, format={:?}, storage={}",
            descriptor.label,
            descriptor.width,
            descriptor.height,
            descriptor.depth,
            descriptor.pixel_format,
            descriptor.storage_mode()
        );

        Ok(texture)
    }

    fn validate_texture_descriptor(&self, descriptor: &TextureDescriptor) -> Result<(), GpuError> {
        let limits = self.limits();
        let invalid = |msg: String| Err(GpuError::InvalidParameter(msg));

        if descriptor.pixel_format.bytes_per_pixel() == 0 {
            return invalid("texture pixel format is invalid".to_string());
        }
        if descriptor.width == 0 || descriptor.height == 0 || descriptor.depth == 0 {
            return invalid(format!(
                "texture dimensions {}x{}x{} must be non-zero",
                descriptor.width, descriptor.height, descriptor.depth
            ));
        }
        let max_dimension = match descriptor.texture_type {
            TextureType::D3 => limits.max_texture_dimension_3d,
            TextureType::D2 | TextureType::D2Array => limits.max_texture_dimension_2d,
        };
        if descriptor.width.max(descriptor.height).max(descriptor.depth) > max_dimension {
            return invalid(format!(
                "texture dimensions {}x{}x{} exceed maximum {max_dimension}",
                descriptor.width, descriptor.height, descriptor.depth
            ));
        }
        if descriptor.texture_type != TextureType::D3 && descriptor.depth != 1 {
            return invalid("only 3D textures may have depth greater than one".to_string());
        }
        if descriptor.array_length == 0
            || (descriptor.texture_type != TextureType::D2Array && descriptor.array_length != 1)
        {
            return invalid(format!(
                "array length {} is invalid for {:?} textures",
                descriptor.array_length, descriptor.texture_type
            ));
        }
        if descriptor.array_length > limits.max_texture_array_layers {
            return invalid(format!(
                "array length {} exceeds maximum {}",
                descriptor.array_length, limits.max_texture_array_layers
            ));
        }
        if descriptor.mipmap_level_count == 0
            || descriptor.mipmap_level_count > descriptor.max_mipmap_level_count()
        {
            return invalid(format!(
                "mipmap level count {} is invalid (maximum {})",
                descriptor.mipmap_level_count,
                descriptor.max_mipmap_level_count()
            ));
        }

        let mode = descriptor.storage_mode();
        if mode == StorageMode::Memoryless && descriptor.usage != TextureUsage::RENDER_TARGET {
            return Err(GpuError::FeatureNotSupported(
                "memoryless textures may only be used as render targets".to_string(),
            ));
        }
        self.check_storage_mode(mode)
    }

    fn check_storage_mode(&self, mode: StorageMode) -> Result<(), GpuError> {
        if self.supports_storage_mode(mode) {
            Ok(())
        } else {
            Err(GpuError::FeatureNotSupported(format!(
                "{mode} storage is not available on {}",
                self.name()
            )))
        }
    }

    /// Compile a library from WGSL source.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::ShaderCompilationFailed`] with the compiler's
    /// diagnostics if the source does not parse or validate.
    pub fn new_library_with_source(
        &self,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Library, GpuError> {
        Library::compile(self.registry_id, source, options)
    }

    /// Create a compute pipeline state from a kernel function.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::PipelineCreationFailed`] if the function is not
    /// a kernel, belongs to another device, or the backend rejects it.
    pub fn new_compute_pipeline_state(
        self: &Arc<Self>,
        function: &Function,
    ) -> Result<Arc<ComputePipelineState>, GpuError> {
        self.check_function(function, FunctionType::Kernel, "compute")?;
        let gpu = self.backend.create_compute_pipeline(function)?;
        let state = ComputePipelineState::new(self, function, gpu);
        log::trace!(
            "Device: created compute pipeline for {}, max threads per threadgroup={}",
            function.name(),
            state.max_total_threads_per_threadgroup()
        );
        Ok(Arc::new(state))
    }

    /// Create a render pipeline state.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::PipelineCreationFailed`] if a function has the
    /// wrong type, an attachment format cannot be rendered to, or the
    /// backend rejects the combination.
    pub fn new_render_pipeline_state(
        self: &Arc<Self>,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<Arc<RenderPipelineState>, GpuError> {
        let vertex = descriptor.vertex_function.as_ref().ok_or_else(|| {
            GpuError::PipelineCreationFailed("vertex function is not set".to_string())
        })?;
        self.check_function(vertex, FunctionType::Vertex, "vertex")?;
        if let Some(fragment) = &descriptor.fragment_function {
            self.check_function(fragment, FunctionType::Fragment, "fragment")?;
        }

        let max_attachments = self.limits().max_color_attachments;
        for (index, attachment) in descriptor.color_attachments.iter().enumerate() {
            let format = attachment.pixel_format;
            if format == crate::types::PixelFormat::Invalid {
                continue;
            }
            if index >= max_attachments {
                return Err(GpuError::PipelineCreationFailed(format!(
                    "color attachment {index} exceeds the device maximum of {max_attachments}"
                )));
            }
            if !format.is_color_renderable() {
                return Err(GpuError::PipelineCreationFailed(format!(
                    "color attachment {index} has invalid pixel format {format:?}"
                )));
            }
        }
        if descriptor.fragment_function.is_some()
            && descriptor.color_attachments[0].pixel_format == crate::types::PixelFormat::Invalid
        {
            return Err(GpuError::PipelineCreationFailed(
                "color attachment 0 has no pixel format but a fragment function writes to it"
                    .to_string(),
            ));
        }

        let gpu = self.backend.create_render_pipeline(descriptor)?;
        log::trace!(
            "Device: created render pipeline {:?} ({} -> {:?})",
            descriptor.label,
            vertex.name(),
            descriptor.fragment_function.as_ref().map(Function::name)
        );
        Ok(Arc::new(RenderPipelineState::new(
            self, descriptor, vertex, gpu,
        )))
    }

    fn check_function(
        &self,
        function: &Function,
        expected: FunctionType,
        role: &str,
    ) -> Result<(), GpuError> {
        if function.device_id() != self.registry_id {
            return Err(GpuError::PipelineCreationFailed(format!(
                "function {} was compiled by a different device",
                function.name()
            )));
        }
        if function.function_type() != expected {
            return Err(GpuError::PipelineCreationFailed(format!(
                "{role} function {} is a {} function, expected a {expected} function",
                function.name(),
                function.function_type()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.info.name)
            .field("backend", &self.backend.name())
            .field("registry_id", &self.registry_id)
            .finish()
    }
}

// Ensure Device is Send + Sync
static_assertions::assert_impl_all!(Device: Send, Sync);
