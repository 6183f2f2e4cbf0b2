use std::sync::Arc;

use crate::backend::GpuRenderPipeline;
use crate::command::MAX_COLOR_ATTACHMENTS;
use crate::device::Device;
use crate::shader::Function;
use crate::types::PixelFormat;

/// Format of one color attachment a render pipeline writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderPipelineColorAttachment {
    /// [`PixelFormat::Invalid`] leaves the attachment unused.
    pub pixel_format: PixelFormat,
}

/// Descriptor for creating a render pipeline state.
///
/// # Example
///
/// ```ignore
/// let descriptor = RenderPipelineDescriptor::new()
///     .with_vertex_function(&library.function_named("vertex_shader")?)
///     .with_fragment_function(&library.function_named("fragment_shader")?)
///     .with_color_attachment_format(0, PixelFormat::Bgra8Unorm);
/// let pipeline = device.new_render_pipeline_state(&descriptor)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RenderPipelineDescriptor {
    pub label: Option<String>,
    pub vertex_function: Option<Function>,
    pub fragment_function: Option<Function>,
    pub color_attachments: [RenderPipelineColorAttachment; MAX_COLOR_ATTACHMENTS],
}

impl RenderPipelineDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_vertex_function(mut self, function: &Function) -> Self {
        self.vertex_function = Some(function.clone());
        self
    }

    pub fn with_fragment_function(mut self, function: &Function) -> Self {
        self.fragment_function = Some(function.clone());
        self
    }

    /// Set the pixel format of color attachment `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below [`MAX_COLOR_ATTACHMENTS`].
    pub fn with_color_attachment_format(mut self, index: usize, format: PixelFormat) -> Self {
        assert!(
            index < MAX_COLOR_ATTACHMENTS,
            "color attachment index {index} out of range"
        );
        self.color_attachments[index].pixel_format = format;
        self
    }
}

/// A vertex/fragment function pair ready to draw with.
pub struct RenderPipelineState {
    device_id: u64,
    label: Option<String>,
    vertex_function: Function,
    fragment_function: Option<Function>,
    color_formats: [PixelFormat; MAX_COLOR_ATTACHMENTS],
    gpu: GpuRenderPipeline,
}

impl RenderPipelineState {
    /// Create a new render pipeline state (called by Device after validation).
    pub(crate) fn new(
        device: &Arc<Device>,
        descriptor: &RenderPipelineDescriptor,
        vertex_function: &Function,
        gpu: GpuRenderPipeline,
    ) -> Self {
        Self {
            device_id: device.registry_id(),
            label: descriptor.label.clone(),
            vertex_function: vertex_function.clone(),
            fragment_function: descriptor.fragment_function.clone(),
            color_formats: descriptor.color_attachments.map(|a| a.pixel_format),
            gpu,
        }
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn vertex_function(&self) -> &Function {
        &self.vertex_function
    }

    pub fn fragment_function(&self) -> Option<&Function> {
        self.fragment_function.as_ref()
    }

    /// Pixel format of color attachment `index`; [`PixelFormat::Invalid`]
    /// when unused.
    pub fn color_attachment_format(&self, index: usize) -> PixelFormat {
        self.color_formats
            .get(index)
            .copied()
            .unwrap_or(PixelFormat::Invalid)
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub(crate) fn gpu(&self) -> &GpuRenderPipeline {
        &self.gpu
    }
}

impl std::fmt::Debug for RenderPipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderPipelineState")
            .field("label", &self.label)
            .field("vertex", &self.vertex_function.name())
            .field("fragment", &self.fragment_function.as_ref().map(Function::name))
            .field("color_formats", &self.color_formats)
            .finish()
    }
}

static_assertions::assert_impl_all!(RenderPipelineState: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::software::{NativeFunctions, SoftwareConfig, VertexOutput};
    use crate::error::GpuError;
    use crate::instance::{BackendType, Instance, InstanceParameters};
    use crate::shader::CompileOptions;

    const SOURCE: &str = r#"
@vertex
fn vertex_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    return vec4<f32>(f32(index), 0.0, 0.0, 1.0);
}

@fragment
fn fragment_main() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}

@compute @workgroup_size(1)
fn kernel_main() {}
"#;

    fn device() -> Arc<Device> {
        let functions = NativeFunctions::new()
            .with_vertex("vertex_main", |ctx| {
                VertexOutput::new([ctx.vertex_id as f32, 0.0, 0.0, 1.0])
            })
            .with_fragment("fragment_main", |_| [1.0, 0.0, 0.0, 1.0])
            .with_kernel("kernel_main", |_| {});
        Instance::new(
            InstanceParameters::new()
                .with_backend(BackendType::Software)
                .with_software_config(SoftwareConfig::default().with_native_functions(functions)),
        )
        .and_then(|instance| instance.create_default_device())
        .expect("software device")
    }

    #[test]
    fn test_render_pipeline_creation() {
        let device = device();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let descriptor = RenderPipelineDescriptor::new()
            .with_label("triangle")
            .with_vertex_function(&library.function_named("vertex_main").unwrap())
            .with_fragment_function(&library.function_named("fragment_main").unwrap())
            .with_color_attachment_format(0, PixelFormat::Bgra8Unorm);
        let pipeline = device.new_render_pipeline_state(&descriptor).unwrap();
        assert_eq!(pipeline.label(), Some("triangle"));
        assert_eq!(pipeline.color_attachment_format(0), PixelFormat::Bgra8Unorm);
        assert_eq!(pipeline.color_attachment_format(1), PixelFormat::Invalid);
        assert_eq!(pipeline.color_attachment_format(99), PixelFormat::Invalid);
    }

    #[test]
    fn test_missing_attachment_format_fails() {
        let device = device();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let descriptor = RenderPipelineDescriptor::new()
            .with_vertex_function(&library.function_named("vertex_main").unwrap())
            .with_fragment_function(&library.function_named("fragment_main").unwrap());
        let err = device.new_render_pipeline_state(&descriptor).unwrap_err();
        assert!(matches!(err, GpuError::PipelineCreationFailed(_)));
    }

    #[test]
    fn test_depth_attachment_is_not_color_renderable() {
        let device = device();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let descriptor = RenderPipelineDescriptor::new()
            .with_vertex_function(&library.function_named("vertex_main").unwrap())
            .with_fragment_function(&library.function_named("fragment_main").unwrap())
            .with_color_attachment_format(0, PixelFormat::Depth32Float);
        assert!(device.new_render_pipeline_state(&descriptor).is_err());
    }

    #[test]
    fn test_stage_mismatch_fails() {
        let device = device();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let kernel = library.function_named("kernel_main").unwrap();
        let descriptor = RenderPipelineDescriptor::new()
            .with_vertex_function(&kernel)
            .with_color_attachment_format(0, PixelFormat::Rgba8Unorm);
        assert!(device.new_render_pipeline_state(&descriptor).is_err());

        let vertex = library.function_named("vertex_main").unwrap();
        assert!(device.new_compute_pipeline_state(&vertex).is_err());
        let pipeline = device.new_compute_pipeline_state(&kernel).unwrap();
        assert_eq!(pipeline.max_total_threads_per_threadgroup(), 1024);
    }

    #[test]
    fn test_missing_native_implementation_fails() {
        let device = Instance::new(InstanceParameters::new().with_backend(BackendType::Software))
            .and_then(|instance| instance.create_default_device())
            .unwrap();
        let library = device
            .new_library_with_source(SOURCE, &CompileOptions::default())
            .unwrap();
        let kernel = library.function_named("kernel_main").unwrap();
        match device.new_compute_pipeline_state(&kernel) {
            Err(GpuError::PipelineCreationFailed(message)) => {
                assert!(message.contains("kernel_main"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }
}
