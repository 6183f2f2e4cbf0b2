//! Render command encoder and render pass descriptors.

use std::sync::Arc;

use super::buffer::{CommandBuffer, EncoderKind};
use super::pass::{
    BindingTable, ColorTarget, DrawCommand, EncodedPass, MAX_COLOR_ATTACHMENTS, RenderPass,
};
use crate::pipeline::RenderPipelineState;
use crate::resources::{Buffer, Texture};
use crate::types::{
    ClearColor, LoadAction, PixelFormat, PrimitiveType, StorageMode, StoreAction, TextureType,
    TextureUsage,
};

// ============================================================================
// Render Pass Descriptor
// ============================================================================

/// One color attachment of a render pass.
#[derive(Debug, Clone, Default)]
pub struct RenderPassColorAttachment {
    pub texture: Option<Arc<Texture>>,
    pub level: u32,
    pub slice: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: ClearColor,
}

impl RenderPassColorAttachment {
    /// Attachment rendering into mip 0, slice 0 of `texture`, keeping the
    /// result.
    pub fn new(texture: &Arc<Texture>) -> Self {
        Self {
            texture: Some(Arc::clone(texture)),
            store_action: StoreAction::Store,
            ..Self::default()
        }
    }

    pub fn with_load_action(mut self, load_action: LoadAction) -> Self {
        self.load_action = load_action;
        self
    }

    pub fn with_store_action(mut self, store_action: StoreAction) -> Self {
        self.store_action = store_action;
        self
    }

    pub fn with_clear_color(mut self, clear_color: ClearColor) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_slice(mut self, slice: u32) -> Self {
        self.slice = slice;
        self
    }
}

/// Attachments a render pass draws into.
///
/// # Example
///
/// ```ignore
/// let descriptor = RenderPassDescriptor::new().with_color_attachment(
///     0,
///     RenderPassColorAttachment::new(&texture)
///         .with_load_action(LoadAction::Clear)
///         .with_clear_color(ClearColor::new(0.35, 0.65, 0.85, 1.0)),
/// );
/// let encoder = command_buffer.new_render_command_encoder(&descriptor);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub color_attachments: [RenderPassColorAttachment; MAX_COLOR_ATTACHMENTS],
}

impl RenderPassDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Panics
    ///
    /// Panics if `index` is not below [`MAX_COLOR_ATTACHMENTS`].
    pub fn with_color_attachment(
        mut self,
        index: usize,
        attachment: RenderPassColorAttachment,
    ) -> Self {
        assert!(
            index < MAX_COLOR_ATTACHMENTS,
            "color attachment index {index} out of range"
        );
        self.color_attachments[index] = attachment;
        self
    }
}

// ============================================================================
// Render Command Encoder
// ============================================================================

/// Records draws into the attachments of one render pass.
///
/// Load actions apply when the pass begins executing, so a pass that clears
/// and draws nothing still clears. A render pipeline state must be bound
/// before the first draw, and its color formats must match the pass
/// attachments.
pub struct RenderCommandEncoder {
    command_buffer: Option<CommandBuffer>,
    device_id: u64,
    max_inline_bytes: usize,
    pipeline: Option<Arc<RenderPipelineState>>,
    vertex_bindings: BindingTable,
    fragment_bindings: BindingTable,
    pass: RenderPass,
}

impl RenderCommandEncoder {
    pub(super) fn new(command_buffer: CommandBuffer, descriptor: &RenderPassDescriptor) -> Self {
        let device_id = command_buffer.device_id();
        let max_inline_bytes = command_buffer.device().limits().max_inline_bytes;

        let mut pass = RenderPass::default();
        let mut extent = None;
        for (index, attachment) in descriptor.color_attachments.iter().enumerate() {
            let Some(texture) = attachment.texture.as_ref() else {
                continue;
            };
            let target = resolve_target(index, texture, attachment, device_id);
            let size = texture.level_size(target.level);
            let size = (size.width, size.height);
            match extent {
                None => extent = Some(size),
                Some(first) => assert_eq!(
                    first, size,
                    "color attachment {index} is {size:?} but attachment extents must all be {first:?}"
                ),
            }
            pass.color_targets[index] = Some(target);
        }
        log::trace!(
            "RenderCommandEncoder: began pass with {} color attachments",
            pass.color_targets.iter().flatten().count()
        );

        Self {
            command_buffer: Some(command_buffer),
            device_id,
            max_inline_bytes,
            pipeline: None,
            vertex_bindings: BindingTable::default(),
            fragment_bindings: BindingTable::default(),
            pass,
        }
    }

    /// # Panics
    ///
    /// Panics if the pipeline belongs to another device or its color formats
    /// differ from the pass attachments.
    pub fn set_render_pipeline_state(&mut self, pipeline: &Arc<RenderPipelineState>) {
        assert_eq!(
            pipeline.device_id(),
            self.device_id,
            "render pipeline state belongs to a different device"
        );
        for (index, target) in self.pass.color_targets.iter().enumerate() {
            let expected = target
                .as_ref()
                .map_or(PixelFormat::Invalid, |target| target.texture.pixel_format());
            let actual = pipeline.color_attachment_format(index);
            assert_eq!(
                actual, expected,
                "pipeline color attachment {index} format {actual:?} does not match the render pass attachment format {expected:?}"
            );
        }
        log::trace!("RenderCommandEncoder: set pipeline {:?}", pipeline.label());
        self.pipeline = Some(Arc::clone(pipeline));
    }

    /// Bind `buffer` at `offset` to vertex slot `index`.
    pub fn set_vertex_buffer(&mut self, buffer: &Arc<Buffer>, offset: usize, index: usize) {
        self.vertex_bindings
            .bind_buffer(self.device_id, buffer, offset, index);
    }

    pub fn set_vertex_buffer_offset(&mut self, offset: usize, index: usize) {
        self.vertex_bindings.set_offset(offset, index);
    }

    /// Copy a small constant block into vertex slot `index`.
    pub fn set_vertex_bytes(&mut self, bytes: &[u8], index: usize) {
        self.vertex_bindings
            .bind_bytes(bytes, index, self.max_inline_bytes);
    }

    /// Bind `buffer` at `offset` to fragment slot `index`.
    pub fn set_fragment_buffer(&mut self, buffer: &Arc<Buffer>, offset: usize, index: usize) {
        self.fragment_bindings
            .bind_buffer(self.device_id, buffer, offset, index);
    }

    pub fn set_fragment_buffer_offset(&mut self, offset: usize, index: usize) {
        self.fragment_bindings.set_offset(offset, index);
    }

    /// Copy a small constant block into fragment slot `index`.
    pub fn set_fragment_bytes(&mut self, bytes: &[u8], index: usize) {
        self.fragment_bindings
            .bind_bytes(bytes, index, self.max_inline_bytes);
    }

    /// Draw `vertex_count` vertices starting at `vertex_start`.
    ///
    /// Vertices that do not complete a primitive are ignored.
    ///
    /// # Panics
    ///
    /// Panics if no render pipeline state is bound.
    pub fn draw_primitives(
        &mut self,
        primitive_type: PrimitiveType,
        vertex_start: usize,
        vertex_count: usize,
    ) {
        let Some(pipeline) = self.pipeline.as_ref() else {
            panic!("draw_primitives called before set_render_pipeline_state");
        };
        log::trace!(
            "RenderCommandEncoder: draw {primitive_type:?} start={vertex_start} count={vertex_count}"
        );
        self.pass.draws.push(DrawCommand {
            pipeline: Arc::clone(pipeline),
            vertex_bindings: self.vertex_bindings.clone(),
            fragment_bindings: self.fragment_bindings.clone(),
            primitive_type,
            vertex_start,
            vertex_count,
        });
    }

    /// Close the encoder and append the pass to the command buffer.
    pub fn end_encoding(mut self) {
        if let Some(command_buffer) = self.command_buffer.take() {
            let pass = std::mem::take(&mut self.pass);
            command_buffer.end_encoder(EncoderKind::Render, EncodedPass::Render(pass));
        }
    }
}

/// Validate one attachment of a render pass descriptor.
fn resolve_target(
    index: usize,
    texture: &Arc<Texture>,
    attachment: &RenderPassColorAttachment,
    device_id: u64,
) -> ColorTarget {
    assert_eq!(
        texture.device_id(),
        device_id,
        "color attachment {index} belongs to a different device"
    );
    assert!(
        texture.usage().contains(TextureUsage::RENDER_TARGET),
        "color attachment {index} texture was not created with RENDER_TARGET usage"
    );
    assert!(
        texture.pixel_format().is_color_renderable(),
        "color attachment {index} has non-color-renderable format {:?}",
        texture.pixel_format()
    );
    assert_ne!(
        texture.texture_type(),
        TextureType::D3,
        "color attachment {index} is a 3D texture"
    );
    // Range checks on level and slice.
    texture.subresource(attachment.level, attachment.slice);

    if texture.storage_mode() == StorageMode::Memoryless {
        assert_ne!(
            attachment.load_action,
            LoadAction::Load,
            "memoryless color attachment {index} cannot be loaded"
        );
        assert_ne!(
            attachment.store_action,
            StoreAction::Store,
            "memoryless color attachment {index} cannot be stored"
        );
    }

    ColorTarget {
        texture: Arc::clone(texture),
        level: attachment.level,
        slice: attachment.slice,
        load_action: attachment.load_action,
        store_action: attachment.store_action,
        clear_color: attachment.clear_color,
    }
}

impl Drop for RenderCommandEncoder {
    fn drop(&mut self) {
        if self.command_buffer.is_some() {
            log::warn!(
                "RenderCommandEncoder dropped without end_encoding; the command buffer cannot be committed"
            );
        }
    }
}

impl std::fmt::Debug for RenderCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderCommandEncoder")
            .field("pipeline", &self.pipeline.as_ref().and_then(|p| p.label()))
            .field("draws", &self.pass.draws.len())
            .finish()
    }
}
