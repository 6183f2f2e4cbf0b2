//! Blit command encoder.

use std::ops::Range;
use std::sync::Arc;

use super::buffer::{CommandBuffer, EncoderKind};
use super::pass::{BlitCommand, EncodedPass};
use crate::resources::{AnyResource, Buffer, Resource, Texture};
use crate::types::{Origin, Region, Size, StorageMode};

/// Records copies, fills and synchronization between resources.
///
/// A blit encoder has no pipeline state; every operation is legal as soon as
/// the encoder exists.
pub struct BlitCommandEncoder {
    command_buffer: Option<CommandBuffer>,
    device_id: u64,
    commands: Vec<BlitCommand>,
}

impl BlitCommandEncoder {
    pub(super) fn new(command_buffer: CommandBuffer) -> Self {
        Self {
            device_id: command_buffer.device_id(),
            command_buffer: Some(command_buffer),
            commands: Vec::new(),
        }
    }

    /// Copy `source_size` texels from one texture subresource to another.
    ///
    /// # Panics
    ///
    /// Panics if the formats differ, either region falls outside its mip
    /// level, a texture is memoryless, or a texture belongs to another
    /// device.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_from_texture(
        &mut self,
        source: &Arc<Texture>,
        source_slice: u32,
        source_level: u32,
        source_origin: Origin,
        source_size: Size,
        destination: &Arc<Texture>,
        destination_slice: u32,
        destination_level: u32,
        destination_origin: Origin,
    ) {
        self.check_texture("source", source);
        self.check_texture("destination", destination);
        assert_eq!(
            source.pixel_format(),
            destination.pixel_format(),
            "copy between textures of different pixel formats"
        );

        let (_, source_layout) = source.subresource(source_level, source_slice);
        let source_region = Region::new(source_origin, source_size);
        assert!(
            source_region.fits_within(source_layout.extent),
            "source region {source_region:?} exceeds level {source_level} extent {:?}",
            source_layout.extent
        );
        let (_, destination_layout) = destination.subresource(destination_level, destination_slice);
        let destination_region = Region::new(destination_origin, source_size);
        assert!(
            destination_region.fits_within(destination_layout.extent),
            "destination region {destination_region:?} exceeds level {destination_level} extent {:?}",
            destination_layout.extent
        );

        log::trace!("BlitCommandEncoder: copy texture {source_region:?} -> {destination_region:?}");
        self.commands.push(BlitCommand::CopyTexture {
            source: Arc::clone(source),
            source_slice,
            source_level,
            source_origin,
            source_size,
            destination: Arc::clone(destination),
            destination_slice,
            destination_level,
            destination_origin,
        });
    }

    /// Copy `size` bytes between buffers.
    ///
    /// # Panics
    ///
    /// Panics if either range falls outside its buffer or a buffer belongs
    /// to another device.
    pub fn copy_from_buffer(
        &mut self,
        source: &Arc<Buffer>,
        source_offset: usize,
        destination: &Arc<Buffer>,
        destination_offset: usize,
        size: usize,
    ) {
        self.check_buffer("source", source, source_offset..source_offset.saturating_add(size));
        self.check_buffer(
            "destination",
            destination,
            destination_offset..destination_offset.saturating_add(size),
        );
        log::trace!("BlitCommandEncoder: copy {size} bytes between buffers");
        self.commands.push(BlitCommand::CopyBuffer {
            source: Arc::clone(source),
            source_offset,
            destination: Arc::clone(destination),
            destination_offset,
            size,
        });
    }

    /// Set every byte of `range` to `value`.
    pub fn fill_buffer(&mut self, buffer: &Arc<Buffer>, range: Range<usize>, value: u8) {
        assert!(range.start <= range.end, "fill range {range:?} is reversed");
        self.check_buffer("fill", buffer, range.clone());
        self.commands.push(BlitCommand::FillBuffer {
            buffer: Arc::clone(buffer),
            range,
            value,
        });
    }

    /// Make GPU writes to a managed resource visible to the CPU once the
    /// command buffer completes. A no-op for other storage modes.
    pub fn synchronize_resource(&mut self, resource: impl Into<AnyResource>) {
        let resource = resource.into();
        let device_id = match &resource {
            AnyResource::Buffer(buffer) => buffer.device_id(),
            AnyResource::Texture(texture) => texture.device_id(),
        };
        assert_eq!(
            device_id, self.device_id,
            "synchronized resource belongs to a different device"
        );
        log::trace!(
            "BlitCommandEncoder: synchronize resource {} ({})",
            resource.resource_id(),
            resource.storage_mode()
        );
        self.commands.push(BlitCommand::Synchronize(resource));
    }

    /// Close the encoder and append its commands to the command buffer.
    pub fn end_encoding(mut self) {
        if let Some(command_buffer) = self.command_buffer.take() {
            let commands = std::mem::take(&mut self.commands);
            command_buffer.end_encoder(EncoderKind::Blit, EncodedPass::Blit(commands));
        }
    }

    fn check_texture(&self, role: &str, texture: &Texture) {
        assert_eq!(
            texture.device_id(),
            self.device_id,
            "{role} texture belongs to a different device"
        );
        assert_ne!(
            texture.storage_mode(),
            StorageMode::Memoryless,
            "{role} texture is memoryless and cannot be copied"
        );
    }

    fn check_buffer(&self, role: &str, buffer: &Buffer, range: Range<usize>) {
        assert_eq!(
            buffer.device_id(),
            self.device_id,
            "{role} buffer belongs to a different device"
        );
        assert!(
            range.end <= buffer.length(),
            "{role} range {range:?} exceeds the buffer length {}",
            buffer.length()
        );
    }
}

impl Drop for BlitCommandEncoder {
    fn drop(&mut self) {
        if self.command_buffer.is_some() {
            log::warn!(
                "BlitCommandEncoder dropped without end_encoding; the command buffer cannot be committed"
            );
        }
    }
}

impl std::fmt::Debug for BlitCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlitCommandEncoder")
            .field("commands", &self.commands.len())
            .finish()
    }
}
