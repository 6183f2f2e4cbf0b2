//! Recorded command streams.
//!
//! Encoders translate their calls into these plain records; backends consume
//! them after commit. Every record holds strong references to the resources
//! and pipeline states it names, so they stay alive until the command buffer
//! is dropped.

use std::sync::Arc;

use crate::pipeline::{ComputePipelineState, RenderPipelineState};
use crate::resources::{AnyResource, Buffer, Texture};
use crate::types::{ClearColor, LoadAction, Origin, PrimitiveType, Size, StoreAction};

/// Buffer slots per shader stage.
pub const MAX_BUFFER_BINDINGS: usize = 31;

/// Maximum color attachments of a render pass.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

/// What occupies one buffer slot.
#[derive(Debug, Clone)]
pub(crate) enum BindingSlot {
    Buffer { buffer: Arc<Buffer>, offset: usize },
    /// Inline constant data copied at record time.
    Bytes(Arc<[u8]>),
}

/// Buffer slots of one shader stage.
#[derive(Debug, Clone)]
pub(crate) struct BindingTable {
    slots: [Option<BindingSlot>; MAX_BUFFER_BINDINGS],
}

impl Default for BindingTable {
    fn default() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }
}

impl BindingTable {
    #[cfg(test)]
    pub(crate) fn set(&mut self, index: usize, slot: BindingSlot) {
        self.slots[index] = Some(slot);
    }

    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn get(&self, index: usize) -> Option<&BindingSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Bind `buffer` at `offset` to slot `index`, replacing whatever was there.
    ///
    /// # Panics
    ///
    /// Panics if the slot index is out of range, the offset is past the end
    /// of the buffer, or the buffer belongs to another device.
    pub(crate) fn bind_buffer(
        &mut self,
        device_id: u64,
        buffer: &Arc<Buffer>,
        offset: usize,
        index: usize,
    ) {
        check_index(index);
        assert_eq!(
            buffer.device_id(),
            device_id,
            "buffer bound at index {index} belongs to a different device"
        );
        assert!(
            offset <= buffer.length(),
            "offset {offset} exceeds the length {} of the buffer bound at index {index}",
            buffer.length()
        );
        self.slots[index] = Some(BindingSlot::Buffer {
            buffer: Arc::clone(buffer),
            offset,
        });
    }

    /// Copy `bytes` into slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if the slot index is out of range or `bytes` is longer than
    /// `max_len`.
    pub(crate) fn bind_bytes(&mut self, bytes: &[u8], index: usize, max_len: usize) {
        check_index(index);
        assert!(
            bytes.len() <= max_len,
            "{} inline bytes at index {index} exceed the maximum of {max_len}; use a buffer",
            bytes.len()
        );
        self.slots[index] = Some(BindingSlot::Bytes(Arc::from(bytes)));
    }

    /// Change the offset of the buffer already bound at `index`.
    ///
    /// # Panics
    ///
    /// Panics if no buffer is bound at `index` or the offset is past its end.
    pub(crate) fn set_offset(&mut self, offset: usize, index: usize) {
        check_index(index);
        match self.slots[index].as_mut() {
            Some(BindingSlot::Buffer {
                buffer,
                offset: bound,
            }) => {
                assert!(
                    offset <= buffer.length(),
                    "offset {offset} exceeds the length {} of the buffer bound at index {index}",
                    buffer.length()
                );
                *bound = offset;
            }
            _ => panic!("no buffer bound at index {index} to change the offset of"),
        }
    }

    /// Occupied slots in index order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (usize, &BindingSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, slot)))
    }

    /// Every bound buffer, once per slot.
    pub(crate) fn buffers(&self) -> impl Iterator<Item = &Arc<Buffer>> {
        self.iter().filter_map(|(_, slot)| match slot {
            BindingSlot::Buffer { buffer, .. } => Some(buffer),
            BindingSlot::Bytes(_) => None,
        })
    }
}

fn check_index(index: usize) {
    assert!(
        index < MAX_BUFFER_BINDINGS,
        "buffer index {index} out of range (the binding table has {MAX_BUFFER_BINDINGS} slots)"
    );
}

/// One `dispatch_threads` / `dispatch_threadgroups` call.
#[derive(Debug, Clone)]
pub(crate) struct DispatchCommand {
    pub pipeline: Arc<ComputePipelineState>,
    pub bindings: BindingTable,
    pub threads_per_grid: Size,
    pub threads_per_threadgroup: Size,
}

/// One `draw_primitives` call.
#[derive(Debug, Clone)]
pub(crate) struct DrawCommand {
    pub pipeline: Arc<RenderPipelineState>,
    pub vertex_bindings: BindingTable,
    pub fragment_bindings: BindingTable,
    pub primitive_type: PrimitiveType,
    pub vertex_start: usize,
    pub vertex_count: usize,
}

/// A color attachment as resolved when the pass began.
#[derive(Debug, Clone)]
pub(crate) struct ColorTarget {
    pub texture: Arc<Texture>,
    pub level: u32,
    pub slice: u32,
    pub load_action: LoadAction,
    pub store_action: StoreAction,
    pub clear_color: ClearColor,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RenderPass {
    pub color_targets: [Option<ColorTarget>; MAX_COLOR_ATTACHMENTS],
    pub draws: Vec<DrawCommand>,
}

#[derive(Debug, Clone)]
pub(crate) enum BlitCommand {
    CopyTexture {
        source: Arc<Texture>,
        source_slice: u32,
        source_level: u32,
        source_origin: Origin,
        source_size: Size,
        destination: Arc<Texture>,
        destination_slice: u32,
        destination_level: u32,
        destination_origin: Origin,
    },
    CopyBuffer {
        source: Arc<Buffer>,
        source_offset: usize,
        destination: Arc<Buffer>,
        destination_offset: usize,
        size: usize,
    },
    FillBuffer {
        buffer: Arc<Buffer>,
        range: std::ops::Range<usize>,
        value: u8,
    },
    Synchronize(AnyResource),
}

/// One ended encoder's worth of commands.
#[derive(Debug, Clone)]
pub(crate) enum EncodedPass {
    Compute(Vec<DispatchCommand>),
    Render(RenderPass),
    Blit(Vec<BlitCommand>),
}

impl EncodedPass {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Compute(_) => "compute",
            Self::Render(_) => "render",
            Self::Blit(_) => "blit",
        }
    }

    pub(crate) fn command_count(&self) -> usize {
        match self {
            Self::Compute(dispatches) => dispatches.len(),
            Self::Render(pass) => pass.draws.len(),
            Self::Blit(commands) => commands.len(),
        }
    }
}
