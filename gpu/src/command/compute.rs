//! Compute command encoder.

use std::sync::Arc;

use super::buffer::{CommandBuffer, EncoderKind};
use super::pass::{BindingTable, DispatchCommand, EncodedPass};
use crate::pipeline::ComputePipelineState;
use crate::resources::Buffer;
use crate::types::Size;

/// Records compute dispatches.
///
/// The encoder starts unbound. Buffers may be bound at any time; a pipeline
/// state must be bound before the first dispatch. Each dispatch captures the
/// bindings as they are at the time of the call.
///
/// Call [`end_encoding`](Self::end_encoding) before opening another encoder
/// or committing.
pub struct ComputeCommandEncoder {
    command_buffer: Option<CommandBuffer>,
    device_id: u64,
    max_inline_bytes: usize,
    pipeline: Option<Arc<ComputePipelineState>>,
    bindings: BindingTable,
    dispatches: Vec<DispatchCommand>,
}

impl ComputeCommandEncoder {
    pub(super) fn new(command_buffer: CommandBuffer) -> Self {
        let device = command_buffer.device();
        Self {
            device_id: device.registry_id(),
            max_inline_bytes: device.limits().max_inline_bytes,
            command_buffer: Some(command_buffer),
            pipeline: None,
            bindings: BindingTable::default(),
            dispatches: Vec::new(),
        }
    }

    /// # Panics
    ///
    /// Panics if the pipeline state was created by another device.
    pub fn set_compute_pipeline_state(&mut self, pipeline: &Arc<ComputePipelineState>) {
        assert_eq!(
            pipeline.device_id(),
            self.device_id,
            "compute pipeline state belongs to a different device"
        );
        log::trace!(
            "ComputeCommandEncoder: set pipeline {}",
            pipeline.function_name()
        );
        self.pipeline = Some(Arc::clone(pipeline));
    }

    /// Bind `buffer`, starting at byte `offset`, to slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not below
    /// [`MAX_BUFFER_BINDINGS`](super::MAX_BUFFER_BINDINGS), `offset` exceeds
    /// the buffer length, or the buffer belongs to another device.
    pub fn set_buffer(&mut self, buffer: &Arc<Buffer>, offset: usize, index: usize) {
        self.bindings.bind_buffer(self.device_id, buffer, offset, index);
    }

    /// Move the offset of the buffer bound at `index`.
    pub fn set_buffer_offset(&mut self, offset: usize, index: usize) {
        self.bindings.set_offset(offset, index);
    }

    /// Copy a small constant block into slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than the device's inline byte limit.
    pub fn set_bytes(&mut self, bytes: &[u8], index: usize) {
        self.bindings.bind_bytes(bytes, index, self.max_inline_bytes);
    }

    /// Run `threads_per_grid` threads in groups of `threads_per_threadgroup`.
    ///
    /// The grid need not be a multiple of the threadgroup size; edge
    /// threadgroups are partially populated.
    ///
    /// # Panics
    ///
    /// Panics if no pipeline state is bound, or the threadgroup is empty or
    /// larger than the pipeline's
    /// [`max_total_threads_per_threadgroup`](ComputePipelineState::max_total_threads_per_threadgroup).
    pub fn dispatch_threads(&mut self, threads_per_grid: Size, threads_per_threadgroup: Size) {
        self.record_dispatch("dispatch_threads", threads_per_grid, threads_per_threadgroup);
    }

    /// Run `threadgroups_per_grid` whole threadgroups.
    ///
    /// # Panics
    ///
    /// Panics like [`dispatch_threads`](Self::dispatch_threads), and if the
    /// total thread count along any axis does not fit in a `u32`.
    pub fn dispatch_threadgroups(
        &mut self,
        threadgroups_per_grid: Size,
        threads_per_threadgroup: Size,
    ) {
        let threads_per_grid = Size::new(
            grid_axis("width", threadgroups_per_grid.width, threads_per_threadgroup.width),
            grid_axis("height", threadgroups_per_grid.height, threads_per_threadgroup.height),
            grid_axis("depth", threadgroups_per_grid.depth, threads_per_threadgroup.depth),
        );
        self.record_dispatch("dispatch_threadgroups", threads_per_grid, threads_per_threadgroup);
    }

    fn record_dispatch(
        &mut self,
        call: &str,
        threads_per_grid: Size,
        threads_per_threadgroup: Size,
    ) {
        let Some(pipeline) = self.pipeline.as_ref() else {
            panic!("{call} called before set_compute_pipeline_state");
        };
        assert!(
            !threads_per_threadgroup.is_empty(),
            "threadgroup size {threads_per_threadgroup:?} has a zero dimension"
        );
        let threads = threads_per_threadgroup.volume();
        let max = pipeline.max_total_threads_per_threadgroup();
        assert!(
            threads <= u64::from(max),
            "threadgroup size {}x{}x{} ({threads} threads) exceeds the pipeline maximum of {max}",
            threads_per_threadgroup.width,
            threads_per_threadgroup.height,
            threads_per_threadgroup.depth
        );

        log::trace!(
            "ComputeCommandEncoder: {call} grid={threads_per_grid:?} threadgroup={threads_per_threadgroup:?}"
        );
        self.dispatches.push(DispatchCommand {
            pipeline: Arc::clone(pipeline),
            bindings: self.bindings.clone(),
            threads_per_grid,
            threads_per_threadgroup,
        });
    }

    /// Close the encoder and append its dispatches to the command buffer.
    pub fn end_encoding(mut self) {
        if let Some(command_buffer) = self.command_buffer.take() {
            let dispatches = std::mem::take(&mut self.dispatches);
            command_buffer.end_encoder(EncoderKind::Compute, EncodedPass::Compute(dispatches));
        }
    }
}

fn grid_axis(axis: &str, threadgroups: u32, threads: u32) -> u32 {
    threadgroups.checked_mul(threads).unwrap_or_else(|| {
        panic!("dispatch grid {axis} overflows: {threadgroups} threadgroups of {threads} threads")
    })
}

impl Drop for ComputeCommandEncoder {
    fn drop(&mut self) {
        if self.command_buffer.is_some() {
            log::warn!(
                "ComputeCommandEncoder dropped without end_encoding; the command buffer cannot be committed"
            );
        }
    }
}

impl std::fmt::Debug for ComputeCommandEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeCommandEncoder")
            .field("pipeline", &self.pipeline.as_ref().map(|p| p.function_name()))
            .field("dispatches", &self.dispatches.len())
            .finish()
    }
}
