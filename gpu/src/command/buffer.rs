//! Command buffers.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::blit::BlitCommandEncoder;
use super::compute::ComputeCommandEncoder;
use super::pass::EncodedPass;
use super::queue::QueueShared;
use super::render::{RenderCommandEncoder, RenderPassDescriptor};
use super::sync::Fence;
use crate::backend::GpuBackend;
use crate::device::Device;
use crate::error::GpuError;

/// Lifecycle of a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandBufferStatus {
    /// Recording; encoders may be created.
    NotEnqueued,
    /// Sealed and handed to the queue.
    Committed,
    /// Picked up by the queue worker and executing.
    Scheduled,
    /// Finished successfully.
    Completed,
    /// Finished with an error; see [`CommandBuffer::error`].
    Error,
}

impl CommandBufferStatus {
    /// Whether execution has finished, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for CommandBufferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotEnqueued => "not enqueued",
            Self::Committed => "committed",
            Self::Scheduled => "scheduled",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Kind of the encoder currently open on a command buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EncoderKind {
    Compute,
    Render,
    Blit,
}

impl fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Compute => "compute",
            Self::Render => "render",
            Self::Blit => "blit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncoderState {
    Idle,
    Active(EncoderKind),
}

type CompletedHandler = Box<dyn FnOnce(&CommandBuffer) + Send>;

struct State {
    status: CommandBufferStatus,
    encoder: EncoderState,
    passes: Vec<EncodedPass>,
    error: Option<GpuError>,
    completed_handlers: Vec<CompletedHandler>,
    label: Option<String>,
}

struct Shared {
    queue: Arc<QueueShared>,
    state: Mutex<State>,
    completed: Fence,
}

/// An ordered container of recorded GPU work.
///
/// Work is recorded through one encoder at a time. [`commit`](Self::commit)
/// seals the buffer and hands it to its queue; execution is asynchronous
/// and its outcome is observed with [`wait_until_completed`](Self::wait_until_completed),
/// [`status`](Self::status) or a completed handler.
///
/// `CommandBuffer` is a cheap handle; clones refer to the same buffer.
/// Resources and pipeline states named by recorded commands stay alive until
/// every handle is dropped.
///
/// # Example
///
/// ```ignore
/// let command_buffer = queue.new_command_buffer();
/// let mut encoder = command_buffer.new_compute_command_encoder();
/// encoder.set_compute_pipeline_state(&pipeline);
/// encoder.set_buffer(&result, 0, 0);
/// encoder.dispatch_threads(Size::new_1d(4), Size::new_1d(4));
/// encoder.end_encoding();
/// command_buffer.commit();
/// command_buffer.wait_until_completed();
/// ```
#[derive(Clone)]
pub struct CommandBuffer {
    shared: Arc<Shared>,
}

impl CommandBuffer {
    pub(super) fn new(queue: Arc<QueueShared>) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                state: Mutex::new(State {
                    status: CommandBufferStatus::NotEnqueued,
                    encoder: EncoderState::Idle,
                    passes: Vec::new(),
                    error: None,
                    completed_handlers: Vec::new(),
                    label: None,
                }),
                completed: Fence::new_unsignaled(),
            }),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        self.shared.queue.device()
    }

    pub fn status(&self) -> CommandBufferStatus {
        self.shared.state.lock().status
    }

    /// The execution error, once the status is [`CommandBufferStatus::Error`].
    pub fn error(&self) -> Option<GpuError> {
        self.shared.state.lock().error.clone()
    }

    pub fn label(&self) -> Option<String> {
        self.shared.state.lock().label.clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        self.shared.state.lock().label = Some(label.into());
    }

    /// Open a compute encoder.
    ///
    /// # Panics
    ///
    /// Panics if another encoder is open or the buffer was committed.
    pub fn new_compute_command_encoder(&self) -> ComputeCommandEncoder {
        self.begin_encoder(EncoderKind::Compute);
        ComputeCommandEncoder::new(self.clone())
    }

    /// Open a render encoder drawing into the attachments of `descriptor`.
    ///
    /// # Panics
    ///
    /// Panics if another encoder is open, the buffer was committed, or an
    /// attachment cannot be rendered to.
    pub fn new_render_command_encoder(
        &self,
        descriptor: &RenderPassDescriptor,
    ) -> RenderCommandEncoder {
        self.begin_encoder(EncoderKind::Render);
        RenderCommandEncoder::new(self.clone(), descriptor)
    }

    /// Open a blit encoder.
    ///
    /// # Panics
    ///
    /// Panics if another encoder is open or the buffer was committed.
    pub fn new_blit_command_encoder(&self) -> BlitCommandEncoder {
        self.begin_encoder(EncoderKind::Blit);
        BlitCommandEncoder::new(self.clone())
    }

    /// Register `handler` to run once execution finishes.
    ///
    /// Handlers run on the queue's worker thread, in registration order,
    /// after waiters have been released.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was already committed.
    pub fn add_completed_handler<F>(&self, handler: F)
    where
        F: FnOnce(&CommandBuffer) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        assert_eq!(
            state.status,
            CommandBufferStatus::NotEnqueued,
            "completed handlers must be added before commit"
        );
        state.completed_handlers.push(Box::new(handler));
    }

    /// Seal the buffer and submit it to its queue.
    ///
    /// # Panics
    ///
    /// Panics if an encoder is still open or the buffer was already
    /// committed.
    pub fn commit(&self) {
        {
            let mut state = self.shared.state.lock();
            assert_eq!(
                state.status,
                CommandBufferStatus::NotEnqueued,
                "command buffer committed twice"
            );
            if let EncoderState::Active(kind) = state.encoder {
                panic!("commit called while a {kind} encoder is open; call end_encoding first");
            }
            state.status = CommandBufferStatus::Committed;
            log::debug!(
                "CommandBuffer: committed {:?} to queue {} ({} passes)",
                state.label,
                self.shared.queue.id(),
                state.passes.len()
            );
        }

        if let Err(error) = self.shared.queue.submit(self.clone()) {
            log::error!("CommandBuffer: submission failed: {error}");
            self.finish(Err(error));
        }
    }

    /// Block until execution finishes. Returns immediately if it already has.
    ///
    /// # Panics
    ///
    /// Panics if the buffer was never committed.
    pub fn wait_until_completed(&self) {
        self.check_committed();
        self.shared.completed.wait();
    }

    /// [`wait_until_completed`](Self::wait_until_completed) with a timeout.
    ///
    /// Returns `true` if execution finished within `timeout`.
    pub fn wait_until_completed_timeout(&self, timeout: Duration) -> bool {
        self.check_committed();
        self.shared.completed.wait_timeout(timeout)
    }

    fn check_committed(&self) {
        assert_ne!(
            self.status(),
            CommandBufferStatus::NotEnqueued,
            "wait_until_completed called on a command buffer that was never committed"
        );
    }

    // ========================================================================
    // Encoder protocol
    // ========================================================================

    fn begin_encoder(&self, kind: EncoderKind) {
        let mut state = self.shared.state.lock();
        assert_eq!(
            state.status,
            CommandBufferStatus::NotEnqueued,
            "cannot create a {kind} encoder on a command buffer that was already committed"
        );
        if let EncoderState::Active(open) = state.encoder {
            panic!(
                "cannot create a {kind} encoder while a {open} encoder is open; call end_encoding first"
            );
        }
        state.encoder = EncoderState::Active(kind);
        log::trace!("CommandBuffer: began {kind} encoder");
    }

    pub(super) fn end_encoder(&self, kind: EncoderKind, pass: EncodedPass) {
        let mut state = self.shared.state.lock();
        assert_eq!(
            state.encoder,
            EncoderState::Active(kind),
            "end_encoding called on a {kind} encoder that is not open"
        );
        log::trace!(
            "CommandBuffer: ended {kind} encoder ({} commands)",
            pass.command_count()
        );
        state.encoder = EncoderState::Idle;
        state.passes.push(pass);
    }

    pub(super) fn device_id(&self) -> u64 {
        self.shared.queue.device().registry_id()
    }

    // ========================================================================
    // Execution (queue worker)
    // ========================================================================

    pub(super) fn execute(&self, backend: &dyn GpuBackend) {
        let passes = {
            let mut state = self.shared.state.lock();
            state.status = CommandBufferStatus::Scheduled;
            std::mem::take(&mut state.passes)
        };

        let result = catch_unwind(AssertUnwindSafe(|| backend.execute(&passes)))
            .unwrap_or_else(|payload| Err(GpuError::ExecutionFailed(panic_message(&*payload))));

        // Keep the recorded commands, and with them every resource they
        // reference, for as long as the command buffer lives.
        self.shared.state.lock().passes = passes;
        self.finish(result);
    }

    fn finish(&self, result: Result<(), GpuError>) {
        let handlers = {
            let mut state = self.shared.state.lock();
            match result {
                Ok(()) => state.status = CommandBufferStatus::Completed,
                Err(error) => {
                    log::error!("CommandBuffer: {:?} failed: {error}", state.label);
                    state.status = CommandBufferStatus::Error;
                    state.error = Some(error);
                }
            }
            log::debug!("CommandBuffer: {:?} {}", state.label, state.status);
            std::mem::take(&mut state.completed_handlers)
        };

        self.shared.completed.signal();
        for handler in handlers {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handler(self))) {
                log::error!(
                    "CommandBuffer: completed handler panicked: {}",
                    panic_message(&*payload)
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "backend panicked".to_string()
    }
}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("CommandBuffer")
            .field("label", &state.label)
            .field("status", &state.status)
            .field("passes", &state.passes.len())
            .finish()
    }
}

static_assertions::assert_impl_all!(CommandBuffer: Send, Sync);
