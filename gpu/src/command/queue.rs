//! Command queues.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::JoinHandle;

use parking_lot::RwLock;

use super::buffer::CommandBuffer;
use crate::backend::GpuBackend;
use crate::device::Device;
use crate::error::GpuError;

/// Ordered submission point for command buffers.
///
/// Each queue owns one worker thread. Committed command buffers are sent to
/// it over a channel and executed one at a time in commit order, so buffers
/// from one queue complete in FIFO order while separate queues make progress
/// independently.
///
/// `CommandQueue` is a cheap handle; clones share the same worker. The
/// worker drains outstanding work and exits once the last handle and every
/// command buffer issued from it are gone.
#[derive(Clone)]
pub struct CommandQueue {
    shared: Arc<QueueShared>,
}

pub(super) struct QueueShared {
    id: u64,
    device: Arc<Device>,
    label: RwLock<Option<String>>,
    sender: Option<mpsc::Sender<CommandBuffer>>,
    worker: Option<JoinHandle<()>>,
}

impl CommandQueue {
    /// Create a new queue and start its worker (called by Device).
    pub(crate) fn new(device: Arc<Device>) -> Result<Self, GpuError> {
        static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);

        let (sender, receiver) = mpsc::channel();
        let backend = Arc::clone(device.backend());
        let worker = std::thread::Builder::new()
            .name(format!("redlilium-gpu-queue-{id}"))
            .spawn(move || run_worker(id, receiver, backend))
            .map_err(|e| GpuError::Internal(format!("failed to start queue worker: {e}")))?;

        log::trace!("CommandQueue: created queue {id} on {}", device.name());

        Ok(Self {
            shared: Arc::new(QueueShared {
                id,
                device,
                label: RwLock::new(None),
                sender: Some(sender),
                worker: Some(worker),
            }),
        })
    }

    /// Create an empty command buffer in the
    /// [`NotEnqueued`](super::CommandBufferStatus::NotEnqueued) state.
    pub fn new_command_buffer(&self) -> CommandBuffer {
        CommandBuffer::new(Arc::clone(&self.shared))
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.shared.device
    }

    pub fn label(&self) -> Option<String> {
        self.shared.label.read().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.shared.label.write() = Some(label.into());
    }
}

impl QueueShared {
    pub(super) fn id(&self) -> u64 {
        self.id
    }

    pub(super) fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Hand a committed command buffer to the worker.
    pub(super) fn submit(&self, command_buffer: CommandBuffer) -> Result<(), GpuError> {
        let sender = self.sender.as_ref().ok_or(GpuError::DeviceLost)?;
        sender.send(command_buffer).map_err(|_| GpuError::DeviceLost)
    }
}

impl Drop for QueueShared {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish queued work and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            // The last reference can be released by the worker itself while
            // it drops an executed command buffer; it exits on its own then.
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
        log::trace!("CommandQueue: queue {} shut down", self.id);
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("id", &self.shared.id)
            .field("device", &self.shared.device.name())
            .field("label", &*self.shared.label.read())
            .finish()
    }
}

fn run_worker(id: u64, receiver: mpsc::Receiver<CommandBuffer>, backend: Arc<dyn GpuBackend>) {
    log::debug!("CommandQueue: worker for queue {id} started");
    while let Ok(command_buffer) = receiver.recv() {
        command_buffer.execute(backend.as_ref());
    }
    log::debug!("CommandQueue: worker for queue {id} stopped");
}

static_assertions::assert_impl_all!(CommandQueue: Send, Sync);
