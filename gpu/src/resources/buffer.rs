//! GPU buffer resource.

use std::ops::{Deref, DerefMut, Range};
use std::sync::{Arc, Weak};

use parking_lot::{RwLock, RwLockWriteGuard};

use super::memory::HostMemory;
use super::{Resource, ResourceId};
use crate::backend::GpuBuffer;
use crate::device::Device;
use crate::types::{CpuCacheMode, HazardTrackingMode, ResourceOptions, StorageMode};

/// A linear GPU allocation of a fixed byte length.
///
/// Buffers are created by [`Device::new_buffer_with_length`] or
/// [`Device::new_buffer_with_bytes`] and are reference-counted. Command
/// buffers that record a buffer keep it alive until they are dropped.
///
/// # Example
///
/// ```ignore
/// let buffer = device.new_buffer_with_bytes(bytemuck::cast_slice(&[1.0f32, 2.0]),
///     ResourceOptions::STORAGE_MODE_SHARED)?;
/// assert_eq!(buffer.contents().as_slice::<f32>(), &[1.0, 2.0]);
/// ```
pub struct Buffer {
    id: ResourceId,
    device: Weak<Device>,
    device_id: u64,
    length: usize,
    options: ResourceOptions,
    label: RwLock<Option<String>>,
    memory: RwLock<HostMemory>,
    gpu: GpuBuffer,
}

impl Buffer {
    /// Create a new buffer (called by Device).
    pub(crate) fn new(
        device: &Arc<Device>,
        memory: HostMemory,
        options: ResourceOptions,
        gpu: GpuBuffer,
    ) -> Self {
        Self {
            id: ResourceId::next(),
            device: Arc::downgrade(device),
            device_id: device.registry_id(),
            length: memory.len(),
            options,
            label: RwLock::new(None),
            memory: RwLock::new(memory),
            gpu,
        }
    }

    /// Get the parent device, if it still exists.
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    /// Length in bytes.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn resource_options(&self) -> ResourceOptions {
        self.options
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.options.storage_mode()
    }

    pub fn cpu_cache_mode(&self) -> CpuCacheMode {
        self.options.cpu_cache_mode()
    }

    pub fn hazard_tracking_mode(&self) -> HazardTrackingMode {
        self.options.hazard_tracking_mode()
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write() = Some(label.into());
    }

    /// CPU view of the buffer's memory.
    ///
    /// The returned guard holds the buffer's lock; drop it before waiting on
    /// a command buffer that uses this buffer. Writing through the view while
    /// the GPU may still be reading gives unordered results.
    ///
    /// # Panics
    ///
    /// Panics if the storage mode is [`StorageMode::Private`] or
    /// [`StorageMode::Memoryless`].
    pub fn contents(&self) -> BufferContents<'_> {
        let mode = self.storage_mode();
        assert!(
            mode.is_cpu_accessible(),
            "contents() called on a buffer with {mode} storage"
        );
        BufferContents {
            guard: self.memory.write(),
        }
    }

    /// Tell the device the CPU modified `range` of a managed buffer.
    ///
    /// # Panics
    ///
    /// Panics if the range exceeds the buffer length.
    pub fn did_modify_range(&self, range: Range<usize>) {
        assert!(
            range.start <= range.end && range.end <= self.length,
            "modified range {range:?} exceeds buffer length {}",
            self.length
        );
        if !range.is_empty() {
            self.memory.write().mark_dirty();
        }
    }

    pub(crate) fn memory(&self) -> &RwLock<HostMemory> {
        &self.memory
    }

    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn gpu_buffer(&self) -> &GpuBuffer {
        &self.gpu
    }
}

impl Resource for Buffer {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn label(&self) -> Option<String> {
        Buffer::label(self)
    }

    fn storage_mode(&self) -> StorageMode {
        Buffer::storage_mode(self)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("length", &self.length)
            .field("options", &self.options)
            .field("label", &*self.label.read())
            .finish()
    }
}

/// Locked CPU view of a buffer's contents.
pub struct BufferContents<'a> {
    guard: RwLockWriteGuard<'a, HostMemory>,
}

impl BufferContents<'_> {
    /// Reinterpret the contents as a slice of `T`.
    ///
    /// # Panics
    ///
    /// Panics if the length is not a multiple of `size_of::<T>()` or `T`
    /// needs more than 8-byte alignment.
    pub fn as_slice<T: bytemuck::Pod>(&self) -> &[T] {
        bytemuck::cast_slice(self.guard.bytes())
    }

    /// Mutable variant of [`as_slice`](Self::as_slice).
    pub fn as_mut_slice<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        self.guard.mark_dirty();
        bytemuck::cast_slice_mut(self.guard.bytes_mut())
    }
}

impl Deref for BufferContents<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.bytes()
    }
}

impl DerefMut for BufferContents<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.guard.mark_dirty();
        self.guard.bytes_mut()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{BackendType, Instance, InstanceParameters};

    fn device() -> Arc<Device> {
        Instance::new(InstanceParameters::new().with_backend(BackendType::Software))
            .and_then(|instance| instance.create_default_device())
            .expect("software device")
    }

    #[test]
    fn test_buffer_from_bytes_reflects_source() {
        let device = device();
        let mut source = vec![1u8, 2, 3, 4, 5];
        let buffer = device
            .new_buffer_with_bytes(&source, ResourceOptions::STORAGE_MODE_SHARED)
            .unwrap();
        source[0] = 42;
        assert_eq!(&*buffer.contents(), &[1, 2, 3, 4, 5]);
        assert_eq!(buffer.length(), 5);
    }

    #[test]
    fn test_buffer_typed_view() {
        let device = device();
        let buffer = device
            .new_buffer_with_length(16, ResourceOptions::STORAGE_MODE_MANAGED)
            .unwrap();
        buffer
            .contents()
            .as_mut_slice::<f32>()
            .copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        buffer.did_modify_range(0..16);
        assert_eq!(buffer.contents().as_slice::<f32>(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "private storage")]
    fn test_contents_on_private_buffer_panics() {
        let device = device();
        let buffer = device
            .new_buffer_with_length(16, ResourceOptions::STORAGE_MODE_PRIVATE)
            .unwrap();
        let _ = buffer.contents();
    }

    #[test]
    fn test_buffer_label_and_debug() {
        let device = device();
        let buffer = device
            .new_buffer_with_length(64, ResourceOptions::default())
            .unwrap();
        buffer.set_label("scratch");
        assert_eq!(buffer.label().as_deref(), Some("scratch"));
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("64"));
    }
}
