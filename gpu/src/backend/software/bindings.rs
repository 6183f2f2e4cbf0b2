//! Buffer access for native shader stages.

use std::mem::size_of;

use parking_lot::RwLockWriteGuard;

use crate::command::{BindingSlot, BindingTable, MAX_BUFFER_BINDINGS};
use crate::resources::memory::HostMemory;
use crate::resources::{Resource, ResourceId};

#[derive(Clone, Copy)]
enum SlotView<'a> {
    Buffer { guard: usize, offset: usize },
    Bytes(&'a [u8]),
}

/// Locked view of the buffers bound to one shader stage.
///
/// Every distinct buffer is locked once, in resource-id order, for as long
/// as the view lives. Slot accesses outside the bound range panic; the
/// worker reports such panics as an execution failure of the command buffer.
pub struct ShaderResources<'a> {
    guards: Vec<RwLockWriteGuard<'a, HostMemory>>,
    slots: [Option<SlotView<'a>>; MAX_BUFFER_BINDINGS],
}

impl<'a> ShaderResources<'a> {
    pub(crate) fn lock(table: &'a BindingTable) -> Self {
        let mut buffers: Vec<_> = table.buffers().collect();
        buffers.sort_by_key(|buffer| buffer.resource_id());
        buffers.dedup_by_key(|buffer| buffer.resource_id());
        let ids: Vec<ResourceId> = buffers.iter().map(|buffer| buffer.resource_id()).collect();
        let guards = buffers
            .iter()
            .map(|buffer| buffer.memory().write())
            .collect();

        let mut slots = [None; MAX_BUFFER_BINDINGS];
        for (index, slot) in table.iter() {
            slots[index] = Some(match slot {
                BindingSlot::Buffer { buffer, offset } => SlotView::Buffer {
                    guard: ids.partition_point(|id| *id < buffer.resource_id()),
                    offset: *offset,
                },
                BindingSlot::Bytes(bytes) => SlotView::Bytes(bytes),
            });
        }

        Self { guards, slots }
    }

    fn slot(&self, slot: usize) -> SlotView<'a> {
        match self.slots.get(slot).copied().flatten() {
            Some(view) => view,
            None => panic!("shader read from unbound buffer slot {slot}"),
        }
    }

    /// Bytes visible through `slot`, starting at the bound offset.
    pub fn bytes(&self, slot: usize) -> &[u8] {
        match self.slot(slot) {
            SlotView::Buffer { guard, offset } => &self.guards[guard].bytes()[offset..],
            SlotView::Bytes(bytes) => bytes,
        }
    }

    /// Mutable bytes visible through `slot`.
    ///
    /// # Panics
    ///
    /// Panics if the slot holds inline bytes.
    pub fn bytes_mut(&mut self, slot: usize) -> &mut [u8] {
        match self.slot(slot) {
            SlotView::Buffer { guard, offset } => {
                let memory = &mut self.guards[guard];
                memory.mark_dirty();
                &mut memory.bytes_mut()[offset..]
            }
            SlotView::Bytes(_) => panic!("shader write to inline bytes in slot {slot}"),
        }
    }

    /// Number of whole `T` elements visible through `slot`.
    pub fn len<T: bytemuck::Pod>(&self, slot: usize) -> usize {
        self.bytes(slot).len() / size_of::<T>()
    }

    /// Read element `element` of an array of `T` bound at `slot`.
    pub fn read<T: bytemuck::Pod>(&self, slot: usize, element: usize) -> T {
        let start = element * size_of::<T>();
        let bytes = self.bytes(slot);
        assert!(
            start + size_of::<T>() <= bytes.len(),
            "shader read of element {element} past the end of slot {slot} ({} bytes)",
            bytes.len()
        );
        bytemuck::pod_read_unaligned(&bytes[start..start + size_of::<T>()])
    }

    /// Write element `element` of an array of `T` bound at `slot`.
    pub fn write<T: bytemuck::Pod>(&mut self, slot: usize, element: usize, value: T) {
        let start = element * size_of::<T>();
        let bytes = self.bytes_mut(slot);
        assert!(
            start + size_of::<T>() <= bytes.len(),
            "shader write of element {element} past the end of slot {slot} ({} bytes)",
            bytes.len()
        );
        bytes[start..start + size_of::<T>()].copy_from_slice(bytemuck::bytes_of(&value));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::instance::{BackendType, Instance, InstanceParameters};
    use crate::types::ResourceOptions;

    fn device() -> Arc<crate::Device> {
        Instance::new(InstanceParameters::new().with_backend(BackendType::Software))
            .and_then(|instance| instance.create_default_device())
            .expect("software device")
    }

    #[test]
    fn test_same_buffer_in_two_slots() {
        let device = device();
        let buffer = device
            .new_buffer_with_bytes(
                bytemuck::cast_slice(&[1u32, 2, 3, 4]),
                ResourceOptions::default(),
            )
            .unwrap();
        let mut table = BindingTable::default();
        table.set(
            0,
            BindingSlot::Buffer {
                buffer: Arc::clone(&buffer),
                offset: 0,
            },
        );
        table.set(
            5,
            BindingSlot::Buffer {
                buffer: Arc::clone(&buffer),
                offset: 8,
            },
        );
        table.set(6, BindingSlot::Bytes(Arc::from(&7u32.to_ne_bytes()[..])));

        {
            let mut resources = ShaderResources::lock(&table);
            assert_eq!(resources.read::<u32>(5, 0), 3);
            assert_eq!(resources.len::<u32>(5), 2);
            assert_eq!(resources.read::<u32>(6, 0), 7);
            resources.write(5, 1, 40u32);
            assert_eq!(resources.read::<u32>(0, 3), 40);
        }
        assert_eq!(buffer.contents().as_slice::<u32>(), &[1, 2, 3, 40]);
    }

    #[test]
    #[should_panic(expected = "unbound buffer slot 3")]
    fn test_unbound_slot_panics() {
        let table = BindingTable::default();
        let resources = ShaderResources::lock(&table);
        let _ = resources.read::<u32>(3, 0);
    }

    #[test]
    #[should_panic(expected = "inline bytes")]
    fn test_write_to_inline_bytes_panics() {
        let mut table = BindingTable::default();
        table.set(0, BindingSlot::Bytes(Arc::from(&[0u8; 4][..])));
        let mut resources = ShaderResources::lock(&table);
        resources.write(0, 0, 1u32);
    }
}
