//! Copy and fill commands on the CPU.

use crate::command::BlitCommand;
use crate::resources::memory::{LinearLayout, copy_region_in, copy_region_out};
use crate::types::Region;

pub(super) fn execute_blit(command: &BlitCommand) {
    match command {
        BlitCommand::CopyTexture {
            source,
            source_slice,
            source_level,
            source_origin,
            source_size,
            destination,
            destination_slice,
            destination_level,
            destination_origin,
        } => {
            let (src_index, src_layout) = source.subresource(*source_level, *source_slice);
            let (dst_index, dst_layout) =
                destination.subresource(*destination_level, *destination_slice);
            let strides = LinearLayout {
                bytes_per_row: source_size.width as usize * src_layout.bytes_per_pixel,
                bytes_per_image: source_size.width as usize
                    * source_size.height as usize
                    * src_layout.bytes_per_pixel,
            };

            // Staged through a temporary so a texture can copy onto itself.
            let mut staging = vec![0u8; strides.bytes_per_image * source_size.depth as usize];
            copy_region_out(
                source.subresources().read()[src_index].bytes(),
                src_layout,
                &Region::new(*source_origin, *source_size),
                &mut staging,
                strides,
            );
            let mut subresources = destination.subresources().write();
            let memory = &mut subresources[dst_index];
            copy_region_in(
                memory.bytes_mut(),
                dst_layout,
                &Region::new(*destination_origin, *source_size),
                &staging,
                strides,
            );
            memory.mark_dirty();
        }
        BlitCommand::CopyBuffer {
            source,
            source_offset,
            destination,
            destination_offset,
            size,
        } => {
            let staging =
                source.memory().read().bytes()[*source_offset..*source_offset + *size].to_vec();
            let mut memory = destination.memory().write();
            memory.bytes_mut()[*destination_offset..*destination_offset + *size]
                .copy_from_slice(&staging);
            memory.mark_dirty();
        }
        BlitCommand::FillBuffer {
            buffer,
            range,
            value,
        } => {
            let mut memory = buffer.memory().write();
            memory.bytes_mut()[range.clone()].fill(*value);
            memory.mark_dirty();
        }
        // Host memory is the only copy.
        BlitCommand::Synchronize(_) => {}
    }
}
