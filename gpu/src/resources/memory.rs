//! Host-side backing memory for buffers and textures.
//!
//! Every resource keeps a host copy of its contents. The software backend
//! executes directly against it; hardware backends treat it as the CPU-visible
//! mirror that is uploaded when dirty and refreshed after GPU writes.

use crate::types::{Region, Size};

/// A byte allocation aligned to 8 bytes.
pub(crate) struct HostMemory {
    words: Vec<u64>,
    len: usize,
    dirty: bool,
}

impl HostMemory {
    /// Zero-filled memory of `len` bytes.
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(8)],
            len,
            dirty: false,
        }
    }

    /// Memory initialized from `bytes`. Starts dirty so the first submission
    /// uploads it.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut memory = Self::zeroed(bytes.len());
        memory.bytes_mut().copy_from_slice(bytes);
        memory.dirty = true;
        memory
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }

    /// Record that the host copy changed since the last upload.
    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clear and return the dirty flag.
    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

/// Tightly packed layout of one texture subresource.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PixelLayout {
    pub extent: Size,
    pub bytes_per_pixel: usize,
}

impl PixelLayout {
    pub(crate) fn new(extent: Size, bytes_per_pixel: usize) -> Self {
        Self {
            extent,
            bytes_per_pixel,
        }
    }

    pub(crate) fn bytes_per_row(&self) -> usize {
        self.extent.width as usize * self.bytes_per_pixel
    }

    pub(crate) fn bytes_per_image(&self) -> usize {
        self.bytes_per_row() * self.extent.height as usize
    }

    pub(crate) fn total_bytes(&self) -> usize {
        self.bytes_per_image() * self.extent.depth as usize
    }

    /// Byte offset of pixel `(x, y, z)`.
    pub(crate) fn offset(&self, x: u32, y: u32, z: u32) -> usize {
        z as usize * self.bytes_per_image()
            + y as usize * self.bytes_per_row()
            + x as usize * self.bytes_per_pixel
    }
}

/// Strides of a caller-provided pixel array.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LinearLayout {
    pub bytes_per_row: usize,
    pub bytes_per_image: usize,
}

impl LinearLayout {
    /// Minimum byte length needed to hold `region` with these strides.
    pub(crate) fn required_len(&self, region: &Region, bytes_per_pixel: usize) -> usize {
        if region.size.is_empty() {
            return 0;
        }
        (region.size.depth as usize - 1) * self.bytes_per_image
            + (region.size.height as usize - 1) * self.bytes_per_row
            + region.size.width as usize * bytes_per_pixel
    }
}

/// Copy `region` out of a packed subresource into a strided array.
pub(crate) fn copy_region_out(
    source: &[u8],
    layout: PixelLayout,
    region: &Region,
    destination: &mut [u8],
    strides: LinearLayout,
) {
    let row_len = region.size.width as usize * layout.bytes_per_pixel;
    for z in 0..region.size.depth {
        for y in 0..region.size.height {
            let src = layout.offset(region.origin.x, region.origin.y + y, region.origin.z + z);
            let dst = z as usize * strides.bytes_per_image + y as usize * strides.bytes_per_row;
            destination[dst..dst + row_len].copy_from_slice(&source[src..src + row_len]);
        }
    }
}

/// Copy a strided array into `region` of a packed subresource.
pub(crate) fn copy_region_in(
    destination: &mut [u8],
    layout: PixelLayout,
    region: &Region,
    source: &[u8],
    strides: LinearLayout,
) {
    let row_len = region.size.width as usize * layout.bytes_per_pixel;
    for z in 0..region.size.depth {
        for y in 0..region.size.height {
            let dst = layout.offset(region.origin.x, region.origin.y + y, region.origin.z + z);
            let src = z as usize * strides.bytes_per_image + y as usize * strides.bytes_per_row;
            destination[dst..dst + row_len].copy_from_slice(&source[src..src + row_len]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_memory_odd_length() {
        let mut memory = HostMemory::zeroed(5);
        assert_eq!(memory.len(), 5);
        memory.bytes_mut().copy_from_slice(&[1, 2, 3, 4, 5]);
        assert_eq!(memory.bytes(), &[1, 2, 3, 4, 5]);
        assert!(!memory.take_dirty());
    }

    #[test]
    fn test_host_memory_from_bytes_is_dirty() {
        let mut memory = HostMemory::from_bytes(&[9, 8, 7]);
        assert_eq!(memory.bytes(), &[9, 8, 7]);
        assert!(memory.take_dirty());
        assert!(!memory.take_dirty());
    }

    #[test]
    fn test_region_copy_with_padded_rows() {
        // 4x2 texture, one byte per pixel.
        let layout = PixelLayout::new(Size::new_2d(4, 2), 1);
        let texels: Vec<u8> = (0..8).collect();
        let region = Region::make_2d(1, 0, 2, 2);
        let strides = LinearLayout {
            bytes_per_row: 3,
            bytes_per_image: 6,
        };
        assert_eq!(strides.required_len(&region, 1), 5);

        let mut out = vec![0xff; 6];
        copy_region_out(&texels, layout, &region, &mut out, strides);
        assert_eq!(out, vec![1, 2, 0xff, 5, 6, 0xff]);

        let mut back = vec![0; 8];
        copy_region_in(&mut back, layout, &region, &out, strides);
        assert_eq!(back, vec![0, 1, 2, 0, 0, 5, 6, 0]);
    }
}
