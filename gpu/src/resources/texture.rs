//! GPU texture resource.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::memory::{HostMemory, LinearLayout, PixelLayout, copy_region_in, copy_region_out};
use super::{Resource, ResourceId};
use crate::backend::GpuTexture;
use crate::device::Device;
use crate::types::{
    PixelFormat, Region, Size, StorageMode, TextureDescriptor, TextureType, TextureUsage,
};

/// A formatted image allocation.
///
/// Format, dimensions, mip count and storage mode are fixed by the
/// [`TextureDescriptor`] at creation.
pub struct Texture {
    id: ResourceId,
    device: Weak<Device>,
    device_id: u64,
    descriptor: TextureDescriptor,
    label: RwLock<Option<String>>,
    /// One entry per `(slice, level)`, slice-major.
    subresources: RwLock<Vec<HostMemory>>,
    gpu: GpuTexture,
}

impl Texture {
    /// Create a new texture (called by Device).
    pub(crate) fn new(
        device: &Arc<Device>,
        descriptor: TextureDescriptor,
        gpu: GpuTexture,
    ) -> Self {
        let bytes_per_pixel = descriptor.pixel_format.bytes_per_pixel();
        let mut subresources = Vec::new();
        for _slice in 0..descriptor.array_length {
            for level in 0..descriptor.mipmap_level_count {
                let layout = PixelLayout::new(descriptor.level_size(level), bytes_per_pixel);
                subresources.push(HostMemory::zeroed(layout.total_bytes()));
            }
        }

        Self {
            id: ResourceId::next(),
            device: Arc::downgrade(device),
            device_id: device.registry_id(),
            label: RwLock::new(descriptor.label.clone()),
            descriptor,
            subresources: RwLock::new(subresources),
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

    pub fn descriptor(&self) -> &TextureDescriptor {
        &self.descriptor
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.descriptor.pixel_format
    }

    pub fn texture_type(&self) -> TextureType {
        self.descriptor.texture_type
    }

    pub fn width(&self) -> u32 {
        self.descriptor.width
    }

    pub fn height(&self) -> u32 {
        self.descriptor.height
    }

    pub fn depth(&self) -> u32 {
        self.descriptor.depth
    }

    pub fn mipmap_level_count(&self) -> u32 {
        self.descriptor.mipmap_level_count
    }

    pub fn array_length(&self) -> u32 {
        self.descriptor.array_length
    }

    pub fn usage(&self) -> TextureUsage {
        self.descriptor.usage
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.descriptor.storage_mode()
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write() = Some(label.into());
    }

    /// Extent of a mip level.
    pub fn level_size(&self, level: u32) -> Size {
        self.descriptor.level_size(level)
    }

    /// Copy `region` of mip `level` into `destination`, row-major, each row
    /// starting `bytes_per_row` bytes after the previous one.
    ///
    /// # Panics
    ///
    /// Panics if the texture is not CPU accessible, the region falls outside
    /// the level, or `destination` is too small.
    pub fn get_bytes(
        &self,
        destination: &mut [u8],
        bytes_per_row: usize,
        region: Region,
        level: u32,
    ) {
        let bytes_per_image = bytes_per_row * region.size.height as usize;
        self.get_bytes_from_slice(destination, bytes_per_row, bytes_per_image, region, level, 0);
    }

    /// [`get_bytes`](Self::get_bytes) for a specific array slice, with an
    /// explicit stride between depth images.
    pub fn get_bytes_from_slice(
        &self,
        destination: &mut [u8],
        bytes_per_row: usize,
        bytes_per_image: usize,
        region: Region,
        level: u32,
        slice: u32,
    ) {
        let strides = LinearLayout {
            bytes_per_row,
            bytes_per_image,
        };
        let (index, layout) =
            self.check_cpu_access(&region, level, slice, strides, destination.len());
        let subresources = self.subresources.read();
        copy_region_out(subresources[index].bytes(), layout, &region, destination, strides);
    }

    /// Write `source` into `region` of mip `level`. Symmetric to
    /// [`get_bytes`](Self::get_bytes).
    pub fn replace_region(&self, region: Region, level: u32, source: &[u8], bytes_per_row: usize) {
        let bytes_per_image = bytes_per_row * region.size.height as usize;
        self.replace_region_in_slice(region, level, 0, source, bytes_per_row, bytes_per_image);
    }

    /// [`replace_region`](Self::replace_region) for a specific array slice.
    pub fn replace_region_in_slice(
        &self,
        region: Region,
        level: u32,
        slice: u32,
        source: &[u8],
        bytes_per_row: usize,
        bytes_per_image: usize,
    ) {
        let strides = LinearLayout {
            bytes_per_row,
            bytes_per_image,
        };
        let (index, layout) = self.check_cpu_access(&region, level, slice, strides, source.len());
        let mut subresources = self.subresources.write();
        let memory = &mut subresources[index];
        copy_region_in(memory.bytes_mut(), layout, &region, source, strides);
        memory.mark_dirty();
    }

    /// Index and layout of subresource `(slice, level)`.
    pub(crate) fn subresource(&self, level: u32, slice: u32) -> (usize, PixelLayout) {
        assert!(
            level < self.descriptor.mipmap_level_count,
            "mip level {level} out of range (texture has {})",
            self.descriptor.mipmap_level_count
        );
        assert!(
            slice < self.descriptor.array_length,
            "slice {slice} out of range (texture has {})",
            self.descriptor.array_length
        );
        let index = (slice * self.descriptor.mipmap_level_count + level) as usize;
        let layout = PixelLayout::new(
            self.level_size(level),
            self.descriptor.pixel_format.bytes_per_pixel(),
        );
        (index, layout)
    }

    pub(crate) fn subresources(&self) -> &RwLock<Vec<HostMemory>> {
        &self.subresources
    }

    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn gpu_texture(&self) -> &GpuTexture {
        &self.gpu
    }

    fn check_cpu_access(
        &self,
        region: &Region,
        level: u32,
        slice: u32,
        strides: LinearLayout,
        available: usize,
    ) -> (usize, PixelLayout) {
        let mode = self.storage_mode();
        assert!(
            mode.is_cpu_accessible(),
            "CPU access to a texture with {mode} storage"
        );
        let (index, layout) = self.subresource(level, slice);
        assert!(
            region.fits_within(layout.extent),
            "region {region:?} exceeds level {level} extent {:?}",
            layout.extent
        );
        let row_len = region.size.width as usize * layout.bytes_per_pixel;
        assert!(
            strides.bytes_per_row >= row_len,
            "bytes_per_row {} is smaller than a region row ({row_len} bytes)",
            strides.bytes_per_row
        );
        let required = strides.required_len(region, layout.bytes_per_pixel);
        assert!(
            available >= required,
            "pixel array holds {available} bytes, region needs {required}"
        );
        (index, layout)
    }
}

impl Resource for Texture {
    fn resource_id(&self) -> ResourceId {
        self.id
    }

    fn label(&self) -> Option<String> {
        Texture::label(self)
    }

    fn storage_mode(&self) -> StorageMode {
        Texture::storage_mode(self)
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("format", &self.descriptor.pixel_format)
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("storage_mode", &self.storage_mode())
            .field("label", &*self.label.read())
            .finish()
    }
}

// Ensure Texture is Send + Sync
static_assertions::assert_impl_all!(Texture: Send, Sync);

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
    fn test_replace_then_get_region() {
        let device = device();
        let texture = device
            .new_texture(&TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 4, 4))
            .unwrap();
        let pixels: Vec<u8> = (0..16).collect();
        texture.replace_region(Region::make_2d(1, 1, 2, 2), 0, &pixels, 8);

        let mut out = vec![0u8; 16];
        texture.get_bytes(&mut out, 8, Region::make_2d(1, 1, 2, 2), 0);
        assert_eq!(out, pixels);

        let mut corner = vec![0xAAu8; 4];
        texture.get_bytes(&mut corner, 4, Region::make_2d(0, 0, 1, 1), 0);
        assert_eq!(corner, vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_mip_levels_are_independent() {
        let device = device();
        let texture = device
            .new_texture(
                &TextureDescriptor::new_2d(PixelFormat::R8Unorm, 4, 4).with_mipmap_level_count(3),
            )
            .unwrap();
        assert_eq!(texture.level_size(2), Size::new_2d(1, 1));
        texture.replace_region(Region::make_2d(0, 0, 1, 1), 2, &[7], 1);

        let mut level0 = [0u8; 1];
        texture.get_bytes(&mut level0, 1, Region::make_2d(0, 0, 1, 1), 0);
        assert_eq!(level0, [0]);
        let mut level2 = [0u8; 1];
        texture.get_bytes(&mut level2, 1, Region::make_2d(0, 0, 1, 1), 2);
        assert_eq!(level2, [7]);
    }

    #[test]
    fn test_array_slices() {
        let device = device();
        let texture = device
            .new_texture(&TextureDescriptor::new_2d_array(PixelFormat::R8Unorm, 2, 1, 3))
            .unwrap();
        texture.replace_region_in_slice(Region::make_2d(0, 0, 2, 1), 0, 2, &[5, 6], 2, 2);
        let mut out = [0u8; 2];
        texture.get_bytes_from_slice(&mut out, 2, 2, Region::make_2d(0, 0, 2, 1), 0, 2);
        assert_eq!(out, [5, 6]);
        texture.get_bytes_from_slice(&mut out, 2, 2, Region::make_2d(0, 0, 2, 1), 0, 1);
        assert_eq!(out, [0, 0]);
    }

    #[test]
    #[should_panic(expected = "exceeds level")]
    fn test_out_of_bounds_region_panics() {
        let device = device();
        let texture = device
            .new_texture(&TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 4, 4))
            .unwrap();
        let mut out = vec![0u8; 64];
        texture.get_bytes(&mut out, 16, Region::make_2d(2, 0, 4, 1), 0);
    }

    #[test]
    #[should_panic(expected = "private storage")]
    fn test_private_texture_is_not_cpu_accessible() {
        let device = device();
        let texture = device
            .new_texture(
                &TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 4, 4)
                    .with_storage_mode(StorageMode::Private),
            )
            .unwrap();
        let mut out = vec![0u8; 64];
        texture.get_bytes(&mut out, 16, Region::make_2d(0, 0, 4, 4), 0);
    }
}
