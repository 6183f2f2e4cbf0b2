//! Texture-related types.

use bitflags::bitflags;

use super::{CpuCacheMode, HazardTrackingMode, ResourceOptions, Size, StorageMode};

/// Pixel format of a texture or attachment.
///
/// Discriminants match the raw values used by Metal so formats can be passed
/// through to native code unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u16)]
pub enum PixelFormat {
    #[default]
    Invalid = 0,

    // 8-bit formats
    R8Unorm = 10,
    R8Uint = 13,

    // 16-bit formats
    R16Float = 25,
    Rg8Unorm = 30,

    // 32-bit formats
    R32Uint = 53,
    R32Sint = 54,
    R32Float = 55,
    Rg16Float = 65,
    Rgba8Unorm = 70,
    Rgba8UnormSrgb = 71,
    Rgba8Uint = 73,
    Bgra8Unorm = 80,
    Bgra8UnormSrgb = 81,

    // 64-bit formats
    Rg32Float = 105,
    Rgba16Float = 115,

    // 128-bit formats
    Rgba32Float = 125,

    // Depth
    Depth32Float = 252,
}

impl PixelFormat {
    /// Size of one pixel in bytes. Zero for [`PixelFormat::Invalid`].
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Invalid => 0,
            Self::R8Unorm | Self::R8Uint => 1,
            Self::R16Float | Self::Rg8Unorm => 2,
            Self::R32Uint
            | Self::R32Sint
            | Self::R32Float
            | Self::Rg16Float
            | Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Uint
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Depth32Float => 4,
            Self::Rg32Float | Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Number of color channels stored per pixel.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Invalid => 0,
            Self::R8Unorm
            | Self::R8Uint
            | Self::R16Float
            | Self::R32Uint
            | Self::R32Sint
            | Self::R32Float
            | Self::Depth32Float => 1,
            Self::Rg8Unorm | Self::Rg16Float | Self::Rg32Float => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Rgba8Uint
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgba16Float
            | Self::Rgba32Float => 4,
        }
    }

    /// Whether the format applies sRGB encoding on write.
    pub fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8UnormSrgb | Self::Bgra8UnormSrgb)
    }

    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float)
    }

    /// Whether the format can be used as a color attachment.
    pub fn is_color_renderable(self) -> bool {
        !matches!(self, Self::Invalid | Self::Depth32Float)
    }

    /// Look up a format by its raw value.
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|format| *format as u16 == raw)
    }

    /// Every valid format.
    pub const ALL: [Self; 17] = [
        Self::R8Unorm,
        Self::R8Uint,
        Self::R16Float,
        Self::Rg8Unorm,
        Self::R32Uint,
        Self::R32Sint,
        Self::R32Float,
        Self::Rg16Float,
        Self::Rgba8Unorm,
        Self::Rgba8UnormSrgb,
        Self::Rgba8Uint,
        Self::Bgra8Unorm,
        Self::Bgra8UnormSrgb,
        Self::Rg32Float,
        Self::Rgba16Float,
        Self::Rgba32Float,
        Self::Depth32Float,
    ];
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureType {
    #[default]
    D2,
    D2Array,
    D3,
}

bitflags! {
    /// How a texture will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        /// Sampled or read in shaders.
        const SHADER_READ = 1 << 0;
        /// Written in shaders.
        const SHADER_WRITE = 1 << 1;
        /// Used as a render pass attachment.
        const RENDER_TARGET = 1 << 2;
    }
}

impl Default for TextureUsage {
    fn default() -> Self {
        Self::SHADER_READ | Self::RENDER_TARGET
    }
}

/// Descriptor for creating a texture.
///
/// # Example
///
/// ```ignore
/// let descriptor = TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 256, 256)
///     .with_storage_mode(StorageMode::Managed)
///     .with_label("color target");
/// let texture = device.new_texture(&descriptor)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub texture_type: TextureType,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Depth in pixels; must be 1 unless the type is [`TextureType::D3`].
    pub depth: u32,
    pub mipmap_level_count: u32,
    /// Number of slices; must be 1 unless the type is [`TextureType::D2Array`].
    pub array_length: u32,
    pub resource_options: ResourceOptions,
    pub usage: TextureUsage,
}

impl TextureDescriptor {
    /// Create a 2D texture descriptor with one mip level and shared storage.
    pub fn new_2d(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            label: None,
            texture_type: TextureType::D2,
            pixel_format,
            width,
            height,
            depth: 1,
            mipmap_level_count: 1,
            array_length: 1,
            resource_options: ResourceOptions::default(),
            usage: TextureUsage::default(),
        }
    }

    /// Create a 2D array texture descriptor.
    pub fn new_2d_array(pixel_format: PixelFormat, width: u32, height: u32, slices: u32) -> Self {
        Self {
            texture_type: TextureType::D2Array,
            array_length: slices,
            ..Self::new_2d(pixel_format, width, height)
        }
    }

    /// Create a 3D texture descriptor.
    pub fn new_3d(pixel_format: PixelFormat, width: u32, height: u32, depth: u32) -> Self {
        Self {
            texture_type: TextureType::D3,
            depth,
            ..Self::new_2d(pixel_format, width, height)
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_storage_mode(mut self, storage_mode: StorageMode) -> Self {
        self.resource_options = self.resource_options.with_storage_mode(storage_mode);
        self
    }

    pub fn with_cpu_cache_mode(mut self, cpu_cache_mode: CpuCacheMode) -> Self {
        self.resource_options = self.resource_options.with_cpu_cache_mode(cpu_cache_mode);
        self
    }

    pub fn with_hazard_tracking_mode(mut self, mode: HazardTrackingMode) -> Self {
        self.resource_options = self.resource_options.with_hazard_tracking_mode(mode);
        self
    }

    pub fn with_resource_options(mut self, options: ResourceOptions) -> Self {
        self.resource_options = options;
        self
    }

    pub fn with_mipmap_level_count(mut self, count: u32) -> Self {
        self.mipmap_level_count = count;
        self
    }

    pub fn with_array_length(mut self, array_length: u32) -> Self {
        self.array_length = array_length;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    pub fn storage_mode(&self) -> StorageMode {
        self.resource_options.storage_mode()
    }

    /// Largest mip chain the dimensions allow.
    pub fn max_mipmap_level_count(&self) -> u32 {
        let largest = self.width.max(self.height).max(self.depth).max(1);
        u32::BITS - largest.leading_zeros()
    }

    /// Extent of a mip level.
    pub fn level_size(&self, level: u32) -> Size {
        let shrink = |dim: u32| (dim >> level).max(1);
        match self.texture_type {
            TextureType::D3 => Size::new(
                shrink(self.width),
                shrink(self.height),
                shrink(self.depth),
            ),
            TextureType::D2 | TextureType::D2Array => {
                Size::new_2d(shrink(self.width), shrink(self.height))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8Unorm.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), 16);
        assert_eq!(PixelFormat::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::Invalid.bytes_per_pixel(), 0);
    }

    #[test]
    fn test_raw_values() {
        assert_eq!(PixelFormat::Bgra8Unorm as u16, 80);
        assert_eq!(PixelFormat::from_raw(70), Some(PixelFormat::Rgba8Unorm));
        assert_eq!(PixelFormat::from_raw(9999), None);
        assert_eq!(PixelFormat::from_raw(0), None);
    }

    #[test]
    fn test_renderable() {
        assert!(PixelFormat::Bgra8Unorm.is_color_renderable());
        assert!(!PixelFormat::Depth32Float.is_color_renderable());
        assert!(!PixelFormat::Invalid.is_color_renderable());
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = TextureDescriptor::new_2d(PixelFormat::Bgra8Unorm, 256, 128)
            .with_storage_mode(StorageMode::Managed)
            .with_mipmap_level_count(3)
            .with_label("target");
        assert_eq!(desc.storage_mode(), StorageMode::Managed);
        assert_eq!(desc.mipmap_level_count, 3);
        assert_eq!(desc.label.as_deref(), Some("target"));
        assert_eq!(desc.max_mipmap_level_count(), 9);
    }

    #[test]
    fn test_level_size() {
        let desc = TextureDescriptor::new_2d(PixelFormat::Rgba8Unorm, 16, 4);
        assert_eq!(desc.level_size(0), Size::new_2d(16, 4));
        assert_eq!(desc.level_size(2), Size::new_2d(4, 1));
        assert_eq!(desc.level_size(4), Size::new_2d(1, 1));

        let volume = TextureDescriptor::new_3d(PixelFormat::R8Unorm, 8, 8, 8);
        assert_eq!(volume.level_size(1), Size::new(4, 4, 4));
    }
}
