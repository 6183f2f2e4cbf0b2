//! Value types and descriptors for GPU resources and passes.
//!
//! This module contains the packed resource options, pixel formats, region
//! types and render pass enumerations used throughout the crate. None of
//! them depend on a device or backend.

mod common;
mod render;
mod resource_options;
mod texture;

pub use common::{ClearColor, Origin, Region, Size};
pub use render::{LoadAction, PrimitiveType, PrimitiveVertices, StoreAction};
pub use resource_options::{CpuCacheMode, HazardTrackingMode, ResourceOptions, StorageMode};
pub use texture::{PixelFormat, TextureDescriptor, TextureType, TextureUsage};
