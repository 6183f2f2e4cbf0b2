//! GPU resources.
//!
//! Buffers and textures are created by [`Device`](crate::Device) and handed
//! out as `Arc`s. Both implement [`Resource`], the narrow capability used by
//! synchronization commands; allocation-specific operations stay on the
//! concrete types.

mod buffer;
pub(crate) mod memory;
mod texture;

pub use buffer::{Buffer, BufferContents};
pub use texture::Texture;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::StorageMode;

/// Process-wide unique identity of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(u64);

impl ResourceId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capability shared by every GPU-addressable allocation.
pub trait Resource: Send + Sync {
    fn resource_id(&self) -> ResourceId;
    fn label(&self) -> Option<String>;
    fn storage_mode(&self) -> StorageMode;
}

/// Either kind of resource, as accepted by synchronization commands.
#[derive(Debug, Clone)]
pub enum AnyResource {
    Buffer(Arc<Buffer>),
    Texture(Arc<Texture>),
}

impl Resource for AnyResource {
    fn resource_id(&self) -> ResourceId {
        match self {
            Self::Buffer(buffer) => buffer.resource_id(),
            Self::Texture(texture) => texture.resource_id(),
        }
    }

    fn label(&self) -> Option<String> {
        match self {
            Self::Buffer(buffer) => Resource::label(buffer.as_ref()),
            Self::Texture(texture) => Resource::label(texture.as_ref()),
        }
    }

    fn storage_mode(&self) -> StorageMode {
        match self {
            Self::Buffer(buffer) => buffer.storage_mode(),
            Self::Texture(texture) => texture.storage_mode(),
        }
    }
}

impl From<Arc<Buffer>> for AnyResource {
    fn from(buffer: Arc<Buffer>) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<&Arc<Buffer>> for AnyResource {
    fn from(buffer: &Arc<Buffer>) -> Self {
        Self::Buffer(Arc::clone(buffer))
    }
}

impl From<Arc<Texture>> for AnyResource {
    fn from(texture: Arc<Texture>) -> Self {
        Self::Texture(texture)
    }
}

impl From<&Arc<Texture>> for AnyResource {
    fn from(texture: &Arc<Texture>) -> Self {
        Self::Texture(Arc::clone(texture))
    }
}

static_assertions::assert_impl_all!(AnyResource: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_ids_are_unique() {
        let a = ResourceId::next();
        let b = ResourceId::next();
        assert_ne!(a, b);
        assert!(b > a);
        assert_eq!(format!("{}", a), format!("#{}", a.as_u64()));
    }
}
