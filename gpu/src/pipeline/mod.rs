//! Pipeline state objects.
//!
//! A pipeline state is the compiled, immutable configuration a dispatch or
//! draw runs with. It is created by the [`Device`](crate::Device), bound to
//! that device for its whole life, and may be shared by any number of
//! command buffers at once.

mod compute;
mod render;

pub use compute::ComputePipelineState;
pub use render::{RenderPipelineColorAttachment, RenderPipelineDescriptor, RenderPipelineState};
