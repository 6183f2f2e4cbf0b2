//! Native shader stages for the software backend.
//!
//! The software backend does not interpret WGSL. Instead, every entry point
//! that a pipeline uses must have a Rust implementation registered under the
//! same name in [`NativeFunctions`]. The WGSL source still goes through
//! validation and reflection, so the same library works on hardware backends.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::bindings::ShaderResources;

/// Compute kernel, called once per thread of a dispatch.
pub type KernelFn = dyn Fn(&mut ComputeContext<'_>) + Send + Sync;

/// Vertex stage, called once per vertex of a draw.
pub type VertexFn = dyn Fn(&mut VertexContext<'_>) -> VertexOutput + Send + Sync;

/// Fragment stage, called once per covered pixel. Returns the color written
/// to color attachment 0.
pub type FragmentFn = dyn Fn(&mut FragmentContext<'_>) -> [f32; 4] + Send + Sync;

/// Registry of native implementations keyed by entry-point name.
///
/// # Example
///
/// ```ignore
/// let functions = NativeFunctions::new().with_kernel("add_arrays", |ctx| {
///     let i = ctx.thread_position_in_grid[0] as usize;
///     let sum = ctx.read::<f32>(0, i) + ctx.read::<f32>(1, i);
///     ctx.write(2, i, sum);
/// });
/// ```
#[derive(Clone, Default)]
pub struct NativeFunctions {
    kernels: HashMap<String, Arc<KernelFn>>,
    vertex: HashMap<String, Arc<VertexFn>>,
    fragment: HashMap<String, Arc<FragmentFn>>,
}

impl NativeFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kernel<F>(mut self, name: impl Into<String>, kernel: F) -> Self
    where
        F: Fn(&mut ComputeContext<'_>) + Send + Sync + 'static,
    {
        self.kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    pub fn with_vertex<F>(mut self, name: impl Into<String>, vertex: F) -> Self
    where
        F: Fn(&mut VertexContext<'_>) -> VertexOutput + Send + Sync + 'static,
    {
        self.vertex.insert(name.into(), Arc::new(vertex));
        self
    }

    pub fn with_fragment<F>(mut self, name: impl Into<String>, fragment: F) -> Self
    where
        F: Fn(&mut FragmentContext<'_>) -> [f32; 4] + Send + Sync + 'static,
    {
        self.fragment.insert(name.into(), Arc::new(fragment));
        self
    }

    /// Total number of registered functions across all stages.
    pub fn len(&self) -> usize {
        self.kernels.len() + self.vertex.len() + self.fragment.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge another registry into this one; entries in `other` win.
    pub fn extend(&mut self, other: NativeFunctions) {
        self.kernels.extend(other.kernels);
        self.vertex.extend(other.vertex);
        self.fragment.extend(other.fragment);
    }

    pub(crate) fn kernel(&self, name: &str) -> Option<Arc<KernelFn>> {
        self.kernels.get(name).cloned()
    }

    pub(crate) fn vertex(&self, name: &str) -> Option<Arc<VertexFn>> {
        self.vertex.get(name).cloned()
    }

    pub(crate) fn fragment(&self, name: &str) -> Option<Arc<FragmentFn>> {
        self.fragment.get(name).cloned()
    }
}

impl fmt::Debug for NativeFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunctions")
            .field("kernels", &sorted_names(&self.kernels))
            .field("vertex", &sorted_names(&self.vertex))
            .field("fragment", &sorted_names(&self.fragment))
            .finish()
    }
}

fn sorted_names<V: ?Sized>(map: &HashMap<String, Arc<V>>) -> Vec<&str> {
    let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

/// Per-thread state handed to a kernel.
pub struct ComputeContext<'a> {
    pub thread_position_in_grid: [u32; 3],
    pub threads_per_grid: [u32; 3],
    pub thread_position_in_threadgroup: [u32; 3],
    pub threadgroup_position_in_grid: [u32; 3],
    pub threads_per_threadgroup: [u32; 3],
    /// Buffers bound with `set_buffer` / `set_bytes`.
    pub resources: ShaderResources<'a>,
}

impl ComputeContext<'_> {
    /// Linear index of this thread along x.
    pub fn global_id(&self) -> usize {
        self.thread_position_in_grid[0] as usize
    }

    pub fn read<T: bytemuck::Pod>(&self, slot: usize, element: usize) -> T {
        self.resources.read(slot, element)
    }

    pub fn write<T: bytemuck::Pod>(&mut self, slot: usize, element: usize, value: T) {
        self.resources.write(slot, element, value);
    }
}

/// Per-vertex state handed to a vertex stage.
pub struct VertexContext<'a> {
    pub vertex_id: u32,
    /// Buffers bound with `set_vertex_buffer` / `set_vertex_bytes`.
    pub resources: ShaderResources<'a>,
}

impl VertexContext<'_> {
    pub fn read<T: bytemuck::Pod>(&self, slot: usize, element: usize) -> T {
        self.resources.read(slot, element)
    }
}

/// Result of a vertex stage.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexOutput {
    /// Clip-space position.
    pub position: [f32; 4],
    /// Values interpolated across the primitive and handed to the fragment
    /// stage. Every vertex of a draw must produce the same count.
    pub varyings: Vec<f32>,
}

impl VertexOutput {
    pub fn new(position: [f32; 4]) -> Self {
        Self {
            position,
            varyings: Vec::new(),
        }
    }

    pub fn with_varyings(mut self, varyings: impl Into<Vec<f32>>) -> Self {
        self.varyings = varyings.into();
        self
    }
}

/// Per-pixel state handed to a fragment stage.
pub struct FragmentContext<'a> {
    /// Window-space pixel center in `x`, `y`; depth in `z`; `1 / w` in `w`.
    pub position: [f32; 4],
    pub front_facing: bool,
    /// Interpolated vertex varyings.
    pub varyings: Vec<f32>,
    /// Buffers bound with `set_fragment_buffer` / `set_fragment_bytes`.
    pub resources: ShaderResources<'a>,
}

impl FragmentContext<'_> {
    pub fn read<T: bytemuck::Pod>(&self, slot: usize, element: usize) -> T {
        self.resources.read(slot, element)
    }
}
