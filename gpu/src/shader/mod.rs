//! Shader libraries and functions.
//!
//! Libraries are compiled from WGSL source. Compilation here means parsing
//! and validating the source with `naga` and reflecting its entry points;
//! turning a [`Function`] into something executable is left to the backend
//! when a pipeline state is created.
//!
//! Buffer slot `N` of an encoder maps to `@group(0) @binding(N)` for vertex
//! and compute functions and to `@group(1) @binding(N)` for fragment
//! functions.

mod library;

pub use library::{Function, Library};

/// Which stage an entry point runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionType {
    Vertex,
    Fragment,
    Kernel,
}

impl std::fmt::Display for FunctionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Kernel => "kernel",
        };
        f.write_str(name)
    }
}

/// Shading language feature level used when validating source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LanguageVersion {
    /// Portable WGSL: only the capabilities every WebGPU device has.
    #[default]
    WebGpu,
    /// Every capability the validator knows about.
    Native,
}

/// Options for [`Device::new_library_with_source`](crate::Device::new_library_with_source).
///
/// Only `language_version` affects validation. `fast_math_enabled` and
/// `preserve_invariance` are recorded on the [`Library`] as pass-through
/// hints for backends; neither current backend changes code generation for
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    /// Allow floating point optimizations that may violate IEEE 754.
    pub fast_math_enabled: bool,
    /// Compute vertex positions identically across pipelines.
    pub preserve_invariance: bool,
    pub language_version: LanguageVersion,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            fast_math_enabled: true,
            preserve_invariance: false,
            language_version: LanguageVersion::default(),
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fast_math(mut self, enabled: bool) -> Self {
        self.fast_math_enabled = enabled;
        self
    }

    pub fn with_preserve_invariance(mut self, enabled: bool) -> Self {
        self.preserve_invariance = enabled;
        self
    }

    pub fn with_language_version(mut self, version: LanguageVersion) -> Self {
        self.language_version = version;
        self
    }

    pub(crate) fn capabilities(&self) -> naga::valid::Capabilities {
        match self.language_version {
            LanguageVersion::WebGpu => naga::valid::Capabilities::default(),
            LanguageVersion::Native => naga::valid::Capabilities::all(),
        }
    }
}

/// Kind of resource a function binds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    UniformBuffer,
    StorageBuffer { read_only: bool },
    Texture,
    Sampler,
    Other,
}

/// A resource binding a function actually uses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionBinding {
    pub name: Option<String>,
    pub group: u32,
    pub binding: u32,
    pub kind: BindingKind,
}

impl FunctionBinding {
    /// Whether the binding is backed by a buffer slot.
    pub fn is_buffer(&self) -> bool {
        matches!(
            self.kind,
            BindingKind::UniformBuffer | BindingKind::StorageBuffer { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_options_default() {
        let options = CompileOptions::default();
        assert!(options.fast_math_enabled);
        assert!(!options.preserve_invariance);
        assert_eq!(options.language_version, LanguageVersion::WebGpu);
    }

    #[test]
    fn test_native_language_version_enables_all_capabilities() {
        let options = CompileOptions::new().with_language_version(LanguageVersion::Native);
        assert_eq!(options.capabilities(), naga::valid::Capabilities::all());
    }
}
