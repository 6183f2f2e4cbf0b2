//! GPU error types.
//!
//! Only environmental failures (missing capabilities, compiler diagnostics,
//! failed lookups, execution faults) are reported through [`GpuError`].
//! Protocol violations such as committing with an open encoder are
//! programming errors and panic at the offending call.

use std::fmt;

/// Errors returned by device, library, pipeline and submission operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpuError {
    /// No device or backend is available on this system.
    Unsupported(String),
    /// Shader source failed to parse or validate.
    ShaderCompilationFailed(String),
    /// A named function does not exist in a library.
    FunctionNotFound(String),
    /// The device rejected a function or descriptor combination.
    PipelineCreationFailed(String),
    /// Failed to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported by the device.
    FeatureNotSupported(String),
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// Committed work failed while executing.
    ExecutionFailed(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(msg) => write!(f, "not supported on this system: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::FunctionNotFound(name) => write!(f, "function {name:?} not found"),
            Self::PipelineCreationFailed(msg) => write!(f, "pipeline creation failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::ExecutionFailed(msg) => write!(f, "command buffer execution failed: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GpuError {}
