//! # RedLilium GPU Demos
//!
//! Small command-line programs built on `redlilium-gpu`.
//!
//! ## Available Demos
//!
//! - `calc` - Adds two arrays in a compute kernel
//! - `info` - Lists devices and the GPU families they support
//! - `render` - Draws a triangle offscreen and saves it as a PNG
//!
//! Each demo runs on hardware through wgpu when built with the
//! `wgpu-backend` feature and an adapter is present. Otherwise it falls back
//! to the software backend, using the native functions the demo registers.

use std::sync::Arc;

use redlilium_gpu::{
    BackendType, Device, GpuError, Instance, InstanceParameters, NativeFunctions, SoftwareConfig,
};

/// Demos library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging with an `info` default, overridable through `RUST_LOG`.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

/// Instance parameters that prefer hardware and fall back to software.
pub fn instance_parameters(natives: NativeFunctions) -> InstanceParameters {
    InstanceParameters::new()
        .with_backend(BackendType::Auto)
        .with_software_config(SoftwareConfig::default().with_native_functions(natives))
}

/// Create the preferred device, with `natives` available to the software
/// backend.
pub fn create_device(natives: NativeFunctions) -> Result<Arc<Device>, GpuError> {
    let instance = Instance::new(instance_parameters(natives))?;
    let device = instance.create_default_device()?;
    log::info!(
        "Using {} on the {} backend",
        device.name(),
        device.backend_name()
    );
    Ok(device)
}
