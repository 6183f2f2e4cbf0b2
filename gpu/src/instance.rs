//! GPU instance.
//!
//! The [`Instance`] is the top-level entry point: it selects a backend,
//! discovers adapters and creates [`Device`]s on them. Most programs only
//! need the [`create_system_default_device`] shortcut.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::GpuBackend;
use crate::backend::software::{SoftwareBackend, SoftwareConfig};
use crate::device::Device;
use crate::error::GpuError;

/// Which backend an [`Instance`] drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendType {
    /// Hardware through wgpu when compiled in and an adapter exists,
    /// otherwise the software backend.
    #[default]
    Auto,
    /// CPU execution with native shader functions.
    Software,
    /// Hardware through wgpu (requires the `wgpu-backend` feature).
    Wgpu,
}

/// Configuration for [`Instance::new`].
///
/// # Example
///
/// ```ignore
/// let instance = Instance::new(
///     InstanceParameters::new()
///         .with_backend(BackendType::Software)
///         .with_software_config(SoftwareConfig::default().with_name("Test")),
/// )?;
/// ```
#[derive(Debug, Clone)]
pub struct InstanceParameters {
    pub backend: BackendType,
    pub software: SoftwareConfig,
    /// Enable backend validation layers.
    pub validation: bool,
}

impl Default for InstanceParameters {
    fn default() -> Self {
        Self {
            backend: BackendType::Auto,
            software: SoftwareConfig::default(),
            validation: cfg!(debug_assertions),
        }
    }
}

impl InstanceParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_software_config(mut self, config: SoftwareConfig) -> Self {
        self.software = config;
        self
    }

    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }
}

/// Information about a graphics adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    /// Adapter name.
    pub name: String,
    /// Adapter vendor.
    pub vendor: String,
    /// Device type (discrete, integrated, etc.).
    pub device_type: AdapterType,
    /// Backend that drives the adapter.
    pub backend: BackendType,
}

/// Type of graphics adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterType {
    /// Discrete GPU (dedicated graphics card).
    Discrete,
    /// Integrated GPU (shared with CPU).
    Integrated,
    /// Software renderer.
    Software,
    /// Unknown adapter type.
    Unknown,
}

enum AdapterSource {
    Software,
    #[cfg(feature = "wgpu-backend")]
    Wgpu(wgpu::Adapter),
}

struct Adapter {
    info: AdapterInfo,
    source: AdapterSource,
}

/// The instance discovers adapters and creates devices on them.
///
/// # Thread Safety
///
/// `Instance` is `Send + Sync` and can be shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = Instance::new(InstanceParameters::default())?;
/// for adapter in instance.enumerate_adapters() {
///     println!("{} ({:?})", adapter.name, adapter.device_type);
/// }
/// let device = instance.create_default_device()?;
/// ```
pub struct Instance {
    parameters: InstanceParameters,
    adapters: Vec<Adapter>,
    devices: RwLock<Vec<Arc<Device>>>,
}

impl Instance {
    /// Create an instance and discover its adapters.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::Unsupported`] if [`BackendType::Wgpu`] is requested
    /// and no hardware adapter is available.
    pub fn new(parameters: InstanceParameters) -> Result<Arc<Self>, GpuError> {
        log::info!("Creating Instance (backend: {:?})", parameters.backend);

        let adapters = match parameters.backend {
            BackendType::Software => vec![software_adapter(&parameters.software)],
            BackendType::Wgpu => {
                let adapters = hardware_adapters(&parameters)?;
                if adapters.is_empty() {
                    return Err(GpuError::Unsupported(
                        "no wgpu adapter available".to_string(),
                    ));
                }
                adapters
            }
            BackendType::Auto => match hardware_adapters(&parameters) {
                Ok(adapters) if !adapters.is_empty() => adapters,
                Ok(_) => {
                    log::warn!("No hardware adapter found, falling back to the software backend");
                    vec![software_adapter(&parameters.software)]
                }
                Err(e) => {
                    log::warn!(
                        "Hardware backend unavailable ({e}), falling back to the software backend"
                    );
                    vec![software_adapter(&parameters.software)]
                }
            },
        };

        for adapter in &adapters {
            log::info!(
                "Adapter: {} ({:?}, {:?})",
                adapter.info.name,
                adapter.info.device_type,
                adapter.info.backend
            );
        }

        Ok(Arc::new(Self {
            parameters,
            adapters,
            devices: RwLock::new(Vec::new()),
        }))
    }

    pub fn parameters(&self) -> &InstanceParameters {
        &self.parameters
    }

    /// Information about every adapter this instance can create devices on.
    pub fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters
            .iter()
            .map(|adapter| adapter.info.clone())
            .collect()
    }

    /// Create a device on the adapter at `adapter_index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the adapter index is invalid or device creation
    /// fails.
    pub fn create_device(&self, adapter_index: usize) -> Result<Arc<Device>, GpuError> {
        let adapter = self.adapters.get(adapter_index).ok_or_else(|| {
            GpuError::InvalidParameter(format!(
                "adapter index {adapter_index} out of range ({})",
                self.adapters.len()
            ))
        })?;
        log::info!("Creating device on adapter: {}", adapter.info.name);

        let backend: Arc<dyn GpuBackend> = match &adapter.source {
            AdapterSource::Software => {
                Arc::new(SoftwareBackend::new(self.parameters.software.clone()))
            }
            #[cfg(feature = "wgpu-backend")]
            AdapterSource::Wgpu(wgpu_adapter) => Arc::new(
                crate::backend::wgpu_backend::WgpuBackend::new(wgpu_adapter)?,
            ),
        };

        let device = Arc::new(Device::new(adapter.info.clone(), backend));
        self.devices.write().push(Arc::clone(&device));
        Ok(device)
    }

    /// Create a device on the preferred adapter.
    pub fn create_default_device(&self) -> Result<Arc<Device>, GpuError> {
        self.create_device(0)
    }

    /// Create one device per adapter. Adapters that fail are skipped.
    pub fn enumerate_devices(&self) -> Vec<Arc<Device>> {
        (0..self.adapters.len())
            .filter_map(|index| match self.create_device(index) {
                Ok(device) => Some(device),
                Err(e) => {
                    log::warn!("Skipping adapter {index}: {e}");
                    None
                }
            })
            .collect()
    }

    /// Devices created by this instance.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("backend", &self.parameters.backend)
            .field("adapters", &self.enumerate_adapters())
            .field("device_count", &self.device_count())
            .finish()
    }
}

// Ensure Instance is Send + Sync
static_assertions::assert_impl_all!(Instance: Send, Sync);

/// Create a device on the preferred adapter of a default instance.
///
/// # Errors
///
/// Returns an error if no device can be created.
pub fn create_system_default_device() -> Result<Arc<Device>, GpuError> {
    Instance::new(InstanceParameters::default())?.create_default_device()
}

/// Create a device on every adapter of a default instance.
pub fn copy_all_devices() -> Vec<Arc<Device>> {
    match Instance::new(InstanceParameters::default()) {
        Ok(instance) => instance.enumerate_devices(),
        Err(e) => {
            log::warn!("No devices available: {e}");
            Vec::new()
        }
    }
}

fn software_adapter(config: &SoftwareConfig) -> Adapter {
    Adapter {
        info: AdapterInfo {
            name: config.name.clone(),
            vendor: "RedLilium".to_string(),
            device_type: AdapterType::Software,
            backend: BackendType::Software,
        },
        source: AdapterSource::Software,
    }
}

#[cfg(feature = "wgpu-backend")]
fn hardware_adapters(parameters: &InstanceParameters) -> Result<Vec<Adapter>, GpuError> {
    crate::backend::wgpu_backend::request_adapters(parameters.validation).map(|adapters| {
        adapters
            .into_iter()
            .map(|(info, adapter)| Adapter {
                info,
                source: AdapterSource::Wgpu(adapter),
            })
            .collect()
    })
}

#[cfg(not(feature = "wgpu-backend"))]
fn hardware_adapters(_parameters: &InstanceParameters) -> Result<Vec<Adapter>, GpuError> {
    Err(GpuError::Unsupported(
        "built without the wgpu-backend feature".to_string(),
    ))
}
