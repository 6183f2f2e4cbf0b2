use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::GpuComputePipeline;
use crate::device::Device;
use crate::shader::Function;

/// A kernel function ready to dispatch.
pub struct ComputePipelineState {
    device_id: u64,
    function: Function,
    label: RwLock<Option<String>>,
    max_total_threads_per_threadgroup: u32,
    thread_execution_width: u32,
    gpu: GpuComputePipeline,
}

impl ComputePipelineState {
    pub(crate) fn new(device: &Arc<Device>, function: &Function, gpu: GpuComputePipeline) -> Self {
        let limits = device.limits();
        Self {
            device_id: device.registry_id(),
            function: function.clone(),
            label: RwLock::new(None),
            max_total_threads_per_threadgroup: limits.max_threads_per_threadgroup,
            thread_execution_width: limits.thread_execution_width,
            gpu,
        }
    }

    /// Upper bound on `width * height * depth` of a dispatch's threadgroup.
    pub fn max_total_threads_per_threadgroup(&self) -> u32 {
        self.max_total_threads_per_threadgroup
    }

    pub fn thread_execution_width(&self) -> u32 {
        self.thread_execution_width
    }

    pub fn function(&self) -> &Function {
        &self.function
    }

    pub fn function_name(&self) -> &str {
        self.function.name()
    }

    pub fn label(&self) -> Option<String> {
        self.label.read().clone()
    }

    pub fn set_label(&self, label: impl Into<String>) {
        *self.label.write() = Some(label.into());
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.device_id
    }

    pub(crate) fn gpu(&self) -> &GpuComputePipeline {
        &self.gpu
    }
}

impl std::fmt::Debug for ComputePipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputePipelineState")
            .field("function", &self.function.name())
            .field(
                "max_total_threads_per_threadgroup",
                &self.max_total_threads_per_threadgroup,
            )
            .finish()
    }
}

static_assertions::assert_impl_all!(ComputePipelineState: Send, Sync);
