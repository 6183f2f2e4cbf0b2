//! wgpu GPU backend implementation.
//!
//! This backend uses wgpu for hardware access through Vulkan, Metal, DX12
//! or GL. Every resource keeps a host copy next to its wgpu allocation:
//! host writes are uploaded before a command buffer runs, and the copies of
//! resources the storage mode makes CPU visible are read back after it
//! completes.
//!
//! | Storage mode | Uploaded when dirty | Read back after execution |
//! |--------------|---------------------|---------------------------|
//! | Shared       | yes                 | always                    |
//! | Managed      | yes                 | after `synchronize_resource` |
//! | Private      | no                  | never                     |
//! | Memoryless   | no                  | never                     |

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::command::{
    BindingSlot, BindingTable, BlitCommand, ColorTarget, DispatchCommand, DrawCommand,
    EncodedPass, MAX_BUFFER_BINDINGS, RenderPass,
};
use crate::device::{DeviceCapabilities, DeviceInfo, DeviceLimits, GpuFamily};
use crate::error::GpuError;
use crate::instance::{AdapterInfo, AdapterType, BackendType};
use crate::pipeline::RenderPipelineDescriptor;
use crate::resources::memory::PixelLayout;
use crate::resources::{AnyResource, Buffer, Resource, ResourceId, Texture};
use crate::shader::{Function, FunctionBinding};
use crate::types::{
    LoadAction, PixelFormat, PrimitiveType, ResourceOptions, StorageMode, StoreAction,
    TextureDescriptor, TextureType, TextureUsage,
};

use super::{GpuBackend, GpuBuffer, GpuComputePipeline, GpuRenderPipeline, GpuTexture};

/// Bind group holding vertex stage buffers.
const VERTEX_GROUP: u32 = 0;
/// Bind group holding fragment stage buffers.
const FRAGMENT_GROUP: u32 = 1;
/// Bind group holding kernel buffers.
const COMPUTE_GROUP: u32 = 0;

/// Inline constant blocks are padded to this size before upload.
const INLINE_ALIGNMENT: usize = 16;

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Adapter discovery
// ============================================================================

/// Find the hardware adapter to drive.
///
/// An empty list means wgpu found no adapter; it is not an error.
pub(crate) fn request_adapters(
    validation: bool,
) -> Result<Vec<(AdapterInfo, wgpu::Adapter)>, GpuError> {
    let flags = if validation {
        wgpu::InstanceFlags::debugging()
    } else {
        wgpu::InstanceFlags::default()
    };
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        flags,
        backend_options: wgpu::BackendOptions::default(),
        memory_budget_thresholds: wgpu::MemoryBudgetThresholds::default(),
    });

    let adapter = match pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    })) {
        Ok(adapter) => adapter,
        Err(e) => {
            log::debug!("No compatible wgpu adapter: {e}");
            return Ok(Vec::new());
        }
    };

    let info = adapter.get_info();
    log::info!("wgpu adapter: {:?}", info);
    Ok(vec![(convert_adapter_info(&info), adapter)])
}

fn convert_adapter_info(info: &wgpu::AdapterInfo) -> AdapterInfo {
    let vendor = if info.driver.is_empty() {
        format!("{:#06x}", info.vendor)
    } else {
        info.driver.clone()
    };
    AdapterInfo {
        name: info.name.clone(),
        vendor,
        device_type: match info.device_type {
            wgpu::DeviceType::DiscreteGpu => AdapterType::Discrete,
            wgpu::DeviceType::IntegratedGpu => AdapterType::Integrated,
            wgpu::DeviceType::Cpu => AdapterType::Software,
            wgpu::DeviceType::VirtualGpu | wgpu::DeviceType::Other => AdapterType::Unknown,
        },
        backend: BackendType::Wgpu,
    }
}

// ============================================================================
// Backend
// ============================================================================

/// wgpu-based GPU backend.
pub(crate) struct WgpuBackend {
    info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: wgpu::Limits,
    /// Serializes upload, submission and readback of whole command buffers.
    submission: Mutex<()>,
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WgpuBackend")
            .field("adapter", &self.info.name)
            .field("backend", &self.info.backend)
            .finish()
    }
}

impl WgpuBackend {
    /// Open a device on `adapter`.
    pub(crate) fn new(adapter: &wgpu::Adapter) -> Result<Self, GpuError> {
        let info = adapter.get_info();
        let limits = adapter.limits();

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("RedLilium GPU Device"),
            required_features: wgpu::Features::empty(),
            required_limits: limits.clone(),
            memory_hints: wgpu::MemoryHints::default(),
            experimental_features: wgpu::ExperimentalFeatures::default(),
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| GpuError::ResourceCreationFailed(format!("Device creation failed: {e}")))?;

        log::info!("WgpuBackend: opened {} ({:?})", info.name, info.backend);
        Ok(Self {
            info,
            device,
            queue,
            limits,
            submission: Mutex::new(()),
        })
    }

    fn inline_buffer(&self, bytes: &[u8]) -> wgpu::Buffer {
        let padded_len = bytes.len().next_multiple_of(INLINE_ALIGNMENT).max(INLINE_ALIGNMENT);
        let mut contents = bytes.to_vec();
        contents.resize(padded_len, 0);
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Inline Bytes"),
                contents: &contents,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
            })
    }

    /// Build the bind group for the buffers `bindings` names, resolved
    /// against the slots of `table`.
    fn bind_group(
        &self,
        layout: &wgpu::BindGroupLayout,
        bindings: &[&FunctionBinding],
        table: &BindingTable,
    ) -> Result<wgpu::BindGroup, GpuError> {
        // Inline blocks must outlive the entries that borrow them.
        let inline: Vec<Option<wgpu::Buffer>> = bindings
            .iter()
            .map(|binding| match table.get(binding.binding as usize) {
                Some(BindingSlot::Bytes(bytes)) => Some(self.inline_buffer(bytes)),
                _ => None,
            })
            .collect();

        let alignment = u64::from(self.limits.min_storage_buffer_offset_alignment)
            .max(u64::from(self.limits.min_uniform_buffer_offset_alignment));

        let mut entries = Vec::with_capacity(bindings.len());
        for (binding, inline) in bindings.iter().zip(&inline) {
            let resource = match (inline, table.get(binding.binding as usize)) {
                (Some(buffer), _) => buffer.as_entire_buffer_binding(),
                (None, Some(BindingSlot::Buffer { buffer, offset })) => {
                    let offset = *offset as u64;
                    if offset % alignment != 0 {
                        return Err(GpuError::ExecutionFailed(format!(
                            "buffer offset {offset} at index {} is not a multiple of {alignment}",
                            binding.binding
                        )));
                    }
                    wgpu::BufferBinding {
                        buffer: wgpu_buffer(buffer)?,
                        offset,
                        size: None,
                    }
                }
                _ => {
                    return Err(GpuError::ExecutionFailed(format!(
                        "shader binding {} ({}) has nothing bound at index {}",
                        binding.binding,
                        binding.name.as_deref().unwrap_or("unnamed"),
                        binding.binding
                    )));
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: binding.binding,
                resource: wgpu::BindingResource::Buffer(resource),
            });
        }

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: None,
            layout,
            entries: &entries,
        }))
    }

    // ------------------------------------------------------------------------
    // Upload
    // ------------------------------------------------------------------------

    fn upload(&self, touched: &Touched) -> Result<(), GpuError> {
        for buffer in &touched.buffers {
            if !buffer.storage_mode().is_cpu_accessible() {
                continue;
            }
            let mut memory = buffer.memory().write();
            if !memory.take_dirty() {
                continue;
            }
            let bytes = memory.bytes();
            let padded_len = bytes.len().next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT as usize);
            log::trace!(
                "WgpuBackend: uploading buffer {} ({} bytes)",
                buffer.resource_id(),
                bytes.len()
            );
            if padded_len == bytes.len() {
                self.queue.write_buffer(wgpu_buffer(buffer)?, 0, bytes);
            } else {
                let mut padded = bytes.to_vec();
                padded.resize(padded_len, 0);
                self.queue.write_buffer(wgpu_buffer(buffer)?, 0, &padded);
            }
        }

        for texture in &touched.textures {
            if !texture.storage_mode().is_cpu_accessible() {
                continue;
            }
            let gpu = wgpu_texture(texture)?;
            let mut subresources = texture.subresources().write();
            for slice in 0..texture.array_length() {
                for level in 0..texture.mipmap_level_count() {
                    let (index, layout) = texture.subresource(level, slice);
                    let memory = &mut subresources[index];
                    if !memory.take_dirty() {
                        continue;
                    }
                    log::trace!(
                        "WgpuBackend: uploading texture {} level {level} slice {slice}",
                        texture.resource_id()
                    );
                    self.queue.write_texture(
                        texel_copy(gpu, texture.texture_type(), level, slice, wgpu::Origin3d::ZERO),
                        memory.bytes(),
                        wgpu::TexelCopyBufferLayout {
                            offset: 0,
                            bytes_per_row: Some(layout.bytes_per_row() as u32),
                            rows_per_image: Some(layout.extent.height),
                        },
                        copy_extent(texture.texture_type(), &layout),
                    );
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pass encoding
    // ------------------------------------------------------------------------

    fn encode_compute(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        dispatches: &[DispatchCommand],
    ) -> Result<(), GpuError> {
        // Bind groups are created up front so the pass can borrow them.
        let mut prepared = Vec::with_capacity(dispatches.len());
        for dispatch in dispatches {
            let GpuComputePipeline::Wgpu {
                pipeline,
                workgroup_size,
            } = dispatch.pipeline.gpu()
            else {
                return Err(GpuError::Internal(
                    "compute pipeline was not created by the wgpu backend".to_string(),
                ));
            };
            let bindings = stage_bindings(dispatch.pipeline.function(), COMPUTE_GROUP);
            let bind_group = if bindings.is_empty() {
                None
            } else {
                let layout = pipeline.get_bind_group_layout(COMPUTE_GROUP);
                Some(self.bind_group(&layout, &bindings, &dispatch.bindings)?)
            };
            let grid = dispatch.threads_per_grid;
            let workgroups = [
                grid.width.div_ceil(workgroup_size[0].max(1)),
                grid.height.div_ceil(workgroup_size[1].max(1)),
                grid.depth.div_ceil(workgroup_size[2].max(1)),
            ];
            prepared.push((pipeline, bind_group, workgroups));
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Compute Pass"),
            timestamp_writes: None,
        });
        for (pipeline, bind_group, [x, y, z]) in &prepared {
            if *x == 0 || *y == 0 || *z == 0 {
                continue;
            }
            pass.set_pipeline(pipeline);
            if let Some(bind_group) = bind_group {
                pass.set_bind_group(COMPUTE_GROUP, bind_group, &[]);
            }
            pass.dispatch_workgroups(*x, *y, *z);
        }
        Ok(())
    }

    fn encode_render(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        render_pass: &RenderPass,
    ) -> Result<(), GpuError> {
        let views = render_pass
            .color_targets
            .iter()
            .map(|target| target.as_ref().map(attachment_view).transpose())
            .collect::<Result<Vec<_>, _>>()?;
        let attachment_count = views.iter().rposition(Option::is_some).map_or(0, |i| i + 1);

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = render_pass
            .color_targets
            .iter()
            .zip(&views)
            .take(attachment_count)
            .map(|(target, view)| match (target, view) {
                (Some(target), Some(view)) => Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: convert_load_action(target),
                        store: convert_store_action(target.store_action),
                    },
                    depth_slice: None,
                }),
                _ => None,
            })
            .collect();

        let mut prepared = Vec::with_capacity(render_pass.draws.len());
        for draw in &render_pass.draws {
            let GpuRenderPipeline::Wgpu(pipeline) = draw.pipeline.gpu() else {
                return Err(GpuError::Internal(
                    "render pipeline was not created by the wgpu backend".to_string(),
                ));
            };
            let wgpu_pipeline = pipeline.pipeline_for(draw.primitive_type)?;
            let bind_groups = self.draw_bind_groups(&wgpu_pipeline, pipeline, draw)?;
            prepared.push((wgpu_pipeline, bind_groups, draw));
        }

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Render Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        for (pipeline, bind_groups, draw) in &prepared {
            if draw.vertex_count == 0 {
                continue;
            }
            pass.set_pipeline(pipeline);
            for (group, bind_group) in bind_groups.iter().enumerate() {
                pass.set_bind_group(group as u32, bind_group, &[]);
            }
            let start = draw.vertex_start as u32;
            pass.draw(start..start + draw.vertex_count as u32, 0..1);
        }
        Ok(())
    }

    fn draw_bind_groups(
        &self,
        wgpu_pipeline: &wgpu::RenderPipeline,
        pipeline: &WgpuRenderPipeline,
        draw: &DrawCommand,
    ) -> Result<Vec<wgpu::BindGroup>, GpuError> {
        let vertex = stage_bindings(draw.pipeline.vertex_function(), VERTEX_GROUP);
        let fragment = draw
            .pipeline
            .fragment_function()
            .map(|function| stage_bindings(function, FRAGMENT_GROUP))
            .unwrap_or_default();

        let group_count = if !fragment.is_empty() {
            FRAGMENT_GROUP + 1
        } else if !vertex.is_empty() {
            VERTEX_GROUP + 1
        } else {
            0
        };
        log::trace!(
            "WgpuBackend: draw with {:?} binds {group_count} groups",
            pipeline.label
        );

        (0..group_count)
            .map(|group| {
                let layout = wgpu_pipeline.get_bind_group_layout(group);
                if group == VERTEX_GROUP {
                    self.bind_group(&layout, &vertex, &draw.vertex_bindings)
                } else {
                    self.bind_group(&layout, &fragment, &draw.fragment_bindings)
                }
            })
            .collect()
    }

    fn encode_blit(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        commands: &[BlitCommand],
        staging: &mut Vec<wgpu::Buffer>,
    ) -> Result<(), GpuError> {
        for command in commands {
            match command {
                BlitCommand::CopyTexture {
                    source,
                    source_slice,
                    source_level,
                    source_origin,
                    source_size,
                    destination,
                    destination_slice,
                    destination_level,
                    destination_origin,
                } => {
                    if source_size.is_empty() {
                        continue;
                    }
                    let source_type = source.texture_type();
                    let destination_type = destination.texture_type();
                    let source_origin = wgpu::Origin3d {
                        x: source_origin.x,
                        y: source_origin.y,
                        z: source_origin.z,
                    };
                    let destination_origin = wgpu::Origin3d {
                        x: destination_origin.x,
                        y: destination_origin.y,
                        z: destination_origin.z,
                    };
                    encoder.copy_texture_to_texture(
                        texel_copy(
                            wgpu_texture(source)?,
                            source_type,
                            *source_level,
                            *source_slice,
                            source_origin,
                        ),
                        texel_copy(
                            wgpu_texture(destination)?,
                            destination_type,
                            *destination_level,
                            *destination_slice,
                            destination_origin,
                        ),
                        wgpu::Extent3d {
                            width: source_size.width,
                            height: source_size.height,
                            depth_or_array_layers: source_size.depth,
                        },
                    );
                }
                BlitCommand::CopyBuffer {
                    source,
                    source_offset,
                    destination,
                    destination_offset,
                    size,
                } => {
                    if *size == 0 {
                        continue;
                    }
                    check_copy_alignment(&[*source_offset, *destination_offset, *size])?;
                    encoder.copy_buffer_to_buffer(
                        wgpu_buffer(source)?,
                        *source_offset as u64,
                        wgpu_buffer(destination)?,
                        *destination_offset as u64,
                        *size as u64,
                    );
                }
                BlitCommand::FillBuffer {
                    buffer,
                    range,
                    value,
                } => {
                    if range.is_empty() {
                        continue;
                    }
                    check_copy_alignment(&[range.start, range.len()])?;
                    let target = wgpu_buffer(buffer)?;
                    if *value == 0 {
                        encoder.clear_buffer(target, range.start as u64, Some(range.len() as u64));
                    } else {
                        let fill = self
                            .device
                            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                                label: Some("Fill Staging Buffer"),
                                contents: &vec![*value; range.len()],
                                usage: wgpu::BufferUsages::COPY_SRC,
                            });
                        encoder.copy_buffer_to_buffer(
                            &fill,
                            0,
                            target,
                            range.start as u64,
                            range.len() as u64,
                        );
                        staging.push(fill);
                    }
                }
                // Readback of synchronized resources is scheduled after all passes.
                BlitCommand::Synchronize(_) => {}
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------------

    fn schedule_readback(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        touched: &Touched,
    ) -> Result<Vec<Readback>, GpuError> {
        let mut readbacks = Vec::new();

        for buffer in touched
            .buffers
            .iter()
            .filter(|b| touched.needs_readback(b.resource_id(), b.storage_mode())) {
            let size = (buffer.length() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
            if size == 0 {
                continue;
            }
            let staging = self.staging_buffer(size);
            encoder.copy_buffer_to_buffer(wgpu_buffer(buffer)?, 0, &staging, 0, size);
            readbacks.push(Readback {
                staging,
                target: ReadbackTarget::Buffer(Arc::clone(buffer)),
            });
        }

        for texture in touched
            .textures
            .iter()
            .filter(|t| touched.needs_readback(t.resource_id(), t.storage_mode())) {
            let gpu = wgpu_texture(texture)?;
            for slice in 0..texture.array_length() {
                for level in 0..texture.mipmap_level_count() {
                    let (index, layout) = texture.subresource(level, slice);
                    let padded_row = layout
                        .bytes_per_row()
                        .next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as usize);
                    let rows = layout.extent.height as usize * layout.extent.depth as usize;
                    let staging = self.staging_buffer((padded_row * rows) as u64);
                    encoder.copy_texture_to_buffer(
                        texel_copy(gpu, texture.texture_type(), level, slice, wgpu::Origin3d::ZERO),
                        wgpu::TexelCopyBufferInfo {
                            buffer: &staging,
                            layout: wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(padded_row as u32),
                                rows_per_image: Some(layout.extent.height),
                            },
                        },
                        copy_extent(texture.texture_type(), &layout),
                    );
                    readbacks.push(Readback {
                        staging,
                        target: ReadbackTarget::Texture {
                            texture: Arc::clone(texture),
                            index,
                            layout,
                            padded_row,
                        },
                    });
                }
            }
        }
        Ok(readbacks)
    }

    fn staging_buffer(&self, size: u64) -> wgpu::Buffer {
        self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        })
    }

    fn complete_readback(&self, readbacks: Vec<Readback>) -> Result<(), GpuError> {
        if readbacks.is_empty() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        for readback in &readbacks {
            let tx = tx.clone();
            readback
                .staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result);
                });
        }
        drop(tx);
        self.device
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::ExecutionFailed(format!("readback poll failed: {e}")))?;
        for result in rx.iter() {
            result.map_err(|e| GpuError::ExecutionFailed(format!("readback mapping failed: {e}")))?;
        }

        for readback in readbacks {
            {
                let mapped = readback.staging.slice(..).get_mapped_range();
                match &readback.target {
                    ReadbackTarget::Buffer(buffer) => {
                        let mut memory = buffer.memory().write();
                        let len = memory.len();
                        memory.bytes_mut().copy_from_slice(&mapped[..len]);
                    }
                    ReadbackTarget::Texture {
                        texture,
                        index,
                        layout,
                        padded_row,
                    } => {
                        let mut subresources = texture.subresources().write();
                        let bytes = subresources[*index].bytes_mut();
                        let row = layout.bytes_per_row();
                        for (dst, src) in
                            bytes.chunks_exact_mut(row).zip(mapped.chunks(*padded_row))
                        {
                            dst.copy_from_slice(&src[..row]);
                        }
                    }
                }
            }
            readback.staging.unmap();
        }
        Ok(())
    }
}

impl GpuBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn device_info(&self) -> DeviceInfo {
        let device_type = self.info.device_type;
        DeviceInfo {
            name: self.info.name.clone(),
            headless: false,
            low_power: device_type == wgpu::DeviceType::IntegratedGpu,
            removable: false,
            unified_memory: matches!(
                device_type,
                wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::Cpu
            ),
        }
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut families = vec![GpuFamily::Common1, GpuFamily::Common2, GpuFamily::Common3];
        if self.info.backend == wgpu::Backend::Metal {
            families.push(GpuFamily::Metal3);
        }
        let limits = &self.limits;
        DeviceCapabilities {
            families,
            limits: DeviceLimits {
                max_threads_per_threadgroup: limits.max_compute_invocations_per_workgroup,
                max_buffer_length: limits
                    .max_buffer_size
                    .min(u64::from(limits.max_storage_buffer_binding_size))
                    as usize,
                max_texture_dimension_2d: limits.max_texture_dimension_2d,
                max_texture_dimension_3d: limits.max_texture_dimension_3d,
                max_texture_array_layers: limits.max_texture_array_layers,
                max_buffer_bindings: (limits.max_storage_buffers_per_shader_stage as usize)
                    .min(MAX_BUFFER_BINDINGS),
                max_inline_bytes: (limits.max_uniform_buffer_binding_size as usize)
                    .min(DeviceLimits::default().max_inline_bytes),
                max_color_attachments: (limits.max_color_attachments as usize)
                    .min(DeviceLimits::default().max_color_attachments),
                ..DeviceLimits::default()
            },
            storage_modes: StorageMode::ALL.to_vec(),
        }
    }

    fn create_buffer(
        &self,
        length: usize,
        options: ResourceOptions,
    ) -> Result<GpuBuffer, GpuError> {
        let size = (length as u64)
            .next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
            .max(wgpu::COPY_BUFFER_ALIGNMENT);
        log::trace!("WgpuBackend: creating buffer ({length} bytes, {options:?})");
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: None,
            size,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::VERTEX
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        Ok(GpuBuffer::Wgpu(Arc::new(buffer)))
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<GpuTexture, GpuError> {
        let format = convert_pixel_format(descriptor.pixel_format).ok_or_else(|| {
            GpuError::ResourceCreationFailed(format!(
                "pixel format {:?} has no wgpu equivalent",
                descriptor.pixel_format
            ))
        })?;

        let mut usage = wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST
            | wgpu::TextureUsages::TEXTURE_BINDING;
        if descriptor.usage.contains(TextureUsage::RENDER_TARGET) {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        if descriptor.usage.contains(TextureUsage::SHADER_WRITE) && !format.is_srgb() {
            usage |= wgpu::TextureUsages::STORAGE_BINDING;
        }

        let (dimension, depth_or_array_layers) = match descriptor.texture_type {
            TextureType::D3 => (wgpu::TextureDimension::D3, descriptor.depth),
            TextureType::D2 | TextureType::D2Array => {
                (wgpu::TextureDimension::D2, descriptor.array_length)
            }
        };

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: descriptor.label.as_deref(),
            size: wgpu::Extent3d {
                width: descriptor.width,
                height: descriptor.height,
                depth_or_array_layers,
            },
            mip_level_count: descriptor.mipmap_level_count,
            sample_count: 1,
            dimension,
            format,
            usage,
            view_formats: &[],
        });
        Ok(GpuTexture::Wgpu(Arc::new(texture)))
    }

    fn create_compute_pipeline(&self, function: &Function) -> Result<GpuComputePipeline, GpuError> {
        check_stage_bindings(function, COMPUTE_GROUP)?;
        let module = create_module(&self.device, function);
        let pipeline = catch_wgpu_panic("compute pipeline", || {
            self.device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(function.name()),
                    layout: None,
                    module: &module,
                    entry_point: Some(function.name()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
        })?;
        Ok(GpuComputePipeline::Wgpu {
            pipeline: Arc::new(pipeline),
            workgroup_size: function.workgroup_size(),
        })
    }

    fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<GpuRenderPipeline, GpuError> {
        let pipeline = WgpuRenderPipeline::new(&self.device, descriptor)?;
        // Build the common topology now so shader errors surface at creation.
        pipeline.pipeline_for(PrimitiveType::Triangle)?;
        Ok(GpuRenderPipeline::Wgpu(pipeline))
    }

    fn execute(&self, passes: &[EncodedPass]) -> Result<(), GpuError> {
        let _guard = self.submission.lock();

        let touched = Touched::collect(passes);
        self.upload(&touched)?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Command Buffer"),
            });
        let mut staging = Vec::new();
        for pass in passes {
            match pass {
                EncodedPass::Compute(dispatches) => self.encode_compute(&mut encoder, dispatches)?,
                EncodedPass::Render(render_pass) => self.encode_render(&mut encoder, render_pass)?,
                EncodedPass::Blit(commands) => {
                    self.encode_blit(&mut encoder, commands, &mut staging)?
                }
            }
        }
        let readbacks = self.schedule_readback(&mut encoder, &touched)?;

        let submission_index = self.queue.submit(std::iter::once(encoder.finish()));
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: Some(submission_index),
                timeout: Some(SUBMIT_TIMEOUT),
            })
            .map_err(|e| {
                GpuError::ExecutionFailed(format!("command buffer did not complete: {e}"))
            })?;
        drop(staging);

        self.complete_readback(readbacks)
    }
}

// Ensure WgpuBackend is Send + Sync
static_assertions::assert_impl_all!(WgpuBackend: Send, Sync);

// ============================================================================
// Render pipeline
// ============================================================================

/// Shader modules and attachment formats of a render pipeline state.
///
/// wgpu bakes the primitive topology into the pipeline, so one wgpu pipeline
/// is built per [`PrimitiveType`] the first time a draw uses it.
pub(crate) struct WgpuRenderPipeline {
    device: wgpu::Device,
    label: Option<String>,
    vertex_module: wgpu::ShaderModule,
    vertex_entry: String,
    fragment: Option<(wgpu::ShaderModule, String)>,
    color_targets: Vec<Option<wgpu::ColorTargetState>>,
    pipelines: Mutex<HashMap<PrimitiveType, wgpu::RenderPipeline>>,
}

impl WgpuRenderPipeline {
    fn new(device: &wgpu::Device, descriptor: &RenderPipelineDescriptor) -> Result<Self, GpuError> {
        let vertex_function = descriptor.vertex_function.as_ref().ok_or_else(|| {
            GpuError::PipelineCreationFailed("vertex function is not set".to_string())
        })?;
        check_stage_bindings(vertex_function, VERTEX_GROUP)?;
        if let Some(fragment_function) = &descriptor.fragment_function {
            check_stage_bindings(fragment_function, FRAGMENT_GROUP)?;
        }

        let mut color_targets = descriptor
            .color_attachments
            .iter()
            .map(|attachment| match attachment.pixel_format {
                PixelFormat::Invalid => Ok(None),
                format => convert_pixel_format(format)
                    .map(|format| {
                        Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })
                    })
                    .ok_or_else(|| {
                        GpuError::PipelineCreationFailed(format!(
                            "pixel format {format:?} has no wgpu equivalent"
                        ))
                    }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        while matches!(color_targets.last(), Some(None)) {
            color_targets.pop();
        }

        Ok(Self {
            device: device.clone(),
            label: descriptor.label.clone(),
            vertex_module: create_module(device, vertex_function),
            vertex_entry: vertex_function.name().to_string(),
            fragment: descriptor
                .fragment_function
                .as_ref()
                .map(|function| (create_module(device, function), function.name().to_string())),
            color_targets,
            pipelines: Mutex::new(HashMap::new()),
        })
    }

    fn pipeline_for(
        &self,
        primitive_type: PrimitiveType,
    ) -> Result<wgpu::RenderPipeline, GpuError> {
        let mut pipelines = self.pipelines.lock();
        if let Some(pipeline) = pipelines.get(&primitive_type) {
            return Ok(pipeline.clone());
        }

        log::debug!(
            "WgpuRenderPipeline: building {:?} pipeline for {primitive_type:?}",
            self.label
        );
        let pipeline = catch_wgpu_panic("render pipeline", || {
            self.device
                .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: self.label.as_deref(),
                    layout: None,
                    vertex: wgpu::VertexState {
                        module: &self.vertex_module,
                        entry_point: Some(&self.vertex_entry),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: self.fragment.as_ref().map(|(module, entry)| wgpu::FragmentState {
                        module,
                        entry_point: Some(entry),
                        targets: &self.color_targets,
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState {
                        topology: convert_topology(primitive_type),
                        strip_index_format: None,
                        front_face: wgpu::FrontFace::Ccw,
                        cull_mode: None,
                        polygon_mode: wgpu::PolygonMode::Fill,
                        unclipped_depth: false,
                        conservative: false,
                    },
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview_mask: None,
                    cache: None,
                })
        })?;
        pipelines.insert(primitive_type, pipeline.clone());
        Ok(pipeline)
    }
}

// ============================================================================
// Execution bookkeeping
// ============================================================================

/// Every resource a command buffer references, each listed once.
#[derive(Default)]
struct Touched {
    buffers: Vec<Arc<Buffer>>,
    textures: Vec<Arc<Texture>>,
    seen: HashSet<ResourceId>,
    synchronized: HashSet<ResourceId>,
}

impl Touched {
    fn collect(passes: &[EncodedPass]) -> Self {
        let mut touched = Self::default();
        for pass in passes {
            match pass {
                EncodedPass::Compute(dispatches) => {
                    for dispatch in dispatches {
                        dispatch.bindings.buffers().for_each(|b| touched.add_buffer(b));
                    }
                }
                EncodedPass::Render(render_pass) => {
                    for target in render_pass.color_targets.iter().flatten() {
                        touched.add_texture(&target.texture);
                    }
                    for draw in &render_pass.draws {
                        draw.vertex_bindings.buffers().for_each(|b| touched.add_buffer(b));
                        draw.fragment_bindings.buffers().for_each(|b| touched.add_buffer(b));
                    }
                }
                EncodedPass::Blit(commands) => {
                    for command in commands {
                        match command {
                            BlitCommand::CopyTexture {
                                source,
                                destination,
                                ..
                            } => {
                                touched.add_texture(source);
                                touched.add_texture(destination);
                            }
                            BlitCommand::CopyBuffer {
                                source,
                                destination,
                                ..
                            } => {
                                touched.add_buffer(source);
                                touched.add_buffer(destination);
                            }
                            BlitCommand::FillBuffer { buffer, .. } => touched.add_buffer(buffer),
                            BlitCommand::Synchronize(resource) => {
                                match resource {
                                    AnyResource::Buffer(buffer) => touched.add_buffer(buffer),
                                    AnyResource::Texture(texture) => touched.add_texture(texture),
                                }
                                touched.synchronized.insert(resource.resource_id());
                            }
                        }
                    }
                }
            }
        }
        touched
    }

    fn add_buffer(&mut self, buffer: &Arc<Buffer>) {
        if self.seen.insert(buffer.resource_id()) {
            self.buffers.push(Arc::clone(buffer));
        }
    }

    fn add_texture(&mut self, texture: &Arc<Texture>) {
        if self.seen.insert(texture.resource_id()) {
            self.textures.push(Arc::clone(texture));
        }
    }

    fn needs_readback(&self, id: ResourceId, storage_mode: StorageMode) -> bool {
        match storage_mode {
            StorageMode::Shared => true,
            StorageMode::Managed => self.synchronized.contains(&id),
            StorageMode::Private | StorageMode::Memoryless => false,
        }
    }
}

struct Readback {
    staging: wgpu::Buffer,
    target: ReadbackTarget,
}

enum ReadbackTarget {
    Buffer(Arc<Buffer>),
    Texture {
        texture: Arc<Texture>,
        index: usize,
        layout: PixelLayout,
        padded_row: usize,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn wgpu_buffer(buffer: &Buffer) -> Result<&wgpu::Buffer, GpuError> {
    match buffer.gpu_buffer() {
        GpuBuffer::Wgpu(gpu) => Ok(gpu.as_ref()),
        GpuBuffer::Software => Err(GpuError::Internal(format!(
            "buffer {} was not created by the wgpu backend",
            buffer.resource_id()
        ))),
    }
}

fn wgpu_texture(texture: &Texture) -> Result<&wgpu::Texture, GpuError> {
    match texture.gpu_texture() {
        GpuTexture::Wgpu(gpu) => Ok(gpu.as_ref()),
        GpuTexture::Software => Err(GpuError::Internal(format!(
            "texture {} was not created by the wgpu backend",
            texture.resource_id()
        ))),
    }
}

fn attachment_view(target: &ColorTarget) -> Result<wgpu::TextureView, GpuError> {
    Ok(wgpu_texture(&target.texture)?.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2),
        base_mip_level: target.level,
        mip_level_count: Some(1),
        base_array_layer: target.slice,
        array_layer_count: Some(1),
        ..Default::default()
    }))
}

/// Address one subresource. Array slices are layers, which wgpu addresses
/// through the origin's z.
fn texel_copy(
    texture: &wgpu::Texture,
    texture_type: TextureType,
    level: u32,
    slice: u32,
    origin: wgpu::Origin3d,
) -> wgpu::TexelCopyTextureInfo<'_> {
    let origin = match texture_type {
        TextureType::D3 => origin,
        TextureType::D2 | TextureType::D2Array => wgpu::Origin3d { z: slice, ..origin },
    };
    wgpu::TexelCopyTextureInfo {
        texture,
        mip_level: level,
        origin,
        aspect: wgpu::TextureAspect::All,
    }
}

fn copy_extent(texture_type: TextureType, layout: &PixelLayout) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: layout.extent.width,
        height: layout.extent.height,
        depth_or_array_layers: match texture_type {
            TextureType::D3 => layout.extent.depth,
            TextureType::D2 | TextureType::D2Array => 1,
        },
    }
}

fn check_copy_alignment(values: &[usize]) -> Result<(), GpuError> {
    let alignment = wgpu::COPY_BUFFER_ALIGNMENT as usize;
    match values.iter().find(|value| *value % alignment != 0) {
        Some(value) => Err(GpuError::ExecutionFailed(format!(
            "buffer copy offset or size {value} is not a multiple of {alignment}"
        ))),
        None => Ok(()),
    }
}

/// The buffer bindings `function` uses, in binding order.
fn stage_bindings(function: &Function, group: u32) -> Vec<&FunctionBinding> {
    let mut bindings: Vec<_> = function
        .bindings()
        .iter()
        .filter(|binding| binding.group == group && binding.is_buffer())
        .collect();
    bindings.sort_by_key(|binding| binding.binding);
    bindings
}

/// Reject bindings the slot model cannot feed.
fn check_stage_bindings(function: &Function, group: u32) -> Result<(), GpuError> {
    for binding in function.bindings() {
        if !binding.is_buffer() {
            return Err(GpuError::PipelineCreationFailed(format!(
                "function {} binds a {:?}; only buffer bindings are supported",
                function.name(),
                binding.kind
            )));
        }
        if binding.group != group {
            return Err(GpuError::PipelineCreationFailed(format!(
                "function {} uses bind group {}, expected {group}",
                function.name(),
                binding.group
            )));
        }
        if binding.binding as usize >= MAX_BUFFER_BINDINGS {
            return Err(GpuError::PipelineCreationFailed(format!(
                "function {} uses binding {}, beyond the {MAX_BUFFER_BINDINGS} buffer slots",
                function.name(),
                binding.binding
            )));
        }
    }
    Ok(())
}

fn create_module(device: &wgpu::Device, function: &Function) -> wgpu::ShaderModule {
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(function.name()),
        source: wgpu::ShaderSource::Wgsl(function.source().as_ref().into()),
    })
}

/// wgpu reports validation failures through its uncaptured error handler,
/// which panics by default.
fn catch_wgpu_panic<T>(what: &str, f: impl FnOnce() -> T) -> Result<T, GpuError> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)).map_err(|payload| {
        let message = payload
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| payload.downcast_ref::<&str>().copied())
            .unwrap_or("unknown error");
        GpuError::PipelineCreationFailed(format!("{what}: {message}"))
    })
}

fn convert_load_action(target: &ColorTarget) -> wgpu::LoadOp<wgpu::Color> {
    match target.load_action {
        LoadAction::Clear => {
            let color = target.clear_color;
            wgpu::LoadOp::Clear(wgpu::Color {
                r: color.red,
                g: color.green,
                b: color.blue,
                a: color.alpha,
            })
        }
        LoadAction::Load | LoadAction::DontCare => wgpu::LoadOp::Load,
    }
}

fn convert_store_action(store_action: StoreAction) -> wgpu::StoreOp {
    match store_action {
        StoreAction::Store => wgpu::StoreOp::Store,
        StoreAction::DontCare => wgpu::StoreOp::Discard,
    }
}

fn convert_topology(primitive_type: PrimitiveType) -> wgpu::PrimitiveTopology {
    match primitive_type {
        PrimitiveType::Point => wgpu::PrimitiveTopology::PointList,
        PrimitiveType::Line => wgpu::PrimitiveTopology::LineList,
        PrimitiveType::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveType::Triangle => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveType::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

fn convert_pixel_format(format: PixelFormat) -> Option<wgpu::TextureFormat> {
    Some(match format {
        PixelFormat::Invalid => return None,
        PixelFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
        PixelFormat::R8Uint => wgpu::TextureFormat::R8Uint,
        PixelFormat::R16Float => wgpu::TextureFormat::R16Float,
        PixelFormat::Rg8Unorm => wgpu::TextureFormat::Rg8Unorm,
        PixelFormat::R32Uint => wgpu::TextureFormat::R32Uint,
        PixelFormat::R32Sint => wgpu::TextureFormat::R32Sint,
        PixelFormat::R32Float => wgpu::TextureFormat::R32Float,
        PixelFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
        PixelFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        PixelFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        PixelFormat::Rgba8Uint => wgpu::TextureFormat::Rgba8Uint,
        PixelFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        PixelFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        PixelFormat::Rg32Float => wgpu::TextureFormat::Rg32Float,
        PixelFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        PixelFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        PixelFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    })
}
