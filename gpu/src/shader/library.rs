//! Compiled shader libraries.

use std::sync::Arc;

use super::{BindingKind, CompileOptions, FunctionBinding, FunctionType};
use crate::error::GpuError;

/// Source, IR and reflection shared by a library and its functions.
struct LibraryData {
    device_id: u64,
    source: Arc<str>,
    options: CompileOptions,
    module: naga::Module,
    functions: Vec<FunctionData>,
}

#[derive(Debug, Clone)]
struct FunctionData {
    name: String,
    function_type: FunctionType,
    workgroup_size: [u32; 3],
    bindings: Vec<FunctionBinding>,
}

/// A set of shader functions compiled from one source text.
///
/// # Example
///
/// ```ignore
/// let library = device.new_library_with_source(SOURCE, &CompileOptions::default())?;
/// let add_arrays = library.function_named("add_arrays")?;
/// ```
#[derive(Clone)]
pub struct Library {
    data: Arc<LibraryData>,
}

impl Library {
    /// Parse, validate and reflect WGSL source.
    pub(crate) fn compile(
        device_id: u64,
        source: &str,
        options: &CompileOptions,
    ) -> Result<Self, GpuError> {
        let module = naga::front::wgsl::parse_str(source).map_err(|e| {
            GpuError::ShaderCompilationFailed(format!(
                "WGSL parse error: {}",
                e.emit_to_string(source)
            ))
        })?;

        let mut validator =
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                options.capabilities(),
            );
        let info = validator.validate(&module).map_err(|e| {
            GpuError::ShaderCompilationFailed(format!(
                "validation error: {}",
                e.emit_to_string(source)
            ))
        })?;

        let functions = reflect_entry_points(&module, &info);
        log::trace!(
            "Library: compiled {} bytes of WGSL, entry points {:?}",
            source.len(),
            functions.iter().map(|f| f.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            data: Arc::new(LibraryData {
                device_id,
                source: Arc::from(source),
                options: *options,
                module,
                functions,
            }),
        })
    }

    /// Look up an entry point by name.
    ///
    /// # Errors
    ///
    /// Returns [`GpuError::FunctionNotFound`] if the library has no entry
    /// point called `name`.
    pub fn function_named(&self, name: &str) -> Result<Function, GpuError> {
        let index = self
            .data
            .functions
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| GpuError::FunctionNotFound(name.to_string()))?;
        Ok(Function {
            library: Arc::clone(&self.data),
            index,
        })
    }

    /// Names of every entry point, in source order.
    pub fn function_names(&self) -> Vec<String> {
        self.data.functions.iter().map(|f| f.name.clone()).collect()
    }

    pub fn options(&self) -> &CompileOptions {
        &self.data.options
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("functions", &self.function_names())
            .finish()
    }
}

/// One entry point of a [`Library`].
#[derive(Clone)]
pub struct Function {
    library: Arc<LibraryData>,
    index: usize,
}

impl Function {
    fn data(&self) -> &FunctionData {
        &self.library.functions[self.index]
    }

    pub fn name(&self) -> &str {
        &self.data().name
    }

    pub fn function_type(&self) -> FunctionType {
        self.data().function_type
    }

    /// Workgroup size declared by a kernel; `[0, 0, 0]` for other stages.
    pub fn workgroup_size(&self) -> [u32; 3] {
        self.data().workgroup_size
    }

    /// Resource bindings the entry point reads or writes.
    pub fn bindings(&self) -> &[FunctionBinding] {
        &self.data().bindings
    }

    pub(crate) fn device_id(&self) -> u64 {
        self.library.device_id
    }

    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn source(&self) -> &Arc<str> {
        &self.library.source
    }

    #[cfg_attr(not(feature = "wgpu-backend"), allow(dead_code))]
    pub(crate) fn module(&self) -> &naga::Module {
        &self.library.module
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name())
            .field("function_type", &self.function_type())
            .finish()
    }
}

fn reflect_entry_points(
    module: &naga::Module,
    info: &naga::valid::ModuleInfo,
) -> Vec<FunctionData> {
    module
        .entry_points
        .iter()
        .enumerate()
        .filter_map(|(index, entry_point)| {
            let function_type = match entry_point.stage {
                naga::ShaderStage::Vertex => FunctionType::Vertex,
                naga::ShaderStage::Fragment => FunctionType::Fragment,
                naga::ShaderStage::Compute => FunctionType::Kernel,
                #[allow(unreachable_patterns)]
                other => {
                    log::debug!("Library: skipping {:?} entry point {}", other, entry_point.name);
                    return None;
                }
            };
            let usage = info.get_entry_point(index);
            let bindings = module
                .global_variables
                .iter()
                .filter(|(handle, _)| !usage[*handle].is_empty())
                .filter_map(|(_, var)| {
                    let binding = var.binding.as_ref()?;
                    Some(FunctionBinding {
                        name: var.name.clone(),
                        group: binding.group,
                        binding: binding.binding,
                        kind: binding_kind(module, var),
                    })
                })
                .collect();
            let workgroup_size = match function_type {
                FunctionType::Kernel => entry_point.workgroup_size,
                _ => [0; 3],
            };
            Some(FunctionData {
                name: entry_point.name.clone(),
                function_type,
                workgroup_size,
                bindings,
            })
        })
        .collect()
}

fn binding_kind(module: &naga::Module, var: &naga::GlobalVariable) -> BindingKind {
    match var.space {
        naga::AddressSpace::Uniform => BindingKind::UniformBuffer,
        naga::AddressSpace::Storage { access } => BindingKind::StorageBuffer {
            read_only: !access.contains(naga::StorageAccess::STORE),
        },
        naga::AddressSpace::Handle => match module.types[var.ty].inner {
            naga::TypeInner::Image { .. } => BindingKind::Texture,
            naga::TypeInner::Sampler { .. } => BindingKind::Sampler,
            _ => BindingKind::Other,
        },
        _ => BindingKind::Other,
    }
}
