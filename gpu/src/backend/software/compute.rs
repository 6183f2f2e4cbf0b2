//! Compute dispatch on the CPU.

use super::bindings::ShaderResources;
use super::native::ComputeContext;
use crate::backend::GpuComputePipeline;
use crate::command::DispatchCommand;
use crate::error::GpuError;
use crate::types::Size;

fn dims(size: Size) -> [u32; 3] {
    [size.width, size.height, size.depth]
}

/// Run every thread of a dispatch, threadgroup by threadgroup.
///
/// Threads of an edge threadgroup that fall outside the grid are not run.
pub(super) fn execute_dispatch(dispatch: &DispatchCommand) -> Result<(), GpuError> {
    let kernel = match dispatch.pipeline.gpu() {
        GpuComputePipeline::Software(kernel) => kernel,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(GpuError::Internal(
                "compute pipeline was not created by the software backend".to_string(),
            ));
        }
    };

    let grid = dims(dispatch.threads_per_grid);
    let group = dims(dispatch.threads_per_threadgroup);
    let groups: [u32; 3] = std::array::from_fn(|i| grid[i].div_ceil(group[i]));

    log::trace!(
        "SoftwareBackend: dispatch {} grid={:?} threadgroup={:?}",
        dispatch.pipeline.function_name(),
        grid,
        group
    );

    let mut ctx = ComputeContext {
        thread_position_in_grid: [0; 3],
        threads_per_grid: grid,
        thread_position_in_threadgroup: [0; 3],
        threadgroup_position_in_grid: [0; 3],
        threads_per_threadgroup: group,
        resources: ShaderResources::lock(&dispatch.bindings),
    };

    for gz in 0..groups[2] {
        for gy in 0..groups[1] {
            for gx in 0..groups[0] {
                ctx.threadgroup_position_in_grid = [gx, gy, gz];
                for tz in 0..group[2] {
                    for ty in 0..group[1] {
                        for tx in 0..group[0] {
                            let position = [
                                gx * group[0] + tx,
                                gy * group[1] + ty,
                                gz * group[2] + tz,
                            ];
                            if position[0] >= grid[0]
                                || position[1] >= grid[1]
                                || position[2] >= grid[2]
                            {
                                continue;
                            }
                            ctx.thread_position_in_threadgroup = [tx, ty, tz];
                            ctx.thread_position_in_grid = position;
                            kernel(&mut ctx);
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
