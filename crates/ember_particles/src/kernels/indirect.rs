//! Indirect argument generation.

use ember_gfx::{Bindings, ComputeKernel, DispatchIndirectArgs, DrawIndexedIndirectArgs, Slot};

use super::billboard::QUAD_INDICES;
use super::bitonic::sort_group_count;
use crate::gpu_types::CounterConstants;
use crate::shaders;

/// Writes draw and sort dispatch arguments from the alive count.
///
/// `b0` alive count, `u0` draw arguments, `u1` sort dispatch arguments.
pub struct IndirectArgsKernel;

impl ComputeKernel for IndirectArgsKernel {
    fn label(&self) -> &'static str {
        "particles_indirect_args"
    }

    fn source(&self) -> &'static str {
        shaders::INDIRECT_ARGS
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::ReadWrite(0), Slot::ReadWrite(1)]
    }

    fn workgroup_size(&self) -> u32 {
        1
    }

    fn execute_group(&self, _group: [u32; 3], bindings: &mut Bindings<'_>) {
        let alive: CounterConstants = bindings.constant(0);
        bindings.store(
            0,
            0,
            DrawIndexedIndirectArgs {
                index_count_per_instance: QUAD_INDICES.len() as u32,
                instance_count: alive.count,
                start_index: 0,
                base_vertex: 0,
                start_instance: 0,
            },
        );
        bindings.store(
            1,
            0,
            DispatchIndirectArgs {
                x: sort_group_count(alive.count),
                y: 1,
                z: 1,
            },
        );
    }
}
