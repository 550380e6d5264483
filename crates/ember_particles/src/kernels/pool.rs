//! Dead-list population and slot reset.

use ember_gfx::{Bindings, ComputeKernel, Slot};

use super::threads;
use crate::gpu_types::{GpuParticleA, GpuParticleB, SimulationConstants};
use crate::shaders;

/// Appends every slot index to the dead list.
///
/// `b0` simulation constants, `u0` dead list (bound with initial count 0).
pub struct InitDeadListKernel;

impl ComputeKernel for InitDeadListKernel {
    fn label(&self) -> &'static str {
        "particles_init_dead_list"
    }

    fn source(&self) -> &'static str {
        shaders::INIT_DEAD_LIST
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::ReadWrite(0), Slot::Counter(0)]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let sim: SimulationConstants = bindings.constant(0);
        for id in threads(group, self.workgroup_size()) {
            if id < sim.capacity {
                bindings.append(0, id);
            }
        }
    }
}

/// Returns every slot to the free state.
///
/// `b0` simulation constants, `u0` particle A, `u1` particle B.
pub struct ResetParticlesKernel;

impl ComputeKernel for ResetParticlesKernel {
    fn label(&self) -> &'static str {
        "particles_reset"
    }

    fn source(&self) -> &'static str {
        shaders::RESET_PARTICLES
    }

    fn slots(&self) -> &'static [Slot] {
        &[Slot::Constant(0), Slot::ReadWrite(0), Slot::ReadWrite(1)]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let sim: SimulationConstants = bindings.constant(0);
        for id in threads(group, self.workgroup_size()) {
            if id < sim.capacity {
                bindings.store(0, id, GpuParticleA::default());
                bindings.store(1, id, GpuParticleB::dead());
            }
        }
    }
}
