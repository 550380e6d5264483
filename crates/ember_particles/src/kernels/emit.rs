//! Spawning from the dead list.

use ember_gfx::{Bindings, ComputeKernel, Slot};
use glam::Vec4;

use super::threads;
use crate::gpu_types::{CounterConstants, EmitterConstants, GpuParticleA, GpuParticleB};
use crate::random::{random_texel, scramble_index};
use crate::shaders;

/// Spawns up to `max_particles_this_frame` particles.
///
/// Thread `i` spawns only while `i` is below the dead-list count copied
/// before the pass, so consumes never run past an empty list.
///
/// `b0` emitter, `b1` dead-list count, `t0` random texture, `u0` particle A,
/// `u1` particle B, `u2` dead list (consume).
pub struct EmitKernel;

impl ComputeKernel for EmitKernel {
    fn label(&self) -> &'static str {
        "particles_emit"
    }

    fn source(&self) -> &'static str {
        shaders::EMIT
    }

    fn slots(&self) -> &'static [Slot] {
        &[
            Slot::Constant(0),
            Slot::Constant(1),
            Slot::ReadOnly(0),
            Slot::ReadWrite(0),
            Slot::ReadWrite(1),
            Slot::ReadWrite(2),
            Slot::Counter(2),
        ]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let emitter: EmitterConstants = bindings.constant(0);
        let dead: CounterConstants = bindings.constant(1);
        let limit = (emitter.max_particles_this_frame.max(0) as u32).min(dead.count);
        let [size, _] = bindings.texture_size(0);

        for id in threads(group, self.workgroup_size()) {
            if id >= limit {
                break;
            }
            let Some(slot) = bindings.consume::<u32>(2) else {
                break;
            };

            // Position walks the table in order; velocity reads a scrambled
            // index so the two draws never share a parity pattern.
            let sequence = emitter.random_offset.wrapping_add(id);
            let sample = |index: u32| {
                let (x, y) = random_texel(index, size.max(1));
                Vec4::from(bindings.texel(0, x, y))
            };
            let r0 = sample(sequence);
            let r1 = sample(scramble_index(sequence));

            let position = Vec4::from(emitter.emitter_position).truncate()
                + r0.truncate() * Vec4::from(emitter.position_variance).truncate();
            let velocity = Vec4::from(emitter.emitter_velocity).truncate()
                + r1.truncate() * emitter.velocity_variance;

            bindings.store(
                0,
                slot,
                GpuParticleA {
                    tint_and_alpha: [1.0; 4],
                    rotation: r0.w * std::f32::consts::PI,
                    is_sleeping: 0,
                    _pad: [0; 2],
                },
            );
            bindings.store(
                1,
                slot,
                GpuParticleB {
                    position: position.to_array(),
                    mass: emitter.mass,
                    velocity: velocity.to_array(),
                    lifespan: emitter.particle_lifespan,
                    distance_to_eye: 0.0,
                    age: 0.0,
                    start_size: emitter.start_size,
                    end_size: emitter.end_size,
                },
            );
        }
    }
}
