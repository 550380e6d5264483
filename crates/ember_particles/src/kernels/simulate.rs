//! Integration, aging, depth collision and alive-list rebuild.

use ember_gfx::{Bindings, ComputeKernel, Slot};
use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

use super::threads;
use crate::gpu_types::{
    AliveEntry, EmitterConstants, FrameConstants, GpuParticleA, GpuParticleB,
    SimulationConstants, ViewSpacePositionRadius,
};
use crate::shaders;

/// Advances every live slot by one frame.
///
/// Retired slots go back on the dead list; survivors are appended to the
/// alive list (bound with initial count 0) keyed by eye distance.
///
/// `b0` simulation, `b1` frame, `b2` emitter, `t0` scene depth, `u0` particle
/// A, `u1` particle B, `u2` dead list (append), `u3` alive list (append),
/// `u4` view-space positions.
pub struct SimulateKernel;

impl ComputeKernel for SimulateKernel {
    fn label(&self) -> &'static str {
        "particles_simulate"
    }

    fn source(&self) -> &'static str {
        shaders::SIMULATE
    }

    fn slots(&self) -> &'static [Slot] {
        &[
            Slot::Constant(0),
            Slot::Constant(1),
            Slot::Constant(2),
            Slot::ReadOnly(0),
            Slot::ReadWrite(0),
            Slot::ReadWrite(1),
            Slot::ReadWrite(2),
            Slot::Counter(2),
            Slot::ReadWrite(3),
            Slot::Counter(3),
            Slot::ReadWrite(4),
        ]
    }

    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>) {
        let sim: SimulationConstants = bindings.constant(0);
        let frame: FrameConstants = bindings.constant(1);
        let emitter: EmitterConstants = bindings.constant(2);
        let view = Mat4::from_cols_array_2d(&frame.view);
        let gravity = Vec4::from(sim.gravity).truncate();
        let dt = sim.frame_time;

        for id in threads(group, self.workgroup_size()) {
            if id >= sim.capacity {
                break;
            }
            let mut b: GpuParticleB = bindings.load(1, id);
            if !b.is_alive() {
                continue;
            }
            let mut a: GpuParticleA = bindings.load(0, id);
            let mut position = Vec3::from(b.position);
            let mut velocity = Vec3::from(b.velocity);

            if a.is_sleeping == 0 {
                velocity += gravity * b.mass * dt;
                if emitter.collisions != 0 {
                    let next = position + velocity * dt;
                    if let Some(normal) =
                        depth_hit(bindings, &frame, next, emitter.collision_thickness)
                    {
                        velocity = reflect(velocity, normal) * sim.collision_restitution;
                        if velocity.length() < sim.sleep_speed {
                            velocity = Vec3::ZERO;
                            a.is_sleeping = 1;
                        }
                    }
                }
                position += velocity * dt;
            }

            b.age += dt;
            if b.age >= b.lifespan {
                bindings.store(1, id, GpuParticleB::dead());
                bindings.append(2, id);
                continue;
            }

            let view_position = (view * position.extend(1.0)).xyz();
            let distance = view_position.length();
            b.position = position.to_array();
            b.velocity = velocity.to_array();
            b.distance_to_eye = distance;
            a.tint_and_alpha[3] = 1.0 - b.age / b.lifespan;

            bindings.store(
                4,
                id,
                ViewSpacePositionRadius {
                    position: view_position.to_array(),
                    radius: b.radius(),
                },
            );
            bindings.store(0, id, a);
            bindings.store(1, id, b);
            bindings.append(3, AliveEntry { distance, index: id });
        }
    }
}

fn reflect(v: Vec3, n: Vec3) -> Vec3 {
    v - 2.0 * v.dot(n) * n
}

/// View-space position of the depth sample at texel `(x, y)`.
fn depth_view_position(
    bindings: &Bindings<'_>,
    inverse_projection: &Mat4,
    size: [u32; 2],
    x: i32,
    y: i32,
) -> Vec3 {
    let depth = bindings.texel(0, x, y)[0];
    let ndc_x = (x as f32 + 0.5) / size[0] as f32 * 2.0 - 1.0;
    let ndc_y = 1.0 - (y as f32 + 0.5) / size[1] as f32 * 2.0;
    let view = *inverse_projection * Vec4::new(ndc_x, ndc_y, depth, 1.0);
    view.xyz() / view.w
}

/// World-space surface normal if `world` lies behind scene depth by less than
/// `thickness`.
fn depth_hit(
    bindings: &Bindings<'_>,
    frame: &FrameConstants,
    world: Vec3,
    thickness: f32,
) -> Option<Vec3> {
    let size = bindings.texture_size(0);
    if size[0] == 0 || size[1] == 0 {
        return None;
    }
    let clip = Mat4::from_cols_array_2d(&frame.view_projection) * world.extend(1.0);
    if clip.w <= 0.0 {
        return None;
    }
    let ndc = clip.xyz() / clip.w;
    if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 {
        return None;
    }
    let x = ((ndc.x * 0.5 + 0.5) * size[0] as f32) as i32;
    let y = ((0.5 - ndc.y * 0.5) * size[1] as f32) as i32;

    let inverse_projection = Mat4::from_cols_array_2d(&frame.inverse_projection);
    let at = |dx: i32, dy: i32| {
        depth_view_position(bindings, &inverse_projection, size, x + dx, y + dy)
    };
    let surface = at(0, 0);
    let particle = (Mat4::from_cols_array_2d(&frame.view) * world.extend(1.0)).xyz();
    // View space looks down -z: a particle behind the surface has smaller z.
    let penetration = surface.z - particle.z;
    if !(penetration > 0.0 && penetration < thickness) {
        return None;
    }

    let tangent_x = at(1, 0) - at(-1, 0);
    let tangent_y = at(0, 1) - at(0, -1);
    let to_eye = -surface.normalize_or_zero();
    let mut normal = tangent_x.cross(tangent_y).normalize_or_zero();
    if normal == Vec3::ZERO {
        normal = to_eye;
    }
    if normal.dot(to_eye) < 0.0 {
        normal = -normal;
    }
    let world_normal = Mat4::from_cols_array_2d(&frame.inverse_view).transform_vector3(normal);
    Some(world_normal.normalize_or_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reflect_flips_normal_component() {
        let v = reflect(Vec3::new(1.0, -2.0, 0.0), Vec3::Y);
        assert_eq!(v, Vec3::new(1.0, 2.0, 0.0));
    }
}
