//! Camera-facing billboard expansion.

use ember_gfx::{Bindings, ClipVertex, DrawProgram, Slot};
use glam::{Mat4, Vec2, Vec3};

use crate::gpu_types::{AliveEntry, FrameConstants, GpuParticleA, ViewSpacePositionRadius};
use crate::shaders;

/// Two triangles over corners 0..4.
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

/// Corner offsets (x right, y up) and texture coordinates.
const CORNERS: [([f32; 2], [f32; 2]); 4] = [
    ([-1.0, 1.0], [0.0, 0.0]),
    ([1.0, 1.0], [1.0, 0.0]),
    ([-1.0, -1.0], [0.0, 1.0]),
    ([1.0, -1.0], [1.0, 1.0]),
];

/// Draws instance `i` as the particle in alive-list position `i`.
///
/// `b0` frame, `b1` render constants, `t0` particle A, `t1` view-space
/// positions, `t2` alive list, `t3` scene depth, `t4` sprite texture.
/// Depth and sprite are only read by the fragment stage.
pub struct BillboardProgram;

impl DrawProgram for BillboardProgram {
    fn label(&self) -> &'static str {
        "particles_billboard"
    }

    fn source(&self) -> &'static str {
        shaders::BILLBOARD
    }

    fn slots(&self) -> &'static [Slot] {
        &[
            Slot::Constant(0),
            Slot::Constant(1),
            Slot::ReadOnly(0),
            Slot::ReadOnly(1),
            Slot::ReadOnly(2),
            Slot::ReadOnly(3),
            Slot::ReadOnly(4),
        ]
    }

    fn vertex(&self, vertex_index: u32, instance_index: u32, bindings: &Bindings<'_>) -> ClipVertex {
        let frame: FrameConstants = bindings.constant(0);
        let entry: AliveEntry = bindings.read(2, instance_index);
        let particle: GpuParticleA = bindings.read(0, entry.index);
        let view_space: ViewSpacePositionRadius = bindings.read(1, entry.index);

        let (offset, uv) = CORNERS[(vertex_index & 3) as usize];
        let (sin, cos) = particle.rotation.sin_cos();
        let offset = Vec2::from(offset);
        let rotated = Vec2::new(
            offset.x * cos - offset.y * sin,
            offset.x * sin + offset.y * cos,
        ) * view_space.radius;

        let center = Vec3::from(view_space.position);
        let corner = center + rotated.extend(0.0);
        let clip = Mat4::from_cols_array_2d(&frame.projection) * corner.extend(1.0);

        ClipVertex {
            position: clip.to_array(),
            color: particle.tint_and_alpha,
            uv,
        }
    }
}
