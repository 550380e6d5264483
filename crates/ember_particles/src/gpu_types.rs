//! # GPU Records
//!
//! Every record here is shared byte-for-byte with the WGSL programs in
//! [`shaders`](crate::shaders). Field order and padding follow WGSL storage
//! and uniform layout rules (vec3 aligned to 16, structs padded to 16).

use bytemuck::{Pod, Zeroable};

/// Render attributes of one particle slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct GpuParticleA {
    /// Tint (rgb) and alpha (a).
    pub tint_and_alpha: [f32; 4],
    /// Billboard rotation in radians.
    pub rotation: f32,
    /// Non-zero once a collision has brought the particle to rest.
    pub is_sleeping: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 2],
}

/// Simulation attributes of one particle slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuParticleB {
    /// World-space position.
    pub position: [f32; 3],
    /// Scales the response to gravity.
    pub mass: f32,
    /// World-space velocity.
    pub velocity: [f32; 3],
    /// Seconds the particle lives.
    pub lifespan: f32,
    /// Distance to the eye, refreshed every simulation pass.
    pub distance_to_eye: f32,
    /// Seconds lived, negative for a free slot.
    pub age: f32,
    /// Billboard radius at birth.
    pub start_size: f32,
    /// Billboard radius at death.
    pub end_size: f32,
}

impl GpuParticleB {
    /// Age marking a free slot.
    pub const DEAD_AGE: f32 = -1.0;

    /// A free slot.
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            position: [0.0; 3],
            mass: 0.0,
            velocity: [0.0; 3],
            lifespan: 0.0,
            distance_to_eye: 0.0,
            age: Self::DEAD_AGE,
            start_size: 0.0,
            end_size: 0.0,
        }
    }

    /// Whether the slot holds a live particle.
    #[inline]
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.age >= 0.0
    }

    /// Billboard radius at the current age.
    #[inline]
    #[must_use]
    pub fn radius(&self) -> f32 {
        let t = if self.lifespan > 0.0 {
            (self.age / self.lifespan).clamp(0.0, 1.0)
        } else {
            1.0
        };
        self.start_size + (self.end_size - self.start_size) * t
    }
}

impl Default for GpuParticleB {
    fn default() -> Self {
        Self::dead()
    }
}

/// Per-frame emission parameters (`b0` of the emit pass).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct EmitterConstants {
    /// Spawn position (xyz).
    pub emitter_position: [f32; 4],
    /// Base velocity (xyz).
    pub emitter_velocity: [f32; 4],
    /// Per-axis position spread (xyz).
    pub position_variance: [f32; 4],
    /// Spawn attempts this frame.
    pub max_particles_this_frame: i32,
    /// Seconds each particle lives.
    pub particle_lifespan: f32,
    /// Radius at birth.
    pub start_size: f32,
    /// Radius at death.
    pub end_size: f32,
    /// Uniform velocity spread.
    pub velocity_variance: f32,
    /// Gravity scale.
    pub mass: f32,
    /// Seconds the emitter has been running.
    pub elapsed_time: f32,
    /// Non-zero to collide with scene depth.
    pub collisions: i32,
    /// Depth range behind a surface that still counts as a hit.
    pub collision_thickness: f32,
    /// First random texel used by this frame's spawns.
    pub random_offset: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 2],
}

/// One element of the alive list: sort key plus slot index.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct AliveEntry {
    /// Distance to the eye.
    pub distance: f32,
    /// Particle slot.
    pub index: u32,
}

impl AliveEntry {
    /// Whether `self` and `other`, at increasing list positions, are out of
    /// back-to-front order.
    ///
    /// Farther particles come first; equal distances order by slot so the
    /// result is deterministic.
    #[inline]
    #[must_use]
    pub fn should_swap(&self, other: &Self) -> bool {
        match self.distance.total_cmp(&other.distance) {
            std::cmp::Ordering::Less => true,
            std::cmp::Ordering::Greater => false,
            std::cmp::Ordering::Equal => self.index > other.index,
        }
    }
}

/// View-space position and billboard radius, indexed by slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ViewSpacePositionRadius {
    /// View-space center.
    pub position: [f32; 3],
    /// Billboard radius.
    pub radius: f32,
}

/// Comparator layout of one bitonic step.
///
/// For thread `t`: `low = t & (x - 1)`, `high = 2 * (t - low)`, the pair is
/// `(high + low, high + y + z * low)`. `w` is the padded problem size.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct SortDispatchInfo {
    /// Half-block width.
    pub x: i32,
    /// Partner offset from `high`.
    pub y: i32,
    /// Partner direction relative to `low`.
    pub z: i32,
    /// Padded problem size.
    pub w: i32,
}

/// A counter copied from an append/consume buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct CounterConstants {
    /// Counter value at the time of the copy.
    pub count: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 3],
}

/// Camera matrices and viewport of the current frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    /// World to view.
    pub view: [[f32; 4]; 4],
    /// View to clip.
    pub projection: [[f32; 4]; 4],
    /// Clip to view.
    pub inverse_projection: [[f32; 4]; 4],
    /// View to world.
    pub inverse_view: [[f32; 4]; 4],
    /// World to clip.
    pub view_projection: [[f32; 4]; 4],
    /// World-space eye (xyz).
    pub eye_position: [f32; 4],
    /// Viewport width and height in pixels (xy).
    pub screen_size: [f32; 4],
}

/// Global simulation parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct SimulationConstants {
    /// Acceleration (xyz).
    pub gravity: [f32; 4],
    /// Seconds simulated this frame.
    pub frame_time: f32,
    /// Fraction of speed kept after a bounce.
    pub collision_restitution: f32,
    /// Speed under which a collided particle sleeps.
    pub sleep_speed: f32,
    /// Pool capacity.
    pub capacity: u32,
}

/// Billboard shading parameters.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct RenderConstants {
    /// View-space soft fade distance.
    pub soft_fade: f32,
    /// Non-zero for straight alpha, zero for additive.
    pub alpha_blended: u32,
    /// Padding to 16 bytes.
    pub _pad: [u32; 2],
}
