//! GPU programs.
//!
//! A program carries its WGSL source for native backends and a host
//! reference of the same logic for [`SoftDevice`](crate::soft::SoftDevice).
//! Both sides address resources through [`Slot`]s so one binding table
//! serves either execution path.
//!
//! WGSL binding numbers inside `@group(0)`:
//!
//! ```text
//! Constant(n)   -> @binding(n)        var<uniform>
//! ReadOnly(n)   -> @binding(8 + n)    var<storage, read> / texture_2d<f32>
//! ReadWrite(n)  -> @binding(16 + n)   var<storage, read_write>
//! Counter(n)    -> @binding(24 + n)   hidden counter of ReadWrite(n)
//! ```

use std::fmt;

use crate::soft::Bindings;

/// Number of constant-buffer slots.
pub const MAX_CONSTANT_SLOTS: usize = 8;
/// Number of read-only slots.
pub const MAX_READ_ONLY_SLOTS: usize = 8;
/// Number of read-write slots.
pub const MAX_READ_WRITE_SLOTS: usize = 8;

/// Default compute workgroup width.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 256;

/// Workgroups one dispatch may request per dimension.
///
/// Matches `wgpu::Limits::default().max_compute_workgroups_per_dimension`.
pub const MAX_WORKGROUPS_PER_DIMENSION: u32 = 65_535;

/// A resource slot referenced by a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Uniform block `b#`.
    Constant(u32),
    /// Read-only buffer or texture `t#`.
    ReadOnly(u32),
    /// Read-write buffer `u#`.
    ReadWrite(u32),
    /// Hidden append/consume counter of read-write buffer `u#`.
    Counter(u32),
}

impl Slot {
    /// WGSL `@binding` number in group 0.
    #[must_use]
    pub const fn wgsl_binding(self) -> u32 {
        match self {
            Self::Constant(n) => n,
            Self::ReadOnly(n) => 8 + n,
            Self::ReadWrite(n) => 16 + n,
            Self::Counter(n) => 24 + n,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(n) => write!(f, "b{n}"),
            Self::ReadOnly(n) => write!(f, "t{n}"),
            Self::ReadWrite(n) => write!(f, "u{n}"),
            Self::Counter(n) => write!(f, "u{n}.counter"),
        }
    }
}

/// Number of workgroups needed to cover `threads` invocations.
#[inline]
#[must_use]
pub const fn group_count(threads: u32, workgroup_size: u32) -> u32 {
    threads.div_ceil(workgroup_size)
}

/// A compute program.
pub trait ComputeKernel {
    /// Debug label, also the pipeline cache key.
    fn label(&self) -> &'static str;

    /// WGSL source, entry point `main`.
    fn source(&self) -> &'static str;

    /// Every slot the WGSL source touches.
    fn slots(&self) -> &'static [Slot];

    /// Invocations per workgroup (x only).
    fn workgroup_size(&self) -> u32 {
        DEFAULT_WORKGROUP_SIZE
    }

    /// Host reference for one workgroup.
    fn execute_group(&self, group: [u32; 3], bindings: &mut Bindings<'_>);
}

/// Output of the host reference vertex stage.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipVertex {
    /// Clip-space position.
    pub position: [f32; 4],
    /// Interpolated color.
    pub color: [f32; 4],
    /// Texture coordinate.
    pub uv: [f32; 2],
}

/// A raster program drawn with indexed instancing.
pub trait DrawProgram {
    /// Debug label, also the pipeline cache key.
    fn label(&self) -> &'static str;

    /// WGSL source, entry points `vs_main` and `fs_main`.
    fn source(&self) -> &'static str;

    /// Every slot the WGSL source touches.
    fn slots(&self) -> &'static [Slot];

    /// Host reference of the vertex stage.
    fn vertex(&self, vertex_index: u32, instance_index: u32, bindings: &Bindings<'_>) -> ClipVertex;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binding_scheme() {
        assert_eq!(Slot::Constant(2).wgsl_binding(), 2);
        assert_eq!(Slot::ReadOnly(0).wgsl_binding(), 8);
        assert_eq!(Slot::ReadWrite(3).wgsl_binding(), 19);
        assert_eq!(Slot::Counter(3).wgsl_binding(), 27);
        assert_eq!(Slot::Counter(1).to_string(), "u1.counter");
    }

    #[test]
    fn test_group_count() {
        assert_eq!(group_count(0, 256), 0);
        assert_eq!(group_count(1, 256), 1);
        assert_eq!(group_count(256, 256), 1);
        assert_eq!(group_count(257, 256), 2);
        assert_eq!(
            group_count(MAX_WORKGROUPS_PER_DIMENSION * 256, 256),
            MAX_WORKGROUPS_PER_DIMENSION
        );
    }
}
