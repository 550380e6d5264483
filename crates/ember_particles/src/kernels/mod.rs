//! # Particle Programs
//!
//! One type per GPU program. Each carries its WGSL from
//! [`shaders`](crate::shaders) and a host reference that
//! [`SoftDevice`](ember_gfx::SoftDevice) executes.
//!
//! | Program              | Threads                 | Writes                          |
//! |----------------------|-------------------------|---------------------------------|
//! | `InitDeadListKernel` | capacity                | dead list (append)              |
//! | `ResetParticlesKernel` | capacity              | particle A/B                    |
//! | `EmitKernel`         | spawns this frame       | A/B, dead list (consume)        |
//! | `SimulateKernel`     | capacity                | A/B, dead list, alive list, view-space |
//! | `IndirectArgsKernel` | 1                       | draw args, sort dispatch args   |
//! | `BitonicPresortKernel` | padded / 2            | alive list, 512-element blocks  |
//! | `BitonicStepKernel`  | padded / 2              | alive list, one global step     |
//! | `BitonicInnerKernel` | padded / 2              | alive list, strides below 512   |
//! | `BillboardProgram`   | 6 indices x alive       | color target                    |

mod billboard;
mod bitonic;
mod emit;
mod indirect;
mod pool;
mod simulate;

use std::ops::Range;

pub use billboard::{BillboardProgram, QUAD_INDICES};
pub use bitonic::{
    disperse_info, flip_info, sort_group_count, BitonicInnerKernel, BitonicPresortKernel,
    BitonicStepKernel, SORT_BLOCK_SIZE,
};
pub use emit::EmitKernel;
pub use indirect::IndirectArgsKernel;
pub use pool::{InitDeadListKernel, ResetParticlesKernel};
pub use simulate::SimulateKernel;

/// Global invocation ids of `group` along x.
#[inline]
fn threads(group: [u32; 3], workgroup_size: u32) -> Range<u32> {
    let start = group[0] * workgroup_size;
    start..start + workgroup_size
}
