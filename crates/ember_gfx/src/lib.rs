//! # Ember GFX
//!
//! GPU resource and command abstraction used by the particle renderer.
//!
//! ## Model
//!
//! - **Buffers** are structured, optionally carrying a hidden append/consume
//!   counter, and are owned by exactly one component.
//! - **Contexts** bind resources to numbered slots, then dispatch compute
//!   kernels or issue indirect draws. Work on one context executes in
//!   submission order.
//! - **Programs** carry WGSL for native execution plus a host reference used
//!   by [`SoftDevice`].
//!
//! ## Backends
//!
//! - [`SoftDevice`]: runs on the host, deterministic, used by tests.
//! - `WgpuDevice`: native GPU execution (feature `wgpu-backend`).
//!
//! The default build leaves the native backend out. Check it with
//! `cargo check -p ember_gfx --features wgpu-backend`; the WGSL itself is
//! validated by the `ember_particles` shader tests.

pub mod context;
pub mod desc;
pub mod error;
pub mod program;
pub mod resource;
pub mod soft;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use context::{
    CommandContext, DispatchIndirectArgs, DrawIndexedIndirectArgs, DrawState, GfxDevice,
};
pub use desc::{BindFlags, BufferDesc, MiscFlags, TextureDesc, TextureFormat};
pub use error::{GfxError, GfxResult};
pub use program::{
    group_count, ClipVertex, ComputeKernel, DrawProgram, Slot, DEFAULT_WORKGROUP_SIZE,
    MAX_WORKGROUPS_PER_DIMENSION,
};
pub use resource::{GpuBuffer, GpuTexture, ResourceId};
pub use soft::{Bindings, DrawCapture, SoftDevice, SoftStats};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuDevice;

/// Blend types used by [`DrawState`].
pub use wgpu::{BlendComponent, BlendFactor, BlendOperation, BlendState};
