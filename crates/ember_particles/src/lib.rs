//! # Ember Particles
//!
//! GPU particle pool, simulation and incremental depth sort.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                  PER FRAME, ONE CONTEXT                      │
//! ├──────────────────────────────────────────────────────────────┤
//! │  dead list ──consume──> Emit ──> Simulate ──append──> alive  │
//! │      ^                              │                   │    │
//! │      └──────────append (retired)────┘                   ↓    │
//! │                 Indirect args <── alive count ── Sort steps  │
//! │                        ↓                                ↓    │
//! │              DrawIndexedInstancedIndirect (billboards)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - Every slot is on exactly one of the dead list or the alive list between
//!   passes.
//! - All pool mutation happens in compute passes through hidden append/consume
//!   counters. The host only records commands.
//! - No host read of GPU memory in the frame loop.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss, clippy::module_name_repetitions)]

pub mod camera;
pub mod config;
pub mod emitter;
pub mod error;
pub mod gpu_types;
pub mod kernels;
pub mod random;
pub mod renderer;
pub mod shaders;
pub mod sort;

pub use camera::{Camera, SceneView};
pub use config::{ParticleRendererConfig, DEFAULT_CAPACITY, MAX_CAPACITY};
pub use emitter::{Emitter, EmitterParameters, ParticleBlendMode};
pub use error::{ParticleError, ParticleResult};
pub use gpu_types::{AliveEntry, GpuParticleA, GpuParticleB, ViewSpacePositionRadius};
pub use renderer::{ParticleRenderer, ParticleStats};
pub use sort::{SortState, SortStep};
