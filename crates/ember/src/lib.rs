//! # Ember
//!
//! Scene-level driver for the particle core: loads emitters from TOML,
//! owns one [`ParticleRenderer`](ember_particles::ParticleRenderer) per
//! emitter and steps them together.

#![deny(missing_docs)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]

pub mod scene;

pub use scene::{
    CameraConfig, EmitterReport, FrameReport, SceneConfig, SceneError, SceneResult, Simulation,
};
