//! # Emitters
//!
//! [`EmitterParameters`] is the authored record (loadable from TOML);
//! [`Emitter`] adds the runtime state one renderer reads and updates every
//! frame.

use ember_gfx::{BlendComponent, BlendFactor, BlendOperation, BlendState};
use serde::{Deserialize, Serialize};

use crate::error::{ParticleError, ParticleResult};
use crate::gpu_types::EmitterConstants;

/// How billboards are composited into the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleBlendMode {
    /// ONE + ONE. Order independent.
    #[default]
    Additive,
    /// SRC_ALPHA + ONE_MINUS_SRC_ALPHA. Needs back-to-front order.
    AlphaBlend,
}

impl ParticleBlendMode {
    /// Pipeline blend state for this mode.
    #[must_use]
    pub const fn blend_state(self) -> BlendState {
        match self {
            Self::Additive => {
                let add = BlendComponent {
                    src_factor: BlendFactor::One,
                    dst_factor: BlendFactor::One,
                    operation: BlendOperation::Add,
                };
                BlendState {
                    color: add,
                    alpha: add,
                }
            }
            Self::AlphaBlend => BlendState::ALPHA_BLENDING,
        }
    }

    /// Whether the shader outputs straight alpha.
    #[inline]
    #[must_use]
    pub const fn is_alpha_blended(self) -> bool {
        matches!(self, Self::AlphaBlend)
    }
}

/// Authored emitter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitterParameters {
    /// Display name.
    pub name: String,
    /// Sprite texture, resolved by the caller.
    pub texture_path: Option<String>,
    /// Spawn position.
    pub position: [f32; 3],
    /// Base spawn velocity.
    pub velocity: [f32; 3],
    /// Per-axis spawn position spread.
    pub position_variance: [f32; 3],
    /// Uniform spawn velocity spread.
    pub velocity_variance: f32,
    /// Seconds each particle lives.
    pub lifespan: f32,
    /// Radius at birth.
    pub start_size: f32,
    /// Radius at death.
    pub end_size: f32,
    /// Gravity scale.
    pub mass: f32,
    /// Spawn rate.
    pub particles_per_second: f32,
    /// Compositing mode.
    pub blend: ParticleBlendMode,
    /// Bounce off scene depth.
    pub collisions: bool,
    /// Depth range behind a surface that still counts as a hit.
    pub collision_thickness: f32,
    /// Keep the alive list in back-to-front order.
    pub sort: bool,
}

impl Default for EmitterParameters {
    fn default() -> Self {
        Self {
            name: "Emitter".to_owned(),
            texture_path: None,
            position: [0.0; 3],
            velocity: [0.0, 5.0, 0.0],
            position_variance: [0.5; 3],
            velocity_variance: 1.0,
            lifespan: 5.0,
            start_size: 0.2,
            end_size: 0.05,
            mass: 1.0,
            particles_per_second: 100.0,
            blend: ParticleBlendMode::Additive,
            collisions: false,
            collision_thickness: 1.0,
            sort: false,
        }
    }
}

impl EmitterParameters {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ParticleError::Parse`] for malformed TOML and
    /// [`ParticleError::InvalidConfig`] for unusable values.
    pub fn from_toml_str(source: &str) -> ParticleResult<Self> {
        let params: Self = toml::from_str(source)?;
        params.validate()?;
        Ok(params)
    }

    /// Checks the settings can drive a simulation.
    ///
    /// # Errors
    ///
    /// Returns [`ParticleError::InvalidConfig`] naming the emitter and field.
    pub fn validate(&self) -> ParticleResult<()> {
        let invalid = |field: &str| {
            Err(ParticleError::InvalidConfig(format!(
                "emitter '{}': {field}",
                self.name
            )))
        };
        let finite = self
            .position
            .iter()
            .chain(&self.velocity)
            .chain(&self.position_variance)
            .chain([
                &self.velocity_variance,
                &self.start_size,
                &self.end_size,
                &self.mass,
                &self.collision_thickness,
            ])
            .all(|v| v.is_finite());
        if !finite {
            return invalid("values must be finite");
        }
        if !self.lifespan.is_finite() || self.lifespan <= 0.0 {
            return invalid("lifespan must be positive");
        }
        if !self.particles_per_second.is_finite() || self.particles_per_second < 0.0 {
            return invalid("particles_per_second must be non-negative");
        }
        if self.start_size < 0.0 || self.end_size < 0.0 {
            return invalid("sizes must be non-negative");
        }
        Ok(())
    }
}

/// Emitter parameters plus the runtime state of one particle system.
#[derive(Debug, Clone, Default)]
pub struct Emitter {
    /// Authored settings.
    pub params: EmitterParameters,
    /// Freeze emission and simulation; sorting and drawing continue.
    pub pause: bool,
    /// Fractional spawns carried to the next frame.
    pub spawn_accumulator: f32,
    /// Seconds emitted so far.
    pub elapsed_time: f32,
    /// Spawn attempts so far; selects fresh random texels each frame.
    pub spawn_sequence: u32,
    reset_requested: bool,
}

impl Emitter {
    /// Creates a running emitter.
    #[must_use]
    pub fn new(params: EmitterParameters) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Asks the renderer to return every particle to the pool next update.
    pub fn request_reset(&mut self) {
        self.reset_requested = true;
    }

    /// Whether a reset is pending.
    #[must_use]
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    /// Clears a pending reset, returning whether one was pending.
    pub fn take_reset_request(&mut self) -> bool {
        std::mem::take(&mut self.reset_requested)
    }

    /// Spawns owed for a frame of `dt` seconds.
    ///
    /// The fractional part is carried so low rates do not drift.
    pub fn spawn_count(&mut self, dt: f32) -> u32 {
        self.spawn_accumulator += self.params.particles_per_second * dt.max(0.0);
        let whole = self.spawn_accumulator.floor();
        self.spawn_accumulator -= whole;
        whole as u32
    }

    /// Constants for an emission pass of `count` particles, advancing the
    /// emitter clock and random sequence.
    pub fn next_constants(&mut self, dt: f32, count: u32) -> EmitterConstants {
        self.elapsed_time += dt;
        let random_offset = self.spawn_sequence;
        self.spawn_sequence = self.spawn_sequence.wrapping_add(count);
        EmitterConstants {
            random_offset,
            max_particles_this_frame: count.min(i32::MAX as u32) as i32,
            ..self.constants()
        }
    }

    /// Constants describing the emitter without advancing it.
    #[must_use]
    pub fn constants(&self) -> EmitterConstants {
        let p = &self.params;
        EmitterConstants {
            emitter_position: [p.position[0], p.position[1], p.position[2], 1.0],
            emitter_velocity: [p.velocity[0], p.velocity[1], p.velocity[2], 0.0],
            position_variance: [
                p.position_variance[0],
                p.position_variance[1],
                p.position_variance[2],
                0.0,
            ],
            max_particles_this_frame: 0,
            particle_lifespan: p.lifespan,
            start_size: p.start_size,
            end_size: p.end_size,
            velocity_variance: p.velocity_variance,
            mass: p.mass,
            elapsed_time: self.elapsed_time,
            collisions: i32::from(p.collisions),
            collision_thickness: p.collision_thickness,
            random_offset: self.spawn_sequence,
            _pad: [0; 2],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(rate: f32) -> Emitter {
        Emitter::new(EmitterParameters {
            particles_per_second: rate,
            ..EmitterParameters::default()
        })
    }

    #[test]
    fn test_accumulator_carries_fractions() {
        let mut e = emitter(2.0);
        // Half a particle per frame: one spawn every other frame.
        let counts: Vec<u32> = (0..10).map(|_| e.spawn_count(0.25)).collect();
        assert_eq!(counts, vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1]);
        assert!(e.spawn_accumulator < 1.0);
    }

    #[test]
    fn test_whole_spawns_per_frame() {
        let mut e = emitter(100.0);
        assert!((9..=10).contains(&e.spawn_count(0.1)));
        let total: u32 = (0..99).map(|_| e.spawn_count(0.1)).sum::<u32>() + 10;
        assert!((999..=1001).contains(&total));
    }

    #[test]
    fn test_random_offset_advances() {
        let mut e = emitter(10.0);
        let first = e.next_constants(0.1, 4);
        let second = e.next_constants(0.1, 3);
        assert_eq!(first.random_offset, 0);
        assert_eq!(second.random_offset, 4);
        assert_eq!(second.max_particles_this_frame, 3);
        assert!((e.elapsed_time - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_reset_request_consumed_once() {
        let mut e = emitter(1.0);
        e.request_reset();
        assert!(e.take_reset_request());
        assert!(!e.take_reset_request());
    }

    #[test]
    fn test_parameters_from_toml() {
        let params = EmitterParameters::from_toml_str(
            r#"
            name = "smoke"
            particles_per_second = 250.0
            blend = "alpha_blend"
            sort = true
            "#,
        )
        .unwrap();
        assert_eq!(params.name, "smoke");
        assert_eq!(params.blend, ParticleBlendMode::AlphaBlend);
        assert!(params.sort);

        assert!(EmitterParameters::from_toml_str("lifespan = 0.0").is_err());
    }
}
