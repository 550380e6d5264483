//! # Renderer Configuration
//!
//! Tuning constants for one [`ParticleRenderer`](crate::ParticleRenderer),
//! loaded once at startup.
//!
//! ```toml
//! capacity = 409600
//! sort_steps_per_frame = 64
//! gravity = [0.0, -9.81, 0.0]
//! ```

use ember_gfx::{DEFAULT_WORKGROUP_SIZE, MAX_WORKGROUPS_PER_DIMENSION};
use serde::{Deserialize, Serialize};

use crate::error::{ParticleError, ParticleResult};

/// Pool capacity of the reference configuration.
pub const DEFAULT_CAPACITY: u32 = 400 * 1024;

/// Largest pool whose per-slot passes fit one dispatch dimension.
///
/// The padded sort network (`capacity` rounded up to a power of two) then
/// needs at most `2^24 / 512` groups per pass, well inside the same limit.
pub const MAX_CAPACITY: u32 = MAX_WORKGROUPS_PER_DIMENSION * DEFAULT_WORKGROUP_SIZE;

/// Configuration of a particle renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleRendererConfig {
    /// Number of particle slots.
    pub capacity: u32,
    /// Sort dispatches issued per frame at most.
    pub sort_steps_per_frame: u32,
    /// World-space acceleration applied to every awake particle.
    pub gravity: [f32; 3],
    /// Fraction of speed kept after bouncing off scene depth.
    pub collision_restitution: f32,
    /// Speed below which a collided particle comes to rest.
    pub sleep_speed: f32,
    /// View-space distance over which billboards fade into geometry.
    pub soft_particle_fade: f32,
    /// Width and height of the random lookup texture.
    pub random_texture_size: u32,
}

impl Default for ParticleRendererConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            sort_steps_per_frame: 64,
            gravity: [0.0, -9.81, 0.0],
            collision_restitution: 0.3,
            sleep_speed: 0.05,
            soft_particle_fade: 0.5,
            random_texture_size: 1024,
        }
    }
}

impl ParticleRendererConfig {
    /// Default configuration with a different pool capacity.
    #[must_use]
    pub fn with_capacity(capacity: u32) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Parses and validates a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ParticleError::Parse`] for malformed TOML and
    /// [`ParticleError::InvalidConfig`] for unusable values.
    pub fn from_toml_str(source: &str) -> ParticleResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value can drive a renderer.
    ///
    /// # Errors
    ///
    /// Returns [`ParticleError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> ParticleResult<()> {
        let invalid = |reason: String| Err(ParticleError::InvalidConfig(reason));

        if self.capacity == 0 {
            return invalid("capacity must be at least 1".to_owned());
        }
        if self.capacity > MAX_CAPACITY {
            return invalid(format!(
                "capacity {} exceeds {MAX_CAPACITY} (one dispatch dimension)",
                self.capacity
            ));
        }
        if self.sort_steps_per_frame == 0 {
            return invalid("sort_steps_per_frame must be at least 1".to_owned());
        }
        if !(1..=4096).contains(&self.random_texture_size) {
            return invalid(format!(
                "random_texture_size {} outside [1, 4096]",
                self.random_texture_size
            ));
        }
        if !self.gravity.iter().all(|g| g.is_finite()) {
            return invalid("gravity must be finite".to_owned());
        }
        if !(0.0..=1.0).contains(&self.collision_restitution) {
            return invalid(format!(
                "collision_restitution {} outside [0, 1]",
                self.collision_restitution
            ));
        }
        if !self.sleep_speed.is_finite() || self.sleep_speed < 0.0 {
            return invalid("sleep_speed must be finite and non-negative".to_owned());
        }
        if !self.soft_particle_fade.is_finite() || self.soft_particle_fade <= 0.0 {
            return invalid("soft_particle_fade must be finite and positive".to_owned());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ParticleRendererConfig::default();
        assert_eq!(config.capacity, 409_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config =
            ParticleRendererConfig::from_toml_str("capacity = 1024\nsleep_speed = 0.1\n").unwrap();
        assert_eq!(config.capacity, 1024);
        assert!((config.sleep_speed - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.sort_steps_per_frame, 64);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            ParticleRendererConfig::from_toml_str("capacity = 0"),
            Err(ParticleError::InvalidConfig(_))
        ));
        assert!(matches!(
            ParticleRendererConfig::from_toml_str("sort_steps_per_frame = 0"),
            Err(ParticleError::InvalidConfig(_))
        ));
        assert!(matches!(
            ParticleRendererConfig::from_toml_str("collision_restitution = 1.5"),
            Err(ParticleError::InvalidConfig(_))
        ));
        assert!(matches!(
            ParticleRendererConfig::from_toml_str("capacity = \"many\""),
            Err(ParticleError::Parse(_))
        ));
    }

    #[test]
    fn test_capacity_bounded_by_dispatch_limit() {
        assert_eq!(MAX_CAPACITY, 16_776_960);
        assert!(ParticleRendererConfig::with_capacity(MAX_CAPACITY)
            .validate()
            .is_ok());
        assert!(matches!(
            ParticleRendererConfig::with_capacity(MAX_CAPACITY + 1).validate(),
            Err(ParticleError::InvalidConfig(_))
        ));
        assert!(ParticleRendererConfig::with_capacity(20_000_000)
            .validate()
            .is_err());
    }
}
