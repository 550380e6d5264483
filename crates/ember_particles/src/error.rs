//! # Particle Error Types

use ember_gfx::GfxError;
use thiserror::Error;

/// Errors raised by the particle renderer.
#[derive(Error, Debug)]
pub enum ParticleError {
    /// The GPU abstraction rejected a resource or command.
    #[error("gpu error: {0}")]
    Gfx(#[from] GfxError),

    /// A configuration value is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A TOML document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Result type for particle operations.
pub type ParticleResult<T> = Result<T, ParticleError>;
