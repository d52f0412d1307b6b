//! Construction-time configuration errors.
//!
//! The estimation cycle itself is total over validated inputs, so these are the only errors the
//! core library reports. They are raised when a map, sensor or filter is built and never from
//! `predict`, `update`, `resample` or `estimate`.
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("particle filter needs at least one particle")]
    NoParticles,

    #[error("environment bounds must be positive and finite, got {width} x {height}")]
    InvalidBounds { width: f64, height: f64 },

    #[error("sensor needs at least one beam")]
    NoBeams,

    #[error("maximum sensing range must be positive and finite, got {0}")]
    InvalidMaxRange(f64),

    #[error("{name} must be a finite, non-negative standard deviation, got {value}")]
    InvalidNoise { name: &'static str, value: f64 },

    #[error("likelihood standard deviation must be positive and finite, got {0}")]
    InvalidLikelihoodStd(f64),

    #[error("resampling threshold must lie in [0, 1], got {0}")]
    InvalidResampleThreshold(f64),

    #[error("segment {index} has non-finite coordinates")]
    NonFiniteSegment { index: usize },
}

/// Check a standard deviation used to draw noise.
pub(crate) fn check_noise(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidNoise { name, value })
    }
}
