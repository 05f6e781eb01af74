//! Configuration error types.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating a [`ScalerConfig`](crate::ScalerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid job/worker ratio: {0}")]
    InvalidRatio(String),

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),

    #[error("min_workers ({min}) exceeds max_workers ({max})")]
    Bounds { min: u32, max: u32 },

    #[error("scaling is enabled but no target application is configured")]
    MissingApplication,
}
