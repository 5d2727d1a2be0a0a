//! # Error Types
//!
//! Custom error types for Rig Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Rig Bridge
#[derive(Debug, Error)]
pub enum RigError {
    /// A channel entry in the configuration document is missing a field
    /// or carries an out-of-range value
    #[error("configuration error for channel '{channel}': {message}")]
    ChannelConfig { channel: String, message: String },

    /// A `[rig]` or `[gamepad]` setting is out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// TOML parsing errors
    #[error("configuration parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `update` was called without input values
    #[error("input values are missing")]
    InvalidInput,

    /// `update` was called with the wrong number of input values
    #[error("expected {expected} input values, received {actual}")]
    InputShape { expected: usize, actual: usize },

    /// Input device errors
    #[error("input device error: {0}")]
    Device(String),

    /// PWM driver errors
    #[error("PWM driver error: {0}")]
    Driver(String),
}

/// Result type alias for Rig Bridge
pub type Result<T> = std::result::Result<T, RigError>;
