//! Error types for link-layer operations
//!
//! Only failures that are meaningful to the caller live here. Per-frame
//! receive faults (misalignment, foreign address, CRC mismatch) are never
//! errors: they surface as [`DropDiagnostic`](crate::contracts::DropDiagnostic)s.
use std::io;

use thiserror::Error;

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Link engine error enumeration
#[derive(Error, Debug)]
pub enum LinkError {
    /// Codec input does not match the configured payload length
    #[error("Invalid length: expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    /// Submitted data exceeds the configured payload size; callers chunk upstream
    #[error("Payload too large: {len} bytes exceeds payload size {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// Frame type byte outside {DATA, ACK}
    #[error("Invalid frame type: {0:#04x}")]
    InvalidFrameType(u8),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The ARQ engine has been stopped and no longer accepts payloads
    #[error("ARQ engine stopped")]
    EngineStopped,

    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinkError {
    /// Shorthand for configuration failures
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
