//! error.rs
//! Typed failures crossing the bridge boundaries.
//! - Capture-side: device open and single-read failures.
//! - Motion-side: joint key and shape violations.
//! - Construction-time: configuration validation.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Capture device could not be opened or disappeared mid-session.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A single on-demand frame read failed.
    #[error("frame capture failed: {0}")]
    CaptureFailed(String),

    /// A configured joint has no matching key in the hardware position map.
    #[error("missing joint key '{0}' in hardware position map")]
    MissingJointKey(String),

    /// Vector length does not match the joint ordering it is paired with.
    #[error("expected {expected} components, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Configuration rejected at load or construction time.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Hardware interface reported a fault.
    #[error("hardware error: {0}")]
    Hardware(String),

    /// Decision process could not produce an action.
    #[error("decision error: {0}")]
    Decision(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
