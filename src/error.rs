//! Error types for vaforge encode operations.

use thiserror::Error;

/// Errors that can occur while driving the encode pipeline.
#[derive(Error, Debug)]
pub enum VaForgeError {
    /// No input frame is queued. Expected while draining, not a fault.
    #[error("No frame available")]
    NoFrameAvailable,

    /// Surface, coded-buffer, or picture allocation failed.
    #[error("Allocation failed: {0}")]
    AllocationFailed(String),

    /// No candidate profile is supported by the backend.
    #[error("Unsupported profile: {0}")]
    UnsupportedProfile(String),

    /// Unknown or unsupported configuration parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid input data or dimensions.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested codec is not supported.
    #[error("Codec not supported: {0}")]
    CodecNotSupported(String),

    /// The backend rejected a submission.
    #[error("Backend submission failed: {0}")]
    BackendSubmissionFailed(String),
}

/// Result type for vaforge operations.
pub type Result<T> = std::result::Result<T, VaForgeError>;
