use thiserror::Error;

/// Keying subsystem errors.
///
/// None of these escape [`crate::keying::context::process_frame`]; they are
/// logged there and the frame passes through untouched.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    #[error("graph allocation failed: {0}")]
    Allocation(String),

    #[error("graph build failed: {0}")]
    GraphBuild(String),

    #[error("frame submission failed: {0}")]
    Submission(String),

    #[error("frame extraction failed: {0}")]
    Extraction(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, KeyError>;
