use thiserror::Error;

/// Errors raised while building a [`crate::NativeFrame`] view.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("plane {0} pointer is null")]
    NullPlane(usize),

    #[error("format {format} needs {needed} planes, got {got}")]
    MissingPlanes {
        format: String,
        needed: usize,
        got: usize,
    },

    #[error("plane {index} size overflows: stride {stride} x {rows} rows")]
    PlaneOverflow {
        index: usize,
        stride: usize,
        rows: usize,
    },
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, FrameError>;
