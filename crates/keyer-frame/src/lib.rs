//! Native frame contract shared between the capture/composition layer and
//! the keying core.
//!
//! The capture layer owns every pixel buffer. This crate only describes those
//! buffers: which pixel format they carry, how many planes that format needs,
//! and how many bytes each plane spans for a given geometry and stride.

pub mod error;
pub mod format;
pub mod frame;

pub use error::{FrameError, Result};
pub use format::{PixelFormat, MAX_PLANES};
pub use frame::{NativeFrame, PlaneMut};
