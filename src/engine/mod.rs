// Filter engines: the capability traits and their implementations.

pub mod api;
#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod mock;
pub mod software;
