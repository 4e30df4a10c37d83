// Keying domain: graph lifecycle, frame bridging, and the per-source context.

pub mod bridge;
pub mod context;
pub mod error;
pub mod graph;
pub mod types;
