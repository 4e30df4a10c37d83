pub mod diagnostics;
pub mod engine;
pub mod keying;

use std::sync::Arc;

use tracing::{info, warn};

pub use engine::api::{FilterEngine, FilterGraph};
pub use keyer_frame::{NativeFrame, PixelFormat};
pub use keying::context::{destroy_context, process_frame, FrameOutcome, KeyContext, PassThrough};
pub use keying::error::KeyError;

/// Environment variable selecting the filter engine.
pub const ENGINE_ENV_VAR: &str = "KEYER_ENGINE";

/// Which filter engine backs new keying contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineKind {
    /// Pure-Rust chroma/colour key.
    #[default]
    Software,
    /// libavfilter, when built with the `ffmpeg` feature.
    Ffmpeg,
    /// Pass-through mock, for exercising a host without keying.
    Mock,
}

impl EngineKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "software" | "sw" => Some(Self::Software),
            "ffmpeg" | "libav" | "libavfilter" => Some(Self::Ffmpeg),
            "mock" => Some(Self::Mock),
            _ => None,
        }
    }

    /// Read `KEYER_ENGINE`, defaulting to the software engine.
    pub fn from_env() -> Self {
        match std::env::var(ENGINE_ENV_VAR) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                warn!("unknown {ENGINE_ENV_VAR} value '{value}', using software engine");
                Self::Software
            }),
            Err(_) => Self::Software,
        }
    }
}

/// Create the engine shared by every keying context.
///
/// Performs the engine's one-time process initialisation, so call it once at
/// startup. Falls back to the software engine when the requested one is
/// unavailable.
pub fn create_engine(kind: EngineKind) -> Arc<dyn FilterEngine> {
    match kind {
        EngineKind::Software => {}
        EngineKind::Mock => {
            info!("using mock filter engine");
            return Arc::new(engine::mock::MockEngine::new());
        }
        EngineKind::Ffmpeg => {
            if let Some(engine) = ffmpeg_engine() {
                return engine;
            }
        }
    }
    info!("using software filter engine");
    Arc::new(engine::software::SoftwareEngine::new())
}

#[cfg(feature = "ffmpeg")]
fn ffmpeg_engine() -> Option<Arc<dyn FilterEngine>> {
    match engine::ffmpeg::FfmpegEngine::initialise() {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            warn!("ffmpeg engine unavailable ({e}), using software engine");
            None
        }
    }
}

#[cfg(not(feature = "ffmpeg"))]
fn ffmpeg_engine() -> Option<Arc<dyn FilterEngine>> {
    warn!("built without the `ffmpeg` feature, using software engine");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parses_known_names() {
        assert_eq!(EngineKind::parse("software"), Some(EngineKind::Software));
        assert_eq!(EngineKind::parse(" FFmpeg "), Some(EngineKind::Ffmpeg));
        assert_eq!(EngineKind::parse("mock"), Some(EngineKind::Mock));
        assert_eq!(EngineKind::parse("opencl"), None);
    }

    #[test]
    fn create_engine_honours_kind() {
        assert_eq!(create_engine(EngineKind::Software).name(), "software");
        assert_eq!(create_engine(EngineKind::Mock).name(), "mock");
    }

    #[cfg(not(feature = "ffmpeg"))]
    #[test]
    fn ffmpeg_falls_back_to_software_when_not_built() {
        assert_eq!(create_engine(EngineKind::Ffmpeg).name(), "software");
    }
}
