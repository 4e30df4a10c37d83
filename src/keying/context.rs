//! Per-source keying context and the per-frame entry points.
//!
//! [`process_frame`] runs `ensure_graph -> inject -> extract -> write_back`
//! for one captured frame. Every failure is absorbed here: the only effect a
//! failure has on the caller is a frame returned exactly as it came in.

use std::sync::Arc;
use std::time::Instant;

use keyer_frame::NativeFrame;
use tracing::{debug, error, info, trace, warn};

use crate::diagnostics::stats::KeyStats;
use crate::engine::api::FilterEngine;
use crate::keying::bridge::{self, Extracted, WriteBack};
use crate::keying::error::Result;
use crate::keying::graph::{GraphManager, GraphState, ProcessingGraph};
use crate::keying::types::FrameDescriptor;

/// Why a frame was returned without keying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassThrough {
    UnsupportedFormat,
    InvalidFrame,
    GraphBuildFailed,
    SubmissionFailed,
    /// The engine buffered the frame without producing output.
    NoOutputYet,
    ExtractionFailed,
}

/// What `process_frame` did to a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Keyed pixels were written into the frame.
    Keyed,
    /// Keying ran but produced the frame's existing bytes; nothing written.
    Unchanged,
    /// The frame was left untouched.
    PassedThrough(PassThrough),
}

/// Keying state for one composited video source.
///
/// Owns at most one processing graph. Not shared between threads; the
/// capture pipeline drives it from a single thread, one frame at a time.
pub struct KeyContext {
    graphs: GraphManager,
    stats: KeyStats,
}

impl KeyContext {
    pub fn new(engine: Arc<dyn FilterEngine>) -> Self {
        debug!("creating keying context on {} engine", engine.name());
        Self {
            graphs: GraphManager::new(engine),
            stats: KeyStats::new(),
        }
    }

    pub fn graph_state(&self) -> GraphState {
        self.graphs.state()
    }

    pub fn graph(&self) -> Option<&ProcessingGraph> {
        self.graphs.graph()
    }

    pub fn stats(&self) -> &KeyStats {
        &self.stats
    }

    /// Return a graph matching `frame`, building or rebuilding as needed.
    pub fn ensure_graph(&mut self, frame: &NativeFrame<'_>) -> Result<&mut ProcessingGraph> {
        self.graphs
            .ensure_graph(FrameDescriptor::of(frame), &mut self.stats)
    }

    /// Release the graph and its buffers. Idempotent.
    pub fn destroy(&mut self) {
        self.graphs.destroy(&mut self.stats);
    }

    /// Key one frame in place.
    pub fn process_frame(&mut self, frame: &mut NativeFrame<'_>) -> FrameOutcome {
        let descriptor = FrameDescriptor::of(frame);
        debug!("keying {descriptor} frame");
        self.stats.record_frame_seen();

        if !bridge::is_supported_format(frame.format) {
            warn!("unsupported pixel format {}, frame passed through", frame.format);
            return pass_through(&mut self.stats, PassThrough::UnsupportedFormat);
        }
        if let Err(e) = bridge::plane_layout(frame) {
            error!("rejecting {descriptor} frame: {e}");
            return pass_through(&mut self.stats, PassThrough::InvalidFrame);
        }

        let graph = match self.graphs.ensure_graph(descriptor, &mut self.stats) {
            Ok(graph) => graph,
            Err(e) => {
                error!("no keying graph for {descriptor}: {e}");
                return pass_through(&mut self.stats, PassThrough::GraphBuildFailed);
            }
        };

        let started = Instant::now();
        if let Err(e) = bridge::inject(graph, frame) {
            error!("frame submission failed: {e}");
            return pass_through(&mut self.stats, PassThrough::SubmissionFailed);
        }
        match bridge::extract(graph) {
            Ok(Extracted::Output) => {}
            Ok(Extracted::NoOutput) => {
                trace!("engine has no output yet, frame passed through");
                return pass_through(&mut self.stats, PassThrough::NoOutputYet);
            }
            Err(e) => {
                error!("frame extraction failed: {e}");
                return pass_through(&mut self.stats, PassThrough::ExtractionFailed);
            }
        }
        let elapsed = started.elapsed();
        self.stats.record_keying_time(elapsed);
        debug!("keying pass took {:.3} ms", elapsed.as_secs_f64() * 1000.0);

        match bridge::write_back(frame, graph.output_stage()) {
            Ok(WriteBack::Copied { bytes }) => {
                self.stats.record_keyed(bytes);
                FrameOutcome::Keyed
            }
            Ok(WriteBack::Unchanged) => {
                self.stats.record_unchanged();
                FrameOutcome::Unchanged
            }
            Err(e) => {
                error!("write-back failed: {e}");
                pass_through(&mut self.stats, PassThrough::InvalidFrame)
            }
        }
    }
}

impl Drop for KeyContext {
    fn drop(&mut self) {
        if self.graphs.state() == GraphState::Valid {
            self.destroy();
        }
    }
}

fn pass_through(stats: &mut KeyStats, reason: PassThrough) -> FrameOutcome {
    stats.record_pass_through(reason);
    FrameOutcome::PassedThrough(reason)
}

/// Key one frame in place using `context`.
///
/// Never fails: on any error the frame is left byte-for-byte unmodified and
/// the returned outcome names the reason.
pub fn process_frame(context: &mut KeyContext, frame: &mut NativeFrame<'_>) -> FrameOutcome {
    context.process_frame(frame)
}

/// Release a context and everything it owns, leaving the handle empty.
///
/// Callable at any time, including on an already-empty handle.
pub fn destroy_context(context: &mut Option<KeyContext>) {
    if let Some(mut ctx) = context.take() {
        ctx.destroy();
    } else {
        info!("keying context already released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::engine::software::SoftwareEngine;
    use crate::keying::error::KeyError;
    use crate::keying::types::RGB_KEY_COLOR;
    use keyer_frame::PixelFormat;

    /// Owned I420 planes for building frames in tests.
    struct I420 {
        width: u32,
        height: u32,
        y: Vec<u8>,
        u: Vec<u8>,
        v: Vec<u8>,
    }

    impl I420 {
        fn filled(width: u32, height: u32, luma: u8) -> Self {
            let chroma = (width as usize / 2) * (height as usize / 2);
            Self {
                width,
                height,
                y: vec![luma; width as usize * height as usize],
                u: vec![128; chroma],
                v: vec![128; chroma],
            }
        }

        fn frame(&mut self) -> NativeFrame<'_> {
            let (w, h) = (self.width, self.height);
            NativeFrame::new(w, h, PixelFormat::I420)
                .with_plane(&mut self.y, w as usize)
                .with_plane(&mut self.u, w as usize / 2)
                .with_plane(&mut self.v, w as usize / 2)
        }

        fn bytes(&self) -> Vec<u8> {
            [self.y.as_slice(), &self.u, &self.v].concat()
        }
    }

    fn context(mock: &MockEngine) -> KeyContext {
        KeyContext::new(Arc::new(mock.clone()))
    }

    #[test]
    fn first_frame_builds_once_and_skips_identical_output() {
        let mock = MockEngine::new();
        let mut ctx = context(&mock);
        let mut pixels = I420::filled(1280, 720, 60);
        let before = pixels.bytes();

        let outcome = process_frame(&mut ctx, &mut pixels.frame());

        assert_eq!(outcome, FrameOutcome::Unchanged);
        assert_eq!(mock.graphs_allocated(), 1);
        assert_eq!(pixels.bytes(), before);
        assert_eq!(ctx.graph_state(), GraphState::Valid);
    }

    #[test]
    fn first_frame_writes_back_when_output_differs() {
        let mock = MockEngine::new().with_substitution(60, 16);
        let mut ctx = context(&mock);
        let mut pixels = I420::filled(1280, 720, 60);

        let outcome = process_frame(&mut ctx, &mut pixels.frame());

        assert_eq!(outcome, FrameOutcome::Keyed);
        assert!(pixels.y.iter().all(|&b| b == 16));
        assert!(pixels.u.iter().all(|&b| b == 128));
        assert_eq!(ctx.stats().frames_keyed(), 1);
    }

    #[test]
    fn same_geometry_reuses_graph() {
        let mock = MockEngine::new();
        let mut ctx = context(&mock);
        let mut pixels = I420::filled(1280, 720, 60);

        process_frame(&mut ctx, &mut pixels.frame());
        process_frame(&mut ctx, &mut pixels.frame());

        assert_eq!(mock.graphs_allocated(), 1);
        assert_eq!(mock.frames_submitted(), 2);
    }

    #[test]
    fn resolution_change_rebuilds_without_leaks() {
        let mock = MockEngine::new();
        let mut ctx = context(&mock);

        process_frame(&mut ctx, &mut I420::filled(1280, 720, 60).frame());
        process_frame(&mut ctx, &mut I420::filled(1280, 720, 60).frame());
        process_frame(&mut ctx, &mut I420::filled(640, 360, 60).frame());

        assert_eq!(mock.graphs_allocated(), 2);
        assert_eq!(mock.live_graphs(), 1);
        assert_eq!(mock.live_nodes(), 3);
        let graph = ctx.graph().unwrap();
        assert_eq!(graph.descriptor(), FrameDescriptor::new(640, 360, PixelFormat::I420));
    }

    #[test]
    fn unknown_format_is_left_untouched_without_a_graph() {
        let mock = MockEngine::new().with_substitution(7, 0);
        let mut ctx = context(&mock);
        let mut data = vec![7u8; 64];
        let mut frame = NativeFrame::new(4, 4, PixelFormat::from_raw(99)).with_plane(&mut data, 16);

        let outcome = process_frame(&mut ctx, &mut frame);

        assert_eq!(
            outcome,
            FrameOutcome::PassedThrough(PassThrough::UnsupportedFormat)
        );
        assert_eq!(frame.format, PixelFormat::Unknown(99));
        drop(frame);
        assert_eq!(data, vec![7u8; 64]);
        assert_eq!(mock.graphs_allocated(), 0);
    }

    #[test]
    fn build_failure_passes_through_then_retries() {
        let mock = MockEngine::new()
            .with_substitution(60, 16)
            .with_error("configure", KeyError::GraphBuild("rejected".to_string()));
        let mut ctx = context(&mock);
        let mut pixels = I420::filled(64, 64, 60);
        let before = pixels.bytes();

        let first = process_frame(&mut ctx, &mut pixels.frame());
        assert_eq!(first, FrameOutcome::PassedThrough(PassThrough::GraphBuildFailed));
        assert_eq!(pixels.bytes(), before);
        assert_eq!(ctx.graph_state(), GraphState::Empty);
        assert_eq!(mock.live_nodes(), 0);

        let second = process_frame(&mut ctx, &mut pixels.frame());
        assert_eq!(second, FrameOutcome::Keyed);
        assert_eq!(mock.configure_calls(), 2);
    }

    #[test]
    fn zero_stride_is_contained() {
        let mock = MockEngine::new().with_substitution(60, 16);
        let mut ctx = context(&mock);
        let mut y = vec![60u8; 16];
        let mut u = vec![60u8; 4];
        let mut v = vec![60u8; 4];
        let mut frame = NativeFrame::new(4, 4, PixelFormat::I420)
            .with_plane(&mut y, 0)
            .with_plane(&mut u, 2)
            .with_plane(&mut v, 2);

        let outcome = process_frame(&mut ctx, &mut frame);

        assert_eq!(outcome, FrameOutcome::PassedThrough(PassThrough::InvalidFrame));
        drop(frame);
        assert_eq!(y, vec![60u8; 16]);
        assert_eq!(mock.graphs_allocated(), 0);
    }

    #[test]
    fn submission_failure_leaves_frame_untouched() {
        let mock = MockEngine::new()
            .with_substitution(60, 16)
            .with_error("submit", KeyError::Submission("buffer exhausted".to_string()));
        let mut ctx = context(&mock);
        let mut pixels = I420::filled(8, 8, 60);
        let before = pixels.bytes();

        let outcome = process_frame(&mut ctx, &mut pixels.frame());

        assert_eq!(outcome, FrameOutcome::PassedThrough(PassThrough::SubmissionFailed));
        assert_eq!(pixels.bytes(), before);
        assert_eq!(ctx.graph_state(), GraphState::Valid);
    }

    #[test]
    fn extraction_failure_leaves_frame_untouched() {
        let mock = MockEngine::new().with_substitution(60, 16);
        let mut ctx = context(&mock);
        mock.inject_error("receive", KeyError::Extraction("decode error".to_string()));
        let mut pixels = I420::filled(8, 8, 60);
        let before = pixels.bytes();

        let outcome = process_frame(&mut ctx, &mut pixels.frame());

        assert_eq!(outcome, FrameOutcome::PassedThrough(PassThrough::ExtractionFailed));
        assert_eq!(pixels.bytes(), before);
    }

    #[test]
    fn pending_output_passes_through_and_stale_output_is_dropped() {
        let mock = MockEngine::new().with_pending_outputs(1);
        let mut ctx = context(&mock);

        let mut first = I420::filled(8, 8, 60);
        let outcome = process_frame(&mut ctx, &mut first.frame());
        assert_eq!(outcome, FrameOutcome::PassedThrough(PassThrough::NoOutputYet));

        // The engine now returns the first frame's output before the second's;
        // the second frame must not receive the first frame's pixels.
        let mut second = I420::filled(8, 8, 90);
        let outcome = process_frame(&mut ctx, &mut second.frame());
        assert_eq!(outcome, FrameOutcome::Unchanged);
        assert!(second.y.iter().all(|&b| b == 90));
    }

    #[test]
    fn destroy_context_is_idempotent() {
        let mock = MockEngine::new();
        let mut handle = Some(context(&mock));
        if let Some(ctx) = handle.as_mut() {
            process_frame(ctx, &mut I420::filled(16, 16, 60).frame());
        }
        assert_eq!(mock.live_graphs(), 1);

        destroy_context(&mut handle);
        destroy_context(&mut handle);

        assert!(handle.is_none());
        assert_eq!(mock.live_graphs(), 0);
        assert_eq!(mock.live_nodes(), 0);
    }

    #[test]
    fn dropping_a_context_releases_its_graph() {
        let mock = MockEngine::new();
        {
            let mut ctx = context(&mock);
            process_frame(&mut ctx, &mut I420::filled(16, 16, 60).frame());
        }
        assert_eq!(mock.live_graphs(), 0);
    }

    #[test]
    fn software_engine_keys_bgrx_green_to_transparent_bgra() {
        let mut ctx = KeyContext::new(Arc::new(SoftwareEngine::new()));
        let green = RGB_KEY_COLOR;
        let mut pixels = vec![green.b, green.g, green.r, 0, 200, 40, 40, 0];
        let mut frame = NativeFrame::new(2, 1, PixelFormat::Bgrx).with_plane(&mut pixels, 8);

        let outcome = process_frame(&mut ctx, &mut frame);

        assert_eq!(outcome, FrameOutcome::Keyed);
        assert_eq!(frame.format, PixelFormat::Bgra);
        drop(frame);
        assert_eq!(pixels[3], 0);
        assert_eq!(pixels[7], 255);
        assert_eq!(ctx.stats().frames_keyed(), 1);
    }
}
