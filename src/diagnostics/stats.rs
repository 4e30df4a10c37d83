use serde::Serialize;
use std::time::{Duration, Instant};

use crate::keying::context::PassThrough;

/// Frames passed through unkeyed, by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassThroughCounts {
    pub unsupported_format: u64,
    pub invalid_frame: u64,
    pub graph_build_failed: u64,
    pub submission_failed: u64,
    pub no_output_yet: u64,
    pub extraction_failed: u64,
}

impl PassThroughCounts {
    fn slot(&mut self, reason: PassThrough) -> &mut u64 {
        match reason {
            PassThrough::UnsupportedFormat => &mut self.unsupported_format,
            PassThrough::InvalidFrame => &mut self.invalid_frame,
            PassThrough::GraphBuildFailed => &mut self.graph_build_failed,
            PassThrough::SubmissionFailed => &mut self.submission_failed,
            PassThrough::NoOutputYet => &mut self.no_output_yet,
            PassThrough::ExtractionFailed => &mut self.extraction_failed,
        }
    }

    pub fn total(&self) -> u64 {
        self.unsupported_format
            + self.invalid_frame
            + self.graph_build_failed
            + self.submission_failed
            + self.no_output_yet
            + self.extraction_failed
    }
}

/// Collects statistics for one keying context.
pub struct KeyStats {
    frames_seen: u64,
    frames_keyed: u64,
    frames_unchanged: u64,
    pass_through: PassThroughCounts,
    graphs_built: u64,
    build_failures: u64,
    teardowns: u64,
    bytes_written: u64,
    keying_passes: u64,
    last_keying: Duration,
    total_keying: Duration,
    start_time: Instant,
}

/// Snapshot of keying stats for serialisation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyStatsSnapshot {
    pub fps: f64,
    pub frames_seen: u64,
    pub frames_keyed: u64,
    pub frames_unchanged: u64,
    pub frames_passed_through: u64,
    pub pass_through: PassThroughCounts,
    pub graphs_built: u64,
    pub build_failures: u64,
    pub teardowns: u64,
    pub bytes_written: u64,
    pub last_keying_ms: f64,
    pub mean_keying_ms: f64,
}

impl KeyStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            frames_seen: 0,
            frames_keyed: 0,
            frames_unchanged: 0,
            pass_through: PassThroughCounts::default(),
            graphs_built: 0,
            build_failures: 0,
            teardowns: 0,
            bytes_written: 0,
            keying_passes: 0,
            last_keying: Duration::ZERO,
            total_keying: Duration::ZERO,
            start_time: Instant::now(),
        }
    }

    /// Record a frame entering `process_frame`.
    pub fn record_frame_seen(&mut self) {
        self.frames_seen += 1;
    }

    /// Record a frame whose pixels were replaced with keyed output.
    pub fn record_keyed(&mut self, bytes: usize) {
        self.frames_keyed += 1;
        self.bytes_written += bytes as u64;
    }

    /// Record a keyed frame whose first plane came back identical.
    pub fn record_unchanged(&mut self) {
        self.frames_unchanged += 1;
    }

    pub fn record_pass_through(&mut self, reason: PassThrough) {
        *self.pass_through.slot(reason) += 1;
    }

    pub fn record_build(&mut self) {
        self.graphs_built += 1;
    }

    pub fn record_build_failure(&mut self) {
        self.build_failures += 1;
    }

    pub fn record_teardown(&mut self) {
        self.teardowns += 1;
    }

    /// Record the duration of one submit-and-extract pass.
    pub fn record_keying_time(&mut self, elapsed: Duration) {
        self.keying_passes += 1;
        self.last_keying = elapsed;
        self.total_keying += elapsed;
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_keyed(&self) -> u64 {
        self.frames_keyed
    }

    pub fn frames_unchanged(&self) -> u64 {
        self.frames_unchanged
    }

    pub fn pass_through(&self) -> PassThroughCounts {
        self.pass_through
    }

    pub fn graphs_built(&self) -> u64 {
        self.graphs_built
    }

    pub fn build_failures(&self) -> u64 {
        self.build_failures
    }

    pub fn teardowns(&self) -> u64 {
        self.teardowns
    }

    /// Processed frames per second since creation or the last reset.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        (self.frames_keyed + self.frames_unchanged) as f64 / elapsed
    }

    /// Duration of the latest keying pass in milliseconds.
    pub fn last_keying_ms(&self) -> f64 {
        self.last_keying.as_secs_f64() * 1000.0
    }

    /// Mean keying pass duration in milliseconds.
    pub fn mean_keying_ms(&self) -> f64 {
        if self.keying_passes == 0 {
            return 0.0;
        }
        self.total_keying.as_secs_f64() * 1000.0 / self.keying_passes as f64
    }

    /// Reset all counters.
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> KeyStatsSnapshot {
        KeyStatsSnapshot {
            fps: self.fps(),
            frames_seen: self.frames_seen,
            frames_keyed: self.frames_keyed,
            frames_unchanged: self.frames_unchanged,
            frames_passed_through: self.pass_through.total(),
            pass_through: self.pass_through,
            graphs_built: self.graphs_built,
            build_failures: self.build_failures,
            teardowns: self.teardowns,
            bytes_written: self.bytes_written,
            last_keying_ms: self.last_keying_ms(),
            mean_keying_ms: self.mean_keying_ms(),
        }
    }
}

impl Default for KeyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialises_with_zero_values() {
        let stats = KeyStats::new();
        assert_eq!(stats.frames_seen, 0);
        assert_eq!(stats.frames_keyed, 0);
        assert_eq!(stats.pass_through.total(), 0);
        assert_eq!(stats.mean_keying_ms(), 0.0);
    }

    #[test]
    fn record_keyed_accumulates_bytes() {
        let mut stats = KeyStats::new();
        stats.record_keyed(1000);
        stats.record_keyed(500);
        assert_eq!(stats.frames_keyed, 2);
        assert_eq!(stats.bytes_written, 1500);
    }

    #[test]
    fn pass_through_is_counted_per_reason() {
        let mut stats = KeyStats::new();
        stats.record_pass_through(PassThrough::NoOutputYet);
        stats.record_pass_through(PassThrough::NoOutputYet);
        stats.record_pass_through(PassThrough::UnsupportedFormat);
        let counts = stats.pass_through();
        assert_eq!(counts.no_output_yet, 2);
        assert_eq!(counts.unsupported_format, 1);
        assert_eq!(counts.extraction_failed, 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn keying_time_tracks_last_and_mean() {
        let mut stats = KeyStats::new();
        stats.record_keying_time(Duration::from_millis(2));
        stats.record_keying_time(Duration::from_millis(4));
        assert!((stats.last_keying_ms() - 4.0).abs() < 1e-9);
        assert!((stats.mean_keying_ms() - 3.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears_all_counters() {
        let mut stats = KeyStats::new();
        stats.record_frame_seen();
        stats.record_build();
        stats.record_teardown();
        stats.record_pass_through(PassThrough::InvalidFrame);
        stats.reset();
        assert_eq!(stats.frames_seen, 0);
        assert_eq!(stats.graphs_built, 0);
        assert_eq!(stats.teardowns, 0);
        assert_eq!(stats.pass_through.total(), 0);
    }

    #[test]
    fn snapshot_serialises_to_camelcase() {
        let mut stats = KeyStats::new();
        stats.record_frame_seen();
        stats.record_keyed(64);
        stats.record_pass_through(PassThrough::GraphBuildFailed);
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["framesSeen"], 1);
        assert_eq!(json["bytesWritten"], 64);
        assert_eq!(json["framesPassedThrough"], 1);
        assert_eq!(json["passThrough"]["graphBuildFailed"], 1);
        assert!(json["meanKeyingMs"].is_number());
    }
}
