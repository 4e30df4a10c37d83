//! Filter engine capability traits.
//!
//! The keying core never talks to a concrete pixel-filtering library. It
//! drives a [`FilterEngine`] that hands out [`FilterGraph`]s, and every
//! implementation (in-process software, libavfilter, test mock) honours the
//! same contract:
//!
//! - nodes are added one at a time and identified by [`NodeId`],
//! - a graph accepts frames only after [`FilterGraph::configure`] succeeds,
//! - dropping a graph releases every node it owns, configured or not.

use crate::keying::error::Result;
use crate::keying::types::KeyParameters;

/// Opaque node handle, scoped to the graph that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub usize);

/// Pixel formats understood by filter engines.
///
/// Names follow libavfilter's pixel format names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnginePixelFormat {
    Yuv420p,
    Nv12,
    Yuyv422,
    Yvyu422,
    Uyvy422,
    Yuv444p,
    Rgba,
    Bgra,
    Gray8,
}

impl EnginePixelFormat {
    pub fn name(self) -> &'static str {
        match self {
            Self::Yuv420p => "yuv420p",
            Self::Nv12 => "nv12",
            Self::Yuyv422 => "yuyv422",
            Self::Yvyu422 => "yvyu422",
            Self::Uyvy422 => "uyvy422",
            Self::Yuv444p => "yuv444p",
            Self::Rgba => "rgba",
            Self::Bgra => "bgra",
            Self::Gray8 => "gray",
        }
    }

    pub fn is_yuv(self) -> bool {
        matches!(
            self,
            Self::Yuv420p | Self::Nv12 | Self::Yuyv422 | Self::Yvyu422 | Self::Uyvy422 | Self::Yuv444p
        )
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba | Self::Bgra)
    }

    pub fn plane_count(self) -> usize {
        match self {
            Self::Yuv420p | Self::Yuv444p => 3,
            Self::Nv12 => 2,
            _ => 1,
        }
    }

    /// Rows stored in `plane` for a frame `height` pixels tall.
    pub fn plane_rows(self, plane: usize, height: u32) -> usize {
        let height = height as usize;
        match self {
            _ if plane >= self.plane_count() => 0,
            Self::Yuv420p | Self::Nv12 if plane > 0 => height.div_ceil(2),
            _ => height,
        }
    }

    /// Minimum bytes in one row of `plane` for a frame `width` pixels wide.
    pub fn min_row_bytes(self, plane: usize, width: u32) -> usize {
        let width = width as usize;
        match self {
            _ if plane >= self.plane_count() => 0,
            Self::Yuv420p if plane > 0 => width.div_ceil(2),
            Self::Nv12 if plane > 0 => width.div_ceil(2) * 2,
            Self::Yuv420p | Self::Nv12 | Self::Yuv444p | Self::Gray8 => width,
            Self::Yuyv422 | Self::Yvyu422 | Self::Uyvy422 => width.div_ceil(2) * 4,
            Self::Rgba | Self::Bgra => width * 4,
        }
    }
}

/// Configuration of a source (frame injection) node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceConfig {
    pub width: u32,
    pub height: u32,
    pub format: EnginePixelFormat,
    /// Timestamp unit of submitted frames. Bookkeeping only, never used for pacing.
    pub time_base: (i32, i32),
    pub pixel_aspect: (i32, i32),
}

impl SourceConfig {
    /// Nominal rate used for the time base of every source node.
    pub const NOMINAL_FRAME_RATE: i32 = 25;

    pub fn new(width: u32, height: u32, format: EnginePixelFormat) -> Self {
        Self {
            width,
            height,
            format,
            time_base: (1, Self::NOMINAL_FRAME_RATE),
            pixel_aspect: (1, 1),
        }
    }

    /// Option string for a libavfilter `buffer` node, given the engine's
    /// numeric code for `format`.
    pub fn filter_args(&self, pix_fmt_code: i32) -> String {
        format!(
            "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
            self.width,
            self.height,
            pix_fmt_code,
            self.time_base.0,
            self.time_base.1,
            self.pixel_aspect.0,
            self.pixel_aspect.1
        )
    }
}

/// One plane of a stage frame. `data.len()` is always `stride * rows`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StagePlane {
    pub data: Vec<u8>,
    pub stride: usize,
}

/// Frame buffer exchanged with an engine graph.
///
/// Stage frames are owned by the processing graph and reused across calls;
/// [`StageFrame::reshape`] and [`StageFrame::copy_from`] keep existing
/// allocations whenever the layout allows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFrame {
    pub format: EnginePixelFormat,
    pub width: u32,
    pub height: u32,
    /// Submission sequence number, in units of the source time base.
    pub pts: i64,
    pub planes: Vec<StagePlane>,
}

impl StageFrame {
    pub fn new(format: EnginePixelFormat, width: u32, height: u32) -> Self {
        Self {
            format,
            width,
            height,
            pts: 0,
            planes: Vec::new(),
        }
    }

    /// Size the planes for the given `(stride, rows)` pairs.
    pub fn reshape(&mut self, layout: &[(usize, usize)]) {
        self.planes.resize_with(layout.len(), StagePlane::default);
        for (plane, &(stride, rows)) in self.planes.iter_mut().zip(layout) {
            plane.stride = stride;
            plane.data.resize(stride * rows, 0);
        }
    }

    /// Overwrite this frame with `other`, reusing plane allocations.
    pub fn copy_from(&mut self, other: &StageFrame) {
        self.format = other.format;
        self.width = other.width;
        self.height = other.height;
        self.pts = other.pts;
        self.planes.resize_with(other.planes.len(), StagePlane::default);
        for (dst, src) in self.planes.iter_mut().zip(&other.planes) {
            dst.stride = src.stride;
            dst.data.clear();
            dst.data.extend_from_slice(&src.data);
        }
    }

    pub fn plane(&self, index: usize) -> Option<&StagePlane> {
        self.planes.get(index)
    }

    /// Check that every plane the format needs is present and large enough.
    pub fn has_valid_layout(&self) -> bool {
        let needed = self.format.plane_count();
        if self.planes.len() < needed {
            return false;
        }
        self.planes.iter().take(needed).enumerate().all(|(i, p)| {
            let rows = self.format.plane_rows(i, self.height);
            p.stride >= self.format.min_row_bytes(i, self.width)
                && p.stride > 0
                && p.data.len() >= p.stride * rows
        })
    }
}

/// Result of asking a sink node for output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// The output frame was written.
    Frame,
    /// The engine holds input but has produced nothing yet.
    Pending,
}

/// A pixel-filtering engine capable of building filter graphs.
///
/// One engine instance is created by the host application (performing any
/// process-wide library initialisation once) and shared by every keying
/// context.
pub trait FilterEngine: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Allocate an empty graph.
    fn allocate_graph(&self) -> Result<Box<dyn FilterGraph>>;
}

/// A filter graph under construction or ready to process frames.
///
/// Dropping the graph releases every node it owns.
pub trait FilterGraph: Send {
    /// Add the frame injection node.
    fn add_source(&mut self, config: &SourceConfig) -> Result<NodeId>;

    /// Add the keying filter node.
    fn add_key_filter(&mut self, params: &KeyParameters) -> Result<NodeId>;

    /// Add the output node, accepting only `format`.
    fn add_sink(&mut self, format: EnginePixelFormat) -> Result<NodeId>;

    /// Connect output pad 0 of `from` to input pad 0 of `to`.
    fn link(&mut self, from: NodeId, to: NodeId) -> Result<()>;

    /// Validate the topology and negotiate formats.
    fn configure(&mut self) -> Result<()>;

    /// Submit a frame to a source node.
    fn submit(&mut self, source: NodeId, frame: &StageFrame) -> Result<()>;

    /// Pull one frame from a sink node into `frame`.
    fn receive(&mut self, sink: NodeId, frame: &mut StageFrame) -> Result<Received>;
}
