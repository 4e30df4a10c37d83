//! libavfilter-backed engine, built with the `ffmpeg` feature.
//!
//! Graphs are `buffer -> chromakey|colorkey -> buffersink`. Stage frames are
//! copied row by row into libav frames because libav picks its own strides.

use ffmpeg_next as ff;
use ff::format::Pixel;
use ff::{filter, frame};
use tracing::info;

use crate::engine::api::{
    EnginePixelFormat, FilterEngine, FilterGraph, NodeId, Received, SourceConfig, StageFrame,
};
use crate::keying::error::{KeyError, Result};
use crate::keying::types::KeyParameters;

/// libavfilter engine.
///
/// Construct it once per process with [`FfmpegEngine::initialise`] before
/// any keying context is created.
#[derive(Debug)]
pub struct FfmpegEngine {
    _initialised: (),
}

impl FfmpegEngine {
    /// Initialise libav* for the process and return the engine.
    pub fn initialise() -> Result<Self> {
        ff::init().map_err(|e| KeyError::Allocation(format!("libav initialisation failed: {e}")))?;
        info!("libavfilter engine initialised");
        Ok(Self { _initialised: () })
    }
}

impl FilterEngine for FfmpegEngine {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn allocate_graph(&self) -> Result<Box<dyn FilterGraph>> {
        Ok(Box::new(FfmpegGraph {
            graph: filter::Graph::new(),
            names: Vec::new(),
            source: None,
            layout: Vec::new(),
        }))
    }
}

fn pixel(format: EnginePixelFormat) -> Pixel {
    match format {
        EnginePixelFormat::Yuv420p => Pixel::YUV420P,
        EnginePixelFormat::Nv12 => Pixel::NV12,
        EnginePixelFormat::Yuyv422 => Pixel::YUYV422,
        EnginePixelFormat::Yvyu422 => Pixel::YVYU422,
        EnginePixelFormat::Uyvy422 => Pixel::UYVY422,
        EnginePixelFormat::Yuv444p => Pixel::YUV444P,
        EnginePixelFormat::Rgba => Pixel::RGBA,
        EnginePixelFormat::Bgra => Pixel::BGRA,
        EnginePixelFormat::Gray8 => Pixel::GRAY8,
    }
}

fn engine_format(pixel: Pixel) -> Option<EnginePixelFormat> {
    Some(match pixel {
        Pixel::YUV420P => EnginePixelFormat::Yuv420p,
        Pixel::NV12 => EnginePixelFormat::Nv12,
        Pixel::YUYV422 => EnginePixelFormat::Yuyv422,
        Pixel::YVYU422 => EnginePixelFormat::Yvyu422,
        Pixel::UYVY422 => EnginePixelFormat::Uyvy422,
        Pixel::YUV444P => EnginePixelFormat::Yuv444p,
        Pixel::RGBA => EnginePixelFormat::Rgba,
        Pixel::BGRA => EnginePixelFormat::Bgra,
        Pixel::GRAY8 => EnginePixelFormat::Gray8,
        _ => return None,
    })
}

/// Copy `rows` rows of `row_bytes` between buffers with different strides.
fn copy_rows(dst: &mut [u8], dst_stride: usize, src: &[u8], src_stride: usize, rows: usize, row_bytes: usize) {
    for row in 0..rows {
        let d = row * dst_stride;
        let s = row * src_stride;
        dst[d..d + row_bytes].copy_from_slice(&src[s..s + row_bytes]);
    }
}

struct FfmpegGraph {
    graph: filter::Graph,
    /// Filter instance names, indexed by `NodeId`.
    names: Vec<String>,
    source: Option<SourceConfig>,
    /// `(stride, rows)` of the last submitted stage frame; outputs are
    /// written back in the same layout.
    layout: Vec<(usize, usize)>,
}

// SAFETY: the graph and its filter contexts are only touched through
// `&mut self`, and libavfilter graphs carry no thread affinity.
unsafe impl Send for FfmpegGraph {}

impl FfmpegGraph {
    fn add(&mut self, filter_name: &str, instance: &str, args: &str) -> Result<NodeId> {
        let filter = filter::find(filter_name).ok_or_else(|| {
            KeyError::GraphBuild(format!("libavfilter has no `{filter_name}` filter"))
        })?;
        self.graph
            .add(&filter, instance, args)
            .map_err(|e| KeyError::GraphBuild(format!("create {instance}: {e}")))?;
        self.names.push(instance.to_string());
        Ok(NodeId(self.names.len() - 1))
    }

    fn context(&mut self, id: NodeId) -> Result<filter::Context<'_>> {
        let name = self
            .names
            .get(id.0)
            .ok_or_else(|| KeyError::GraphBuild(format!("no node {}", id.0)))?;
        self.graph
            .get(name)
            .ok_or_else(|| KeyError::GraphBuild(format!("node {name} vanished")))
    }

    fn context_ptr(&mut self, id: NodeId) -> Result<*mut ff::ffi::AVFilterContext> {
        let mut ctx = self.context(id)?;
        // SAFETY: the pointer is owned by `self.graph` and only used while
        // the graph is alive.
        Ok(unsafe { ctx.as_mut_ptr() })
    }
}

impl FilterGraph for FfmpegGraph {
    fn add_source(&mut self, config: &SourceConfig) -> Result<NodeId> {
        let code = ff::ffi::AVPixelFormat::from(pixel(config.format)) as i32;
        let id = self.add("buffer", "in", &config.filter_args(code))?;
        self.source = Some(*config);
        Ok(id)
    }

    fn add_key_filter(&mut self, params: &KeyParameters) -> Result<NodeId> {
        let name = params.key_type.filter_name();
        self.add(name, name, &params.filter_args())
    }

    fn add_sink(&mut self, format: EnginePixelFormat) -> Result<NodeId> {
        let id = self.add("buffersink", "out", "")?;
        self.context(id)?.set_pixel_format(pixel(format));
        Ok(id)
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        let src = self.context_ptr(from)?;
        let dst = self.context_ptr(to)?;
        // SAFETY: both contexts belong to `self.graph`.
        let code = unsafe { ff::ffi::avfilter_link(src, 0, dst, 0) };
        if code < 0 {
            return Err(KeyError::GraphBuild(format!(
                "link {} -> {}: {}",
                from.0,
                to.0,
                ff::Error::from(code)
            )));
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        self.graph
            .validate()
            .map_err(|e| KeyError::GraphBuild(format!("graph validation: {e}")))
    }

    fn submit(&mut self, source: NodeId, frame: &StageFrame) -> Result<()> {
        let config = self
            .source
            .ok_or_else(|| KeyError::Submission("graph has no source".to_string()))?;
        if frame.format != config.format || frame.width != config.width || frame.height != config.height {
            return Err(KeyError::Submission("frame does not match source".to_string()));
        }
        if !frame.has_valid_layout() {
            return Err(KeyError::Submission("frame planes do not cover its geometry".to_string()));
        }

        // libavfilter may keep references to submitted buffers, so every
        // submission gets its own frame.
        let mut input = frame::Video::new(pixel(frame.format), frame.width, frame.height);
        for (index, plane) in frame.planes.iter().enumerate().take(frame.format.plane_count()) {
            let rows = frame.format.plane_rows(index, frame.height);
            let row_bytes = frame.format.min_row_bytes(index, frame.width);
            let stride = input.stride(index);
            copy_rows(input.data_mut(index), stride, &plane.data, plane.stride, rows, row_bytes);
        }
        input.set_pts(Some(frame.pts));
        self.layout.clear();
        self.layout.extend(frame.planes.iter().enumerate().map(|(i, p)| {
            (p.stride, frame.format.plane_rows(i, frame.height))
        }));

        let mut ctx = self.context(source).map_err(|e| KeyError::Submission(e.to_string()))?;
        ctx.source()
            .add(&input)
            .map_err(|e| KeyError::Submission(format!("buffer source rejected frame: {e}")))
    }

    fn receive(&mut self, sink: NodeId, frame: &mut StageFrame) -> Result<Received> {
        let mut output = frame::Video::empty();
        {
            let mut ctx = self.context(sink).map_err(|e| KeyError::Extraction(e.to_string()))?;
            match ctx.sink().frame(&mut output) {
                Ok(()) => {}
                Err(ff::Error::Other { errno }) if errno == ff::util::error::EAGAIN => {
                    return Ok(Received::Pending)
                }
                Err(ff::Error::Eof) => return Ok(Received::Pending),
                Err(e) => return Err(KeyError::Extraction(format!("buffer sink: {e}"))),
            }
        }

        let format = engine_format(output.format()).ok_or_else(|| {
            KeyError::Extraction(format!("unexpected output format {:?}", output.format()))
        })?;
        if format != frame.format || output.width() != frame.width || output.height() != frame.height {
            return Err(KeyError::Extraction("output does not match the submitted frame".to_string()));
        }
        frame.reshape(&self.layout);
        for (index, plane) in frame.planes.iter_mut().enumerate().take(format.plane_count()) {
            let rows = format.plane_rows(index, frame.height);
            let row_bytes = format.min_row_bytes(index, frame.width);
            copy_rows(&mut plane.data, plane.stride, output.data(index), output.stride(index), rows, row_bytes);
        }
        frame.pts = output.pts().unwrap_or_default();
        Ok(Received::Frame)
    }
}
