//! Moves pixel bytes between caller-owned native frames and graph stages.
//!
//! Every copy is bounded by `stride * rows` of the plane being copied, where
//! `rows` comes from the format's vertical subsampling. Native frame bounds
//! are checked before anything is touched, so a malformed frame is rejected
//! without mutating it.

use keyer_frame::{NativeFrame, PixelFormat, MAX_PLANES};
use tracing::{debug, trace};

use crate::engine::api::{EnginePixelFormat, Received, StageFrame};
use crate::keying::error::{KeyError, Result};
use crate::keying::graph::ProcessingGraph;

/// Outputs older than the latest submission that `extract` will discard
/// before giving up on the current frame.
pub const MAX_STALE_DRAIN: usize = 8;

/// `(stride, rows)` for each plane of a frame.
#[derive(Debug, Clone, Copy)]
pub struct PlaneLayout {
    planes: [(usize, usize); MAX_PLANES],
    count: usize,
}

impl PlaneLayout {
    pub fn as_slice(&self) -> &[(usize, usize)] {
        &self.planes[..self.count]
    }

    /// Bytes covered by plane `index`.
    pub fn span(&self, index: usize) -> usize {
        self.as_slice()
            .get(index)
            .map_or(0, |&(stride, rows)| stride * rows)
    }
}

/// Result of pulling output from the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extracted {
    /// The output stage holds the keyed version of the latest submission.
    Output,
    /// The engine has nothing for the latest submission yet.
    NoOutput,
}

/// Result of writing a keyed frame back into the caller's buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteBack {
    /// Keyed bytes replaced the frame's contents.
    Copied { bytes: usize },
    /// The first plane already matched; nothing was written.
    Unchanged,
}

/// Whether frames of this native format can be keyed.
pub fn is_supported_format(format: PixelFormat) -> bool {
    to_engine_format(format).is_some()
}

/// Engine pixel format used to key frames of a native format.
///
/// BGRX is processed as BGRA: the padding byte becomes the alpha channel.
pub fn to_engine_format(format: PixelFormat) -> Option<EnginePixelFormat> {
    match format {
        PixelFormat::I420 => Some(EnginePixelFormat::Yuv420p),
        PixelFormat::Nv12 => Some(EnginePixelFormat::Nv12),
        PixelFormat::Yvyu => Some(EnginePixelFormat::Yvyu422),
        PixelFormat::Yuy2 => Some(EnginePixelFormat::Yuyv422),
        PixelFormat::Uyvy => Some(EnginePixelFormat::Uyvy422),
        PixelFormat::Rgba => Some(EnginePixelFormat::Rgba),
        PixelFormat::Bgra | PixelFormat::Bgrx => Some(EnginePixelFormat::Bgra),
        PixelFormat::Y800 => Some(EnginePixelFormat::Gray8),
        PixelFormat::I444 => Some(EnginePixelFormat::Yuv444p),
        PixelFormat::None | PixelFormat::Unknown(_) => None,
    }
}

/// Native format a frame carries after keyed bytes are written into it.
pub fn to_native_format(format: EnginePixelFormat) -> PixelFormat {
    match format {
        EnginePixelFormat::Yuv420p => PixelFormat::I420,
        EnginePixelFormat::Nv12 => PixelFormat::Nv12,
        EnginePixelFormat::Yvyu422 => PixelFormat::Yvyu,
        EnginePixelFormat::Yuyv422 => PixelFormat::Yuy2,
        EnginePixelFormat::Uyvy422 => PixelFormat::Uyvy,
        EnginePixelFormat::Rgba => PixelFormat::Rgba,
        EnginePixelFormat::Bgra => PixelFormat::Bgra,
        EnginePixelFormat::Gray8 => PixelFormat::Y800,
        EnginePixelFormat::Yuv444p => PixelFormat::I444,
    }
}

/// Check every plane the frame's format needs and return their layout.
///
/// A plane is valid when it is attached, its stride is non-zero and covers
/// one row of pixels, and its buffer holds `stride * rows` bytes.
pub fn plane_layout(frame: &NativeFrame<'_>) -> Result<PlaneLayout> {
    let format = frame.format;
    let needed = format.plane_count();
    if needed == 0 {
        return Err(KeyError::UnsupportedFormat(format.to_string()));
    }
    if frame.width == 0 || frame.height == 0 {
        return Err(KeyError::InvalidFrame(format!(
            "empty frame {}x{}",
            frame.width, frame.height
        )));
    }

    let mut layout = PlaneLayout {
        planes: [(0, 0); MAX_PLANES],
        count: needed,
    };
    for index in 0..needed {
        let plane = frame
            .plane(index)
            .ok_or_else(|| KeyError::InvalidFrame(format!("{format} plane {index} missing")))?;
        let stride = plane.stride();
        let min_row = format.min_row_bytes(index, frame.width);
        if stride == 0 || stride < min_row {
            return Err(KeyError::InvalidFrame(format!(
                "{format} plane {index} stride {stride} below row size {min_row}"
            )));
        }
        let rows = format.plane_rows(index, frame.height);
        let span = stride.checked_mul(rows).ok_or_else(|| {
            KeyError::InvalidFrame(format!("{format} plane {index} size overflows"))
        })?;
        if plane.len() < span {
            return Err(KeyError::InvalidFrame(format!(
                "{format} plane {index} holds {} bytes, needs {span}",
                plane.len()
            )));
        }
        layout.planes[index] = (stride, rows);
    }
    Ok(layout)
}

/// Copy a native frame into the graph's input stage and submit it.
///
/// The stage mirrors the frame's strides. The frame itself is only read.
pub fn inject(graph: &mut ProcessingGraph, frame: &NativeFrame<'_>) -> Result<()> {
    let layout = plane_layout(frame)?;
    let stage = graph.input_stage_mut();
    stage.reshape(layout.as_slice());

    for (index, plane) in stage.planes.iter_mut().enumerate() {
        let span = layout.span(index);
        let source = frame
            .plane(index)
            .ok_or_else(|| KeyError::InvalidFrame(format!("plane {index} missing")))?;
        plane.data[..span].copy_from_slice(&source.data()[..span]);
    }

    graph.submit_input()?;
    trace!(pts = graph.last_pts(), "frame submitted");
    Ok(())
}

/// Pull the keyed version of the latest submission into the output stage.
///
/// Outputs stamped with an older pts belong to earlier frames the engine
/// held back; they are dropped so a frame never receives another frame's
/// pixels.
pub fn extract(graph: &mut ProcessingGraph) -> Result<Extracted> {
    let wanted = graph.last_pts();
    for _ in 0..=MAX_STALE_DRAIN {
        match graph.receive_output()? {
            Received::Pending => return Ok(Extracted::NoOutput),
            Received::Frame if graph.output_stage().pts < wanted => {
                debug!(
                    stale = graph.output_stage().pts,
                    wanted, "discarding output of an earlier frame"
                );
            }
            Received::Frame => return Ok(Extracted::Output),
        }
    }
    Ok(Extracted::NoOutput)
}

/// Compare the visible bytes of the first plane, ignoring row padding.
fn first_plane_matches(frame: &NativeFrame<'_>, output: &StageFrame, stride: usize, rows: usize) -> bool {
    let (Some(native), Some(keyed)) = (frame.plane(0), output.plane(0)) else {
        return false;
    };
    let visible = frame.format.min_row_bytes(0, frame.width);
    (0..rows).all(|row| {
        let start = row * stride;
        native.data()[start..start + visible] == keyed.data[start..start + visible]
    })
}

/// Write the output stage back into the caller's frame.
///
/// When the first plane already holds identical bytes the frame is left
/// untouched. Otherwise every plane is overwritten with `stride * rows` bytes
/// and the frame is retagged with the output's format.
pub fn write_back(frame: &mut NativeFrame<'_>, output: &StageFrame) -> Result<WriteBack> {
    let layout = plane_layout(frame)?;
    if output.width != frame.width || output.height != frame.height {
        return Err(KeyError::InvalidFrame(format!(
            "output {}x{} does not match frame {}x{}",
            output.width, output.height, frame.width, frame.height
        )));
    }
    for (index, &(stride, rows)) in layout.as_slice().iter().enumerate() {
        let plane = output.plane(index).ok_or_else(|| {
            KeyError::InvalidFrame(format!("output plane {index} missing"))
        })?;
        if plane.stride != stride || plane.data.len() < stride * rows {
            return Err(KeyError::InvalidFrame(format!(
                "output plane {index} layout differs from frame"
            )));
        }
    }

    let (stride, rows) = layout.as_slice()[0];
    if first_plane_matches(frame, output, stride, rows) {
        return Ok(WriteBack::Unchanged);
    }

    let mut bytes = 0;
    for (index, plane) in output.planes.iter().take(layout.as_slice().len()).enumerate() {
        let span = layout.span(index);
        let target = frame
            .plane_mut(index)
            .ok_or_else(|| KeyError::InvalidFrame(format!("plane {index} missing")))?;
        target.data_mut()[..span].copy_from_slice(&plane.data[..span]);
        bytes += span;
    }
    frame.format = to_native_format(output.format);
    Ok(WriteBack::Copied { bytes })
}
