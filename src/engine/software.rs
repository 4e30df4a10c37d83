//! In-process filter engine implementing libavfilter's `chromakey` and
//! `colorkey` math in pure Rust.
//!
//! The graph mirrors a libavfilter chain (`buffer` -> key -> `buffersink`)
//! closely enough that the keying core cannot tell the two apart: nodes are
//! added individually, linked, configured, and frames queue in the source
//! until the sink is drained.

use std::collections::VecDeque;

use tracing::trace;

use crate::engine::api::{
    EnginePixelFormat, FilterEngine, FilterGraph, NodeId, Received, SourceConfig, StageFrame,
};
use crate::keying::error::{KeyError, Result};
use crate::keying::types::{KeyParameters, KeyType};

/// Frames a source node buffers before rejecting submissions.
pub const QUEUE_DEPTH: usize = 8;

/// Limited-range black luma used as the matte for alpha-less YUV formats.
const MATTE_LUMA: u8 = 16;
const NEUTRAL_CHROMA: u8 = 128;

/// Software filter engine. Needs no process-wide initialisation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftwareEngine;

impl SoftwareEngine {
    pub fn new() -> Self {
        Self
    }
}

impl FilterEngine for SoftwareEngine {
    fn name(&self) -> &'static str {
        "software"
    }

    fn allocate_graph(&self) -> Result<Box<dyn FilterGraph>> {
        Ok(Box::new(SoftwareGraph::default()))
    }
}

#[derive(Debug, Clone, Copy)]
enum Node {
    Source(SourceConfig),
    Key(KeyParameters),
    Sink(EnginePixelFormat),
}

/// The validated `source -> key -> sink` chain.
#[derive(Debug, Clone, Copy)]
struct Chain {
    source: NodeId,
    sink: NodeId,
    config: SourceConfig,
    params: KeyParameters,
}

#[derive(Debug, Default)]
struct SoftwareGraph {
    nodes: Vec<Node>,
    links: Vec<(NodeId, NodeId)>,
    chain: Option<Chain>,
    queue: VecDeque<StageFrame>,
    /// Recycled frames, so steady-state submission does not allocate.
    spare: Vec<StageFrame>,
}

impl SoftwareGraph {
    fn add_node(&mut self, node: Node) -> Result<NodeId> {
        if self.chain.is_some() {
            return Err(KeyError::GraphBuild(
                "cannot add nodes to a configured graph".to_string(),
            ));
        }
        self.nodes.push(node);
        Ok(NodeId(self.nodes.len() - 1))
    }

    fn find_unique(&self, kind: &str, pred: impl Fn(&Node) -> bool) -> Result<NodeId> {
        let mut found = self
            .nodes
            .iter()
            .enumerate()
            .filter(|&(_, n)| pred(n))
            .map(|(i, _)| NodeId(i));
        match (found.next(), found.next()) {
            (Some(id), None) => Ok(id),
            (None, _) => Err(KeyError::GraphBuild(format!("graph has no {kind} node"))),
            (Some(_), Some(_)) => Err(KeyError::GraphBuild(format!(
                "graph has more than one {kind} node"
            ))),
        }
    }
}

impl FilterGraph for SoftwareGraph {
    fn add_source(&mut self, config: &SourceConfig) -> Result<NodeId> {
        if config.width == 0 || config.height == 0 {
            return Err(KeyError::GraphBuild(format!(
                "invalid source size {}x{}",
                config.width, config.height
            )));
        }
        self.add_node(Node::Source(*config))
    }

    fn add_key_filter(&mut self, params: &KeyParameters) -> Result<NodeId> {
        if !(params.similarity > 0.0 && params.similarity <= 1.0) {
            return Err(KeyError::GraphBuild(format!(
                "similarity {} out of range",
                params.similarity
            )));
        }
        if !(0.0..=1.0).contains(&params.blend) {
            return Err(KeyError::GraphBuild(format!(
                "blend {} out of range",
                params.blend
            )));
        }
        self.add_node(Node::Key(*params))
    }

    fn add_sink(&mut self, format: EnginePixelFormat) -> Result<NodeId> {
        self.add_node(Node::Sink(format))
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        if self.chain.is_some() {
            return Err(KeyError::GraphBuild(
                "cannot link nodes of a configured graph".to_string(),
            ));
        }
        if from.0 >= self.nodes.len() || to.0 >= self.nodes.len() || from == to {
            return Err(KeyError::GraphBuild(format!(
                "invalid link {} -> {}",
                from.0, to.0
            )));
        }
        if self.links.iter().any(|&(f, t)| f == from || t == to) {
            return Err(KeyError::GraphBuild(format!(
                "pad already linked for {} -> {}",
                from.0, to.0
            )));
        }
        self.links.push((from, to));
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let source = self.find_unique("source", |n| matches!(n, Node::Source(_)))?;
        let key = self.find_unique("key", |n| matches!(n, Node::Key(_)))?;
        let sink = self.find_unique("sink", |n| matches!(n, Node::Sink(_)))?;

        if !self.links.contains(&(source, key)) || !self.links.contains(&(key, sink)) {
            return Err(KeyError::GraphBuild(
                "graph is not linked source -> key -> sink".to_string(),
            ));
        }

        let (Node::Source(config), Node::Key(params), Node::Sink(sink_format)) =
            (self.nodes[source.0], self.nodes[key.0], self.nodes[sink.0])
        else {
            return Err(KeyError::GraphBuild("node kinds changed".to_string()));
        };

        if sink_format != config.format {
            return Err(KeyError::GraphBuild(format!(
                "sink accepts {} but source produces {}",
                sink_format.name(),
                config.format.name()
            )));
        }

        let supported = match params.key_type {
            KeyType::ChromaKey => config.format.is_yuv(),
            KeyType::ColorKey => !config.format.is_yuv(),
        };
        if !supported {
            return Err(KeyError::GraphBuild(format!(
                "{} does not support {}",
                params.key_type.filter_name(),
                config.format.name()
            )));
        }

        self.chain = Some(Chain {
            source,
            sink,
            config,
            params,
        });
        Ok(())
    }

    fn submit(&mut self, source: NodeId, frame: &StageFrame) -> Result<()> {
        let chain = self
            .chain
            .ok_or_else(|| KeyError::Submission("graph is not configured".to_string()))?;
        if source != chain.source {
            return Err(KeyError::Submission(format!(
                "node {} is not a source",
                source.0
            )));
        }
        let config = chain.config;
        if frame.format != config.format
            || frame.width != config.width
            || frame.height != config.height
        {
            return Err(KeyError::Submission(format!(
                "frame {}x{} {} does not match source {}x{} {}",
                frame.width,
                frame.height,
                frame.format.name(),
                config.width,
                config.height,
                config.format.name()
            )));
        }
        if !frame.has_valid_layout() {
            return Err(KeyError::Submission(
                "frame planes do not cover its geometry".to_string(),
            ));
        }
        if self.queue.len() >= QUEUE_DEPTH {
            return Err(KeyError::Submission("source queue is full".to_string()));
        }

        let mut queued = self
            .spare
            .pop()
            .unwrap_or_else(|| StageFrame::new(frame.format, frame.width, frame.height));
        queued.copy_from(frame);
        self.queue.push_back(queued);
        Ok(())
    }

    fn receive(&mut self, sink: NodeId, frame: &mut StageFrame) -> Result<Received> {
        let chain = self
            .chain
            .ok_or_else(|| KeyError::Extraction("graph is not configured".to_string()))?;
        if sink != chain.sink {
            return Err(KeyError::Extraction(format!("node {} is not a sink", sink.0)));
        }

        let Some(mut next) = self.queue.pop_front() else {
            return Ok(Received::Pending);
        };
        apply_key(&mut next, &chain.params);
        trace!(pts = next.pts, "software key pass complete");
        frame.copy_from(&next);
        self.spare.push(next);
        Ok(Received::Frame)
    }
}

/// Key a frame in place.
///
/// Formats with an alpha channel receive the computed alpha; alpha-less
/// formats are blended toward a black matte.
fn apply_key(frame: &mut StageFrame, params: &KeyParameters) {
    let (width, height) = (frame.width as usize, frame.height as usize);
    let key_uv = params.color.chroma();
    let chroma_alpha = |u: u8, v: u8| {
        let du = f64::from(u) - key_uv.0;
        let dv = f64::from(v) - key_uv.1;
        params.alpha_for_distance(((du * du + dv * dv) / (255.0 * 255.0 * 2.0)).sqrt())
    };
    let color_alpha = |r: u8, g: u8, b: u8| {
        let dr = f64::from(r) - f64::from(params.color.r);
        let dg = f64::from(g) - f64::from(params.color.g);
        let db = f64::from(b) - f64::from(params.color.b);
        params.alpha_for_distance(((dr * dr + dg * dg + db * db) / (255.0 * 255.0)).sqrt())
    };

    match frame.format {
        EnginePixelFormat::Yuv420p | EnginePixelFormat::Yuv444p => {
            let (sub_x, sub_y) = if frame.format == EnginePixelFormat::Yuv420p {
                (2, 2)
            } else {
                (1, 1)
            };
            let [y_plane, u_plane, v_plane, ..] = &mut frame.planes[..] else {
                return;
            };
            for cy in 0..height.div_ceil(sub_y) {
                for cx in 0..width.div_ceil(sub_x) {
                    let ui = cy * u_plane.stride + cx;
                    let vi = cy * v_plane.stride + cx;
                    let a = chroma_alpha(u_plane.data[ui], v_plane.data[vi]);
                    if a == 255 {
                        continue;
                    }
                    u_plane.data[ui] = blend(u_plane.data[ui], NEUTRAL_CHROMA, a);
                    v_plane.data[vi] = blend(v_plane.data[vi], NEUTRAL_CHROMA, a);
                    for y in (cy * sub_y)..((cy + 1) * sub_y).min(height) {
                        for x in (cx * sub_x)..((cx + 1) * sub_x).min(width) {
                            let i = y * y_plane.stride + x;
                            y_plane.data[i] = blend(y_plane.data[i], MATTE_LUMA, a);
                        }
                    }
                }
            }
        }
        EnginePixelFormat::Nv12 => {
            let [y_plane, uv_plane, ..] = &mut frame.planes[..] else {
                return;
            };
            for cy in 0..height.div_ceil(2) {
                for cx in 0..width.div_ceil(2) {
                    let i = cy * uv_plane.stride + cx * 2;
                    let a = chroma_alpha(uv_plane.data[i], uv_plane.data[i + 1]);
                    if a == 255 {
                        continue;
                    }
                    uv_plane.data[i] = blend(uv_plane.data[i], NEUTRAL_CHROMA, a);
                    uv_plane.data[i + 1] = blend(uv_plane.data[i + 1], NEUTRAL_CHROMA, a);
                    for y in (cy * 2)..(cy * 2 + 2).min(height) {
                        for x in (cx * 2)..(cx * 2 + 2).min(width) {
                            let yi = y * y_plane.stride + x;
                            y_plane.data[yi] = blend(y_plane.data[yi], MATTE_LUMA, a);
                        }
                    }
                }
            }
        }
        EnginePixelFormat::Yuyv422 | EnginePixelFormat::Yvyu422 | EnginePixelFormat::Uyvy422 => {
            // Byte offsets of (Y0, U, Y1, V) inside a 4-byte macro-pixel.
            let (y0, u, y1, v) = match frame.format {
                EnginePixelFormat::Yuyv422 => (0, 1, 2, 3),
                EnginePixelFormat::Yvyu422 => (0, 3, 2, 1),
                _ => (1, 0, 3, 2),
            };
            let Some(plane) = frame.planes.first_mut() else {
                return;
            };
            for row in 0..height {
                for m in 0..width.div_ceil(2) {
                    let base = row * plane.stride + m * 4;
                    let px = &mut plane.data[base..base + 4];
                    let a = chroma_alpha(px[u], px[v]);
                    if a == 255 {
                        continue;
                    }
                    px[y0] = blend(px[y0], MATTE_LUMA, a);
                    px[y1] = blend(px[y1], MATTE_LUMA, a);
                    px[u] = blend(px[u], NEUTRAL_CHROMA, a);
                    px[v] = blend(px[v], NEUTRAL_CHROMA, a);
                }
            }
        }
        EnginePixelFormat::Rgba | EnginePixelFormat::Bgra => {
            let (r, b) = if frame.format == EnginePixelFormat::Rgba {
                (0, 2)
            } else {
                (2, 0)
            };
            let Some(plane) = frame.planes.first_mut() else {
                return;
            };
            for row in 0..height {
                let start = row * plane.stride;
                for px in plane.data[start..start + width * 4].chunks_exact_mut(4) {
                    px[3] = color_alpha(px[r], px[1], px[b]);
                }
            }
        }
        EnginePixelFormat::Gray8 => {
            let Some(plane) = frame.planes.first_mut() else {
                return;
            };
            for row in 0..height {
                let start = row * plane.stride;
                for px in &mut plane.data[start..start + width] {
                    let a = color_alpha(*px, *px, *px);
                    *px = blend(*px, 0, a);
                }
            }
        }
    }
}

/// Mix `value` toward `matte`, keeping `alpha / 255` of `value`.
fn blend(value: u8, matte: u8, alpha: u8) -> u8 {
    let a = u32::from(alpha);
    ((u32::from(value) * a + u32::from(matte) * (255 - a) + 127) / 255) as u8
}
