//! Processing graph lifecycle.
//!
//! A keying context owns at most one [`ProcessingGraph`], built for the exact
//! geometry and pixel format of the frames it processes. [`GraphManager`] is
//! the state machine around it:
//!
//! ```text
//! Empty --first frame--> Building --ok--> Valid
//!                           |
//!                           +--error--> Empty
//! Valid --descriptor mismatch--> (teardown) --> Building
//! ```
//!
//! Frames are only pushed through a graph in the `Valid` state. A failed
//! build leaves the manager empty, so the next frame simply tries again.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::diagnostics::stats::KeyStats;
use crate::engine::api::{
    EnginePixelFormat, FilterEngine, FilterGraph, NodeId, Received, SourceConfig, StageFrame,
};
use crate::keying::bridge::to_engine_format;
use crate::keying::error::{KeyError, Result};
use crate::keying::types::{FrameDescriptor, KeyParameters};

/// Observable state of a [`GraphManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphState {
    /// No graph; the next frame triggers a build.
    Empty,
    /// A graph matching the last frame's descriptor is ready.
    Valid,
}

/// A configured `source -> key -> sink` graph plus its stage buffers.
pub struct ProcessingGraph {
    graph: Box<dyn FilterGraph>,
    source: NodeId,
    sink: NodeId,
    engine_format: EnginePixelFormat,
    descriptor: FrameDescriptor,
    input_stage: StageFrame,
    output_stage: StageFrame,
    next_pts: i64,
}

impl ProcessingGraph {
    /// Descriptor of the frames this graph was built for.
    pub fn descriptor(&self) -> FrameDescriptor {
        self.descriptor
    }

    /// Engine pixel format of the source and sink nodes.
    pub fn engine_format(&self) -> EnginePixelFormat {
        self.engine_format
    }

    /// Whether frames described by `descriptor` may go through this graph.
    pub fn matches(&self, descriptor: &FrameDescriptor) -> bool {
        self.descriptor == *descriptor
    }

    /// Pts of the most recently submitted frame, 0 before the first one.
    pub fn last_pts(&self) -> i64 {
        self.next_pts - 1
    }

    pub fn output_stage(&self) -> &StageFrame {
        &self.output_stage
    }

    pub(crate) fn input_stage_mut(&mut self) -> &mut StageFrame {
        &mut self.input_stage
    }

    /// Stamp the input stage with the next pts and hand it to the source node.
    pub(crate) fn submit_input(&mut self) -> Result<()> {
        self.input_stage.pts = self.next_pts;
        self.graph.submit(self.source, &self.input_stage)?;
        self.next_pts += 1;
        Ok(())
    }

    /// Pull one frame from the sink node into the output stage.
    pub(crate) fn receive_output(&mut self) -> Result<Received> {
        self.graph.receive(self.sink, &mut self.output_stage)
    }
}

impl std::fmt::Debug for ProcessingGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingGraph")
            .field("descriptor", &self.descriptor)
            .field("engine_format", &self.engine_format)
            .field("next_pts", &self.next_pts)
            .finish_non_exhaustive()
    }
}

/// Log a failed build step and pass the error on.
fn step_failed(step: &str, descriptor: &FrameDescriptor, e: KeyError) -> KeyError {
    error!("{step} failed for {descriptor}: {e}");
    e
}

/// Build a graph for frames described by `descriptor`.
///
/// Any failure drops the partially built engine graph, which releases every
/// node created so far.
pub fn build_graph(engine: &dyn FilterEngine, descriptor: FrameDescriptor) -> Result<ProcessingGraph> {
    let engine_format = to_engine_format(descriptor.format)
        .ok_or_else(|| KeyError::UnsupportedFormat(descriptor.format.to_string()))?;
    let params = KeyParameters::for_format(descriptor.format);

    let mut graph = engine
        .allocate_graph()
        .map_err(|e| step_failed("graph allocation", &descriptor, e))?;

    let config = SourceConfig::new(descriptor.width, descriptor.height, engine_format);
    let source = graph
        .add_source(&config)
        .map_err(|e| step_failed("create source node", &descriptor, e))?;
    let key = graph
        .add_key_filter(&params)
        .map_err(|e| step_failed("create key node", &descriptor, e))?;
    let sink = graph
        .add_sink(engine_format)
        .map_err(|e| step_failed("create sink node", &descriptor, e))?;

    graph
        .link(source, key)
        .map_err(|e| step_failed("link source to key", &descriptor, e))?;
    graph
        .link(key, sink)
        .map_err(|e| step_failed("link key to sink", &descriptor, e))?;
    graph
        .configure()
        .map_err(|e| step_failed("graph configuration", &descriptor, e))?;

    debug!(
        "built {} graph for {descriptor} ({})",
        params.key_type.filter_name(),
        params.filter_args()
    );

    Ok(ProcessingGraph {
        graph,
        source,
        sink,
        engine_format,
        descriptor,
        input_stage: StageFrame::new(engine_format, descriptor.width, descriptor.height),
        output_stage: StageFrame::new(engine_format, descriptor.width, descriptor.height),
        next_pts: 1,
    })
}

/// Owns the processing graph of one keying context.
pub struct GraphManager {
    engine: Arc<dyn FilterEngine>,
    graph: Option<ProcessingGraph>,
}

impl GraphManager {
    pub fn new(engine: Arc<dyn FilterEngine>) -> Self {
        Self {
            engine,
            graph: None,
        }
    }

    pub fn state(&self) -> GraphState {
        if self.graph.is_some() {
            GraphState::Valid
        } else {
            GraphState::Empty
        }
    }

    pub fn graph(&self) -> Option<&ProcessingGraph> {
        self.graph.as_ref()
    }

    /// Return a graph built for exactly `descriptor`, building or rebuilding
    /// as needed.
    ///
    /// On failure the manager is left empty.
    pub fn ensure_graph(
        &mut self,
        descriptor: FrameDescriptor,
        stats: &mut KeyStats,
    ) -> Result<&mut ProcessingGraph> {
        if let Some(existing) = self.graph.as_ref().map(ProcessingGraph::descriptor) {
            if existing != descriptor {
                info!("frame changed from {existing} to {descriptor}, rebuilding keying graph");
                self.release(stats);
            }
        }

        if self.graph.is_none() {
            match build_graph(self.engine.as_ref(), descriptor) {
                Ok(graph) => {
                    stats.record_build();
                    self.graph = Some(graph);
                }
                Err(e) => {
                    stats.record_build_failure();
                    return Err(e);
                }
            }
        }

        self.graph
            .as_mut()
            .ok_or_else(|| KeyError::GraphBuild("graph missing after build".to_string()))
    }

    /// Release the graph and its stage buffers. Safe to call when empty.
    pub fn destroy(&mut self, stats: &mut KeyStats) {
        info!("releasing keying graph resources");
        self.release(stats);
    }

    fn release(&mut self, stats: &mut KeyStats) {
        if let Some(graph) = self.graph.take() {
            debug!("tearing down keying graph for {}", graph.descriptor());
            drop(graph);
            stats.record_teardown();
        }
    }
}
