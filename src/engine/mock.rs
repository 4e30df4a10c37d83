//! Mock filter engine for testing without a real pixel-filtering library.
//!
//! Uses a builder pattern to configure output behaviour and error injection,
//! and keeps a resource ledger (graphs allocated/released, live nodes) that
//! outlives the graphs it hands out, so tests can assert nothing leaks.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::engine::api::{
    EnginePixelFormat, FilterEngine, FilterGraph, NodeId, Received, SourceConfig, StageFrame,
};
use crate::keying::error::{KeyError, Result};
use crate::keying::types::KeyParameters;

/// Configurable error injection for a specific operation.
#[derive(Debug, Clone)]
struct ErrorInjection {
    operation: &'static str,
    error: KeyError,
}

#[derive(Debug, Default)]
struct MockState {
    graphs_allocated: u32,
    graphs_released: u32,
    live_nodes: u32,
    configure_calls: u32,
    frames_submitted: u64,
    /// Upcoming `receive` calls that report `Pending` before any output.
    pending_outputs: u32,
    substitution: Option<(u8, u8)>,
    last_source: Option<SourceConfig>,
    last_key: Option<KeyParameters>,
    last_sink_format: Option<EnginePixelFormat>,
    error_injections: Vec<ErrorInjection>,
}

impl MockState {
    /// Check for an injected error for the given operation. Each injection
    /// fires once.
    fn check_error(&mut self, operation: &str) -> Result<()> {
        if let Some(pos) = self
            .error_injections
            .iter()
            .position(|e| e.operation == operation)
        {
            let injection = self.error_injections.remove(pos);
            return Err(injection.error);
        }
        Ok(())
    }
}

/// Mock engine.
///
/// Cloning shares the ledger, so a test can hand one clone to a keying
/// context and inspect the other.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    /// Create a mock whose graphs pass frames through unchanged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every byte equal to `from` with `to` in every output plane.
    pub fn with_substitution(self, from: u8, to: u8) -> Self {
        self.state.lock().substitution = Some((from, to));
        self
    }

    /// Make the next `count` receive calls report `Pending`.
    pub fn with_pending_outputs(self, count: u32) -> Self {
        self.state.lock().pending_outputs = count;
        self
    }

    /// Inject an error for a specific operation name.
    ///
    /// Operation names: `"allocate_graph"`, `"add_source"`,
    /// `"add_key_filter"`, `"add_sink"`, `"link"`, `"configure"`, `"submit"`,
    /// `"receive"`.
    pub fn with_error(self, operation: &'static str, error: KeyError) -> Self {
        self.inject_error(operation, error);
        self
    }

    /// Inject an error after construction, e.g. while a context owns a clone.
    pub fn inject_error(&self, operation: &'static str, error: KeyError) {
        self.state
            .lock()
            .error_injections
            .push(ErrorInjection { operation, error });
    }

    pub fn graphs_allocated(&self) -> u32 {
        self.state.lock().graphs_allocated
    }

    pub fn graphs_released(&self) -> u32 {
        self.state.lock().graphs_released
    }

    /// Graphs allocated and not yet dropped.
    pub fn live_graphs(&self) -> u32 {
        let state = self.state.lock();
        state.graphs_allocated - state.graphs_released
    }

    /// Nodes owned by graphs that are still alive.
    pub fn live_nodes(&self) -> u32 {
        self.state.lock().live_nodes
    }

    pub fn configure_calls(&self) -> u32 {
        self.state.lock().configure_calls
    }

    pub fn frames_submitted(&self) -> u64 {
        self.state.lock().frames_submitted
    }

    pub fn last_source(&self) -> Option<SourceConfig> {
        self.state.lock().last_source
    }

    pub fn last_key(&self) -> Option<KeyParameters> {
        self.state.lock().last_key
    }

    pub fn last_sink_format(&self) -> Option<EnginePixelFormat> {
        self.state.lock().last_sink_format
    }
}

impl FilterEngine for MockEngine {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn allocate_graph(&self) -> Result<Box<dyn FilterGraph>> {
        let mut state = self.state.lock();
        state.check_error("allocate_graph")?;
        state.graphs_allocated += 1;
        Ok(Box::new(MockGraph {
            state: Arc::clone(&self.state),
            nodes: 0,
            configured: false,
            queue: VecDeque::new(),
        }))
    }
}

struct MockGraph {
    state: Arc<Mutex<MockState>>,
    nodes: u32,
    configured: bool,
    queue: VecDeque<StageFrame>,
}

impl MockGraph {
    fn add_node(&mut self, state: &mut MockState) -> NodeId {
        self.nodes += 1;
        state.live_nodes += 1;
        NodeId(self.nodes as usize - 1)
    }
}

impl FilterGraph for MockGraph {
    fn add_source(&mut self, config: &SourceConfig) -> Result<NodeId> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        state.check_error("add_source")?;
        state.last_source = Some(*config);
        Ok(self.add_node(&mut state))
    }

    fn add_key_filter(&mut self, params: &KeyParameters) -> Result<NodeId> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        state.check_error("add_key_filter")?;
        state.last_key = Some(*params);
        Ok(self.add_node(&mut state))
    }

    fn add_sink(&mut self, format: EnginePixelFormat) -> Result<NodeId> {
        let state = Arc::clone(&self.state);
        let mut state = state.lock();
        state.check_error("add_sink")?;
        state.last_sink_format = Some(format);
        Ok(self.add_node(&mut state))
    }

    fn link(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.state.lock().check_error("link")?;
        if from.0 >= self.nodes as usize || to.0 >= self.nodes as usize {
            return Err(KeyError::GraphBuild(format!(
                "mock link {} -> {} names a missing node",
                from.0, to.0
            )));
        }
        Ok(())
    }

    fn configure(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.configure_calls += 1;
        state.check_error("configure")?;
        self.configured = true;
        Ok(())
    }

    fn submit(&mut self, _source: NodeId, frame: &StageFrame) -> Result<()> {
        let mut state = self.state.lock();
        state.check_error("submit")?;
        if !self.configured {
            return Err(KeyError::Submission("mock graph not configured".to_string()));
        }
        state.frames_submitted += 1;
        self.queue.push_back(frame.clone());
        Ok(())
    }

    fn receive(&mut self, _sink: NodeId, frame: &mut StageFrame) -> Result<Received> {
        let mut state = self.state.lock();
        state.check_error("receive")?;
        if state.pending_outputs > 0 {
            state.pending_outputs -= 1;
            return Ok(Received::Pending);
        }
        let Some(next) = self.queue.pop_front() else {
            return Ok(Received::Pending);
        };
        frame.copy_from(&next);
        if let Some((from, to)) = state.substitution {
            for plane in &mut frame.planes {
                plane
                    .data
                    .iter_mut()
                    .filter(|b| **b == from)
                    .for_each(|b| *b = to);
            }
        }
        Ok(Received::Frame)
    }
}

impl Drop for MockGraph {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.graphs_released += 1;
        state.live_nodes -= self.nodes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(value: u8) -> StageFrame {
        let mut frame = StageFrame::new(EnginePixelFormat::Gray8, 2, 1);
        frame.reshape(&[(2, 1)]);
        frame.planes[0].data.fill(value);
        frame
    }

    fn configured_graph(mock: &MockEngine) -> (Box<dyn FilterGraph>, NodeId, NodeId) {
        let mut graph = mock.allocate_graph().unwrap();
        let source = graph
            .add_source(&SourceConfig::new(2, 1, EnginePixelFormat::Gray8))
            .unwrap();
        let sink = graph.add_sink(EnginePixelFormat::Gray8).unwrap();
        graph.link(source, sink).unwrap();
        graph.configure().unwrap();
        (graph, source, sink)
    }

    #[test]
    fn dropping_a_graph_releases_its_nodes() {
        let mock = MockEngine::new();
        let (graph, _, _) = configured_graph(&mock);
        assert_eq!(mock.live_graphs(), 1);
        assert_eq!(mock.live_nodes(), 2);

        drop(graph);
        assert_eq!(mock.live_graphs(), 0);
        assert_eq!(mock.live_nodes(), 0);
        assert_eq!(mock.graphs_released(), 1);
    }

    #[test]
    fn passes_frames_through_by_default() {
        let mock = MockEngine::new();
        let (mut graph, source, sink) = configured_graph(&mock);
        let input = gray_frame(7);
        graph.submit(source, &input).unwrap();

        let mut out = StageFrame::new(EnginePixelFormat::Gray8, 2, 1);
        assert_eq!(graph.receive(sink, &mut out).unwrap(), Received::Frame);
        assert_eq!(out, input);
        assert_eq!(mock.frames_submitted(), 1);
    }

    #[test]
    fn substitution_rewrites_matching_bytes() {
        let mock = MockEngine::new().with_substitution(7, 0);
        let (mut graph, source, sink) = configured_graph(&mock);
        graph.submit(source, &gray_frame(7)).unwrap();

        let mut out = StageFrame::new(EnginePixelFormat::Gray8, 2, 1);
        graph.receive(sink, &mut out).unwrap();
        assert_eq!(out.planes[0].data, vec![0, 0]);
    }

    #[test]
    fn pending_outputs_hold_frames_back() {
        let mock = MockEngine::new().with_pending_outputs(1);
        let (mut graph, source, sink) = configured_graph(&mock);
        graph.submit(source, &gray_frame(1)).unwrap();

        let mut out = StageFrame::new(EnginePixelFormat::Gray8, 2, 1);
        assert_eq!(graph.receive(sink, &mut out).unwrap(), Received::Pending);
        assert_eq!(graph.receive(sink, &mut out).unwrap(), Received::Frame);
    }

    #[test]
    fn injected_errors_fire_once() {
        let mock = MockEngine::new().with_error(
            "allocate_graph",
            KeyError::Allocation("injected".to_string()),
        );
        assert!(mock.allocate_graph().is_err());
        assert!(mock.allocate_graph().is_ok());
    }

    #[test]
    fn clones_share_the_ledger() {
        let mock = MockEngine::new();
        let other = mock.clone();
        let _graph = other.allocate_graph().unwrap();
        assert_eq!(mock.graphs_allocated(), 1);
    }
}
