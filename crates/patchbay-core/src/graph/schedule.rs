//! Compiled, immutable execution descriptor of the routing graph.
//!
//! A [`CompiledGraph`] is built from a [`GraphPlan`] (a control-thread
//! snapshot of the topology) and never changes afterwards. Each cycle uses
//! reference counting over it: every node starts with the number of distinct
//! upstream nodes it waits for, and whoever finishes a node decrements its
//! dependents and enqueues the ones that reach zero.
//!
//! ```text
//! hw_in ──▶ track A ──┐
//!                     ├──▶ master ──▶ monitor      init triggers: hw_in, lfo
//! lfo ────▶ track B ──┘                            terminals: monitor
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::Mutex;

use crate::error::GraphCompilationError;
use crate::events::{EngineEvent, EventSender};
use crate::mixer::{SoloMember, SoloResolver};
use crate::port::{Port, PortDescriptor, PortId, PortType};
use crate::processor::RunOutcome;

use super::cell::NodeCell;
use super::connection::ConnectionParams;
use super::node::NodeId;

/// A unit of work on the shared trigger queue.
pub(crate) struct Job {
    pub(crate) graph: Arc<CompiledGraph>,
    pub(crate) node: usize,
}

impl Job {
    pub(crate) fn run(self, queue: &Sender<Job>) {
        self.graph.run_node(self.node, queue);
    }
}

/// One node as seen by the compiler.
pub(crate) struct PlanNode {
    pub(crate) id: NodeId,
    pub(crate) cell: Arc<NodeCell>,
}

/// One live connection as seen by the compiler.
pub(crate) struct PlanConnection {
    pub(crate) src_node: NodeId,
    pub(crate) src_port: PortId,
    pub(crate) src_index: usize,
    pub(crate) src_kind: PortType,
    pub(crate) dst_node: NodeId,
    pub(crate) dst_port: PortId,
    pub(crate) dst_index: usize,
    pub(crate) params: Arc<ConnectionParams>,
    pub(crate) feedback: bool,
}

/// Everything needed to compile, captured on the control thread.
pub(crate) struct GraphPlan {
    pub(crate) generation: u64,
    pub(crate) order: Arc<[NodeId]>,
    pub(crate) nodes: Vec<PlanNode>,
    pub(crate) connections: Vec<PlanConnection>,
    pub(crate) solo: Vec<SoloMember>,
    pub(crate) any_listened: Option<Arc<AtomicBool>>,
    pub(crate) sample_rate: f32,
    pub(crate) max_block: usize,
    pub(crate) midi_capacity: usize,
    pub(crate) events: EventSender,
}

#[derive(Debug, Clone, Copy)]
enum Origin {
    Node { node: usize, index: usize, port: PortId },
    Feedback(usize),
}

struct Source {
    origin: Origin,
    params: Arc<ConnectionParams>,
}

struct InputRoute {
    index: usize,
    port: PortId,
    sources: Vec<Source>,
}

struct ScheduledNode {
    id: NodeId,
    cell: Arc<NodeCell>,
    routes: Vec<InputRoute>,
    dependents: Vec<usize>,
    init_refcount: usize,
    refcount: AtomicUsize,
}

struct FeedbackTap {
    node: usize,
    index: usize,
    port: PortId,
    buffer: Mutex<Port>,
}

/// Executable form of the routing graph.
pub struct CompiledGraph {
    generation: u64,
    order: Arc<[NodeId]>,
    nodes: Vec<ScheduledNode>,
    index_of: HashMap<NodeId, usize>,
    init_triggers: Vec<usize>,
    terminal_count: usize,
    terminal_remaining: AtomicUsize,
    taps: Vec<FeedbackTap>,
    solo: SoloResolver,
    frames: AtomicUsize,
    sample_rate: f32,
    events: EventSender,
}

impl CompiledGraph {
    /// Compile `plan` for a scheduler holding at most `capacity` nodes.
    pub(crate) fn build(plan: GraphPlan, capacity: usize) -> Result<Self, GraphCompilationError> {
        if plan.order.len() > capacity {
            return Err(GraphCompilationError::CapacityExceeded {
                nodes: plan.order.len(),
                capacity,
            });
        }

        let mut cells: HashMap<NodeId, Arc<NodeCell>> =
            plan.nodes.into_iter().map(|n| (n.id, n.cell)).collect();
        let mut index_of = HashMap::with_capacity(plan.order.len());
        let mut nodes = Vec::with_capacity(plan.order.len());
        for (idx, id) in plan.order.iter().enumerate() {
            let cell = cells
                .remove(id)
                .ok_or(GraphCompilationError::MissingNode(*id))?;
            index_of.insert(*id, idx);
            nodes.push(ScheduledNode {
                id: *id,
                cell,
                routes: Vec::new(),
                dependents: Vec::new(),
                init_refcount: 0,
                refcount: AtomicUsize::new(0),
            });
        }

        let mut taps: Vec<FeedbackTap> = Vec::new();
        for conn in &plan.connections {
            let (Some(&src), Some(&dst)) = (index_of.get(&conn.src_node), index_of.get(&conn.dst_node)) else {
                continue;
            };
            let origin = if conn.feedback {
                let existing = taps.iter().position(|t| t.port == conn.src_port);
                let tap = existing.unwrap_or_else(|| {
                    taps.push(FeedbackTap {
                        node: src,
                        index: conn.src_index,
                        port: conn.src_port,
                        buffer: Mutex::new(tap_port(conn.src_kind, plan.max_block, plan.midi_capacity)),
                    });
                    taps.len() - 1
                });
                Origin::Feedback(tap)
            } else {
                if !nodes[src].dependents.contains(&dst) {
                    nodes[src].dependents.push(dst);
                    nodes[dst].init_refcount += 1;
                }
                Origin::Node {
                    node: src,
                    index: conn.src_index,
                    port: conn.src_port,
                }
            };

            let routes = &mut nodes[dst].routes;
            let route = match routes.iter().position(|r| r.port == conn.dst_port) {
                Some(i) => &mut routes[i],
                None => {
                    routes.push(InputRoute {
                        index: conn.dst_index,
                        port: conn.dst_port,
                        sources: Vec::new(),
                    });
                    let last = routes.len() - 1;
                    &mut routes[last]
                }
            };
            route.sources.push(Source {
                origin,
                params: Arc::clone(&conn.params),
            });
        }

        let init_triggers: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.init_refcount == 0)
            .map(|(i, _)| i)
            .collect();
        let terminal_count = nodes.iter().filter(|n| n.dependents.is_empty()).count();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_compile: generation {} ({} nodes, {} triggers, {} taps)",
            plan.generation,
            nodes.len(),
            init_triggers.len(),
            taps.len()
        );

        Ok(Self {
            generation: plan.generation,
            order: plan.order,
            nodes,
            index_of,
            init_triggers,
            terminal_count,
            terminal_remaining: AtomicUsize::new(0),
            taps,
            solo: SoloResolver::new(plan.solo, plan.any_listened),
            frames: AtomicUsize::new(0),
            sample_rate: plan.sample_rate,
            events: plan.events,
        })
    }

    /// Compile generation this graph was built for.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of scheduled nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Topological order the graph was compiled from.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Nodes with no upstream dependencies.
    pub fn init_trigger_count(&self) -> usize {
        self.init_triggers.len()
    }

    /// Number of delayed-feedback taps.
    pub fn feedback_tap_count(&self) -> usize {
        self.taps.len()
    }

    /// Cell scheduled for node `id`.
    pub(crate) fn cell(&self, id: NodeId) -> Option<&Arc<NodeCell>> {
        self.index_of.get(&id).map(|&idx| &self.nodes[idx].cell)
    }

    pub(crate) fn init_triggers(&self) -> &[usize] {
        &self.init_triggers
    }

    /// Reset counters and resolve solo state for a cycle of `frames` frames.
    pub(crate) fn begin_cycle(&self, frames: usize) {
        self.frames.store(frames, Ordering::Relaxed);
        for node in &self.nodes {
            node.refcount.store(node.init_refcount, Ordering::Relaxed);
        }
        self.terminal_remaining
            .store(self.terminal_count, Ordering::Release);
        self.solo.resolve();
    }

    /// True once every terminal node has finished.
    pub(crate) fn is_cycle_done(&self) -> bool {
        self.terminal_remaining.load(Ordering::Acquire) == 0
    }

    /// Capture feedback sources for the next cycle.
    pub(crate) fn end_cycle(&self) {
        let frames = self.frames.load(Ordering::Relaxed);
        for tap in &self.taps {
            let outputs = self.nodes[tap.node].cell.outputs();
            if let Some(src) = outputs.get(tap.index).filter(|p| p.id() == tap.port) {
                tap.buffer.lock().copy_from(src, frames);
            }
        }
    }

    /// Gather, process and release dependents of node `idx`.
    pub(crate) fn run_node(self: &Arc<Self>, idx: usize, queue: &Sender<Job>) {
        let node = &self.nodes[idx];
        let frames = self.frames.load(Ordering::Relaxed);
        let outcome = node
            .cell
            .process(frames, self.sample_rate, |inputs| self.gather(node, inputs, frames));
        if let RunOutcome::Faulted(fault) = outcome {
            self.events.post(EngineEvent::NodeFault {
                node: node.id,
                stage: None,
                fault,
            });
        }

        for &dep in &node.dependents {
            if self.nodes[dep].refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
                let job = Job {
                    graph: Arc::clone(self),
                    node: dep,
                };
                if let Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) = queue.try_send(job) {
                    job.run(queue);
                }
            }
        }
        if node.dependents.is_empty() {
            self.terminal_remaining.fetch_sub(1, Ordering::AcqRel);
        }
    }

    fn gather(&self, node: &ScheduledNode, inputs: &mut [Port], frames: usize) {
        for input in inputs.iter_mut() {
            input.begin_gather(frames);
        }
        for route in &node.routes {
            let Some(input) = inputs.get_mut(route.index).filter(|p| p.id() == route.port) else {
                continue;
            };
            for source in &route.sources {
                if !source.params.is_enabled() {
                    continue;
                }
                let multiplier = source.params.multiplier();
                match source.origin {
                    Origin::Node { node, index, port } => {
                        let outputs = self.nodes[node].cell.outputs();
                        if let Some(src) = outputs.get(index).filter(|p| p.id() == port) {
                            input.gather_from(src, multiplier, frames);
                        }
                    }
                    Origin::Feedback(tap) => {
                        let buffer = self.taps[tap].buffer.lock();
                        input.gather_from(&buffer, multiplier, frames);
                    }
                }
            }
        }
        for input in inputs.iter_mut() {
            input.finish_gather(frames);
        }
    }
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("generation", &self.generation)
            .field("nodes", &self.nodes.len())
            .field("init_triggers", &self.init_triggers.len())
            .field("terminals", &self.terminal_count)
            .field("taps", &self.taps.len())
            .field("solo_members", &self.solo.len())
            .finish()
    }
}

fn tap_port(kind: PortType, max_block: usize, midi_capacity: usize) -> Port {
    let desc = match kind {
        PortType::Audio => PortDescriptor::audio_out("tap", "Tap"),
        PortType::Midi => PortDescriptor::midi_out("tap", "Tap"),
        PortType::Cv => PortDescriptor::cv_out("tap", "Tap"),
        PortType::Control => {
            PortDescriptor::control_out("tap", "Tap", crate::port::ControlRange::new(f32::MIN, f32::MAX, 0.0))
        }
    };
    Port::new(PortId::detached(), desc, max_block, midi_capacity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::graph::cell::NodeKind;
    use crate::port::PortDirection;
    use crate::processor::{NodeSlot, ProcessConfig, ProcessorRegistry};

    fn cell(id: u32, kind: &str, first_port: &mut u32) -> Arc<NodeCell> {
        let registry = ProcessorRegistry::new();
        let mut slot = NodeSlot::new(registry.create(kind).unwrap());
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for desc in slot.processor().ports() {
            let port = Port::new(PortId(*first_port), desc, 8, 8);
            *first_port += 1;
            match port.direction() {
                PortDirection::Input => inputs.push(port),
                PortDirection::Output => outputs.push(port),
            }
        }
        Arc::new(NodeCell::new(NodeId(id), NodeKind::Processor(slot), inputs, outputs))
    }

    fn conn(src: &NodeCell, src_index: usize, dst: &NodeCell, dst_index: usize, feedback: bool) -> PlanConnection {
        let src_port = src.outputs()[src_index].id();
        let dst_port = dst.body().inputs[dst_index].id();
        PlanConnection {
            src_node: src.id(),
            src_port,
            src_index,
            src_kind: PortType::Audio,
            dst_node: dst.id(),
            dst_port,
            dst_index,
            params: Arc::new(ConnectionParams::new(1.0, true)),
            feedback,
        }
    }

    fn plan(cells: &[Arc<NodeCell>], connections: Vec<PlanConnection>) -> GraphPlan {
        let (events, _rx) = event_channel(4);
        GraphPlan {
            generation: 1,
            order: cells.iter().map(|c| c.id()).collect::<Vec<_>>().into(),
            nodes: cells
                .iter()
                .map(|c| PlanNode {
                    id: c.id(),
                    cell: Arc::clone(c),
                })
                .collect(),
            connections,
            solo: Vec::new(),
            any_listened: None,
            sample_rate: 48_000.0,
            max_block: 8,
            midi_capacity: 8,
            events,
        }
    }

    fn run_inline(graph: &Arc<CompiledGraph>, frames: usize) {
        let (tx, rx) = crossbeam_channel::bounded(16);
        graph.begin_cycle(frames);
        for &i in graph.init_triggers() {
            tx.send(Job {
                graph: Arc::clone(graph),
                node: i,
            })
            .unwrap();
        }
        while !graph.is_cycle_done() {
            rx.recv().unwrap().run(&tx);
        }
        graph.end_cycle();
    }

    #[test]
    fn refcounts_and_terminals() {
        let mut port = 0;
        let tone = cell(0, "tone", &mut port);
        let a = cell(1, "gain", &mut port);
        let b = cell(2, "gain", &mut port);
        let conns = vec![
            conn(&tone, 0, &a, 0, false),
            conn(&tone, 1, &a, 1, false),
            conn(&a, 0, &b, 0, false),
        ];
        let graph = CompiledGraph::build(plan(&[tone, a, b], conns), 16).unwrap();
        assert_eq!(graph.init_trigger_count(), 1);
        assert_eq!(graph.terminal_count, 1);
        assert_eq!(graph.nodes[1].init_refcount, 1);
        assert_eq!(graph.nodes[0].dependents, vec![1]);
    }

    #[test]
    fn cells_are_found_by_node_id() {
        let mut port = 0;
        let a = cell(3, "gain", &mut port);
        let b = cell(7, "gain", &mut port);
        let graph = CompiledGraph::build(plan(&[Arc::clone(&a), Arc::clone(&b)], Vec::new()), 4).unwrap();
        assert!(Arc::ptr_eq(graph.cell(NodeId(7)).unwrap(), &b));
        assert!(Arc::ptr_eq(graph.cell(NodeId(3)).unwrap(), &a));
        assert!(graph.cell(NodeId(5)).is_none());
    }

    #[test]
    fn capacity_is_enforced() {
        let mut port = 0;
        let cells = [cell(0, "gain", &mut port), cell(1, "gain", &mut port)];
        let err = CompiledGraph::build(plan(&cells, Vec::new()), 1).unwrap_err();
        assert_eq!(
            err,
            GraphCompilationError::CapacityExceeded {
                nodes: 2,
                capacity: 1
            }
        );
    }

    #[test]
    fn missing_cell_is_reported() {
        let mut port = 0;
        let cells = [cell(0, "gain", &mut port)];
        let mut p = plan(&cells, Vec::new());
        p.order = vec![NodeId(0), NodeId(9)].into();
        let err = CompiledGraph::build(p, 8).unwrap_err();
        assert_eq!(err, GraphCompilationError::MissingNode(NodeId(9)));
    }

    #[test]
    fn cycle_propagates_signal() {
        let mut port = 0;
        let tone = cell(0, "tone", &mut port);
        let gain = cell(1, "gain", &mut port);
        let conns = vec![conn(&tone, 0, &gain, 0, false)];
        let graph = Arc::new(CompiledGraph::build(plan(&[Arc::clone(&tone), Arc::clone(&gain)], conns), 8).unwrap());
        run_inline(&graph, 8);
        let tone_out = tone.outputs()[0].read()[..8].to_vec();
        assert!(tone_out.iter().any(|s| *s != 0.0));
        assert_eq!(&gain.outputs()[0].read()[..8], tone_out.as_slice());
    }

    #[test]
    fn feedback_delays_one_block() {
        let mut port = 0;
        let tone = cell(0, "tone", &mut port);
        let gain = cell(1, "gain", &mut port);
        let conns = vec![conn(&tone, 0, &gain, 0, true)];
        let graph = Arc::new(CompiledGraph::build(plan(&[Arc::clone(&tone), Arc::clone(&gain)], conns), 8).unwrap());
        assert_eq!(graph.feedback_tap_count(), 1);
        assert_eq!(graph.init_trigger_count(), 2);

        run_inline(&graph, 8);
        assert_eq!(&gain.outputs()[0].read()[..8], &[0.0; 8]);
        let first_block = tone.outputs()[0].read()[..8].to_vec();

        run_inline(&graph, 8);
        assert_eq!(&gain.outputs()[0].read()[..8], first_block.as_slice());
    }

    #[test]
    fn disabled_connection_is_skipped() {
        let mut port = 0;
        let tone = cell(0, "tone", &mut port);
        let gain = cell(1, "gain", &mut port);
        let c = conn(&tone, 0, &gain, 0, false);
        c.params.set_enabled(false);
        let graph = Arc::new(CompiledGraph::build(plan(&[Arc::clone(&tone), Arc::clone(&gain)], vec![c]), 8).unwrap());
        run_inline(&graph, 8);
        assert_eq!(&gain.outputs()[0].read()[..8], &[0.0; 8]);
    }
}
