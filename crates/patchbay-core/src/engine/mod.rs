//! The engine context: tracks, routing and the scheduler behind one API.
//!
//! An [`Engine`] owns everything: the routing graph, the runtime cells of
//! every node, the tracks, the engine-owned nodes (hardware input, Master,
//! Monitor) and the scheduler. There is no global state; two engines in one
//! process are fully independent.
//!
//! ```text
//! hw_in ──▶ tracks ──▶ buses ──▶ Master ──▶ Monitor ◀── listen bus
//!              └──── sends ────────┘
//! ```
//!
//! Every mutation validates first, then edits the graph and submits a new
//! compile. A mutation that fails, including its compile, leaves the engine
//! as it was. Routing created on the user's behalf (track outputs, sends, the
//! monitor feed) is *managed*: it cannot be removed with [`Engine::disconnect`]
//! and is left out of snapshots, which record intent instead.
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::{Engine, EngineOptions, PortAddress, StageRef, TrackKind};
//!
//! let mut engine = Engine::new(EngineOptions::offline(48_000.0, 64)).unwrap();
//! let synth = engine.add_track(TrackKind::Instrument, "Synth").unwrap();
//! engine.insert_plugin(synth, StageRef::instrument(), "sine_synth").unwrap();
//! engine.insert_plugin(synth, StageRef::insert(0), "gain").unwrap();
//! engine
//!     .set_control(&PortAddress::track(synth, "insert0.gain_db"), -6.0)
//!     .unwrap();
//!
//! let (mut l, mut r) = (vec![0.0; 64], vec![0.0; 64]);
//! engine.process_cycle(64).unwrap();
//! engine.read_output(&mut l, &mut r);
//! ```

mod command;
mod handle;
mod nodes;
mod snapshot;

pub use command::{Command, UndoStack};
pub use handle::{OUTPUT_LIMIT, ProcessHandle};
pub use snapshot::{
    ConnectionSnapshot, EngineSnapshot, ProcessorSnapshot, SendSnapshot, StageSnapshot,
    TrackSnapshot,
};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crossbeam_channel::Receiver;

use crate::channel::{ChannelSend, ChannelStrip, FaderControls, Stage, StageHandle, StripParts};
use crate::error::{EngineError, GraphCompilationError, GraphError, PortError, RoutingCycleError};
use crate::events::{EngineEvent, EventSender, event_channel};
use crate::graph::cell::{NodeCell, NodeKind};
use crate::graph::schedule::{GraphPlan, PlanConnection, PlanNode};
use crate::graph::{Connection, ConnectionId, ConnectionOptions, NodeId, PortEntry, RoutingGraph};
use crate::midi::MidiEvent;
use crate::mixer::{MixFlags, SoloMember};
use crate::options::EngineOptions;
use crate::port::{
    ControlValue, NodeAddress, Port, PortAddress, PortDescriptor, PortDirection, PortId,
};
use crate::processor::{NodeSlot, NodeState, NodeStatus, ProcessConfig, ProcessorNode, ProcessorRegistry};
use crate::scheduler::{CycleReport, Scheduler};
use crate::track::{
    NodeKey, OutputTarget, SendSlot, SendTarget, StageInfo, StageRef, Track, TrackId, TrackKind,
};

use nodes::{HardwareInput, Monitor};

/// Id of the Master track in every engine.
pub const MASTER: TrackId = TrackId(0);

const OUTPUT_PAIRS: [(&str, &str); 3] = [("out_l", "in_l"), ("out_r", "in_r"), ("midi_out", "midi_in")];

#[derive(Debug, Clone)]
struct ProcessorEntry {
    kind: String,
    node: NodeId,
    status: Arc<NodeStatus>,
    controls: Vec<(String, Arc<ControlValue>)>,
}

/// Control-side state a failed mutation is rolled back to.
struct Checkpoint {
    graph: RoutingGraph,
    cells: HashMap<NodeId, Arc<NodeCell>>,
    addresses: HashMap<NodeId, NodeAddress>,
    controls: HashMap<PortId, Arc<ControlValue>>,
    tracks: BTreeMap<TrackId, Track>,
    processors: BTreeMap<NodeKey, ProcessorEntry>,
    next_track: u32,
    next_key: u32,
}

/// The routing engine.
pub struct Engine {
    options: EngineOptions,
    config: ProcessConfig,
    registry: ProcessorRegistry,
    graph: RoutingGraph,
    cells: HashMap<NodeId, Arc<NodeCell>>,
    addresses: HashMap<NodeId, NodeAddress>,
    controls: HashMap<PortId, Arc<ControlValue>>,
    tracks: BTreeMap<TrackId, Track>,
    processors: BTreeMap<NodeKey, ProcessorEntry>,
    hw_in: NodeId,
    monitor: NodeId,
    any_listened: Arc<AtomicBool>,
    handle: ProcessHandle,
    scheduler: Arc<Scheduler>,
    events: EventSender,
    event_rx: Receiver<EngineEvent>,
    next_track: u32,
    next_key: u32,
    deferred: Option<bool>,
}

impl Engine {
    /// Create an engine with hardware input, Master and Monitor, and start its threads.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidOptions`] if `options` fail [`EngineOptions::validate`]
    /// - [`EngineError::Spawn`] if a worker or the compiler thread cannot start
    pub fn new(options: EngineOptions) -> Result<Self, EngineError> {
        Self::with_registry(options, ProcessorRegistry::new())
    }

    /// Create an engine resolving processor ids through `registry`.
    pub fn with_registry(
        options: EngineOptions,
        registry: ProcessorRegistry,
    ) -> Result<Self, EngineError> {
        options.validate()?;
        let config = options.process_config();
        let (events, event_rx) = event_channel(options.event_capacity);
        let scheduler = Arc::new(Scheduler::new(&options, events.clone())?);
        let any_listened = Arc::new(AtomicBool::new(false));

        let mut graph = RoutingGraph::new();
        let hw_cell = spawn_processor(&mut graph, &config, "hw_in", Box::new(HardwareInput))?;
        let master_parts = strip_parts(TrackKind::Master, &options);
        let master_cell = spawn_strip(&mut graph, &config, events.clone(), "Master", master_parts.clone())?;
        let monitor = Monitor::new(Arc::clone(&any_listened), options.monitor_dim_db);
        let monitor_cell = spawn_processor(&mut graph, &config, "monitor", Box::new(monitor))?;

        let handle = ProcessHandle::new(
            Arc::clone(&scheduler),
            Arc::clone(&hw_cell),
            master_cell.id(),
            Arc::clone(&monitor_cell),
            options.max_block,
        );
        let mut engine = Self {
            options,
            config,
            registry,
            graph,
            cells: HashMap::new(),
            addresses: HashMap::new(),
            controls: HashMap::new(),
            tracks: BTreeMap::new(),
            processors: BTreeMap::new(),
            hw_in: hw_cell.id(),
            monitor: monitor_cell.id(),
            any_listened,
            handle,
            scheduler,
            events,
            event_rx,
            next_track: MASTER.0 + 1,
            next_key: 0,
            deferred: None,
        };

        let master_node = master_cell.id();
        engine.register_cell(NodeAddress::HardwareInput, hw_cell);
        engine.register_cell(NodeAddress::Track(MASTER), master_cell);
        engine.register_cell(NodeAddress::Monitor, monitor_cell);
        let mut master = new_track(MASTER, "Master".to_string(), &master_parts, master_node);
        master.output = OutputTarget::None;
        engine.tracks.insert(MASTER, master);

        engine.batch(|e| {
            for (src, dst) in [("out_l", "master_l"), ("out_r", "master_r")] {
                e.connect_managed(master_node, src, e.monitor, dst)?;
            }
            e.connect_listen(master_node)?;
            e.compile()
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "engine_start: {} Hz, block {}, {} workers",
            engine.options.sample_rate,
            engine.options.max_block,
            engine.options.worker_threads
        );
        Ok(engine)
    }

    // --- accessors ---

    /// Construction options.
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Processor types available to [`insert_plugin`](Self::insert_plugin) and
    /// [`add_processor`](Self::add_processor).
    pub fn registry(&self) -> &ProcessorRegistry {
        &self.registry
    }

    /// Mutable registry, for plugin format adapters.
    pub fn registry_mut(&mut self) -> &mut ProcessorRegistry {
        &mut self.registry
    }

    /// Routing topology.
    pub fn graph(&self) -> &RoutingGraph {
        &self.graph
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Handle for the audio callback.
    pub fn handle(&self) -> ProcessHandle {
        self.handle.clone()
    }

    /// The Master track id.
    pub fn master(&self) -> TrackId {
        MASTER
    }

    /// Look up a track.
    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    /// All tracks in id order, Master first.
    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    /// Registry id of an engine-owned processor.
    pub fn processor_kind(&self, key: NodeKey) -> Option<&str> {
        self.processors.get(&key).map(|p| p.kind.as_str())
    }

    /// Engine-owned processors in key order.
    pub fn processors(&self) -> impl Iterator<Item = (NodeKey, &str)> {
        self.processors.iter().map(|(k, p)| (*k, p.kind.as_str()))
    }

    /// Stable address of a graph node.
    pub fn node_address(&self, node: NodeId) -> Option<NodeAddress> {
        self.addresses.get(&node).copied()
    }

    // --- tracks ---

    /// Add a track routed to Master (MIDI tracks start unrouted).
    ///
    /// # Errors
    ///
    /// - [`EngineError::MasterTrack`] for [`TrackKind::Master`]
    /// - [`GraphCompilationError::CapacityExceeded`] if the scheduler is full
    pub fn add_track(&mut self, kind: TrackKind, name: impl Into<String>) -> Result<TrackId, EngineError> {
        self.add_track_with_id(TrackId(self.next_track), kind, name.into())
    }

    pub(crate) fn add_track_with_id(
        &mut self,
        id: TrackId,
        kind: TrackKind,
        name: String,
    ) -> Result<TrackId, EngineError> {
        if kind == TrackKind::Master {
            return Err(EngineError::MasterTrack);
        }
        if self.tracks.contains_key(&id) {
            return Err(EngineError::TrackExists(id));
        }
        self.ensure_capacity(1)?;

        self.batch(|e| {
            let parts = strip_parts(kind, &e.options);
            let cell = spawn_strip(&mut e.graph, &e.config, e.events.clone(), &name, parts.clone())?;
            let node = cell.id();
            e.register_cell(NodeAddress::Track(id), cell);
            e.tracks.insert(id, new_track(id, name, &parts, node));
            e.next_track = e.next_track.max(id.0 + 1);

            #[cfg(feature = "tracing")]
            tracing::debug!("track_add: {id} ({kind}) as {node}");

            e.connect_listen(node)?;
            if kind.has_audio() {
                e.set_output(id, OutputTarget::Master)?;
            }
            e.compile()
        })?;
        Ok(id)
    }

    /// Remove a track. Tracks routed to it fall back to Master; sends to it are cleared.
    ///
    /// Removing an unknown track succeeds.
    pub fn remove_track(&mut self, id: TrackId) -> Result<(), EngineError> {
        if id == MASTER {
            return Err(EngineError::MasterTrack);
        }
        if !self.tracks.contains_key(&id) {
            return Ok(());
        }
        self.batch(|e| {
            let routed: Vec<TrackId> = e
                .tracks
                .values()
                .filter(|t| t.output == OutputTarget::Track(id))
                .map(|t| t.id)
                .collect();
            for t in routed {
                let master = e.track_node(MASTER)?;
                let fallback = if e.output_pairs(e.track_node(t)?, master).is_empty() {
                    OutputTarget::None
                } else {
                    OutputTarget::Master
                };
                e.set_output(t, fallback)?;
            }
            let senders: Vec<(TrackId, usize)> = e
                .tracks
                .values()
                .flat_map(|t| {
                    t.sends
                        .iter()
                        .enumerate()
                        .filter(|(_, s)| s.target.is_some_and(|target| target.track == id))
                        .map(move |(slot, _)| (t.id, slot))
                })
                .collect();
            for (t, slot) in senders {
                e.clear_send(t, slot)?;
            }
            if let Some(track) = e.tracks.remove(&id) {
                e.remove_cell(track.node);
            }
            #[cfg(feature = "tracing")]
            tracing::debug!("track_remove: {id}");
            e.compile()
        })
    }

    /// Route a track's direct output.
    ///
    /// # Errors
    ///
    /// - [`EngineError::MasterTrack`] for the Master track
    /// - [`EngineError::IncompatibleRouting`] if no output matches an input of the target
    /// - [`GraphError::Cycle`] if the target feeds this track
    pub fn set_output(&mut self, id: TrackId, target: OutputTarget) -> Result<(), EngineError> {
        self.batch(|e| {
            if id == MASTER {
                return Err(EngineError::MasterTrack);
            }
            let src = e.track_node(id)?;
            let dst = match target {
                OutputTarget::None => None,
                OutputTarget::Master => Some((e.track_node(MASTER)?, MASTER)),
                OutputTarget::Track(t) => Some((e.track_node(t)?, t)),
            };

            let mut pairs = Vec::new();
            if let Some((dst_node, dst_track)) = dst {
                pairs = e.output_pairs(src, dst_node);
                let Some(&(first_src, first_dst)) = pairs.first() else {
                    return Err(EngineError::IncompatibleRouting {
                        src: NodeAddress::Track(id),
                        dst: NodeAddress::Track(dst_track),
                    });
                };
                if e.graph.would_create_cycle(src, dst_node) {
                    return Err(RoutingCycleError {
                        src: first_src,
                        dst: first_dst,
                    }
                    .into());
                }
            }

            let stale: Vec<(PortId, PortId)> = ["out_l", "out_r", "midi_out"]
                .into_iter()
                .filter_map(|symbol| e.graph.find_port(src, PortDirection::Output, symbol))
                .flat_map(|port| e.graph.outgoing(port))
                .filter(|c| c.is_managed() && c.dst_node() != e.monitor)
                .map(|c| (c.src(), c.dst()))
                .collect();
            for (s, d) in stale {
                e.graph.remove_connection(s, d);
            }
            for (s, d) in pairs {
                e.graph
                    .add_connection_with(s, d, ConnectionOptions::default().managed())?;
            }
            if let Some(track) = e.tracks.get_mut(&id) {
                track.output = target;
            }
            e.compile()
        })
    }

    /// Set the record-armed flag.
    pub fn set_armed(&mut self, id: TrackId, armed: bool) -> Result<(), EngineError> {
        let track = self.tracks.get_mut(&id).ok_or(EngineError::TrackNotFound(id))?;
        track.armed = armed;
        Ok(())
    }

    // --- stages ---

    /// Load processor `kind` into stage `at` of a track, replacing what was there.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidStage`] if the track has no such slot
    /// - [`EngineError::UnknownProcessor`] if `kind` is not registered
    /// - [`EngineError::Instantiate`] if the processor fails to instantiate
    /// - [`EngineError::IncompatibleProcessor`] if its ports do not suit the slot
    pub fn insert_plugin(&mut self, id: TrackId, at: StageRef, kind: &str) -> Result<(), EngineError> {
        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        if !at.is_valid() || !track.kind.has_stage(at.stage) {
            return Err(EngineError::InvalidStage { track: id, stage: at });
        }
        let processor = self
            .registry
            .create(kind)
            .ok_or_else(|| EngineError::UnknownProcessor(kind.to_string()))?;
        let stage = Stage::new(at, processor, &self.config).map_err(|source| EngineError::Instantiate {
            kind: kind.to_string(),
            source,
        })?;
        if !stage.fits() {
            return Err(EngineError::IncompatibleProcessor {
                kind: kind.to_string(),
                stage: at,
            });
        }
        let info = StageInfo {
            kind: kind.to_string(),
            status: Arc::clone(stage.status()),
            controls: stage.controls(),
            handle: StageHandle::new(stage),
        };
        self.batch(|e| {
            if let Some(track) = e.tracks.get_mut(&id) {
                track.stages.insert(at, info);
            }
            e.rebuild_strip(id)?;
            #[cfg(feature = "tracing")]
            tracing::debug!("stage_insert: {id} {at} = {kind}");
            e.compile()
        })
    }

    /// Empty stage `at`. Removing from an empty slot or unknown track succeeds.
    pub fn remove_plugin(&mut self, id: TrackId, at: StageRef) -> Result<(), EngineError> {
        let Some(track) = self.tracks.get(&id) else {
            return Ok(());
        };
        if !at.is_valid() || !track.kind.has_stage(at.stage) {
            return Err(EngineError::InvalidStage { track: id, stage: at });
        }
        if !track.stages.contains_key(&at) {
            return Ok(());
        }
        self.batch(|e| {
            if let Some(track) = e.tracks.get_mut(&id) {
                track.stages.remove(&at);
            }
            e.rebuild_strip(id)?;
            #[cfg(feature = "tracing")]
            tracing::debug!("stage_remove: {id} {at}");
            e.compile()
        })
    }

    /// Replace a (typically faulted) stage with a fresh instance of the same
    /// processor, keeping its parameter values.
    pub fn reinstantiate_plugin(&mut self, id: TrackId, at: StageRef) -> Result<(), EngineError> {
        let info = self.stage_info(id, at)?;
        let kind = info.kind.clone();
        let params = info.params();
        self.insert_plugin(id, at, &kind)?;
        let info = self.stage_info(id, at)?;
        for (symbol, value) in params {
            if let Some(control) = info.control(&symbol) {
                control.set(value);
            }
        }
        Ok(())
    }

    /// Bypass or re-activate a stage.
    pub fn set_bypassed(&mut self, id: TrackId, at: StageRef, bypassed: bool) -> Result<(), EngineError> {
        self.stage_info(id, at)?.status.set_bypassed(bypassed)?;
        Ok(())
    }

    /// Lifecycle state of a stage.
    pub fn stage_state(&self, id: TrackId, at: StageRef) -> Result<NodeState, EngineError> {
        Ok(self.stage_info(id, at)?.state())
    }

    fn stage_info(&self, id: TrackId, at: StageRef) -> Result<&StageInfo, EngineError> {
        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        if !at.is_valid() || !track.kind.has_stage(at.stage) {
            return Err(EngineError::InvalidStage { track: id, stage: at });
        }
        track
            .stages
            .get(&at)
            .ok_or(EngineError::EmptyStage { track: id, stage: at })
    }

    /// Build a new strip for track `id` around its current stages and
    /// register it as the node's cell.
    ///
    /// The running cell is left alone; the next compiled graph swaps the new
    /// one in, and the old one is released with the graph that held it.
    fn rebuild_strip(&mut self, id: TrackId) -> Result<(), EngineError> {
        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        let node = track.node;
        let mut slot = NodeSlot::new(ChannelStrip::new(
            track_parts(track, &self.options),
            node,
            self.events.clone(),
        ));
        slot.instantiate(&self.config)
            .map_err(|source| EngineError::Instantiate {
                kind: "channel".to_string(),
                source,
            })?;
        for (&at, info) in &track.stages {
            slot.processor_mut()
                .place(info.handle.clone())
                .map_err(|_| EngineError::InvalidStage { track: id, stage: at })?;
        }
        self.replace_cell(node, NodeKind::Channel(slot))
    }

    // --- free-standing processors ---

    /// Create an engine-owned processor node (LFO, tone generator, plugin).
    pub fn add_processor(&mut self, kind: &str) -> Result<NodeKey, EngineError> {
        self.add_processor_with_key(NodeKey(self.next_key), kind)
    }

    pub(crate) fn add_processor_with_key(&mut self, key: NodeKey, kind: &str) -> Result<NodeKey, EngineError> {
        self.batch(|e| {
            if e.processors.contains_key(&key) {
                return Err(EngineError::ProcessorExists(key));
            }
            e.ensure_capacity(1)?;
            let processor = e
                .registry
                .create(kind)
                .ok_or_else(|| EngineError::UnknownProcessor(kind.to_string()))?;
            let cell = spawn_processor(&mut e.graph, &e.config, &key.to_string(), processor)?;
            let node = cell.id();
            let status = Arc::clone(cell.status());
            let controls = cell
                .body()
                .inputs
                .iter()
                .filter_map(|p| Some((p.symbol().to_string(), Arc::clone(p.control()?))))
                .collect();
            e.register_cell(NodeAddress::Processor(key), cell);
            e.processors.insert(
                key,
                ProcessorEntry {
                    kind: kind.to_string(),
                    node,
                    status,
                    controls,
                },
            );
            e.next_key = e.next_key.max(key.0 + 1);
            #[cfg(feature = "tracing")]
            tracing::debug!("processor_add: {key} = {kind} as {node}");
            e.compile()?;
            Ok(key)
        })
    }

    /// Remove an engine-owned processor and its connections. Unknown keys succeed.
    pub fn remove_processor(&mut self, key: NodeKey) -> Result<(), EngineError> {
        self.batch(|e| {
            let Some(entry) = e.processors.remove(&key) else {
                return Ok(());
            };
            e.remove_cell(entry.node);
            e.compile()
        })
    }

    /// Bypass or re-activate an engine-owned processor.
    pub fn set_processor_bypassed(&mut self, key: NodeKey, bypassed: bool) -> Result<(), EngineError> {
        let entry = self
            .processors
            .get(&key)
            .ok_or(EngineError::ProcessorNotFound(key))?;
        entry.status.set_bypassed(bypassed)?;
        Ok(())
    }

    /// Lifecycle state of an engine-owned processor.
    pub fn processor_state(&self, key: NodeKey) -> Result<NodeState, EngineError> {
        self.processors
            .get(&key)
            .map(|p| p.status.state())
            .ok_or(EngineError::ProcessorNotFound(key))
    }

    // --- sends ---

    /// Point send `slot` of a track at another track's main or sidechain inputs.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidSendSlot`] if `slot` is out of range for the track kind
    /// - [`EngineError::IncompatibleRouting`] if the target lacks the requested inputs
    /// - [`GraphError::InputOccupied`] if the target's sidechain is already fed
    /// - [`GraphError::Cycle`] if the target feeds this track
    pub fn set_send(&mut self, id: TrackId, slot: usize, target: SendTarget) -> Result<(), EngineError> {
        self.batch(|e| {
            let (src_l, src_r) = e.send_ports(id, slot)?;
            let dst_node = e.track_node(target.track)?;
            let (dst_l, dst_r) = if target.sidechain { ("sc_l", "sc_r") } else { ("in_l", "in_r") };
            let (Some(dst_l), Some(dst_r)) = (
                e.graph.find_port(dst_node, PortDirection::Input, dst_l),
                e.graph.find_port(dst_node, PortDirection::Input, dst_r),
            ) else {
                return Err(EngineError::IncompatibleRouting {
                    src: NodeAddress::Track(id),
                    dst: NodeAddress::Track(target.track),
                });
            };
            let src_node = e.track_node(id)?;
            if e.graph.would_create_cycle(src_node, dst_node) {
                return Err(RoutingCycleError { src: src_l, dst: dst_l }.into());
            }
            for dst in [dst_l, dst_r] {
                let occupied = e
                    .graph
                    .incoming(dst)
                    .any(|c| c.src() != src_l && c.src() != src_r);
                if target.sidechain && occupied {
                    return Err(GraphError::InputOccupied(dst).into());
                }
            }

            e.unlink_send(src_l, src_r);
            for (s, d) in [(src_l, dst_l), (src_r, dst_r)] {
                e.graph
                    .add_connection_with(s, d, ConnectionOptions::default().managed())?;
            }
            if let Some(send) = e.tracks.get_mut(&id).and_then(|t| t.sends.get_mut(slot)) {
                send.set_target(Some(target));
            }
            e.compile()
        })
    }

    /// Unassign send `slot`. Clearing an empty send succeeds.
    pub fn clear_send(&mut self, id: TrackId, slot: usize) -> Result<(), EngineError> {
        self.batch(|e| {
            let (src_l, src_r) = e.send_ports(id, slot)?;
            let had_target = e.unlink_send(src_l, src_r);
            if let Some(send) = e.tracks.get_mut(&id).and_then(|t| t.sends.get_mut(slot)) {
                send.set_target(None);
            }
            if had_target {
                e.compile()?;
            }
            Ok(())
        })
    }

    /// Set a send's amount (0..2). Returns the stored value.
    pub fn set_send_amount(&mut self, id: TrackId, slot: usize, amount: f32) -> Result<f32, EngineError> {
        self.send_ports(id, slot)?;
        self.set_control(&PortAddress::track(id, format!("send{slot}.amount")), amount)
    }

    fn send_ports(&self, id: TrackId, slot: usize) -> Result<(PortId, PortId), EngineError> {
        let track = self.tracks.get(&id).ok_or(EngineError::TrackNotFound(id))?;
        let max = track.kind.send_slots();
        if slot >= max {
            return Err(EngineError::InvalidSendSlot { slot, max });
        }
        let find = |side: &str| {
            self.graph
                .find_port(track.node, PortDirection::Output, &format!("send{slot}.out_{side}"))
                .ok_or(EngineError::InvalidSendSlot { slot, max })
        };
        Ok((find("l")?, find("r")?))
    }

    fn unlink_send(&mut self, src_l: PortId, src_r: PortId) -> bool {
        let stale: Vec<(PortId, PortId)> = [src_l, src_r]
            .into_iter()
            .flat_map(|p| self.graph.outgoing(p))
            .map(|c| (c.src(), c.dst()))
            .collect();
        for (s, d) in &stale {
            self.graph.remove_connection(*s, *d);
        }
        !stale.is_empty()
    }

    // --- connections ---

    /// Connect two ports by address.
    ///
    /// Connecting an already connected pair updates its multiplier and
    /// re-enables it.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnresolvedPort`] if an address does not resolve
    /// - [`GraphError::TypeMismatch`], [`GraphError::Cycle`], [`GraphError::InputOccupied`]
    /// - [`EngineError::ManagedConnection`] if the pair is engine routing
    pub fn connect(&mut self, src: &PortAddress, dst: &PortAddress, multiplier: f32) -> Result<ConnectionId, EngineError> {
        self.connect_with(src, dst, ConnectionOptions::new(multiplier))
    }

    /// Connect as a delayed-feedback edge, which may close a loop.
    pub fn connect_feedback(&mut self, src: &PortAddress, dst: &PortAddress, multiplier: f32) -> Result<ConnectionId, EngineError> {
        self.connect_with(src, dst, ConnectionOptions::new(multiplier).feedback())
    }

    fn connect_with(&mut self, src: &PortAddress, dst: &PortAddress, options: ConnectionOptions) -> Result<ConnectionId, EngineError> {
        self.batch(|e| {
            let s = e.resolve(src, Some(PortDirection::Output))?;
            let d = e.resolve(dst, Some(PortDirection::Input))?;
            e.ensure_unmanaged(s, d)?;
            let revision = e.graph.revision();
            let id = e.graph.add_connection_with(s, d, options)?;
            if e.graph.revision() != revision {
                e.compile()?;
            }
            Ok(id)
        })
    }

    /// Remove the connection between two ports. Missing connections succeed.
    pub fn disconnect(&mut self, src: &PortAddress, dst: &PortAddress) -> Result<(), EngineError> {
        self.batch(|e| {
            let s = e.resolve(src, Some(PortDirection::Output))?;
            let d = e.resolve(dst, Some(PortDirection::Input))?;
            e.ensure_unmanaged(s, d)?;
            if e.graph.remove_connection(s, d).is_some() {
                e.compile()?;
            }
            Ok(())
        })
    }

    /// Enable or disable a connection without recompiling.
    pub fn set_connection_enabled(&mut self, src: &PortAddress, dst: &PortAddress, enabled: bool) -> Result<(), EngineError> {
        self.connection(src, dst)?.params().set_enabled(enabled);
        Ok(())
    }

    /// Change a connection's multiplier without recompiling.
    pub fn set_connection_multiplier(&mut self, src: &PortAddress, dst: &PortAddress, multiplier: f32) -> Result<(), EngineError> {
        self.connection(src, dst)?.params().set_multiplier(multiplier);
        Ok(())
    }

    /// The connection between two ports.
    pub fn connection(&self, src: &PortAddress, dst: &PortAddress) -> Result<&Connection, EngineError> {
        let s = self.resolve(src, Some(PortDirection::Output))?;
        let d = self.resolve(dst, Some(PortDirection::Input))?;
        self.graph
            .find_connection(s, d)
            .and_then(|id| self.graph.connection(id))
            .ok_or(EngineError::ConnectionNotFound { src: s, dst: d })
    }

    fn ensure_unmanaged(&self, src: PortId, dst: PortId) -> Result<(), EngineError> {
        let managed = self
            .graph
            .find_connection(src, dst)
            .and_then(|id| self.graph.connection(id))
            .is_some_and(Connection::is_managed);
        if managed {
            return Err(EngineError::ManagedConnection { src, dst });
        }
        Ok(())
    }

    // --- controls ---

    /// Set a control port's base value. Returns the stored (clamped) value.
    pub fn set_control(&mut self, port: &PortAddress, value: f32) -> Result<f32, EngineError> {
        let id = self.resolve(port, None)?;
        let control = self
            .controls
            .get(&id)
            .ok_or(PortError::NotAControl(id))?;
        let stored = control.set(value);
        self.events
            .post(EngineEvent::ControlChanged { port: id, value: stored });
        Ok(stored)
    }

    /// Base value of a control port, as last set.
    pub fn control_value(&self, port: &PortAddress) -> Result<f32, EngineError> {
        Ok(self.control(port)?.base())
    }

    /// Effective value of a control port after last cycle's modulation.
    pub fn control_effective(&self, port: &PortAddress) -> Result<f32, EngineError> {
        Ok(self.control(port)?.get())
    }

    fn control(&self, port: &PortAddress) -> Result<&Arc<ControlValue>, EngineError> {
        let id = self.resolve(port, None)?;
        Ok(self
            .controls
            .get(&id)
            .ok_or(PortError::NotAControl(id))?)
    }

    /// Set a track's volume (0..2).
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<f32, EngineError> {
        self.set_fader(id, "amp", volume)
    }

    /// Set a track's balance (-1..1).
    pub fn set_balance(&mut self, id: TrackId, balance: f32) -> Result<f32, EngineError> {
        self.set_fader(id, "balance", balance)
    }

    /// Mute or unmute a track.
    pub fn set_mute(&mut self, id: TrackId, muted: bool) -> Result<(), EngineError> {
        self.set_fader(id, "mute", toggle(muted)).map(drop)
    }

    /// Solo or unsolo a track.
    pub fn set_solo(&mut self, id: TrackId, soloed: bool) -> Result<(), EngineError> {
        self.set_fader(id, "solo", toggle(soloed)).map(drop)
    }

    /// Listen to a track on the monitor bus.
    pub fn set_listen(&mut self, id: TrackId, listened: bool) -> Result<(), EngineError> {
        self.set_fader(id, "listen", toggle(listened)).map(drop)
    }

    fn set_fader(&mut self, id: TrackId, symbol: &str, value: f32) -> Result<f32, EngineError> {
        if !self.tracks.contains_key(&id) {
            return Err(EngineError::TrackNotFound(id));
        }
        self.set_control(&PortAddress::track(id, symbol), value)
    }

    // --- ports ---

    /// Resolve an address to a port id (inputs are searched first).
    pub fn port(&self, address: &PortAddress) -> Result<PortId, EngineError> {
        self.resolve(address, None)
    }

    /// Topology record of the port at `address`.
    pub fn port_entry(&self, address: &PortAddress) -> Result<&PortEntry, EngineError> {
        let id = self.resolve(address, None)?;
        self.graph
            .port(id)
            .ok_or_else(|| EngineError::UnresolvedPort(address.clone()))
    }

    /// Stable address of a port id.
    pub fn address_of(&self, port: PortId) -> Option<PortAddress> {
        let entry = self.graph.port(port)?;
        let node = self.addresses.get(&entry.node())?;
        Some(PortAddress::new(*node, entry.symbol()))
    }

    fn resolve(&self, address: &PortAddress, direction: Option<PortDirection>) -> Result<PortId, EngineError> {
        let node = match address.node {
            NodeAddress::Track(id) => self.tracks.get(&id).map(|t| t.node),
            NodeAddress::Processor(key) => self.processors.get(&key).map(|p| p.node),
            NodeAddress::HardwareInput => Some(self.hw_in),
            NodeAddress::Monitor => Some(self.monitor),
        };
        let directions = match direction {
            Some(d) => vec![d],
            None => vec![PortDirection::Input, PortDirection::Output],
        };
        node.and_then(|node| {
            directions
                .into_iter()
                .find_map(|d| self.graph.find_port(node, d, &address.port))
        })
        .ok_or_else(|| EngineError::UnresolvedPort(address.clone()))
    }

    // --- scheduling ---

    /// Block until the latest topology change is installed.
    pub fn flush(&self) {
        self.scheduler.flush();
    }

    /// Take every pending event.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        let events: Vec<EngineEvent> = self.event_rx.try_iter().collect();
        #[cfg(feature = "tracing")]
        for event in &events {
            if let EngineEvent::NodeFault { node, stage, fault } = event {
                match stage {
                    Some(stage) => tracing::error!("node_fault: {node} {stage}: {fault}"),
                    None => tracing::error!("node_fault: {node}: {fault}"),
                }
            }
        }
        events
    }

    /// Events lost because the queue was full.
    pub fn dropped_events(&self) -> u64 {
        self.events.dropped()
    }

    /// Run one processing cycle. See [`ProcessHandle::process_cycle`].
    pub fn process_cycle(&self, frames: usize) -> Result<CycleReport, EngineError> {
        self.handle.process_cycle(frames)
    }

    /// See [`ProcessHandle::write_input`].
    pub fn write_input(&self, channel: usize, block: &[f32]) -> Result<(), EngineError> {
        self.handle.write_input(channel, block)
    }

    /// See [`ProcessHandle::write_midi`].
    pub fn write_midi(&self, events: &[MidiEvent]) -> usize {
        self.handle.write_midi(events)
    }

    /// See [`ProcessHandle::read_output`].
    pub fn read_output(&self, left: &mut [f32], right: &mut [f32]) {
        self.handle.read_output(left, right);
    }

    /// See [`ProcessHandle::read_monitor`].
    pub fn read_monitor(&self, left: &mut [f32], right: &mut [f32]) {
        self.handle.read_monitor(left, right);
    }

    /// See [`ProcessHandle::process_block`].
    pub fn process_block(
        &self,
        in_l: &[f32],
        in_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) -> Result<CycleReport, EngineError> {
        self.handle.process_block(in_l, in_r, out_l, out_r)
    }

    // --- internals ---

    fn track_node(&self, id: TrackId) -> Result<NodeId, EngineError> {
        self.tracks
            .get(&id)
            .map(|t| t.node)
            .ok_or(EngineError::TrackNotFound(id))
    }

    fn ensure_capacity(&self, extra: usize) -> Result<(), EngineError> {
        let nodes = self.graph.node_count() + extra;
        if nodes > self.options.max_nodes {
            return Err(GraphCompilationError::CapacityExceeded {
                nodes,
                capacity: self.options.max_nodes,
            }
            .into());
        }
        Ok(())
    }

    fn output_pairs(&self, src: NodeId, dst: NodeId) -> Vec<(PortId, PortId)> {
        OUTPUT_PAIRS
            .iter()
            .filter_map(|(out, inp)| {
                Some((
                    self.graph.find_port(src, PortDirection::Output, out)?,
                    self.graph.find_port(dst, PortDirection::Input, inp)?,
                ))
            })
            .collect()
    }

    fn connect_managed(&mut self, src: NodeId, src_symbol: &str, dst: NodeId, dst_symbol: &str) -> Result<(), EngineError> {
        let s = self
            .graph
            .find_port(src, PortDirection::Output, src_symbol)
            .ok_or(GraphError::NodeNotFound(src))?;
        let d = self
            .graph
            .find_port(dst, PortDirection::Input, dst_symbol)
            .ok_or(GraphError::NodeNotFound(dst))?;
        self.graph
            .add_connection_with(s, d, ConnectionOptions::default().managed())?;
        Ok(())
    }

    fn connect_listen(&mut self, node: NodeId) -> Result<(), EngineError> {
        if self.graph.find_port(node, PortDirection::Output, "listen_l").is_none() {
            return Ok(());
        }
        for side in ["listen_l", "listen_r"] {
            self.connect_managed(node, side, self.monitor, side)?;
        }
        Ok(())
    }

    fn register_cell(&mut self, address: NodeAddress, cell: Arc<NodeCell>) {
        let node = cell.id();
        self.cells.insert(node, cell);
        self.addresses.insert(node, address);
        self.learn_controls(node);
    }

    fn remove_cell(&mut self, node: NodeId) {
        self.forget_controls(node);
        self.graph.remove_node(node);
        self.cells.remove(&node);
        self.addresses.remove(&node);
    }

    fn learn_controls(&mut self, node: NodeId) {
        let Some(cell) = self.cells.get(&node) else {
            return;
        };
        let body = cell.body();
        let outputs = cell.outputs();
        for port in body.inputs.iter().chain(outputs.iter()) {
            if let Some(value) = port.control() {
                self.controls.insert(port.id(), Arc::clone(value));
            }
        }
    }

    fn forget_controls(&mut self, node: NodeId) {
        if let Some(entry) = self.graph.node(node) {
            for port in entry.inputs().iter().chain(entry.outputs()) {
                self.controls.remove(port);
            }
        }
    }

    /// Give `node` a fresh cell around `kind`, re-deriving its ports.
    ///
    /// Ports that survive keep their ids and connections.
    fn replace_cell(&mut self, node: NodeId, kind: NodeKind) -> Result<(), EngineError> {
        let descriptors = kind.ports();
        self.forget_controls(node);
        let dropped = self.graph.set_node_ports(node, &descriptors)?;
        let (inputs, outputs) = build_ports(&self.graph, node, descriptors, &self.config);
        self.cells
            .insert(node, Arc::new(NodeCell::new(node, kind, inputs, outputs)));
        self.learn_controls(node);
        #[cfg(feature = "tracing")]
        if !dropped.is_empty() {
            tracing::debug!("graph_relayout: {node} dropped {} connection(s)", dropped.len());
        }
        drop(dropped);
        Ok(())
    }

    /// Run `f` with compilation deferred to a single compile at the end.
    ///
    /// The outermost batch is all or nothing: if `f` or the final compile
    /// fails, the control-side state is put back the way it was.
    fn batch<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, EngineError>) -> Result<T, EngineError> {
        if self.deferred.is_some() {
            return f(self);
        }
        let checkpoint = self.checkpoint();
        self.deferred = Some(false);
        let result = f(self);
        let dirty = self.deferred.take() == Some(true);
        let result = match result {
            Ok(value) if dirty => self.compile().map(|()| value),
            other => other,
        };
        if let Err(_error) = &result {
            #[cfg(feature = "tracing")]
            tracing::debug!("engine_rollback: {_error}");
            self.restore_checkpoint(checkpoint);
        }
        result
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            graph: self.graph.clone(),
            cells: self.cells.clone(),
            addresses: self.addresses.clone(),
            controls: self.controls.clone(),
            tracks: self.tracks.clone(),
            processors: self.processors.clone(),
            next_track: self.next_track,
            next_key: self.next_key,
        }
    }

    fn restore_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.graph = checkpoint.graph;
        self.cells = checkpoint.cells;
        self.addresses = checkpoint.addresses;
        self.controls = checkpoint.controls;
        self.tracks = checkpoint.tracks;
        self.processors = checkpoint.processors;
        self.next_track = checkpoint.next_track;
        self.next_key = checkpoint.next_key;
    }

    fn compile(&mut self) -> Result<(), EngineError> {
        if let Some(dirty) = self.deferred.as_mut() {
            *dirty = true;
            return Ok(());
        }
        let order = self.graph.topological_order()?;
        if order.len() > self.options.max_nodes {
            return Err(GraphCompilationError::CapacityExceeded {
                nodes: order.len(),
                capacity: self.options.max_nodes,
            }
            .into());
        }
        let plan = self.plan(order);
        self.scheduler.submit(plan)?;
        Ok(())
    }

    fn plan(&self, order: Arc<[NodeId]>) -> GraphPlan {
        let nodes = order
            .iter()
            .filter_map(|id| {
                Some(PlanNode {
                    id: *id,
                    cell: Arc::clone(self.cells.get(id)?),
                })
            })
            .collect();
        let connections = self
            .graph
            .connections()
            .filter_map(|c| {
                let src = self.graph.port(c.src())?;
                let dst = self.graph.port(c.dst())?;
                Some(PlanConnection {
                    src_node: c.src_node(),
                    src_port: c.src(),
                    src_index: src.index(),
                    src_kind: src.kind(),
                    dst_node: c.dst_node(),
                    dst_port: c.dst(),
                    dst_index: dst.index(),
                    params: Arc::clone(c.params()),
                    feedback: c.is_feedback(),
                })
            })
            .collect();

        let member_of: HashMap<NodeId, usize> = self
            .tracks
            .values()
            .enumerate()
            .map(|(i, t)| (t.node, i))
            .collect();
        let solo = self
            .tracks
            .values()
            .map(|t| SoloMember {
                flags: Arc::clone(&t.mix),
                solo: Arc::clone(&t.controls.solo),
                listen: Arc::clone(&t.controls.listen),
                exempt: t.kind == TrackKind::Master,
                related: self
                    .graph
                    .upstream_of(t.node)
                    .into_iter()
                    .chain(self.graph.downstream_of(t.node))
                    .filter_map(|n| member_of.get(&n).copied())
                    .collect(),
            })
            .collect();

        GraphPlan {
            generation: 0,
            order,
            nodes,
            connections,
            solo,
            any_listened: Some(Arc::clone(&self.any_listened)),
            sample_rate: self.options.sample_rate,
            max_block: self.options.max_block,
            midi_capacity: self.options.midi_capacity,
            events: self.events.clone(),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tracks", &self.tracks.len())
            .field("processors", &self.processors.len())
            .field("nodes", &self.graph.node_count())
            .field("connections", &self.graph.connection_count())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

fn toggle(on: bool) -> f32 {
    if on { 1.0 } else { 0.0 }
}

fn strip_parts(kind: TrackKind, options: &EngineOptions) -> StripParts {
    StripParts {
        kind,
        controls: FaderControls::new(),
        mix: Arc::new(MixFlags::default()),
        sends: (0..kind.send_slots())
            .map(|_| (ChannelSend::amount_control(), Arc::new(AtomicBool::new(false))))
            .collect(),
        pan: options.pan,
        fade_frames: options.fade_frames,
    }
}

/// Strip parts sharing a track's existing controls.
fn track_parts(track: &Track, options: &EngineOptions) -> StripParts {
    StripParts {
        kind: track.kind,
        controls: track.controls.clone(),
        mix: Arc::clone(&track.mix),
        sends: track
            .sends
            .iter()
            .map(|send| (Arc::clone(&send.amount), Arc::clone(&send.enabled)))
            .collect(),
        pan: options.pan,
        fade_frames: options.fade_frames,
    }
}

fn new_track(id: TrackId, name: String, parts: &StripParts, node: NodeId) -> Track {
    Track {
        id,
        name,
        kind: parts.kind,
        node,
        output: OutputTarget::None,
        armed: false,
        controls: parts.controls.clone(),
        mix: Arc::clone(&parts.mix),
        stages: BTreeMap::new(),
        sends: parts
            .sends
            .iter()
            .map(|(amount, enabled)| SendSlot {
                target: None,
                amount: Arc::clone(amount),
                enabled: Arc::clone(enabled),
            })
            .collect(),
    }
}

fn spawn_processor(
    graph: &mut RoutingGraph,
    config: &ProcessConfig,
    label: &str,
    processor: Box<dyn ProcessorNode>,
) -> Result<Arc<NodeCell>, EngineError> {
    let kind = processor.kind().to_string();
    let mut slot = NodeSlot::new(processor);
    slot.instantiate(config)
        .map_err(|source| EngineError::Instantiate { kind, source })?;
    Ok(spawn(graph, config, label, NodeKind::Processor(slot)))
}

fn spawn_strip(
    graph: &mut RoutingGraph,
    config: &ProcessConfig,
    events: EventSender,
    label: &str,
    parts: StripParts,
) -> Result<Arc<NodeCell>, EngineError> {
    let mut slot = NodeSlot::new(ChannelStrip::new(parts, NodeId(0), events));
    slot.instantiate(config)
        .map_err(|source| EngineError::Instantiate {
            kind: "channel".to_string(),
            source,
        })?;
    Ok(spawn(graph, config, label, NodeKind::Channel(slot)))
}

fn spawn(graph: &mut RoutingGraph, config: &ProcessConfig, label: &str, mut kind: NodeKind) -> Arc<NodeCell> {
    let descriptors = kind.ports();
    let node = graph.add_node(label, &descriptors);
    if let Some(strip) = kind.channel_mut() {
        strip.bind(node);
    }
    let (inputs, outputs) = build_ports(graph, node, descriptors, config);
    Arc::new(NodeCell::new(node, kind, inputs, outputs))
}

fn build_ports(
    graph: &RoutingGraph,
    node: NodeId,
    descriptors: Vec<PortDescriptor>,
    config: &ProcessConfig,
) -> (Vec<Port>, Vec<Port>) {
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();
    for desc in descriptors {
        let Some(id) = graph.find_port(node, desc.direction, &desc.symbol) else {
            continue;
        };
        let direction = desc.direction;
        let port = Port::new(id, desc, config.max_block, config.midi_capacity);
        match direction {
            PortDirection::Input => inputs.push(port),
            PortDirection::Output => outputs.push(port),
        }
    }
    (inputs, outputs)
}
