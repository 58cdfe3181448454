//! Error taxonomy for the routing engine.
//!
//! Connect-time failures ([`PortTypeMismatchError`], [`RoutingCycleError`]) are
//! rejected before the graph is touched. Structural failures
//! ([`GraphCompilationError`]) leave the previously compiled graph serving
//! cycles. Runtime failures ([`NodeFault`], [`Xrun`]) never abort processing:
//! they are reported through [`EngineEvent`](crate::EngineEvent)s.

use std::borrow::Cow;
use std::time::Duration;

use thiserror::Error;

use crate::graph::NodeId;
use crate::port::{NodeAddress, PortAddress, PortId, PortType};
use crate::processor::NodeState;
use crate::track::{NodeKey, StageRef, TrackId};

/// Two ports of incompatible semantic type were connected.
///
/// Legal pairs are Audio→Audio, MIDI→MIDI, CV→CV, CV→Control, Control→CV and
/// Control→Control.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot connect {src_type} port {src} to {dst_type} port {dst}")]
pub struct PortTypeMismatchError {
    /// Source (output) port.
    pub src: PortId,
    /// Destination (input) port.
    pub dst: PortId,
    /// Semantic type of the source.
    pub src_type: PortType,
    /// Semantic type of the destination.
    pub dst_type: PortType,
}

/// Adding a connection would close a loop in the routing graph.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("connecting {src} to {dst} would create a routing cycle")]
pub struct RoutingCycleError {
    /// Source (output) port.
    pub src: PortId,
    /// Destination (input) port.
    pub dst: PortId,
}

/// The graph could not be compiled into an executable descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphCompilationError {
    /// Topological sort left nodes unvisited.
    #[error("graph contains a cycle through {remaining} node(s)")]
    Cycle {
        /// Number of nodes that could not be ordered.
        remaining: usize,
    },

    /// More nodes than the scheduler's trigger queue can hold.
    #[error("graph has {nodes} nodes, scheduler capacity is {capacity}")]
    CapacityExceeded {
        /// Node count of the rejected graph.
        nodes: usize,
        /// Configured `max_nodes`.
        capacity: usize,
    },

    /// A node in the topology has no runtime cell.
    #[error("node {0} has no runtime state")]
    MissingNode(NodeId),
}

/// A processor reported a failure (or panicked) during `process`.
///
/// The message is a `Cow` so processors can fail from the real-time thread
/// with a static string and no allocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NodeFault {
    message: Cow<'static, str>,
}

impl NodeFault {
    /// Create a fault with a static message.
    pub const fn new(message: &'static str) -> Self {
        Self {
            message: Cow::Borrowed(message),
        }
    }

    /// Create a fault with an owned message.
    pub fn owned(message: impl Into<String>) -> Self {
        Self {
            message: Cow::Owned(message.into()),
        }
    }

    /// The fault description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A processing cycle overran its real-time deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("xrun: {frames} frames took {elapsed:?}, deadline {deadline:?}")]
pub struct Xrun {
    /// Frames requested for the cycle.
    pub frames: usize,
    /// Wall-clock time the cycle took.
    pub elapsed: Duration,
    /// Time available (`frames / sample_rate`).
    pub deadline: Duration,
}

/// Misuse of a single port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortError {
    /// Inputs are only ever filled by the graph executor.
    #[error("port {0} is an input; inputs are written only by the graph executor")]
    WriteToInput(PortId),

    /// Sample blocks only exist on audio and CV ports.
    #[error("port {port} carries {kind} data, not sample blocks")]
    NotASignal {
        /// Offending port.
        port: PortId,
        /// Its semantic type.
        kind: PortType,
    },

    /// `set_value` on a non-control port.
    #[error("port {0} is not a control port")]
    NotAControl(PortId),

    /// The block is longer than the port buffer.
    #[error("block of {len} frames exceeds port capacity {capacity}")]
    BlockTooLarge {
        /// Requested frames.
        len: usize,
        /// Port buffer capacity.
        capacity: usize,
    },
}

/// Errors from routing-graph mutations and node state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Node not in the graph.
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    /// Port not in the graph.
    #[error("port not found: {0}")]
    PortNotFound(PortId),

    /// Connections run from an output to an input.
    #[error("cannot connect {src} to {dst}: connections run from an output to an input")]
    Direction {
        /// Requested source.
        src: PortId,
        /// Requested destination.
        dst: PortId,
    },

    /// The destination accepts a single connection and already has one.
    #[error("input {0} accepts a single connection and is already connected")]
    InputOccupied(PortId),

    /// Incompatible port types.
    #[error(transparent)]
    TypeMismatch(#[from] PortTypeMismatchError),

    /// The connection would create a cycle.
    #[error(transparent)]
    Cycle(#[from] RoutingCycleError),

    /// The topology could not be compiled.
    #[error(transparent)]
    Compilation(#[from] GraphCompilationError),

    /// Lifecycle transition not allowed from the current state.
    #[error("invalid node state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current state.
        from: NodeState,
        /// Requested state.
        to: NodeState,
    },

    /// Single-port misuse.
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Errors returned by the [`Engine`](crate::Engine) control API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Routing graph rejected the mutation.
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Unknown track id.
    #[error("track not found: {0}")]
    TrackNotFound(TrackId),

    /// A track with this id already exists.
    #[error("track already exists: {0}")]
    TrackExists(TrackId),

    /// The Master track cannot be removed or re-routed.
    #[error("operation not allowed on the master track")]
    MasterTrack,

    /// Stage slot index is out of range or the stage does not exist for this track kind.
    #[error("track {track} has no {stage} stage")]
    InvalidStage {
        /// Track addressed.
        track: TrackId,
        /// Requested stage slot.
        stage: StageRef,
    },

    /// The addressed stage slot is empty.
    #[error("stage {stage} on track {track} is empty")]
    EmptyStage {
        /// Track addressed.
        track: TrackId,
        /// Requested stage slot.
        stage: StageRef,
    },

    /// Send slot out of range.
    #[error("send slot {slot} out of range (max {max})")]
    InvalidSendSlot {
        /// Requested slot.
        slot: usize,
        /// Number of send slots.
        max: usize,
    },

    /// No processor registered under this id.
    #[error("unknown processor type: {0}")]
    UnknownProcessor(String),

    /// Engine-owned processor not found.
    #[error("processor not found: {0}")]
    ProcessorNotFound(NodeKey),

    /// A processor with this key already exists.
    #[error("processor already exists: {0}")]
    ProcessorExists(NodeKey),

    /// `instantiate()` failed.
    #[error("failed to instantiate '{kind}': {source}")]
    Instantiate {
        /// Processor type.
        kind: String,
        /// Reported fault.
        #[source]
        source: NodeFault,
    },

    /// The processor's port layout does not fit the stage it was inserted into.
    #[error("processor '{kind}' cannot be used as {stage}")]
    IncompatibleProcessor {
        /// Processor type.
        kind: String,
        /// Target stage slot.
        stage: StageRef,
    },

    /// Source and destination share no compatible ports.
    #[error("{src} has no outputs compatible with the inputs of {dst}")]
    IncompatibleRouting {
        /// Routed node.
        src: NodeAddress,
        /// Destination node.
        dst: NodeAddress,
    },

    /// No connection between the two ports.
    #[error("no connection from {src} to {dst}")]
    ConnectionNotFound {
        /// Source port.
        src: PortId,
        /// Destination port.
        dst: PortId,
    },

    /// Address does not resolve to a port.
    #[error("no port at {0}")]
    UnresolvedPort(PortAddress),

    /// The port exists but is owned by the engine's routing and cannot be edited directly.
    #[error("connection {src} -> {dst} is managed by track routing")]
    ManagedConnection {
        /// Source port.
        src: PortId,
        /// Destination port.
        dst: PortId,
    },

    /// A cycle asked for more frames than the configured block size.
    #[error("cycle of {frames} frames exceeds max block size {max}")]
    BlockTooLarge {
        /// Requested frames.
        frames: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Hardware channel index out of range.
    #[error("hardware channel {0} does not exist")]
    InvalidChannel(usize),

    /// Snapshot could not be restored.
    #[error("invalid snapshot: {0}")]
    Snapshot(String),

    /// Construction options are out of range.
    #[error("invalid engine option {field}: {reason}")]
    InvalidOptions {
        /// Offending field of [`EngineOptions`](crate::EngineOptions).
        field: &'static str,
        /// What the field must satisfy.
        reason: &'static str,
    },

    /// A worker or compiler thread could not be spawned.
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl EngineError {
    /// Create a snapshot error.
    pub fn snapshot(reason: impl Into<String>) -> Self {
        EngineError::Snapshot(reason.into())
    }
}

impl From<PortError> for EngineError {
    fn from(err: PortError) -> Self {
        EngineError::Graph(GraphError::Port(err))
    }
}

impl From<RoutingCycleError> for EngineError {
    fn from(err: RoutingCycleError) -> Self {
        EngineError::Graph(GraphError::Cycle(err))
    }
}

impl From<GraphCompilationError> for EngineError {
    fn from(err: GraphCompilationError) -> Self {
        EngineError::Graph(GraphError::Compilation(err))
    }
}

impl From<PortTypeMismatchError> for EngineError {
    fn from(err: PortTypeMismatchError) -> Self {
        EngineError::Graph(GraphError::TypeMismatch(err))
    }
}
