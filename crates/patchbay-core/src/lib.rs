//! Patchbay Core - real-time audio routing for a DAW
//!
//! This crate is the routing heart of a digital audio workstation: a graph of
//! processor nodes joined by typed port connections, channel strips for
//! tracks, and a multi-threaded scheduler that runs the graph once per audio
//! cycle without allocating or blocking.
//!
//! # Core Abstractions
//!
//! ## Ports and Connections
//!
//! - [`PortDescriptor`] / [`Port`] - typed endpoints (audio, MIDI, control, CV)
//! - [`RoutingGraph`] - topology with cycle rejection and fan-in summing
//! - [`ControlValue`] - shared, atomically updated control values
//!
//! ## Processing
//!
//! - [`ProcessorNode`] - object-safe trait every node implements
//! - [`ProcessorRegistry`] - factories for built-in and hosted processors
//! - [`NodeState`] - Uninstantiated, Active, Bypassed or Disabled
//!
//! ## Tracks
//!
//! - [`TrackKind`] - Audio, MIDI, Instrument, Bus and Master
//! - [`StageRef`] - MIDI effect, instrument and insert slots
//! - [`SendTarget`] - nine sends per track, six pre-fader
//!
//! ## Engine
//!
//! - [`Engine`] - owns graph, tracks and scheduler; the control API
//! - [`ProcessHandle`] - cloneable handle for the audio callback
//! - [`Scheduler`] - worker pool and compiled-graph hand-off
//! - [`EngineSnapshot`] - serializable session state
//! - [`Command`] / [`UndoStack`] - undoable edits
//!
//! # Example
//!
//! ```rust
//! use patchbay_core::{Engine, EngineOptions, OutputTarget, PortAddress, TrackKind};
//!
//! let mut engine = Engine::new(EngineOptions::offline(48_000.0, 128)).unwrap();
//! let drums = engine.add_track(TrackKind::Audio, "Drums").unwrap();
//! let bus = engine.add_track(TrackKind::Bus, "Group").unwrap();
//! engine.set_output(drums, OutputTarget::Track(bus)).unwrap();
//! engine.set_volume(bus, 0.5).unwrap();
//!
//! let input = vec![0.1; 128];
//! let (mut l, mut r) = (vec![0.0; 128], vec![0.0; 128]);
//! engine.process_block(&input, &input, &mut l, &mut r).unwrap();
//! ```
//!
//! # Design Principles
//!
//! - **Real-time safe**: no allocation or blocking in the processing path
//! - **Explicit context**: no global state; every engine is independent
//! - **Contained faults**: a failing processor is disabled, the graph keeps running
//! - **Compile off-thread**: topology edits never stall the audio callback

pub mod channel;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod math;
pub mod midi;
pub mod mixer;
pub mod options;
pub mod pan;
pub mod param;
pub mod port;
pub mod processor;
pub mod scheduler;
pub mod track;

pub use channel::FaderControls;
pub use engine::{
    Command, ConnectionSnapshot, Engine, EngineSnapshot, MASTER, OUTPUT_LIMIT, ProcessHandle,
    ProcessorSnapshot, SendSnapshot, StageSnapshot, TrackSnapshot, UndoStack,
};
pub use error::{
    EngineError, GraphCompilationError, GraphError, NodeFault, PortError, PortTypeMismatchError,
    RoutingCycleError, Xrun,
};
pub use events::EngineEvent;
pub use graph::{
    CompiledGraph, Connection, ConnectionId, ConnectionOptions, ConnectionParams, NodeEntry,
    NodeId, PortEntry, RoutingGraph,
};
pub use math::{db_to_linear, linear_to_db};
pub use midi::{MidiBuffer, MidiEvent};
pub use mixer::MixFlags;
pub use options::EngineOptions;
pub use pan::{PanAlgorithm, PanLaw, PanPolicy};
pub use param::LinearRamp;
pub use port::{
    ControlRange, ControlValue, NodeAddress, Port, PortAddress, PortDescriptor, PortDirection,
    PortFlags, PortId, PortType,
};
pub use processor::{
    NodeSlot, NodeState, NodeStatus, ProcessConfig, ProcessContext, ProcessorCategory,
    ProcessorDescriptor, ProcessorNode, ProcessorRegistry, RunOutcome,
};
pub use scheduler::{CycleReport, Scheduler, SchedulerState};
pub use track::{
    NodeKey, OutputTarget, SendTarget, StageInfo, StageKind, StageRef, Track, TrackId, TrackKind,
};
