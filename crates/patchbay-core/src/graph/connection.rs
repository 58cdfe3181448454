//! Weighted port-to-port connections.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::port::PortId;

use super::node::NodeId;

/// Unique identifier for a connection.
///
/// Connection IDs are assigned sequentially and never reused, so they double as
/// registration order when MIDI streams are merged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub(crate) u32);

impl ConnectionId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Multiplier and enabled flag, shared with compiled graphs.
///
/// Editing these does not require recompilation.
#[derive(Debug)]
pub struct ConnectionParams {
    multiplier: AtomicU32,
    enabled: AtomicBool,
}

impl ConnectionParams {
    pub(crate) fn new(multiplier: f32, enabled: bool) -> Self {
        Self {
            multiplier: AtomicU32::new(multiplier.to_bits()),
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Current multiplier.
    #[inline]
    pub fn multiplier(&self) -> f32 {
        f32::from_bits(self.multiplier.load(Ordering::Relaxed))
    }

    /// Whether the connection currently carries signal.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Change the multiplier.
    pub fn set_multiplier(&self, multiplier: f32) {
        self.multiplier
            .store(multiplier.to_bits(), Ordering::Relaxed);
    }

    /// Enable or disable.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }
}

/// Options for [`RoutingGraph::add_connection_with`](super::RoutingGraph::add_connection_with).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectionOptions {
    /// Signal multiplier.
    pub multiplier: f32,
    /// Start enabled.
    pub enabled: bool,
    /// Delayed-feedback edge: excluded from cycle checks, delivers last cycle's output.
    pub feedback: bool,
    /// Created by the engine for track routing rather than by the user.
    pub managed: bool,
}

impl ConnectionOptions {
    /// Enabled, non-feedback, user connection with `multiplier`.
    pub fn new(multiplier: f32) -> Self {
        Self {
            multiplier,
            enabled: true,
            feedback: false,
            managed: false,
        }
    }

    /// Mark as a delayed-feedback edge.
    pub fn feedback(mut self) -> Self {
        self.feedback = true;
        self
    }

    /// Mark as engine-managed.
    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new(1.0)
    }
}

/// A directed connection from an output port to an input port.
#[derive(Debug, Clone)]
pub struct Connection {
    pub(crate) id: ConnectionId,
    pub(crate) src: PortId,
    pub(crate) dst: PortId,
    pub(crate) src_node: NodeId,
    pub(crate) dst_node: NodeId,
    pub(crate) params: Arc<ConnectionParams>,
    pub(crate) feedback: bool,
    pub(crate) managed: bool,
}

impl Connection {
    /// Connection id (also its registration order).
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Source output port.
    pub fn src(&self) -> PortId {
        self.src
    }

    /// Destination input port.
    pub fn dst(&self) -> PortId {
        self.dst
    }

    /// Node owning the source port.
    pub fn src_node(&self) -> NodeId {
        self.src_node
    }

    /// Node owning the destination port.
    pub fn dst_node(&self) -> NodeId {
        self.dst_node
    }

    /// Shared multiplier and enabled flag.
    pub fn params(&self) -> &Arc<ConnectionParams> {
        &self.params
    }

    /// Current multiplier.
    pub fn multiplier(&self) -> f32 {
        self.params.multiplier()
    }

    /// Whether the connection is enabled.
    pub fn is_enabled(&self) -> bool {
        self.params.is_enabled()
    }

    /// Delayed-feedback edge.
    pub fn is_feedback(&self) -> bool {
        self.feedback
    }

    /// Created by track routing.
    pub fn is_managed(&self) -> bool {
        self.managed
    }
}
