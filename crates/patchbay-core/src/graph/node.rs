//! Node and port bookkeeping for the routing graph.
//!
//! The routing graph only tracks topology: which ports a node owns and which
//! connections touch it. Buffers and processors live in the runtime
//! [`NodeCell`](super::cell::NodeCell) keyed by the same [`NodeId`].

use std::fmt;

use crate::port::{PortDirection, PortFlags, PortId, PortType};

use super::connection::ConnectionId;

/// Unique identifier for a node in the routing graph.
///
/// Node IDs are assigned sequentially and never reused within a graph instance.
/// They remain stable across port re-layouts and graph compilations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Returns the raw numeric identifier.
    #[inline]
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Topology record for one node.
#[derive(Debug, Clone)]
pub struct NodeEntry {
    pub(crate) id: NodeId,
    pub(crate) label: String,
    pub(crate) inputs: Vec<PortId>,
    pub(crate) outputs: Vec<PortId>,
    pub(crate) incoming: Vec<ConnectionId>,
    pub(crate) outgoing: Vec<ConnectionId>,
}

impl NodeEntry {
    /// Node id.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Human-readable label (track name, processor kind).
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Input ports in declaration order.
    pub fn inputs(&self) -> &[PortId] {
        &self.inputs
    }

    /// Output ports in declaration order.
    pub fn outputs(&self) -> &[PortId] {
        &self.outputs
    }

    /// Connections arriving at any input.
    pub fn incoming(&self) -> &[ConnectionId] {
        &self.incoming
    }

    /// Connections leaving any output.
    pub fn outgoing(&self) -> &[ConnectionId] {
        &self.outgoing
    }
}

/// Topology record for one port.
#[derive(Debug, Clone)]
pub struct PortEntry {
    pub(crate) id: PortId,
    pub(crate) node: NodeId,
    pub(crate) index: usize,
    pub(crate) symbol: String,
    pub(crate) kind: PortType,
    pub(crate) direction: PortDirection,
    pub(crate) flags: PortFlags,
}

impl PortEntry {
    /// Port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Owning node.
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Position among the node's ports of the same direction.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Stable symbol.
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Semantic type.
    pub fn kind(&self) -> PortType {
        self.kind
    }

    /// Direction.
    pub fn direction(&self) -> PortDirection {
        self.direction
    }

    /// Capability flags.
    pub fn flags(&self) -> PortFlags {
        self.flags
    }
}
