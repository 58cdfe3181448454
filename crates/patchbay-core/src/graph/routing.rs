//! Routing graph: topology mutation, cycle detection and ordering.
//!
//! [`RoutingGraph`] is owned by the control thread. Every mutation validates
//! first and only then touches state, so a rejected call leaves the graph
//! exactly as it was. The real-time side never sees this type; it executes a
//! [`CompiledGraph`](super::CompiledGraph) built from it.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::{GraphCompilationError, GraphError, PortTypeMismatchError, RoutingCycleError};
use crate::port::{PortDescriptor, PortDirection, PortFlags, PortId};

use super::connection::{Connection, ConnectionId, ConnectionOptions, ConnectionParams};
use super::node::{NodeEntry, NodeId, PortEntry};

/// Directed graph of nodes, ports and weighted connections.
///
/// Node, port and connection ids are sequential slab indices and are never
/// reused by a graph. A restored clone hands out the ids issued after it was
/// taken again. Feedback connections are stored like any other edge but are
/// invisible to cycle detection, ancestry queries and ordering.
#[derive(Debug, Default, Clone)]
pub struct RoutingGraph {
    nodes: Vec<Option<NodeEntry>>,
    ports: Vec<Option<PortEntry>>,
    connections: Vec<Option<Connection>>,
    revision: u64,
    order_cache: RefCell<Option<Arc<[NodeId]>>>,
}

impl RoutingGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the given port layout and return its id.
    pub fn add_node(&mut self, label: impl Into<String>, ports: &[PortDescriptor]) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let mut entry = NodeEntry {
            id,
            label: label.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            incoming: Vec::new(),
            outgoing: Vec::new(),
        };
        for desc in ports {
            match desc.direction {
                PortDirection::Input => {
                    let port = self.alloc_port(id, desc, entry.inputs.len());
                    entry.inputs.push(port);
                }
                PortDirection::Output => {
                    let port = self.alloc_port(id, desc, entry.outputs.len());
                    entry.outputs.push(port);
                }
            }
        }
        self.nodes.push(Some(entry));
        self.invalidate();
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_add: {id} ({} ports)", ports.len());
        id
    }

    fn alloc_port(&mut self, node: NodeId, desc: &PortDescriptor, index: usize) -> PortId {
        let id = PortId(self.ports.len() as u32);
        self.ports.push(Some(PortEntry {
            id,
            node,
            index,
            symbol: desc.symbol.clone(),
            kind: desc.kind,
            direction: desc.direction,
            flags: desc.flags,
        }));
        id
    }

    /// Replace a node's port layout.
    ///
    /// Ports are matched by symbol, direction and type. Matches keep their id
    /// and connections; everything else is created fresh. Ports missing from
    /// the new layout are removed along with their connections, which are
    /// returned.
    pub fn set_node_ports(
        &mut self,
        node: NodeId,
        ports: &[PortDescriptor],
    ) -> Result<Vec<Connection>, GraphError> {
        let entry = self.node(node).ok_or(GraphError::NodeNotFound(node))?;
        let old: Vec<PortId> = entry.inputs.iter().chain(&entry.outputs).copied().collect();

        let mut claimed = Vec::with_capacity(ports.len());
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for desc in ports {
            let index = match desc.direction {
                PortDirection::Input => inputs.len(),
                PortDirection::Output => outputs.len(),
            };
            let existing = old.iter().copied().find(|p| {
                !claimed.contains(p)
                    && self.port(*p).is_some_and(|e| {
                        e.symbol == desc.symbol
                            && e.direction == desc.direction
                            && e.kind == desc.kind
                    })
            });
            let port = match existing {
                Some(p) => {
                    if let Some(Some(e)) = self.ports.get_mut(p.0 as usize) {
                        e.index = index;
                        e.flags = desc.flags;
                    }
                    claimed.push(p);
                    p
                }
                None => self.alloc_port(node, desc, index),
            };
            match desc.direction {
                PortDirection::Input => inputs.push(port),
                PortDirection::Output => outputs.push(port),
            }
        }

        let mut dropped = Vec::new();
        for port in old.into_iter().filter(|p| !claimed.contains(p)) {
            let touching: Vec<ConnectionId> = self
                .connections
                .iter()
                .flatten()
                .filter(|c| c.src == port || c.dst == port)
                .map(|c| c.id)
                .collect();
            for id in touching {
                dropped.extend(self.remove_connection_by_id(id));
            }
            self.ports[port.0 as usize] = None;
        }

        if let Some(Some(entry)) = self.nodes.get_mut(node.0 as usize) {
            entry.inputs = inputs;
            entry.outputs = outputs;
        }
        self.invalidate();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "graph_relayout: {node} ({} ports, {} connections dropped)",
            ports.len(),
            dropped.len()
        );
        Ok(dropped)
    }

    /// Remove a node, its ports and every connection touching it.
    ///
    /// Returns the removed connections. Unknown nodes are a no-op.
    pub fn remove_node(&mut self, id: NodeId) -> Vec<Connection> {
        let Some(entry) = self.node(id) else {
            return Vec::new();
        };
        let conns: Vec<ConnectionId> = entry
            .incoming
            .iter()
            .chain(entry.outgoing.iter())
            .copied()
            .collect();
        let ports: Vec<PortId> = entry.inputs.iter().chain(&entry.outputs).copied().collect();

        let mut removed = Vec::with_capacity(conns.len());
        for conn in conns {
            removed.extend(self.remove_connection_by_id(conn));
        }
        for port in ports {
            self.ports[port.0 as usize] = None;
        }
        self.nodes[id.0 as usize] = None;
        self.invalidate();
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_remove: {id}");
        removed
    }

    /// Connect `src` (an output) to `dst` (an input) with a multiplier.
    ///
    /// Connecting an already connected pair returns the existing id and
    /// applies the new multiplier.
    ///
    /// # Errors
    ///
    /// - [`GraphError::PortNotFound`] if either port is unknown
    /// - [`GraphError::Direction`] unless `src` is an output and `dst` an input
    /// - [`GraphError::TypeMismatch`] for incompatible port types
    /// - [`GraphError::InputOccupied`] if `dst` is single-input and connected
    /// - [`GraphError::Cycle`] if `dst`'s node can already reach `src`'s node
    pub fn add_connection(
        &mut self,
        src: PortId,
        dst: PortId,
        multiplier: f32,
    ) -> Result<ConnectionId, GraphError> {
        self.add_connection_with(src, dst, ConnectionOptions::new(multiplier))
    }

    /// Connect as a delayed-feedback edge that may close a loop.
    pub fn add_feedback_connection(
        &mut self,
        src: PortId,
        dst: PortId,
        multiplier: f32,
    ) -> Result<ConnectionId, GraphError> {
        self.add_connection_with(src, dst, ConnectionOptions::new(multiplier).feedback())
    }

    /// Connect with explicit options.
    pub fn add_connection_with(
        &mut self,
        src: PortId,
        dst: PortId,
        options: ConnectionOptions,
    ) -> Result<ConnectionId, GraphError> {
        let s = self.port(src).ok_or(GraphError::PortNotFound(src))?;
        let d = self.port(dst).ok_or(GraphError::PortNotFound(dst))?;

        if s.direction != PortDirection::Output || d.direction != PortDirection::Input {
            return Err(GraphError::Direction { src, dst });
        }
        if !s.kind.can_feed(d.kind) {
            return Err(PortTypeMismatchError {
                src,
                dst,
                src_type: s.kind,
                dst_type: d.kind,
            }
            .into());
        }

        if let Some(existing) = self.find_connection(src, dst) {
            if let Some(conn) = self.connection(existing) {
                conn.params.set_multiplier(options.multiplier);
                conn.params.set_enabled(options.enabled);
            }
            return Ok(existing);
        }

        let feedback = options.feedback || d.flags.contains(PortFlags::CYCLE_TOLERANT);
        if d.flags.contains(PortFlags::SINGLE_INPUT) && self.incoming(dst).next().is_some() {
            return Err(GraphError::InputOccupied(dst));
        }
        let (src_node, dst_node) = (s.node, d.node);
        if !feedback && self.would_create_cycle(src_node, dst_node) {
            return Err(RoutingCycleError { src, dst }.into());
        }

        let id = ConnectionId(self.connections.len() as u32);
        self.connections.push(Some(Connection {
            id,
            src,
            dst,
            src_node,
            dst_node,
            params: Arc::new(ConnectionParams::new(options.multiplier, options.enabled)),
            feedback,
            managed: options.managed,
        }));
        if let Some(Some(n)) = self.nodes.get_mut(src_node.0 as usize) {
            n.outgoing.push(id);
        }
        if let Some(Some(n)) = self.nodes.get_mut(dst_node.0 as usize) {
            n.incoming.push(id);
        }
        self.invalidate();
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_connect: {src} → {dst} (feedback={feedback})");
        Ok(id)
    }

    /// Remove the connection from `src` to `dst`, if any.
    ///
    /// Removing a connection that does not exist is a no-op.
    pub fn remove_connection(&mut self, src: PortId, dst: PortId) -> Option<Connection> {
        let id = self.find_connection(src, dst)?;
        let removed = self.remove_connection_by_id(id);
        #[cfg(feature = "tracing")]
        tracing::debug!("graph_disconnect: {src} → {dst}");
        removed
    }

    pub(crate) fn remove_connection_by_id(&mut self, id: ConnectionId) -> Option<Connection> {
        let conn = self.connections.get_mut(id.0 as usize)?.take()?;
        if let Some(Some(n)) = self.nodes.get_mut(conn.src_node.0 as usize) {
            n.outgoing.retain(|c| *c != id);
        }
        if let Some(Some(n)) = self.nodes.get_mut(conn.dst_node.0 as usize) {
            n.incoming.retain(|c| *c != id);
        }
        self.invalidate();
        Some(conn)
    }

    /// Id of the connection from `src` to `dst`.
    pub fn find_connection(&self, src: PortId, dst: PortId) -> Option<ConnectionId> {
        let node = self.node(self.port(src)?.node)?;
        node.outgoing
            .iter()
            .copied()
            .find(|c| self.connection(*c).is_some_and(|c| c.src == src && c.dst == dst))
    }

    /// Look up a connection.
    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(id.0 as usize)?.as_ref()
    }

    /// All live connections in registration order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter().flatten()
    }

    /// Connections into `port` in registration order.
    pub fn incoming(&self, port: PortId) -> impl Iterator<Item = &Connection> {
        let node = self.port(port).and_then(|p| self.node(p.node));
        let mut ids: Vec<ConnectionId> = node
            .map(|n| n.incoming.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.connection(id))
            .filter(move |c| c.dst == port)
    }

    /// Connections out of `port` in registration order.
    pub fn outgoing(&self, port: PortId) -> impl Iterator<Item = &Connection> {
        let node = self.port(port).and_then(|p| self.node(p.node));
        let mut ids: Vec<ConnectionId> = node
            .map(|n| n.outgoing.iter().copied().collect())
            .unwrap_or_default();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.connection(id))
            .filter(move |c| c.src == port)
    }

    /// Look up a node.
    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(id.0 as usize)?.as_ref()
    }

    /// All live nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeEntry> {
        self.nodes.iter().flatten()
    }

    /// Look up a port.
    pub fn port(&self, id: PortId) -> Option<&PortEntry> {
        self.ports.get(id.0 as usize)?.as_ref()
    }

    /// Find a node's port by direction and symbol.
    pub fn find_port(&self, node: NodeId, direction: PortDirection, symbol: &str) -> Option<PortId> {
        let entry = self.node(node)?;
        let list = match direction {
            PortDirection::Input => &entry.inputs,
            PortDirection::Output => &entry.outputs,
        };
        list.iter()
            .copied()
            .find(|p| self.port(*p).is_some_and(|e| e.symbol == symbol))
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().flatten().count()
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.iter().flatten().count()
    }

    /// Counter bumped by every structural mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True if an edge from `src_node` to `dst_node` would close a loop.
    pub fn would_create_cycle(&self, src_node: NodeId, dst_node: NodeId) -> bool {
        src_node == dst_node || self.can_reach(dst_node, src_node)
    }

    /// True if the non-feedback edges contain a cycle.
    pub fn has_cycle(&self) -> bool {
        self.kahn_sort().is_err()
    }

    /// Every node that can reach `node` through non-feedback edges, in id order.
    pub fn upstream_of(&self, node: NodeId) -> Vec<NodeId> {
        self.reachable(node, |entry| &entry.incoming, |c| c.src_node)
    }

    /// Every node reachable from `node` through non-feedback edges, in id order.
    pub fn downstream_of(&self, node: NodeId) -> Vec<NodeId> {
        self.reachable(node, |entry| &entry.outgoing, |c| c.dst_node)
    }

    /// Topological order over non-feedback edges, cached until the next mutation.
    pub fn topological_order(&self) -> Result<Arc<[NodeId]>, GraphCompilationError> {
        if let Some(order) = self.order_cache.borrow().as_ref() {
            return Ok(Arc::clone(order));
        }
        let order: Arc<[NodeId]> = self.kahn_sort()?.into();
        *self.order_cache.borrow_mut() = Some(Arc::clone(&order));
        Ok(order)
    }

    fn invalidate(&mut self) {
        self.revision += 1;
        *self.order_cache.get_mut() = None;
    }

    fn scheduling_edge(&self, id: ConnectionId) -> Option<&Connection> {
        self.connection(id).filter(|c| !c.feedback)
    }

    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![from];

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            let idx = current.0 as usize;
            if idx >= visited.len() || visited[idx] {
                continue;
            }
            visited[idx] = true;

            if let Some(Some(node)) = self.nodes.get(idx) {
                for conn in node.outgoing.iter().filter_map(|c| self.scheduling_edge(*c)) {
                    stack.push(conn.dst_node);
                }
            }
        }
        false
    }

    fn reachable(
        &self,
        start: NodeId,
        edges: impl Fn(&NodeEntry) -> &Vec<ConnectionId>,
        next: impl Fn(&Connection) -> NodeId,
    ) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![start];
        let mut found = Vec::new();

        while let Some(current) = stack.pop() {
            let Some(entry) = self.node(current) else {
                continue;
            };
            for conn in edges(entry).iter().filter_map(|c| self.scheduling_edge(*c)) {
                let n = next(conn);
                let idx = n.0 as usize;
                if n != start && !visited[idx] {
                    visited[idx] = true;
                    found.push(n);
                    stack.push(n);
                }
            }
        }
        found.sort_unstable();
        found
    }

    fn kahn_sort(&self) -> Result<Vec<NodeId>, GraphCompilationError> {
        let n = self.nodes.len();
        let mut in_degree = vec![0usize; n];
        let mut active = 0usize;

        for node in self.nodes.iter().flatten() {
            active += 1;
            in_degree[node.id.0 as usize] = node
                .incoming
                .iter()
                .filter(|c| self.scheduling_edge(**c).is_some())
                .count();
        }

        let mut queue: VecDeque<usize> = (0..n)
            .filter(|&i| self.nodes[i].is_some() && in_degree[i] == 0)
            .collect();
        let mut sorted = Vec::with_capacity(active);

        while let Some(idx) = queue.pop_front() {
            sorted.push(NodeId(idx as u32));
            let Some(node) = &self.nodes[idx] else {
                continue;
            };
            for conn in node.outgoing.iter().filter_map(|c| self.scheduling_edge(*c)) {
                let to = conn.dst_node.0 as usize;
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }

        if sorted.len() == active {
            Ok(sorted)
        } else {
            Err(GraphCompilationError::Cycle {
                remaining: active - sorted.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ControlRange, PortType};

    fn stereo_node(graph: &mut RoutingGraph, label: &str) -> NodeId {
        graph.add_node(
            label,
            &[
                PortDescriptor::audio_in("in_l", "In L"),
                PortDescriptor::audio_in("in_r", "In R"),
                PortDescriptor::audio_out("out_l", "Out L"),
                PortDescriptor::audio_out("out_r", "Out R"),
            ],
        )
    }

    fn out(graph: &RoutingGraph, node: NodeId, symbol: &str) -> PortId {
        graph
            .find_port(node, PortDirection::Output, symbol)
            .expect("output port")
    }

    fn inp(graph: &RoutingGraph, node: NodeId, symbol: &str) -> PortId {
        graph
            .find_port(node, PortDirection::Input, symbol)
            .expect("input port")
    }

    #[test]
    fn add_and_remove_connection() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let id = g
            .add_connection(out(&g, a, "out_l"), inp(&g, b, "in_l"), 0.5)
            .unwrap();
        assert_eq!(g.connection(id).unwrap().multiplier(), 0.5);
        assert_eq!(g.connection_count(), 1);

        assert!(g.remove_connection(out(&g, a, "out_l"), inp(&g, b, "in_l")).is_some());
        assert_eq!(g.connection_count(), 0);
        assert!(g.node(a).unwrap().outgoing().is_empty());
        assert!(g.node(b).unwrap().incoming().is_empty());
    }

    #[test]
    fn removing_missing_connection_is_noop() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let rev = g.revision();
        assert!(g.remove_connection(out(&g, a, "out_l"), inp(&g, b, "in_l")).is_none());
        assert_eq!(g.revision(), rev);
    }

    #[test]
    fn duplicate_connection_returns_existing() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let (s, d) = (out(&g, a, "out_l"), inp(&g, b, "in_l"));
        let first = g.add_connection(s, d, 1.0).unwrap();
        let second = g.add_connection(s, d, 0.25).unwrap();
        assert_eq!(first, second);
        assert_eq!(g.connection_count(), 1);
        assert_eq!(g.connection(first).unwrap().multiplier(), 0.25);
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let err = g
            .add_connection(out(&g, a, "out_l"), inp(&g, a, "in_l"), 1.0)
            .unwrap_err();
        assert!(matches!(err, GraphError::Cycle(_)));
        assert_eq!(g.connection_count(), 0);
    }

    #[test]
    fn indirect_cycle_rejected_and_graph_unchanged() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let c = stereo_node(&mut g, "c");
        g.add_connection(out(&g, a, "out_l"), inp(&g, b, "in_l"), 1.0).unwrap();
        g.add_connection(out(&g, b, "out_l"), inp(&g, c, "in_l"), 1.0).unwrap();
        let rev = g.revision();
        let err = g.add_connection(out(&g, c, "out_r"), inp(&g, a, "in_r"), 1.0);
        assert!(matches!(err, Err(GraphError::Cycle(_))));
        assert_eq!(g.revision(), rev);
        assert!(!g.has_cycle());
    }

    #[test]
    fn feedback_edge_may_close_loop() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        g.add_connection(out(&g, a, "out_l"), inp(&g, b, "in_l"), 1.0).unwrap();
        let fb = g
            .add_feedback_connection(out(&g, b, "out_l"), inp(&g, a, "in_l"), 0.5)
            .unwrap();
        assert!(g.connection(fb).unwrap().is_feedback());
        assert!(!g.has_cycle());
        assert_eq!(&*g.topological_order().unwrap(), &[a, b]);
        assert!(g.upstream_of(a).is_empty());
    }

    #[test]
    fn cycle_tolerant_port_makes_feedback_edge() {
        let mut g = RoutingGraph::new();
        let a = g.add_node(
            "a",
            &[
                PortDescriptor::audio_in("fb", "Feedback")
                    .with_flags(PortFlags::CYCLE_TOLERANT),
                PortDescriptor::audio_out("out", "Out"),
            ],
        );
        let id = g.add_connection(out(&g, a, "out"), inp(&g, a, "fb"), 1.0).unwrap();
        assert!(g.connection(id).unwrap().is_feedback());
    }

    #[test]
    fn type_and_direction_errors() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let m = g.add_node(
            "m",
            &[
                PortDescriptor::midi_in("midi_in", "MIDI"),
                PortDescriptor::control_in("amt", "Amount", ControlRange::default()),
            ],
        );
        let err = g
            .add_connection(out(&g, a, "out_l"), inp(&g, m, "midi_in"), 1.0)
            .unwrap_err();
        match err {
            GraphError::TypeMismatch(e) => {
                assert_eq!(e.src_type, PortType::Audio);
                assert_eq!(e.dst_type, PortType::Midi);
            }
            other => panic!("unexpected {other:?}"),
        }
        let err = g
            .add_connection(inp(&g, a, "in_l"), inp(&g, m, "amt"), 1.0)
            .unwrap_err();
        assert!(matches!(err, GraphError::Direction { .. }));
    }

    #[test]
    fn single_input_port_accepts_one_connection() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let k = g.add_node("k", &[PortDescriptor::audio_in("sc", "Key").sidechain()]);
        g.add_connection(out(&g, a, "out_l"), inp(&g, k, "sc"), 1.0).unwrap();
        let err = g.add_connection(out(&g, b, "out_l"), inp(&g, k, "sc"), 1.0);
        assert!(matches!(err, Err(GraphError::InputOccupied(_))));
    }

    #[test]
    fn upstream_and_downstream() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let c = stereo_node(&mut g, "c");
        let d = stereo_node(&mut g, "d");
        g.add_connection(out(&g, a, "out_l"), inp(&g, b, "in_l"), 1.0).unwrap();
        g.add_connection(out(&g, b, "out_l"), inp(&g, c, "in_l"), 1.0).unwrap();
        assert_eq!(g.upstream_of(c), vec![a, b]);
        assert_eq!(g.downstream_of(a), vec![b, c]);
        assert!(g.upstream_of(d).is_empty());
    }

    #[test]
    fn topological_order_cached_and_invalidated() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        g.add_connection(out(&g, b, "out_l"), inp(&g, a, "in_l"), 1.0).unwrap();
        let first = g.topological_order().unwrap();
        let again = g.topological_order().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(&*first, &[b, a]);

        let c = stereo_node(&mut g, "c");
        let third = g.topological_order().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.len(), 3);
        assert!(third.contains(&c));
    }

    #[test]
    fn remove_node_drops_its_connections() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let c = stereo_node(&mut g, "c");
        g.add_connection(out(&g, a, "out_l"), inp(&g, b, "in_l"), 1.0).unwrap();
        g.add_connection(out(&g, b, "out_l"), inp(&g, c, "in_l"), 1.0).unwrap();
        let removed = g.remove_node(b);
        assert_eq!(removed.len(), 2);
        assert_eq!(g.connection_count(), 0);
        assert!(g.node(b).is_none());
        assert!(g.remove_node(b).is_empty());
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn relayout_keeps_surviving_ports() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let keep = inp(&g, b, "in_l");
        g.add_connection(out(&g, a, "out_l"), keep, 1.0).unwrap();
        g.add_connection(out(&g, a, "out_r"), inp(&g, b, "in_r"), 1.0).unwrap();

        let dropped = g
            .set_node_ports(
                b,
                &[
                    PortDescriptor::audio_in("in_l", "In L"),
                    PortDescriptor::audio_in("sc", "Key"),
                    PortDescriptor::audio_out("out_l", "Out L"),
                ],
            )
            .unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(inp(&g, b, "in_l"), keep);
        assert!(g.find_port(b, PortDirection::Input, "in_r").is_none());
        assert_eq!(g.port(inp(&g, b, "sc")).unwrap().index(), 1);
        assert_eq!(g.connection_count(), 1);
    }

    #[test]
    fn incoming_is_registration_ordered() {
        let mut g = RoutingGraph::new();
        let a = stereo_node(&mut g, "a");
        let b = stereo_node(&mut g, "b");
        let c = stereo_node(&mut g, "c");
        let dst = inp(&g, c, "in_l");
        let second = g.add_connection(out(&g, b, "out_l"), dst, 1.0).unwrap();
        let first_src = out(&g, a, "out_l");
        let third = g.add_connection(first_src, dst, 1.0).unwrap();
        let order: Vec<ConnectionId> = g.incoming(dst).map(Connection::id).collect();
        assert_eq!(order, vec![second, third]);
    }
}
