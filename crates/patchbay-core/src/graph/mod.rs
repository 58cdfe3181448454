//! Routing graph and its compiled, executable form.
//!
//! The control thread edits a [`RoutingGraph`] (topology only). Every
//! structural edit produces a [`CompiledGraph`] that the scheduler swaps in
//! between cycles.

pub(crate) mod cell;
mod connection;
mod node;
mod routing;
pub(crate) mod schedule;

pub use connection::{Connection, ConnectionId, ConnectionOptions, ConnectionParams};
pub use node::{NodeEntry, NodeId, PortEntry};
pub use routing::RoutingGraph;
pub use schedule::CompiledGraph;
