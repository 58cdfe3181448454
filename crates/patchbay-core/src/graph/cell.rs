//! Runtime state of one graph node.
//!
//! A cell is built on the control thread and then shared by every compiled
//! graph that schedules it. Once published, only cycles lock it: the control
//! thread never touches a published cell again, and a node that changes shape
//! gets a replacement cell that the next compiled graph picks up.
//!
//! Locks are taken in body → outputs order and are uncontended during a
//! cycle: the scheduler runs a node only once all its upstream nodes have
//! finished, and downstream readers only take the read side of `outputs`
//! after that.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::channel::ChannelStrip;
use crate::port::{Port, PortDescriptor};
use crate::processor::{NodeSlot, NodeStatus, ProcessorNode, RunOutcome};

use super::node::NodeId;

/// What runs inside a cell.
pub(crate) enum NodeKind {
    /// A track's channel strip.
    Channel(NodeSlot<ChannelStrip>),
    /// Any other processor (engine utilities, free-standing plugins).
    Processor(NodeSlot<Box<dyn ProcessorNode>>),
}

impl NodeKind {
    pub(crate) fn status(&self) -> &Arc<NodeStatus> {
        match self {
            NodeKind::Channel(slot) => slot.status(),
            NodeKind::Processor(slot) => slot.status(),
        }
    }

    pub(crate) fn ports(&self) -> Vec<PortDescriptor> {
        match self {
            NodeKind::Channel(slot) => slot.processor().ports(),
            NodeKind::Processor(slot) => slot.processor().ports(),
        }
    }

    pub(crate) fn channel_mut(&mut self) -> Option<&mut ChannelStrip> {
        match self {
            NodeKind::Channel(slot) => Some(slot.processor_mut()),
            NodeKind::Processor(_) => None,
        }
    }

    fn run(&mut self, frames: usize, sample_rate: f32, inputs: &[Port], outputs: &mut [Port]) -> RunOutcome {
        match self {
            NodeKind::Channel(slot) => slot.run(frames, sample_rate, inputs, outputs),
            NodeKind::Processor(slot) => slot.run(frames, sample_rate, inputs, outputs),
        }
    }
}

/// Processor plus its input ports; locked for the duration of a run.
pub(crate) struct NodeBody {
    pub(crate) inputs: Vec<Port>,
    pub(crate) kind: NodeKind,
}

/// A node's processor and port buffers.
pub(crate) struct NodeCell {
    id: NodeId,
    status: Arc<NodeStatus>,
    body: Mutex<NodeBody>,
    outputs: RwLock<Vec<Port>>,
}

impl NodeCell {
    pub(crate) fn new(id: NodeId, kind: NodeKind, inputs: Vec<Port>, outputs: Vec<Port>) -> Self {
        Self {
            id,
            status: Arc::clone(kind.status()),
            body: Mutex::new(NodeBody { inputs, kind }),
            outputs: RwLock::new(outputs),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn status(&self) -> &Arc<NodeStatus> {
        &self.status
    }

    pub(crate) fn body(&self) -> MutexGuard<'_, NodeBody> {
        self.body.lock()
    }

    pub(crate) fn outputs(&self) -> RwLockReadGuard<'_, Vec<Port>> {
        self.outputs.read()
    }

    pub(crate) fn outputs_mut(&self) -> RwLockWriteGuard<'_, Vec<Port>> {
        self.outputs.write()
    }

    /// Gather inputs, then run the processor into the output buffers.
    pub(crate) fn process(
        &self,
        frames: usize,
        sample_rate: f32,
        gather: impl FnOnce(&mut [Port]),
    ) -> RunOutcome {
        let mut body = self.body.lock();
        let body = &mut *body;
        gather(&mut body.inputs);
        let mut outputs = self.outputs.write();
        body.kind.run(frames, sample_rate, &body.inputs, &mut outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::PortId;
    use crate::processor::{ProcessConfig, ProcessorRegistry};

    fn gain_cell() -> NodeCell {
        let registry = ProcessorRegistry::new();
        let mut slot = NodeSlot::new(registry.create("gain").unwrap());
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for (i, desc) in slot.processor().ports().into_iter().enumerate() {
            let port = Port::new(PortId(i as u32), desc, 8, 8);
            match port.direction() {
                crate::port::PortDirection::Input => inputs.push(port),
                crate::port::PortDirection::Output => outputs.push(port),
            }
        }
        NodeCell::new(NodeId(0), NodeKind::Processor(slot), inputs, outputs)
    }

    #[test]
    fn process_runs_gather_then_processor() {
        let cell = gain_cell();
        let outcome = cell.process(4, 48_000.0, |inputs| {
            inputs[0].signal_mut().unwrap()[..4].fill(0.5);
            inputs[1].signal_mut().unwrap()[..4].fill(0.25);
        });
        assert_eq!(outcome, RunOutcome::Processed);
        let outputs = cell.outputs();
        assert_eq!(&outputs[0].read()[..4], &[0.5; 4]);
        assert_eq!(&outputs[1].read()[..4], &[0.25; 4]);
    }

    #[test]
    fn cell_ports_follow_processor_layout() {
        let cell = gain_cell();
        let mut body = cell.body();
        let described = body.kind.ports();
        assert_eq!(body.inputs.len() + cell.outputs().len(), described.len());
        assert!(body.kind.channel_mut().is_none());
        assert_eq!(cell.status().state(), body.kind.status().state());
    }
}
