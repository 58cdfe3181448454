//! Lifecycle, bypass and fault containment around a processor.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, NodeFault};
use crate::port::{Port, PortType};

use super::{ProcessConfig, ProcessContext, ProcessorNode};

/// Lifecycle state of a processor node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum NodeState {
    /// Not yet instantiated. Passes input through.
    Uninstantiated = 0,
    /// Processing normally.
    Active = 1,
    /// Passes input through unchanged.
    Bypassed = 2,
    /// Faulted during processing. Passes input through until reinstantiated.
    Disabled = 3,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => NodeState::Active,
            2 => NodeState::Bypassed,
            3 => NodeState::Disabled,
            _ => NodeState::Uninstantiated,
        }
    }

    /// True unless the processor itself runs.
    pub fn passes_through(self) -> bool {
        self != NodeState::Active
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeState::Uninstantiated => "uninstantiated",
            NodeState::Active => "active",
            NodeState::Bypassed => "bypassed",
            NodeState::Disabled => "disabled",
        })
    }
}

/// Atomic state shared between a slot and the control thread.
#[derive(Debug)]
pub struct NodeStatus {
    state: AtomicU8,
    faults: AtomicU32,
}

impl NodeStatus {
    /// New status in [`NodeState::Uninstantiated`].
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(NodeState::Uninstantiated as u8),
            faults: AtomicU32::new(0),
        }
    }

    /// Current state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of faults since creation.
    pub fn fault_count(&self) -> u32 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Switch between Active and Bypassed.
    ///
    /// Requesting the state the node is already in succeeds. Any other
    /// starting state fails with [`GraphError::InvalidTransition`].
    pub fn set_bypassed(&self, bypassed: bool) -> Result<(), GraphError> {
        let (from, to) = if bypassed {
            (NodeState::Active, NodeState::Bypassed)
        } else {
            (NodeState::Bypassed, NodeState::Active)
        };
        match self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(current) => {
                let current = NodeState::from_u8(current);
                if current == to {
                    Ok(())
                } else {
                    Err(GraphError::InvalidTransition { from: current, to })
                }
            }
        }
    }

    fn store(&self, state: NodeState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn mark_faulted(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        self.store(NodeState::Disabled);
    }
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of running a slot for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The processor ran.
    Processed,
    /// The node was bypassed, uninstantiated or disabled.
    PassedThrough,
    /// The processor failed this cycle and is now disabled.
    Faulted(NodeFault),
}

/// Owns a processor and its lifecycle.
pub struct NodeSlot<P> {
    processor: P,
    status: Arc<NodeStatus>,
}

impl<P: ProcessorNode> NodeSlot<P> {
    /// Wrap a processor. It starts uninstantiated.
    pub fn new(processor: P) -> Self {
        Self {
            processor,
            status: Arc::new(NodeStatus::new()),
        }
    }

    /// Shared status handle.
    pub fn status(&self) -> &Arc<NodeStatus> {
        &self.status
    }

    /// Current state.
    pub fn state(&self) -> NodeState {
        self.status.state()
    }

    /// The wrapped processor.
    pub fn processor(&self) -> &P {
        &self.processor
    }

    /// The wrapped processor, mutably.
    pub fn processor_mut(&mut self) -> &mut P {
        &mut self.processor
    }

    /// Unwrap the processor.
    pub fn into_inner(self) -> P {
        self.processor
    }

    /// Instantiate and move to Active. No-op when already Active or Bypassed.
    ///
    /// A panic inside the processor's `instantiate` is reported as a fault.
    pub fn instantiate(&mut self, config: &ProcessConfig) -> Result<(), NodeFault> {
        if matches!(self.state(), NodeState::Active | NodeState::Bypassed) {
            return Ok(());
        }
        let processor = &mut self.processor;
        let result = panic::catch_unwind(AssertUnwindSafe(|| -> Result<(), NodeFault> {
            processor.instantiate(config)?;
            processor.reset();
            Ok(())
        }))
        .unwrap_or_else(|payload| Err(fault_from_panic(payload)));
        if result.is_ok() {
            self.status.store(NodeState::Active);
        }
        result
    }

    /// Release resources and return to Uninstantiated.
    pub fn deactivate(&mut self) {
        if self.state() != NodeState::Uninstantiated {
            self.processor.deactivate();
        }
        self.status.store(NodeState::Uninstantiated);
    }

    /// Switch between Active and Bypassed.
    pub fn set_bypassed(&self, bypassed: bool) -> Result<(), GraphError> {
        self.status.set_bypassed(bypassed)
    }

    /// Run one cycle.
    ///
    /// Active processors run inside `catch_unwind`. An error or panic disables
    /// the node, and this cycle's output becomes the pass-through of its input.
    pub fn run(
        &mut self,
        frames: usize,
        sample_rate: f32,
        inputs: &[Port],
        outputs: &mut [Port],
    ) -> RunOutcome {
        if self.state() != NodeState::Active {
            pass_through(inputs, outputs, frames);
            return RunOutcome::PassedThrough;
        }

        let processor = &mut self.processor;
        let result = {
            let mut ctx = ProcessContext::new(frames, sample_rate, inputs, outputs);
            panic::catch_unwind(AssertUnwindSafe(|| processor.process(&mut ctx)))
        };
        let fault = match result {
            Ok(Ok(())) => return RunOutcome::Processed,
            Ok(Err(fault)) => fault,
            Err(payload) => fault_from_panic(payload),
        };

        self.status.mark_faulted();
        pass_through(inputs, outputs, frames);
        RunOutcome::Faulted(fault)
    }
}

fn fault_from_panic(payload: Box<dyn Any + Send>) -> NodeFault {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        NodeFault::new(*msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        NodeFault::owned(msg.clone())
    } else {
        NodeFault::new("processor panicked")
    }
}

const fn kind_slot(kind: PortType) -> usize {
    match kind {
        PortType::Audio => 0,
        PortType::Midi => 1,
        PortType::Cv => 2,
        PortType::Control => 3,
    }
}

/// Route the k-th input of each type to the k-th output of that type.
///
/// Outputs with no matching input are silenced. Control outputs keep their value.
pub(crate) fn pass_through(inputs: &[Port], outputs: &mut [Port], frames: usize) {
    let mut seen = [0usize; 4];
    for out in outputs.iter_mut() {
        let kind = out.kind();
        if kind == PortType::Control {
            continue;
        }
        let ordinal = seen[kind_slot(kind)];
        seen[kind_slot(kind)] += 1;
        match inputs.iter().filter(|p| p.kind() == kind).nth(ordinal) {
            Some(src) => out.copy_from(src, frames),
            None => out.clear(frames),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{PortDescriptor, PortId};

    struct Doubler {
        fail_after: Option<usize>,
        panic_on_run: bool,
        runs: usize,
    }

    impl Doubler {
        fn new() -> Self {
            Self {
                fail_after: None,
                panic_on_run: false,
                runs: 0,
            }
        }
    }

    impl ProcessorNode for Doubler {
        fn kind(&self) -> &str {
            "doubler"
        }

        fn ports(&self) -> Vec<PortDescriptor> {
            vec![
                PortDescriptor::audio_in("in", "In"),
                PortDescriptor::audio_out("out", "Out"),
                PortDescriptor::audio_out("aux", "Aux"),
            ]
        }

        fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
            self.runs += 1;
            if self.panic_on_run {
                panic!("plugin exploded");
            }
            if self.fail_after.is_some_and(|n| self.runs > n) {
                return Err(NodeFault::new("plugin crashed"));
            }
            let input = ctx.input(0);
            for (o, i) in ctx.output(0).iter_mut().zip(input) {
                *o = *i * 2.0;
            }
            ctx.output(1).fill(9.0);
            Ok(())
        }
    }

    fn ports(values: &[f32]) -> (Vec<Port>, Vec<Port>) {
        let mut src = Port::new(PortId(0), PortDescriptor::audio_out("s", "S"), 4, 4);
        src.write(values).unwrap();
        let mut input = Port::new(PortId(1), PortDescriptor::audio_in("in", "In"), 4, 4);
        input.copy_from(&src, 4);
        let outputs = vec![
            Port::new(PortId(2), PortDescriptor::audio_out("out", "Out"), 4, 4),
            Port::new(PortId(3), PortDescriptor::audio_out("aux", "Aux"), 4, 4),
        ];
        (vec![input], outputs)
    }

    #[test]
    fn uninstantiated_passes_through() {
        let mut slot = NodeSlot::new(Doubler::new());
        let (inputs, mut outputs) = ports(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(slot.run(4, 48_000.0, &inputs, &mut outputs), RunOutcome::PassedThrough);
        assert_eq!(outputs[0].read(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(outputs[1].read(), &[0.0; 4]);
    }

    #[test]
    fn active_processes_and_bypass_passes_through() {
        let mut slot = NodeSlot::new(Doubler::new());
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (inputs, mut outputs) = ports(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(slot.run(4, 48_000.0, &inputs, &mut outputs), RunOutcome::Processed);
        assert_eq!(outputs[0].read(), &[2.0, 4.0, 6.0, 8.0]);

        slot.set_bypassed(true).unwrap();
        assert_eq!(slot.state(), NodeState::Bypassed);
        slot.run(4, 48_000.0, &inputs, &mut outputs);
        assert_eq!(outputs[0].read(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(outputs[1].read(), &[0.0; 4]);

        slot.set_bypassed(false).unwrap();
        assert_eq!(slot.state(), NodeState::Active);
    }

    #[test]
    fn error_disables_and_passes_through() {
        let mut slot = NodeSlot::new(Doubler {
            fail_after: Some(1),
            ..Doubler::new()
        });
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (inputs, mut outputs) = ports(&[0.5; 4]);
        assert_eq!(slot.run(4, 48_000.0, &inputs, &mut outputs), RunOutcome::Processed);

        let outcome = slot.run(4, 48_000.0, &inputs, &mut outputs);
        assert_eq!(outcome, RunOutcome::Faulted(NodeFault::new("plugin crashed")));
        assert_eq!(slot.state(), NodeState::Disabled);
        assert_eq!(outputs[0].read(), &[0.5; 4]);

        assert_eq!(slot.run(4, 48_000.0, &inputs, &mut outputs), RunOutcome::PassedThrough);
        assert_eq!(slot.processor().runs, 2);
        assert_eq!(slot.status().fault_count(), 1);
    }

    #[test]
    fn panic_is_contained() {
        let mut slot = NodeSlot::new(Doubler {
            panic_on_run: true,
            ..Doubler::new()
        });
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (inputs, mut outputs) = ports(&[0.25; 4]);
        match slot.run(4, 48_000.0, &inputs, &mut outputs) {
            RunOutcome::Faulted(fault) => assert_eq!(fault.message(), "plugin exploded"),
            other => panic!("expected fault, got {other:?}"),
        }
        assert_eq!(slot.state(), NodeState::Disabled);
        assert_eq!(outputs[0].read(), &[0.25; 4]);
    }

    #[test]
    fn disabled_can_be_reinstantiated() {
        let mut slot = NodeSlot::new(Doubler {
            fail_after: Some(0),
            ..Doubler::new()
        });
        slot.instantiate(&ProcessConfig::default()).unwrap();
        let (inputs, mut outputs) = ports(&[1.0; 4]);
        slot.run(4, 48_000.0, &inputs, &mut outputs);
        assert_eq!(slot.state(), NodeState::Disabled);

        slot.deactivate();
        slot.processor_mut().fail_after = None;
        slot.instantiate(&ProcessConfig::default()).unwrap();
        assert_eq!(slot.state(), NodeState::Active);
    }

    #[test]
    fn invalid_transitions_rejected() {
        let slot = NodeSlot::new(Doubler::new());
        let err = slot.set_bypassed(true).unwrap_err();
        assert_eq!(
            err,
            GraphError::InvalidTransition {
                from: NodeState::Uninstantiated,
                to: NodeState::Bypassed,
            }
        );
    }

    #[test]
    fn bypass_is_idempotent() {
        let mut slot = NodeSlot::new(Doubler::new());
        slot.instantiate(&ProcessConfig::default()).unwrap();
        slot.set_bypassed(true).unwrap();
        slot.set_bypassed(true).unwrap();
        slot.set_bypassed(false).unwrap();
        slot.set_bypassed(false).unwrap();
        assert_eq!(slot.state(), NodeState::Active);
    }
}
