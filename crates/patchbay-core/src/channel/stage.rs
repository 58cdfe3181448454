//! A processor hosted inside a channel strip slot.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::error::NodeFault;
use crate::midi::MidiBuffer;
use crate::port::{ControlValue, Port, PortDescriptor, PortDirection, PortFlags, PortId, PortType};
use crate::processor::{NodeSlot, NodeStatus, ProcessConfig, ProcessorNode, RunOutcome};
use crate::track::{StageKind, StageRef};

/// Where a stage's ports sit in its own port lists.
#[derive(Debug, Default, Clone)]
struct StageIo {
    audio_in: Vec<usize>,
    sidechain_in: Vec<usize>,
    midi_in: Option<usize>,
    audio_out: Vec<usize>,
    midi_out: Option<usize>,
}

impl StageIo {
    fn map(inputs: &[Port], outputs: &[Port]) -> Self {
        let mut io = StageIo::default();
        for (i, port) in inputs.iter().enumerate() {
            match port.kind() {
                PortType::Audio if port.descriptor().flags.contains(PortFlags::SIDECHAIN) => {
                    io.sidechain_in.push(i);
                }
                PortType::Audio => io.audio_in.push(i),
                PortType::Midi if io.midi_in.is_none() => io.midi_in = Some(i),
                _ => {}
            }
        }
        for (i, port) in outputs.iter().enumerate() {
            match port.kind() {
                PortType::Audio => io.audio_out.push(i),
                PortType::Midi if io.midi_out.is_none() => io.midi_out = Some(i),
                _ => {}
            }
        }
        io
    }
}

/// The strip's running signal, handed from stage to stage.
pub(crate) struct StripBus<'a> {
    pub(crate) left: &'a mut [f32],
    pub(crate) right: &'a mut [f32],
    pub(crate) midi: &'a mut MidiBuffer,
    pub(crate) sidechain_l: &'a [f32],
    pub(crate) sidechain_r: &'a [f32],
}

/// An instantiated processor with private ports.
///
/// Stage ports never appear in the routing graph. The strip feeds them from
/// its running signal; only control inputs are exported (prefixed with the
/// slot name) so they can be automated.
pub(crate) struct Stage {
    at: StageRef,
    slot: NodeSlot<Box<dyn ProcessorNode>>,
    inputs: Vec<Port>,
    outputs: Vec<Port>,
    io: StageIo,
}

impl Stage {
    /// Instantiate `processor` for slot `at`.
    pub(crate) fn new(
        at: StageRef,
        processor: Box<dyn ProcessorNode>,
        config: &ProcessConfig,
    ) -> Result<Self, NodeFault> {
        let mut slot = NodeSlot::new(processor);
        slot.instantiate(config)?;
        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for desc in slot.processor().ports() {
            let port = Port::new(PortId::detached(), desc, config.max_block, config.midi_capacity);
            match port.direction() {
                PortDirection::Input => inputs.push(port),
                PortDirection::Output => outputs.push(port),
            }
        }
        let io = StageIo::map(&inputs, &outputs);
        Ok(Self {
            at,
            slot,
            inputs,
            outputs,
            io,
        })
    }

    /// Whether the processor's port layout suits its slot.
    pub(crate) fn fits(&self) -> bool {
        match self.at.stage {
            StageKind::MidiFx => self.io.midi_in.is_some() && self.io.midi_out.is_some(),
            StageKind::Instrument => self.io.midi_in.is_some() && !self.io.audio_out.is_empty(),
            StageKind::Insert => !self.io.audio_out.is_empty(),
        }
    }

    pub(crate) fn at(&self) -> StageRef {
        self.at
    }

    pub(crate) fn kind(&self) -> &str {
        self.slot.processor().kind()
    }

    pub(crate) fn status(&self) -> &Arc<NodeStatus> {
        self.slot.status()
    }

    /// Control inputs exported on the strip, sharing this stage's values.
    pub(crate) fn exported_controls(&self) -> Vec<PortDescriptor> {
        let prefix = self.at.prefix();
        self.inputs
            .iter()
            .filter_map(|p| {
                let value = p.control()?;
                Some(
                    p.descriptor()
                        .prefixed(&prefix)
                        .with_shared_value(Arc::clone(value)),
                )
            })
            .collect()
    }

    /// Unprefixed control symbols and their values.
    pub(crate) fn controls(&self) -> Vec<(String, Arc<ControlValue>)> {
        self.inputs
            .iter()
            .filter_map(|p| Some((p.symbol().to_owned(), Arc::clone(p.control()?))))
            .collect()
    }

    pub(crate) fn reset(&mut self) {
        self.slot.processor_mut().reset();
    }

    /// Feed the running signal in, run, and write the result back.
    pub(crate) fn run(&mut self, frames: usize, sample_rate: f32, bus: &mut StripBus<'_>) -> RunOutcome {
        let audio_src: [&[f32]; 2] = [&*bus.left, &*bus.right];
        for (k, &i) in self.io.audio_in.iter().enumerate() {
            if let Some(buf) = self.inputs[i].signal_mut() {
                copy_into(buf, audio_src[k.min(1)], frames);
            }
        }
        let sidechain_src: [&[f32]; 2] = [bus.sidechain_l, bus.sidechain_r];
        for (k, &i) in self.io.sidechain_in.iter().enumerate() {
            if let Some(buf) = self.inputs[i].signal_mut() {
                copy_into(buf, sidechain_src[k.min(1)], frames);
            }
        }
        if let Some(i) = self.io.midi_in
            && let Some(buf) = self.inputs[i].midi_mut()
        {
            buf.copy_from(bus.midi);
        }

        let outcome = self.slot.run(frames, sample_rate, &self.inputs, &mut self.outputs);

        match self.io.audio_out.as_slice() {
            [] => {}
            [mono] => {
                let src = self.outputs[*mono].read();
                copy_into(bus.left, src, frames);
                copy_into(bus.right, src, frames);
            }
            [l, r, ..] => {
                copy_into(bus.left, self.outputs[*l].read(), frames);
                copy_into(bus.right, self.outputs[*r].read(), frames);
            }
        }
        if let Some(i) = self.io.midi_out
            && let Some(buf) = self.outputs[i].midi()
        {
            bus.midi.copy_from(buf);
        }
        outcome
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.slot.deactivate();
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("at", &self.at)
            .field("kind", &self.kind())
            .field("state", &self.slot.state())
            .finish_non_exhaustive()
    }
}

/// A stage shared by every strip built around it.
///
/// Rebuilding a strip carries its stages over by handle, so the processor
/// keeps its state. The exported descriptors are taken once, up front; only
/// the cycle that runs the strip ever locks the stage.
#[derive(Clone)]
pub(crate) struct StageHandle {
    at: StageRef,
    exported: Arc<[PortDescriptor]>,
    stage: Arc<Mutex<Stage>>,
}

impl StageHandle {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            at: stage.at(),
            exported: stage.exported_controls().into(),
            stage: Arc::new(Mutex::new(stage)),
        }
    }

    pub(crate) fn at(&self) -> StageRef {
        self.at
    }

    pub(crate) fn exported_controls(&self) -> &[PortDescriptor] {
        &self.exported
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Stage> {
        self.stage.lock()
    }
}

impl fmt::Debug for StageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandle")
            .field("at", &self.at)
            .field("exported", &self.exported.len())
            .finish_non_exhaustive()
    }
}

fn copy_into(dst: &mut [f32], src: &[f32], frames: usize) {
    let n = frames.min(dst.len());
    let m = n.min(src.len());
    dst[..m].copy_from_slice(&src[..m]);
    dst[m..n].fill(0.0);
}
