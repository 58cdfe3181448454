//! Processor nodes: the units of signal transformation.
//!
//! Every node in the graph (channel strips, engine-owned utilities, hosted
//! plugins) implements [`ProcessorNode`]. Plugin formats plug in as adapters
//! implementing the same trait; the graph never sees format specifics.
//!
//! Processors never manage their own lifecycle. A [`NodeSlot`] wraps each one
//! and owns the state machine, bypass and fault containment:
//!
//! ```text
//! Uninstantiated ──instantiate──▶ Active ◀──▶ Bypassed
//!                                   │
//!                              fault/panic
//!                                   ▼
//!                                Disabled ──reinstantiate──▶ Active
//! ```

pub mod builtin;
pub mod registry;
mod slot;

pub use registry::{ProcessorCategory, ProcessorDescriptor, ProcessorRegistry};
pub use slot::{NodeSlot, NodeState, NodeStatus, RunOutcome};

use crate::error::NodeFault;
use crate::midi::MidiBuffer;
use crate::port::{Port, PortDescriptor};

/// Fixed parameters a processor is instantiated with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessConfig {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Largest block `process` will be asked for.
    pub max_block: usize,
    /// Events per MIDI port buffer.
    pub midi_capacity: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block: 512,
            midi_capacity: 512,
        }
    }
}

/// A unit that reads input ports, computes, and writes output ports.
///
/// `ports()` defines the layout: inputs and outputs are indexed in the order
/// they appear (separately per direction). `process` must not allocate,
/// lock or block; everything it needs is prepared in `instantiate`.
pub trait ProcessorNode: Send {
    /// Registry id of this processor type (e.g. `"gain"`).
    fn kind(&self) -> &str;

    /// Port layout.
    fn ports(&self) -> Vec<PortDescriptor>;

    /// Prepare for processing. May allocate. Called off the real-time thread.
    fn instantiate(&mut self, config: &ProcessConfig) -> Result<(), NodeFault> {
        let _ = config;
        Ok(())
    }

    /// Release processing resources. Called off the real-time thread.
    fn deactivate(&mut self) {}

    /// Process `ctx.frames()` frames.
    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault>;

    /// Clear internal state (voices, envelopes, phases).
    fn reset(&mut self) {}
}

impl<P: ProcessorNode + ?Sized> ProcessorNode for Box<P> {
    fn kind(&self) -> &str {
        (**self).kind()
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        (**self).ports()
    }

    fn instantiate(&mut self, config: &ProcessConfig) -> Result<(), NodeFault> {
        (**self).instantiate(config)
    }

    fn deactivate(&mut self) {
        (**self).deactivate();
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        (**self).process(ctx)
    }

    fn reset(&mut self) {
        (**self).reset();
    }
}

/// Per-cycle view of a node's ports.
///
/// Input accessors return slices tied to the cycle (`'a`), so an input can be
/// held while an output is borrowed mutably.
pub struct ProcessContext<'a> {
    frames: usize,
    sample_rate: f32,
    inputs: &'a [Port],
    outputs: &'a mut [Port],
}

impl<'a> ProcessContext<'a> {
    /// Build a context over gathered inputs and the node's outputs.
    pub fn new(frames: usize, sample_rate: f32, inputs: &'a [Port], outputs: &'a mut [Port]) -> Self {
        Self {
            frames,
            sample_rate,
            inputs,
            outputs,
        }
    }

    /// Frames to process this cycle.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Sample rate in Hz.
    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// All input ports.
    pub fn inputs(&self) -> &'a [Port] {
        self.inputs
    }

    /// Samples of input `index` for this cycle; empty for non-signal or missing ports.
    #[inline]
    pub fn input(&self, index: usize) -> &'a [f32] {
        let frames = self.frames;
        self.inputs
            .get(index)
            .map_or(&[][..], |p| {
                let buf = p.read();
                &buf[..frames.min(buf.len())]
            })
    }

    /// Effective value of control input `index`, or 0.0.
    #[inline]
    pub fn control(&self, index: usize) -> f32 {
        self.inputs
            .get(index)
            .and_then(Port::value)
            .unwrap_or(0.0)
    }

    /// Toggle state of control input `index`.
    #[inline]
    pub fn toggled(&self, index: usize) -> bool {
        self.inputs
            .get(index)
            .and_then(Port::control)
            .is_some_and(|c| c.is_toggled())
    }

    /// Events of MIDI input `index`.
    #[inline]
    pub fn midi_in(&self, index: usize) -> Option<&'a MidiBuffer> {
        self.inputs.get(index).and_then(Port::midi)
    }

    /// Mutable samples of output `index` for this cycle; empty if not a signal port.
    #[inline]
    pub fn output(&mut self, index: usize) -> &mut [f32] {
        let frames = self.frames;
        match self.outputs.get_mut(index).and_then(Port::signal_mut) {
            Some(buf) => {
                let n = frames.min(buf.len());
                &mut buf[..n]
            }
            None => &mut [],
        }
    }

    /// Two distinct signal outputs at once (e.g. left and right).
    pub fn output_pair(&mut self, a: usize, b: usize) -> (&mut [f32], &mut [f32]) {
        let frames = self.frames;
        if a == b || a >= self.outputs.len() || b >= self.outputs.len() {
            return (&mut [], &mut []);
        }
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        let (head, tail) = self.outputs.split_at_mut(hi);
        let first = head[lo].signal_mut().map_or(&mut [][..], |buf| {
            let n = frames.min(buf.len());
            &mut buf[..n]
        });
        let second = tail[0].signal_mut().map_or(&mut [][..], |buf| {
            let n = frames.min(buf.len());
            &mut buf[..n]
        });
        if a < b { (first, second) } else { (second, first) }
    }

    /// Event buffer of MIDI output `index`.
    #[inline]
    pub fn midi_out(&mut self, index: usize) -> Option<&mut MidiBuffer> {
        self.outputs.get_mut(index).and_then(Port::midi_mut)
    }

    /// Set the value of control output `index`.
    pub fn set_control(&mut self, index: usize, value: f32) {
        if let Some(c) = self.outputs.get(index).and_then(Port::control) {
            c.set_effective(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{ControlRange, PortId};

    #[test]
    fn context_slices_to_frames() {
        let mut input = Port::new(PortId(0), PortDescriptor::audio_out("x", "X"), 8, 4);
        input.write(&[1.0; 8]).unwrap();
        let inputs = vec![input];
        let mut outputs = vec![
            Port::new(PortId(1), PortDescriptor::audio_out("l", "L"), 8, 4),
            Port::new(PortId(2), PortDescriptor::audio_out("r", "R"), 8, 4),
        ];
        let mut ctx = ProcessContext::new(3, 48_000.0, &inputs, &mut outputs);
        let held = ctx.input(0);
        let (l, r) = ctx.output_pair(0, 1);
        l.copy_from_slice(held);
        r.fill(-1.0);
        assert_eq!(held.len(), 3);
        assert_eq!(&outputs[0].read()[..4], &[1.0, 1.0, 1.0, 0.0]);
        assert_eq!(&outputs[1].read()[..4], &[-1.0, -1.0, -1.0, 0.0]);
    }

    #[test]
    fn output_pair_reversed_order() {
        let inputs = Vec::new();
        let mut outputs = vec![
            Port::new(PortId(1), PortDescriptor::audio_out("l", "L"), 4, 4),
            Port::new(PortId(2), PortDescriptor::audio_out("r", "R"), 4, 4),
        ];
        let mut ctx = ProcessContext::new(4, 48_000.0, &inputs, &mut outputs);
        let (r, l) = ctx.output_pair(1, 0);
        r.fill(2.0);
        l.fill(1.0);
        assert_eq!(outputs[0].read()[0], 1.0);
        assert_eq!(outputs[1].read()[0], 2.0);
    }

    #[test]
    fn missing_ports_are_harmless() {
        let control = Port::new(
            PortId(0),
            PortDescriptor::control_in("g", "G", ControlRange::new(0.0, 2.0, 1.5)),
            4,
            4,
        );
        let inputs = vec![control];
        let mut outputs = Vec::new();
        let mut ctx = ProcessContext::new(4, 48_000.0, &inputs, &mut outputs);
        assert_eq!(ctx.control(0), 1.5);
        assert_eq!(ctx.control(7), 0.0);
        assert!(ctx.input(0).is_empty());
        assert!(ctx.output(0).is_empty());
        assert!(ctx.midi_out(0).is_none());
    }
}
