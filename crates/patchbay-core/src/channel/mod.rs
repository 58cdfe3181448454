//! Channel strips: the processor node behind every track.
//!
//! A strip runs a fixed pipeline each cycle:
//!
//! ```text
//! input ─▶ MIDI fx ─▶ instrument ─▶ inserts 0-4 ─▶ pre tap ─▶ fader ─▶ inserts 5-8 ─▶ out
//!                                                     │                     │
//!                                               sends 0-5               sends 6-8
//! ```
//!
//! Stages are hosted processors with private ports; their control inputs are
//! re-exported on the strip with a slot prefix (`insert3.gain_db`). Faults in a
//! stage disable that stage only. The strip itself keeps running.
//!
//! A strip's shape is fixed once it is built. Loading or removing a stage
//! builds a new strip around the same stage handles and fader controls.

mod fader;
mod send;
mod stage;

pub use fader::FaderControls;

pub(crate) use fader::Fader;
pub(crate) use send::ChannelSend;
pub(crate) use stage::{Stage, StageHandle};

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::error::NodeFault;
use crate::events::{EngineEvent, EventSender};
use crate::graph::NodeId;
use crate::midi::MidiBuffer;
use crate::mixer::MixFlags;
use crate::pan::PanPolicy;
use crate::port::{ControlValue, PortDescriptor};
use crate::processor::{ProcessConfig, ProcessContext, ProcessorNode, RunOutcome};
use crate::track::{
    INSERT_SLOTS, MIDI_FX_SLOTS, PRE_FADER_INSERTS, StageKind, StageRef, TrackKind,
};

use stage::StripBus;

/// Fixed port positions of a strip, by track kind.
#[derive(Debug, Clone, Copy, Default)]
struct StripLayout {
    in_l: Option<usize>,
    in_r: Option<usize>,
    midi_in: Option<usize>,
    sc_l: Option<usize>,
    sc_r: Option<usize>,
    out_l: Option<usize>,
    out_r: Option<usize>,
    midi_out: Option<usize>,
    listen_l: Option<usize>,
    listen_r: Option<usize>,
    sends_base: usize,
}

impl StripLayout {
    fn for_kind(kind: TrackKind) -> (Self, Vec<PortDescriptor>, Vec<PortDescriptor>) {
        let mut layout = StripLayout::default();
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        if kind.has_audio_input() {
            layout.in_l = Some(inputs.len());
            inputs.push(PortDescriptor::audio_in("in_l", "In L"));
            layout.in_r = Some(inputs.len());
            inputs.push(PortDescriptor::audio_in("in_r", "In R"));
        }
        if kind.has_midi() {
            layout.midi_in = Some(inputs.len());
            inputs.push(PortDescriptor::midi_in("midi_in", "MIDI In"));
        }
        if kind.has_audio() {
            layout.sc_l = Some(inputs.len());
            inputs.push(PortDescriptor::audio_in("sc_l", "Sidechain L").sidechain());
            layout.sc_r = Some(inputs.len());
            inputs.push(PortDescriptor::audio_in("sc_r", "Sidechain R").sidechain());

            layout.out_l = Some(outputs.len());
            outputs.push(PortDescriptor::audio_out("out_l", "Out L"));
            layout.out_r = Some(outputs.len());
            outputs.push(PortDescriptor::audio_out("out_r", "Out R"));
            layout.listen_l = Some(outputs.len());
            outputs.push(PortDescriptor::audio_out("listen_l", "Listen L"));
            layout.listen_r = Some(outputs.len());
            outputs.push(PortDescriptor::audio_out("listen_r", "Listen R"));
        } else {
            layout.midi_out = Some(outputs.len());
            outputs.push(PortDescriptor::midi_out("midi_out", "MIDI Out"));
        }
        layout.sends_base = outputs.len();
        (layout, inputs, outputs)
    }
}

/// Shared handles a strip is built from.
#[derive(Debug, Clone)]
pub(crate) struct StripParts {
    pub(crate) kind: TrackKind,
    pub(crate) controls: FaderControls,
    pub(crate) mix: Arc<MixFlags>,
    pub(crate) sends: Vec<(Arc<ControlValue>, Arc<AtomicBool>)>,
    pub(crate) pan: PanPolicy,
    pub(crate) fade_frames: usize,
}

/// Processor node of one track.
pub(crate) struct ChannelStrip {
    kind: TrackKind,
    node: NodeId,
    events: EventSender,
    layout: StripLayout,
    fixed_inputs: Vec<PortDescriptor>,
    fixed_outputs: Vec<PortDescriptor>,
    fader: Fader,
    sends: Vec<ChannelSend>,
    midi_fx: Vec<Option<StageHandle>>,
    instrument: Option<StageHandle>,
    inserts: Vec<Option<StageHandle>>,
    work_l: Vec<f32>,
    work_r: Vec<f32>,
    pre_l: Vec<f32>,
    pre_r: Vec<f32>,
    listen_l: Vec<f32>,
    listen_r: Vec<f32>,
    midi: MidiBuffer,
}

impl ChannelStrip {
    pub(crate) fn new(parts: StripParts, node: NodeId, events: EventSender) -> Self {
        let (layout, fixed_inputs, fixed_outputs) = StripLayout::for_kind(parts.kind);
        let sends = parts
            .sends
            .into_iter()
            .take(parts.kind.send_slots())
            .enumerate()
            .map(|(slot, (amount, enabled))| ChannelSend::new(slot, amount, enabled, parts.fade_frames))
            .collect();
        let stage_slots = |stage: StageKind, count: usize| {
            if parts.kind.has_stage(stage) {
                (0..count).map(|_| None).collect()
            } else {
                Vec::new()
            }
        };
        Self {
            kind: parts.kind,
            node,
            events,
            layout,
            fixed_inputs,
            fixed_outputs,
            fader: Fader::new(parts.controls, parts.mix, parts.pan, parts.fade_frames),
            sends,
            midi_fx: stage_slots(StageKind::MidiFx, MIDI_FX_SLOTS),
            instrument: None,
            inserts: stage_slots(StageKind::Insert, INSERT_SLOTS),
            work_l: Vec::new(),
            work_r: Vec::new(),
            pre_l: Vec::new(),
            pre_r: Vec::new(),
            listen_l: Vec::new(),
            listen_r: Vec::new(),
            midi: MidiBuffer::with_capacity(0),
        }
    }

    /// Graph node this strip reports faults for.
    pub(crate) fn bind(&mut self, node: NodeId) {
        self.node = node;
    }

    /// Put `stage` into its slot, replacing what was there.
    ///
    /// Hands the stage back if the slot does not exist on this strip.
    pub(crate) fn place(&mut self, stage: StageHandle) -> Result<(), StageHandle> {
        match self.stage_slot(stage.at()) {
            Some(slot) => {
                *slot = Some(stage);
                Ok(())
            }
            None => Err(stage),
        }
    }

    fn stage_slot(&mut self, at: StageRef) -> Option<&mut Option<StageHandle>> {
        match at.stage {
            StageKind::MidiFx => self.midi_fx.get_mut(at.slot),
            StageKind::Instrument if at.slot == 0 && self.kind.has_stage(StageKind::Instrument) => {
                Some(&mut self.instrument)
            }
            StageKind::Instrument => None,
            StageKind::Insert => self.inserts.get_mut(at.slot),
        }
    }

    fn stages(&self) -> impl Iterator<Item = &StageHandle> {
        self.midi_fx
            .iter()
            .chain(std::iter::once(&self.instrument))
            .chain(self.inserts.iter())
            .flatten()
    }
}

fn report(events: &EventSender, node: NodeId, at: StageRef, outcome: RunOutcome) {
    if let RunOutcome::Faulted(fault) = outcome {
        events.post(EngineEvent::NodeFault {
            node,
            stage: Some(at),
            fault,
        });
    }
}

fn copy_prefix(dst: &mut [f32], src: &[f32]) {
    let n = dst.len().min(src.len());
    dst[..n].copy_from_slice(&src[..n]);
    dst[n..].fill(0.0);
}

impl ProcessorNode for ChannelStrip {
    fn kind(&self) -> &str {
        "channel"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        let mut ports = self.fixed_inputs.clone();
        ports.extend(self.fixed_outputs.iter().cloned());
        ports.extend(self.fader.controls().descriptors());
        for send in &self.sends {
            ports.push(send.control_descriptor());
            ports.extend(send.output_descriptors());
        }
        for stage in self.stages() {
            ports.extend(stage.exported_controls().iter().cloned());
        }
        ports
    }

    fn instantiate(&mut self, config: &ProcessConfig) -> Result<(), NodeFault> {
        for buf in [
            &mut self.work_l,
            &mut self.work_r,
            &mut self.pre_l,
            &mut self.pre_r,
            &mut self.listen_l,
            &mut self.listen_r,
        ] {
            *buf = vec![0.0; config.max_block];
        }
        self.midi = MidiBuffer::with_capacity(config.midi_capacity);
        Ok(())
    }

    fn reset(&mut self) {
        self.fader.reset();
        for send in &mut self.sends {
            send.reset();
        }
        for stage in self.stages() {
            stage.lock().reset();
        }
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let frames = ctx.frames();
        let sample_rate = ctx.sample_rate();
        if self.work_l.len() < frames {
            return Err(NodeFault::new("channel strip block exceeds its buffers"));
        }
        let layout = self.layout;
        let node = self.node;

        let left = &mut self.work_l[..frames];
        let right = &mut self.work_r[..frames];
        match (layout.in_l, layout.in_r) {
            (Some(l), Some(r)) => {
                copy_prefix(left, ctx.input(l));
                copy_prefix(right, ctx.input(r));
            }
            _ => {
                left.fill(0.0);
                right.fill(0.0);
            }
        }
        self.midi.clear();
        if let Some(i) = layout.midi_in
            && let Some(src) = ctx.midi_in(i)
        {
            self.midi.copy_from(src);
        }
        let sidechain_l = layout.sc_l.map_or(&[][..], |i| ctx.input(i));
        let sidechain_r = layout.sc_r.map_or(&[][..], |i| ctx.input(i));

        let mut bus = StripBus {
            left,
            right,
            midi: &mut self.midi,
            sidechain_l,
            sidechain_r,
        };

        for stage in self.midi_fx.iter().flatten().chain(&self.instrument) {
            let outcome = stage.lock().run(frames, sample_rate, &mut bus);
            report(&self.events, node, stage.at(), outcome);
        }
        let pre_count = PRE_FADER_INSERTS.min(self.inserts.len());
        let (pre, post) = self.inserts.split_at(pre_count);
        for stage in pre.iter().flatten() {
            let outcome = stage.lock().run(frames, sample_rate, &mut bus);
            report(&self.events, node, stage.at(), outcome);
        }

        let pre_l = &mut self.pre_l[..frames];
        let pre_r = &mut self.pre_r[..frames];
        pre_l.copy_from_slice(bus.left);
        pre_r.copy_from_slice(bus.right);

        if !self.kind.has_audio() {
            self.fader.process_midi(bus.midi);
            if let Some(i) = layout.midi_out
                && let Some(out) = ctx.midi_out(i)
            {
                out.copy_from(bus.midi);
            }
            return Ok(());
        }

        let listen_l = &mut self.listen_l[..frames];
        let listen_r = &mut self.listen_r[..frames];
        self.fader
            .process_audio(bus.left, bus.right, listen_l, listen_r);

        for stage in post.iter().flatten() {
            let outcome = stage.lock().run(frames, sample_rate, &mut bus);
            report(&self.events, node, stage.at(), outcome);
        }

        for (slot, send) in self.sends.iter_mut().enumerate() {
            let (src_l, src_r) = if send.is_pre_fader() {
                (&*pre_l, &*pre_r)
            } else {
                (&*bus.left, &*bus.right)
            };
            let base = layout.sends_base + slot * 2;
            let (out_l, out_r) = ctx.output_pair(base, base + 1);
            send.process(src_l, src_r, out_l, out_r);
        }

        if let (Some(l), Some(r)) = (layout.out_l, layout.out_r) {
            let (out_l, out_r) = ctx.output_pair(l, r);
            copy_prefix(out_l, bus.left);
            copy_prefix(out_r, bus.right);
        }
        if let (Some(l), Some(r)) = (layout.listen_l, layout.listen_r) {
            let (out_l, out_r) = ctx.output_pair(l, r);
            copy_prefix(out_l, listen_l);
            copy_prefix(out_r, listen_r);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_channel;
    use crate::midi::MidiEvent;
    use crate::pan::{PanAlgorithm, PanLaw};
    use crate::port::{Port, PortDirection, PortId};
    use crate::processor::{NodeState, ProcessorRegistry};

    struct Harness {
        strip: ChannelStrip,
        controls: FaderControls,
        sends: Vec<(Arc<ControlValue>, Arc<AtomicBool>)>,
        inputs: Vec<Port>,
        outputs: Vec<Port>,
        config: ProcessConfig,
    }

    impl Harness {
        fn new(kind: TrackKind) -> Self {
            let controls = FaderControls::new();
            let sends: Vec<_> = (0..9)
                .map(|_| (ChannelSend::amount_control(), Arc::new(AtomicBool::new(false))))
                .collect();
            let parts = StripParts {
                kind,
                controls: controls.clone(),
                mix: Arc::new(MixFlags::default()),
                sends: sends.clone(),
                pan: PanPolicy::new(PanAlgorithm::Linear, PanLaw::ZeroDb),
                fade_frames: 0,
            };
            let (events, _rx) = event_channel(8);
            let config = ProcessConfig {
                max_block: 16,
                ..ProcessConfig::default()
            };
            let mut strip = ChannelStrip::new(parts, NodeId(0), events);
            strip.instantiate(&config).unwrap();
            let mut harness = Self {
                strip,
                controls,
                sends,
                inputs: Vec::new(),
                outputs: Vec::new(),
                config,
            };
            harness.relayout();
            harness
        }

        fn relayout(&mut self) {
            self.inputs.clear();
            self.outputs.clear();
            for desc in self.strip.ports() {
                let port = Port::new(PortId::detached(), desc, 16, 16);
                match port.direction() {
                    PortDirection::Input => self.inputs.push(port),
                    PortDirection::Output => self.outputs.push(port),
                }
            }
        }

        fn feed(&mut self, symbol: &str, value: f32) {
            let port = self.inputs.iter_mut().find(|p| p.symbol() == symbol).unwrap();
            port.signal_mut().unwrap().fill(value);
        }

        fn insert(&mut self, at: StageRef, id: &str) {
            let registry = ProcessorRegistry::new();
            let stage = Stage::new(at, registry.create(id).unwrap(), &self.config).unwrap();
            assert!(stage.fits());
            self.strip.place(StageHandle::new(stage)).unwrap();
            self.relayout();
        }

        fn run(&mut self, frames: usize) {
            let mut ctx = ProcessContext::new(frames, 48_000.0, &self.inputs, &mut self.outputs);
            self.strip.process(&mut ctx).unwrap();
        }

        fn out(&self, symbol: &str) -> &[f32] {
            &self.outputs.iter().find(|p| p.symbol() == symbol).unwrap().read()[..4]
        }
    }

    #[test]
    fn audio_strip_layout() {
        let h = Harness::new(TrackKind::Audio);
        let symbols: Vec<&str> = h.outputs.iter().map(Port::symbol).collect();
        assert_eq!(&symbols[..4], &["out_l", "out_r", "listen_l", "listen_r"]);
        assert_eq!(symbols[4], "send0.out_l");
        assert_eq!(symbols[4 + 16], "send8.out_l");
        assert!(h.inputs.iter().any(|p| p.symbol() == "send8.amount"));
        assert!(h.inputs.iter().any(|p| p.symbol() == "amp"));
    }

    #[test]
    fn midi_strip_has_no_audio() {
        let mut h = Harness::new(TrackKind::Midi);
        assert!(h.outputs.iter().all(|p| p.symbol() == "midi_out"));
        let registry = ProcessorRegistry::new();
        let gain = Stage::new(StageRef::insert(0), registry.create("gain").unwrap(), &h.config).unwrap();
        let rejected = h.strip.place(StageHandle::new(gain)).unwrap_err();
        assert_eq!(rejected.at(), StageRef::insert(0));
    }

    #[test]
    fn passes_input_through_fader() {
        let mut h = Harness::new(TrackKind::Audio);
        h.feed("in_l", 0.5);
        h.feed("in_r", 0.25);
        h.controls.amp.set(2.0);
        h.run(4);
        assert_eq!(h.out("out_l"), &[1.0; 4]);
        assert_eq!(h.out("out_r"), &[0.5; 4]);
        assert_eq!(h.out("listen_l"), &[0.0; 4]);
    }

    #[test]
    fn pre_and_post_fader_sends() {
        let mut h = Harness::new(TrackKind::Bus);
        h.feed("in_l", 1.0);
        h.feed("in_r", 1.0);
        h.controls.amp.set(0.5);
        h.sends[0].1.store(true, std::sync::atomic::Ordering::Relaxed);
        h.sends[7].1.store(true, std::sync::atomic::Ordering::Relaxed);
        h.run(4);
        assert_eq!(h.out("send0.out_l"), &[1.0; 4]);
        assert_eq!(h.out("send7.out_l"), &[0.5; 4]);
        assert_eq!(h.out("send3.out_l"), &[0.0; 4]);
    }

    #[test]
    fn insert_order_around_fader() {
        let mut h = Harness::new(TrackKind::Audio);
        h.insert(StageRef::insert(6), "gain");
        h.inputs
            .iter()
            .find(|p| p.symbol() == "insert6.gain_db")
            .unwrap()
            .set_value(-60.0)
            .unwrap();
        h.sends[0].1.store(true, std::sync::atomic::Ordering::Relaxed);
        h.feed("in_l", 1.0);
        h.feed("in_r", 1.0);
        h.run(4);
        assert!(h.out("out_l")[0] < 0.01);
        // pre-fader send taps before the post-fader insert
        assert_eq!(h.out("send0.out_l"), &[1.0; 4]);
    }

    #[test]
    fn instrument_track_renders_midi() {
        let mut h = Harness::new(TrackKind::Instrument);
        h.insert(StageRef::instrument(), "sine_synth");
        h.inputs
            .iter_mut()
            .find(|p| p.symbol() == "midi_in")
            .unwrap()
            .midi_mut()
            .unwrap()
            .push(MidiEvent::note_on(0, 0, 69, 127));
        let mut peak = 0.0f32;
        for _ in 0..8 {
            h.run(16);
            peak = peak.max(crate::math::peak(h.out("out_l")));
        }
        assert!(peak > 0.0);
    }

    #[test]
    fn midi_track_transposes_and_gates() {
        let mut h = Harness::new(TrackKind::Midi);
        h.insert(StageRef::midi_fx(0), "transpose");
        h.inputs
            .iter()
            .find(|p| p.symbol() == "midi_fx0.semitones")
            .unwrap()
            .set_value(12.0)
            .unwrap();
        h.inputs
            .iter_mut()
            .find(|p| p.symbol() == "midi_in")
            .unwrap()
            .midi_mut()
            .unwrap()
            .push(MidiEvent::note_on(0, 0, 60, 100));
        h.run(4);
        let out = h.outputs[0].midi().unwrap();
        assert_eq!(out.events()[0].note(), 72);

        h.controls.mute.set(1.0);
        h.run(4);
        assert!(h.outputs[0].midi().unwrap().is_empty());
    }

    struct Exploding;

    impl ProcessorNode for Exploding {
        fn kind(&self) -> &str {
            "exploding"
        }
        fn ports(&self) -> Vec<PortDescriptor> {
            vec![
                PortDescriptor::audio_in("in", "In"),
                PortDescriptor::audio_out("out", "Out"),
            ]
        }
        fn process(&mut self, _: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
            Err(NodeFault::new("boom"))
        }
    }

    #[test]
    fn stage_fault_is_contained_and_reported() {
        let controls = FaderControls::new();
        let (events, rx) = event_channel(8);
        let parts = StripParts {
            kind: TrackKind::Audio,
            controls,
            mix: Arc::new(MixFlags::default()),
            sends: Vec::new(),
            pan: PanPolicy::new(PanAlgorithm::Linear, PanLaw::ZeroDb),
            fade_frames: 0,
        };
        let config = ProcessConfig {
            max_block: 8,
            ..ProcessConfig::default()
        };
        let mut strip = ChannelStrip::new(parts, NodeId(5), events);
        strip.instantiate(&config).unwrap();
        let stage = StageHandle::new(Stage::new(StageRef::insert(1), Box::new(Exploding), &config).unwrap());
        strip.place(stage.clone()).unwrap();

        let (mut inputs, mut outputs) = (Vec::new(), Vec::new());
        for desc in strip.ports() {
            let port = Port::new(PortId::detached(), desc, 8, 8);
            match port.direction() {
                PortDirection::Input => inputs.push(port),
                PortDirection::Output => outputs.push(port),
            }
        }
        inputs[0].signal_mut().unwrap().fill(0.5);
        inputs[1].signal_mut().unwrap().fill(0.5);
        let mut ctx = ProcessContext::new(8, 48_000.0, &inputs, &mut outputs);
        strip.process(&mut ctx).unwrap();

        assert_eq!(outputs[0].read(), &[0.5; 8]);
        assert_eq!(stage.lock().status().state(), NodeState::Disabled);
        match rx.try_recv().unwrap() {
            EngineEvent::NodeFault { node, stage, fault } => {
                assert_eq!(node, NodeId(5));
                assert_eq!(stage, Some(StageRef::insert(1)));
                assert_eq!(fault.message(), "boom");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
