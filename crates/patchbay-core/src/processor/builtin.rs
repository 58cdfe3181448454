//! Built-in processors: utilities, generators and MIDI tools.
//!
//! These cover every port type so sessions can be built and rendered without
//! external plugins. Hosted plugin formats implement [`ProcessorNode`] the
//! same way.

use core::f32::consts::TAU;

use libm::{expf, powf, sinf};

use crate::error::NodeFault;
use crate::math::{db_to_linear, ms_to_samples};
use crate::midi::MidiEvent;
use crate::port::{ControlRange, PortDescriptor};

use super::{ProcessContext, ProcessorNode};

/// Stereo gain in dB.
///
/// Inputs: `in_l`, `in_r`, `gain_db`. Outputs: `out_l`, `out_r`.
#[derive(Debug, Default)]
pub struct Gain;

impl ProcessorNode for Gain {
    fn kind(&self) -> &str {
        "gain"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::audio_in("in_l", "In L"),
            PortDescriptor::audio_in("in_r", "In R"),
            PortDescriptor::control_in("gain_db", "Gain", ControlRange::new(-60.0, 24.0, 0.0)),
            PortDescriptor::audio_out("out_l", "Out L"),
            PortDescriptor::audio_out("out_r", "Out R"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let gain = db_to_linear(ctx.control(2));
        let (in_l, in_r) = (ctx.input(0), ctx.input(1));
        let (out_l, out_r) = ctx.output_pair(0, 1);
        for (o, i) in out_l.iter_mut().zip(in_l) {
            *o = *i * gain;
        }
        for (o, i) in out_r.iter_mut().zip(in_r) {
            *o = *i * gain;
        }
        Ok(())
    }
}

/// Sine test tone.
///
/// Inputs: `frequency`, `level`. Outputs: `out_l`, `out_r`.
#[derive(Debug, Default)]
pub struct ToneGenerator {
    phase: f32,
}

impl ProcessorNode for ToneGenerator {
    fn kind(&self) -> &str {
        "tone"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::control_in(
                "frequency",
                "Frequency",
                ControlRange::new(20.0, 20_000.0, 440.0),
            ),
            PortDescriptor::control_in("level", "Level", ControlRange::new(0.0, 1.0, 0.5)),
            PortDescriptor::audio_out("out_l", "Out L"),
            PortDescriptor::audio_out("out_r", "Out R"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let step = ctx.control(0) / ctx.sample_rate();
        let level = ctx.control(1);
        let (out_l, out_r) = ctx.output_pair(0, 1);
        for (l, r) in out_l.iter_mut().zip(out_r.iter_mut()) {
            let s = sinf(self.phase * TAU) * level;
            *l = s;
            *r = s;
            self.phase = (self.phase + step).fract();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

/// Sine LFO producing CV.
///
/// Inputs: `rate` (Hz), `depth`. Outputs: `cv`.
#[derive(Debug, Default)]
pub struct Lfo {
    phase: f32,
}

impl ProcessorNode for Lfo {
    fn kind(&self) -> &str {
        "lfo"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::control_in("rate", "Rate", ControlRange::new(0.01, 20.0, 1.0)),
            PortDescriptor::control_in("depth", "Depth", ControlRange::new(0.0, 1.0, 1.0)),
            PortDescriptor::cv_out("cv", "CV"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let step = ctx.control(0) / ctx.sample_rate();
        let depth = ctx.control(1);
        for s in ctx.output(0) {
            *s = sinf(self.phase * TAU) * depth;
            self.phase = (self.phase + step).fract();
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

const VOICES: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
struct Voice {
    channel: u8,
    note: u8,
    phase: f32,
    step: f32,
    velocity: f32,
    env: f32,
    gate: bool,
}

impl Voice {
    fn is_free(&self) -> bool {
        !self.gate && self.env <= 0.0
    }
}

/// Polyphonic sine instrument driven by MIDI.
///
/// Inputs: `midi_in`, `level`. Outputs: `out_l`, `out_r`. Events are applied
/// at their frame offset.
#[derive(Debug)]
pub struct SineSynth {
    voices: [Voice; VOICES],
    env_step: f32,
}

impl Default for SineSynth {
    fn default() -> Self {
        Self {
            voices: [Voice::default(); VOICES],
            env_step: 1.0 / ms_to_samples(5.0, 48_000.0),
        }
    }
}

impl SineSynth {
    fn note_on(&mut self, event: &MidiEvent, sample_rate: f32) {
        let index = self
            .voices
            .iter()
            .position(Voice::is_free)
            .or_else(|| {
                self.voices
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.env.total_cmp(&b.1.env))
                    .map(|(i, _)| i)
            })
            .unwrap_or(0);
        let freq = 440.0 * powf(2.0, (f32::from(event.note()) - 69.0) / 12.0);
        self.voices[index] = Voice {
            channel: event.channel(),
            note: event.note(),
            phase: 0.0,
            step: freq / sample_rate,
            velocity: f32::from(event.velocity()) / 127.0,
            env: 0.0,
            gate: true,
        };
    }

    fn note_off(&mut self, event: &MidiEvent) {
        for voice in &mut self.voices {
            if voice.gate && voice.note == event.note() && voice.channel == event.channel() {
                voice.gate = false;
            }
        }
    }

    fn render(&mut self, l: &mut [f32], r: &mut [f32], from: usize, to: usize, level: f32) {
        for i in from..to {
            let mut sum = 0.0;
            for voice in self.voices.iter_mut().filter(|v| !v.is_free()) {
                voice.env = if voice.gate {
                    (voice.env + self.env_step).min(1.0)
                } else {
                    (voice.env - self.env_step).max(0.0)
                };
                sum += sinf(voice.phase * TAU) * voice.velocity * voice.env;
                voice.phase = (voice.phase + voice.step).fract();
            }
            l[i] = sum * level;
            r[i] = sum * level;
        }
    }
}

impl ProcessorNode for SineSynth {
    fn kind(&self) -> &str {
        "sine_synth"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::midi_in("midi_in", "MIDI In"),
            PortDescriptor::control_in("level", "Level", ControlRange::new(0.0, 1.0, 0.3)),
            PortDescriptor::audio_out("out_l", "Out L"),
            PortDescriptor::audio_out("out_r", "Out R"),
        ]
    }

    fn instantiate(&mut self, config: &super::ProcessConfig) -> Result<(), NodeFault> {
        self.env_step = 1.0 / ms_to_samples(5.0, config.sample_rate).max(1.0);
        Ok(())
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let frames = ctx.frames();
        let sample_rate = ctx.sample_rate();
        let level = ctx.control(1);
        let midi = ctx.midi_in(0);
        let (l, r) = ctx.output_pair(0, 1);
        if l.len() < frames || r.len() < frames {
            return Err(NodeFault::new("sine_synth: output buffers shorter than block"));
        }

        let mut cursor = 0;
        for event in midi.into_iter().flat_map(|m| m.iter()) {
            let at = (event.time as usize).min(frames);
            self.render(l, r, cursor, at, level);
            cursor = at;
            if event.is_note_on() {
                self.note_on(event, sample_rate);
            } else if event.is_note_off() {
                self.note_off(event);
            }
        }
        self.render(l, r, cursor, frames, level);
        Ok(())
    }

    fn reset(&mut self) {
        self.voices = [Voice::default(); VOICES];
    }
}

const NO_NOTE: u8 = 0xFF;

/// Shifts note numbers by a number of semitones.
///
/// Inputs: `midi_in`, `semitones`. Outputs: `midi_out`. Note-offs follow the
/// shift that was active at their note-on, and notes pushed outside 0..=127
/// are dropped.
#[derive(Debug)]
pub struct Transpose {
    held: [[u8; 128]; 16],
}

impl Default for Transpose {
    fn default() -> Self {
        Self {
            held: [[NO_NOTE; 128]; 16],
        }
    }
}

impl ProcessorNode for Transpose {
    fn kind(&self) -> &str {
        "transpose"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::midi_in("midi_in", "MIDI In"),
            PortDescriptor::control_in(
                "semitones",
                "Semitones",
                ControlRange::new(-24.0, 24.0, 0.0),
            ),
            PortDescriptor::midi_out("midi_out", "MIDI Out"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let shift = ctx.control(1).round() as i32;
        let input = ctx.midi_in(0);
        let Some(out) = ctx.midi_out(0) else {
            return Ok(());
        };
        out.clear();
        for event in input.into_iter().flat_map(|m| m.iter()) {
            let channel = usize::from(event.channel());
            let note = usize::from(event.note());
            let mapped = if event.is_note_on() {
                let target = i32::from(event.note()) + shift;
                if !(0..=127).contains(&target) {
                    continue;
                }
                self.held[channel][note] = target as u8;
                target as u8
            } else if event.is_note_off() || event.status() == 0xA0 {
                let held = self.held[channel][note];
                if held == NO_NOTE {
                    continue;
                }
                if event.is_note_off() {
                    self.held[channel][note] = NO_NOTE;
                }
                held
            } else {
                out.push(*event);
                continue;
            };
            let mut shifted = *event;
            shifted.data[1] = mapped;
            out.push(shifted);
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.held = [[NO_NOTE; 128]; 16];
    }
}

/// Sidechain-keyed gain reduction.
///
/// Inputs: `in_l`, `in_r`, `sc_l`, `sc_r` (single-input sidechain keys),
/// `threshold`, `depth`, `release_ms`. Outputs: `out_l`, `out_r`.
#[derive(Debug, Default)]
pub struct Ducker {
    envelope: f32,
}

impl ProcessorNode for Ducker {
    fn kind(&self) -> &str {
        "ducker"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::audio_in("in_l", "In L"),
            PortDescriptor::audio_in("in_r", "In R"),
            PortDescriptor::audio_in("sc_l", "Key L").sidechain(),
            PortDescriptor::audio_in("sc_r", "Key R").sidechain(),
            PortDescriptor::control_in("threshold", "Threshold", ControlRange::new(0.0, 1.0, 0.1)),
            PortDescriptor::control_in("depth", "Depth", ControlRange::new(0.0, 1.0, 0.7)),
            PortDescriptor::control_in(
                "release_ms",
                "Release",
                ControlRange::new(1.0, 2000.0, 150.0),
            ),
            PortDescriptor::audio_out("out_l", "Out L"),
            PortDescriptor::audio_out("out_r", "Out R"),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let (in_l, in_r) = (ctx.input(0), ctx.input(1));
        let (key_l, key_r) = (ctx.input(2), ctx.input(3));
        let threshold = ctx.control(4);
        let depth = ctx.control(5);
        let release = expf(-1.0 / ms_to_samples(ctx.control(6), ctx.sample_rate()).max(1.0));
        let span = (1.0 - threshold).max(1e-6);

        let (out_l, out_r) = ctx.output_pair(0, 1);
        for i in 0..out_l.len().min(out_r.len()) {
            let key = key_l
                .get(i)
                .map_or(0.0, |s| s.abs())
                .max(key_r.get(i).map_or(0.0, |s| s.abs()));
            self.envelope = if key > self.envelope {
                key
            } else {
                key + (self.envelope - key) * release
            };
            let amount = ((self.envelope - threshold) / span).clamp(0.0, 1.0);
            let gain = 1.0 - depth * amount;
            out_l[i] = in_l.get(i).copied().unwrap_or(0.0) * gain;
            out_r[i] = in_r.get(i).copied().unwrap_or(0.0) * gain;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.envelope = 0.0;
    }
}
