//! Fader: volume, balance, mute/solo/listen, mono and phase.
//!
//! The fader's settings live in shared [`ControlValue`]s exported as control
//! input ports of the channel strip, so they are automatable through ordinary
//! connections.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::midi::MidiBuffer;
use crate::mixer::MixFlags;
use crate::pan::PanPolicy;
use crate::param::LinearRamp;
use crate::port::{ControlRange, ControlValue, PortDescriptor};

/// Shared fader controls of one track.
#[derive(Debug, Clone)]
pub struct FaderControls {
    /// Linear volume, 0..2.
    pub amp: Arc<ControlValue>,
    /// Balance, -1 (left) .. 1 (right).
    pub balance: Arc<ControlValue>,
    /// Mute toggle.
    pub mute: Arc<ControlValue>,
    /// Solo toggle.
    pub solo: Arc<ControlValue>,
    /// Listen toggle.
    pub listen: Arc<ControlValue>,
    /// Sum to mono.
    pub mono_compat: Arc<ControlValue>,
    /// Invert polarity.
    pub swap_phase: Arc<ControlValue>,
}

impl FaderControls {
    /// Controls at their defaults.
    pub fn new() -> Self {
        let toggle = || Arc::new(ControlValue::new(ControlRange::toggle()));
        Self {
            amp: Arc::new(ControlValue::new(ControlRange::new(0.0, 2.0, 1.0))),
            balance: Arc::new(ControlValue::new(ControlRange::bipolar())),
            mute: toggle(),
            solo: toggle(),
            listen: toggle(),
            mono_compat: toggle(),
            swap_phase: toggle(),
        }
    }

    /// Control input descriptors backed by these values.
    pub(crate) fn descriptors(&self) -> Vec<PortDescriptor> {
        self.entries()
            .into_iter()
            .map(|(symbol, name, value)| {
                let desc = if value.range() == ControlRange::toggle() {
                    PortDescriptor::toggle_in(symbol, name)
                } else {
                    PortDescriptor::control_in(symbol, name, value.range())
                };
                desc.with_shared_value(Arc::clone(value))
            })
            .collect()
    }

    /// Control by port symbol.
    pub fn by_symbol(&self, symbol: &str) -> Option<&Arc<ControlValue>> {
        self.entries()
            .into_iter()
            .find(|(s, _, _)| *s == symbol)
            .map(|(_, _, v)| v)
    }

    /// Base values keyed by port symbol.
    pub fn values(&self) -> BTreeMap<String, f32> {
        self.entries()
            .into_iter()
            .map(|(symbol, _, value)| (symbol.to_owned(), value.base()))
            .collect()
    }

    fn entries(&self) -> [(&'static str, &'static str, &Arc<ControlValue>); 7] {
        [
            ("amp", "Volume", &self.amp),
            ("balance", "Balance", &self.balance),
            ("mute", "Mute", &self.mute),
            ("solo", "Solo", &self.solo),
            ("listen", "Listen", &self.listen),
            ("mono_compat", "Mono", &self.mono_compat),
            ("swap_phase", "Phase Invert", &self.swap_phase),
        ]
    }

    /// Base volume.
    pub fn volume(&self) -> f32 {
        self.amp.base()
    }

    /// Base balance.
    pub fn balance(&self) -> f32 {
        self.balance.base()
    }

    /// Mute toggle state.
    pub fn is_muted(&self) -> bool {
        self.mute.base() > 0.5
    }

    /// Solo toggle state.
    pub fn is_soloed(&self) -> bool {
        self.solo.base() > 0.5
    }

    /// Listen toggle state.
    pub fn is_listened(&self) -> bool {
        self.listen.base() > 0.5
    }
}

impl Default for FaderControls {
    fn default() -> Self {
        Self::new()
    }
}

/// Real-time fader state.
pub(crate) struct Fader {
    controls: FaderControls,
    mix: Arc<MixFlags>,
    pan: PanPolicy,
    mute_ramp: LinearRamp,
    primed: bool,
}

impl Fader {
    pub(crate) fn new(
        controls: FaderControls,
        mix: Arc<MixFlags>,
        pan: PanPolicy,
        fade_frames: usize,
    ) -> Self {
        Self {
            controls,
            mix,
            pan,
            mute_ramp: LinearRamp::new(1.0, u32::try_from(fade_frames).unwrap_or(u32::MAX)),
            primed: false,
        }
    }

    pub(crate) fn controls(&self) -> &FaderControls {
        &self.controls
    }

    /// Muted, or silenced by someone else's solo while not listened.
    pub(crate) fn effectively_muted(&self) -> bool {
        self.controls.mute.is_toggled()
            || (self.mix.is_silenced() && !self.controls.listen.is_toggled())
    }

    pub(crate) fn reset(&mut self) {
        self.primed = false;
    }

    fn update_mute_target(&mut self) {
        let target = if self.effectively_muted() { 0.0 } else { 1.0 };
        if self.primed {
            self.mute_ramp.set_target(target);
        } else {
            self.mute_ramp.set_immediate(target);
            self.primed = true;
        }
    }

    /// Apply the fader to a stereo block in place.
    ///
    /// `listen_l`/`listen_r` receive the post-fader, pre-mute signal while the
    /// track is listened and silence otherwise.
    pub(crate) fn process_audio(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        listen_l: &mut [f32],
        listen_r: &mut [f32],
    ) {
        self.update_mute_target();
        let amp = self.controls.amp.get();
        let (gain_l, gain_r) = self.pan.gains(self.controls.balance.get());
        let mono = self.controls.mono_compat.is_toggled();
        let polarity = if self.controls.swap_phase.is_toggled() {
            -1.0
        } else {
            1.0
        };
        let listened = self.controls.listen.is_toggled();

        let frames = left
            .len()
            .min(right.len())
            .min(listen_l.len())
            .min(listen_r.len());
        for i in 0..frames {
            let (mut l, mut r) = (left[i] * amp, right[i] * amp);
            if mono {
                let m = (l + r) * 0.5;
                l = m;
                r = m;
            }
            l *= gain_l * polarity;
            r *= gain_r * polarity;
            if listened {
                listen_l[i] = l;
                listen_r[i] = r;
            } else {
                listen_l[i] = 0.0;
                listen_r[i] = 0.0;
            }
            let g = self.mute_ramp.advance();
            left[i] = l * g;
            right[i] = r * g;
        }
    }

    /// Gate events while muted, otherwise scale note-on velocity by volume.
    pub(crate) fn process_midi(&mut self, midi: &mut MidiBuffer) {
        if self.effectively_muted() {
            midi.clear();
            return;
        }
        let amp = self.controls.amp.get();
        if (amp - 1.0).abs() < f32::EPSILON {
            return;
        }
        for event in midi.events_mut() {
            if event.is_note_on() {
                let scaled = (f32::from(event.velocity()) * amp).round().clamp(1.0, 127.0);
                event.data[2] = scaled as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;
    use crate::pan::{PanAlgorithm, PanLaw};

    fn fader(fade: usize) -> (Fader, Arc<MixFlags>) {
        let mix = Arc::new(MixFlags::default());
        let policy = PanPolicy::new(PanAlgorithm::Linear, PanLaw::ZeroDb);
        (
            Fader::new(FaderControls::new(), Arc::clone(&mix), policy, fade),
            mix,
        )
    }

    fn run(f: &mut Fader, value: f32, frames: usize) -> (Vec<f32>, Vec<f32>, Vec<f32>) {
        let mut l = vec![value; frames];
        let mut r = vec![value; frames];
        let mut ll = vec![9.0; frames];
        let mut lr = vec![9.0; frames];
        f.process_audio(&mut l, &mut r, &mut ll, &mut lr);
        (l, r, ll)
    }

    #[test]
    fn unity_by_default() {
        let (mut f, _) = fader(16);
        let (l, r, listen) = run(&mut f, 0.5, 8);
        assert!(l.iter().chain(&r).all(|s| (*s - 0.5).abs() < 1e-6));
        assert!(listen.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn mute_from_first_block_is_immediate() {
        let (mut f, _) = fader(16);
        f.controls().mute.set(1.0);
        let (l, _, _) = run(&mut f, 1.0, 8);
        assert!(l.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn mute_fades_linearly() {
        let (mut f, _) = fader(4);
        run(&mut f, 1.0, 4);
        f.controls().mute.set(1.0);
        let (l, _, _) = run(&mut f, 1.0, 6);
        assert_eq!(l, vec![0.75, 0.5, 0.25, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn solo_silence_respects_listen() {
        let (mut f, mix) = fader(0);
        mix.store(false, true);
        let (l, _, _) = run(&mut f, 1.0, 4);
        assert!(l.iter().all(|s| *s == 0.0));

        f.controls().listen.set(1.0);
        let (l, _, listen) = run(&mut f, 1.0, 4);
        assert!(l.iter().all(|s| *s == 1.0));
        assert!(listen.iter().all(|s| *s == 1.0));
    }

    #[test]
    fn listen_is_pre_mute() {
        let (mut f, _) = fader(0);
        f.controls().listen.set(1.0);
        f.controls().mute.set(1.0);
        f.controls().amp.set(0.5);
        let (l, _, listen) = run(&mut f, 1.0, 4);
        assert!(l.iter().all(|s| *s == 0.0));
        assert!(listen.iter().all(|s| (*s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn mono_and_phase() {
        let (mut f, _) = fader(0);
        f.controls().mono_compat.set(1.0);
        f.controls().swap_phase.set(1.0);
        let mut l = vec![1.0; 2];
        let mut r = vec![0.0; 2];
        let (mut a, mut b) = (vec![0.0; 2], vec![0.0; 2]);
        f.process_audio(&mut l, &mut r, &mut a, &mut b);
        assert_eq!(l, vec![-0.5, -0.5]);
        assert_eq!(r, vec![-0.5, -0.5]);
    }

    #[test]
    fn balance_uses_policy() {
        let (mut f, _) = fader(0);
        f.controls().balance.set(1.0);
        let (l, r, _) = run(&mut f, 1.0, 2);
        assert!(l[0].abs() < 1e-6);
        assert!((r[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn midi_velocity_scaling_and_gate() {
        let (mut f, _) = fader(0);
        let mut midi = MidiBuffer::with_capacity(4);
        midi.push(MidiEvent::note_on(0, 0, 60, 100));
        midi.push(MidiEvent::note_off(1, 0, 60));
        f.controls().amp.set(0.5);
        f.process_midi(&mut midi);
        assert_eq!(midi.events()[0].velocity(), 50);
        assert_eq!(midi.len(), 2);

        f.controls().amp.set(0.001);
        f.process_midi(&mut midi);
        assert_eq!(midi.events()[0].velocity(), 1);

        f.controls().mute.set(1.0);
        f.process_midi(&mut midi);
        assert!(midi.is_empty());
    }

    #[test]
    fn descriptors_share_values() {
        let controls = FaderControls::new();
        let descs = controls.descriptors();
        assert_eq!(descs.len(), 7);
        assert_eq!(descs[0].symbol, "amp");
        assert!(Arc::ptr_eq(descs[2].shared.as_ref().unwrap(), &controls.mute));
        assert!(controls.by_symbol("swap_phase").is_some());
        assert!(controls.by_symbol("gain").is_none());
    }
}
