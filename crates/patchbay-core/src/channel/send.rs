//! Channel sends.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::param::LinearRamp;
use crate::port::{ControlRange, ControlValue, PortDescriptor};
use crate::track::PRE_FADER_SENDS;

/// One send slot of a channel strip.
///
/// Each send owns a stereo output pair (`send{n}.out_l`, `send{n}.out_r`) that
/// the engine connects to the target track's main or sidechain inputs. An
/// unassigned send outputs silence.
pub(crate) struct ChannelSend {
    slot: usize,
    amount: Arc<ControlValue>,
    enabled: Arc<AtomicBool>,
    ramp: LinearRamp,
    primed: bool,
}

impl ChannelSend {
    pub(crate) fn new(
        slot: usize,
        amount: Arc<ControlValue>,
        enabled: Arc<AtomicBool>,
        fade_frames: usize,
    ) -> Self {
        Self {
            slot,
            amount,
            enabled,
            ramp: LinearRamp::new(0.0, u32::try_from(fade_frames).unwrap_or(u32::MAX)),
            primed: false,
        }
    }

    /// Fresh amount control (0..2, unity).
    pub(crate) fn amount_control() -> Arc<ControlValue> {
        Arc::new(ControlValue::new(ControlRange::new(0.0, 2.0, 1.0)))
    }

    pub(crate) fn is_pre_fader(&self) -> bool {
        self.slot < PRE_FADER_SENDS
    }

    pub(crate) fn control_descriptor(&self) -> PortDescriptor {
        PortDescriptor::control_in(
            format!("send{}.amount", self.slot),
            format!("Send {} Amount", self.slot + 1),
            self.amount.range(),
        )
        .with_shared_value(Arc::clone(&self.amount))
    }

    pub(crate) fn output_descriptors(&self) -> [PortDescriptor; 2] {
        [
            PortDescriptor::audio_out(
                format!("send{}.out_l", self.slot),
                format!("Send {} L", self.slot + 1),
            ),
            PortDescriptor::audio_out(
                format!("send{}.out_r", self.slot),
                format!("Send {} R", self.slot + 1),
            ),
        ]
    }

    pub(crate) fn reset(&mut self) {
        self.primed = false;
    }

    /// Write `amount * src` to the send outputs, ramping amount changes.
    pub(crate) fn process(
        &mut self,
        src_l: &[f32],
        src_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) {
        let target = if self.enabled.load(Ordering::Relaxed) {
            self.amount.get()
        } else {
            0.0
        };
        if self.primed {
            self.ramp.set_target(target);
        } else {
            self.ramp.set_immediate(target);
            self.primed = true;
        }

        if self.ramp.is_settled() && self.ramp.get() == 0.0 {
            out_l.fill(0.0);
            out_r.fill(0.0);
            return;
        }
        let frames = src_l
            .len()
            .min(src_r.len())
            .min(out_l.len())
            .min(out_r.len());
        for i in 0..frames {
            let g = self.ramp.advance();
            out_l[i] = src_l[i] * g;
            out_r[i] = src_r[i] * g;
        }
    }
}
