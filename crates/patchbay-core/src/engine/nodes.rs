//! Engine-owned utility nodes: hardware input and monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::NodeFault;
use crate::math::db_to_linear;
use crate::port::{ControlRange, PortDescriptor, PortFlags};
use crate::processor::{ProcessContext, ProcessorNode};

/// Output index of the hardware input's left channel.
pub(crate) const HW_IN_L: usize = 0;
/// Output index of the hardware input's MIDI stream.
pub(crate) const HW_MIDI: usize = 2;
/// Hardware input channels.
pub(crate) const HW_CHANNELS: usize = 2;

/// Source node for audio and MIDI arriving from the backend.
///
/// Its outputs are written by [`ProcessHandle::write_input`](super::ProcessHandle::write_input)
/// before a cycle and cleared after it; `process` leaves them alone.
#[derive(Debug, Default)]
pub(crate) struct HardwareInput;

impl ProcessorNode for HardwareInput {
    fn kind(&self) -> &str {
        "hw_in"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::audio_out("in_l", "Input L").with_flags(PortFlags::HARDWARE),
            PortDescriptor::audio_out("in_r", "Input R").with_flags(PortFlags::HARDWARE),
            PortDescriptor::midi_out("midi_in", "MIDI Input").with_flags(PortFlags::HARDWARE),
        ]
    }

    fn process(&mut self, _ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        Ok(())
    }
}

/// Control-room output: `master * dim + listen`.
///
/// Dim applies only while some track is listened. The flag is written by the
/// solo resolver at the top of every cycle.
///
/// Inputs: `master_l`, `master_r`, `listen_l`, `listen_r`, `dim_db`.
/// Outputs: `out_l`, `out_r`.
#[derive(Debug)]
pub(crate) struct Monitor {
    any_listened: Arc<AtomicBool>,
    dim_db: f32,
}

impl Monitor {
    pub(crate) fn new(any_listened: Arc<AtomicBool>, dim_db: f32) -> Self {
        Self {
            any_listened,
            dim_db,
        }
    }
}

impl ProcessorNode for Monitor {
    fn kind(&self) -> &str {
        "monitor"
    }

    fn ports(&self) -> Vec<PortDescriptor> {
        vec![
            PortDescriptor::audio_in("master_l", "Master L"),
            PortDescriptor::audio_in("master_r", "Master R"),
            PortDescriptor::audio_in("listen_l", "Listen L"),
            PortDescriptor::audio_in("listen_r", "Listen R"),
            PortDescriptor::control_in("dim_db", "Dim", ControlRange::new(-60.0, 0.0, self.dim_db)),
            PortDescriptor::audio_out("out_l", "Monitor L").with_flags(PortFlags::HARDWARE),
            PortDescriptor::audio_out("out_r", "Monitor R").with_flags(PortFlags::HARDWARE),
        ]
    }

    fn process(&mut self, ctx: &mut ProcessContext<'_>) -> Result<(), NodeFault> {
        let dim = if self.any_listened.load(Ordering::Relaxed) {
            db_to_linear(ctx.control(4))
        } else {
            1.0
        };
        let (master_l, master_r) = (ctx.input(0), ctx.input(1));
        let (listen_l, listen_r) = (ctx.input(2), ctx.input(3));
        let (out_l, out_r) = ctx.output_pair(0, 1);
        for (i, (l, r)) in out_l.iter_mut().zip(out_r.iter_mut()).enumerate() {
            *l = master_l.get(i).copied().unwrap_or(0.0) * dim + listen_l.get(i).copied().unwrap_or(0.0);
            *r = master_r.get(i).copied().unwrap_or(0.0) * dim + listen_r.get(i).copied().unwrap_or(0.0);
        }
        Ok(())
    }
}
