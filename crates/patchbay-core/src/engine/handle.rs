//! Real-time side of the engine.

use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;
use crate::graph::NodeId;
use crate::graph::cell::NodeCell;
use crate::math::hard_limit;
use crate::midi::MidiEvent;
use crate::scheduler::{CycleReport, Scheduler};

use super::nodes::{HW_CHANNELS, HW_IN_L, HW_MIDI};

/// Peak level the hardware outputs are clamped to.
pub const OUTPUT_LIMIT: f32 = 2.0;

/// Cloneable handle for the audio callback.
///
/// Everything here is safe to call from a real-time thread: no allocation,
/// only uncontended locks on the engine's hardware nodes. Master is read
/// through the installed graph, since its cell is rebuilt whenever one of its
/// stages changes. Holding a handle
/// keeps the scheduler's threads alive after the [`Engine`](super::Engine)
/// itself is dropped.
#[derive(Clone)]
pub struct ProcessHandle {
    scheduler: Arc<Scheduler>,
    hw_in: Arc<NodeCell>,
    master: NodeId,
    monitor: Arc<NodeCell>,
    max_block: usize,
}

impl ProcessHandle {
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        hw_in: Arc<NodeCell>,
        master: NodeId,
        monitor: Arc<NodeCell>,
        max_block: usize,
    ) -> Self {
        Self {
            scheduler,
            hw_in,
            master,
            monitor,
            max_block,
        }
    }

    /// Largest block a cycle accepts.
    pub fn max_block(&self) -> usize {
        self.max_block
    }

    /// Run one processing cycle over `frames` frames.
    ///
    /// Hardware input written since the last cycle is consumed and cleared.
    ///
    /// # Errors
    ///
    /// [`EngineError::BlockTooLarge`] if `frames` exceeds the configured block size.
    pub fn process_cycle(&self, frames: usize) -> Result<CycleReport, EngineError> {
        if frames > self.max_block {
            return Err(EngineError::BlockTooLarge {
                frames,
                max: self.max_block,
            });
        }
        let report = self.scheduler.run_cycle(frames);
        for port in self.hw_in.outputs_mut().iter_mut() {
            port.clear(self.max_block);
        }
        Ok(report)
    }

    /// Stage one channel of hardware input for the next cycle.
    pub fn write_input(&self, channel: usize, block: &[f32]) -> Result<(), EngineError> {
        if channel >= HW_CHANNELS {
            return Err(EngineError::InvalidChannel(channel));
        }
        if block.len() > self.max_block {
            return Err(EngineError::BlockTooLarge {
                frames: block.len(),
                max: self.max_block,
            });
        }
        let mut outputs = self.hw_in.outputs_mut();
        let port = outputs
            .get_mut(HW_IN_L + channel)
            .ok_or(EngineError::InvalidChannel(channel))?;
        port.write(block)?;
        Ok(())
    }

    /// Stage MIDI input for the next cycle. Returns how many events fit.
    pub fn write_midi(&self, events: &[MidiEvent]) -> usize {
        let mut outputs = self.hw_in.outputs_mut();
        let Some(buf) = outputs.get_mut(HW_MIDI).and_then(|p| p.midi_mut()) else {
            return 0;
        };
        events.iter().take_while(|e| buf.push(**e)).count()
    }

    /// Copy the Master output of the last cycle, hard-limited to ±2.
    ///
    /// Reads silence until a graph is installed.
    pub fn read_output(&self, left: &mut [f32], right: &mut [f32]) {
        let read = self
            .scheduler
            .with_cell(self.master, |cell| read_pair(cell, left, right));
        if read.is_none() {
            left.fill(0.0);
            right.fill(0.0);
        }
    }

    /// Copy the Monitor output of the last cycle, hard-limited to ±2.
    pub fn read_monitor(&self, left: &mut [f32], right: &mut [f32]) {
        read_pair(&self.monitor, left, right);
    }

    /// Write stereo input, run a cycle of `out_l.len()` frames and read Master.
    pub fn process_block(
        &self,
        in_l: &[f32],
        in_r: &[f32],
        out_l: &mut [f32],
        out_r: &mut [f32],
    ) -> Result<CycleReport, EngineError> {
        let frames = out_l.len().min(out_r.len());
        self.write_input(0, &in_l[..in_l.len().min(frames)])?;
        self.write_input(1, &in_r[..in_r.len().min(frames)])?;
        let report = self.process_cycle(frames)?;
        self.read_output(out_l, out_r);
        Ok(report)
    }
}

fn read_pair(cell: &NodeCell, left: &mut [f32], right: &mut [f32]) {
    let outputs = cell.outputs();
    for (dst, index) in [(left, 0), (right, 1)] {
        let src = outputs.get(index).map_or(&[][..], |p| p.read());
        let n = dst.len().min(src.len());
        dst[..n].copy_from_slice(&src[..n]);
        dst[n..].fill(0.0);
        hard_limit(&mut dst[..n], OUTPUT_LIMIT);
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("max_block", &self.max_block)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
