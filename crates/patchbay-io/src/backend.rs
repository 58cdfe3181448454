//! Pluggable audio backend abstraction.
//!
//! An [`AudioBackend`] owns the clock: it calls a [`ProcessCallback`] once per
//! cycle with de-interleaved input and output blocks. The engine side of that
//! callback is usually [`engine_callback`](crate::engine_callback), which
//! forwards each block to a [`ProcessHandle`](patchbay_core::ProcessHandle).
//!
//! ```text
//! AudioBackend ──run(callback)──▶ ProcessCallback ──process_block──▶ ProcessHandle
//!      ▲                                │                                  │
//!      └──────── XrunReport ◀───────────┴────────── CycleReport ◀──────────┘
//! ```
//!
//! The trait is object-safe so a backend can be chosen at runtime. Only the
//! offline backend ships here; device backends implement the same trait.

use std::ops::ControlFlow;
use std::time::Duration;

use patchbay_core::{CycleReport, Xrun};

use crate::Result;

/// Configuration for running a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Frames per cycle.
    pub block_size: usize,
    /// Input channels delivered to the callback (0..=2).
    pub input_channels: u16,
    /// Output channels the callback fills (1..=2).
    pub output_channels: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            block_size: 512,
            input_channels: 2,
            output_channels: 2,
        }
    }
}

impl BackendConfig {
    /// Stereo in, stereo out.
    pub fn stereo(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            ..Self::default()
        }
    }

    /// Real-time budget of one full block.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// One cycle's worth of de-interleaved audio.
///
/// Input slices are silent when the backend has no input. Outputs arrive
/// zeroed and are `frames` long.
#[derive(Debug)]
pub struct AudioBlock<'a> {
    /// Frames in this cycle (may be short at the end of an offline run).
    pub frames: usize,
    /// Index of the first frame since the run started.
    pub position: u64,
    /// Left input.
    pub in_l: &'a [f32],
    /// Right input.
    pub in_r: &'a [f32],
    /// Left output.
    pub out_l: &'a mut [f32],
    /// Right output.
    pub out_r: &'a mut [f32],
}

/// Called by the backend once per cycle.
///
/// Return [`ControlFlow::Break`] to stop the run. An `Err` also stops it and
/// is passed back from [`AudioBackend::run`].
pub type ProcessCallback<'a> =
    Box<dyn FnMut(&mut AudioBlock<'_>) -> Result<ControlFlow<(), CycleReport>> + Send + 'a>;

/// Box a closure as a [`ProcessCallback`].
pub fn process_callback<'a, F>(f: F) -> ProcessCallback<'a>
where
    F: FnMut(&mut AudioBlock<'_>) -> Result<ControlFlow<(), CycleReport>> + Send + 'a,
{
    Box::new(f)
}

/// Pluggable audio backend trait.
pub trait AudioBackend: Send {
    /// Human-readable name of this backend (e.g. "offline").
    fn name(&self) -> &str;

    /// The configuration the backend runs with.
    fn config(&self) -> &BackendConfig;

    /// Drive `callback` until the backend runs out of input or the callback
    /// breaks. Blocks the calling thread.
    fn run(&mut self, callback: ProcessCallback<'_>) -> Result<XrunReport>;
}

/// Timing summary of a backend run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XrunReport {
    /// Cycles completed.
    pub cycles: u64,
    /// Frames processed.
    pub frames: u64,
    /// Cycles that overran their deadline.
    pub xruns: u64,
    /// Worst overrun seen.
    pub worst: Option<Xrun>,
    /// Total time spent inside cycles.
    pub busy: Duration,
}

impl XrunReport {
    /// Fold one cycle into the summary.
    pub fn record(&mut self, report: &CycleReport) {
        self.cycles += 1;
        self.frames += report.frames as u64;
        self.busy += report.elapsed;
        if let Some(xrun) = report.xrun {
            self.xruns += 1;
            if self.worst.is_none_or(|w| overrun(&xrun) > overrun(&w)) {
                self.worst = Some(xrun);
            }
        }
    }

    /// Fraction of the real-time budget spent processing (1.0 = exactly real time).
    pub fn load(&self, sample_rate: u32) -> f64 {
        if self.frames == 0 || sample_rate == 0 {
            return 0.0;
        }
        let audio = self.frames as f64 / f64::from(sample_rate);
        self.busy.as_secs_f64() / audio
    }
}

fn overrun(xrun: &Xrun) -> Duration {
    xrun.elapsed.saturating_sub(xrun.deadline)
}
