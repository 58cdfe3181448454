//! Offline rendering of an engine's output.

use std::ops::ControlFlow;

use patchbay_core::ProcessHandle;

use crate::Result;
use crate::backend::{AudioBackend, BackendConfig, ProcessCallback, XrunReport, process_callback};
use crate::offline::OfflineBackend;
use crate::wav::StereoSamples;

/// Which engine output a bounce captures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputTap {
    /// The Master track.
    #[default]
    Master,
    /// The control-room mix (Master dimmed plus listened tracks).
    Monitor,
}

/// Settings for [`bounce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BounceOptions {
    /// Sample rate in Hz; must match the engine's.
    pub sample_rate: u32,
    /// Frames per cycle; at most the engine's maximum block.
    pub block_size: usize,
    /// Extra silent frames rendered after the input ends.
    pub tail_frames: usize,
    /// Output to capture.
    pub tap: OutputTap,
}

impl BounceOptions {
    /// Master output, no tail.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size,
            tail_frames: 0,
            tap: OutputTap::Master,
        }
    }

    /// Render `frames` extra frames after the input.
    pub fn with_tail(mut self, frames: usize) -> Self {
        self.tail_frames = frames;
        self
    }

    /// Capture `tap` instead of Master.
    pub fn with_tap(mut self, tap: OutputTap) -> Self {
        self.tap = tap;
        self
    }
}

/// Rendered audio plus timing.
#[derive(Debug, Clone)]
pub struct BounceResult {
    /// Captured output.
    pub audio: StereoSamples,
    /// Cycle timing over the render.
    pub report: XrunReport,
}

/// Callback that feeds each block to `handle` and reads back `tap`.
pub fn engine_callback(handle: ProcessHandle, tap: OutputTap) -> ProcessCallback<'static> {
    process_callback(move |block| {
        handle.write_input(0, block.in_l)?;
        handle.write_input(1, block.in_r)?;
        let report = handle.process_cycle(block.frames)?;
        match tap {
            OutputTap::Master => handle.read_output(block.out_l, block.out_r),
            OutputTap::Monitor => handle.read_monitor(block.out_l, block.out_r),
        }
        Ok(ControlFlow::Continue(report))
    })
}

/// Render `input` through the engine behind `handle`.
pub fn bounce(
    handle: &ProcessHandle,
    input: &StereoSamples,
    options: &BounceOptions,
) -> Result<BounceResult> {
    bounce_with_progress(handle, input, options, |_, _| {})
}

/// [`bounce`], calling `progress(done, total)` in frames after every cycle.
pub fn bounce_with_progress<P>(
    handle: &ProcessHandle,
    input: &StereoSamples,
    options: &BounceOptions,
    mut progress: P,
) -> Result<BounceResult>
where
    P: FnMut(u64, u64) + Send,
{
    let config = BackendConfig::stereo(options.sample_rate, options.block_size);
    let mut backend = OfflineBackend::new(config, input.clone()).with_tail(options.tail_frames);
    let total = backend.frames() as u64;
    tracing::info!(
        frames = total,
        block = options.block_size,
        tap = ?options.tap,
        "bounce: start"
    );

    let mut inner = engine_callback(handle.clone(), options.tap);
    let report = backend.run(process_callback(|block| {
        let flow = inner(block)?;
        progress(block.position + block.frames as u64, total);
        Ok(flow)
    }))?;

    if report.xruns > 0 {
        tracing::warn!(xruns = report.xruns, "bounce: cycles overran real-time deadline");
    }
    tracing::info!(
        cycles = report.cycles,
        load = report.load(options.sample_rate),
        "bounce: done"
    );
    Ok(BounceResult {
        audio: backend.into_output(),
        report,
    })
}
