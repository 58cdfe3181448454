//! Faster-than-real-time backend for bounce and export.

use std::ops::ControlFlow;

use crate::backend::{AudioBackend, AudioBlock, BackendConfig, ProcessCallback, XrunReport};
use crate::wav::StereoSamples;
use crate::{Error, Result};

/// Runs the callback back to back over an in-memory input and collects the
/// output.
///
/// The run length is the input length plus an optional tail of silence, so
/// reverbs and delays can ring out. The last block may be short.
#[derive(Debug, Clone)]
pub struct OfflineBackend {
    config: BackendConfig,
    input: StereoSamples,
    frames: usize,
    output: StereoSamples,
}

impl OfflineBackend {
    /// Render exactly the length of `input`.
    pub fn new(config: BackendConfig, input: StereoSamples) -> Self {
        let frames = input.len();
        Self {
            config,
            input,
            frames,
            output: StereoSamples::default(),
        }
    }

    /// Render `frames` frames with no input.
    pub fn silent(config: BackendConfig, frames: usize) -> Self {
        Self {
            frames,
            ..Self::new(config, StereoSamples::default())
        }
    }

    /// Append `tail` frames of silent input.
    pub fn with_tail(mut self, tail: usize) -> Self {
        self.frames += tail;
        self
    }

    /// Total frames a run will render.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Output of the last run.
    pub fn output(&self) -> &StereoSamples {
        &self.output
    }

    /// Take the output of the last run.
    pub fn into_output(self) -> StereoSamples {
        self.output
    }
}

/// Copy `src[pos..pos + n]` into `dst[..n]`, zero-padding past the end of `src`.
fn fill_from(dst: &mut [f32], src: &[f32], pos: usize, n: usize) {
    let available = src.len().saturating_sub(pos).min(n);
    if available > 0 {
        dst[..available].copy_from_slice(&src[pos..pos + available]);
    }
    dst[available..n].fill(0.0);
}

impl AudioBackend for OfflineBackend {
    fn name(&self) -> &str {
        "offline"
    }

    fn config(&self) -> &BackendConfig {
        &self.config
    }

    fn run(&mut self, mut callback: ProcessCallback<'_>) -> Result<XrunReport> {
        let block = self.config.block_size;
        if block == 0 {
            return Err(Error::Backend("block size must be > 0".into()));
        }
        if !(1..=2).contains(&self.config.output_channels) || self.config.input_channels > 2 {
            return Err(Error::Backend(format!(
                "offline backend supports up to 2 channels, got {} in / {} out",
                self.config.input_channels, self.config.output_channels
            )));
        }
        tracing::debug!(
            frames = self.frames,
            block,
            sample_rate = self.config.sample_rate,
            "offline_run: start"
        );

        let mut out = StereoSamples::silence(self.frames);
        let (mut in_l, mut in_r) = (vec![0.0; block], vec![0.0; block]);
        let mut report = XrunReport::default();
        let mut pos = 0;

        while pos < self.frames {
            let n = block.min(self.frames - pos);
            match self.config.input_channels {
                0 => {
                    in_l[..n].fill(0.0);
                    in_r[..n].fill(0.0);
                }
                1 => {
                    fill_from(&mut in_l, &self.input.left, pos, n);
                    in_r[..n].copy_from_slice(&in_l[..n]);
                }
                _ => {
                    fill_from(&mut in_l, &self.input.left, pos, n);
                    fill_from(&mut in_r, &self.input.right, pos, n);
                }
            }

            let mut audio = AudioBlock {
                frames: n,
                position: pos as u64,
                in_l: &in_l[..n],
                in_r: &in_r[..n],
                out_l: &mut out.left[pos..pos + n],
                out_r: &mut out.right[pos..pos + n],
            };
            match callback(&mut audio)? {
                ControlFlow::Continue(cycle) => report.record(&cycle),
                ControlFlow::Break(()) => {
                    out.left.truncate(pos);
                    out.right.truncate(pos);
                    break;
                }
            }
            pos += n;
        }

        if self.config.output_channels == 1 {
            out.right.clone_from(&out.left);
        }
        tracing::debug!(
            cycles = report.cycles,
            xruns = report.xruns,
            load = report.load(self.config.sample_rate),
            "offline_run: done"
        );
        self.output = out;
        Ok(report)
    }
}
