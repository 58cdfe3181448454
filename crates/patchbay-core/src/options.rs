//! Engine construction options.

use crate::error::EngineError;
use crate::pan::PanPolicy;
use crate::processor::ProcessConfig;

/// Nodes every engine owns: hardware input, Master and Monitor.
const ENGINE_NODES: usize = 3;

/// Fixed parameters of an [`Engine`](crate::Engine).
///
/// Everything here is decided once at construction; buffers, queues and the
/// worker pool are sized from it. [`EngineOptions::validate`] runs before any
/// of that happens.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineOptions {
    /// Sample rate in Hz.
    pub sample_rate: f32,
    /// Largest block a cycle may process.
    pub max_block: usize,
    /// Real-time worker threads besides the callback thread (0 allowed).
    pub worker_threads: usize,
    /// Upper bound on graph nodes; sizes the trigger queue.
    pub max_nodes: usize,
    /// Compile on a background thread instead of inline.
    pub background_compile: bool,
    /// Length of mute fades and send-amount ramps in frames.
    pub fade_frames: usize,
    /// Events per MIDI port buffer.
    pub midi_capacity: usize,
    /// Capacity of the engine event queue.
    pub event_capacity: usize,
    /// Balance/pan behaviour of every fader.
    pub pan: PanPolicy,
    /// Monitor dim level in dB, applied to Master while any track is listened.
    pub monitor_dim_db: f32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            max_block: 512,
            worker_threads: 2,
            max_nodes: 1024,
            background_compile: true,
            fade_frames: 1024,
            midi_capacity: 512,
            event_capacity: 1024,
            pan: PanPolicy::default(),
            monitor_dim_db: -20.0,
        }
    }
}

impl EngineOptions {
    /// Options for deterministic offline use: no workers, inline compile.
    pub fn offline(sample_rate: f32, max_block: usize) -> Self {
        Self {
            sample_rate,
            max_block,
            worker_threads: 0,
            background_compile: false,
            ..Self::default()
        }
    }

    /// Check every field an engine is sized from.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidOptions`] naming the first field out of range.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |field, reason| Err(EngineError::InvalidOptions { field, reason });
        if !self.sample_rate.is_finite() || self.sample_rate <= 0.0 {
            return invalid("sample_rate", "must be a finite rate above 0 Hz");
        }
        if self.max_block == 0 {
            return invalid("max_block", "must be at least one frame");
        }
        if self.max_nodes < ENGINE_NODES {
            return invalid("max_nodes", "must hold the hardware input, Master and Monitor");
        }
        if self.event_capacity == 0 {
            return invalid("event_capacity", "must hold at least one event");
        }
        if !self.monitor_dim_db.is_finite() {
            return invalid("monitor_dim_db", "must be finite");
        }
        Ok(())
    }

    /// Instantiation parameters handed to every processor.
    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig {
            sample_rate: self.sample_rate,
            max_block: self.max_block,
            midi_capacity: self.midi_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = EngineOptions::default();
        assert_eq!(opts.max_block, 512);
        assert_eq!(opts.worker_threads, 2);
        assert_eq!(opts.fade_frames, 1024);
        assert!(opts.background_compile);
    }

    #[test]
    fn offline_is_inline_and_single_threaded() {
        let opts = EngineOptions::offline(44_100.0, 256);
        assert_eq!(opts.worker_threads, 0);
        assert!(!opts.background_compile);
        assert_eq!(opts.process_config().max_block, 256);
        assert_eq!(opts.process_config().sample_rate, 44_100.0);
    }

    #[test]
    fn validation_rejects_unusable_options() {
        assert!(EngineOptions::default().validate().is_ok());
        let field = |opts: EngineOptions| match opts.validate() {
            Err(EngineError::InvalidOptions { field, .. }) => field,
            other => panic!("expected invalid options, got {other:?}"),
        };
        assert_eq!(field(EngineOptions::offline(0.0, 32)), "sample_rate");
        assert_eq!(field(EngineOptions::offline(-48_000.0, 32)), "sample_rate");
        assert_eq!(field(EngineOptions::offline(f32::NAN, 32)), "sample_rate");
        assert_eq!(field(EngineOptions::offline(f32::INFINITY, 32)), "sample_rate");
        assert_eq!(field(EngineOptions::offline(48_000.0, 0)), "max_block");
        let base = EngineOptions::offline(48_000.0, 32);
        assert_eq!(field(EngineOptions { max_nodes: 2, ..base }), "max_nodes");
        assert_eq!(field(EngineOptions { event_capacity: 0, ..base }), "event_capacity");
        assert_eq!(field(EngineOptions { monitor_dim_db: f32::NAN, ..base }), "monitor_dim_db");
    }
}
