//! Audio I/O for patchbay.
//!
//! This crate provides:
//!
//! - **WAV file I/O**: [`read_wav_stereo`] and [`write_wav_stereo`]
//! - **Backend interface**: the object-safe [`AudioBackend`] trait that drives
//!   an engine's [`ProcessHandle`](patchbay_core::ProcessHandle) once per cycle
//! - **Offline rendering**: [`OfflineBackend`] and [`bounce`] for export
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use patchbay_core::{Engine, EngineOptions};
//! use patchbay_io::{BounceOptions, WavSpec, bounce, read_wav_stereo, write_wav_stereo};
//!
//! let (input, spec) = read_wav_stereo("input.wav")?;
//! let engine = Engine::new(EngineOptions::offline(spec.sample_rate as f32, 512))?;
//!
//! let result = bounce(&engine.handle(), &input, &BounceOptions::new(spec.sample_rate, 512))?;
//! write_wav_stereo("mix.wav", &result.audio, WavSpec { channels: 2, ..spec })?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
mod bounce;
mod offline;
mod wav;

pub use backend::{
    AudioBackend, AudioBlock, BackendConfig, ProcessCallback, XrunReport, process_callback,
};
pub use bounce::{
    BounceOptions, BounceResult, OutputTap, bounce, bounce_with_progress, engine_callback,
};
pub use offline::OfflineBackend;
pub use wav::{
    StereoSamples, WavFormat, WavInfo, WavSpec, read_wav_info, read_wav_stereo, write_wav_stereo,
};

/// Error types for audio I/O operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// WAV file read/write error.
    #[error("WAV file error: {0}")]
    Wav(#[from] hound::Error),

    /// The requested sample format is not supported.
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Backend setup or runtime error.
    #[error("Audio backend error: {0}")]
    Backend(String),

    /// The engine rejected a cycle.
    #[error("Engine error: {0}")]
    Engine(#[from] patchbay_core::EngineError),

    /// Standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type for audio I/O operations.
pub type Result<T> = std::result::Result<T, Error>;
