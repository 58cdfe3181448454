//! WAV file reading and writing.

use crate::{Error, Result};
use hound::{SampleFormat, WavReader, WavWriter};
use std::io::Read;
use std::path::Path;

/// WAV audio encoding format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavFormat {
    /// Linear PCM (integer samples).
    Pcm,
    /// IEEE 754 floating-point samples.
    IeeeFloat,
}

/// WAV file metadata extracted without loading sample data.
#[derive(Debug, Clone)]
pub struct WavInfo {
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Bit depth per sample.
    pub bits_per_sample: u16,
    /// Total number of sample frames (samples per channel).
    pub num_frames: u64,
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Audio encoding format.
    pub format: WavFormat,
}

/// Read WAV metadata without loading sample data.
pub fn read_wav_info<P: AsRef<Path>>(path: P) -> Result<WavInfo> {
    let reader = WavReader::open(path)?;
    let spec = reader.spec();
    let num_frames = u64::from(reader.len()) / u64::from(spec.channels.max(1));

    Ok(WavInfo {
        channels: spec.channels,
        sample_rate: spec.sample_rate,
        bits_per_sample: spec.bits_per_sample,
        num_frames,
        duration_secs: num_frames as f64 / f64::from(spec.sample_rate),
        format: match spec.sample_format {
            SampleFormat::Float => WavFormat::IeeeFloat,
            SampleFormat::Int => WavFormat::Pcm,
        },
    })
}

/// WAV file specification.
///
/// 32-bit files are written as float; 16 and 24-bit as integer PCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavSpec {
    /// Number of audio channels (1 = mono, 2 = stereo).
    pub channels: u16,
    /// Sample rate in Hz (e.g., 44100, 48000).
    pub sample_rate: u32,
    /// Bit depth per sample (16, 24 or 32).
    pub bits_per_sample: u16,
}

impl Default for WavSpec {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 48000,
            bits_per_sample: 32,
        }
    }
}

impl From<hound::WavSpec> for WavSpec {
    fn from(spec: hound::WavSpec) -> Self {
        Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
        }
    }
}

impl From<WavSpec> for hound::WavSpec {
    fn from(spec: WavSpec) -> Self {
        hound::WavSpec {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            bits_per_sample: spec.bits_per_sample,
            sample_format: if spec.bits_per_sample == 32 {
                SampleFormat::Float
            } else {
                SampleFormat::Int
            },
        }
    }
}

/// A pair of equal-length channel buffers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StereoSamples {
    /// Left channel.
    pub left: Vec<f32>,
    /// Right channel.
    pub right: Vec<f32>,
}

impl StereoSamples {
    /// Pair two channels, truncating the longer one.
    pub fn new(mut left: Vec<f32>, mut right: Vec<f32>) -> Self {
        let n = left.len().min(right.len());
        left.truncate(n);
        right.truncate(n);
        Self { left, right }
    }

    /// `frames` frames of silence.
    pub fn silence(frames: usize) -> Self {
        Self {
            left: vec![0.0; frames],
            right: vec![0.0; frames],
        }
    }

    /// Duplicate a mono signal to both channels.
    pub fn from_mono(samples: Vec<f32>) -> Self {
        Self {
            right: samples.clone(),
            left: samples,
        }
    }

    /// Split `[L0, R0, L1, R1, ...]` into channels.
    pub fn from_interleaved(samples: &[f32]) -> Self {
        let (left, right) = samples.chunks_exact(2).map(|f| (f[0], f[1])).unzip();
        Self { left, right }
    }

    /// Interleave into `[L0, R0, L1, R1, ...]`.
    pub fn to_interleaved(&self) -> Vec<f32> {
        self.left
            .iter()
            .zip(&self.right)
            .flat_map(|(l, r)| [*l, *r])
            .collect()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.left.len()
    }

    /// No frames.
    pub fn is_empty(&self) -> bool {
        self.left.is_empty()
    }

    /// Largest absolute sample across both channels.
    pub fn peak(&self) -> f32 {
        self.left
            .iter()
            .chain(&self.right)
            .fold(0.0f32, |m, s| m.max(s.abs()))
    }
}

/// Read a WAV file as stereo.
///
/// Mono files are duplicated to both channels. Files with more than two
/// channels keep the first two.
pub fn read_wav_stereo<P: AsRef<Path>>(path: P) -> Result<(StereoSamples, WavSpec)> {
    let reader = WavReader::open(path)?;
    let spec = WavSpec::from(reader.spec());
    let samples = decode(reader)?;
    let channels = usize::from(spec.channels);

    let stereo = match channels {
        0 => return Err(Error::UnsupportedFormat("zero channels".into())),
        1 => StereoSamples::from_mono(samples),
        2 => StereoSamples::from_interleaved(&samples),
        _ => {
            let (left, right) = samples
                .chunks_exact(channels)
                .map(|frame| (frame[0], frame[1]))
                .unzip();
            StereoSamples { left, right }
        }
    };
    Ok((stereo, spec))
}

fn decode<R: Read>(reader: WavReader<R>) -> Result<Vec<f32>> {
    let spec = reader.spec();
    match (spec.sample_format, spec.bits_per_sample) {
        (SampleFormat::Float, 32) => Ok(reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?),
        (SampleFormat::Int, bits @ (8 | 16 | 24 | 32)) => {
            let scale = (1i64 << (bits - 1)) as f32;
            Ok(reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?)
        }
        (format, bits) => Err(Error::UnsupportedFormat(format!("{format:?} {bits}-bit"))),
    }
}

/// Write stereo samples to a WAV file. `spec.channels` is forced to 2.
pub fn write_wav_stereo<P: AsRef<Path>>(
    path: P,
    samples: &StereoSamples,
    spec: WavSpec,
) -> Result<()> {
    let spec = WavSpec { channels: 2, ..spec };
    // Integer full scale, or None for float output.
    let full_scale = match spec.bits_per_sample {
        32 => None,
        bits @ (16 | 24) => Some((1i32 << (bits - 1)) as f32),
        bits => return Err(Error::UnsupportedFormat(format!("{bits}-bit output"))),
    };
    let mut writer = WavWriter::create(path, hound::WavSpec::from(spec))?;
    let frames = samples.left.iter().zip(&samples.right);

    match full_scale {
        None => {
            for (l, r) in frames {
                writer.write_sample(*l)?;
                writer.write_sample(*r)?;
            }
        }
        Some(max_val) => {
            let quantize = |s: f32| (s * max_val).clamp(-max_val, max_val - 1.0) as i32;
            for (l, r) in frames {
                writer.write_sample(quantize(*l))?;
                writer.write_sample(quantize(*r))?;
            }
        }
    }

    writer.finalize()?;
    Ok(())
}
