//! Integration tests for patchbay-io: engine bounce to WAV and back.

use patchbay_core::{Engine, EngineOptions, NodeAddress, OutputTarget, PortAddress, TrackKind};
use patchbay_io::{
    AudioBackend, BackendConfig, BounceOptions, OfflineBackend, OutputTap, StereoSamples, WavSpec,
    bounce, engine_callback, read_wav_info, read_wav_stereo, write_wav_stereo,
};
use tempfile::NamedTempFile;

const SR: u32 = 48_000;
const BLOCK: usize = 128;

fn sine(freq: f32, frames: usize) -> StereoSamples {
    StereoSamples::from_mono(
        (0..frames)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin() * 0.5)
            .collect(),
    )
}

fn engine(workers: usize) -> Engine {
    Engine::new(EngineOptions {
        worker_threads: workers,
        fade_frames: BLOCK,
        ..EngineOptions::offline(SR as f32, BLOCK)
    })
    .unwrap()
}

/// Input → two tracks → bus → Master.
fn routed(workers: usize) -> Engine {
    let mut engine = engine(workers);
    let bus = engine.add_track(TrackKind::Bus, "Bus").unwrap();
    for (name, port) in [("L", "in_l"), ("R", "in_r")] {
        let track = engine.add_track(TrackKind::Audio, name).unwrap();
        engine
            .connect(
                &PortAddress::new(NodeAddress::HardwareInput, port),
                &PortAddress::track(track, port),
                1.0,
            )
            .unwrap();
        engine.set_output(track, OutputTarget::Track(bus)).unwrap();
    }
    engine.set_volume(bus, 0.5).unwrap();
    engine
}

// ---------------------------------------------------------------------------
// Bounce
// ---------------------------------------------------------------------------

#[test]
fn bounce_to_wav_and_back() {
    let engine = routed(0);
    let input = sine(440.0, SR as usize / 4);
    let result = bounce(
        &engine.handle(),
        &input,
        &BounceOptions::new(SR, BLOCK).with_tail(1000),
    )
    .unwrap();
    assert_eq!(result.audio.len(), input.len() + 1000);
    assert!(result.audio.peak() > 0.05);
    assert!(result.audio.left.iter().all(|s| s.is_finite()));

    let file = NamedTempFile::new().unwrap();
    write_wav_stereo(file.path(), &result.audio, WavSpec::default()).unwrap();
    let info = read_wav_info(file.path()).unwrap();
    assert_eq!(info.channels, 2);
    assert_eq!(info.num_frames, result.audio.len() as u64);
    let (loaded, _) = read_wav_stereo(file.path()).unwrap();
    assert_eq!(loaded, result.audio);
}

#[test]
fn worker_threads_render_identically() {
    let input = sine(220.0, 4096);
    let options = BounceOptions::new(SR, BLOCK);
    let inline = bounce(&routed(0).handle(), &input, &options).unwrap();
    let threaded = bounce(&routed(3).handle(), &input, &options).unwrap();
    for (a, b) in inline.audio.left.iter().zip(&threaded.audio.left) {
        assert!((a - b).abs() < 1e-6, "{a} vs {b}");
    }
}

#[test]
fn monitor_tap_follows_listen() {
    let mut engine = routed(0);
    let solo_track = engine.tracks().find(|t| t.name() == "L").unwrap().id();
    engine.set_listen(solo_track, true).unwrap();
    let input = sine(330.0, 2048);
    let master = bounce(&engine.handle(), &input, &BounceOptions::new(SR, BLOCK)).unwrap();
    let monitor = bounce(
        &engine.handle(),
        &input,
        &BounceOptions::new(SR, BLOCK).with_tap(OutputTap::Monitor),
    )
    .unwrap();
    assert!(monitor.audio.peak() > 0.0);
    assert_ne!(master.audio, monitor.audio);
}

// ---------------------------------------------------------------------------
// Backend trait object
// ---------------------------------------------------------------------------

#[test]
fn backend_runs_as_trait_object() {
    let engine = routed(0);
    let mut backend: Box<dyn AudioBackend> = Box::new(OfflineBackend::silent(
        BackendConfig::stereo(SR, BLOCK),
        BLOCK * 10,
    ));
    assert_eq!(backend.name(), "offline");
    assert_eq!(backend.config().block_size, BLOCK);
    let report = backend
        .run(engine_callback(engine.handle(), OutputTap::Master))
        .unwrap();
    assert_eq!(report.cycles, 10);
    assert_eq!(report.frames, (BLOCK * 10) as u64);
}
