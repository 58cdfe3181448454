//! Integration tests for patchbay-config.
//!
//! Config files build engines, and sessions saved to disk reload into an
//! engine that renders the same audio.

use patchbay_config::{ConfigError, EngineConfig, Session, SessionFormat};
use patchbay_core::{
    Engine, NodeAddress, OutputTarget, PortAddress, SendTarget, StageRef, TrackKind,
};
use tempfile::TempDir;

const BLOCK: usize = 64;

fn offline_config() -> EngineConfig {
    EngineConfig::from_toml(
        r#"
        [engine]
        sample_rate = 44100
        block_size = 64

        [scheduler]
        worker_threads = 0
        background_compile = false

        [mixer]
        fade_frames = 64
        "#,
    )
    .unwrap()
}

fn build_mix(engine: &mut Engine) {
    let verb = engine.add_track(TrackKind::Bus, "Verb").unwrap();
    let vox = engine.add_track(TrackKind::Audio, "Vox").unwrap();
    engine
        .connect(
            &PortAddress::new(NodeAddress::HardwareInput, "in_l"),
            &PortAddress::track(vox, "in_l"),
            1.0,
        )
        .unwrap();
    engine.insert_plugin(vox, StageRef::insert(0), "gain").unwrap();
    engine.set_send(vox, 6, SendTarget::main(verb)).unwrap();
    engine.set_send_amount(vox, 6, 0.5).unwrap();
    engine.set_balance(vox, -0.25).unwrap();
    engine.set_volume(verb, 0.8).unwrap();
}

fn render(engine: &mut Engine) -> Vec<f32> {
    let input: Vec<f32> = (0..BLOCK).map(|i| (i as f32 * 0.1).sin() * 0.5).collect();
    let (mut l, mut r) = (vec![0.0; BLOCK], vec![0.0; BLOCK]);
    let mut out = Vec::new();
    for _ in 0..4 {
        engine.process_block(&input, &input, &mut l, &mut r).unwrap();
        out.extend(l.iter().chain(&r));
    }
    out
}

#[test]
fn config_file_builds_engine() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("conf/patchbay.toml");
    offline_config().save(&path).unwrap();

    let options = EngineConfig::load(&path).unwrap().to_options().unwrap();
    assert_eq!(options.sample_rate, 44_100.0);
    assert_eq!(options.max_block, BLOCK);
    let engine = Engine::new(options).unwrap();
    assert_eq!(engine.tracks().count(), 1);
}

#[test]
fn session_reloads_same_audio_in_both_formats() {
    let options = offline_config().to_options().unwrap();
    let mut original = Engine::new(options).unwrap();
    build_mix(&mut original);
    let session = Session::capture("mix", &original).with_description("vocal with reverb send");
    let reference = render(&mut original);
    assert!(reference.iter().any(|s| s.abs() > 1e-3));

    let temp = TempDir::new().unwrap();
    for file in ["mix.toml", "mix.json"] {
        let path = temp.path().join(file);
        session.save(&path).unwrap();
        let loaded = Session::load(&path).unwrap();
        assert_eq!(loaded, session, "{file}");

        let mut engine = Engine::new(options).unwrap();
        loaded.apply(&mut engine).unwrap();
        let audio = render(&mut engine);
        for (a, b) in reference.iter().zip(&audio) {
            assert!((a - b).abs() < 1e-5, "{file}: {a} vs {b}");
        }
    }
}

#[test]
fn session_replaces_existing_tracks() {
    let options = offline_config().to_options().unwrap();
    let mut source = Engine::new(options).unwrap();
    let bus = source.add_track(TrackKind::Bus, "Only Bus").unwrap();
    let session = Session::capture("small", &source);

    let mut target = Engine::new(options).unwrap();
    build_mix(&mut target);
    session.apply(&mut target).unwrap();
    let names: Vec<_> = target.tracks().map(|t| t.name().to_string()).collect();
    assert_eq!(names, ["Master", "Only Bus"]);
    assert_eq!(target.track(bus).unwrap().output(), OutputTarget::Master);
}

#[test]
fn bad_extension_is_reported() {
    let temp = TempDir::new().unwrap();
    let session = Session::new("x", Default::default());
    assert!(matches!(
        session.save(temp.path().join("x.yml")),
        Err(ConfigError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        Session::load(temp.path().join("missing.toml")),
        Err(ConfigError::ReadFile { .. })
    ));
}

#[test]
fn hand_written_toml_session() {
    let text = r#"
        name = "hand written"
        version = 1

        [[snapshot.tracks]]
        id = 0
        name = "Master"
        kind = "master"

        [[snapshot.tracks]]
        id = 5
        name = "Synth"
        kind = "instrument"
        output = "master"

        [[snapshot.tracks.stages]]
        kind = "sine_synth"
        [snapshot.tracks.stages.at]
        stage = "instrument"
    "#;
    let session = Session::parse(text, SessionFormat::Toml).unwrap();
    let mut engine = Engine::new(offline_config().to_options().unwrap()).unwrap();
    session.apply(&mut engine).unwrap();
    let synth = engine.tracks().find(|t| t.name() == "Synth").unwrap();
    assert_eq!(synth.kind(), TrackKind::Instrument);
    assert!(synth.stage(StageRef::instrument()).is_some());
}
