//! Scaffold a config file and an example session.

use std::path::{Path, PathBuf};

use clap::Args;
use patchbay_config::{EngineConfig, Session, ensure_user_sessions_dir, user_config_file};
use patchbay_core::{
    Engine, EngineOptions, NodeAddress, OutputTarget, PortAddress, SendTarget, StageRef, TrackKind,
};

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the engine config (defaults to the user config file)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Where to write the example session (defaults to the user sessions directory)
    #[arg(long)]
    session: Option<PathBuf>,

    /// Overwrite existing files
    #[arg(short, long)]
    force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let config_path = args.config.unwrap_or_else(user_config_file);
    let config = EngineConfig::default();
    if write_guard(&config_path, args.force)? {
        config.save(&config_path)?;
        println!("Wrote config:  {}", config_path.display());
    }

    let session_path = match args.session {
        Some(path) => path,
        None => ensure_user_sessions_dir()?.join("example.toml"),
    };
    if write_guard(&session_path, args.force)? {
        let session = example_session(&config)?;
        session.save(&session_path)?;
        println!("Wrote session: {}", session_path.display());
        println!();
        println!("Try:");
        println!("  patchbay graph {}", session_path.display());
        println!("  patchbay render {} out.wav --duration 2", session_path.display());
    }
    Ok(())
}

/// `true` if `path` may be written.
fn write_guard(path: &Path, force: bool) -> anyhow::Result<bool> {
    if path.exists() && !force {
        println!("Exists, skipping (use --force): {}", path.display());
        return Ok(false);
    }
    Ok(true)
}

/// Instrument and a sidechain-ducked pad summed on a bus, plus a test tone.
pub fn example_session(config: &EngineConfig) -> anyhow::Result<Session> {
    let mut engine = Engine::new(EngineOptions {
        background_compile: false,
        worker_threads: 0,
        ..config.to_options()?
    })?;

    let lead = engine.add_track(TrackKind::Instrument, "Lead")?;
    engine.insert_plugin(lead, StageRef::instrument(), "sine_synth")?;
    engine.insert_plugin(lead, StageRef::insert(0), "gain")?;
    engine.set_control(&PortAddress::track(lead, "insert0.gain_db"), -6.0)?;

    let pad = engine.add_track(TrackKind::Audio, "Pad")?;
    engine.insert_plugin(pad, StageRef::insert(0), "ducker")?;
    engine.connect(
        &PortAddress::new(NodeAddress::HardwareInput, "in_l"),
        &PortAddress::track(pad, "in_l"),
        1.0,
    )?;
    engine.connect(
        &PortAddress::new(NodeAddress::HardwareInput, "in_r"),
        &PortAddress::track(pad, "in_r"),
        1.0,
    )?;

    let bus = engine.add_track(TrackKind::Bus, "Music")?;
    engine.set_output(lead, OutputTarget::Track(bus))?;
    engine.set_output(pad, OutputTarget::Track(bus))?;
    engine.set_send(lead, 6, SendTarget::sidechain(pad))?;
    engine.set_send_amount(lead, 6, 1.0)?;
    engine.set_volume(bus, 0.8)?;

    let tone = engine.add_processor("tone")?;
    engine.connect(
        &PortAddress::processor(tone, "out_l"),
        &PortAddress::track(bus, "in_l"),
        0.25,
    )?;

    Ok(Session::capture("example", &engine)
        .with_description("instrument and ducked pad summed on a bus"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn example_session_restores() {
        let config = EngineConfig::default();
        let session = example_session(&config).unwrap();
        assert_eq!(session.track_count(), 4);
        let mut engine = Engine::new(EngineOptions::offline(48_000.0, 512)).unwrap();
        session.apply(&mut engine).unwrap();
        assert_eq!(engine.snapshot(), session.snapshot);
    }
}
