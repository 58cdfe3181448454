//! Offline session rendering command.

use std::path::PathBuf;

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use patchbay_core::EngineEvent;
use patchbay_io::{
    BounceOptions, OutputTap, StereoSamples, WavSpec, bounce_with_progress, read_wav_stereo,
    write_wav_stereo,
};

use super::common::{db, load_config, load_session, offline_options, session_engine};

#[derive(Args)]
pub struct RenderArgs {
    /// Session file or name (TOML or JSON)
    #[arg(value_name = "SESSION")]
    session: String,

    /// Output WAV file
    #[arg(value_name = "OUTPUT")]
    output: PathBuf,

    /// WAV file fed to the hardware input
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Length in seconds when there is no input file
    #[arg(short, long, default_value = "5.0")]
    duration: f32,

    /// Extra seconds rendered after the input ends
    #[arg(long, default_value = "0.0")]
    tail: f32,

    /// Engine config file (defaults to the user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the config's block size
    #[arg(long)]
    block_size: Option<usize>,

    /// Capture the monitor mix instead of Master
    #[arg(long)]
    monitor: bool,

    /// Output bit depth (16, 24, or 32)
    #[arg(long, default_value = "32")]
    bit_depth: u16,
}

pub fn run(args: RenderArgs) -> anyhow::Result<()> {
    if ![16, 24, 32].contains(&args.bit_depth) {
        anyhow::bail!("Unsupported bit depth {} (expected 16, 24 or 32)", args.bit_depth);
    }
    if args.duration < 0.0 || args.tail < 0.0 {
        anyhow::bail!("--duration and --tail must not be negative");
    }

    let config = load_config(args.config.as_deref())?;
    let options = offline_options(&config, args.block_size)?;
    let sample_rate = config.engine.sample_rate;

    let (session, path) = load_session(&args.session)?;
    println!(
        "Loading session '{}' from {} ({} tracks)",
        session.name,
        path.display(),
        session.track_count()
    );
    let mut engine = session_engine(options, &session)?;
    engine.drain_events();

    let input = match &args.input {
        Some(input_path) => {
            println!("Reading {}...", input_path.display());
            let (samples, spec) = read_wav_stereo(input_path)?;
            if spec.sample_rate != sample_rate {
                anyhow::bail!(
                    "Input is {} Hz but the engine runs at {} Hz",
                    spec.sample_rate,
                    sample_rate
                );
            }
            samples
        }
        None => StereoSamples::silence((args.duration * sample_rate as f32) as usize),
    };

    let tail = (args.tail * sample_rate as f32) as usize;
    let tap = if args.monitor {
        OutputTap::Monitor
    } else {
        OutputTap::Master
    };
    let bounce_options = BounceOptions::new(sample_rate, options.max_block)
        .with_tail(tail)
        .with_tap(tap);

    let pb = ProgressBar::new((input.len() + tail) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("##-"),
    );
    let result = bounce_with_progress(&engine.handle(), &input, &bounce_options, |done, _| {
        pb.set_position(done);
    })?;
    pb.finish_with_message("done");

    let faults = engine
        .drain_events()
        .iter()
        .filter(|e| matches!(e, EngineEvent::NodeFault { .. }))
        .count();

    let report = &result.report;
    println!("\nStats:");
    println!(
        "  Output: Peak {:.1} dB, {} frames ({:.2}s)",
        db(result.audio.peak()),
        result.audio.len(),
        result.audio.len() as f32 / sample_rate as f32
    );
    println!(
        "  Cycles: {} ({} xruns, load {:.1}%, {} workers)",
        report.cycles,
        report.xruns,
        report.load(sample_rate) * 100.0,
        options.worker_threads
    );
    if faults > 0 {
        println!("  Faults: {faults} processor(s) disabled during render (see log)");
    }

    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: args.bit_depth,
    };
    println!("\nWriting {}...", args.output.display());
    write_wav_stereo(&args.output, &result.audio, spec)?;
    println!("Done!");

    Ok(())
}
