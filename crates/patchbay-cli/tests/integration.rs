//! Integration tests for patchbay-cli.
//!
//! Each test scaffolds a config and session with `patchbay init` into a temp
//! directory, then drives the other subcommands against them.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Helper to get the path to the `patchbay` binary built by cargo.
fn patchbay_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_patchbay"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn run(args: &[&str]) -> Output {
    patchbay_bin()
        .args(args)
        .output()
        .expect("failed to run patchbay")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn scaffold(dir: &Path) -> (PathBuf, PathBuf) {
    let config = dir.join("patchbay.toml");
    let session = dir.join("example.toml");
    let output = run(&[
        "init",
        "--config",
        config.to_str().unwrap(),
        "--session",
        session.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "init failed: {:?}", output);
    assert!(config.is_file());
    assert!(session.is_file());
    (config, session)
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = TempDir::new().unwrap();
    let (config, session) = scaffold(temp.path());
    std::fs::write(&config, "# edited\n").unwrap();

    let again = run(&[
        "init",
        "--config",
        config.to_str().unwrap(),
        "--session",
        session.to_str().unwrap(),
    ]);
    assert!(again.status.success());
    assert!(stdout(&again).contains("skipping"));
    assert_eq!(std::fs::read_to_string(&config).unwrap(), "# edited\n");
}

// ---------------------------------------------------------------------------
// graph
// ---------------------------------------------------------------------------

#[test]
fn graph_lists_tracks_and_order() {
    let temp = TempDir::new().unwrap();
    let (config, session) = scaffold(temp.path());
    let output = run(&[
        "graph",
        session.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{:?}", output);
    let text = stdout(&output);
    for expected in ["Lead", "Pad", "Music", "Master", "Processing order", "sidechain"] {
        assert!(text.contains(expected), "missing '{expected}' in:\n{text}");
    }
}

#[test]
fn graph_dot_output() {
    let temp = TempDir::new().unwrap();
    let (config, session) = scaffold(temp.path());
    let output = run(&[
        "graph",
        session.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--format",
        "dot",
        "--all",
    ]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.starts_with("digraph patchbay {"));
    assert!(text.contains("->"));
}

// ---------------------------------------------------------------------------
// render + info
// ---------------------------------------------------------------------------

#[test]
fn render_writes_wav_that_info_reads() {
    let temp = TempDir::new().unwrap();
    let (config, session) = scaffold(temp.path());
    let wav = temp.path().join("out.wav");
    let output = run(&[
        "render",
        session.to_str().unwrap(),
        wav.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--duration",
        "0.5",
        "--bit-depth",
        "24",
    ]);
    assert!(output.status.success(), "{:?}", output);
    assert!(wav.is_file());

    let info = run(&["info", wav.to_str().unwrap(), "--peak"]);
    assert!(info.status.success());
    let text = stdout(&info);
    assert!(text.contains("Channels:    2"), "{text}");
    assert!(text.contains("24-bit"), "{text}");
    assert!(text.contains("24000 frames"), "{text}");
    assert!(text.contains("Peak:"), "{text}");
}

#[test]
fn render_missing_session_fails() {
    let temp = TempDir::new().unwrap();
    let output = run(&[
        "render",
        "definitely_not_a_session_12345",
        temp.path().join("x.wav").to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Session not found"));
}

#[test]
fn render_rejects_bad_bit_depth() {
    let temp = TempDir::new().unwrap();
    let (config, session) = scaffold(temp.path());
    let output = run(&[
        "render",
        session.to_str().unwrap(),
        temp.path().join("x.wav").to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
        "--bit-depth",
        "12",
    ]);
    assert!(!output.status.success());
}
