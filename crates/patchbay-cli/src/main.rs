//! Patchbay CLI - render and inspect routing sessions.

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "patchbay")]
#[command(author, version, about = "Patchbay routing engine CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a session to a WAV file
    Render(commands::render::RenderArgs),

    /// Print a session's tracks, routing and processing order
    Graph(commands::graph::GraphArgs),

    /// Display WAV file metadata
    Info(commands::info::InfoArgs),

    /// Write a default engine config and an example session
    Init(commands::init::InitArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();
    tracing_log::LogTracer::init().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => commands::render::run(args),
        Commands::Graph(args) => commands::graph::run(args),
        Commands::Info(args) => commands::info::run(args),
        Commands::Init(args) => commands::init::run(args),
    }
}
