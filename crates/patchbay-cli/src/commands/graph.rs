//! Session inspection command.

#![allow(clippy::print_literal)]

use clap::{Args, ValueEnum};
use patchbay_core::{Engine, NodeAddress, NodeId, OutputTarget, Track};

use super::common::{load_config, load_session, offline_options, session_engine};

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum GraphFormat {
    /// Human-readable tables
    #[default]
    Text,
    /// Graphviz DOT
    Dot,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Session file or name (TOML or JSON)
    #[arg(value_name = "SESSION")]
    session: String,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = GraphFormat::Text)]
    format: GraphFormat,

    /// Include engine-managed connections (track outputs, sends, monitor)
    #[arg(long)]
    all: bool,

    /// Engine config file (defaults to the user config)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

pub fn run(args: GraphArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let (session, _) = load_session(&args.session)?;
    let engine = session_engine(offline_options(&config, None)?, &session)?;

    match args.format {
        GraphFormat::Text => print_text(&engine, &session.name, args.all),
        GraphFormat::Dot => print!("{}", to_dot(&engine, args.all)),
    }
    Ok(())
}

fn node_name(engine: &Engine, node: NodeId) -> String {
    match engine.node_address(node) {
        Some(NodeAddress::Track(id)) => engine
            .track(id)
            .map_or_else(|| id.to_string(), |t| t.name().to_string()),
        Some(NodeAddress::Processor(key)) => {
            format!("{} ({})", key, engine.processor_kind(key).unwrap_or("?"))
        }
        Some(other) => other.to_string(),
        None => engine
            .graph()
            .node(node)
            .map_or_else(|| node.to_string(), |n| n.label().to_string()),
    }
}

fn output_name(engine: &Engine, track: &Track) -> String {
    match track.output() {
        OutputTarget::None => "-".into(),
        OutputTarget::Master => "Master".into(),
        OutputTarget::Track(id) => engine
            .track(id)
            .map_or_else(|| id.to_string(), |t| t.name().to_string()),
    }
}

fn print_text(engine: &Engine, name: &str, all: bool) {
    println!("Session: {name}");
    println!();
    println!("  {:4}  {:16}  {:10}  {:16}  {}", "Id", "Name", "Kind", "Output", "Stages");
    println!("  {:4}  {:16}  {:10}  {:16}  {}", "--", "----", "----", "------", "------");
    for track in engine.tracks() {
        let stages: Vec<String> = track
            .stages()
            .map(|(at, info)| format!("{at}={}[{}]", info.kind(), info.state()))
            .collect();
        println!(
            "  {:4}  {:16}  {:10}  {:16}  {}",
            track.id().index(),
            track.name(),
            track.kind().name(),
            output_name(engine, track),
            stages.join(" ")
        );
        for slot in 0..track.kind().send_slots() {
            if let Some(target) = track.send(slot) {
                let dest = engine
                    .track(target.track)
                    .map_or_else(|| target.track.to_string(), |t| t.name().to_string());
                println!(
                    "        send{slot} -> {dest}{} @ {:.2}",
                    if target.sidechain { " (sidechain)" } else { "" },
                    track.send_amount(slot).unwrap_or(0.0)
                );
            }
        }
    }

    let graph = engine.graph();
    println!();
    println!("Connections:");
    for conn in graph.connections().filter(|c| all || !c.is_managed()) {
        let port = |id| graph.port(id).map_or("?", |p| p.symbol());
        println!(
            "  {}:{} -> {}:{}  x{:.2}{}{}",
            node_name(engine, conn.src_node()),
            port(conn.src()),
            node_name(engine, conn.dst_node()),
            port(conn.dst()),
            conn.multiplier(),
            if conn.is_feedback() { " feedback" } else { "" },
            if conn.is_enabled() { "" } else { " disabled" },
        );
    }

    println!();
    match graph.topological_order() {
        Ok(order) => {
            let names: Vec<String> = order.iter().map(|n| node_name(engine, *n)).collect();
            println!("Processing order: {}", names.join(" -> "));
        }
        Err(err) => println!("Processing order unavailable: {err}"),
    }
    let scheduler = engine.scheduler();
    println!(
        "Scheduler: {} (generation {}, {} workers)",
        scheduler.state(),
        scheduler.generation().unwrap_or(0),
        scheduler.worker_count()
    );
}

fn to_dot(engine: &Engine, all: bool) -> String {
    let graph = engine.graph();
    let mut out = String::from("digraph patchbay {\n  rankdir=LR;\n  node [shape=box];\n");
    for node in graph.nodes() {
        out.push_str(&format!(
            "  n{} [label=\"{}\"];\n",
            node.id().index(),
            node_name(engine, node.id()).replace('"', "'")
        ));
    }
    for conn in graph.connections().filter(|c| all || !c.is_managed()) {
        let port = |id| graph.port(id).map_or("?", |p| p.symbol());
        let style = if conn.is_feedback() {
            ", style=dashed"
        } else if conn.is_managed() {
            ", color=gray"
        } else {
            ""
        };
        out.push_str(&format!(
            "  n{} -> n{} [label=\"{}>{}\"{}];\n",
            conn.src_node().index(),
            conn.dst_node().index(),
            port(conn.src()),
            port(conn.dst()),
            style
        ));
    }
    out.push_str("}\n");
    out
}
