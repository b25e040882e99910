use clap::Parser;
use std::path::{Path, PathBuf};

use fxc::config::{CompileOptions, TargetConfig};
use fxc::encoder::OpcodeEncoder;
use fxc::graph::Graph;
use fxc::pass::PassId;
use fxc::registry::BlockRegistry;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Asm,
    Order,
    Stats,
    Dot,
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "fxc",
    version,
    about = "Effect graph compiler — compiles block-diagram audio graphs to DSP assembly"
)]
struct Cli {
    /// Input graph (.json)
    graph: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Asm)]
    emit: EmitStage,

    /// Target description overriding the standard part (.json)
    #[arg(long)]
    target: Option<PathBuf>,

    /// Skip load elision and the accumulator peephole passes
    #[arg(long)]
    no_optimize: bool,

    /// Leave out the parameter mapping comments
    #[arg(long)]
    no_parameter_comments: bool,

    /// Print compiler phases and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    log::debug!("graph  = {}", cli.graph.display());
    log::debug!("emit   = {:?}", cli.emit);

    // ── Block registry ──
    let registry = match BlockRegistry::with_builtins() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("fxc: error: {}", e);
            std::process::exit(2);
        }
    };
    log::debug!("{} block types registered", registry.len());

    // ── Read graph ──
    let source = match std::fs::read_to_string(&cli.graph) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("fxc: error: {}: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };

    if let EmitStage::BuildInfo = cli.emit {
        let provenance = fxc::pipeline::compute_provenance(&source, &registry);
        finish(cli.output.as_deref(), &provenance.to_json());
        return;
    }

    let graph = match Graph::from_json(&source) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("fxc: error: {}: invalid graph: {}", cli.graph.display(), e);
            std::process::exit(2);
        }
    };

    let target = match &cli.target {
        Some(path) => match TargetConfig::load(path) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("fxc: error: {}", e);
                std::process::exit(2);
            }
        },
        None => TargetConfig::default(),
    };
    let options = CompileOptions {
        optimize: !cli.no_optimize,
        parameter_comments: !cli.no_parameter_comments,
        ..CompileOptions::with_target(target)
    };

    // ── Compile ──
    let terminal = match cli.emit {
        EmitStage::Order | EmitStage::Dot => PassId::Schedule,
        _ => PassId::Encode,
    };
    let result = fxc::pipeline::run_pipeline(
        &graph,
        &registry,
        &options,
        &OpcodeEncoder,
        terminal,
        |_, diags| {
            for d in diags {
                eprintln!("fxc: {}", d);
            }
        },
    );
    if !result.success {
        // Partial text is written even on failure.
        if matches!(cli.emit, EmitStage::Asm) && !result.assembly.is_empty() {
            finish(cli.output.as_deref(), &result.assembly);
        }
        std::process::exit(1);
    }

    let text = match cli.emit {
        EmitStage::Asm => result.assembly,
        EmitStage::Order => result
            .schedule
            .map(|s| s.to_string())
            .unwrap_or_default(),
        EmitStage::Dot => fxc::dot::emit_dot(&graph, &registry, result.schedule.as_ref()),
        EmitStage::Stats => match serde_json::to_string_pretty(&result.statistics) {
            Ok(mut s) => {
                s.push('\n');
                s
            }
            Err(e) => {
                eprintln!("fxc: error: {}", e);
                std::process::exit(2);
            }
        },
        EmitStage::BuildInfo => return,
    };
    finish(cli.output.as_deref(), &text);
}

/// Write `text` to `path`, or stdout when no path was given.
fn finish(path: Option<&Path>, text: &str) {
    match path {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("fxc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
            log::debug!("wrote {}", path.display());
        }
        None => print!("{text}"),
    }
}
