//! nestplan Command Line Interface
//!
//! Usage:
//!   nestplan [OPTIONS] <script.json>
//!   nestplan --help
//!
//! Examples:
//!   nestplan matmul.json                  # Print the native op trace
//!   nestplan --emit=plan matmul.json      # Annotated loop listing
//!   nestplan --emit=json -o out.json matmul.json

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use log::{debug, error, info};
use nestplan::{run_script, PlanScript, ScriptOutput};
use std::fs;
use std::path::PathBuf;

/// nestplan - Loop Nest Transformation Planning
#[derive(Parser, Debug)]
#[command(name = "nestplan")]
#[command(version)]
#[command(about = "Plan and apply loop nest transformations", long_about = None)]
struct Cli {
    /// Plan script to run (.json)
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Output file (defaults to stdout)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// What to emit
    #[arg(long, default_value = "trace")]
    emit: EmitKind,

    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress warnings)
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EmitKind {
    /// Native engine calls, one per line
    Trace,
    /// Annotated loop listing
    Plan,
    /// Everything, as JSON
    Json,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Error
    } else {
        match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            2 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    info!("nestplan v{}", nestplan::VERSION);
    debug!("Input file: {:?}", cli.input);

    let script = PlanScript::load(&cli.input)
        .with_context(|| format!("Failed to load plan script: {:?}", cli.input))?;

    let output = match run_script(&script) {
        Ok(output) => output,
        Err(e) => {
            error!("Plan failed: {}", e);
            return Err(e.into());
        }
    };
    info!("Built {} ({} native op(s))", output.function_name, output.ops.len());

    let content = render(&output, cli.emit)?;
    write_output(&cli.output, &content)
}

fn render(output: &ScriptOutput, emit: EmitKind) -> Result<String> {
    Ok(match emit {
        EmitKind::Trace => {
            let mut lines = vec![format!("// {}", output.function_name)];
            lines.extend(output.ops.iter().map(|op| op.to_string()));
            lines.join("\n")
        }
        EmitKind::Plan => output.listing.clone(),
        EmitKind::Json => serde_json::to_string_pretty(output).context("Failed to serialize output")?,
    })
}

fn write_output(path: &Option<PathBuf>, content: &str) -> Result<()> {
    match path {
        Some(p) => {
            fs::write(p, content).with_context(|| format!("Failed to write output file: {:?}", p))?;
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
