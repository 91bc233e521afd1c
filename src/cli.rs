//! CLI argument parsing for the regression harness.
//!
//! The CLI stays thin: every command loads one config and hands it to the
//! engine, so behavior is the same whether cases come from the command line
//! or from tests driving the engine directly.
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "regx",
    version,
    about = "Parametric A/B regression harness",
    after_help = "Examples:\n  regx run --config regx.json\n  regx run --config regx.json --case alpha --jobs 4\n  regx replay --config regx.json\n  regx clean --config regx.json --dry-run\n\nConfigs are JSON documents with schema_version 1. YAML configs are not read.",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Replay(ReplayArgs),
    Clean(CleanArgs),
}

impl Command {
    pub fn verbose(&self) -> bool {
        match self {
            Command::Run(args) => args.selection.verbose,
            Command::Replay(args) => args.selection.verbose,
            Command::Clean(args) => args.verbose,
        }
    }
}

/// Options shared by `run` and `replay`.
#[derive(Args, Debug)]
pub struct CaseSelection {
    /// Regression config (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// Only evaluate these case ids (repeatable; default: all cases)
    #[arg(long = "case", value_name = "ID")]
    pub cases: Vec<String>,

    /// Skip writing reports even when the config declares them
    #[arg(long)]
    pub no_report: bool,

    /// Log case and command progress to stderr
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Execute every version's pipeline and compare artifacts")]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: CaseSelection,

    /// Worker threads for cases (overrides execution.jobs)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub jobs: Option<u16>,
}

#[derive(Parser, Debug)]
#[command(about = "Re-compare artifacts from a previous run without executing commands")]
pub struct ReplayArgs {
    #[command(flatten)]
    pub selection: CaseSelection,
}

#[derive(Parser, Debug)]
#[command(about = "Remove workspaces, artifacts and reports produced by a config")]
pub struct CleanArgs {
    /// Regression config (JSON)
    #[arg(long, value_name = "FILE")]
    pub config: PathBuf,

    /// List what would be removed without removing it
    #[arg(long)]
    pub dry_run: bool,

    /// Log removals to stderr
    #[arg(long)]
    pub verbose: bool,
}
