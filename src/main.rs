use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod cli;
mod compare;
mod config;
mod context;
mod executor;
mod maintenance;
mod report;
mod runner;
mod template;
mod util;

use cli::{CaseSelection, CleanArgs, Command, RootArgs};
use report::{ReportMode, StatusCounts};
use runner::{CaseResult, Runner};

const LOG_ENV: &str = "REGX_LOG";

fn init_logging(verbose: bool) {
    let fallback = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<ExitCode> {
    let args = RootArgs::parse();
    init_logging(args.command.verbose());

    match args.command {
        Command::Run(run) => {
            let jobs = run.jobs.map(usize::from);
            evaluate(&run.selection, ReportMode::Run, jobs)
        }
        Command::Replay(replay) => evaluate(&replay.selection, ReportMode::Replay, None),
        Command::Clean(clean) => run_clean(&clean),
    }
}

fn evaluate(selection: &CaseSelection, mode: ReportMode, jobs: Option<usize>) -> Result<ExitCode> {
    let config = config::load_config(&selection.config)?;
    let cases = runner::select_cases(&config, &selection.cases)?;
    let runner = Runner::new(&config);
    let results = match mode {
        ReportMode::Run => {
            runner.run_all(&cases, jobs.unwrap_or_else(|| config.execution.jobs()))
        }
        ReportMode::Replay => runner.replay_all(&cases),
    };

    if !selection.no_report {
        for path in report::write_reports(&config, mode, &results)? {
            tracing::debug!(path = %path.display(), "wrote report");
        }
    }

    print_results(&results);
    let counts = StatusCounts::from_results(&results);
    println!(
        "{} cases: {} PASS, {} FAIL, {} FAILURE, {} ERROR",
        counts.total, counts.pass, counts.fail, counts.failure, counts.error
    );
    Ok(if counts.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_results(results: &[CaseResult]) {
    for result in results {
        println!("{} {}", result.status, result.case_id);
        for path in &result.differences {
            println!("  differs: {path}");
        }
        for error in &result.errors {
            println!("  error: {error}");
        }
    }
}

fn run_clean(args: &CleanArgs) -> Result<ExitCode> {
    let config = config::load_config(&args.config)?;
    let paths = maintenance::clean_paths(&config, args.dry_run)?;
    let verb = if args.dry_run { "would remove" } else { "removed" };
    for path in &paths {
        println!(
            "{verb} {}",
            util::display_path(path, Some(config.base_dir.as_path()))
        );
    }
    if paths.is_empty() {
        println!("nothing to clean");
    }
    Ok(ExitCode::SUCCESS)
}
