//! Global and per-case reports.
//!
//! Reports are written from the ordered results the runner hands back; JSON
//! carries everything, Markdown is a human summary of the same data.
use crate::config::{scalar_to_string, Config, ReportFormat, ReportingConfig};
use crate::executor::CommandRecord;
use crate::runner::{CaseResult, CaseStatus};
use crate::template::{render, TemplateContext};
use crate::util::{display_path, now_epoch_ms, resolve_against, write_json, write_text};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Which engine entry point produced the results.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportMode {
    Run,
    Replay,
}

impl ReportMode {
    fn as_str(self) -> &'static str {
        match self {
            ReportMode::Run => "run",
            ReportMode::Replay => "replay",
        }
    }
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub pass: usize,
    pub fail: usize,
    pub failure: usize,
    pub error: usize,
}

impl StatusCounts {
    pub fn from_results(results: &[CaseResult]) -> Self {
        let mut counts = StatusCounts::default();
        for result in results {
            counts.total += 1;
            match result.status {
                CaseStatus::Pass => counts.pass += 1,
                CaseStatus::Fail => counts.fail += 1,
                CaseStatus::Failure => counts.failure += 1,
                CaseStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn all_passed(&self) -> bool {
        self.pass == self.total
    }
}

#[derive(Serialize)]
struct GlobalCaseEntry<'a> {
    case_id: &'a str,
    status: CaseStatus,
    differences: &'a [String],
    errors: &'a [String],
    reports: Vec<String>,
}

#[derive(Serialize)]
struct GlobalReport<'a> {
    schema_version: u32,
    generated_at_epoch_ms: u128,
    mode: ReportMode,
    totals: StatusCounts,
    cases: Vec<GlobalCaseEntry<'a>>,
}

#[derive(Serialize)]
struct CaseReport<'a> {
    schema_version: u32,
    generated_at_epoch_ms: u128,
    mode: ReportMode,
    #[serde(flatten)]
    result: &'a CaseResult,
}

fn with_extension(path: PathBuf, format: ReportFormat) -> PathBuf {
    let mut raw: OsString = path.into_os_string();
    raw.push(".");
    raw.push(format.extension());
    PathBuf::from(raw)
}

fn global_stem(config: &Config, reporting: &ReportingConfig) -> PathBuf {
    resolve_against(&config.base_dir, Path::new(&reporting.global_report))
}

fn case_stem(config: &Config, reporting: &ReportingConfig, case_id: &str) -> Result<PathBuf> {
    let mut context = TemplateContext::new();
    context.insert("case_id", case_id);
    let rendered = render(&reporting.case_report, &context)
        .with_context(|| format!("render reporting.case_report for case {case_id}"))?;
    Ok(resolve_against(&config.base_dir, Path::new(&rendered)))
}

/// Every report file the config can produce, global reports first.
pub fn report_paths(config: &Config) -> Result<Vec<PathBuf>> {
    let Some(reporting) = &config.reporting else {
        return Ok(Vec::new());
    };
    let mut paths = Vec::new();
    for format in &reporting.formats {
        paths.push(with_extension(global_stem(config, reporting), *format));
    }
    for case in &config.cases {
        let stem = case_stem(config, reporting, &case.case_id)?;
        for format in &reporting.formats {
            paths.push(with_extension(stem.clone(), *format));
        }
    }
    Ok(paths)
}

/// Write global and per-case reports; returns the written paths.
///
/// A config without a `reporting` section writes nothing.
pub fn write_reports(
    config: &Config,
    mode: ReportMode,
    results: &[CaseResult],
) -> Result<Vec<PathBuf>> {
    let Some(reporting) = &config.reporting else {
        return Ok(Vec::new());
    };
    let generated_at_epoch_ms = now_epoch_ms()?;
    let mut written = Vec::new();
    let mut entries = Vec::with_capacity(results.len());

    for result in results {
        let stem = case_stem(config, reporting, &result.case_id)?;
        let mut reports = Vec::new();
        let report = CaseReport {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at_epoch_ms,
            mode,
            result,
        };
        for format in &reporting.formats {
            let path = with_extension(stem.clone(), *format);
            match format {
                ReportFormat::Json => write_json(&path, &report)?,
                ReportFormat::Md => write_text(&path, &case_markdown(mode, result))?,
            }
            reports.push(display_path(&path, Some(config.base_dir.as_path())));
            written.push(path);
        }
        entries.push(GlobalCaseEntry {
            case_id: &result.case_id,
            status: result.status,
            differences: &result.differences,
            errors: &result.errors,
            reports,
        });
    }

    let global = GlobalReport {
        schema_version: REPORT_SCHEMA_VERSION,
        generated_at_epoch_ms,
        mode,
        totals: StatusCounts::from_results(results),
        cases: entries,
    };
    for format in &reporting.formats {
        let path = with_extension(global_stem(config, reporting), *format);
        match format {
            ReportFormat::Json => write_json(&path, &global)?,
            ReportFormat::Md => write_text(&path, &global_markdown(&global))?,
        }
        written.push(path);
    }
    tracing::info!(count = written.len(), "reports written");
    Ok(written)
}

fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', "<br>")
}

fn joined_fields(fields: &BTreeMap<String, Value>) -> String {
    if fields.is_empty() {
        return "-".to_string();
    }
    fields
        .iter()
        .map(|(key, value)| {
            let text = scalar_to_string(value).unwrap_or_else(|_| value.to_string());
            format!("{key}={text}")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn global_markdown(report: &GlobalReport<'_>) -> String {
    let totals = &report.totals;
    let mut out = String::new();
    let _ = writeln!(out, "# Regression report ({})\n", report.mode.as_str());
    let _ = writeln!(
        out,
        "- Cases: {} (PASS {}, FAIL {}, FAILURE {}, ERROR {})\n",
        totals.total, totals.pass, totals.fail, totals.failure, totals.error
    );
    out.push_str("| Case | Status | Differences | Errors |\n");
    out.push_str("| --- | --- | --- | --- |\n");
    for entry in &report.cases {
        let _ = writeln!(
            out,
            "| {} | {} | {} | {} |",
            cell(entry.case_id),
            entry.status,
            entry.differences.len(),
            entry.errors.len()
        );
    }
    out
}

fn command_row(out: &mut String, record: &CommandRecord) {
    let _ = writeln!(
        out,
        "| {} | {} | {} | {} | {} | `{}` |",
        record.step,
        cell(&record.version),
        record.returncode,
        if record.timed_out { "yes" } else { "no" },
        record.duration_ms,
        cell(&record.command)
    );
}

fn case_markdown(mode: ReportMode, result: &CaseResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Case {}\n", result.case_id);
    let _ = writeln!(out, "- Status: {}", result.status);
    let _ = writeln!(out, "- Mode: {}", mode.as_str());
    let _ = writeln!(out, "- Params: {}", joined_fields(&result.params));
    let _ = writeln!(out, "- Metadata: {}", joined_fields(&result.metadata));

    if !result.differences.is_empty() {
        out.push_str("\n## Differences\n\n");
        for path in &result.differences {
            let _ = writeln!(out, "- `{path}`");
        }
    }
    if !result.errors.is_empty() {
        out.push_str("\n## Errors\n\n");
        for error in &result.errors {
            let _ = writeln!(out, "- {error}");
        }
    }
    if !result.commands.is_empty() {
        out.push_str("\n## Commands\n\n");
        out.push_str("| Step | Version | Exit | Timed out | Duration (ms) | Command |\n");
        out.push_str("| --- | --- | --- | --- | --- | --- |\n");
        for record in &result.commands {
            command_row(&mut out, record);
        }
    }
    out
}
