//! Case orchestration.
//!
//! A case is planned completely (contexts built, every template rendered)
//! before anything touches the filesystem or spawns a process, so template
//! mistakes surface as `ERROR` without half-run pipelines. Run and replay share
//! the same comparison step, which keeps their `PASS`/`FAIL` verdicts identical.
mod classify;
mod types;

use crate::compare::{compare_artifact_roots, FilterPolicy};
use crate::config::{Case, CleanupPolicy, Config, PipelineStep};
use crate::context::{build_compare_context, build_version_context, resolve_roots, VersionContext};
use crate::executor::{execute, CommandRecord, CommandRequest};
use crate::maintenance::remove_dir_guarded;
use crate::template::{render, TemplateContext};
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use classify::{classify, failure_lines};
pub use types::{CaseResult, CaseStatus};

/// Version tag used for the cross-version `compare` step.
pub const COMPARE_VERSION_TAG: &str = "compare";

struct PlannedCommand {
    step: PipelineStep,
    version: String,
    command: String,
    cwd: PathBuf,
    env: BTreeMap<String, String>,
}

struct CasePlan {
    contexts: Vec<VersionContext>,
    commands: Vec<PlannedCommand>,
    pair: Option<(PathBuf, PathBuf)>,
}

/// Pick the cases named on the command line, or all of them.
pub fn select_cases<'c>(config: &'c Config, ids: &[String]) -> Result<Vec<&'c Case>> {
    if ids.is_empty() {
        return Ok(config.cases.iter().collect());
    }
    ids.iter()
        .map(|id| {
            config
                .cases
                .iter()
                .find(|case| &case.case_id == id)
                .ok_or_else(|| anyhow!("unknown case {id:?}"))
        })
        .collect()
}

/// Drives cases against one validated config.
pub struct Runner<'a> {
    config: &'a Config,
}

impl<'a> Runner<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Run cases, optionally on `jobs` worker threads; results keep case order.
    pub fn run_all(&self, cases: &[&Case], jobs: usize) -> Vec<CaseResult> {
        let jobs = jobs.clamp(1, cases.len().max(1));
        if jobs == 1 {
            return cases.iter().map(|case| self.run_case(case)).collect();
        }

        let next = AtomicUsize::new(0);
        let (tx, rx) = mpsc::channel();
        thread::scope(|scope| {
            for _ in 0..jobs {
                let tx = tx.clone();
                let next = &next;
                scope.spawn(move || loop {
                    let index = next.fetch_add(1, Ordering::Relaxed);
                    let Some(case) = cases.get(index) else {
                        break;
                    };
                    if tx.send((index, self.run_case(case))).is_err() {
                        break;
                    }
                });
            }
        });
        drop(tx);

        let mut indexed: Vec<(usize, CaseResult)> = rx.into_iter().collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    pub fn replay_all(&self, cases: &[&Case]) -> Vec<CaseResult> {
        cases.iter().map(|case| self.replay_case(case)).collect()
    }

    /// Execute the full pipeline for one case and classify it.
    pub fn run_case(&self, case: &Case) -> CaseResult {
        tracing::info!(case_id = %case.case_id, "running case");
        let mut commands = Vec::new();
        let result = match self.execute_case(case, &mut commands) {
            Ok(differences) => {
                let status = classify(&commands, &differences);
                let errors = failure_lines(&commands);
                case_result(case, status, differences, commands, errors)
            }
            Err(err) => case_result(
                case,
                CaseStatus::Error,
                Vec::new(),
                commands,
                vec![format!("{err:#}")],
            ),
        };
        self.cleanup_workspaces(case, result.status);
        tracing::info!(
            case_id = %case.case_id,
            status = %result.status,
            differences = result.differences.len(),
            "case complete"
        );
        result
    }

    /// Re-derive a case's verdict from artifacts already on disk.
    pub fn replay_case(&self, case: &Case) -> CaseResult {
        tracing::info!(case_id = %case.case_id, "replaying case");
        let mut artifacts: BTreeMap<&str, PathBuf> = BTreeMap::new();
        let mut errors = Vec::new();
        for version in self.config.versions.iter() {
            match resolve_roots(self.config, case, version) {
                Ok(roots) if roots.artifacts_root.is_dir() => {
                    artifacts.insert(version.key.as_str(), roots.artifacts_root);
                }
                Ok(roots) => errors.push(format!(
                    "artifacts for version {} missing at {}",
                    version.key,
                    roots.artifacts_root.display()
                )),
                Err(err) => errors.push(format!("version {}: {err:#}", version.key)),
            }
        }
        if !errors.is_empty() {
            return case_result(case, CaseStatus::Error, Vec::new(), Vec::new(), errors);
        }

        let pair = self
            .canonical_keys()
            .and_then(|(left, right)| Some((artifacts.get(left)?, artifacts.get(right)?)));
        match self.diff_pair(case, pair.map(|(left, right)| (left.as_path(), right.as_path()))) {
            Ok(differences) => {
                let status = classify(&[], &differences);
                case_result(case, status, differences, Vec::new(), Vec::new())
            }
            Err(err) => case_result(
                case,
                CaseStatus::Error,
                Vec::new(),
                Vec::new(),
                vec![format!("{err:#}")],
            ),
        }
    }

    /// Configured pair, else `baseline`/`candidate` with `left`/`right` fallbacks.
    fn canonical_keys(&self) -> Option<(&'a str, &'a str)> {
        let config = self.config;
        if let Some(pair) = &config.comparison {
            return Some((pair.left.as_str(), pair.right.as_str()));
        }
        let versions = &config.versions;
        let left = versions.get("baseline").or_else(|| versions.get("left"))?;
        let right = versions.get("candidate").or_else(|| versions.get("right"))?;
        Some((left.key.as_str(), right.key.as_str()))
    }

    fn timeout(&self) -> Result<Option<Duration>> {
        self.config
            .execution
            .timeout_seconds
            .map(|seconds| {
                Duration::try_from_secs_f64(seconds)
                    .with_context(|| format!("invalid timeout_seconds {seconds}"))
            })
            .transpose()
    }

    fn render_env(&self, context: &TemplateContext) -> Result<BTreeMap<String, String>> {
        let mut env = BTreeMap::new();
        for (key, value) in &self.config.execution.env {
            let rendered =
                render(value, context).with_context(|| format!("render execution.env.{key}"))?;
            env.insert(key.clone(), rendered);
        }
        Ok(env)
    }

    fn plan_case(&self, case: &Case) -> Result<CasePlan> {
        let config = self.config;
        let mut contexts = Vec::new();
        for version in config.versions.iter() {
            contexts.push(
                build_version_context(config, case, version)
                    .with_context(|| format!("build context for version {}", version.key))?,
            );
        }

        let mut commands = Vec::new();
        for context in &contexts {
            let mut env = self.render_env(&context.values)?;
            env.insert("REGX_CASE_ID".to_string(), case.case_id.clone());
            env.insert(
                "WORKSPACE_ROOT".to_string(),
                context.roots.workspace_root.display().to_string(),
            );
            env.insert(
                "ARTIFACTS_ROOT".to_string(),
                context.roots.artifacts_root.display().to_string(),
            );
            for (step, source) in config.cmd_templates.version_steps() {
                let command = render(source, &context.values).with_context(|| {
                    format!("render {step} template for version {}", context.version)
                })?;
                commands.push(PlannedCommand {
                    step,
                    version: context.version.clone(),
                    command,
                    cwd: context.roots.workspace_root.clone(),
                    env: env.clone(),
                });
            }
        }

        let find = |key: &str| contexts.iter().find(|context| context.version == key);
        let pair_contexts = self
            .canonical_keys()
            .and_then(|(left, right)| Some((find(left)?, find(right)?)));

        if let Some(source) = config.cmd_templates.compare.as_deref() {
            let (baseline, candidate) = pair_contexts.ok_or_else(|| {
                anyhow!("cmd_templates.compare needs a baseline/candidate version pair")
            })?;
            let compare_context = build_compare_context(case, baseline, candidate)?;
            let command =
                render(source, &compare_context).context("render compare template")?;
            let mut env = self.render_env(&compare_context)?;
            env.insert("REGX_CASE_ID".to_string(), case.case_id.clone());
            commands.push(PlannedCommand {
                step: PipelineStep::Compare,
                version: COMPARE_VERSION_TAG.to_string(),
                command,
                cwd: baseline.roots.workspace_root.clone(),
                env,
            });
        }

        let pair = pair_contexts.map(|(left, right)| {
            (
                left.roots.artifacts_root.clone(),
                right.roots.artifacts_root.clone(),
            )
        });
        Ok(CasePlan {
            contexts,
            commands,
            pair,
        })
    }

    fn execute_case(&self, case: &Case, commands: &mut Vec<CommandRecord>) -> Result<Vec<String>> {
        let plan = self.plan_case(case)?;
        let timeout = self.timeout()?;

        for context in &plan.contexts {
            for dir in [&context.roots.workspace_root, &context.roots.artifacts_root] {
                fs::create_dir_all(dir).with_context(|| {
                    format!("create {} for version {}", dir.display(), context.version)
                })?;
            }
        }

        for planned in &plan.commands {
            commands.push(execute(&CommandRequest {
                command: &planned.command,
                cwd: &planned.cwd,
                version: &planned.version,
                step: planned.step,
                env: &planned.env,
                timeout,
            })?);
        }

        if commands.iter().any(|record| !record.succeeded) {
            return Ok(Vec::new());
        }
        self.diff_pair(
            case,
            plan.pair
                .as_ref()
                .map(|(left, right)| (left.as_path(), right.as_path())),
        )
    }

    fn diff_pair(&self, case: &Case, pair: Option<(&Path, &Path)>) -> Result<Vec<String>> {
        let Some((left, right)) = pair else {
            tracing::debug!(case_id = %case.case_id, "no canonical version pair; skipping comparison");
            return Ok(Vec::new());
        };
        let filters = &self.config.filters;
        let extra_ignore: &[String] = if filters.extra_ignore_allowed {
            &case.extra_ignore
        } else {
            &[]
        };
        let policy = FilterPolicy::new(&filters.include, &filters.ignore, extra_ignore)?;
        compare_artifact_roots(left, right, &policy)
            .with_context(|| format!("compare artifacts for case {}", case.case_id))
    }

    fn cleanup_workspaces(&self, case: &Case, status: CaseStatus) {
        let wanted = match self.config.execution.cleanup {
            CleanupPolicy::Never => false,
            CleanupPolicy::OnPass => status == CaseStatus::Pass,
            CleanupPolicy::Always => true,
        };
        if !wanted {
            return;
        }
        let roots: Vec<_> = self
            .config
            .versions
            .iter()
            .filter_map(|version| resolve_roots(self.config, case, version).ok())
            .collect();
        for workspace in roots.iter().map(|roots| &roots.workspace_root) {
            if roots
                .iter()
                .any(|other| other.artifacts_root.starts_with(workspace))
            {
                tracing::debug!(
                    workspace = %workspace.display(),
                    "workspace holds artifacts; keeping it"
                );
                continue;
            }
            if let Err(err) = remove_dir_guarded(workspace, &self.config.base_dir) {
                tracing::warn!(
                    case_id = %case.case_id,
                    workspace = %workspace.display(),
                    "workspace cleanup failed: {err:#}"
                );
            }
        }
    }
}

fn case_result(
    case: &Case,
    status: CaseStatus,
    differences: Vec<String>,
    commands: Vec<CommandRecord>,
    errors: Vec<String>,
) -> CaseResult {
    CaseResult {
        case_id: case.case_id.clone(),
        status,
        differences,
        commands,
        errors,
        params: case.params.clone(),
        metadata: case.metadata.clone(),
    }
}

#[cfg(all(test, unix))]
mod tests;
