//! Per-case, per-version template contexts.
//!
//! Path templates only ever see `case_id`, `version` and `version_label`;
//! params and metadata are exposed to command templates as `params_<key>` and
//! `metadata_<key>` so they cannot shadow the reserved keys.
use crate::config::{scalar_to_string, Case, Config, VersionSpec};
use crate::template::{render, TemplateContext};
use crate::util::resolve_against;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRoots {
    pub workspace_root: PathBuf,
    pub artifacts_root: PathBuf,
}

/// Everything a version's pipeline needs to render and run its commands.
#[derive(Debug, Clone)]
pub struct VersionContext {
    pub version: String,
    pub label: String,
    pub roots: VersionRoots,
    pub values: TemplateContext,
}

fn preliminary_context(case: &Case, version: &VersionSpec) -> TemplateContext {
    let mut context = TemplateContext::new();
    context.insert("case_id", case.case_id.as_str());
    context.insert("version", version.key.as_str());
    context.insert("version_label", version.label.as_str());
    context
}

fn render_root(base_dir: &Path, template: &str, context: &TemplateContext) -> Result<PathBuf> {
    let rendered = render(template, context)?;
    Ok(resolve_against(base_dir, Path::new(&rendered)))
}

/// Render `paths.workspace_root` / `paths.artifacts_root` for one case×version.
pub fn resolve_roots(config: &Config, case: &Case, version: &VersionSpec) -> Result<VersionRoots> {
    let context = preliminary_context(case, version);
    let workspace_root = render_root(&config.base_dir, &config.paths.workspace_root, &context)
        .context("render paths.workspace_root")?;
    let artifacts_root = render_root(&config.base_dir, &config.paths.artifacts_root, &context)
        .context("render paths.artifacts_root")?;
    Ok(VersionRoots {
        workspace_root,
        artifacts_root,
    })
}

fn insert_case_fields(context: &mut TemplateContext, case: &Case) -> Result<()> {
    context.insert("case_id", case.case_id.as_str());
    for (key, value) in &case.params {
        let text = scalar_to_string(value).with_context(|| format!("param {key:?}"))?;
        context.insert(format!("params_{key}"), text);
    }
    for (key, value) in &case.metadata {
        let text = scalar_to_string(value).with_context(|| format!("metadata {key:?}"))?;
        context.insert(format!("metadata_{key}"), text);
    }
    Ok(())
}

pub fn build_version_context(
    config: &Config,
    case: &Case,
    version: &VersionSpec,
) -> Result<VersionContext> {
    let roots = resolve_roots(config, case, version)?;
    let mut values = preliminary_context(case, version);
    values.insert("workspace_root", roots.workspace_root.display().to_string());
    values.insert("artifacts_root", roots.artifacts_root.display().to_string());
    insert_case_fields(&mut values, case)?;
    Ok(VersionContext {
        version: version.key.clone(),
        label: version.label.clone(),
        roots,
        values,
    })
}

/// Merge the canonical pair under `_baseline` / `_candidate` suffixes.
pub fn build_compare_context(
    case: &Case,
    baseline: &VersionContext,
    candidate: &VersionContext,
) -> Result<TemplateContext> {
    let mut context = TemplateContext::new();
    insert_case_fields(&mut context, case)?;
    for (suffix, side) in [("baseline", baseline), ("candidate", candidate)] {
        context.insert(format!("version_{suffix}"), side.version.as_str());
        context.insert(format!("version_label_{suffix}"), side.label.as_str());
        context.insert(
            format!("workspace_root_{suffix}"),
            side.roots.workspace_root.display().to_string(),
        );
        context.insert(
            format!("artifacts_root_{suffix}"),
            side.roots.artifacts_root.display().to_string(),
        );
    }
    Ok(context)
}
