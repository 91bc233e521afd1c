//! Guarded removal of workspaces, artifacts and reports.
//!
//! Every removal is checked against the config's base directory after
//! canonicalization, so a `..` in a path template or a symlinked root cannot
//! take the base directory (or anything above it) with it.
use crate::config::Config;
use crate::context::resolve_roots;
use crate::report::report_paths;
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

fn guarded_target(path: &Path, base_dir: &Path) -> Result<PathBuf> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("resolve {}", path.display()))?;
    let base = base_dir
        .canonicalize()
        .with_context(|| format!("resolve base directory {}", base_dir.display()))?;
    if canonical.parent().is_none() {
        return Err(anyhow!("refusing to remove filesystem root {}", canonical.display()));
    }
    if base.starts_with(&canonical) {
        return Err(anyhow!(
            "refusing to remove {}: it contains the base directory {}",
            canonical.display(),
            base.display()
        ));
    }
    Ok(canonical)
}

/// Remove empty directories from `start` upwards, stopping at `base_dir`.
fn prune_empty_parents(start: Option<&Path>, base_dir: &Path) {
    let Ok(base) = base_dir.canonicalize() else {
        return;
    };
    let mut current = start;
    while let Some(dir) = current {
        if dir == base || !dir.starts_with(&base) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        tracing::debug!(dir = %dir.display(), "pruned empty directory");
        current = dir.parent();
    }
}

/// Remove a directory tree unless it is the filesystem root, `base_dir`, or
/// an ancestor of `base_dir`. Returns `false` when nothing was there.
///
/// Parents are left in place: during a parallel run other cases may be
/// creating directories under the same parent.
pub fn remove_dir_guarded(path: &Path, base_dir: &Path) -> Result<bool> {
    Ok(remove_dir_target(path, base_dir)?.is_some())
}

fn remove_dir_target(path: &Path, base_dir: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let target = guarded_target(path, base_dir)?;
    if !target.is_dir() {
        return Err(anyhow!("{} is not a directory", target.display()));
    }
    fs::remove_dir_all(&target).with_context(|| format!("remove {}", target.display()))?;
    tracing::info!(path = %target.display(), "removed directory");
    Ok(Some(target))
}

fn remove_file_target(path: &Path, base_dir: &Path) -> Result<Option<PathBuf>> {
    if !path.exists() {
        return Ok(None);
    }
    let target = guarded_target(path, base_dir)?;
    fs::remove_file(&target).with_context(|| format!("remove {}", target.display()))?;
    tracing::info!(path = %target.display(), "removed file");
    Ok(Some(target))
}

/// Every directory the config can produce, deepest first.
fn produced_dirs(config: &Config) -> Result<Vec<PathBuf>> {
    let mut dirs = BTreeSet::new();
    for case in &config.cases {
        for version in config.versions.iter() {
            let roots = resolve_roots(config, case, version)?;
            dirs.insert(roots.workspace_root);
            dirs.insert(roots.artifacts_root);
        }
    }
    let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
    dirs.sort_by_key(|dir| std::cmp::Reverse(dir.components().count()));
    Ok(dirs)
}

/// Remove (or, with `dry_run`, list) everything a run could have written.
///
/// Returns the paths that existed. Guard violations abort before anything
/// is removed.
pub fn clean_paths(config: &Config, dry_run: bool) -> Result<Vec<PathBuf>> {
    let dirs = produced_dirs(config)?;
    let files = report_paths(config)?;

    let mut existing = Vec::new();
    for path in dirs.iter().chain(&files) {
        if path.exists() {
            guarded_target(path, &config.base_dir)?;
            existing.push(path.clone());
        }
    }
    if dry_run {
        return Ok(existing);
    }

    let mut removed = Vec::new();
    for dir in &dirs {
        if let Some(target) = remove_dir_target(dir, &config.base_dir)? {
            prune_empty_parents(target.parent(), &config.base_dir);
            removed.push(dir.clone());
        }
    }
    for file in &files {
        if let Some(target) = remove_file_target(file, &config.base_dir)? {
            prune_empty_parents(target.parent(), &config.base_dir);
            removed.push(file.clone());
        }
    }
    Ok(removed)
}
