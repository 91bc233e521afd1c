//! Artifact comparison between two artifact roots.
//!
//! Files are matched by relative path, filtered through the include/ignore
//! policy, and compared by size and then by streamed SHA-256 digest.
use crate::util::{collect_files_recursive, posix_rel_path, sha256_file_hex};
use anyhow::{anyhow, Context, Result};
use glob::{MatchOptions, Pattern};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Shell-style path glob.
///
/// A relative pattern matches from the right: it must match the whole path
/// or a tail of it that starts at a `/`, so `*.log` catches logs at any depth
/// and `tmp/*.dat` matches `run/tmp/x.dat`. A leading `/` anchors the pattern
/// at the artifact root instead. `**/*` and `**` match everything.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    kind: PatternKind,
}

#[derive(Debug, Clone)]
enum PatternKind {
    Everything,
    Anchored(Pattern),
    Tail(Pattern),
}

impl GlobPattern {
    pub fn new(source: &str) -> Result<Self> {
        let trimmed = source.trim();
        let (anchored, body) = match trimmed.strip_prefix('/') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        if body.is_empty() {
            return Err(anyhow!("glob pattern {source:?} must name something"));
        }
        let kind = if body == "**/*" || body == "**" {
            PatternKind::Everything
        } else {
            let pattern =
                Pattern::new(body).with_context(|| format!("invalid glob pattern {source:?}"))?;
            if anchored {
                PatternKind::Anchored(pattern)
            } else {
                PatternKind::Tail(pattern)
            }
        };
        Ok(Self { kind })
    }

    /// Match against a posix relative path.
    pub fn matches(&self, rel_path: &str) -> bool {
        match &self.kind {
            PatternKind::Everything => true,
            PatternKind::Anchored(pattern) => pattern.matches_with(rel_path, MATCH_OPTIONS),
            PatternKind::Tail(pattern) => std::iter::once(0)
                .chain(rel_path.match_indices('/').map(|(idx, _)| idx + 1))
                .any(|start| pattern.matches_with(&rel_path[start..], MATCH_OPTIONS)),
        }
    }
}

fn compile(patterns: &[String]) -> Result<Vec<GlobPattern>> {
    patterns
        .iter()
        .map(|pattern| GlobPattern::new(pattern))
        .collect()
}

/// Four-tier inclusion policy.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    include: Vec<GlobPattern>,
    ignore: Vec<GlobPattern>,
    extra_ignore: Vec<GlobPattern>,
}

impl FilterPolicy {
    pub fn new(include: &[String], ignore: &[String], extra_ignore: &[String]) -> Result<Self> {
        Ok(Self {
            include: compile(include).context("compile include patterns")?,
            ignore: compile(ignore).context("compile ignore patterns")?,
            extra_ignore: compile(extra_ignore).context("compile extra_ignore patterns")?,
        })
    }

    /// Precedence, lowest to highest: include gate, ignore, explicit include,
    /// case-level extra ignore.
    pub fn admits(&self, rel_path: &str) -> bool {
        let any = |patterns: &[GlobPattern]| patterns.iter().any(|p| p.matches(rel_path));
        let explicitly_included = any(&self.include);
        let mut included = self.include.is_empty() || explicitly_included;
        if any(&self.ignore) {
            included = false;
        }
        if explicitly_included {
            included = true;
        }
        if any(&self.extra_ignore) {
            included = false;
        }
        included
    }
}

/// Relative paths under `root`, kept as `PathBuf` so non-UTF-8 names still
/// join back onto the root.
fn relative_files(root: &Path) -> Result<BTreeSet<PathBuf>> {
    if !root.is_dir() {
        return Err(anyhow!("artifact root {} is not a directory", root.display()));
    }
    let mut rel_paths = BTreeSet::new();
    for file in collect_files_recursive(root)? {
        let rel = file
            .strip_prefix(root)
            .with_context(|| format!("strip artifact root from {}", file.display()))?;
        rel_paths.insert(rel.to_path_buf());
    }
    Ok(rel_paths)
}

fn same_content(left: &Path, right: &Path) -> Result<bool> {
    let left_len = fs::metadata(left)
        .with_context(|| format!("stat {}", left.display()))?
        .len();
    let right_len = fs::metadata(right)
        .with_context(|| format!("stat {}", right.display()))?
        .len();
    if left_len != right_len {
        return Ok(false);
    }
    Ok(sha256_file_hex(left)? == sha256_file_hex(right)?)
}

/// Sorted posix relative paths that differ in content or existence.
pub fn compare_artifact_roots(
    left_root: &Path,
    right_root: &Path,
    policy: &FilterPolicy,
) -> Result<Vec<String>> {
    let left_files = relative_files(left_root)?;
    let right_files = relative_files(right_root)?;

    let mut differences = Vec::new();
    let mut filtered = 0usize;
    for rel in left_files.union(&right_files) {
        let posix = posix_rel_path(rel);
        if !policy.admits(&posix) {
            filtered += 1;
            continue;
        }
        if !left_files.contains(rel) || !right_files.contains(rel) {
            differences.push(posix);
            continue;
        }
        if !same_content(&left_root.join(rel), &right_root.join(rel))? {
            differences.push(posix);
        }
    }
    differences.sort();
    differences.dedup();
    tracing::debug!(
        left = %left_root.display(),
        right = %right_root.display(),
        compared = left_files.union(&right_files).count() - filtered,
        filtered,
        differences = differences.len(),
        "artifact comparison complete"
    );
    Ok(differences)
}
