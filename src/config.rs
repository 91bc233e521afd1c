//! Regression configuration types and loading.
//!
//! The config is declarative JSON: versions, path templates, the command
//! pipeline, filters and cases. Many cases can be generated from one
//! `case_matrix` entry instead of being listed by hand. Everything is
//! validated up front so the engine only ever sees a well-formed config.
use crate::compare::GlobPattern;
use crate::template::{Template, TemplateContext};
use anyhow::{anyhow, Context, Result};
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Keys available to `paths.*` templates.
pub const PATH_TEMPLATE_KEYS: [&str; 3] = ["case_id", "version", "version_label"];

/// Validated regression configuration.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub schema_version: u32,
    pub paths: PathTemplates,
    pub versions: VersionMap,
    #[serde(default)]
    pub comparison: Option<ComparisonPair>,
    pub cmd_templates: CmdTemplates,
    #[serde(default)]
    pub filters: Filters,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub reporting: Option<ReportingConfig>,
    #[serde(default)]
    pub cases: Vec<Case>,
    #[serde(default)]
    pub case_matrix: Vec<CaseMatrix>,
    /// Directory relative paths resolve against (the config file's parent).
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PathTemplates {
    pub workspace_root: String,
    pub artifacts_root: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ComparisonPair {
    pub left: String,
    pub right: String,
}

/// Pipeline slot of a command template.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStep {
    Preprocess,
    Run,
    Postprocess,
    Compare,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Preprocess => "preprocess",
            PipelineStep::Run => "run",
            PipelineStep::Postprocess => "postprocess",
            PipelineStep::Compare => "compare",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct CmdTemplates {
    #[serde(default)]
    pub preprocess: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub postprocess: Option<String>,
    #[serde(default)]
    pub compare: Option<String>,
}

impl CmdTemplates {
    /// Declared per-version slots in execution order.
    pub fn version_steps(&self) -> Vec<(PipelineStep, &str)> {
        [
            (PipelineStep::Preprocess, self.preprocess.as_deref()),
            (PipelineStep::Run, self.run.as_deref()),
            (PipelineStep::Postprocess, self.postprocess.as_deref()),
        ]
        .into_iter()
        .filter_map(|(step, template)| template.map(|template| (step, template)))
        .collect()
    }

    fn all(&self) -> Vec<(PipelineStep, &str)> {
        let mut steps = self.version_steps();
        if let Some(compare) = self.compare.as_deref() {
            steps.push((PipelineStep::Compare, compare));
        }
        steps
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Filters {
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub extra_ignore_allowed: bool,
}

/// What happens to a case's workspace roots after it is classified.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    #[default]
    Never,
    OnPass,
    Always,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub timeout_seconds: Option<f64>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    #[serde(default)]
    pub jobs: Option<usize>,
}

impl ExecutionConfig {
    pub fn jobs(&self) -> usize {
        self.jobs.unwrap_or(1)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Json,
    Md,
}

impl ReportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ReportFormat::Json => "json",
            ReportFormat::Md => "md",
        }
    }
}

fn default_global_report() -> String {
    "reports/global".to_string()
}

fn default_case_report() -> String {
    "reports/cases/{case_id}".to_string()
}

fn default_formats() -> Vec<ReportFormat> {
    vec![ReportFormat::Json]
}

#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReportingConfig {
    #[serde(default = "default_global_report")]
    pub global_report: String,
    #[serde(default = "default_case_report")]
    pub case_report: String,
    #[serde(default = "default_formats")]
    pub formats: Vec<ReportFormat>,
}

/// One regression case.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Case {
    pub case_id: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ignore: Vec<String>,
}

/// Declarative generator: one case per combination of parameter values.
#[derive(Debug, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CaseMatrix {
    /// Case id template over the bare parameter names.
    pub id: String,
    #[serde(default)]
    pub params: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    #[serde(default)]
    pub extra_ignore: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSpec {
    pub key: String,
    pub label: String,
}

/// Version key → label mapping in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionMap(Vec<VersionSpec>);

impl VersionMap {
    pub fn iter(&self) -> std::slice::Iter<'_, VersionSpec> {
        self.0.iter()
    }

    pub fn get(&self, key: &str) -> Option<&VersionSpec> {
        self.0.iter().find(|spec| spec.key == key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VersionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        VersionMap(
            iter.into_iter()
                .map(|(key, label)| VersionSpec {
                    key: key.into(),
                    label: label.into(),
                })
                .collect(),
        )
    }
}

impl<'de> Deserialize<'de> for VersionMap {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct VersionMapVisitor;

        impl<'de> Visitor<'de> for VersionMapVisitor {
            type Value = VersionMap;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a mapping of version key to label")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<VersionMap, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<VersionSpec> = Vec::new();
                while let Some((key, label)) = map.next_entry::<String, String>()? {
                    if entries.iter().any(|spec| spec.key == key) {
                        return Err(de::Error::custom(format!("duplicate version key {key:?}")));
                    }
                    entries.push(VersionSpec { key, label });
                }
                Ok(VersionMap(entries))
            }
        }

        deserializer.deserialize_map(VersionMapVisitor)
    }
}

/// Load, expand and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|ext| ext.to_str());
    if matches!(extension, Some("yaml" | "yml")) {
        return Err(anyhow!(
            "config {} looks like YAML; regx reads JSON configs only",
            path.display()
        ));
    }
    let bytes = fs::read(path).with_context(|| format!("read config {}", path.display()))?;
    let mut config: Config = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse config JSON {}", path.display()))?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    config.base_dir = parent
        .canonicalize()
        .with_context(|| format!("resolve config directory {}", parent.display()))?;
    expand_case_matrix(&mut config)?;
    validate_config(&config)?;
    Ok(config)
}

/// Append matrix-generated cases after the explicit ones.
pub fn expand_case_matrix(config: &mut Config) -> Result<()> {
    let mut generated = Vec::new();
    for entry in &config.case_matrix {
        generated.extend(
            expand_matrix_entry(entry)
                .with_context(|| format!("expand case_matrix entry {:?}", entry.id))?,
        );
    }
    config.cases.extend(generated);
    Ok(())
}

fn expand_matrix_entry(entry: &CaseMatrix) -> Result<Vec<Case>> {
    let mut combos: Vec<BTreeMap<String, Value>> = vec![BTreeMap::new()];
    for (key, values) in &entry.params {
        if values.is_empty() {
            return Err(anyhow!("param {key:?} has no values"));
        }
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.insert(key.clone(), value.clone());
                next.push(extended);
            }
        }
        combos = next;
    }

    let template = Template::parse(&entry.id)?;
    let mut cases = Vec::with_capacity(combos.len());
    for params in combos {
        let mut context = TemplateContext::new();
        for (key, value) in &params {
            context.insert(key.clone(), scalar_to_string(value).with_context(|| format!("param {key:?}"))?);
        }
        cases.push(Case {
            case_id: template.render(&context)?,
            params,
            metadata: entry.metadata.clone(),
            extra_ignore: entry.extra_ignore.clone(),
        });
    }
    Ok(cases)
}

/// Render a scalar config value the way templates see it.
pub fn scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(anyhow!(
            "expected a string, number or boolean (got {})",
            other
        )),
    }
}

/// Ids that end up as a single path component.
pub fn is_path_safe_id(id: &str) -> bool {
    !id.trim().is_empty()
        && id.trim() == id
        && id != "."
        && id != ".."
        && !id.contains('/')
        && !id.contains('\\')
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.schema_version != CONFIG_SCHEMA_VERSION {
        return Err(anyhow!(
            "unsupported config schema_version {}",
            config.schema_version
        ));
    }

    if config.versions.is_empty() {
        return Err(anyhow!("versions must declare at least one version"));
    }
    for spec in config.versions.iter() {
        if !is_path_safe_id(&spec.key) {
            return Err(anyhow!(
                "version key {:?} must be a non-empty single path component",
                spec.key
            ));
        }
    }
    if let Some(pair) = &config.comparison {
        for key in [&pair.left, &pair.right] {
            if config.versions.get(key).is_none() {
                return Err(anyhow!("comparison references undeclared version {key:?}"));
            }
        }
        if pair.left == pair.right {
            return Err(anyhow!("comparison must name two different versions"));
        }
    }

    validate_path_template("workspace_root", &config.paths.workspace_root)?;
    validate_path_template("artifacts_root", &config.paths.artifacts_root)?;

    for (step, source) in config.cmd_templates.all() {
        Template::parse(source).with_context(|| format!("cmd_templates.{step}"))?;
    }

    for pattern in config.filters.include.iter().chain(&config.filters.ignore) {
        GlobPattern::new(pattern).with_context(|| "filters".to_string())?;
    }

    if let Some(timeout) = config.execution.timeout_seconds {
        if !timeout.is_finite() || timeout <= 0.0 {
            return Err(anyhow!(
                "execution.timeout_seconds must be a positive number (got {timeout})"
            ));
        }
    }
    if config.execution.jobs() == 0 {
        return Err(anyhow!("execution.jobs must be at least 1"));
    }
    for key in config.execution.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(anyhow!("execution.env key {key:?} is not a valid variable name"));
        }
    }

    if let Some(reporting) = &config.reporting {
        validate_reporting(reporting)?;
    }

    validate_cases(config)
}

fn validate_path_template(name: &str, source: &str) -> Result<()> {
    let template = Template::parse(source).with_context(|| format!("paths.{name}"))?;
    template
        .check_fields(
            |field| PATH_TEMPLATE_KEYS.contains(&field),
            &PATH_TEMPLATE_KEYS.join(", "),
        )
        .with_context(|| format!("paths.{name}"))?;
    let fields: BTreeSet<&str> = template.fields().collect();
    for required in ["case_id", "version"] {
        if !fields.contains(required) {
            return Err(anyhow!(
                "paths.{name} must reference {{{required}}} so every case and version gets its own directory"
            ));
        }
    }
    Ok(())
}

fn validate_reporting(reporting: &ReportingConfig) -> Result<()> {
    if reporting.global_report.trim().is_empty() {
        return Err(anyhow!("reporting.global_report must be non-empty"));
    }
    if reporting.formats.is_empty() {
        return Err(anyhow!("reporting.formats must list at least one format"));
    }
    let template = Template::parse(&reporting.case_report).context("reporting.case_report")?;
    template
        .check_fields(|field| field == "case_id", "case_id")
        .context("reporting.case_report")?;
    if !template.fields().any(|field| field == "case_id") {
        return Err(anyhow!("reporting.case_report must reference {{case_id}}"));
    }
    Ok(())
}

fn validate_cases(config: &Config) -> Result<()> {
    if config.cases.is_empty() {
        return Err(anyhow!("config declares no cases"));
    }
    let mut seen = BTreeSet::new();
    for case in &config.cases {
        if !is_path_safe_id(&case.case_id) {
            return Err(anyhow!(
                "case_id {:?} must be a non-empty single path component",
                case.case_id
            ));
        }
        if !seen.insert(case.case_id.as_str()) {
            return Err(anyhow!("case_id {:?} is duplicated", case.case_id));
        }
        for (section, fields) in [("params", &case.params), ("metadata", &case.metadata)] {
            for (key, value) in fields {
                if key.is_empty() || key.contains('{') || key.contains('}') {
                    return Err(anyhow!(
                        "case {:?} {section} key {key:?} is not a valid field name",
                        case.case_id
                    ));
                }
                scalar_to_string(value)
                    .with_context(|| format!("case {:?} {section}.{key}", case.case_id))?;
            }
        }
        for pattern in &case.extra_ignore {
            GlobPattern::new(pattern)
                .with_context(|| format!("case {:?} extra_ignore", case.case_id))?;
        }
        if !case.extra_ignore.is_empty() && !config.filters.extra_ignore_allowed {
            tracing::warn!(
                case_id = %case.case_id,
                "extra_ignore is set but filters.extra_ignore_allowed is false; ignoring it"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
