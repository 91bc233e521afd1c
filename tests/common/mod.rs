//! Shared test infrastructure for integration tests.

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

/// Temporary project directory holding one `regx.json`.
pub struct Sandbox {
    dir: TempDir,
}

/// Exit status and captured output of one `regx` invocation.
#[derive(Debug)]
pub struct RunOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl From<Output> for RunOutput {
    fn from(output: Output) -> Self {
        Self {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Two-case config whose `run` step writes a payload into the artifacts root.
pub fn two_case_config(run: &str) -> Value {
    json!({
        "schema_version": 1,
        "paths": {
            "workspace_root": "work/{case_id}/{version}",
            "artifacts_root": "artifacts/{case_id}/{version}"
        },
        "versions": { "baseline": "left", "candidate": "right" },
        "cmd_templates": { "run": run },
        "filters": { "include": [], "ignore": [], "extra_ignore_allowed": true },
        "reporting": { "formats": ["json", "md"] },
        "cases": [
            { "case_id": "alpha", "params": { "cell": "adder" } },
            { "case_id": "beta", "params": { "cell": "mult" } }
        ]
    })
}

impl Sandbox {
    pub fn with_config(config: &Value) -> anyhow::Result<Self> {
        let dir = TempDir::new()?;
        let text = serde_json::to_string_pretty(config)?;
        std::fs::write(dir.path().join("regx.json"), text)?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("regx.json")
    }

    /// Run `regx <subcommand> --config <sandbox config> <extra...>`.
    pub fn regx(&self, subcommand: &str, extra: &[&str]) -> RunOutput {
        Command::new(env!("CARGO_BIN_EXE_regx"))
            .arg(subcommand)
            .arg("--config")
            .arg(self.config_path())
            .args(extra)
            .env_remove("REGX_LOG")
            .output()
            .expect("spawn regx")
            .into()
    }

    pub fn read_json(&self, rel: &str) -> Value {
        let text = std::fs::read_to_string(self.root().join(rel))
            .unwrap_or_else(|err| panic!("read {rel}: {err}"));
        serde_json::from_str(&text).unwrap_or_else(|err| panic!("parse {rel}: {err}"))
    }
}
