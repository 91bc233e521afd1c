//! Case results produced by the orchestrator.
use crate::executor::CommandRecord;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Terminal status of one case; exactly one per run or replay.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    /// Every command succeeded and the canonical artifacts match.
    Pass,
    /// Every command succeeded but the canonical artifacts differ.
    Fail,
    /// At least one command exited non-zero or timed out.
    Failure,
    /// The case could not be evaluated (template, filesystem or spawn error).
    Error,
}

impl CaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Pass => "PASS",
            CaseStatus::Fail => "FAIL",
            CaseStatus::Failure => "FAILURE",
            CaseStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct CaseResult {
    pub case_id: String,
    pub status: CaseStatus,
    pub differences: Vec<String>,
    pub commands: Vec<CommandRecord>,
    pub errors: Vec<String>,
    pub params: BTreeMap<String, Value>,
    pub metadata: BTreeMap<String, Value>,
}
