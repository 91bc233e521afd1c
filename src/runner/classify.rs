use super::types::CaseStatus;
use crate::executor::CommandRecord;

/// Status of a case whose commands were all attempted.
///
/// `Error` never comes from here: it is assigned only when evaluation itself
/// broke down before a status could be derived.
pub(super) fn classify(commands: &[CommandRecord], differences: &[String]) -> CaseStatus {
    if commands.iter().any(|record| !record.succeeded) {
        CaseStatus::Failure
    } else if !differences.is_empty() {
        CaseStatus::Fail
    } else {
        CaseStatus::Pass
    }
}

/// One human-readable line per failing command, in execution order.
pub(super) fn failure_lines(commands: &[CommandRecord]) -> Vec<String> {
    commands
        .iter()
        .filter(|record| !record.succeeded)
        .map(|record| {
            format!(
                "{} command failed for version {} (exit code {}, timed out: {}): {}",
                record.step, record.version, record.returncode, record.timed_out, record.command
            )
        })
        .collect()
}
