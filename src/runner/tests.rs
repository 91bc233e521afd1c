use super::*;
use crate::config::{expand_case_matrix, validate_config};
use serde_json::{json, Value};
use tempfile::TempDir;

const WRITE_PAYLOAD: &str = "printf '%s' '{params_cell}-{version}' > '{artifacts_root}/payload.txt'";
const WRITE_CONSTANT: &str = "printf constant > '{artifacts_root}/payload.txt'";

fn base_config() -> Value {
    json!({
        "schema_version": 1,
        "paths": {
            "workspace_root": "work/{case_id}/{version}",
            "artifacts_root": "artifacts/{case_id}/{version}"
        },
        "versions": { "baseline": "left", "candidate": "right" },
        "cmd_templates": { "run": WRITE_PAYLOAD },
        "filters": { "include": [], "ignore": [], "extra_ignore_allowed": true },
        "cases": [
            { "case_id": "alpha", "params": { "cell": "adder" }, "metadata": { "owner": "alice" } },
            { "case_id": "beta", "params": { "cell": "mult" }, "metadata": { "owner": "bob" } }
        ]
    })
}

fn load(dir: &TempDir, value: Value) -> Config {
    let mut config: Config = serde_json::from_value(value).expect("parse config");
    config.base_dir = dir.path().to_path_buf();
    expand_case_matrix(&mut config).expect("expand matrix");
    validate_config(&config).expect("validate config");
    config
}

fn run_all(config: &Config) -> Vec<CaseResult> {
    let cases = select_cases(config, &[]).expect("select cases");
    Runner::new(config).run_all(&cases, 1)
}

fn replay_all(config: &Config) -> Vec<CaseResult> {
    let cases = select_cases(config, &[]).expect("select cases");
    Runner::new(config).replay_all(&cases)
}

fn with_run(template: &str) -> Value {
    let mut value = base_config();
    value["cmd_templates"] = json!({ "run": template });
    value
}

#[test]
fn version_dependent_payload_fails_with_one_difference() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, base_config());
    let results = run_all(&config);

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status, CaseStatus::Fail, "{result:?}");
        assert_eq!(result.differences, vec!["payload.txt"]);
        assert_eq!(result.commands.len(), 2);
        assert!(result.commands.iter().all(|record| record.succeeded));
        assert!(result.errors.is_empty());
    }
    assert_eq!(results[0].case_id, "alpha");
    assert_eq!(results[0].metadata["owner"], json!("alice"));
    let written = fs::read_to_string(dir.path().join("artifacts/alpha/candidate/payload.txt"))
        .expect("read payload");
    assert_eq!(written, "adder-candidate");
}

#[test]
fn version_independent_payload_passes_and_replays_identically() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, with_run(WRITE_CONSTANT));
    let results = run_all(&config);
    for result in &results {
        assert_eq!(result.status, CaseStatus::Pass, "{result:?}");
        assert!(result.differences.is_empty());
    }

    let replayed = replay_all(&config);
    for result in &replayed {
        assert_eq!(result.status, CaseStatus::Pass);
        assert!(result.commands.is_empty());
    }
}

#[test]
fn replay_reproduces_run_differences() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, base_config());
    let ran = run_all(&config);
    let replayed = replay_all(&config);

    for (run, replay) in ran.iter().zip(&replayed) {
        assert_eq!(run.case_id, replay.case_id);
        assert_eq!(run.status, replay.status);
        assert_eq!(run.differences, replay.differences);
        assert!(replay.commands.is_empty());
    }
}

#[test]
fn failing_command_is_failure_and_remaining_steps_still_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["cmd_templates"] = json!({
        "run": "if [ \"$REGX_VERSION\" = candidate ]; then exit 7; fi; printf x > '{artifacts_root}/a.txt'",
        "postprocess": "printf done > post.txt"
    });
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Failure);
    assert!(result.differences.is_empty());
    assert_eq!(result.commands.len(), 4);
    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert!(error.contains("version candidate"), "{error}");
    assert!(error.contains("exit code 7"), "{error}");
    assert!(error.contains("run command"), "{error}");
    assert!(dir.path().join("work/alpha/candidate/post.txt").is_file());
}

#[test]
fn timed_out_command_is_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run("sleep 5");
    value["execution"] = json!({ "timeout_seconds": 1 });
    value["cases"] = json!([{ "case_id": "slow" }]);
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Failure);
    let record = &result.commands[0];
    assert!(record.timed_out);
    assert!(!record.succeeded);
    assert_eq!(record.returncode, -1);
    assert!(result.errors[0].contains("timed out: true"));
}

#[test]
fn undeclared_template_field_is_error_before_anything_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, with_run("echo {undeclared_field} > out.txt"));
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Error);
    assert!(result.commands.is_empty());
    assert!(result.differences.is_empty());
    assert!(result.errors[0].contains("undeclared_field"), "{:?}", result.errors);
    assert!(!dir.path().join("work/alpha").exists());
}

#[test]
fn glob_precedence_applies_through_the_runner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run("printf '%s' '{version}' > '{artifacts_root}/run.log'");
    value["filters"] = json!({
        "include": ["**/*.log"],
        "ignore": ["**/*.log"],
        "extra_ignore_allowed": true
    });
    value["cases"] = json!([
        { "case_id": "plain" },
        { "case_id": "suppressed", "extra_ignore": ["**/*.log"] }
    ]);
    let config = load(&dir, value.clone());
    let results = run_all(&config);
    assert_eq!(results[0].status, CaseStatus::Fail);
    assert_eq!(results[0].differences, vec!["run.log"]);
    assert_eq!(results[1].status, CaseStatus::Pass);

    value["filters"]["extra_ignore_allowed"] = json!(false);
    let gated = load(&dir, value);
    let replayed = replay_all(&gated);
    assert_eq!(replayed[1].status, CaseStatus::Fail);
}

#[test]
fn replay_without_artifacts_is_error_per_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, base_config());
    let result = &replay_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Error);
    assert_eq!(result.errors.len(), 2);
    assert!(result.errors[0].contains("version baseline"));
    assert!(result.errors[1].contains("version candidate"));
}

#[test]
fn compare_step_runs_once_with_suffixed_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["cmd_templates"]["compare"] =
        json!("cmp '{artifacts_root_baseline}/payload.txt' '{artifacts_root_candidate}/payload.txt'");
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Failure);
    let compare = result.commands.last().expect("compare record");
    assert_eq!(compare.step, PipelineStep::Compare);
    assert_eq!(compare.version, COMPARE_VERSION_TAG);
    assert!(compare.command.contains("artifacts/alpha/candidate/payload.txt"));
    assert_eq!(result.commands.len(), 3);
}

#[test]
fn compare_template_without_pair_is_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run(WRITE_CONSTANT);
    value["versions"] = json!({ "one": "first", "two": "second" });
    value["cmd_templates"]["compare"] = json!("true");
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Error);
    assert!(result.errors[0].contains("compare"));
}

#[test]
fn versions_without_canonical_pair_skip_comparison() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["versions"] = json!({ "one": "first", "two": "second" });
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Pass);
    assert!(result.differences.is_empty());
    assert_eq!(result.commands.len(), 2);
}

#[test]
fn left_right_keys_and_explicit_comparison_select_the_pair() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["versions"] = json!({ "left": "L", "right": "R" });
    let config = load(&dir, value);
    assert_eq!(run_all(&config)[0].status, CaseStatus::Fail);

    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run(
        "if [ \"$REGX_VERSION\" = candidate ]; then printf odd; else printf even; fi > '{artifacts_root}/out.txt'",
    );
    value["versions"] = json!({ "baseline": "B", "candidate": "C", "nightly": "N" });
    value["comparison"] = json!({ "left": "baseline", "right": "nightly" });
    let config = load(&dir, value);
    let result = &run_all(&config)[0];
    assert_eq!(result.status, CaseStatus::Pass);
    assert_eq!(result.commands.len(), 3);
}

#[test]
fn preprocess_runs_in_workspace_before_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["cmd_templates"] = json!({
        "preprocess": "printf '%s' '{case_id}' > prep.txt",
        "run": "cp prep.txt \"$ARTIFACTS_ROOT/copied.txt\""
    });
    let config = load(&dir, value);
    let results = run_all(&config);

    assert_eq!(results[0].status, CaseStatus::Pass, "{:?}", results[0]);
    let copied = fs::read_to_string(dir.path().join("artifacts/beta/baseline/copied.txt"))
        .expect("read copied");
    assert_eq!(copied, "beta");
    assert_eq!(results[0].commands[0].step, PipelineStep::Preprocess);
}

#[test]
fn execution_env_is_rendered_per_version() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run("printf '%s' \"$CELL_TAG\" > '{artifacts_root}/tag.txt'");
    value["execution"] = json!({ "env": { "CELL_TAG": "{params_cell}" } });
    let config = load(&dir, value);
    let result = &run_all(&config)[0];

    assert_eq!(result.status, CaseStatus::Pass);
    let tag = fs::read_to_string(dir.path().join("artifacts/alpha/baseline/tag.txt"))
        .expect("read tag");
    assert_eq!(tag, "adder");
}

#[test]
fn parallel_run_keeps_case_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run(WRITE_CONSTANT);
    value["cases"] = json!([]);
    value["case_matrix"] = json!([
        { "id": "{cell}-{width}", "params": { "cell": ["add", "mul", "div"], "width": [8, 16] } }
    ]);
    let config = load(&dir, value);
    let cases = select_cases(&config, &[]).expect("select cases");
    let results = Runner::new(&config).run_all(&cases, 4);

    let ids: Vec<&str> = results.iter().map(|result| result.case_id.as_str()).collect();
    assert_eq!(ids, vec!["add-8", "add-16", "mul-8", "mul-16", "div-8", "div-16"]);
    assert!(results.iter().all(|result| result.status == CaseStatus::Pass));
}

#[test]
fn cleanup_always_removes_workspaces_but_keeps_artifacts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["execution"] = json!({ "cleanup": "always" });
    let config = load(&dir, value);
    let results = run_all(&config);

    assert_eq!(results[0].status, CaseStatus::Fail);
    assert!(!dir.path().join("work/alpha/baseline").exists());
    assert!(dir.path().join("artifacts/alpha/baseline/payload.txt").is_file());
    assert_eq!(replay_all(&config)[0].differences, vec!["payload.txt"]);
}

#[test]
fn parallel_cleanup_leaves_shared_workspace_parents() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = with_run(WRITE_CONSTANT);
    value["paths"]["workspace_root"] = json!("work/{version}/{case_id}");
    value["execution"] = json!({ "cleanup": "always" });
    value["cases"] = json!([]);
    value["case_matrix"] = json!([
        { "id": "{cell}-{width}", "params": { "cell": ["add", "mul", "div", "mod"], "width": [8, 16, 32] } }
    ]);
    let config = load(&dir, value);
    let cases = select_cases(&config, &[]).expect("select cases");
    let results = Runner::new(&config).run_all(&cases, 4);

    assert_eq!(results.len(), 12);
    for result in &results {
        assert_eq!(result.status, CaseStatus::Pass, "{result:?}");
    }
    assert!(dir.path().join("work/baseline").is_dir());
    assert!(!dir.path().join("work/baseline/add-8").exists());
    assert!(dir.path().join("artifacts/mod-32/candidate/payload.txt").is_file());
}

#[test]
fn cleanup_on_pass_keeps_failed_workspaces() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut value = base_config();
    value["execution"] = json!({ "cleanup": "on_pass" });
    let config = load(&dir, value);
    run_all(&config);

    assert!(dir.path().join("work/alpha/baseline").is_dir());
}

#[test]
fn select_cases_rejects_unknown_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = load(&dir, base_config());
    let selected = select_cases(&config, &["beta".to_string()]).expect("select beta");
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].case_id, "beta");
    assert!(select_cases(&config, &["gamma".to_string()]).is_err());
}
