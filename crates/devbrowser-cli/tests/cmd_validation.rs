//! CLI argument-validation tests.
//!
//! These exercise flag parsing and early validation paths that fail before
//! any daemon or browser is touched, with HOME and the XDG dirs pointed at a
//! temp directory for isolation.

use assert_cmd::Command;
use predicates::prelude::*;

fn dev_browser(home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("dev-browser").expect("binary builds");
    cmd.env("HOME", home)
        .env("XDG_CACHE_HOME", home.join("cache"))
        .env("XDG_STATE_HOME", home.join("state"))
        .env_remove("DEV_BROWSER_PROFILE")
        .env_remove("HEADLESS");
    cmd
}

#[test]
fn help_exits_zero() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("diagnose"));
}

#[test]
fn rejects_unknown_output_mode() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["--output", "xml", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--output must be summary|json|path|html"));
}

#[test]
fn rejects_headless_headed_conflict() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["--headless", "--headed", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("use either --headless or --headed"));
}

#[test]
fn rejects_bad_window_size() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["--window-size", "wide", "status"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("WIDTHxHEIGHT"));
}

#[test]
fn rejects_invalid_rules_json() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["assert", "--rules", "{not json"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid rules JSON"));
}

#[test]
fn rejects_unknown_rules_field() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["assert", "--rules", r#"{"maxConsol": {"error": 0}}"#])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid rules JSON"));
}

#[test]
fn rejects_empty_rule_selector() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args([
            "assert",
            "--rules",
            r#"{"selectors": [{"selector": "  ", "min": 1}]}"#,
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("selectors[0].selector is required"));
}

#[test]
fn rejects_bad_artifact_mode() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args([
            "diagnose",
            "--artifact-mode",
            "everything",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--artifact-mode must be none|minimal|full"));
}

#[test]
fn missing_rules_flag_maps_to_exit_one() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .arg("assert")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--rules"));
}

#[test]
fn status_reports_not_running_without_state() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["--profile", "never-started", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("not running profile=never-started"));
}

#[test]
fn call_rejects_non_object_args() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["call", "goto", "--args", "[1,2,3]"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--args must be a JSON object"));
}

#[test]
fn call_rejects_invalid_args_json() {
    let tmp = tempfile::tempdir().unwrap();
    dev_browser(tmp.path())
        .args(["call", "goto", "--args", "{oops"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("invalid JSON for --args"));
}
