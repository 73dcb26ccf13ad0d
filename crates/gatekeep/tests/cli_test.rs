//! Integration tests for the `gatekeep` binary.
//!
//! Nothing here needs a broker: argument parsing, config handling,
//! completions, the offline `table` command and the unreachable-broker
//! path of the publishing commands are exercised.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

/// `gatekeep` with `GATEKEEP_*` cleared and config dirs pointed away
/// from the user's real configuration.
fn gatekeep_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("gatekeep");
    cmd.env("HOME", "/tmp/gatekeep-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/gatekeep-cli-test-nonexistent")
        .env_remove("GATEKEEP_CONFIG")
        .env_remove("GATEKEEP_BROKER")
        .env_remove("GATEKEEP_TELEMETRY_TOKEN")
        .env_remove("RUST_LOG");
    cmd
}

fn write_table(path: &Path) {
    std::fs::write(
        path,
        "Nama,Status,Waktu,Mata Kuliah\n\
         alice,Hadir,2024-01-01 09:30:00,Fisika\n\
         bob,Tidak Hadir,-,Tidak ada jadwal\n",
    )
    .unwrap();
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = gatekeep_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = format!(
        "{}{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_lists_commands() {
    gatekeep_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("run")
            .and(predicate::str::contains("peripheral"))
            .and(predicate::str::contains("schedule"))
            .and(predicate::str::contains("light"))
            .and(predicate::str::contains("table")),
    );
}

#[test]
fn test_version_flag() {
    gatekeep_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("gatekeep"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    gatekeep_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gatekeep"));
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honors_override() {
    gatekeep_cmd()
        .args(["config", "path", "--config", "/tmp/elsewhere/gatekeep.toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("/tmp/elsewhere/gatekeep.toml"));
}

#[test]
fn test_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    let path_arg = path.to_str().unwrap();

    gatekeep_cmd()
        .args(["config", "init", "--config", path_arg])
        .assert()
        .success();
    assert!(path.exists());

    // A second init refuses to clobber the file.
    gatekeep_cmd()
        .args(["config", "init", "--config", path_arg])
        .assert()
        .code(3);

    gatekeep_cmd()
        .args(["config", "show", "--config", path_arg])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[bus]")
                .and(predicate::str::contains("broker.emqx.io"))
                .and(predicate::str::contains("lintas_alam")),
        );
}

#[test]
fn test_config_show_masks_token() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[telemetry]\ntoken = \"hunter2\"\n").unwrap();

    gatekeep_cmd()
        .args(["config", "show", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn test_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "[bus]\nhost = \"from-file\"\n").unwrap();

    gatekeep_cmd()
        .env("GATEKEEP_BUS__HOST", "from-env")
        .args(["config", "show", "--config", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-env"));
}

// ── Table ───────────────────────────────────────────────────────────

#[test]
fn test_table_renders_rows() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("attendance_log.csv");
    write_table(&csv);

    gatekeep_cmd()
        .args(["table", "--color", "never", "--path", csv.to_str().unwrap()])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Mata Kuliah")
                .and(predicate::str::contains("alice"))
                .and(predicate::str::contains("Tidak Hadir")),
        );
}

#[test]
fn test_table_json_filtered_by_course() {
    let dir = tempfile::tempdir().unwrap();
    let csv = dir.path().join("attendance_log.csv");
    write_table(&csv);

    let output = gatekeep_cmd()
        .args([
            "table",
            "-o",
            "json",
            "--course",
            "Fisika",
            "--path",
            csv.to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 1);
    assert_eq!(rows[0]["Nama"], "alice");
}

#[test]
fn test_missing_table_exits_not_found() {
    gatekeep_cmd()
        .args(["table", "--path", "/tmp/gatekeep-cli-test-nonexistent/none.csv"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("not found"));
}

// ── Argument validation ─────────────────────────────────────────────

#[test]
fn test_schedule_set_requires_course_or_identity() {
    gatekeep_cmd()
        .args([
            "schedule",
            "set",
            "--start",
            "2024-01-01 09:00:00",
            "--end",
            "2024-01-01 10:00:00",
        ])
        .assert()
        .code(2);
}

#[test]
fn test_schedule_set_rejects_bad_timestamp_before_connecting() {
    gatekeep_cmd()
        .args([
            "schedule",
            "set",
            "--course",
            "Fisika",
            "--start",
            "09:00",
            "--end",
            "2024-01-01 10:00:00",
        ])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("schedule timestamp"));
}

#[test]
fn test_light_rejects_unknown_state() {
    gatekeep_cmd().args(["light", "dim"]).assert().code(2);
}

#[test]
fn test_light_reports_unreachable_broker() {
    gatekeep_cmd()
        .args(["--broker", "127.0.0.1:1", "light", "on"])
        .assert()
        .code(7)
        .stderr(predicate::str::contains("Could not reach the broker at 127.0.0.1:1"));
}
