use predicates::str::contains;
use std::fs;
use std::process::{Command, Stdio};
use tempfile::tempdir;

#[test]
fn daemon_status_on_fresh_home_reports_stopped_and_never_run() {
    let tmp = tempdir().expect("tempdir");

    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("status=stopped"))
        .stdout(contains("interval_hours=6"))
        .stdout(contains("last_distill=never"))
        .stdout(contains("briefing=disabled"));
}

#[test]
fn daemon_status_reads_legacy_state_and_briefing_schedule() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join(".daemon-state.json"),
        r#"{"lastDistill":"2020-01-01T00:00:00.000Z","success":false,"intervalHours":2}"#,
    )
    .expect("write state");
    fs::write(
        tmp.path().join("config.json"),
        r#"{"projects":[],"telegram":{"botToken":"t","chatId":"1","briefingTime":"08:30","timezone":"Europe/Berlin"}}"#,
    )
    .expect("write registry");

    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status"])
        .assert()
        .success()
        .stdout(contains("interval_hours=2"))
        .stdout(contains("d ago (failed)"))
        .stdout(contains("briefing_at=08:30 Europe/Berlin"));
}

#[test]
fn daemon_status_detects_live_pid() {
    let tmp = tempdir().expect("tempdir");
    let mut child = Command::new("sh")
        .arg("-c")
        .arg("while :; do sleep 1; done")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn fake daemon");
    fs::write(tmp.path().join(".daemon.pid"), format!("{}\n", child.id())).expect("write pid");

    let assert = assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status", "--json"])
        .assert();

    let _ = child.kill();
    let _ = child.wait();

    assert
        .success()
        .stdout(contains("\"command\": \"daemon-status\""))
        .stdout(contains(format!("status=running pid={}", child.id())));
}

#[test]
fn invalid_daemon_config_is_rejected() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join("daemon.toml"), "[daemon]\ntick_secs = 0\n").expect("write config");

    assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status"])
        .assert()
        .code(1)
        .stderr(contains("daemon.tick_secs must be >= 1"));
}

fn assert_timestamped(line: &str) {
    assert!(line.starts_with('['), "missing timestamp: {line}");
    let stamp = &line[1..line.find(']').expect("closing bracket")];
    assert!(
        chrono::DateTime::parse_from_rfc3339(stamp).is_ok(),
        "bad timestamp in: {line}"
    );
}

#[test]
fn warnings_and_errors_on_stderr_carry_timestamps() {
    let tmp = tempdir().expect("tempdir");
    fs::write(tmp.path().join(".daemon-state.json"), "{not json").expect("write state");

    let output = assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status"])
        .output()
        .expect("run status");
    assert!(output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    let warn_line = stderr
        .lines()
        .find(|line| line.contains("CM_WARN code=STATE_CORRUPT"))
        .expect("state warning");
    assert_timestamped(warn_line);

    fs::write(tmp.path().join("daemon.toml"), "[daemon]\ntick_secs = 0\n").expect("write config");
    let output = assert_cmd::cargo::cargo_bin_cmd!("cursormemory")
        .current_dir(tmp.path())
        .env("CURSORMEMORY_HOME", tmp.path())
        .args(["daemon", "status"])
        .output()
        .expect("run status");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    let error_line = stderr
        .lines()
        .find(|line| line.contains("error:"))
        .expect("error line");
    assert_timestamped(error_line);
}
