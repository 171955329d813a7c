// CLI integration tests for path waits and exit codes.
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;

fn cmd() -> Command {
    let exe = env!("CARGO_BIN_EXE_condwait");
    Command::new(exe)
}

fn parse_json_line(output: &[u8]) -> Value {
    let text = String::from_utf8_lossy(output);
    let line = text.lines().next().expect("json line");
    serde_json::from_str(line).expect("valid json")
}

fn path_arg(path: &Path) -> &str {
    path.to_str().expect("utf8 path")
}

#[test]
fn exists_returns_at_once_for_present_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = temp.path().join("ready");
    std::fs::write(&flag, b"1").expect("write");

    let output = cmd()
        .args(["exists", path_arg(&flag), "--json"])
        .output()
        .expect("exists");
    assert!(output.status.success());
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["outcome"], "satisfied");
    assert_eq!(value["condition"], "exists");
    assert_eq!(value["path"], path_arg(&flag));
    assert!(value["elapsed_ms"].as_u64().is_some());
}

#[test]
fn missing_returns_at_once_for_absent_path() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = cmd()
        .args(["missing", path_arg(&temp.path().join("gone"))])
        .output()
        .expect("missing");
    assert!(output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn exists_waits_for_file_creation() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = temp.path().join("later");

    let child = cmd()
        .args(["exists", path_arg(&flag), "--json", "--max-sleep-ms", "100"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn");
    thread::sleep(Duration::from_millis(200));
    std::fs::write(&flag, b"1").expect("write");

    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["outcome"], "satisfied");
    assert!(value["elapsed_ms"].as_u64().expect("elapsed") >= 150);
}

#[test]
fn polling_mode_waits_for_removal() {
    let temp = tempfile::tempdir().expect("tempdir");
    let lock = temp.path().join("lock");
    std::fs::write(&lock, b"1").expect("write");

    let child = cmd()
        .args(["missing", path_arg(&lock), "--poll", "--max-sleep-ms", "20"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn");
    thread::sleep(Duration::from_millis(100));
    std::fs::remove_file(&lock).expect("remove");

    let start = Instant::now();
    let output = child.wait_with_output().expect("wait");
    assert!(output.status.success());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn negative_min_sleep_is_config_error() {
    let output = cmd()
        .args(["exists", "whatever", "--min-sleep-ms", "-5"])
        .output()
        .expect("exists");
    assert_eq!(output.status.code(), Some(3));
    let value = parse_json_line(&output.stderr);
    assert_eq!(value["error"]["kind"], "Config");
    assert!(
        value["error"]["message"]
            .as_str()
            .expect("message")
            .contains("min_sleep")
    );
    assert!(value["error"]["hint"].as_str().is_some());
}

#[test]
fn unknown_flag_is_usage_error() {
    let output = cmd()
        .args(["exists", "whatever", "--bogus"])
        .output()
        .expect("exists");
    assert_eq!(output.status.code(), Some(2));
    let value = parse_json_line(&output.stderr);
    assert_eq!(value["error"]["kind"], "Usage");
}

#[test]
fn version_prints_package_version() {
    let output = cmd().arg("version").output().expect("version");
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert_eq!(text.trim(), format!("condwait {}", env!("CARGO_PKG_VERSION")));
}

#[cfg(unix)]
#[test]
fn sigint_cancels_wait() {
    let temp = tempfile::tempdir().expect("tempdir");
    let flag = temp.path().join("never");

    let child = cmd()
        .args(["exists", path_arg(&flag), "--json"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn");
    thread::sleep(Duration::from_millis(300));
    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGINT) };
    assert_eq!(rc, 0);

    let output = child.wait_with_output().expect("wait");
    assert_eq!(output.status.code(), Some(130));
    let value = parse_json_line(&output.stdout);
    assert_eq!(value["outcome"], "cancelled");
}
