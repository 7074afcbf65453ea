//! Integration tests for the `devserve` binary.
//!
//! Only paths that end on their own are exercised: argument errors and
//! startup failures. A successful start runs until Ctrl+C.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn devserve(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("devserve").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("DEVSERVE_COMMAND")
        .env_remove("DEVSERVE_CWD")
        .env_remove("DEVSERVE_NAME")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_flags() {
    let dir = TempDir::new().unwrap();
    devserve(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--no-hot-client"))
        .stdout(predicate::str::contains("--open-app"))
        .stdout(predicate::str::contains("--https-pass"));
}

#[test]
fn test_non_numeric_port_fails() {
    let dir = TempDir::new().unwrap();
    devserve(&dir).args(["--port", "abc"]).assert().failure();
}

#[test]
fn test_hot_must_be_an_object() {
    let dir = TempDir::new().unwrap();
    devserve(&dir)
        .args(["--hot", "\"true\"", "--no-clipboard"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("hot"));
}

#[test]
fn test_hot_host_mismatch_fails() {
    let dir = TempDir::new().unwrap();
    devserve(&dir)
        .args([
            "--host",
            "127.0.0.1",
            "--hot",
            r#"{"host":"0.0.0.0"}"#,
            "--no-clipboard",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("0.0.0.0"));
}

#[test]
fn test_unknown_config_key_fails() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("devserve.config.json"),
        r#"{"command": "true", "bad": "batman"}"#,
    )
    .unwrap();

    devserve(&dir)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("devserve.config.json"));
}

#[test]
fn test_missing_config_file_fails() {
    let dir = TempDir::new().unwrap();
    devserve(&dir)
        .args(["--config", "nope.json"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("nope.json"));
}

#[test]
fn test_port_in_use_fails() {
    let dir = TempDir::new().unwrap();
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port().to_string();

    devserve(&dir)
        .args([
            "--host",
            "127.0.0.1",
            "--port",
            &port,
            "--no-hot-client",
            "--no-clipboard",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Could not listen"));
}
