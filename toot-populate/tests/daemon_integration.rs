//! Integration tests for toot-populate

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn toot_populate() -> Command {
    let mut cmd = Command::cargo_bin("toot-populate").unwrap();
    cmd.env_remove("TOOTFLEET_CONFIG");
    cmd
}

#[test]
fn test_help_flag_output() {
    toot_populate()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("hashtag"))
        .stdout(predicate::str::contains("--once"))
        .stdout(predicate::str::contains("SIGTERM"));
}

#[test]
fn test_missing_config_exits_with_config_code() {
    let dir = TempDir::new().unwrap();

    toot_populate()
        .arg("--once")
        .arg("--config")
        .arg(dir.path().join("missing.yaml"))
        .assert()
        .code(2);
}

#[test]
fn test_missing_remote_account_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.yaml");
    let data = dir.path().display().to_string();
    std::fs::write(
        &path,
        format!(
            "api_url: http://127.0.0.1:9\n\
             paths:\n  secrets: {data}/secrets\n  idempotency: {data}/markers\n  media: {data}/media\n  remote_secrets: {data}/remote\n"
        ),
    )
    .unwrap();

    toot_populate()
        .arg("--once")
        .arg("--config")
        .arg(&path)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("remote.user"));
}
