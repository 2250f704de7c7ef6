//! CLI integration tests for toot-post

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn toot_post() -> Command {
    let mut cmd = Command::cargo_bin("toot-post").unwrap();
    cmd.env_remove("TOOTFLEET_CONFIG")
        .env_remove("TOOTFLEET_PASSWORD");
    cmd
}

#[test]
fn test_help_flag_output() {
    toot_post()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Post or reply as an existing bot account"))
        .stdout(predicate::str::contains("--user"))
        .stdout(predicate::str::contains("--reply-to"))
        .stdout(predicate::str::contains("--purge"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_version_flag_output() {
    toot_post()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("toot-post"));
}

#[test]
fn test_user_is_required() {
    toot_post().arg("hello").assert().failure();
}

#[test]
fn test_empty_content_is_invalid_input() {
    toot_post()
        .args(["--user", "alice", "   "])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Content cannot be empty"));
}

#[test]
fn test_invalid_format_is_invalid_input() {
    toot_post()
        .args(["--user", "alice", "--format", "xml", "hello"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Invalid format"));
}

#[test]
fn test_missing_config_is_configuration_error() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.yaml");

    toot_post()
        .args(["--user", "alice", "--config"])
        .arg(&missing)
        .arg("hello")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));
}

#[test]
fn test_purge_conflicts_with_content() {
    toot_post()
        .args(["--user", "alice", "--purge", "hello"])
        .assert()
        .failure();
}
