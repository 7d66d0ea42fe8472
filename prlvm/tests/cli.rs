use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

fn prlvm() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin("prlvm"));
    cmd.env("LOG_OUTPUT", "none");
    cmd
}

#[test]
fn test_help_lists_commands() {
    prlvm()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("export"))
        .stdout(predicate::str::contains("--vm"));
}

#[test]
fn test_exec_requires_arguments() {
    prlvm().arg("exec").assert().failure();
}

#[test]
fn test_missing_utility_is_reported_with_hint() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(
        &config,
        "tools:\n  prlctl: /nonexistent/prlctl\n  prlsrvctl: /nonexistent/prlsrvctl\n",
    )
    .unwrap();

    prlvm()
        .arg("--config")
        .arg(&config)
        .arg("verify")
        .env_remove("PRL_PRLCTL")
        .assert()
        .failure()
        .stderr(predicate::str::contains(
            "Parallels Desktop command-line utilities are not available",
        ));
}

#[test]
fn test_invalid_retry_config_is_rejected() {
    let dir = tempdir().unwrap();
    let config = dir.path().join("config.yaml");
    fs::write(&config, "retry:\n  attempts: 0\n").unwrap();

    prlvm()
        .arg("--config")
        .arg(&config)
        .arg("verify")
        .env_remove("PRL_RETRY_ATTEMPTS")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}
