//! Smoke tests for the keyrelay binary.
//!
//! Every command here runs offline: nothing reaches AWS or GitHub. Each
//! test gets its own working directory and config home so no user config
//! is picked up.

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A `keyrelay` invocation isolated from the caller's environment.
fn keyrelay(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("keyrelay").expect("binary builds");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path().join("xdg"))
        .env_remove("KEYRELAY_CONFIG")
        .env_remove("KEYRELAY_LOG")
        .env_remove("GITHUB_TOKEN");
    cmd
}

// =============================================================================
// Help and version
// =============================================================================

#[test]
fn help_lists_commands() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("reconcile"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("completion"));
}

#[test]
fn version_prints_package_version() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn reconcile_help_documents_exit_status() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args(["reconcile", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("EXIT STATUS"));
}

// =============================================================================
// Offline commands
// =============================================================================

#[test]
fn policy_is_scoped_to_the_bucket() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args(["--principal", "svc-user", "--bucket", "data-bucket", "policy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("arn:aws:s3:::data-bucket"))
        .stdout(predicate::str::contains("arn:aws:s3:::data-bucket/*"))
        .stdout(predicate::str::contains("2012-10-17"));
}

#[test]
fn policy_reads_the_local_config_file() {
    let home = TempDir::new().unwrap();
    fs::write(
        home.path().join("keyrelay.toml"),
        r#"
[principal]
name = "svc-user"

[policy]
bucket = "data-bucket"
include_introspection = false
"#,
    )
    .unwrap();

    keyrelay(&home)
        .arg("policy")
        .assert()
        .success()
        .stdout(predicate::str::contains("arn:aws:s3:::data-bucket"))
        .stdout(predicate::str::contains("iam:").not());
}

#[test]
fn unknown_config_key_is_rejected() {
    let home = TempDir::new().unwrap();
    let config = home.path().join("custom.toml");
    fs::write(&config, "[principal]\nnmae = \"svc-user\"\n").unwrap();

    keyrelay(&home)
        .args(["--config", config.to_str().unwrap(), "--bucket", "data-bucket", "policy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse config file"));
}

#[test]
fn missing_explicit_config_is_an_error() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args(["--config", "nope.toml", "policy"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn state_reports_untracked_principal() {
    let home = TempDir::new().unwrap();
    let state_dir = home.path().join("state");

    keyrelay(&home)
        .args(["--principal", "svc-user", "--state-dir"])
        .arg(&state_dir)
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("'svc-user' is not tracked"));
}

#[test]
fn completion_generates_bash_script() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("keyrelay"));
}

// =============================================================================
// Reconcile pre-flight
// =============================================================================

#[test]
fn reconcile_without_namespace_fails() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args(["--principal", "svc-user", "--bucket", "data-bucket", "reconcile"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("namespace"));
}

#[test]
fn reconcile_without_token_fails_before_minting() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args([
            "--principal",
            "svc-user",
            "--bucket",
            "data-bucket",
            "--namespace",
            "org/repo",
            "--state-dir",
        ])
        .arg(home.path().join("state"))
        .arg("reconcile")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GitHub token"));
}

#[test]
fn invalid_namespace_is_rejected() {
    let home = TempDir::new().unwrap();
    keyrelay(&home)
        .args([
            "--principal",
            "svc-user",
            "--bucket",
            "data-bucket",
            "--namespace",
            "not-a-repo",
            "reconcile",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config value"));
}
