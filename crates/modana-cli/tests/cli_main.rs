//! Basic CLI tests for the modana command-line host.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Binary with the MODANA_* overrides cleared so the host environment cannot leak in.
fn modana() -> Command {
    let mut cmd = Command::cargo_bin("modana").unwrap();
    cmd.env_remove("MODANA_EXTENSION_DIRS")
        .env_remove("MODANA_MAX_DISPATCH_DEPTH")
        .env_remove("MODANA_DISABLED_EXTENSIONS")
        .env_remove("MODANA_LOG_JSON")
        .env_remove("RUST_LOG");
    cmd
}

/// Test that the CLI binary exists and shows help.
#[test]
fn test_cli_help() {
    let mut cmd = modana();
    cmd.arg("--help");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("list"))
        .stdout(predicate::str::contains("order"))
        .stdout(predicate::str::contains("--extension-dir"));
}

/// Test that the CLI shows version information.
#[test]
fn test_cli_version() {
    let mut cmd = modana();
    cmd.arg("--version");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("modana"));
}

/// Test that providing no subcommand shows an error.
#[test]
fn test_no_subcommand_shows_error() {
    let mut cmd = modana();

    // Clap's error code for a missing required subcommand
    cmd.assert().failure().code(2);
}

#[test]
fn test_run_starts_builtin_extensions() {
    let mut cmd = modana();
    cmd.arg("run");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Load order: shell"))
        .stdout(predicate::str::contains("active (1): shell"));
}

#[test]
fn test_run_invokes_command() {
    let mut cmd = modana();
    cmd.args(["run", "--invoke", "shell.echo", "42"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#"{"integer":42}"#));
}

#[test]
fn test_run_rejects_mismatched_arguments() {
    let mut cmd = modana();
    cmd.args(["run", "--invoke", "shell.version", "extra"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("command shell.version failed"));
}

#[test]
fn test_run_unknown_command_fails() {
    let mut cmd = modana();
    cmd.args(["run", "--invoke", "surf.load"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("surf.load"));
}

#[test]
fn test_args_require_invoke() {
    let mut cmd = modana();
    cmd.args(["run", "42"]);

    cmd.assert().failure().code(2);
}

#[test]
fn test_run_disable_flag() {
    let mut cmd = modana();
    cmd.args(["run", "--disable", "shell"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("active (0)"))
        .stdout(predicate::str::contains("disabled (1): shell"));
}

#[test]
fn test_list_json() {
    let mut cmd = modana();
    cmd.args(["list", "--json"]);

    cmd.assert()
        .success()
        .stdout(predicate::str::contains(r#""name": "shell""#))
        .stdout(predicate::str::contains(r#""state": "loaded""#));
}

#[test]
fn test_list_table() {
    let mut cmd = modana();
    cmd.arg("list");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("NAME"))
        .stdout(predicate::str::contains("builtin"));
}

#[test]
fn test_order() {
    let mut cmd = modana();
    cmd.arg("order");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("1. shell"));
}

#[test]
fn test_config_file_disables_extension() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("modana.toml");
    fs::write(&config, "disabled_extensions = [\"shell\"]\n").unwrap();

    let mut cmd = modana();
    cmd.arg("--config").arg(&config).arg("run");

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("disabled (1): shell"));
}

#[test]
fn test_missing_config_file_fails() {
    let mut cmd = modana();
    cmd.args(["--config", "/nonexistent/modana.toml", "run"]);

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("failed to load configuration"));
}

#[test]
fn test_invalid_env_override_fails() {
    let mut cmd = modana();
    cmd.env("MODANA_MAX_DISPATCH_DEPTH", "0").arg("run");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("max_dispatch_depth"));
}

#[test]
fn test_broken_module_is_skipped() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("notes.txt"), "not an extension").unwrap();
    fs::write(
        dir.path()
            .join(format!("broken.{}", std::env::consts::DLL_EXTENSION)),
        b"garbage",
    )
    .unwrap();

    let mut cmd = modana();
    cmd.arg("--extension-dir").arg(dir.path()).arg("run");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("skipped"))
        .stderr(predicate::str::contains("broken"))
        .stdout(predicate::str::contains("active (1): shell"));
}
