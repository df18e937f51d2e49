//! Exit codes and output of the `rl` binary

use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A repository with target data and a config whose harness checks the module
fn repo(harness: &str) -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    fs::create_dir_all(temp.path().join("data/icici")).unwrap();
    fs::write(temp.path().join("data/icici/icici sample.pdf"), b"%PDF-1.4").unwrap();
    fs::write(
        temp.path().join("data/icici/result.csv"),
        "Date,Description,Balance\n01-08-2024,Salary,6864.58\n",
    )
    .unwrap();
    fs::write(
        temp.path().join("rl.yml"),
        format!(
            "verify:\n  command: \"{}\"\n  timeout-ms: 10000\njournal:\n  enabled: false\n",
            harness
        ),
    )
    .unwrap();
    temp
}

fn rl(repo: &Path) -> Command {
    let mut cmd = Command::cargo_bin("rl").unwrap();
    cmd.current_dir(repo)
        .env("XDG_DATA_HOME", repo.join(".data"))
        .env_remove("GROQ_API_KEY")
        .args(["--config", "rl.yml"]);
    cmd
}

#[test]
fn test_invalid_target_name_is_config_error() {
    let temp = repo("true");
    rl(temp.path())
        .args(["run", "../etc"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Invalid target name"));
}

#[test]
fn test_missing_api_key_is_config_error() {
    let temp = repo("true");
    rl(temp.path())
        .args(["run", "icici"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("GROQ_API_KEY"));
}

#[test]
fn test_prompt_prints_first_attempt() {
    let temp = repo("true");
    rl(temp.path())
        .args(["prompt", "icici"])
        .assert()
        .success()
        .stdout(predicate::str::contains("custom_parsers/icici_parser.py"))
        .stdout(predicate::str::contains("attempt 1 of 3"))
        .stdout(predicate::str::contains("01-08-2024,Salary,6864.58"));
}

#[test]
fn test_prompt_with_missing_expected_output() {
    let temp = repo("true");
    fs::remove_file(temp.path().join("data/icici/result.csv")).unwrap();
    rl(temp.path())
        .args(["prompt", "icici"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("expected output"));
}

#[test]
fn test_verify_pass_and_fail() {
    let temp = repo("test -f custom_parsers/icici_parser.py && echo ok || { echo 'no module' >&2; exit 1; }");
    rl(temp.path())
        .args(["verify", "icici"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Verification failed (exit 1)"));

    fs::create_dir_all(temp.path().join("custom_parsers")).unwrap();
    fs::write(temp.path().join("custom_parsers/icici_parser.py"), "").unwrap();
    rl(temp.path())
        .args(["verify", "icici"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ok"))
        .stdout(predicate::str::contains("Verification passed"));
}

#[test]
fn test_local_config_is_read_from_root() {
    let temp = repo("true");
    fs::write(
        temp.path().join(".repairloop.yml"),
        "verify:\n  command: \"echo from-local-config\"\njournal:\n  enabled: false\n",
    )
    .unwrap();
    let elsewhere = TempDir::new().unwrap();

    Command::cargo_bin("rl")
        .unwrap()
        .current_dir(elsewhere.path())
        .env("XDG_DATA_HOME", elsewhere.path().join(".data"))
        .arg("--root")
        .arg(temp.path())
        .args(["verify", "icici"])
        .assert()
        .success()
        .stdout(predicate::str::contains("from-local-config"));
}
