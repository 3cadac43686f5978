use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn envpatch(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("envpatch").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("ENVPATCH_HOST")
        .env_remove("ENVPATCH_RUNTIME")
        .env_remove("ENVPATCH_LOG_FILE")
        .env_remove("ENVPATCH_LOG")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_output() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Change an environment variable of a container",
        ))
        .stdout(predicate::str::contains("CONTAINER"))
        .stdout(predicate::str::contains("NAME=VALUE"))
        .stdout(predicate::str::contains("--stop-timeout"))
        .stdout(predicate::str::contains("--fail-fast"));
}

#[test]
fn test_version_output() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "envpatch {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_container_without_assignment_is_rejected() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .arg("web-1")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("NAME=VALUE"));
}

#[test]
fn test_assignment_without_separator_is_usage_error() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .arg("web-1")
        .arg("NOVALUE")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("NOVALUE"));
}

#[test]
fn test_empty_variable_name_is_usage_error() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .arg("web-1")
        .arg("=value")
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_interactive_mode_needs_terminal() {
    // stdout is a pipe under the test harness
    let dir = TempDir::new().unwrap();
    envpatch(&dir)
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("needs a terminal"));
}

#[test]
fn test_log_file_flag_writes_log() {
    let dir = TempDir::new().unwrap();
    let log_path = dir.path().join("custom.log");
    envpatch(&dir)
        .arg("--log-file")
        .arg(&log_path)
        .arg("--log-level")
        .arg("debug")
        .arg("web-1")
        .arg("NOVALUE")
        .assert()
        .failure()
        .code(2);

    assert!(log_path.exists());
    assert!(!dir.path().join("envpatch.log").exists());
    let contents = std::fs::read_to_string(&log_path).unwrap();
    assert!(contents.contains("CLI initialized"));
}

#[test]
fn test_default_log_file_in_working_directory() {
    let dir = TempDir::new().unwrap();
    envpatch(&dir).assert().failure();

    assert!(dir.path().join("envpatch.log").exists());
}
