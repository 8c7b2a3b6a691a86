use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn buildctl() -> Command {
    let mut cmd = Command::cargo_bin("buildctl").unwrap();
    cmd.env_remove("BUILDCTL_LOG")
        .env_remove("RUST_LOG")
        .env_remove("VSINSTALLDIR");
    cmd
}

#[test]
fn test_help_output() {
    buildctl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Build pipeline controller"))
        .stdout(predicate::str::contains("--configuration"))
        .stdout(predicate::str::contains("--deploy-extensions"));
}

#[test]
fn test_help_through_property_token() {
    buildctl()
        .arg("/?")
        .assert()
        .success()
        .stdout(predicate::str::contains("--test32"));
}

#[test]
fn test_version_output() {
    buildctl()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!(
            "buildctl {}",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_conflicting_bitness_prints_usage() {
    buildctl()
        .args(["--test32", "--test64"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Cannot combine --test32 and --test64"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_build_and_launch_require_deploy() {
    buildctl()
        .args(["--build", "--launch"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_invalid_property_is_usage_error() {
    buildctl()
        .args(["--build", "Foo=1"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Invalid argument: Foo=1"))
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_unknown_flag_is_usage_error() {
    buildctl()
        .arg("--frobnicate")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Usage:"));
}

#[test]
fn test_official_build_requires_token() {
    buildctl()
        .args([
            "--officialBuildId",
            "20190101.1",
            "--vsDropName",
            "Products/Roslyn",
            "--vsBranch",
            "main",
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains(
            "--vs-drop-access-token is required for official builds",
        ))
        .stdout(predicate::str::contains("Usage:").not());
}

#[test]
fn test_no_phases_succeeds() {
    let repo = TempDir::new().unwrap();
    buildctl()
        .arg("--repo-root")
        .arg(repo.path())
        .assert()
        .success();
}

#[test]
fn test_missing_repo_root_fails() {
    let repo = TempDir::new().unwrap();
    buildctl()
        .arg("--repo-root")
        .arg(repo.path().join("absent"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Error:"));
}
