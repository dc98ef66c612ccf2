use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use cl_test_utils::GitRepoTestGuard;

#[test]
fn help_lists_commands() {
  cargo_bin_cmd!("git-cl")
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("upload"))
    .stdout(predicate::str::contains("land"))
    .stdout(predicate::str::contains("try-results"));
}

#[test]
fn version_is_printed() {
  cargo_bin_cmd!("git-cl")
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn completion_script_for_bash() {
  cargo_bin_cmd!("git-cl")
    .args(["completion", "bash"])
    .assert()
    .success()
    .stdout(predicate::str::contains("git-cl"));
}

#[test]
fn status_outside_repository_fails() {
  let dir = tempfile::tempdir().unwrap();
  cargo_bin_cmd!("git-cl")
    .current_dir(dir.path())
    .arg("status")
    .assert()
    .failure();
}

#[test]
fn tree_without_status_url_exits_2() {
  let guard = GitRepoTestGuard::with_initial_commit();
  cargo_bin_cmd!("git-cl")
    .current_dir(guard.path())
    .arg("tree")
    .assert()
    .code(2)
    .stdout(predicate::str::contains("git cl config"));
}

#[test]
fn issue_is_set_and_cleared() {
  let guard = GitRepoTestGuard::with_initial_commit();
  cargo_bin_cmd!("git-cl")
    .current_dir(guard.path())
    .args(["issue", "123"])
    .assert()
    .success();

  cargo_bin_cmd!("git-cl")
    .current_dir(guard.path())
    .arg("issue")
    .assert()
    .success()
    .stdout(predicate::str::contains("Issue number: 123"));

  cargo_bin_cmd!("git-cl")
    .current_dir(guard.path())
    .args(["issue", "0"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Issue number: None"));
}

#[test]
fn set_commit_flags_conflict() {
  cargo_bin_cmd!("git-cl")
    .args(["set-commit", "--dry-run", "--clear"])
    .assert()
    .failure();
}
