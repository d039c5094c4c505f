//! Drives the `tf` binary end to end against a temporary data directory.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

struct Env {
    _tmp: TempDir,
    root: PathBuf,
    config: PathBuf,
}

impl Env {
    fn new() -> Self {
        Self::with_resolve("")
    }

    /// Like `new`, with extra lines in the `[resolve]` section.
    fn with_resolve(extra: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        let config = root.join("config.toml");
        std::fs::write(
            &config,
            format!(
                "[client]\ndata_dir = '{}'\nowner = 'alice'\n\n[resolve]\ninteractive = false\n{}",
                root.join("data").display(),
                extra
            ),
        )
        .unwrap();
        Self {
            _tmp: tmp,
            root,
            config,
        }
    }

    fn tf(&self, cwd: &Path) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tf"));
        cmd.current_dir(cwd)
            .env_remove("RUST_LOG")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn work(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Collection plus a workspace `name` mapping `$/P` to `<root>/<name>`.
    fn workspace(&self, name: &str) -> PathBuf {
        let work = self.work(name);
        std::fs::create_dir_all(&work).unwrap();
        self.tf(&self.root)
            .args(["workspace", "new", name, "--server", "$/P", "--local"])
            .arg(&work)
            .assert()
            .success();
        work
    }
}

#[test]
fn test_config_init_and_validate() {
    let env = Env::new();
    let fresh = env.root.join("fresh.toml");
    env.tf(&env.root)
        .args(["config", "init", "--output"])
        .arg(&fresh)
        .assert()
        .success()
        .stdout(predicate::str::contains("Default configuration written"));
    env.tf(&env.root)
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Owner          : alice"));
    env.tf(&env.root)
        .args(["config", "init", "--output"])
        .arg(&fresh)
        .assert()
        .code(100)
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_usage_errors_exit_two() {
    let env = Env::new();
    env.tf(&env.root).args(["rename", "only-one"]).assert().code(2);
    env.tf(&env.root)
        .args(["resolve", "--auto", "Sideways"])
        .assert()
        .code(2);
}

#[test]
fn test_add_checkin_edit_and_status() {
    let env = Env::new();
    env.tf(&env.root).args(["collection", "create"]).assert().success();
    let work = env.workspace("alice");
    std::fs::write(work.join("a.txt"), "one\n").unwrap();

    env.tf(&work).args(["add", "-r", "."]).assert().success();
    env.tf(&work)
        .args(["checkin", "-m", "initial"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Changeset 2 checked in."));
    env.tf(&work)
        .arg("status")
        .assert()
        .success()
        .stdout(predicate::str::contains("There are no pending changes."));

    env.tf(&work).args(["edit", "a.txt"]).assert().success();
    let out = env
        .tf(&work)
        .args(["status", "--format", "json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let pending: serde_json::Value = serde_json::from_slice(&out).unwrap();
    assert_eq!(pending.as_array().unwrap().len(), 1);
    assert_eq!(pending[0]["server_item"], "$/P/a.txt");

    // Nothing to resolve is not a failure.
    env.tf(&work)
        .args(["resolve", "--auto", "AutoMerge"])
        .assert()
        .success()
        .stdout(predicate::str::contains("no conflicts to resolve"));
}

#[test]
fn test_conflicting_get_exits_100_and_resolves() {
    let env = Env::new();
    env.tf(&env.root).args(["collection", "create"]).assert().success();
    let alice = env.workspace("alice");
    std::fs::write(alice.join("a.txt"), "one\n").unwrap();
    env.tf(&alice).args(["add", "-r", "."]).assert().success();
    env.tf(&alice).args(["checkin", "-m", "initial"]).assert().success();

    let bob = env.workspace("bob");
    env.tf(&bob).arg("get").assert().success();
    assert_eq!(std::fs::read_to_string(bob.join("a.txt")).unwrap(), "one\n");

    env.tf(&alice).args(["edit", "a.txt"]).assert().success();
    std::fs::write(alice.join("a.txt"), "theirs\n").unwrap();
    env.tf(&alice).args(["checkin", "-m", "theirs"]).assert().success();

    env.tf(&bob).args(["edit", "a.txt"]).assert().success();
    std::fs::write(bob.join("a.txt"), "mine\n").unwrap();
    env.tf(&bob)
        .args(["checkin", "-m", "late"])
        .assert()
        .code(100)
        .stderr(predicate::str::contains("newer version"));

    env.tf(&bob)
        .arg("get")
        .assert()
        .code(100)
        .stdout(predicate::str::contains("1 conflicts"));
    env.tf(&bob)
        .arg("conflicts")
        .assert()
        .success()
        .stdout(predicate::str::contains("$/P/a.txt"));

    // Prompting is off, so resolve needs --auto.
    env.tf(&bob).arg("resolve").assert().code(100);

    env.tf(&bob)
        .args(["resolve", "--auto", "TakeTheirs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolved 1 conflict(s)"));
    assert_eq!(std::fs::read_to_string(bob.join("a.txt")).unwrap(), "theirs\n");
}

/// Two workspaces with a Content conflict on `a.txt` in bob's.
fn content_conflict(env: &Env) -> PathBuf {
    env.tf(&env.root).args(["collection", "create"]).assert().success();
    let alice = env.workspace("alice");
    std::fs::write(alice.join("a.txt"), "one\n").unwrap();
    env.tf(&alice).args(["add", "-r", "."]).assert().success();
    env.tf(&alice).args(["checkin", "-m", "initial"]).assert().success();

    let bob = env.workspace("bob");
    env.tf(&bob).arg("get").assert().success();
    env.tf(&alice).args(["edit", "a.txt"]).assert().success();
    std::fs::write(alice.join("a.txt"), "theirs\n").unwrap();
    env.tf(&alice).args(["checkin", "-m", "theirs"]).assert().success();

    env.tf(&bob).args(["edit", "a.txt"]).assert().success();
    std::fs::write(bob.join("a.txt"), "mine\n").unwrap();
    env.tf(&bob).arg("get").assert().code(100);
    bob
}

#[test]
fn test_configured_merge_with_conflicts_does_not_block_take_theirs() {
    let env = Env::with_resolve("accept_merge_with_conflicts = true\n");
    let bob = content_conflict(&env);

    env.tf(&bob)
        .args(["resolve", "--auto", "TakeTheirs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Resolved 1 conflict(s)"));
    assert_eq!(std::fs::read_to_string(bob.join("a.txt")).unwrap(), "theirs\n");
}

#[test]
fn test_explicit_accept_with_conflicts_still_needs_a_merge() {
    let env = Env::new();
    let bob = content_conflict(&env);

    env.tf(&bob)
        .args(["resolve", "--auto", "TakeTheirs", "--accept-with-conflicts"])
        .assert()
        .code(100)
        .stderr(predicate::str::contains("accept-merge or external-tool"));
    env.tf(&bob)
        .arg("conflicts")
        .assert()
        .success()
        .stdout(predicate::str::contains("$/P/a.txt"));
}

#[test]
fn test_workspace_list_and_delete() {
    let env = Env::new();
    env.tf(&env.root).args(["collection", "create"]).assert().success();
    env.workspace("dev");

    env.tf(&env.root)
        .args(["workspace", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev"));
    env.tf(&env.root)
        .args(["workfold", "list", "-w", "dev", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"server_item\": \"$/P\""));
    env.tf(&env.root)
        .args(["workspace", "delete", "dev", "--yes"])
        .assert()
        .success();
    env.tf(&env.root)
        .args(["workspace", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No workspaces found."));
}
