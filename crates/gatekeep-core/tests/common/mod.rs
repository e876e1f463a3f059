//! Shared fixtures for gatekeep-core integration tests.
#![allow(dead_code)]

use std::collections::BTreeSet;
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gatekeep_core::{
    CheckKind, CheckResult, CheckStatus, ContentDigest, GateConfig, Result, Unit, UnitValidator,
    ValidationRun, ValidationTarget,
};

pub const CONFIG: &str = r#"
    stable_branch = "main"
    integration_branch = "dmz"
    global_patterns = ["package.json", ".github/**"]

    [[units]]
    name = "kit-a"
    paths = ["kit-a"]

    [[units]]
    name = "kit-b"
    paths = ["kit-b"]

    [[units]]
    name = "kit-legacy"
    paths = ["kit-legacy"]
    enabled = false
"#;

pub fn config() -> Arc<GateConfig> {
    Arc::new(GateConfig::from_toml_str(CONFIG).unwrap())
}

pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(repo_dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Repo with `main` and `dmz` at the same commit (two unit directories),
/// HEAD detached so refs can be moved freely.
pub fn make_gate_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path();
    run_git(p, &["init", "-q", "-b", "main"]);
    run_git(p, &["config", "user.name", "test-user"]);
    run_git(p, &["config", "user.email", "test@example.com"]);
    std::fs::create_dir_all(p.join("kit-a")).unwrap();
    std::fs::create_dir_all(p.join("kit-b")).unwrap();
    std::fs::write(p.join("kit-a/app.tsx"), "a0\n").unwrap();
    std::fs::write(p.join("kit-b/app.tsx"), "b0\n").unwrap();
    run_git(p, &["add", "."]);
    run_git(p, &["commit", "-q", "-m", "initial"]);
    run_git(p, &["branch", "dmz"]);
    run_git(p, &["checkout", "-q", "--detach"]);
    dir
}

/// Commit `content` to `path` on `branch` and return the new head.
pub fn commit_on(repo_dir: &Path, branch: &str, path: &str, content: &str, message: &str) -> String {
    run_git(repo_dir, &["checkout", "-q", branch]);
    let full = repo_dir.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&full, content).unwrap();
    run_git(repo_dir, &["add", path]);
    run_git(repo_dir, &["commit", "-q", "-m", message]);
    let head = run_git(repo_dir, &["rev-parse", "HEAD"]);
    run_git(repo_dir, &["checkout", "-q", "--detach"]);
    head
}

pub fn head_of(repo_dir: &Path, branch: &str) -> String {
    run_git(repo_dir, &["rev-parse", &format!("refs/heads/{branch}")])
}

fn checks(pass: bool) -> Vec<CheckResult> {
    CheckKind::ORDER
        .iter()
        .enumerate()
        .map(|(i, &kind)| {
            let status = match (pass, i) {
                (true, _) => CheckStatus::Passed,
                (false, 0) => CheckStatus::Failed,
                (false, _) => CheckStatus::Skipped,
            };
            CheckResult {
                kind,
                status,
                diagnostics: if status == CheckStatus::Failed {
                    "lint: 3 problems".to_string()
                } else {
                    String::new()
                },
                duration_ms: 1,
            }
        })
        .collect()
}

/// Validator with scripted outcomes instead of real check commands.
#[derive(Default)]
pub struct ScriptedValidator {
    failing_units: Mutex<BTreeSet<String>>,
    failing_commits: Mutex<BTreeSet<String>>,
    slow_commits: Mutex<BTreeSet<String>>,
    calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_unit(&self, unit: &str) {
        self.failing_units.lock().unwrap().insert(unit.to_string());
    }

    pub fn fail_commit(&self, commit: &str) {
        self.failing_commits.lock().unwrap().insert(commit.to_string());
    }

    /// Delay validation of `commit` so a later trigger can overtake it.
    pub fn slow_commit(&self, commit: &str) {
        self.slow_commits.lock().unwrap().insert(commit.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UnitValidator for ScriptedValidator {
    async fn validate(&self, unit: &Unit, target: &ValidationTarget) -> Result<ValidationRun> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let slow = self.slow_commits.lock().unwrap().contains(&target.commit);
        if slow {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let pass = !self.failing_units.lock().unwrap().contains(&unit.name)
            && !self.failing_commits.lock().unwrap().contains(&target.commit);
        Ok(ValidationRun::new(
            &target.source_ref,
            &target.commit,
            &unit.name,
            target.generation,
            checks(pass),
            ContentDigest::from_bytes(b"scripted"),
        ))
    }
}

pub fn config_with_remote() -> Arc<GateConfig> {
    let text = format!("remote = \"origin\"\n{CONFIG}");
    Arc::new(GateConfig::from_toml_str(&text).unwrap())
}

/// Bare clone of `repo_dir` registered as its `origin`.
pub fn add_bare_remote(repo_dir: &Path) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let bare = dir.path().join("origin.git");
    let bare_str = bare.to_string_lossy().to_string();
    let repo_str = repo_dir.to_string_lossy().to_string();
    run_git(dir.path(), &["clone", "-q", "--bare", &repo_str, &bare_str]);
    run_git(repo_dir, &["remote", "add", "origin", &bare_str]);
    dir
}

pub fn bare_path(remote: &tempfile::TempDir) -> std::path::PathBuf {
    remote.path().join("origin.git")
}

/// Install a pre-receive hook that refuses every push.
#[cfg(unix)]
pub fn reject_pushes(remote: &tempfile::TempDir) {
    use std::os::unix::fs::PermissionsExt;
    let hook = bare_path(remote).join("hooks/pre-receive");
    std::fs::create_dir_all(hook.parent().unwrap()).unwrap();
    std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();
}
