//! Git integration: ancestry checks, compare-and-swap ref updates,
//! temporary worktrees and inverse-patch commits.
//!
//! Everything shells out to the `git` binary in the repository directory.
//! Refs are only ever moved with `git update-ref <ref> <new> <old>`, so a
//! concurrent writer makes the update fail instead of being overwritten.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Identity;
use crate::domain::error::{GateError, Result};

/// Captured output of a git invocation.
#[derive(Debug)]
struct GitOutput {
    success: bool,
    code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// A detached worktree checked out in a temporary directory.
///
/// Call [`GitRepo::remove_worktree`] when done; dropping only removes the
/// directory and leaves a stale entry for `git worktree prune`.
#[derive(Debug)]
pub struct Worktree {
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl Worktree {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Handle to a local git repository.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    identity: Identity,
}

impl GitRepo {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            identity: Identity::default(),
        }
    }

    /// Identity used for commits created by the gate.
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn run_in(&self, dir: &Path, args: &[&str]) -> Result<GitOutput> {
        debug!(?args, dir = %dir.display(), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .env("GIT_AUTHOR_NAME", &self.identity.name)
            .env("GIT_AUTHOR_EMAIL", &self.identity.email)
            .env("GIT_COMMITTER_NAME", &self.identity.name)
            .env("GIT_COMMITTER_EMAIL", &self.identity.email)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| GateError::Git(format!("failed to run git: {e}")))?;

        Ok(GitOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Run git in `dir` and fail on a non-zero exit.
    async fn checked_in(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let out = self.run_in(dir, args).await?;
        if !out.success {
            return Err(GateError::Git(format!(
                "git {} failed: {}",
                args.join(" "),
                out.stderr.trim()
            )));
        }
        Ok(out.stdout)
    }

    async fn checked(&self, args: &[&str]) -> Result<String> {
        let root = self.root.clone();
        self.checked_in(&root, args).await
    }

    /// Resolve a revision (branch, tag, sha) to a full commit id.
    pub async fn resolve(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let sha = self
            .checked(&["rev-parse", "--verify", "--quiet", &spec])
            .await
            .map_err(|_| GateError::Git(format!("cannot resolve '{rev}'")))?;
        let sha = sha.trim().to_string();
        if sha.is_empty() {
            return Err(GateError::Git(format!("'{rev}' resolved to nothing")));
        }
        Ok(sha)
    }

    /// Whether `commit` exists in the local object store.
    pub async fn has_commit(&self, commit: &str) -> Result<bool> {
        let root = self.root.clone();
        let spec = format!("{commit}^{{commit}}");
        let out = self.run_in(&root, &["cat-file", "-e", &spec]).await?;
        Ok(out.success)
    }

    /// Fetch `refname` from `remote` so its objects become available
    /// locally. No local ref is created.
    pub async fn fetch_ref(&self, remote: &str, refname: &str) -> Result<()> {
        self.checked(&["fetch", "--no-tags", remote, refname])
            .await
            .map(|_| ())
    }

    /// Head commit of a local branch.
    pub async fn branch_head(&self, branch: &str) -> Result<String> {
        self.resolve(&format!("refs/heads/{branch}")).await
    }

    /// Whether `ancestor` is reachable from `descendant` (a commit is its
    /// own ancestor).
    pub async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let root = self.root.clone();
        let out = self
            .run_in(&root, &["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        match out.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(GateError::Git(format!(
                "merge-base --is-ancestor {ancestor} {descendant} failed: {}",
                out.stderr.trim()
            ))),
        }
    }

    /// Paths changed on `head` since it diverged from `base` (`base...head`).
    pub async fn changed_paths(&self, base: &str, head: &str) -> Result<Vec<String>> {
        let range = format!("{base}...{head}");
        let out = self.checked(&["diff", "--name-only", "-z", &range]).await?;
        Ok(out
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Parent commits, in order.
    pub async fn parents(&self, commit: &str) -> Result<Vec<String>> {
        let out = self
            .checked(&["rev-list", "--parents", "-n", "1", commit])
            .await?;
        Ok(out.split_whitespace().skip(1).map(str::to_string).collect())
    }

    /// Tree id of a commit.
    pub async fn tree_of(&self, commit: &str) -> Result<String> {
        let spec = format!("{commit}^{{tree}}");
        Ok(self.checked(&["rev-parse", &spec]).await?.trim().to_string())
    }

    /// One-line subject of a commit.
    pub async fn subject(&self, commit: &str) -> Result<String> {
        Ok(self
            .checked(&["log", "-1", "--format=%s", commit])
            .await?
            .trim()
            .to_string())
    }

    /// Move `refs/heads/<branch>` from `expected_old` to `new`.
    ///
    /// Fails if the ref no longer points at `expected_old`.
    pub async fn update_branch(&self, branch: &str, new: &str, expected_old: &str) -> Result<()> {
        let refname = format!("refs/heads/{branch}");
        let message = format!("gatekeep: {branch} {expected_old} -> {new}");
        self.checked(&["update-ref", "-m", &message, &refname, new, expected_old])
            .await
            .map(|_| ())
    }

    /// Mirror a remote branch into the local branch of the same name.
    pub async fn sync_branch(&self, remote: &str, branch: &str) -> Result<()> {
        let refspec = format!("+refs/heads/{branch}:refs/heads/{branch}");
        self.checked(&["fetch", "--update-head-ok", remote, &refspec])
            .await
            .map(|_| ())
    }

    /// Push `commit` to `branch` on `remote` without force, so a
    /// non-fast-forward is rejected by the server.
    pub async fn push(&self, remote: &str, commit: &str, branch: &str) -> Result<()> {
        let refspec = format!("{commit}:refs/heads/{branch}");
        self.checked(&["push", "--quiet", remote, &refspec])
            .await
            .map(|_| ())
    }

    /// Check out `commit` in a fresh detached worktree.
    pub async fn add_worktree(&self, commit: &str) -> Result<Worktree> {
        let dir = tempfile::Builder::new().prefix("gatekeep-wt-").tempdir()?;
        let path = dir.path().join("tree");
        let path_str = path.to_string_lossy().to_string();
        self.checked(&["worktree", "add", "--detach", "--force", &path_str, commit])
            .await?;
        Ok(Worktree { path, _dir: dir })
    }

    /// Unregister and delete a worktree.
    pub async fn remove_worktree(&self, worktree: Worktree) -> Result<()> {
        let path_str = worktree.path.to_string_lossy().to_string();
        let result = self
            .checked(&["worktree", "remove", "--force", &path_str])
            .await
            .map(|_| ());
        if result.is_err() {
            warn!(path = %path_str, "worktree removal failed, pruning");
            let _ = self.checked(&["worktree", "prune"]).await;
        }
        result
    }

    /// Commit the inverse of `commit` on top of the worktree's HEAD.
    ///
    /// `mainline` selects the parent to diff against for merge commits.
    /// On conflict the worktree is reset and `RevertConflict` lists the
    /// conflicting paths; nothing is committed.
    pub async fn revert_in(
        &self,
        worktree: &Worktree,
        commit: &str,
        mainline: Option<u32>,
        message: &str,
    ) -> Result<String> {
        let dir = worktree.path().to_path_buf();
        let mainline_str = mainline.map(|m| m.to_string());
        let mut args = vec!["revert", "--no-commit"];
        if let Some(m) = mainline_str.as_deref() {
            args.extend(["-m", m]);
        }
        args.push(commit);

        let out = self.run_in(&dir, &args).await?;
        if !out.success {
            let conflicts = self
                .checked_in(&dir, &["diff", "--name-only", "--diff-filter=U", "-z"])
                .await
                .unwrap_or_default();
            let paths: Vec<String> = conflicts
                .split('\0')
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
            let _ = self.run_in(&dir, &["revert", "--abort"]).await;
            let _ = self.run_in(&dir, &["reset", "--hard", "HEAD"]).await;

            if paths.is_empty() {
                return Err(GateError::Git(format!(
                    "git revert {commit} failed: {}",
                    out.stderr.trim()
                )));
            }
            return Err(GateError::RevertConflict {
                commit: commit.to_string(),
                paths,
            });
        }

        self.checked_in(&dir, &["commit", "--no-verify", "-m", message])
            .await?;
        Ok(self
            .checked_in(&dir, &["rev-parse", "HEAD"])
            .await?
            .trim()
            .to_string())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::process::Command as StdCommand;

    pub fn run_git(repo_dir: &Path, args: &[&str]) -> String {
        let output = StdCommand::new("git")
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

    /// Repo with one commit on `main`.
    pub fn make_git_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init", "-q", "-b", "main"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "-q", "--allow-empty", "-m", "initial"]);
        dir
    }

    pub fn commit_file(repo_dir: &Path, path: &str, content: &str, message: &str) -> String {
        let full = repo_dir.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&full, content).unwrap();
        run_git(repo_dir, &["add", path]);
        run_git(repo_dir, &["commit", "-q", "-m", message]);
        run_git(repo_dir, &["rev-parse", "HEAD"])
    }
}
