//! Unit validation in detached worktrees.

use std::path::Path;

use async_trait::async_trait;
use gatekeep_core::{GitRepo, Result, Unit, UnitValidator, ValidationTarget};
use gatekeep_state::{CheckResult, CheckStatus, ValidationRun};
use tracing::{info, warn};

use crate::plan::CheckPlan;

/// Runs a [`CheckPlan`] for a unit at a commit.
///
/// Each validation gets its own detached worktree, so units validate in
/// parallel without sharing a working directory.
pub struct ValidationRunner {
    repo: GitRepo,
    plan: CheckPlan,
}

impl ValidationRunner {
    pub fn new(repo: GitRepo, plan: CheckPlan) -> Self {
        Self { repo, plan }
    }

    pub fn plan(&self) -> &CheckPlan {
        &self.plan
    }

    /// Run the plan for `unit` inside an already checked-out tree.
    pub async fn run_in_tree(
        &self,
        unit: &Unit,
        target: &ValidationTarget,
        tree: &Path,
    ) -> ValidationRun {
        let dir = tree.join(unit.working_dir());
        let checks = if dir.is_dir() {
            self.plan.run(&dir).await
        } else {
            warn!(unit = %unit.name, dir = %dir.display(), "unit directory missing at commit");
            self.missing_dir(&dir)
        };

        let run = ValidationRun::new(
            &target.source_ref,
            &target.commit,
            &unit.name,
            target.generation,
            checks,
            self.plan.digest(),
        );
        info!(
            unit = %run.unit,
            commit = %run.commit,
            passed = run.passed,
            "unit validated"
        );
        run
    }

    /// First check fails with a pointer at the missing directory; the rest
    /// are skipped.
    fn missing_dir(&self, dir: &Path) -> Vec<CheckResult> {
        self.plan
            .kinds()
            .into_iter()
            .enumerate()
            .map(|(i, kind)| {
                if i == 0 {
                    CheckResult {
                        kind,
                        status: CheckStatus::Failed,
                        diagnostics: format!("unit directory {} does not exist", dir.display()),
                        duration_ms: 0,
                    }
                } else {
                    CheckResult::skipped(kind)
                }
            })
            .collect()
    }
}

#[async_trait]
impl UnitValidator for ValidationRunner {
    async fn validate(&self, unit: &Unit, target: &ValidationTarget) -> Result<ValidationRun> {
        let worktree = self.repo.add_worktree(&target.commit).await?;
        let run = self.run_in_tree(unit, target, worktree.path()).await;
        if let Err(err) = self.repo.remove_worktree(worktree).await {
            warn!(error = %err, "failed to remove validation worktree");
        }
        Ok(run)
    }
}
