//! Manually triggered reverts of integration-branch commits.
//!
//! A revert never rewrites history: the inverse patch is committed on top of
//! the integration head in a throwaway worktree, pushed, and the local branch
//! is moved to it by compare-and-swap. Merge commits are reverted against their first
//! parent.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use gatekeep_state::{RevertLedger, RevertRecord};
use tracing::{info, warn};

use crate::concurrency::BranchLocks;
use crate::config::{AuthPolicy, GateConfig};
use crate::domain::error::{GateError, Result};
use crate::git::GitRepo;
use crate::metrics::METRICS;
use crate::notify::{Notifier, OpenChangeRequest};
use crate::obs;
use crate::reporting::{render_revert_notice, render_tracking_body, render_tracking_title};

/// Action name passed to the [`Authorizer`] for reverts.
pub const REVERT_ACTION: &str = "revert";

/// Decides whether an actor may perform a guarded action.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, actor: &str, action: &str) -> Result<()>;
}

/// Allows exactly the actors listed in an [`AuthPolicy`].
#[derive(Debug, Clone)]
pub struct PolicyAuthorizer {
    policy: AuthPolicy,
}

impl PolicyAuthorizer {
    pub fn new(policy: AuthPolicy) -> Self {
        Self { policy }
    }
}

impl Authorizer for PolicyAuthorizer {
    fn authorize(&self, actor: &str, action: &str) -> Result<()> {
        if self.policy.allowed_actors.contains(actor) {
            Ok(())
        } else {
            Err(GateError::AuthorizationDenied {
                actor: actor.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// A revert request from a human.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevertRequest {
    /// Commit to revert; the integration head when `None`.
    pub commit: Option<String>,
    pub reason: String,
    pub actor: String,
}

pub struct RevertController {
    config: Arc<GateConfig>,
    repo: GitRepo,
    ledger: Arc<dyn RevertLedger>,
    notifier: Notifier,
    authorizer: Arc<dyn Authorizer>,
    locks: BranchLocks,
}

impl RevertController {
    pub fn new(
        config: Arc<GateConfig>,
        repo: GitRepo,
        ledger: Arc<dyn RevertLedger>,
        notifier: Notifier,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            config,
            repo,
            ledger,
            notifier,
            authorizer,
            locks: BranchLocks::new(),
        }
    }

    /// Share branch locks with the gate controller.
    pub fn with_locks(mut self, locks: BranchLocks) -> Self {
        self.locks = locks;
        self
    }

    /// Revert a commit on the integration branch.
    ///
    /// Authorization is checked before anything else. Tracking issue and
    /// notification failures are logged and leave the applied revert in
    /// place.
    pub async fn revert(&self, request: RevertRequest) -> Result<RevertRecord> {
        let reason = request.reason.trim();
        if reason.is_empty() {
            return Err(GateError::InvalidEvent("a revert reason is required".to_string()));
        }
        self.authorizer.authorize(&request.actor, REVERT_ACTION)?;

        let branch = self.config.integration_branch.as_str();
        if let Some(remote) = &self.config.remote {
            self.repo.sync_branch(remote, branch).await?;
        }

        let (target, revert_commit, mainline_parent) = {
            let _guard = self.locks.lock(branch).await;
            self.apply(branch, request.commit.as_deref(), reason, &request.actor)
                .await?
        };

        METRICS.inc_reverts();
        obs::emit_revert_applied(&target, &revert_commit, &request.actor);

        let affected = self.affected_change_requests(&target).await;
        let mut record = RevertRecord {
            revert_id: uuid::Uuid::new_v4().to_string(),
            target_commit: target.clone(),
            reason: reason.to_string(),
            revert_commit,
            mainline_parent,
            tracking_issue: None,
            notified_change_requests: affected.iter().copied().collect(),
            requested_by: request.actor.clone(),
            created_at: Utc::now(),
        };

        let subject = self.repo.subject(&target).await.unwrap_or_default();
        let title = render_tracking_title(&target, &subject);
        match self
            .notifier
            .forge()
            .open_issue(&title, &render_tracking_body(&record, branch))
            .await
        {
            Ok(number) => record.tracking_issue = Some(number),
            Err(err) => {
                warn!(error = %err, "could not open revert tracking issue");
                METRICS.inc_notifications_degraded();
            }
        }

        let notice = render_revert_notice(&record, branch);
        let mut notified = Vec::with_capacity(affected.len());
        for cr in affected {
            if !self.notifier.post(cr, &notice).await.is_degraded() {
                notified.push(cr);
            }
        }
        record.notified_change_requests = notified;

        self.ledger.record_revert(record.clone()).await?;
        info!(
            revert_id = %record.revert_id,
            tracking_issue = ?record.tracking_issue,
            notified = record.notified_change_requests.len(),
            "revert recorded"
        );
        Ok(record)
    }

    /// Compute and land the inverse commit. Caller holds the branch lock.
    async fn apply(
        &self,
        branch: &str,
        commit: Option<&str>,
        reason: &str,
        actor: &str,
    ) -> Result<(String, String, Option<u32>)> {
        let head = self.repo.branch_head(branch).await?;
        let target = self.repo.resolve(commit.unwrap_or(&head)).await?;

        if !self.repo.is_ancestor(&target, &head).await? {
            return Err(GateError::RevertTargetNotOnBranch {
                commit: target,
                branch: branch.to_string(),
            });
        }

        let parents = self.repo.parents(&target).await?;
        let mainline_parent = match parents.len() {
            0 => {
                return Err(GateError::Git(format!(
                    "{target} is a root commit and cannot be reverted"
                )))
            }
            1 => None,
            _ => Some(1),
        };

        let subject = self.repo.subject(&target).await?;
        let message = format!(
            "Revert \"{subject}\"\n\nThis reverts commit {target}.\n\nReason: {reason}\nRequested-by: {actor}\n"
        );

        let worktree = self.repo.add_worktree(&head).await?;
        let result = self
            .repo
            .revert_in(&worktree, &target, mainline_parent, &message)
            .await;
        if let Err(err) = self.repo.remove_worktree(worktree).await {
            warn!(error = %err, "failed to remove revert worktree");
        }
        let revert_commit = result?;

        // remote first: a rejected push must leave the local branch alone
        if let Some(remote) = &self.config.remote {
            self.repo.push(remote, &revert_commit, branch).await?;
        }
        self.repo.update_branch(branch, &revert_commit, &head).await?;
        Ok((target, revert_commit, mainline_parent))
    }

    /// Open change requests whose head has `target` in its history.
    async fn affected_change_requests(&self, target: &str) -> BTreeSet<u64> {
        let forge = self.notifier.forge();
        let open = match forge.open_change_requests().await {
            Ok(open) => open,
            Err(err) => {
                warn!(error = %err, "could not list open change requests");
                return BTreeSet::new();
            }
        };

        let mut affected = BTreeSet::new();
        for cr in open {
            match self.head_contains(&cr, target).await {
                Ok(true) => {
                    affected.insert(cr.id);
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(change_request = cr.id, error = %err, "could not inspect change request history")
                }
            }
        }
        affected
    }

    /// Whether `target` is reachable from the change request's head,
    /// fetching the head from the remote when it is not present locally.
    async fn head_contains(&self, cr: &OpenChangeRequest, target: &str) -> Result<bool> {
        if !self.repo.has_commit(&cr.head_commit).await? {
            let Some(remote) = &self.config.remote else {
                return Err(GateError::Git(format!(
                    "head {} of change request {} is not available locally",
                    cr.head_commit, cr.id
                )));
            };
            self.repo.fetch_ref(remote, &cr.head_ref).await?;
        }
        self.repo.is_ancestor(target, &cr.head_commit).await
    }
}

/// Refuses every actor. Used when no policy file is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

impl Authorizer for DenyAll {
    fn authorize(&self, actor: &str, action: &str) -> Result<()> {
        Err(GateError::AuthorizationDenied {
            actor: actor.to_string(),
            action: action.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_authorizer_allows_listed_actors_only() {
        let policy = AuthPolicy {
            allowed_actors: ["alice".to_string()].into_iter().collect(),
        };
        let auth = PolicyAuthorizer::new(policy);
        assert!(auth.authorize("alice", REVERT_ACTION).is_ok());
        let err = auth.authorize("mallory", REVERT_ACTION).unwrap_err();
        assert!(matches!(err, GateError::AuthorizationDenied { .. }));
    }

    #[test]
    fn deny_all_denies() {
        assert!(DenyAll.authorize("root", REVERT_ACTION).is_err());
    }
}
