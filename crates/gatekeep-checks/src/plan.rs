//! Ordered check plans and their identity.

use std::path::Path;
use std::sync::Arc;

use gatekeep_core::GateConfig;
use gatekeep_state::{CheckKind, CheckResult, ContentDigest};
use tracing::info;

use crate::check::{Check, CheckSpec, CommandCheck};

/// The checks a unit goes through, in pipeline order.
///
/// Every check is blocking: once one fails, the rest are recorded as
/// skipped, so a run always carries one result per planned check.
#[derive(Clone)]
pub struct CheckPlan {
    checks: Vec<Arc<dyn Check>>,
}

impl CheckPlan {
    /// Build a plan. Checks are ordered by kind (lint first, test last).
    pub fn new(mut checks: Vec<Arc<dyn Check>>) -> Self {
        checks.sort_by_key(|c| c.kind());
        Self { checks }
    }

    /// The five command checks from the gate configuration.
    pub fn from_config(config: &GateConfig) -> Self {
        Self::new(
            CheckKind::ORDER
                .iter()
                .map(|&kind| {
                    Arc::new(CommandCheck::new(CheckSpec::from_commands(
                        kind,
                        &config.checks,
                        config.check_timeout_secs,
                    ))) as Arc<dyn Check>
                })
                .collect(),
        )
    }

    pub fn kinds(&self) -> Vec<CheckKind> {
        self.checks.iter().map(|c| c.kind()).collect()
    }

    /// SHA-256 over the ordered check descriptions.
    pub fn digest(&self) -> ContentDigest {
        let descriptions: Vec<String> = self.checks.iter().map(|c| c.describe()).collect();
        compute_plan_digest(&descriptions)
    }

    /// Run every check in order in `dir`, stopping at the first failure.
    pub async fn run(&self, dir: &Path) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(self.checks.len());
        let mut failed = false;
        for check in &self.checks {
            if failed {
                results.push(CheckResult::skipped(check.kind()));
                continue;
            }
            let result = check.run(dir).await;
            info!(
                check = %result.kind,
                status = ?result.status,
                duration_ms = result.duration_ms,
                "check finished"
            );
            failed = !result.passed();
            results.push(result);
        }
        results
    }
}

/// Deterministic digest of ordered check descriptions.
fn compute_plan_digest(descriptions: &[String]) -> ContentDigest {
    let mut buf = Vec::new();
    for description in descriptions {
        buf.extend_from_slice(description.as_bytes());
        buf.push(0);
    }
    ContentDigest::from_bytes(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_state::CheckStatus;

    fn cmd(kind: CheckKind, command: &[&str]) -> Arc<dyn Check> {
        Arc::new(CommandCheck::new(CheckSpec::custom(
            kind,
            command.iter().map(|s| s.to_string()).collect(),
            60,
        )))
    }

    fn five(failing: Option<CheckKind>) -> CheckPlan {
        CheckPlan::new(
            CheckKind::ORDER
                .iter()
                .map(|&k| {
                    if Some(k) == failing {
                        cmd(k, &["false"])
                    } else {
                        cmd(k, &["true"])
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_plan_digest_deterministic() {
        assert_eq!(five(None).digest(), five(None).digest());
    }

    #[test]
    fn test_plan_digest_command_sensitive() {
        assert_ne!(five(None).digest(), five(Some(CheckKind::Build)).digest());
    }

    #[test]
    fn plan_is_sorted_into_pipeline_order() {
        let plan = CheckPlan::new(vec![
            cmd(CheckKind::Test, &["true"]),
            cmd(CheckKind::Lint, &["true"]),
            cmd(CheckKind::Build, &["true"]),
        ]);
        assert_eq!(
            plan.kinds(),
            vec![CheckKind::Lint, CheckKind::Build, CheckKind::Test]
        );
    }

    #[tokio::test]
    async fn all_passing_runs_every_check() {
        let dir = tempfile::tempdir().unwrap();
        let results = five(None).run(dir.path()).await;
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.passed()));
    }

    #[tokio::test]
    async fn failure_skips_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let results = five(Some(CheckKind::Format)).run(dir.path()).await;

        let statuses: Vec<CheckStatus> = results.iter().map(|r| r.status).collect();
        assert_eq!(
            statuses,
            vec![
                CheckStatus::Passed,
                CheckStatus::Failed,
                CheckStatus::Skipped,
                CheckStatus::Skipped,
                CheckStatus::Skipped,
            ]
        );
    }

    #[test]
    fn from_config_plans_all_five() {
        let config = GateConfig::from_toml_str(
            r#"
            [[units]]
            name = "a"
            paths = ["a"]
            "#,
        )
        .unwrap();
        assert_eq!(CheckPlan::from_config(&config).kinds(), CheckKind::ORDER.to_vec());
    }
}
