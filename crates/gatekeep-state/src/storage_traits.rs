//! Storage trait definitions for gatekeep
//!
//! These traits define the persistence abstractions of the gate:
//! - `ValidationLedger`: append-only validation run history
//! - `RevertLedger`: append-only revert audit trail
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
///
/// The inner field is private to guarantee the string is always valid
/// lowercase hex produced by `from_bytes` or validated via `TryFrom<String>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl From<ContentDigest> for String {
    fn from(d: ContentDigest) -> Self {
        d.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Validation runs
// ---------------------------------------------------------------------------

/// Unique identifier for a validation run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five checks every unit goes through, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum CheckKind {
    Lint,
    Format,
    TypeCheck,
    Build,
    Test,
}

impl CheckKind {
    /// Fixed pipeline order.
    pub const ORDER: [CheckKind; 5] = [
        CheckKind::Lint,
        CheckKind::Format,
        CheckKind::TypeCheck,
        CheckKind::Build,
        CheckKind::Test,
    ];

    /// Get the check name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            CheckKind::Lint => "lint",
            CheckKind::Format => "format",
            CheckKind::TypeCheck => "type-check",
            CheckKind::Build => "build",
            CheckKind::Test => "test",
        }
    }
}

impl std::fmt::Display for CheckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// Exceeded its wall-clock budget. Counts as a failure.
    TimedOut,
    /// Not executed because an earlier blocking check failed.
    Skipped,
}

/// Result of one check within a validation run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub status: CheckStatus,
    /// Captured output, possibly truncated.
    pub diagnostics: String,
    pub duration_ms: u64,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Passed
    }

    /// Placeholder for a check that never ran.
    pub fn skipped(kind: CheckKind) -> Self {
        Self {
            kind,
            status: CheckStatus::Skipped,
            diagnostics: String::new(),
            duration_ms: 0,
        }
    }
}

/// One execution of the check pipeline for a (source ref, unit) pair.
///
/// Immutable once appended. A newer run for the same pair supersedes it
/// for gating purposes; nothing is ever updated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationRun {
    pub run_id: RunId,
    /// Branch name or change-request ref the run was triggered for.
    pub source_ref: String,
    /// Commit the working tree was checked out at.
    pub commit: String,
    pub unit: String,
    /// Trigger generation; higher generations supersede lower ones.
    pub generation: u64,
    /// Per-check results in pipeline order.
    pub checks: Vec<CheckResult>,
    /// Logical AND of every check.
    pub passed: bool,
    /// Digest of the ordered check plan (names + commands).
    pub plan_digest: ContentDigest,
    pub recorded_at: DateTime<Utc>,
}

impl ValidationRun {
    pub fn new(
        source_ref: impl Into<String>,
        commit: impl Into<String>,
        unit: impl Into<String>,
        generation: u64,
        checks: Vec<CheckResult>,
        plan_digest: ContentDigest,
    ) -> Self {
        let passed = !checks.is_empty() && checks.iter().all(CheckResult::passed);
        Self {
            run_id: RunId::new(),
            source_ref: source_ref.into(),
            commit: commit.into(),
            unit: unit.into(),
            generation,
            checks,
            passed,
            plan_digest,
            recorded_at: Utc::now(),
        }
    }

    /// Checks that did not pass (excluding skipped ones).
    pub fn failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Failed | CheckStatus::TimedOut))
    }
}

/// Append-only validation run ledger.
///
/// Guarantees:
/// - `append_run` never overwrites; a duplicate `run_id` is rejected.
/// - `runs_for_source` returns runs ordered by `recorded_at` ascending.
/// - `begin_trigger` never hands out the same generation twice for a source
///   ref, even to separate processes sharing the backend.
#[async_trait]
pub trait ValidationLedger: Send + Sync {
    /// Register a new trigger for `source_ref` and return its generation.
    /// Generations start at 1 and strictly increase.
    async fn begin_trigger(&self, source_ref: &str) -> StorageResult<u64>;

    /// Newest generation issued for `source_ref`, if any.
    async fn current_generation(&self, source_ref: &str) -> StorageResult<Option<u64>>;

    /// Append a finished run.
    async fn append_run(&self, run: ValidationRun) -> StorageResult<()>;

    /// All runs recorded for a source ref, oldest first.
    async fn runs_for_source(&self, source_ref: &str) -> StorageResult<Vec<ValidationRun>>;

    /// The latest run per unit for a source ref.
    ///
    /// "Latest" means highest generation, then most recently recorded, so a
    /// slow run from an older trigger never shadows a newer one.
    async fn latest_runs(&self, source_ref: &str) -> StorageResult<Vec<ValidationRun>> {
        let runs = self.runs_for_source(source_ref).await?;
        Ok(latest_per_unit(runs))
    }
}

/// Reduce a run list to the newest run per unit, sorted by unit name.
pub fn latest_per_unit(runs: Vec<ValidationRun>) -> Vec<ValidationRun> {
    let mut latest: BTreeMap<String, ValidationRun> = BTreeMap::new();
    for run in runs {
        match latest.get(&run.unit) {
            Some(existing)
                if (existing.generation, existing.recorded_at)
                    >= (run.generation, run.recorded_at) => {}
            _ => {
                latest.insert(run.unit.clone(), run);
            }
        }
    }
    latest.into_values().collect()
}

// ---------------------------------------------------------------------------
// Reverts
// ---------------------------------------------------------------------------

/// Audit record for an applied revert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RevertRecord {
    pub revert_id: String,
    /// Commit that was reverted.
    pub target_commit: String,
    pub reason: String,
    /// New commit carrying the inverse patch.
    pub revert_commit: String,
    /// Parent number used when the target was a merge commit.
    pub mainline_parent: Option<u32>,
    /// Tracking issue, when the forge accepted it.
    pub tracking_issue: Option<u64>,
    /// Open change requests that were notified.
    pub notified_change_requests: Vec<u64>,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only revert audit trail.
#[async_trait]
pub trait RevertLedger: Send + Sync {
    /// Record an applied revert. Fails on a duplicate `revert_id`.
    async fn record_revert(&self, record: RevertRecord) -> StorageResult<()>;

    /// All recorded reverts, oldest first.
    async fn list_reverts(&self) -> StorageResult<Vec<RevertRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run(unit: &str, generation: u64, passed: bool) -> ValidationRun {
        let status = if passed {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed
        };
        ValidationRun::new(
            "dmz",
            "abc123",
            unit,
            generation,
            vec![CheckResult {
                kind: CheckKind::Lint,
                status,
                diagnostics: String::new(),
                duration_ms: 1,
            }],
            ContentDigest::from_bytes(b"plan"),
        )
    }

    #[test]
    fn digest_rejects_non_hex() {
        let err = ContentDigest::try_from("xyz".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn digest_serde_round_trips_as_plain_string() {
        let d = ContentDigest::from_bytes(b"hello");
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{}\"", d.as_str()));
        let back: ContentDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn check_kind_order_is_fixed() {
        let names: Vec<&str> = CheckKind::ORDER.iter().map(|k| k.name()).collect();
        assert_eq!(names, ["lint", "format", "type-check", "build", "test"]);
    }

    #[test]
    fn check_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&CheckKind::TypeCheck).unwrap();
        assert_eq!(json, "\"type-check\"");
    }

    #[test]
    fn skipped_check_does_not_pass() {
        let r = ValidationRun::new(
            "dmz",
            "abc",
            "kit-a",
            1,
            vec![CheckResult::skipped(CheckKind::Test)],
            ContentDigest::from_bytes(b"plan"),
        );
        assert!(!r.passed);
        assert_eq!(r.failures().count(), 0);
    }

    #[test]
    fn latest_prefers_higher_generation_even_if_older() {
        let newer_trigger = run("kit-a", 2, true);
        let mut stale = run("kit-a", 1, false);
        stale.recorded_at = newer_trigger.recorded_at + Duration::seconds(30);

        let latest = latest_per_unit(vec![newer_trigger.clone(), stale]);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].run_id, newer_trigger.run_id);
    }

    #[test]
    fn latest_keeps_one_run_per_unit() {
        let latest = latest_per_unit(vec![
            run("kit-b", 1, true),
            run("kit-a", 1, false),
            run("kit-a", 1, true),
        ]);
        let units: Vec<&str> = latest.iter().map(|r| r.unit.as_str()).collect();
        assert_eq!(units, ["kit-a", "kit-b"]);
    }
}
