//! Row definitions for gatekeep SurrealDB tables
//!
//! Tables:
//! - validation_runs: one row per recorded `ValidationRun`
//! - reverts: one row per applied `RevertRecord`
//! - triggers: one row per generation handed out by `begin_trigger`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{CheckResult, ContentDigest, RevertRecord, RunId, ValidationRun};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// `validation_runs` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRunRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub source_ref: String,
    pub commit: String,
    pub unit: String,
    pub generation: u64,
    pub checks: Vec<CheckResult>,
    pub passed: bool,
    pub plan_digest: String,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl From<ValidationRun> for ValidationRunRow {
    fn from(run: ValidationRun) -> Self {
        Self {
            id: None,
            run_id: run.run_id.0,
            source_ref: run.source_ref,
            commit: run.commit,
            unit: run.unit,
            generation: run.generation,
            checks: run.checks,
            passed: run.passed,
            plan_digest: run.plan_digest.into(),
            recorded_at: run.recorded_at,
        }
    }
}

impl TryFrom<ValidationRunRow> for ValidationRun {
    type Error = StorageError;

    fn try_from(row: ValidationRunRow) -> Result<Self, Self::Error> {
        Ok(ValidationRun {
            run_id: RunId(row.run_id),
            source_ref: row.source_ref,
            commit: row.commit,
            unit: row.unit,
            generation: row.generation,
            checks: row.checks,
            passed: row.passed,
            plan_digest: ContentDigest::try_from(row.plan_digest)?,
            recorded_at: row.recorded_at,
        })
    }
}

/// `reverts` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevertRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub revert_id: String,
    pub target_commit: String,
    pub reason: String,
    pub revert_commit: String,
    pub mainline_parent: Option<u32>,
    pub tracking_issue: Option<u64>,
    pub notified_change_requests: Vec<u64>,
    pub requested_by: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<RevertRecord> for RevertRow {
    fn from(r: RevertRecord) -> Self {
        Self {
            id: None,
            revert_id: r.revert_id,
            target_commit: r.target_commit,
            reason: r.reason,
            revert_commit: r.revert_commit,
            mainline_parent: r.mainline_parent,
            tracking_issue: r.tracking_issue,
            notified_change_requests: r.notified_change_requests,
            requested_by: r.requested_by,
            created_at: r.created_at,
        }
    }
}

impl From<RevertRow> for RevertRecord {
    fn from(row: RevertRow) -> Self {
        Self {
            revert_id: row.revert_id,
            target_commit: row.target_commit,
            reason: row.reason,
            revert_commit: row.revert_commit,
            mainline_parent: row.mainline_parent,
            tracking_issue: row.tracking_issue,
            notified_change_requests: row.notified_change_requests,
            requested_by: row.requested_by,
            created_at: row.created_at,
        }
    }
}

/// `triggers` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<surrealdb::sql::Thing>,
    pub source_ref: String,
    pub generation: u64,
    #[serde(with = "surreal_datetime")]
    pub started_at: DateTime<Utc>,
}

impl TriggerRow {
    pub fn new(source_ref: &str, generation: u64) -> Self {
        Self {
            id: None,
            source_ref: source_ref.to_string(),
            generation,
            started_at: Utc::now(),
        }
    }
}
