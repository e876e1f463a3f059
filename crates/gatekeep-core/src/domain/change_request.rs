//! Change requests: proposed change sets targeting the integration branch.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Validation status of a change request's current head.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Failed,
}

/// A proposed change set (pull/merge request).
///
/// Created on submission, mutated on each re-validation, closed on merge or
/// abandonment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRequest {
    pub id: u64,
    /// Ref the changes live on (e.g. `refs/pull/12/head` or a branch name).
    pub source_ref: String,
    pub target_branch: String,
    pub head_commit: String,
    pub affected_units: BTreeSet<String>,
    pub status: ValidationStatus,
    /// Status message to update in place, once one exists.
    pub status_message_id: Option<u64>,
}

impl ChangeRequest {
    pub fn new(
        id: u64,
        source_ref: impl Into<String>,
        target_branch: impl Into<String>,
        head_commit: impl Into<String>,
    ) -> Self {
        Self {
            id,
            source_ref: source_ref.into(),
            target_branch: target_branch.into(),
            head_commit: head_commit.into(),
            affected_units: BTreeSet::new(),
            status: ValidationStatus::Pending,
            status_message_id: None,
        }
    }
}
