//! Seam between the gate and whatever executes the check pipeline.

use async_trait::async_trait;
use gatekeep_state::ValidationRun;

use crate::domain::error::Result;
use crate::domain::unit::Unit;

/// What to validate: a commit reached through a source ref, tagged with the
/// trigger generation that asked for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationTarget {
    pub source_ref: String,
    pub commit: String,
    pub generation: u64,
}

impl ValidationTarget {
    pub fn new(source_ref: impl Into<String>, commit: impl Into<String>, generation: u64) -> Self {
        Self {
            source_ref: source_ref.into(),
            commit: commit.into(),
            generation,
        }
    }
}

/// Runs the full check pipeline for one unit at one commit.
///
/// Implementations return a finished [`ValidationRun`] whose `passed` flag is
/// the conjunction of every check. Check failures are data, not errors; `Err`
/// is reserved for infrastructure problems (no work tree, git failure).
#[async_trait]
pub trait UnitValidator: Send + Sync {
    async fn validate(&self, unit: &Unit, target: &ValidationTarget) -> Result<ValidationRun>;
}
