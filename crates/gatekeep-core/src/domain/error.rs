//! Domain-level error taxonomy for gatekeep.

use gatekeep_state::StorageError;

use crate::detect::DetectError;

/// gatekeep domain errors.
///
/// `ValidationFailure` and `Timeout` are recoverable and normally surface
/// inside a `GateOutcome` rather than as an `Err`. `FastForwardConflict`,
/// `RevertConflict` and `AuthorizationDenied` are fatal to the automated
/// path and are never retried.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("validation failed for unit(s): {}", units.join(", "))]
    ValidationFailure { units: Vec<String> },

    /// `from` must be an ancestor of `to` for the move to be a fast-forward
    /// of a commit on the integration branch.
    #[error("cannot fast-forward {branch}: {from} is not an ancestor of {to}")]
    FastForwardConflict {
        branch: String,
        from: String,
        to: String,
    },

    #[error("revert of {commit} conflicts in: {}", paths.join(", "))]
    RevertConflict { commit: String, paths: Vec<String> },

    #[error("commit {commit} is not reachable from {branch}")]
    RevertTargetNotOnBranch { commit: String, branch: String },

    #[error("actor '{actor}' is not authorized to {action}")]
    AuthorizationDenied { actor: String, action: String },

    #[error("notification failed: {0}")]
    NotificationFailure(String),

    #[error("check '{check}' timed out after {secs}s")]
    Timeout { check: String, secs: u64 },

    #[error("invalid gate transition from {from} on {trigger}")]
    InvalidTransition { from: String, trigger: String },

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("change detection error: {0}")]
    Detect(#[from] DetectError),

    #[error("git error: {0}")]
    Git(String),

    #[error("forge error: {0}")]
    Forge(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateError {
    /// Fatal conditions require a human before automation can continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GateError::FastForwardConflict { .. }
                | GateError::RevertConflict { .. }
                | GateError::AuthorizationDenied { .. }
        )
    }
}

/// Result type for gatekeep domain operations.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_forward_conflict_names_both_heads() {
        let err = GateError::FastForwardConflict {
            branch: "main".to_string(),
            from: "aaa".to_string(),
            to: "bbb".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("main"));
        assert!(msg.contains("aaa"));
        assert!(msg.contains("bbb"));
        assert!(err.is_fatal());
    }

    #[test]
    fn revert_conflict_lists_paths() {
        let err = GateError::RevertConflict {
            commit: "abc".to_string(),
            paths: vec!["a.txt".to_string(), "b/c.txt".to_string()],
        };
        assert!(err.to_string().contains("a.txt, b/c.txt"));
        assert!(err.is_fatal());
    }

    #[test]
    fn validation_failure_is_not_fatal() {
        let err = GateError::ValidationFailure {
            units: vec!["kit-a".to_string()],
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("kit-a"));
    }
}
