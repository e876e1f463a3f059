//! Trigger inputs delivered by the CI platform.
//!
//! Events arrive as JSON tagged by `"event"`:
//!
//! ```json
//! { "event": "change_request", "id": 12, "source_ref": "refs/pull/12/head",
//!   "target_ref": "dmz", "head_commit": "4f2c...", "changed_paths": ["kit-a/app.tsx"] }
//! ```

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::{GateError, Result};

/// A change request was opened or updated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeRequestEvent {
    pub id: u64,
    pub source_ref: String,
    pub target_ref: String,
    pub head_commit: String,
    /// Paths touched by the change. When absent the controller diffs the
    /// head against the target branch.
    #[serde(default)]
    pub changed_paths: Option<Vec<String>>,
}

/// A branch received new commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PushEvent {
    /// Branch name or full ref (`refs/heads/dmz`).
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub before: Option<String>,
    pub after: String,
    #[serde(default)]
    pub commits: Vec<String>,
}

impl PushEvent {
    /// Branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

/// A human asked for a revert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManualDispatchEvent {
    /// Commit to revert; defaults to the integration branch head.
    #[serde(default)]
    pub commit: Option<String>,
    pub reason: String,
    pub actor: String,
}

/// Every trigger the controller reacts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GateEvent {
    ChangeRequest(ChangeRequestEvent),
    Push(PushEvent),
    ManualDispatch(ManualDispatchEvent),
}

fn commit_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9a-fA-F]{7,64}$").expect("static regex"))
}

fn ensure_commit(field: &str, value: &str) -> Result<()> {
    if commit_pattern().is_match(value) {
        Ok(())
    } else {
        Err(GateError::InvalidEvent(format!(
            "{field} is not a commit id: '{value}'"
        )))
    }
}

impl GateEvent {
    /// Parse and validate an event from JSON.
    pub fn from_json(raw: &str) -> Result<Self> {
        let event: GateEvent = serde_json::from_str(raw)?;
        event.validate()?;
        Ok(event)
    }

    /// Structural checks that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        match self {
            GateEvent::ChangeRequest(cr) => {
                ensure_commit("head_commit", &cr.head_commit)?;
                if cr.target_ref.is_empty() {
                    return Err(GateError::InvalidEvent("target_ref is empty".to_string()));
                }
            }
            GateEvent::Push(push) => {
                ensure_commit("after", &push.after)?;
                if let Some(before) = &push.before {
                    ensure_commit("before", before)?;
                }
            }
            GateEvent::ManualDispatch(dispatch) => {
                if dispatch.reason.trim().is_empty() {
                    return Err(GateError::InvalidEvent(
                        "a revert reason is required".to_string(),
                    ));
                }
                if let Some(commit) = &dispatch.commit {
                    ensure_commit("commit", commit)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_change_request_event() {
        let raw = r#"{
            "event": "change_request",
            "id": 12,
            "source_ref": "refs/pull/12/head",
            "target_ref": "dmz",
            "head_commit": "4f2c9d1",
            "changed_paths": ["kit-a/app.tsx"]
        }"#;
        let event = GateEvent::from_json(raw).unwrap();
        match event {
            GateEvent::ChangeRequest(cr) => {
                assert_eq!(cr.id, 12);
                assert_eq!(cr.changed_paths.unwrap(), vec!["kit-a/app.tsx"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn push_branch_strips_refs_heads() {
        let raw = r#"{"event":"push","ref":"refs/heads/dmz","after":"abcdef1234"}"#;
        let GateEvent::Push(push) = GateEvent::from_json(raw).unwrap() else {
            panic!("expected push");
        };
        assert_eq!(push.branch(), "dmz");
        assert!(push.commits.is_empty());
    }

    #[test]
    fn rejects_non_hex_commit() {
        let raw = r#"{"event":"push","ref":"dmz","after":"HEAD~1"}"#;
        let err = GateEvent::from_json(raw).unwrap_err();
        assert!(matches!(err, GateError::InvalidEvent(_)));
    }

    #[test]
    fn manual_dispatch_requires_reason() {
        let raw = r#"{"event":"manual_dispatch","reason":"   ","actor":"ops"}"#;
        let err = GateEvent::from_json(raw).unwrap_err();
        assert!(err.to_string().contains("reason"));
    }

    #[test]
    fn manual_dispatch_commit_is_optional() {
        let raw = r#"{"event":"manual_dispatch","reason":"broken deploy","actor":"ops"}"#;
        let GateEvent::ManualDispatch(d) = GateEvent::from_json(raw).unwrap() else {
            panic!("expected manual dispatch");
        };
        assert!(d.commit.is_none());
    }
}
