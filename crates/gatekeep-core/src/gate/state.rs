//! Gate state machine.
//!
//! ```text
//!   Pending ──submit/push──▶ Validating ──pass──▶ Passed ──merge (CR)──▶ Merged
//!      ▲                      │    ▲                 │
//!      │                      fail  └──new push──────┤
//!      │                      ▼                      └──fast-forward (branch)──▶ FastForwarded
//!      └─ new head ◀──────  Failed ──new push──▶ Validating
//! ```

use serde::{Deserialize, Serialize};

use crate::domain::error::{GateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Pending,
    Validating,
    Passed,
    Failed,
    Merged,
    FastForwarded,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateState::Pending => "pending",
            GateState::Validating => "validating",
            GateState::Passed => "passed",
            GateState::Failed => "failed",
            GateState::Merged => "merged",
            GateState::FastForwarded => "fast_forwarded",
        }
    }

    /// No further transition for the same head.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GateState::Merged | GateState::FastForwarded)
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which promotion path a source ref is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flow {
    /// Change request into the integration branch; a human merges.
    ChangeRequest,
    /// Integration branch into the stable branch; the gate fast-forwards.
    IntegrationBranch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateTrigger {
    Submitted,
    Pushed,
    ValidationPassed,
    ValidationFailed,
    HumanMerged,
    FastForwardApplied,
}

impl GateTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateTrigger::Submitted => "submitted",
            GateTrigger::Pushed => "pushed",
            GateTrigger::ValidationPassed => "validation_passed",
            GateTrigger::ValidationFailed => "validation_failed",
            GateTrigger::HumanMerged => "human_merged",
            GateTrigger::FastForwardApplied => "fast_forward_applied",
        }
    }
}

impl std::fmt::Display for GateTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next state for `trigger` in `state`, or `InvalidTransition`.
pub fn transition(state: GateState, flow: Flow, trigger: GateTrigger) -> Result<GateState> {
    use GateState::*;
    use GateTrigger::*;

    let next = match (state, trigger) {
        (Pending | Validating | Passed | Failed, Submitted | Pushed) => Some(Validating),
        (Validating, ValidationPassed) => Some(Passed),
        (Validating, ValidationFailed) => Some(Failed),
        (Passed, HumanMerged) if flow == Flow::ChangeRequest => Some(Merged),
        (Passed, FastForwardApplied) if flow == Flow::IntegrationBranch => Some(FastForwarded),
        _ => None,
    };

    next.ok_or_else(|| GateError::InvalidTransition {
        from: state.to_string(),
        trigger: trigger.to_string(),
    })
}
