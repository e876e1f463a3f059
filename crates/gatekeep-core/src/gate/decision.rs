//! Gate decisions: a pure function of the latest runs for a head.

use std::collections::BTreeSet;

use gatekeep_state::ValidationRun;
use serde::{Deserialize, Serialize};

/// Whether promotion may proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GateDecision {
    Allow,
    Block { failing_units: Vec<String> },
}

impl GateDecision {
    /// Decide from the latest run per unit.
    ///
    /// Only runs at `head` count. A required unit with no run at `head` is
    /// treated as failing. An empty `required` set allows.
    pub fn evaluate(required: &BTreeSet<String>, latest: &[ValidationRun], head: &str) -> Self {
        let failing_units: Vec<String> = required
            .iter()
            .filter(|unit| {
                !latest
                    .iter()
                    .any(|run| &run.unit == *unit && run.commit == head && run.passed)
            })
            .cloned()
            .collect();

        if failing_units.is_empty() {
            GateDecision::Allow
        } else {
            GateDecision::Block { failing_units }
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, GateDecision::Allow)
    }
}
