//! Structured lifecycle events for the gate.
//!
//! Every event carries an `event` field (`gate.transition`,
//! `validation.finished`, `fast_forward.applied`, `revert.applied`,
//! `notify.degraded`) so log pipelines can filter on it. Controller entry
//! points are `#[instrument]`ed, so events also carry the trigger's span.

use tracing::{info, warn};

/// Gate state changed for a source ref.
pub fn emit_transition(source_ref: &str, from: &str, to: &str, trigger: &str) {
    info!(
        event = "gate.transition",
        source_ref = %source_ref,
        from = %from,
        to = %to,
        trigger = %trigger,
    );
}

/// A unit finished its check pipeline.
pub fn emit_validation_finished(
    source_ref: &str,
    unit: &str,
    commit: &str,
    passed: bool,
    duration_ms: u64,
) {
    info!(
        event = "validation.finished",
        source_ref = %source_ref,
        unit = %unit,
        commit = %commit,
        passed,
        duration_ms,
    );
}

/// The stable branch advanced.
pub fn emit_fast_forward(branch: &str, from: &str, to: &str) {
    info!(event = "fast_forward.applied", branch = %branch, from = %from, to = %to);
}

/// A revert commit landed on the integration branch.
pub fn emit_revert_applied(target: &str, revert_commit: &str, actor: &str) {
    info!(
        event = "revert.applied",
        target = %target,
        revert_commit = %revert_commit,
        actor = %actor,
    );
}

/// Posting to the forge failed; gating continues without the message.
pub fn emit_notification_degraded(change_request: u64, error: &dyn std::fmt::Display) {
    warn!(event = "notify.degraded", change_request, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[traced_test]
    #[test]
    fn transition_event_is_structured() {
        emit_transition("refs/pull/7/head", "validating", "passed", "validation_passed");
        assert!(logs_contain("gate.transition"));
        assert!(logs_contain("refs/pull/7/head"));
        assert!(logs_contain("validation_passed"));
    }

    #[traced_test]
    #[test]
    fn degraded_notification_logs_warning() {
        emit_notification_degraded(42, &"HTTP 502");
        assert!(logs_contain("notify.degraded"));
        assert!(logs_contain("WARN"));
        assert!(logs_contain("HTTP 502"));
    }
}
