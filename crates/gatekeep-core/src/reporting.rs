//! Markdown rendering for status messages, tracking issues and revert
//! notices.

use gatekeep_state::{CheckStatus, RevertRecord, ValidationRun};

use crate::gate::{GateDecision, GateState};
use crate::notify::STATUS_MARKER;

/// Diagnostics beyond this many characters are cut from status messages.
const MAX_DIAGNOSTIC_CHARS: usize = 2_000;

fn status_cell(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Passed => "✅",
        CheckStatus::Failed => "❌",
        CheckStatus::TimedOut => "⏱",
        CheckStatus::Skipped => "–",
    }
}

fn short(commit: &str) -> &str {
    &commit[..commit.len().min(12)]
}

fn tail(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = count - max;
    let idx = text.char_indices().nth(skip).map(|(i, _)| i).unwrap_or(0);
    &text[idx..]
}

/// Render the status message posted on a change request.
pub fn render_status_md(
    head: &str,
    state: GateState,
    decision: &GateDecision,
    runs: &[ValidationRun],
) -> String {
    let mut out = String::new();
    out.push_str(STATUS_MARKER);
    out.push('\n');
    let verdict = match decision {
        GateDecision::Allow => "passed",
        GateDecision::Block { .. } => "blocked",
    };
    out.push_str(&format!("## gatekeep: {verdict}\n\n"));
    out.push_str(&format!("- head: `{}`\n- state: `{state}`\n\n", short(head)));

    if runs.is_empty() {
        out.push_str("No units affected; nothing to validate.\n");
        return out;
    }

    out.push_str("| unit | lint | format | type-check | build | test |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for run in runs {
        out.push_str(&format!("| `{}` |", run.unit));
        for check in &run.checks {
            out.push_str(&format!(" {} |", status_cell(check.status)));
        }
        out.push('\n');
    }

    for run in runs.iter().filter(|r| !r.passed) {
        for check in run.failures() {
            out.push_str(&format!(
                "\n<details><summary><code>{}</code> {} failed</summary>\n\n```\n{}\n```\n</details>\n",
                run.unit,
                check.kind,
                tail(check.diagnostics.trim(), MAX_DIAGNOSTIC_CHARS)
            ));
        }
    }
    out
}

/// Title for a revert tracking issue.
pub fn render_tracking_title(target_commit: &str, subject: &str) -> String {
    format!("Revert {}: {subject}", short(target_commit))
}

/// Body for a revert tracking issue.
pub fn render_tracking_body(record: &RevertRecord, branch: &str) -> String {
    let mut out = String::new();
    out.push_str(&format!("Reverted on `{branch}` by @{}.\n\n", record.requested_by));
    out.push_str(&format!("**Reason:** {}\n\n", record.reason));
    out.push_str(&format!("- reverted commit: `{}`\n", record.target_commit));
    out.push_str(&format!("- revert commit: `{}`\n", record.revert_commit));
    if let Some(parent) = record.mainline_parent {
        out.push_str(&format!(
            "- merge commit reverted against parent {parent}\n"
        ));
    }
    if !record.notified_change_requests.is_empty() {
        out.push_str("\nAffected change requests:\n");
        for cr in &record.notified_change_requests {
            out.push_str(&format!("- #{cr}\n"));
        }
    }
    out
}

/// Notice posted once on each open change request containing the reverted
/// commit.
pub fn render_revert_notice(record: &RevertRecord, branch: &str) -> String {
    let mut out = format!(
        "Commit `{}` was reverted on `{branch}` (revert commit `{}`).\n\n**Reason:** {}\n",
        short(&record.target_commit),
        short(&record.revert_commit),
        record.reason
    );
    if let Some(issue) = record.tracking_issue {
        out.push_str(&format!("\nTracking issue: #{issue}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatekeep_state::{CheckKind, CheckResult, ContentDigest};

    fn run(unit: &str, failing: Option<(CheckKind, &str)>) -> ValidationRun {
        let checks = CheckKind::ORDER
            .iter()
            .map(|&kind| match failing {
                Some((k, diag)) if k == kind => CheckResult {
                    kind,
                    status: CheckStatus::Failed,
                    diagnostics: diag.to_string(),
                    duration_ms: 1,
                },
                Some((k, _)) if kind > k => CheckResult::skipped(kind),
                _ => CheckResult {
                    kind,
                    status: CheckStatus::Passed,
                    diagnostics: String::new(),
                    duration_ms: 1,
                },
            })
            .collect();
        ValidationRun::new("refs/pull/1/head", "abc1234", unit, 1, checks, ContentDigest::from_bytes(b"p"))
    }

    fn record() -> RevertRecord {
        RevertRecord {
            revert_id: "r1".to_string(),
            target_commit: "1111111111111111".to_string(),
            reason: "broke checkout".to_string(),
            revert_commit: "2222222222222222".to_string(),
            mainline_parent: Some(1),
            tracking_issue: Some(44),
            notified_change_requests: vec![5, 8],
            requested_by: "ops".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn status_contains_marker_and_failure_details() {
        let runs = vec![
            run("kit-a", None),
            run("kit-b", Some((CheckKind::Build, "error TS2304: cannot find name"))),
        ];
        let decision = GateDecision::Block {
            failing_units: vec!["kit-b".to_string()],
        };
        let md = render_status_md("abc1234", GateState::Failed, &decision, &runs);
        assert!(md.starts_with(STATUS_MARKER));
        assert!(md.contains("blocked"));
        assert!(md.contains("`kit-b`"));
        assert!(md.contains("build failed"));
        assert!(md.contains("TS2304"));
        assert!(!md.contains("kit-a</code>"));
    }

    #[test]
    fn status_for_empty_run_set_is_trivially_passing() {
        let md = render_status_md("abc", GateState::Passed, &GateDecision::Allow, &[]);
        assert!(md.contains("passed"));
        assert!(md.contains("nothing to validate"));
    }

    #[test]
    fn tracking_body_names_reason_and_both_commits() {
        let body = render_tracking_body(&record(), "dmz");
        assert!(body.contains("broke checkout"));
        assert!(body.contains("1111111111111111"));
        assert!(body.contains("2222222222222222"));
        assert!(body.contains("parent 1"));
        assert!(body.contains("#8"));
    }

    #[test]
    fn revert_notice_links_tracking_issue() {
        let notice = render_revert_notice(&record(), "dmz");
        assert!(notice.contains("#44"));
        assert!(notice.contains("broke checkout"));
    }

    #[test]
    fn tail_keeps_the_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
    }
}
