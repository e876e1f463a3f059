//! Check execution.

use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use gatekeep_state::{CheckResult, CheckStatus};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::check::CheckSpec;

/// Diagnostics are cut to the last this-many bytes.
pub const MAX_DIAGNOSTIC_BYTES: usize = 64 * 1024;

/// Executes check commands.
pub struct CheckRunner;

impl CheckRunner {
    /// Run one check in `dir`.
    ///
    /// The child is killed when the timeout elapses. Timeouts, spawn
    /// failures and non-zero exits all come back as failing results.
    pub async fn execute(spec: &CheckSpec, dir: &Path) -> CheckResult {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let Some((exe, args)) = spec.command.split_first() else {
            return CheckResult {
                kind: spec.kind,
                status: CheckStatus::Failed,
                diagnostics: format!("check {} has an empty command", spec.kind),
                duration_ms: 0,
            };
        };

        debug!(check = %spec.kind, command = ?spec.command, dir = %dir.display(), "running check");
        let child = Command::new(exe)
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(err) => {
                warn!(check = %spec.kind, error = %err, "check could not be spawned");
                return CheckResult {
                    kind: spec.kind,
                    status: CheckStatus::Failed,
                    diagnostics: format!("failed to spawn `{exe}`: {err}"),
                    duration_ms: elapsed(start),
                };
            }
        };

        let waited = tokio::time::timeout(
            Duration::from_secs(spec.timeout_secs),
            child.wait_with_output(),
        )
        .await;

        match waited {
            Err(_) => CheckResult {
                kind: spec.kind,
                status: CheckStatus::TimedOut,
                diagnostics: format!("timed out after {}s", spec.timeout_secs),
                duration_ms: elapsed(start),
            },
            Ok(Err(err)) => CheckResult {
                kind: spec.kind,
                status: CheckStatus::Failed,
                diagnostics: format!("failed waiting for `{exe}`: {err}"),
                duration_ms: elapsed(start),
            },
            Ok(Ok(output)) => {
                let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
                let status = if output.status.success() {
                    CheckStatus::Passed
                } else {
                    CheckStatus::Failed
                };
                CheckResult {
                    kind: spec.kind,
                    status,
                    diagnostics: truncate_tail(&combined, MAX_DIAGNOSTIC_BYTES).to_string(),
                    duration_ms: elapsed(start),
                }
            }
        }
    }
}

/// Last `max` bytes of `text`, moved forward to a char boundary.
fn truncate_tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatekeep_state::CheckKind;

    fn spec(command: &[&str], timeout_secs: u64) -> CheckSpec {
        CheckSpec::custom(
            CheckKind::Lint,
            command.iter().map(|s| s.to_string()).collect(),
            timeout_secs,
        )
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = CheckRunner::execute(&spec(&["echo", "hello"], 60), dir.path()).await;
        assert_eq!(result.status, CheckStatus::Passed);
        assert!(result.diagnostics.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let dir = tempfile::tempdir().unwrap();
        let result = CheckRunner::execute(&spec(&["false"], 60), dir.path()).await;
        assert_eq!(result.status, CheckStatus::Failed);
    }

    #[tokio::test]
    async fn captures_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            CheckRunner::execute(&spec(&["sh", "-c", "echo oops >&2; exit 2"], 60), dir.path())
                .await;
        assert_eq!(result.status, CheckStatus::Failed);
        assert!(result.diagnostics.contains("oops"));
    }

    #[tokio::test]
    async fn timeout_is_a_failing_result() {
        let dir = tempfile::tempdir().unwrap();
        let result = CheckRunner::execute(&spec(&["sleep", "5"], 1), dir.path()).await;
        assert_eq!(result.status, CheckStatus::TimedOut);
        assert_eq!(result.diagnostics, "timed out after 1s");
        assert!(result.duration_ms < 5_000);
    }

    #[tokio::test]
    async fn missing_executable_is_a_failing_result() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            CheckRunner::execute(&spec(&["gatekeep-no-such-binary"], 60), dir.path()).await;
        assert_eq!(result.status, CheckStatus::Failed);
        assert!(result.diagnostics.contains("failed to spawn"));
    }

    #[tokio::test]
    async fn runs_in_the_given_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "here").unwrap();
        let result = CheckRunner::execute(&spec(&["cat", "marker.txt"], 60), dir.path()).await;
        assert_eq!(result.status, CheckStatus::Passed);
        assert_eq!(result.diagnostics, "here");
    }

    #[test]
    fn truncate_keeps_tail_on_char_boundary() {
        let text = "ééé-end";
        let cut = truncate_tail(text, 5);
        assert!(cut.ends_with("-end"));
        assert!(cut.len() <= 5);
        assert_eq!(truncate_tail("short", 10), "short");
    }
}
