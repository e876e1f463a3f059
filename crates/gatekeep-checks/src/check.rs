//! Check definitions.

use std::path::Path;

use async_trait::async_trait;
use gatekeep_core::CheckCommands;
use gatekeep_state::{CheckKind, CheckResult};
use serde::{Deserialize, Serialize};

use crate::runner::CheckRunner;

/// One pluggable check.
#[async_trait]
pub trait Check: Send + Sync {
    fn kind(&self) -> CheckKind;

    /// Stable description folded into the plan digest.
    fn describe(&self) -> String;

    /// Run in `dir`. Never errors: spawn failures and timeouts are failing
    /// results.
    async fn run(&self, dir: &Path) -> CheckResult;
}

/// Command line and timeout for a check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckSpec {
    pub kind: CheckKind,

    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    pub timeout_secs: u64,
}

impl CheckSpec {
    /// The configured command for `kind`.
    pub fn from_commands(kind: CheckKind, commands: &CheckCommands, timeout_secs: u64) -> Self {
        Self {
            kind,
            command: commands.command(kind).to_vec(),
            timeout_secs,
        }
    }

    pub fn custom(kind: CheckKind, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            kind,
            command,
            timeout_secs,
        }
    }
}

/// Check that runs an external command.
#[derive(Debug, Clone)]
pub struct CommandCheck {
    spec: CheckSpec,
}

impl CommandCheck {
    pub fn new(spec: CheckSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &CheckSpec {
        &self.spec
    }
}

#[async_trait]
impl Check for CommandCheck {
    fn kind(&self) -> CheckKind {
        self.spec.kind
    }

    fn describe(&self) -> String {
        format!("{}={}", self.spec.kind, self.spec.command.join(" "))
    }

    async fn run(&self, dir: &Path) -> CheckResult {
        CheckRunner::execute(&self.spec, dir).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_from_commands_uses_configured_command() {
        let commands = CheckCommands {
            lint: vec!["pnpm".to_string(), "lint".to_string()],
            ..CheckCommands::default()
        };
        let spec = CheckSpec::from_commands(CheckKind::Lint, &commands, 60);
        assert_eq!(spec.command, vec!["pnpm", "lint"]);
        assert_eq!(spec.timeout_secs, 60);

        let build = CheckSpec::from_commands(CheckKind::Build, &commands, 60);
        assert_eq!(build.command, vec!["npm", "run", "build"]);
    }

    #[test]
    fn describe_includes_kind_and_command() {
        let check = CommandCheck::new(CheckSpec::custom(
            CheckKind::TypeCheck,
            vec!["tsc".to_string(), "--noEmit".to_string()],
            60,
        ));
        assert_eq!(check.describe(), "type-check=tsc --noEmit");
        assert_eq!(check.kind(), CheckKind::TypeCheck);
    }
}
