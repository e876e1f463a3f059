//! Gate configuration (`gatekeep.toml`) and the separate authorization policy.
//!
//! Both are loaded once per run and never mutated afterwards. The policy
//! lives in its own file so that write access to it can be granted
//! independently of write access to the automation config.

use std::collections::BTreeSet;
use std::path::Path;

use globset::Glob;
use serde::{Deserialize, Serialize};

use crate::domain::error::{GateError, Result};
use crate::domain::unit::Unit;
use gatekeep_state::CheckKind;

/// Default wall-clock budget for a single check.
pub const DEFAULT_CHECK_TIMEOUT_SECS: u64 = 900;

/// Commands for the five checks, run inside the unit directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CheckCommands {
    pub lint: Vec<String>,
    pub format: Vec<String>,
    pub type_check: Vec<String>,
    pub build: Vec<String>,
    pub test: Vec<String>,
}

impl Default for CheckCommands {
    fn default() -> Self {
        let npm = |args: &[&str]| -> Vec<String> {
            std::iter::once("npm")
                .chain(args.iter().copied())
                .map(String::from)
                .collect()
        };
        Self {
            lint: npm(&["run", "lint"]),
            format: npm(&["run", "format:check"]),
            type_check: npm(&["run", "type-check"]),
            build: npm(&["run", "build"]),
            test: npm(&["test"]),
        }
    }
}

impl CheckCommands {
    pub fn command(&self, kind: CheckKind) -> &[String] {
        match kind {
            CheckKind::Lint => &self.lint,
            CheckKind::Format => &self.format,
            CheckKind::TypeCheck => &self.type_check,
            CheckKind::Build => &self.build,
            CheckKind::Test => &self.test,
        }
    }
}

/// Committer identity used for revert commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self {
            name: "gatekeep".to_string(),
            email: "gatekeep@users.noreply.github.com".to_string(),
        }
    }
}

fn default_stable() -> String {
    "main".to_string()
}

fn default_integration() -> String {
    "dmz".to_string()
}

fn default_timeout() -> u64 {
    DEFAULT_CHECK_TIMEOUT_SECS
}

/// Static gate configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GateConfig {
    /// Always-deployable branch; only ever fast-forwarded.
    #[serde(default = "default_stable")]
    pub stable_branch: String,

    /// Branch every change request targets.
    #[serde(default = "default_integration")]
    pub integration_branch: String,

    /// Remote to sync from and push to. Local refs only when unset.
    #[serde(default)]
    pub remote: Option<String>,

    #[serde(default = "default_timeout")]
    pub check_timeout_secs: u64,

    /// Glob patterns whose match escalates to every enabled unit.
    #[serde(default)]
    pub global_patterns: Vec<String>,

    #[serde(default)]
    pub checks: CheckCommands,

    #[serde(default)]
    pub committer: Identity,

    pub units: Vec<Unit>,
}

impl GateConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate config from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: GateConfig =
            toml::from_str(raw).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the gate cannot operate safely with.
    pub fn validate(&self) -> Result<()> {
        if self.units.is_empty() {
            return Err(GateError::Config("at least one unit is required".to_string()));
        }
        if self.stable_branch == self.integration_branch {
            return Err(GateError::Config(format!(
                "stable and integration branch must differ (both '{}')",
                self.stable_branch
            )));
        }

        let mut seen = BTreeSet::new();
        for unit in &self.units {
            if unit.name.trim().is_empty() {
                return Err(GateError::Config("unit name must not be empty".to_string()));
            }
            if !seen.insert(unit.name.as_str()) {
                return Err(GateError::Config(format!("duplicate unit '{}'", unit.name)));
            }
            if unit.paths.is_empty() || unit.paths.iter().any(|p| p.trim().is_empty()) {
                return Err(GateError::Config(format!(
                    "unit '{}' needs at least one non-empty path prefix",
                    unit.name
                )));
            }
        }

        for pattern in &self.global_patterns {
            Glob::new(pattern).map_err(|e| {
                GateError::Config(format!("invalid global pattern '{pattern}': {e}"))
            })?;
        }

        for kind in CheckKind::ORDER {
            if self.checks.command(kind).is_empty() {
                return Err(GateError::Config(format!("check '{kind}' has an empty command")));
            }
        }

        if self.check_timeout_secs == 0 {
            return Err(GateError::Config("check_timeout_secs must be > 0".to_string()));
        }
        Ok(())
    }

    /// Units with `enabled = true`.
    pub fn enabled_units(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.enabled)
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }
}

/// Who may trigger guarded operations (reverts).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthPolicy {
    #[serde(default)]
    pub allowed_actors: BTreeSet<String>,
}

impl AuthPolicy {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GateError::Config(format!("failed to read policy {}: {e}", path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| GateError::Config(format!("invalid policy: {e}")))
    }
}
