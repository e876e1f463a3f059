//! Change detection: which units does a change set touch?
//!
//! A unit is affected when a changed path lies under one of its prefixes.
//! A path matching any global pattern (root manifests, CI config) escalates
//! to every enabled unit, overriding the prefix rule.

use std::collections::BTreeSet;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;

use crate::domain::unit::{normalize_path, Unit};

/// Errors produced while building a detector.
#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("no units configured")]
    NoUnits,

    #[error("invalid global pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

/// Maps changed paths to affected units.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    units: Vec<Unit>,
    globals: GlobSet,
}

impl ChangeDetector {
    /// Build a detector. Fails only when `units` is empty or a pattern is
    /// not a valid glob.
    pub fn new(units: Vec<Unit>, global_patterns: &[String]) -> Result<Self, DetectError> {
        if units.is_empty() {
            return Err(DetectError::NoUnits);
        }

        let mut builder = GlobSetBuilder::new();
        for pattern in global_patterns {
            let glob = Glob::new(pattern).map_err(|err| DetectError::InvalidPattern {
                pattern: pattern.clone(),
                message: err.to_string(),
            })?;
            builder.add(glob);
        }
        let globals = builder.build().map_err(|err| DetectError::InvalidPattern {
            pattern: global_patterns.join(", "),
            message: err.to_string(),
        })?;

        Ok(Self { units, globals })
    }

    /// Whether a path matches a global pattern.
    pub fn is_global(&self, path: &str) -> bool {
        self.globals.is_match(normalize_path(path))
    }

    /// Names of the units affected by `changed_paths`, sorted.
    ///
    /// An empty result means "validate nothing": callers report it as
    /// trivially passing.
    pub fn affected<I, S>(&self, changed_paths: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let paths: Vec<S> = changed_paths.into_iter().collect();

        if let Some(global) = paths.iter().find(|p| self.is_global(p.as_ref())) {
            debug!(path = %global.as_ref(), "global path changed, all enabled units affected");
            return self.enabled().map(|u| u.name.clone()).collect();
        }

        self.enabled()
            .filter(|unit| paths.iter().any(|p| unit.owns(p.as_ref())))
            .map(|unit| unit.name.clone())
            .collect()
    }

    /// Enabled units, in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter().filter(|u| u.enabled)
    }

    pub fn unit(&self, name: &str) -> Option<&Unit> {
        self.units.iter().find(|u| u.name == name)
    }
}
