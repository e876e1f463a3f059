//! Units ("starters"): independently validated project subtrees.

use serde::{Deserialize, Serialize};

/// A named, independently buildable project subtree.
///
/// Static configuration: units are loaded once per run and never created or
/// destroyed at runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Unit {
    pub name: String,

    /// Path prefixes (relative to the repository root) owned by this unit.
    pub paths: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Unit {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paths: vec![path.into()],
            enabled: true,
        }
    }

    /// Disable this unit.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Directory the checks run in, relative to the work tree root.
    pub fn working_dir(&self) -> &str {
        self.paths.first().map(String::as_str).unwrap_or(".")
    }

    /// Whether `path` lies under one of this unit's prefixes.
    ///
    /// Matching happens on path-component boundaries: prefix `kit-a` owns
    /// `kit-a/app.tsx` but not `kit-ab/app.tsx`.
    pub fn owns(&self, path: &str) -> bool {
        let path = normalize_path(path);
        self.paths.iter().any(|prefix| {
            let prefix = normalize_path(prefix).trim_end_matches('/');
            if prefix.is_empty() {
                return true;
            }
            path == prefix
                || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
        })
    }
}

/// Strip leading `./` and `/` so paths from different sources compare equal.
pub fn normalize_path(path: &str) -> &str {
    let mut p = path;
    loop {
        if let Some(rest) = p.strip_prefix("./") {
            p = rest;
        } else if let Some(rest) = p.strip_prefix('/') {
            p = rest;
        } else {
            return p;
        }
    }
}
