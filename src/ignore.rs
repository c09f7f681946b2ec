//! Ignore matching over path components
//!
//! A path is ignored when any of its components matches any pattern. Patterns
//! are shell globs (`*`, `?`, `[...]`) applied to single components, so `.git`
//! hides everything below a `.git` directory and `*.pyc` hides compiled files
//! wherever they live.

use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};
use tracing::warn;

/// Patterns that are always ignored on top of the configured ones
pub const FIXED_PATTERNS: &[&str] = &[
    "*.exe", "*.dll", "*.so", "*.dylib", "*.psd", "*.db", "*.usr", ".projindex",
];

#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    patterns: Vec<Pattern>,
    options: MatchOptions,
}

impl IgnoreMatcher {
    /// Build a matcher from user patterns plus [`FIXED_PATTERNS`].
    /// Invalid patterns are logged and skipped.
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        let compiled = patterns
            .iter()
            .map(AsRef::as_ref)
            .chain(FIXED_PATTERNS.iter().copied())
            .filter(|p| !p.is_empty())
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Skipping invalid ignore pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            patterns: compiled,
            options: MatchOptions {
                // Case-insensitive filesystems fold case
                case_sensitive: !cfg!(any(windows, target_os = "macos")),
                require_literal_separator: true,
                require_literal_leading_dot: false,
            },
        }
    }

    /// True if any non-empty component of `path` matches a pattern.
    pub fn is_ignored(&self, path: &Path) -> bool {
        path.components().any(|component| match component {
            Component::Normal(part) => {
                let part = part.to_string_lossy();
                !part.is_empty() && self.matches(&part)
            }
            _ => false,
        })
    }

    fn matches(&self, component: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(component, self.options))
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

impl Default for IgnoreMatcher {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}
