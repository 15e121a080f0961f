//! Eligibility check deciding which loaded files get rewritten.

use std::path::Path;

/// Excludes vendored dependency trees and the engine's own sources.
///
/// Matching is substring containment on the path text, so
/// `web/node_modules/pkg/index.js` is excluded by `node_modules`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformGate {
    excluded: Vec<String>,
}

impl TransformGate {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            excluded: excluded.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_eligible(&self, path: &Path) -> bool {
        let text = path.to_string_lossy();
        !self
            .excluded
            .iter()
            .any(|fragment| text.contains(fragment.as_str()))
    }
}

impl Default for TransformGate {
    fn default() -> Self {
        Self::new(["node_modules", crate::core::ENGINE_MODULE])
    }
}
