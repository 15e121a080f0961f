//! Build environment detection.

use chrono::{DateTime, Utc};

/// Engine endpoints and the environment that picks between them.
///
/// Computed once per invocation and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvironment {
    pub is_continuous_integration: bool,
    pub local_engine_url: String,
    /// CDN URL including the cache-busting parameter.
    pub cdn_engine_url: String,
}

impl BuildEnvironment {
    /// Detect the environment from `lookup`, which maps a variable name to its value.
    ///
    /// Any of `ci_env_vars` set to a non-empty value selects the CDN.
    pub fn detect<F>(
        ci_env_vars: &[String],
        local_engine_url: &str,
        cdn_base_url: &str,
        now: DateTime<Utc>,
        lookup: F,
    ) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let is_continuous_integration = ci_env_vars
            .iter()
            .any(|name| lookup(name).is_some_and(|value| !value.is_empty()));
        Self {
            is_continuous_integration,
            local_engine_url: local_engine_url.to_string(),
            cdn_engine_url: cache_busted(cdn_base_url, now),
        }
    }

    /// URL the HTML artifact should load the engine from.
    pub fn engine_url(&self) -> &str {
        if self.is_continuous_integration {
            &self.cdn_engine_url
        } else {
            &self.local_engine_url
        }
    }

    /// CDN URL without its query string.
    pub fn cdn_base_url(&self) -> &str {
        self.cdn_engine_url
            .split_once('?')
            .map_or(self.cdn_engine_url.as_str(), |(base, _)| base)
    }
}

/// Append `v=<epoch millis>` to `base`.
pub fn cache_busted(base: &str, now: DateTime<Utc>) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}v={}", now.timestamp_millis())
}
