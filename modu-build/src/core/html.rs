//! Engine URL substitution for the HTML entry artifact.

use anyhow::{Context, Result};
use regex::{NoExpand, Regex};

use crate::core::environment::BuildEnvironment;

/// Point the artifact's engine reference at `environment.engine_url()`.
///
/// The local URL is replaced literally, then any CDN URL for the engine is
/// replaced whatever its query string. Either form may be present, and a
/// second run with the same environment changes nothing.
pub fn patch(html: &str, environment: &BuildEnvironment) -> Result<String> {
    let engine_url = environment.engine_url();
    let patched = html.replace(&environment.local_engine_url, engine_url);

    let cdn_pattern = format!(
        r#"{}(?:\?[^"'\s<>]*)?"#,
        regex::escape(environment.cdn_base_url())
    );
    let cdn_re = Regex::new(&cdn_pattern)
        .with_context(|| format!("compile CDN pattern for {}", environment.cdn_base_url()))?;
    Ok(cdn_re.replace_all(&patched, NoExpand(engine_url)).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOCAL: &str = "http://localhost:3001/dist/modu.iife.js";

    fn env(ci: bool) -> BuildEnvironment {
        BuildEnvironment {
            is_continuous_integration: ci,
            local_engine_url: LOCAL.to_string(),
            cdn_engine_url: "https://cdn.moduengine.com/modu.min.js?v=42".to_string(),
        }
    }

    fn page(src: &str) -> String {
        format!("<html><head><script src=\"{src}\"></script></head></html>\n")
    }

    #[test]
    fn local_environment_keeps_local_url() {
        let out = patch(&page(LOCAL), &env(false)).expect("patch");
        assert_eq!(out, page(LOCAL));
    }

    #[test]
    fn local_environment_replaces_stale_cdn_url() {
        let html = page("https://cdn.moduengine.com/modu.min.js?v=1699999999999");
        let out = patch(&html, &env(false)).expect("patch");
        assert_eq!(out, page(LOCAL));
    }

    #[test]
    fn ci_environment_swaps_local_for_cdn() {
        let out = patch(&page(LOCAL), &env(true)).expect("patch");
        assert_eq!(out, page("https://cdn.moduengine.com/modu.min.js?v=42"));
        assert!(!out.contains(LOCAL));
    }

    #[test]
    fn ci_environment_refreshes_cache_bust() {
        let html = page("https://cdn.moduengine.com/modu.min.js?v=7");
        let out = patch(&html, &env(true)).expect("patch");
        assert_eq!(out, page("https://cdn.moduengine.com/modu.min.js?v=42"));
    }

    #[test]
    fn bare_cdn_url_is_matched() {
        let html = page("https://cdn.moduengine.com/modu.min.js");
        let out = patch(&html, &env(false)).expect("patch");
        assert_eq!(out, page(LOCAL));
    }

    #[test]
    fn patch_is_idempotent() {
        for ci in [false, true] {
            let once = patch(&page(LOCAL), &env(ci)).expect("first");
            let twice = patch(&once, &env(ci)).expect("second");
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn unrelated_html_is_unchanged() {
        let html = "<html><script src=\"game.js\"></script></html>";
        assert_eq!(patch(html, &env(true)).expect("patch"), html);
    }
}
