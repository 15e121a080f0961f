//! Read-modify-write of the HTML entry artifact.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::environment::BuildEnvironment;
use crate::core::html::patch;

/// Patch the engine URL in the HTML file at `path`.
///
/// A missing artifact is an error; the build cannot produce a usable page
/// without it. Returns whether the file content changed.
pub fn patch_html_file(path: &Path, environment: &BuildEnvironment) -> Result<bool> {
    let html = fs::read_to_string(path)
        .with_context(|| format!("read HTML artifact {}", path.display()))?;
    let patched = patch(&html, environment)?;
    fs::write(path, &patched).with_context(|| format!("write HTML artifact {}", path.display()))?;

    let changed = patched != html;
    info!(
        path = %path.display(),
        engine_url = environment.engine_url(),
        ci = environment.is_continuous_integration,
        changed,
        "patched engine URL"
    );
    Ok(changed)
}
