//! `on_load` hook that rewrites nondeterministic calls in game sources.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use super::{FILE_NAMESPACE, HookFilter, LoadArgs, LoadResult, Loader, Plugin};
use crate::core::gate::TransformGate;
use crate::core::transform::{SourceUnit, transform_unit};

pub struct DeterministicPlugin {
    gate: TransformGate,
    filter: HookFilter,
    root: Option<PathBuf>,
}

impl DeterministicPlugin {
    /// `load_filter` selects candidate files by path (e.g. `\.(js|ts)$`).
    pub fn new(gate: TransformGate, load_filter: &str) -> Result<Self> {
        Ok(Self {
            gate,
            filter: HookFilter::new(load_filter)?.in_namespace(FILE_NAMESPACE),
            root: None,
        })
    }

    /// Gate paths relative to `root`, so directories above the project
    /// never trigger an exclusion.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    fn gated_path<'a>(&self, path: &'a Path) -> &'a Path {
        self.root
            .as_deref()
            .and_then(|root| path.strip_prefix(root).ok())
            .unwrap_or(path)
    }
}

impl Plugin for DeterministicPlugin {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn load_filter(&self) -> Option<&HookFilter> {
        Some(&self.filter)
    }

    fn on_load(&self, args: &LoadArgs<'_>) -> Result<Option<LoadResult>> {
        let path = Path::new(args.path);
        let gated = self.gated_path(path);
        if !self.gate.is_eligible(gated) {
            debug!(path = args.path, "excluded from deterministic transform");
            return Ok(None);
        }

        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        let Ok(raw) = String::from_utf8(bytes) else {
            debug!(path = args.path, "not valid UTF-8, left untransformed");
            return Ok(None);
        };
        let unit = SourceUnit::new(gated, raw, &self.gate);
        let Some(output) = transform_unit(&unit)? else {
            return Ok(None);
        };
        if output.changed() {
            debug!(
                path = args.path,
                replacements = output.replacements,
                added = ?output.added_symbols,
                "rewrote nondeterministic calls"
            );
        }

        Ok(Some(LoadResult {
            contents: output.text,
            loader: Loader::from_path(path).unwrap_or(Loader::Js),
        }))
    }
}
