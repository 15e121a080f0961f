//! Bundler hook contract and the plugins this tool registers.
//!
//! The shape follows the usual bundler plugin API: `on_resolve` hooks map an
//! import specifier to a path in some namespace, `on_load` hooks produce the
//! contents for a path in a namespace. Each hook is guarded by a
//! [`HookFilter`]; the [`PluginHost`] does the filtering and calls hooks in
//! registration order until one answers.

pub mod deterministic;
pub mod engine_module;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::debug;

pub use deterministic::DeterministicPlugin;
pub use engine_module::{EngineModulePlugin, RuntimeBinding, VIRTUAL_NAMESPACE};

/// Namespace of ordinary files on disk.
pub const FILE_NAMESPACE: &str = "file";

/// How the bundler should parse loaded contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loader {
    Js,
    Jsx,
    Ts,
    Tsx,
}

impl Loader {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str())? {
            "js" | "mjs" | "cjs" => Some(Loader::Js),
            "jsx" => Some(Loader::Jsx),
            "ts" | "mts" | "cts" => Some(Loader::Ts),
            "tsx" => Some(Loader::Tsx),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Loader::Js => "js",
            Loader::Jsx => "jsx",
            Loader::Ts => "ts",
            Loader::Tsx => "tsx",
        }
    }
}

/// Path pattern plus optional namespace a hook is registered for.
#[derive(Debug, Clone)]
pub struct HookFilter {
    pub pattern: Regex,
    pub namespace: Option<String>,
}

impl HookFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern =
            Regex::new(pattern).with_context(|| format!("compile hook filter {pattern}"))?;
        Ok(Self {
            pattern,
            namespace: None,
        })
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn matches(&self, path: &str, namespace: &str) -> bool {
        self.namespace.as_deref().is_none_or(|ns| ns == namespace) && self.pattern.is_match(path)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolveArgs<'a> {
    /// Specifier as written in the import statement.
    pub specifier: &'a str,
    pub importer: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRef {
    pub path: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy)]
pub struct LoadArgs<'a> {
    pub path: &'a str,
    pub namespace: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadResult {
    pub contents: String,
    pub loader: Loader,
}

/// A set of resolve/load hooks. Returning `Ok(None)` declines and lets the
/// next plugin (or the bundler's default behaviour) handle the request.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn resolve_filter(&self) -> Option<&HookFilter> {
        None
    }

    fn load_filter(&self) -> Option<&HookFilter> {
        None
    }

    fn on_resolve(&self, _args: &ResolveArgs<'_>) -> Result<Option<ResolvedRef>> {
        Ok(None)
    }

    fn on_load(&self, _args: &LoadArgs<'_>) -> Result<Option<LoadResult>> {
        Ok(None)
    }
}

/// Ordered plugin registry that dispatches hooks through their filters.
#[derive(Clone, Default)]
pub struct PluginHost {
    plugins: Vec<Arc<dyn Plugin>>,
}

impl PluginHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: impl Plugin + 'static) {
        self.plugins.push(Arc::new(plugin));
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|plugin| plugin.name()).collect()
    }

    /// Resolve `specifier`; `None` means default resolution applies.
    pub fn resolve(&self, specifier: &str, importer: Option<&Path>) -> Result<Option<ResolvedRef>> {
        let args = ResolveArgs {
            specifier,
            importer,
        };
        let importer_namespace = FILE_NAMESPACE;
        for plugin in &self.plugins {
            let Some(filter) = plugin.resolve_filter() else {
                continue;
            };
            if !filter.matches(specifier, importer_namespace) {
                continue;
            }
            if let Some(resolved) = plugin
                .on_resolve(&args)
                .with_context(|| format!("plugin {} resolving {specifier}", plugin.name()))?
            {
                debug!(
                    plugin = plugin.name(),
                    specifier,
                    namespace = %resolved.namespace,
                    "resolved by plugin"
                );
                return Ok(Some(resolved));
            }
        }
        Ok(None)
    }

    /// Load `path` in `namespace`; `None` means default loading applies.
    pub fn load(&self, path: &str, namespace: &str) -> Result<Option<LoadResult>> {
        let args = LoadArgs { path, namespace };
        for plugin in &self.plugins {
            let Some(filter) = plugin.load_filter() else {
                continue;
            };
            if !filter.matches(path, namespace) {
                continue;
            }
            if let Some(loaded) = plugin
                .on_load(&args)
                .with_context(|| format!("plugin {} loading {namespace}:{path}", plugin.name()))?
            {
                debug!(plugin = plugin.name(), path, namespace, "loaded by plugin");
                return Ok(Some(loaded));
            }
        }
        Ok(None)
    }
}
