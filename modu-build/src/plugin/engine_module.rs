//! Virtual module that binds the engine import to a host-provided runtime value.
//!
//! The engine is loaded out-of-band by the page, so `import ... from
//! 'modu-engine'` must not resolve to a file. It resolves into
//! [`VIRTUAL_NAMESPACE`] instead, and loading any path there yields a module
//! whose exports are the injected [`RuntimeBinding`]. Whether that binding
//! exists is only known when the bundle runs.

use anyhow::{Result, bail};

use super::{HookFilter, LoadArgs, LoadResult, Loader, Plugin, ResolveArgs, ResolvedRef};
use crate::core::ENGINE_MODULE;

pub const VIRTUAL_NAMESPACE: &str = "modu-engine-runtime";

/// Expression evaluated at runtime to obtain the engine, e.g. `window.Modu`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeBinding {
    expression: String,
}

impl RuntimeBinding {
    pub fn new(expression: impl Into<String>) -> Result<Self> {
        let expression = expression.into();
        if expression.trim().is_empty() {
            bail!("runtime binding expression must not be empty");
        }
        Ok(Self { expression })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Module source re-exporting the binding.
    pub fn module_source(&self) -> String {
        format!("module.exports = {};\n", self.expression.trim())
    }
}

pub struct EngineModulePlugin {
    binding: RuntimeBinding,
    resolve_filter: HookFilter,
    load_filter: HookFilter,
}

impl EngineModulePlugin {
    pub fn new(binding: RuntimeBinding) -> Result<Self> {
        let exact = format!("^{}$", regex::escape(ENGINE_MODULE));
        Ok(Self {
            binding,
            resolve_filter: HookFilter::new(&exact)?,
            load_filter: HookFilter::new(".*")?.in_namespace(VIRTUAL_NAMESPACE),
        })
    }
}

impl Plugin for EngineModulePlugin {
    fn name(&self) -> &'static str {
        "engine-module"
    }

    fn resolve_filter(&self) -> Option<&HookFilter> {
        Some(&self.resolve_filter)
    }

    fn load_filter(&self) -> Option<&HookFilter> {
        Some(&self.load_filter)
    }

    fn on_resolve(&self, args: &ResolveArgs<'_>) -> Result<Option<ResolvedRef>> {
        if args.specifier != ENGINE_MODULE {
            return Ok(None);
        }
        Ok(Some(ResolvedRef {
            path: args.specifier.to_string(),
            namespace: VIRTUAL_NAMESPACE.to_string(),
        }))
    }

    fn on_load(&self, _args: &LoadArgs<'_>) -> Result<Option<LoadResult>> {
        Ok(Some(LoadResult {
            contents: self.binding.module_source(),
            loader: Loader::Js,
        }))
    }
}
