//! Per-unit transform: gate, rewrite, then reconcile imports.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::core::gate::TransformGate;
use crate::core::imports::reconcile;
use crate::core::rewrite::rewrite;

/// One file handed over by the bundler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUnit {
    pub path: PathBuf,
    pub raw_text: String,
    pub is_eligible: bool,
}

impl SourceUnit {
    pub fn new(path: impl Into<PathBuf>, raw_text: impl Into<String>, gate: &TransformGate) -> Self {
        let path = path.into();
        let is_eligible = gate.is_eligible(&path);
        Self {
            path,
            raw_text: raw_text.into(),
            is_eligible,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub text: String,
    /// Symbols added to the unit's engine import.
    pub added_symbols: Vec<String>,
    pub replacements: usize,
}

impl TransformOutput {
    pub fn changed(&self) -> bool {
        self.replacements > 0
    }
}

/// Transform a unit, or return `None` when the gate excludes it.
pub fn transform_unit(unit: &SourceUnit) -> Result<Option<TransformOutput>> {
    if !unit.is_eligible {
        return Ok(None);
    }
    Ok(Some(transform_text(&unit.raw_text).with_context(
        || format!("transform {}", unit.path.display()),
    )?))
}

/// Rewrite nondeterministic calls and import the replacements.
pub fn transform_text(text: &str) -> Result<TransformOutput> {
    let rewritten = rewrite(text);
    let text = reconcile(&rewritten.text, &rewritten.needed_symbols)?;
    Ok(TransformOutput {
        text,
        added_symbols: rewritten.needed_symbols,
        replacements: rewritten.replacements,
    })
}
