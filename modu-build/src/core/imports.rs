//! Import reconciliation for the deterministic-engine module.
//!
//! A unit carries at most one named import from [`ENGINE_MODULE`]. Rewritten
//! call sites need their replacement symbols importable from it exactly once,
//! so new symbols are merged into an existing statement or a fresh statement
//! is prepended.

use std::ops::Range;
use std::sync::LazyLock;

use anyhow::{Result, bail};
use regex::Regex;

use crate::core::ENGINE_MODULE;

/// Well-formed `import { ... } from 'modu-engine'` with a single brace group.
static ENGINE_IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r#"\bimport\s*\{{([^{{}};'"]*)\}}\s*from\s*(['"]){}['"][ \t]*;?"#,
        regex::escape(ENGINE_MODULE)
    );
    Regex::new(&pattern).expect("engine import pattern should be valid")
});

/// `from 'modu-engine'` tail of any import statement, well-formed or not.
static ENGINE_FROM_RE: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(r#"\bfrom\s*['"]{}['"]"#, regex::escape(ENGINE_MODULE));
    Regex::new(&pattern).expect("engine from pattern should be valid")
});

static IMPORT_KEYWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bimport\b").expect("import keyword pattern should be valid"));

/// Named import statement for the engine module found in (or built for) a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportBlock {
    pub module_name: String,
    /// Symbols in source order, as written (aliases kept verbatim).
    pub symbols: Vec<String>,
    span: Range<usize>,
    quote: char,
}

impl ImportBlock {
    /// Locate the unit's engine import.
    ///
    /// Returns `Ok(None)` when there is none, and an error when the statement
    /// exists but its symbol list is not a single balanced `{ ... }` group.
    pub fn find(text: &str) -> Result<Option<Self>> {
        if let Some(caps) = ENGINE_IMPORT_RE.captures(text) {
            let (Some(whole), Some(inner), Some(quote)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                return Ok(None);
            };
            return Ok(Some(Self {
                module_name: ENGINE_MODULE.to_string(),
                symbols: split_symbols(inner.as_str()),
                span: whole.range(),
                quote: quote.as_str().chars().next().unwrap_or('\''),
            }));
        }

        if let Some(statement) = malformed_named_import(text) {
            bail!("malformed import from '{ENGINE_MODULE}': unbalanced braces in `{statement}`");
        }
        Ok(None)
    }

    fn synthesized(symbols: &[String]) -> Self {
        Self {
            module_name: ENGINE_MODULE.to_string(),
            symbols: dedup_in_order(symbols.iter().cloned()),
            span: 0..0,
            quote: '\'',
        }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.iter().any(|existing| existing == symbol)
    }

    /// Render as a single-line statement.
    pub fn render(&self) -> String {
        format!(
            "import {{ {} }} from {q}{}{q};",
            self.symbols.join(", "),
            self.module_name,
            q = self.quote
        )
    }
}

/// Symbols already imported from the engine, or none if the import is absent
/// or malformed. Malformed statements are reported by [`reconcile`].
pub fn existing_symbols(text: &str) -> Vec<String> {
    ImportBlock::find(text)
        .ok()
        .flatten()
        .map(|block| block.symbols)
        .unwrap_or_default()
}

/// Make every symbol in `needed` importable from the engine module exactly once.
///
/// With nothing needed the text is returned untouched, even if it holds a
/// malformed engine import.
pub fn reconcile(text: &str, needed: &[String]) -> Result<String> {
    if needed.is_empty() {
        return Ok(text.to_string());
    }

    match ImportBlock::find(text)? {
        Some(mut block) => {
            let merged = block.symbols.iter().chain(needed.iter()).cloned();
            block.symbols = dedup_in_order(merged);

            let rendered = block.render();
            let mut out = String::with_capacity(text.len() + rendered.len());
            out.push_str(&text[..block.span.start]);
            out.push_str(&rendered);
            out.push_str(&text[block.span.end..]);
            Ok(out)
        }
        None => {
            let block = ImportBlock::synthesized(needed);
            Ok(format!("{}\n{text}", block.render()))
        }
    }
}

/// Named engine import whose braces do not form one balanced group.
///
/// Each `from 'modu-engine'` is paired with the nearest `import` before it,
/// so an `import {` mentioned earlier in a comment never joins the statement.
fn malformed_named_import(text: &str) -> Option<&str> {
    ENGINE_FROM_RE.find_iter(text).find_map(|tail| {
        let head = IMPORT_KEYWORD_RE.find_iter(&text[..tail.start()]).last()?;
        let clause = &text[head.end()..tail.start()];
        let named = clause.trim_start().starts_with('{');
        let one_statement = !clause.contains([';', '\'', '"']);
        (named && one_statement).then(|| text[head.start()..tail.end()].trim())
    })
}

fn split_symbols(list: &str) -> Vec<String> {
    let symbols = list
        .split(',')
        .map(str::trim)
        .filter(|symbol| !symbol.is_empty())
        .map(str::to_string);
    dedup_in_order(symbols)
}

fn dedup_in_order(symbols: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for symbol in symbols {
        if !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    out
}
