//! Textual rewriting of nondeterministic `Math` calls.
//!
//! Matching is lexical: call heads are found with regular expressions and
//! replaced in place, so argument expressions are never re-emitted and nested
//! calls such as `Math.sqrt(Math.sqrt(x))` are handled without a parser.
//! Occurrences inside strings or comments are rewritten too.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::imports::existing_symbols;

static SQRT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bMath\s*\.\s*sqrt\s*\(").expect("sqrt pattern should be valid")
});

static RANDOM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bMath\s*\.\s*random\s*\(\s*\)").expect("random pattern should be valid")
});

/// Nondeterministic call shapes and their deterministic replacements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// `Math.sqrt(<expr>)` -> `dSqrt(<expr>)`
    Sqrt,
    /// `Math.random()` -> `dRandom()`
    Random,
}

impl CallKind {
    pub const ALL: [CallKind; 2] = [CallKind::Sqrt, CallKind::Random];

    /// Engine symbol the replacement calls.
    pub fn symbol(self) -> &'static str {
        match self {
            CallKind::Sqrt => "dSqrt",
            CallKind::Random => "dRandom",
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            CallKind::Sqrt => &SQRT_RE,
            CallKind::Random => &RANDOM_RE,
        }
    }

    /// Text substituted for the matched call head.
    fn replacement(self) -> &'static str {
        match self {
            CallKind::Sqrt => "dSqrt(",
            CallKind::Random => "dRandom()",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteResult {
    pub text: String,
    /// Replacement symbols the unit does not import yet, in [`CallKind::ALL`] order.
    pub needed_symbols: Vec<String>,
    /// Number of call sites rewritten.
    pub replacements: usize,
}

/// Replace every nondeterministic call in `text`.
///
/// A kind's symbol is reported as needed only if at least one call of that
/// kind was rewritten and the unit's engine import does not list it already.
pub fn rewrite(text: &str) -> RewriteResult {
    let imported = existing_symbols(text);
    let mut current = text.to_string();
    let mut needed_symbols = Vec::new();
    let mut replacements = 0;

    for kind in CallKind::ALL {
        let (next, count) = replace_calls(&current, kind);
        if count == 0 {
            continue;
        }
        current = next;
        replacements += count;
        if !imported.iter().any(|symbol| symbol == kind.symbol()) {
            needed_symbols.push(kind.symbol().to_string());
        }
    }

    RewriteResult {
        text: current,
        needed_symbols,
        replacements,
    }
}

fn replace_calls(text: &str, kind: CallKind) -> (String, usize) {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut count = 0;

    for found in kind.pattern().find_iter(text) {
        // `obj.Math.sqrt(...)` and `$Math.sqrt(...)` are not the global object.
        if matches!(text[..found.start()].chars().next_back(), Some('.' | '$')) {
            continue;
        }
        out.push_str(&text[last..found.start()]);
        out.push_str(kind.replacement());
        last = found.end();
        count += 1;
    }

    if count == 0 {
        return (text.to_string(), 0);
    }
    out.push_str(&text[last..]);
    (out, count)
}
