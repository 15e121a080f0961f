//! Deterministic, pure logic shared by the build pipeline.
//!
//! Core modules must be free of I/O side effects. They operate on source text
//! and paths in memory and return deterministic outputs suitable for tests.

pub mod environment;
pub mod gate;
pub mod html;
pub mod imports;
pub mod rewrite;
pub mod transform;

/// Module name the deterministic replacements are imported from.
pub const ENGINE_MODULE: &str = "modu-engine";
