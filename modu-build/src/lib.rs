//! Build-time transform pipeline for deterministic Modu games.
//!
//! Game sources are rewritten so nondeterministic `Math.sqrt` / `Math.random`
//! calls go through the engine's deterministic helpers, the `modu-engine`
//! import is reconciled, and the result is bundled into a single IIFE.
//!
//! - **[`core`]**: Pure text transforms (rewriting, import reconciliation,
//!   gating, environment URL selection, HTML patching). No I/O.
//! - **[`plugin`]**: Resolve/load hooks that expose the transforms and the
//!   virtual `modu-engine` module to the bundling step.
//! - **[`io`]**: Config, staging, the external bundler, processes and ports.
//!
//! [`pipeline`] drives one build; [`watch`] and [`serve`] add the incremental
//! rebuild loop and the dev server.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod plugin;
pub mod serve;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod watch;
