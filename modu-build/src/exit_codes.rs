//! Stable exit codes for the `modu-build` CLI.

/// Build finished, or a watch session was stopped with Ctrl-C.
pub const OK: i32 = 0;
/// Config, transform, bundler, HTML or server setup failed.
pub const FAILED: i32 = 1;
