//! I/O helpers for the build pipeline.

pub mod bundler;
pub mod config;
pub mod html_artifact;
pub mod port;
pub mod process;
pub mod stage;
