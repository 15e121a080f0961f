//! Build configuration stored in `modu-build.toml` at the project root.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CONFIG_FILE_NAME: &str = "modu-build.toml";

/// Build configuration (TOML).
///
/// Every field has a default, so a project without a config file builds
/// `src/game.js` into `dist/`. Relative paths are resolved against the
/// project directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BuildConfig {
    /// Single entry point compiled into the bundle.
    pub entry: PathBuf,

    /// Source tree that is staged for the bundler and watched.
    pub source_dir: PathBuf,

    /// Bundle output; the source map is written next to it.
    pub out_file: PathBuf,

    /// HTML entry artifact whose engine reference is patched in place.
    pub html_path: PathBuf,

    /// Scratch directory holding transformed sources and virtual modules.
    pub stage_dir: PathBuf,

    /// Global the self-executing bundle assigns its exports to.
    pub global_name: String,

    pub minify: bool,
    pub sourcemap: bool,

    pub transform: TransformConfig,
    pub engine: EngineConfig,
    pub bundler: BundlerConfig,
    pub serve: ServeConfig,
    pub watch: WatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TransformConfig {
    /// Regex selecting files the deterministic transform is offered.
    pub load_filter: String,

    /// Path fragments marking vendored or engine code that is never rewritten.
    pub excluded_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Expression the `modu-engine` virtual module re-exports at runtime.
    pub runtime_global: String,

    /// Engine script served by a local engine dev server.
    pub local_url: String,

    /// Published engine script; a cache-busting parameter is appended per build.
    pub cdn_url: String,

    /// Environment variables whose presence marks a CI build.
    pub ci_env_vars: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BundlerConfig {
    /// esbuild-compatible command line (e.g. `["npx","esbuild"]`).
    pub command: Vec<String>,

    /// Wall-clock budget for one bundler run in seconds.
    pub timeout_secs: u64,

    /// Truncate captured bundler stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served statically.
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchConfig {
    pub poll_interval_ms: u64,
    /// Changes arriving within this window are rebuilt together.
    pub debounce_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("src/game.js"),
            source_dir: PathBuf::from("src"),
            out_file: PathBuf::from("dist/game.js"),
            html_path: PathBuf::from("dist/index.html"),
            stage_dir: PathBuf::from(".modu-build/stage"),
            global_name: "Game".to_string(),
            minify: true,
            sourcemap: true,
            transform: TransformConfig::default(),
            engine: EngineConfig::default(),
            bundler: BundlerConfig::default(),
            serve: ServeConfig::default(),
            watch: WatchConfig::default(),
        }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            load_filter: r"\.(m?js|jsx|ts|tsx)$".to_string(),
            excluded_dirs: vec!["node_modules".to_string(), "modu-engine".to_string()],
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runtime_global: "window.Modu".to_string(),
            local_url: "http://localhost:3001/dist/modu.iife.js".to_string(),
            cdn_url: "https://cdn.moduengine.com/modu.min.js".to_string(),
            ci_env_vars: vec!["CI".to_string(), "GITHUB_ACTIONS".to_string()],
        }
    }
}

impl Default for BundlerConfig {
    fn default() -> Self {
        Self {
            command: vec!["esbuild".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8080,
            root: PathBuf::from("dist"),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            debounce_ms: 100,
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, path) in [
            ("entry", &self.entry),
            ("source_dir", &self.source_dir),
            ("out_file", &self.out_file),
            ("html_path", &self.html_path),
            ("stage_dir", &self.stage_dir),
        ] {
            if path.as_os_str().is_empty() {
                return Err(anyhow!("{name} must not be empty"));
            }
        }
        if !is_js_identifier(&self.global_name) {
            return Err(anyhow!(
                "global_name must be a JavaScript identifier, got {:?}",
                self.global_name
            ));
        }
        Regex::new(&self.transform.load_filter).context("transform.load_filter")?;
        if self.transform.excluded_dirs.iter().any(|d| d.is_empty()) {
            return Err(anyhow!("transform.excluded_dirs must not contain empty entries"));
        }
        if self.engine.runtime_global.trim().is_empty() {
            return Err(anyhow!("engine.runtime_global must not be empty"));
        }
        if self.engine.local_url.is_empty() || self.engine.cdn_url.is_empty() {
            return Err(anyhow!("engine.local_url and engine.cdn_url must be set"));
        }
        if self.engine.ci_env_vars.iter().any(|v| v.trim().is_empty()) {
            return Err(anyhow!("engine.ci_env_vars must not contain empty names"));
        }
        if self.bundler.command.is_empty() || self.bundler.command[0].trim().is_empty() {
            return Err(anyhow!("bundler.command must be a non-empty array"));
        }
        if self.bundler.timeout_secs == 0 {
            return Err(anyhow!("bundler.timeout_secs must be > 0"));
        }
        if self.bundler.output_limit_bytes == 0 {
            return Err(anyhow!("bundler.output_limit_bytes must be > 0"));
        }
        if self.serve.port == 0 {
            return Err(anyhow!("serve.port must be > 0"));
        }
        if self.watch.poll_interval_ms == 0 || self.watch.debounce_ms == 0 {
            return Err(anyhow!("watch intervals must be > 0"));
        }
        Ok(())
    }

    pub fn bundler_timeout(&self) -> Duration {
        Duration::from_secs(self.bundler.timeout_secs)
    }
}

/// Paths from a [`BuildConfig`] resolved against the project directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectPaths {
    pub root: PathBuf,
    pub entry: PathBuf,
    pub source_dir: PathBuf,
    pub out_file: PathBuf,
    pub html_path: PathBuf,
    pub stage_dir: PathBuf,
    pub serve_root: PathBuf,
}

impl ProjectPaths {
    pub fn new(root: impl Into<PathBuf>, config: &BuildConfig) -> Self {
        let root = root.into();
        Self {
            entry: root.join(&config.entry),
            source_dir: root.join(&config.source_dir),
            out_file: root.join(&config.out_file),
            html_path: root.join(&config.html_path),
            stage_dir: root.join(&config.stage_dir),
            serve_root: root.join(&config.serve.root),
            root,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `BuildConfig::default()`.
pub fn load_config(path: &Path) -> Result<BuildConfig> {
    if !path.exists() {
        let cfg = BuildConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: BuildConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

fn is_js_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, BuildConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(
            &path,
            "entry = \"src/main.ts\"\n[serve]\nport = 9000\n[engine]\nruntime_global = \"globalThis.Modu\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.entry, PathBuf::from("src/main.ts"));
        assert_eq!(cfg.serve.port, 9000);
        assert_eq!(cfg.serve.bind, "127.0.0.1");
        assert_eq!(cfg.engine.runtime_global, "globalThis.Modu");
        assert_eq!(cfg.engine.ci_env_vars, vec!["CI", "GITHUB_ACTIONS"]);
        assert_eq!(cfg.bundler, BundlerConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "global_name = \"my-game\"\n").expect("write");
        let err = load_config(&path).expect_err("invalid");
        assert!(format!("{err:#}").contains("global_name"));

        fs::write(&path, "[bundler]\ncommand = []\n").expect("write");
        assert!(load_config(&path).is_err());

        fs::write(&path, "[transform]\nload_filter = \"(\"\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn unparsable_file_names_the_path() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(CONFIG_FILE_NAME);
        fs::write(&path, "entry = [").expect("write");
        let err = load_config(&path).expect_err("parse error");
        assert!(format!("{err:#}").contains(CONFIG_FILE_NAME));
    }

    #[test]
    fn paths_resolve_against_root() {
        let paths = ProjectPaths::new("/work/pong", &BuildConfig::default());
        assert_eq!(paths.entry, PathBuf::from("/work/pong/src/game.js"));
        assert_eq!(paths.html_path, PathBuf::from("/work/pong/dist/index.html"));
        assert_eq!(paths.serve_root, PathBuf::from("/work/pong/dist"));
    }

    #[test]
    fn identifier_check() {
        assert!(is_js_identifier("Game"));
        assert!(is_js_identifier("$game_2"));
        assert!(!is_js_identifier("2game"));
        assert!(!is_js_identifier(""));
    }
}
