//! Build orchestration: environment, HTML patch, staging and bundling.
//!
//! A [`Pipeline`] owns everything one invocation needs. [`run`] drives it for
//! the CLI: a single build, or a watch session with an optional dev server.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::core::environment::BuildEnvironment;
use crate::core::gate::TransformGate;
use crate::io::bundler::{BundleRequest, Bundler, CommandBundler};
use crate::io::config::{BuildConfig, ProjectPaths};
use crate::io::html_artifact::patch_html_file;
use crate::io::stage::{StageLayout, stage_paths, stage_tree, unstage, write_virtual_modules};
use crate::plugin::{DeterministicPlugin, EngineModulePlugin, PluginHost, RuntimeBinding};
use crate::serve::DevServer;
use crate::watch::{ChangeSet, WatchContext};

/// CLI mode flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub watch: bool,
    /// Start the dev server; only meaningful with `watch`.
    pub serve: bool,
}

/// Summary of one build or rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub staged: usize,
    pub loaded_by_plugin: usize,
    pub virtual_modules: usize,
    pub outfile: PathBuf,
    pub sourcemap: Option<PathBuf>,
    pub duration: Duration,
}

pub struct Pipeline {
    config: BuildConfig,
    paths: ProjectPaths,
    layout: Arc<StageLayout>,
    host: Arc<PluginHost>,
    bundler: Arc<dyn Bundler>,
    /// Bare specifiers seen in staged sources, kept across watch rebuilds.
    specifiers: BTreeSet<String>,
}

impl Pipeline {
    /// Pipeline backed by the configured bundler command.
    pub fn new(project_dir: &Path, config: BuildConfig) -> Result<Self> {
        let bundler = CommandBundler::new(config.bundler.command.clone())?;
        Self::with_bundler(project_dir, config, Arc::new(bundler))
    }

    pub fn with_bundler(
        project_dir: &Path,
        config: BuildConfig,
        bundler: Arc<dyn Bundler>,
    ) -> Result<Self> {
        config.validate()?;
        let paths = ProjectPaths::new(project_dir, &config);
        if !paths.entry.starts_with(&paths.source_dir) {
            bail!(
                "entry {} must live under source_dir {}",
                paths.entry.display(),
                paths.source_dir.display()
            );
        }
        if paths.stage_dir.starts_with(&paths.source_dir) {
            bail!(
                "stage_dir {} must not live under source_dir {}",
                paths.stage_dir.display(),
                paths.source_dir.display()
            );
        }

        let host = plugin_host(&config, &paths.root)?;
        info!(plugins = ?host.plugin_names(), "registered bundler plugins");
        Ok(Self {
            layout: Arc::new(StageLayout::new(&paths.source_dir, &paths.stage_dir)),
            host: Arc::new(host),
            config,
            paths,
            bundler,
            specifiers: BTreeSet::new(),
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    /// Read the CI signals from the process environment.
    pub fn detect_environment(&self) -> BuildEnvironment {
        let engine = &self.config.engine;
        BuildEnvironment::detect(
            &engine.ci_env_vars,
            &engine.local_url,
            &engine.cdn_url,
            Utc::now(),
            |name| std::env::var(name).ok(),
        )
    }

    pub fn patch_html(&self, environment: &BuildEnvironment) -> Result<bool> {
        patch_html_file(&self.paths.html_path, environment)
    }

    /// Stage the whole source tree and bundle it.
    #[instrument(skip_all)]
    pub async fn build_once(&mut self) -> Result<BuildReport> {
        let started = Instant::now();
        let report = stage_tree(self.layout.clone(), self.host.clone()).await?;
        self.specifiers = report.bare_specifiers();
        self.bundle(report.files.len(), report.loaded_by_plugin(), started)
            .await
    }

    /// Re-stage only `changes` and bundle again.
    #[instrument(skip_all, fields(modified = changes.modified.len(), removed = changes.removed.len()))]
    pub async fn rebuild(&mut self, changes: &ChangeSet) -> Result<BuildReport> {
        let started = Instant::now();
        for removed in &changes.removed {
            unstage(&self.layout, removed)?;
        }
        let report = stage_paths(
            self.layout.clone(),
            self.host.clone(),
            changes.modified.clone(),
        )
        .await?;
        self.specifiers.extend(report.bare_specifiers());
        self.bundle(report.files.len(), report.loaded_by_plugin(), started)
            .await
    }

    async fn bundle(
        &self,
        staged: usize,
        loaded_by_plugin: usize,
        started: Instant,
    ) -> Result<BuildReport> {
        let aliases = write_virtual_modules(&self.layout, &self.host, &self.specifiers)?;
        let virtual_modules = aliases.len();
        let request = BundleRequest {
            workdir: self.paths.stage_dir.clone(),
            entry: self
                .paths
                .entry
                .strip_prefix(&self.paths.source_dir)
                .context("entry outside source_dir")?
                .to_path_buf(),
            outfile: self.paths.out_file.clone(),
            global_name: self.config.global_name.clone(),
            minify: self.config.minify,
            sourcemap: self.config.sourcemap,
            aliases,
            timeout: self.config.bundler_timeout(),
            output_limit_bytes: self.config.bundler.output_limit_bytes,
        };

        let bundler = self.bundler.clone();
        let output = tokio::task::spawn_blocking(move || bundler.bundle(&request))
            .await
            .context("bundler task panicked")??;

        let report = BuildReport {
            staged,
            loaded_by_plugin,
            virtual_modules,
            outfile: output.outfile,
            sourcemap: output.sourcemap,
            duration: started.elapsed(),
        };
        info!(
            staged = report.staged,
            transformed = report.loaded_by_plugin,
            virtual_modules = report.virtual_modules,
            outfile = %report.outfile.display(),
            duration_ms = report.duration.as_millis() as u64,
            "build complete"
        );
        Ok(report)
    }
}

fn plugin_host(config: &BuildConfig, root: &Path) -> Result<PluginHost> {
    let gate = TransformGate::new(config.transform.excluded_dirs.iter().cloned());
    let binding = RuntimeBinding::new(config.engine.runtime_global.clone())?;

    let mut host = PluginHost::new();
    host.register(DeterministicPlugin::new(gate, &config.transform.load_filter)?.with_root(root));
    host.register(EngineModulePlugin::new(binding)?);
    Ok(host)
}

/// Run one CLI invocation to completion.
///
/// Without `watch` this is a single build. With it, the process keeps
/// rebuilding on change (and serving, with `serve`) until Ctrl-C.
pub async fn run(options: RunOptions, project_dir: &Path, config: BuildConfig) -> Result<()> {
    let mut pipeline = Pipeline::new(project_dir, config)?;
    let environment = pipeline.detect_environment();
    pipeline.patch_html(&environment)?;
    pipeline.build_once().await?;

    if !options.watch {
        return Ok(());
    }

    let serve_config = pipeline.config().serve.clone();
    let serve_root = pipeline.paths().serve_root.clone();
    let (events, _) = broadcast::channel(16);

    let watch = WatchContext::start(pipeline, events.clone())?;
    let server = if options.serve {
        match DevServer::start(&serve_config, serve_root, events.clone()).await {
            Ok(server) => Some(server),
            Err(err) => {
                watch.dispose().await?;
                return Err(err);
            }
        }
    } else {
        None
    };

    info!("watching for changes, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listen for Ctrl-C")?;
    info!("stopping");

    if let Some(server) = server {
        server.stop().await?;
    }
    watch.dispose().await
}
