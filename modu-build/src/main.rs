//! `modu-build`: transform, bundle and optionally serve a Modu game.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use modu_build::exit_codes;
use modu_build::io::config::{CONFIG_FILE_NAME, load_config};
use modu_build::logging;
use modu_build::pipeline::{self, RunOptions};

#[derive(Parser, Debug)]
#[command(
    name = "modu-build",
    version,
    about = "Bundle a Modu game with deterministic math rewrites"
)]
struct Cli {
    /// Keep running and rebuild when sources change.
    #[arg(long)]
    watch: bool,
    /// Serve the output directory with live reload (requires --watch).
    #[arg(long, requires = "watch")]
    serve: bool,
    /// Project root containing the game sources and HTML artifact.
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,
    /// Config file; defaults to `modu-build.toml` in the project root.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    logging::init();
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::FAILED);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let project_dir = cli
        .project_dir
        .canonicalize()
        .with_context(|| format!("resolve project dir {}", cli.project_dir.display()))?;
    let config_path = config_path(&project_dir, cli.config.as_deref());
    let config = load_config(&config_path)?;

    let options = RunOptions {
        watch: cli.watch,
        serve: cli.serve,
    };
    pipeline::run(options, &project_dir, config).await
}

fn config_path(project_dir: &Path, explicit: Option<&Path>) -> PathBuf {
    match explicit {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => project_dir.join(path),
        None => project_dir.join(CONFIG_FILE_NAME),
    }
}
