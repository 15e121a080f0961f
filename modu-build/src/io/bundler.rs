//! External bundler backend.
//!
//! The [`Bundler`] trait decouples the pipeline from the actual bundler.
//! [`CommandBundler`] drives an esbuild-compatible CLI over the staged tree;
//! tests use fakes that never spawn a process.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command_with_timeout;
use crate::io::stage::ModuleAlias;

/// Parameters for one bundler run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleRequest {
    /// Stage root; the bundler runs with this as its working directory.
    pub workdir: PathBuf,
    /// Entry point relative to `workdir`.
    pub entry: PathBuf,
    /// Absolute bundle path.
    pub outfile: PathBuf,
    /// Global namespace symbol of the self-executing bundle.
    pub global_name: String,
    pub minify: bool,
    pub sourcemap: bool,
    pub aliases: Vec<ModuleAlias>,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

impl BundleRequest {
    pub fn sourcemap_path(&self) -> Option<PathBuf> {
        self.sourcemap.then(|| {
            let mut path = self.outfile.clone().into_os_string();
            path.push(".map");
            PathBuf::from(path)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleOutput {
    pub outfile: PathBuf,
    pub sourcemap: Option<PathBuf>,
    /// Diagnostics the bundler printed on success.
    pub warnings: String,
}

/// Abstraction over bundler backends.
pub trait Bundler: Send + Sync {
    /// Bundle `request.entry` into `request.outfile`.
    fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput>;
}

/// Bundler that spawns an esbuild-compatible command line.
pub struct CommandBundler {
    command: Vec<String>,
}

impl CommandBundler {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.first().is_none_or(|program| program.trim().is_empty()) {
            bail!("bundler command must not be empty");
        }
        Ok(Self { command })
    }

    /// Full argument vector (program first) for `request`.
    pub fn command_line(&self, request: &BundleRequest) -> Vec<String> {
        let mut args = self.command.clone();
        args.push(request.entry.to_string_lossy().into_owned());
        args.push("--bundle".to_string());
        args.push("--format=iife".to_string());
        args.push(format!("--global-name={}", request.global_name));
        args.push(format!("--outfile={}", request.outfile.display()));
        if request.sourcemap {
            args.push("--sourcemap".to_string());
        }
        if request.minify {
            args.push("--minify".to_string());
        }
        for alias in &request.aliases {
            args.push(format!("--alias:{}={}", alias.specifier, alias.target));
        }
        args.push("--log-level=warning".to_string());
        args
    }
}

impl Bundler for CommandBundler {
    #[instrument(skip_all, fields(entry = %request.entry.display()))]
    fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput> {
        ensure_parent(&request.outfile)?;
        let args = self.command_line(request);
        let (program, rest) = args
            .split_first()
            .context("bundler command must not be empty")?;
        debug!(program = %program, args = ?rest, "running bundler");

        let mut cmd = Command::new(program);
        cmd.args(rest).current_dir(&request.workdir);
        let output = run_command_with_timeout(cmd, request.timeout, request.output_limit_bytes)
            .context("run bundler")?;
        output.ensure_success("bundler")?;

        let warnings = output.stderr_text().trim().to_string();
        if !warnings.is_empty() {
            warn!(%warnings, "bundler reported diagnostics");
        }
        if !request.outfile.exists() {
            bail!(
                "bundler succeeded but did not write {}",
                request.outfile.display()
            );
        }

        info!(outfile = %request.outfile.display(), "bundle written");
        Ok(BundleOutput {
            outfile: request.outfile.clone(),
            sourcemap: request.sourcemap_path().filter(|path| path.exists()),
            warnings,
        })
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output dir {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(workdir: &Path, outfile: PathBuf) -> BundleRequest {
        BundleRequest {
            workdir: workdir.to_path_buf(),
            entry: PathBuf::from("game.js"),
            outfile,
            global_name: "Game".to_string(),
            minify: true,
            sourcemap: true,
            aliases: vec![ModuleAlias {
                specifier: "modu-engine".to_string(),
                target: "./__virtual__/modu-engine-runtime/modu-engine.js".to_string(),
            }],
            timeout: Duration::from_secs(10),
            output_limit_bytes: 4096,
        }
    }

    #[test]
    fn command_line_follows_esbuild_flags() {
        let bundler =
            CommandBundler::new(vec!["npx".to_string(), "esbuild".to_string()]).expect("bundler");
        let args = bundler.command_line(&request(Path::new("/stage"), PathBuf::from("/out/game.js")));
        assert_eq!(
            args,
            vec![
                "npx",
                "esbuild",
                "game.js",
                "--bundle",
                "--format=iife",
                "--global-name=Game",
                "--outfile=/out/game.js",
                "--sourcemap",
                "--minify",
                "--alias:modu-engine=./__virtual__/modu-engine-runtime/modu-engine.js",
                "--log-level=warning",
            ]
        );
    }

    #[test]
    fn sourcemap_sits_next_to_bundle() {
        let req = request(Path::new("/stage"), PathBuf::from("/out/game.js"));
        assert_eq!(req.sourcemap_path(), Some(PathBuf::from("/out/game.js.map")));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandBundler::new(Vec::new()).is_err());
        assert!(CommandBundler::new(vec![" ".to_string()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn script_bundler_writes_outfile() {
        let temp = tempfile::tempdir().expect("tempdir");
        fs::write(temp.path().join("game.js"), "console.log(1);\n").expect("entry");
        let script = "for a in \"$@\"; do case \"$a\" in --outfile=*) out=\"${a#--outfile=}\";; esac; done; cat \"$1\" > \"$out\"; printf '{}' > \"$out.map\"";
        let bundler = CommandBundler::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
            "bundler".to_string(),
        ])
        .expect("bundler");

        let outfile = temp.path().join("dist").join("game.js");
        let output = bundler
            .bundle(&request(temp.path(), outfile.clone()))
            .expect("bundle");
        assert_eq!(fs::read_to_string(&outfile).expect("read"), "console.log(1);\n");
        assert_eq!(output.sourcemap, Some(temp.path().join("dist/game.js.map")));
    }

    #[cfg(unix)]
    #[test]
    fn failing_bundler_surfaces_stderr() {
        let temp = tempfile::tempdir().expect("tempdir");
        let bundler = CommandBundler::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo 'Could not resolve \"missing\"' >&2; exit 1".to_string(),
        ])
        .expect("bundler");
        let err = bundler
            .bundle(&request(temp.path(), temp.path().join("out.js")))
            .expect_err("failure");
        assert!(format!("{err:#}").contains("Could not resolve"));
    }
}
