//! Test helpers: throwaway game projects and a bundler that records requests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::bundler::{BundleOutput, BundleRequest, Bundler};

/// Engine script tag the fixture HTML starts with.
pub const LOCAL_ENGINE_URL: &str = "http://localhost:3001/dist/modu.iife.js";

pub const GAME_SOURCE: &str = "\
import { createGame } from 'modu-engine';

const game = createGame();
export function step(a, b) {
    const d = Math.sqrt(a * a + b * b);
    return d + Math.random();
}
";

pub const VENDORED_SOURCE: &str = "export const jitter = () => Math.random();\n";

/// Project rooted in a temporary directory, removed on drop.
pub struct TestProject {
    temp: TempDir,
}

impl TestProject {
    /// Empty project.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp project")?;
        Ok(Self { temp })
    }

    /// Project laid out like a small game: entry, a vendored dependency
    /// under `src/node_modules`, and an HTML page loading the local engine.
    pub fn game() -> Result<Self> {
        let project = Self::new()?;
        project.write("src/game.js", GAME_SOURCE)?;
        project.write("src/node_modules/jitter/index.js", VENDORED_SOURCE)?;
        project.write(
            "dist/index.html",
            &format!(
                "<!doctype html>\n<html>\n<head>\n<script src=\"{LOCAL_ENGINE_URL}\"></script>\n</head>\n<body><script src=\"game.js\"></script></body>\n</html>\n"
            ),
        )?;
        Ok(project)
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    /// Write `contents` to `rel`, creating parent directories.
    pub fn write(&self, rel: &str, contents: &str) -> Result<PathBuf> {
        let path = self.temp.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.temp.path().join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }
}

/// Bundler fake: copies the staged entry to the outfile and remembers
/// every request it was given.
#[derive(Default)]
pub struct RecordingBundler {
    requests: Mutex<Vec<BundleRequest>>,
}

impl RecordingBundler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Result<Vec<BundleRequest>> {
        let guard = self
            .requests
            .lock()
            .map_err(|_| anyhow!("recording bundler lock poisoned"))?;
        Ok(guard.clone())
    }
}

impl Bundler for RecordingBundler {
    fn bundle(&self, request: &BundleRequest) -> Result<BundleOutput> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("recording bundler lock poisoned"))?
            .push(request.clone());

        let entry = request.workdir.join(&request.entry);
        if let Some(parent) = request.outfile.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&entry, &request.outfile)
            .with_context(|| format!("copy {} to bundle", entry.display()))?;
        let sourcemap = request.sourcemap_path();
        if let Some(map) = &sourcemap {
            fs::write(map, "{}")?;
        }
        Ok(BundleOutput {
            outfile: request.outfile.clone(),
            sourcemap,
            warnings: String::new(),
        })
    }
}
