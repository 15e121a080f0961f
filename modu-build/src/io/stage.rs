//! Staging: the source tree as the bundler should see it.
//!
//! Hooks run in-process, so before the external bundler starts every source
//! file is passed through the plugin host and mirrored into the stage
//! directory, and virtual modules are written next to it. Files are staged
//! concurrently; each one is a self-contained read-transform-write.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result, bail};
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, instrument};
use walkdir::WalkDir;

use crate::plugin::{FILE_NAMESPACE, Loader, PluginHost};

/// Directory under the stage root holding virtual module files.
pub const VIRTUAL_DIR: &str = "__virtual__";

const STAGE_CONCURRENCY: usize = 16;

static SPECIFIER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:\bfrom\s*|\bimport\s*\(?\s*|\brequire\s*\(\s*)['"]([^'"\s]+)['"]"#)
        .expect("specifier pattern should be valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageLayout {
    pub source_root: PathBuf,
    pub stage_root: PathBuf,
}

impl StageLayout {
    pub fn new(source_root: impl Into<PathBuf>, stage_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            stage_root: stage_root.into(),
        }
    }

    /// Location of `source`'s staged copy.
    pub fn staged_path(&self, source: &Path) -> Result<PathBuf> {
        let relative = source.strip_prefix(&self.source_root).with_context(|| {
            format!(
                "{} is outside source dir {}",
                source.display(),
                self.source_root.display()
            )
        })?;
        Ok(self.stage_root.join(relative))
    }
}

/// Bundler alias from a bare specifier to a staged virtual module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleAlias {
    pub specifier: String,
    /// `./`-relative to the stage root, forward slashes.
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    pub staged: PathBuf,
    /// Contents came from a load hook rather than a raw copy.
    pub loaded_by_plugin: bool,
    /// Bare import specifiers found in the staged text.
    pub bare_imports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageReport {
    pub files: Vec<StagedFile>,
}

impl StageReport {
    pub fn loaded_by_plugin(&self) -> usize {
        self.files.iter().filter(|f| f.loaded_by_plugin).count()
    }

    pub fn bare_specifiers(&self) -> BTreeSet<String> {
        self.files
            .iter()
            .flat_map(|f| f.bare_imports.iter().cloned())
            .collect()
    }
}

/// Stage one file: hook output if a load hook accepts it, else a byte copy.
pub fn stage_file(layout: &StageLayout, host: &PluginHost, source: &Path) -> Result<StagedFile> {
    let staged = layout.staged_path(source)?;
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stage dir {}", parent.display()))?;
    }

    let (loaded_by_plugin, text) = match host.load(&source.to_string_lossy(), FILE_NAMESPACE)? {
        Some(loaded) => {
            fs::write(&staged, &loaded.contents)
                .with_context(|| format!("write {}", staged.display()))?;
            (true, Some(loaded.contents))
        }
        None => {
            fs::copy(source, &staged).with_context(|| {
                format!("copy {} to {}", source.display(), staged.display())
            })?;
            let text = Loader::from_path(source).and_then(|_| fs::read_to_string(source).ok());
            (false, text)
        }
    };

    let bare_imports = text.as_deref().map(bare_specifiers).unwrap_or_default();
    debug!(
        source = %source.display(),
        loaded_by_plugin,
        bare_imports = bare_imports.len(),
        "staged"
    );
    Ok(StagedFile {
        source: source.to_path_buf(),
        staged,
        loaded_by_plugin,
        bare_imports,
    })
}

/// Remove the staged copy of a deleted source file or directory.
pub fn unstage(layout: &StageLayout, source: &Path) -> Result<()> {
    let staged = layout.staged_path(source)?;
    if staged.is_dir() {
        return fs::remove_dir_all(&staged).with_context(|| format!("remove {}", staged.display()));
    }
    match fs::remove_file(&staged) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove {}", staged.display())),
    }
}

/// Rebuild the stage directory from scratch.
#[instrument(skip_all, fields(source_root = %layout.source_root.display()))]
pub async fn stage_tree(layout: Arc<StageLayout>, host: Arc<PluginHost>) -> Result<StageReport> {
    let walk_layout = layout.clone();
    let sources = tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        reset_dir(&walk_layout.stage_root)?;
        list_files(&walk_layout.source_root)
    })
    .await
    .context("stage walk task panicked")??;

    stage_paths(layout, host, sources).await
}

/// Stage `sources` concurrently on the blocking pool.
pub async fn stage_paths(
    layout: Arc<StageLayout>,
    host: Arc<PluginHost>,
    sources: Vec<PathBuf>,
) -> Result<StageReport> {
    let results: Vec<Result<StagedFile>> = stream::iter(sources)
        .map(|source| {
            let layout = layout.clone();
            let host = host.clone();
            async move {
                tokio::task::spawn_blocking(move || stage_file(&layout, &host, &source))
                    .await
                    .context("stage task panicked")?
            }
        })
        .buffer_unordered(STAGE_CONCURRENCY)
        .collect()
        .await;

    let mut files = results.into_iter().collect::<Result<Vec<_>>>()?;
    files.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(StageReport { files })
}

/// Resolve bare specifiers through the host and write virtual modules.
///
/// Specifiers that resolve to the file namespace, or not at all, are left to
/// the bundler's own resolution.
pub fn write_virtual_modules<'a, I>(
    layout: &StageLayout,
    host: &PluginHost,
    specifiers: I,
) -> Result<Vec<ModuleAlias>>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut aliases = Vec::new();
    for specifier in specifiers {
        let Some(resolved) = host.resolve(specifier, None)? else {
            continue;
        };
        if resolved.namespace == FILE_NAMESPACE {
            continue;
        }
        let Some(loaded) = host.load(&resolved.path, &resolved.namespace)? else {
            bail!(
                "no plugin loads virtual module {}:{}",
                resolved.namespace,
                resolved.path
            );
        };

        let file_name = format!("{}.{}", sanitize(&resolved.path), loaded.loader.as_str());
        let namespace_dir = sanitize(&resolved.namespace);
        let path = layout
            .stage_root
            .join(VIRTUAL_DIR)
            .join(&namespace_dir)
            .join(&file_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create virtual dir {}", parent.display()))?;
        }
        fs::write(&path, &loaded.contents)
            .with_context(|| format!("write virtual module {}", path.display()))?;

        debug!(specifier = %specifier, path = %path.display(), "wrote virtual module");
        aliases.push(ModuleAlias {
            specifier: specifier.clone(),
            target: format!("./{VIRTUAL_DIR}/{namespace_dir}/{file_name}"),
        });
    }
    Ok(aliases)
}

/// Bare (package) specifiers imported by `text`, in first-seen order.
pub fn bare_specifiers(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for caps in SPECIFIER_RE.captures_iter(text) {
        let Some(specifier) = caps.get(1).map(|m| m.as_str()) else {
            continue;
        };
        if specifier.starts_with('.') || specifier.starts_with('/') {
            continue;
        }
        if !out.iter().any(|s| s == specifier) {
            out.push(specifier.to_string());
        }
    }
    out
}

fn list_files(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("source dir {} not found", root.display());
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

fn reset_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).with_context(|| format!("clear {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gate::TransformGate;
    use crate::plugin::{DeterministicPlugin, EngineModulePlugin, RuntimeBinding};

    fn host(root: &Path) -> Arc<PluginHost> {
        let mut host = PluginHost::new();
        host.register(
            DeterministicPlugin::new(TransformGate::default(), r"\.(m?js|ts)$")
                .expect("plugin")
                .with_root(root),
        );
        host.register(
            EngineModulePlugin::new(RuntimeBinding::new("window.Modu").expect("binding"))
                .expect("plugin"),
        );
        Arc::new(host)
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, contents).expect("write");
    }

    #[test]
    fn bare_specifier_scan() {
        let text = "import { a } from 'lib-a';\nimport './side.css';\nimport \"lib-b\";\nconst c = await import('lib-c');\nconst d = require(\"lib-d\");\nimport x from '../x';\nexport * from '@scope/e';\nimport again from 'lib-a';";
        assert_eq!(
            bare_specifiers(text),
            vec!["lib-a", "lib-b", "lib-c", "lib-d", "@scope/e"]
        );
    }

    #[test]
    fn staged_path_must_be_inside_source() {
        let layout = StageLayout::new("/p/src", "/p/.stage");
        assert_eq!(
            layout.staged_path(Path::new("/p/src/a/b.js")).expect("inside"),
            PathBuf::from("/p/.stage/a/b.js")
        );
        assert!(layout.staged_path(Path::new("/p/other.js")).is_err());
    }

    #[tokio::test]
    async fn stage_tree_transforms_copies_and_resets() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        let layout = Arc::new(StageLayout::new(root.join("src"), root.join("stage")));
        write(&root.join("src/game.js"), "const r = Math.random();\n");
        write(&root.join("src/node_modules/rng/index.js"), "module.exports = Math.random;\n");
        write(&root.join("src/assets/logo.bin"), "\u{1}\u{2}");
        write(&root.join("stage/stale.js"), "stale");

        let report = stage_tree(layout.clone(), host(root)).await.expect("stage");

        assert_eq!(report.files.len(), 3);
        assert_eq!(report.loaded_by_plugin(), 1);
        assert_eq!(
            fs::read_to_string(root.join("stage/game.js")).expect("read"),
            "import { dRandom } from 'modu-engine';\nconst r = dRandom();\n"
        );
        assert_eq!(
            fs::read_to_string(root.join("stage/node_modules/rng/index.js")).expect("read"),
            "module.exports = Math.random;\n"
        );
        assert!(root.join("stage/assets/logo.bin").exists());
        assert!(!root.join("stage/stale.js").exists());
        assert_eq!(
            report.bare_specifiers().into_iter().collect::<Vec<_>>(),
            vec!["modu-engine"]
        );
    }

    #[tokio::test]
    async fn missing_source_dir_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = Arc::new(StageLayout::new(
            temp.path().join("nope"),
            temp.path().join("stage"),
        ));
        let err = stage_tree(layout, host(temp.path()))
            .await
            .expect_err("missing");
        assert!(format!("{err:#}").contains("not found"));
    }

    #[test]
    fn virtual_modules_are_written_for_engine_only() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StageLayout::new(temp.path().join("src"), temp.path().join("stage"));
        let specifiers: BTreeSet<String> = ["lodash", "modu-engine"]
            .into_iter()
            .map(String::from)
            .collect();

        let aliases =
            write_virtual_modules(&layout, &host(temp.path()), &specifiers).expect("virtual");

        assert_eq!(
            aliases,
            vec![ModuleAlias {
                specifier: "modu-engine".to_string(),
                target: "./__virtual__/modu-engine-runtime/modu-engine.js".to_string(),
            }]
        );
        let written = temp
            .path()
            .join("stage/__virtual__/modu-engine-runtime/modu-engine.js");
        assert_eq!(
            fs::read_to_string(written).expect("read"),
            "module.exports = window.Modu;\n"
        );
    }

    #[test]
    fn unstage_tolerates_missing_copy() {
        let temp = tempfile::tempdir().expect("tempdir");
        let layout = StageLayout::new(temp.path().join("src"), temp.path().join("stage"));
        write(&temp.path().join("stage/a.js"), "x");
        unstage(&layout, &temp.path().join("src/a.js")).expect("unstage");
        assert!(!temp.path().join("stage/a.js").exists());
        unstage(&layout, &temp.path().join("src/a.js")).expect("second unstage");
    }
}
