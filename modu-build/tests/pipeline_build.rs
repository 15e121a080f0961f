//! End-to-end pipeline tests against a recording bundler.
//!
//! Builds a fixture game project and checks the staged sources, the virtual
//! engine module, the patched HTML and watch-mode rebuilds.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use modu_build::core::environment::BuildEnvironment;
use modu_build::io::config::BuildConfig;
use modu_build::pipeline::Pipeline;
use modu_build::test_support::{LOCAL_ENGINE_URL, RecordingBundler, TestProject, VENDORED_SOURCE};
use modu_build::watch::{BuildEvent, WatchContext};
use tokio::sync::broadcast;

fn pipeline(project: &TestProject, config: BuildConfig) -> (Pipeline, Arc<RecordingBundler>) {
    let bundler = Arc::new(RecordingBundler::new());
    let pipeline =
        Pipeline::with_bundler(project.path(), config, bundler.clone()).expect("pipeline");
    (pipeline, bundler)
}

fn environment(ci: bool, config: &BuildConfig) -> BuildEnvironment {
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    BuildEnvironment::detect(
        &config.engine.ci_env_vars,
        &config.engine.local_url,
        &config.engine.cdn_url,
        now,
        |name| (ci && name == "CI").then(|| "true".to_string()),
    )
}

#[tokio::test]
async fn build_rewrites_game_sources_only() {
    let project = TestProject::game().expect("project");
    let (mut pipeline, _) = pipeline(&project, BuildConfig::default());

    let report = pipeline.build_once().await.expect("build");

    assert_eq!(report.staged, 2);
    assert_eq!(report.loaded_by_plugin, 1);
    let staged = project.read(".modu-build/stage/game.js").expect("staged");
    assert!(staged.starts_with("import { createGame, dSqrt, dRandom } from 'modu-engine';\n"));
    assert!(staged.contains("const d = dSqrt(a * a + b * b);"));
    assert!(staged.contains("return d + dRandom();"));
    assert!(!staged.contains("Math."));

    let vendored = project
        .read(".modu-build/stage/node_modules/jitter/index.js")
        .expect("vendored");
    assert_eq!(vendored, VENDORED_SOURCE);
}

#[tokio::test]
async fn build_writes_runtime_virtual_module() {
    let project = TestProject::game().expect("project");
    let (mut pipeline, bundler) = pipeline(&project, BuildConfig::default());

    pipeline.build_once().await.expect("build");

    let module = project
        .read(".modu-build/stage/__virtual__/modu-engine-runtime/modu-engine.js")
        .expect("virtual module");
    assert_eq!(module, "module.exports = window.Modu;\n");

    let requests = bundler.requests().expect("requests");
    assert_eq!(
        requests[0].aliases[0].target,
        "./__virtual__/modu-engine-runtime/modu-engine.js"
    );
    assert!(project.path().join("dist/game.js").exists());
    assert!(project.path().join("dist/game.js.map").exists());
}

#[tokio::test]
async fn build_without_engine_imports_skips_virtual_module() {
    let project = TestProject::new().expect("project");
    project
        .write("src/game.js", "export const answer = 42;\n")
        .expect("write");
    let (mut pipeline, bundler) = pipeline(&project, BuildConfig::default());

    let report = pipeline.build_once().await.expect("build");

    assert_eq!(report.virtual_modules, 0);
    assert!(bundler.requests().expect("requests")[0].aliases.is_empty());
    assert_eq!(
        project.read(".modu-build/stage/game.js").expect("staged"),
        "export const answer = 42;\n"
    );
}

#[test]
fn html_uses_local_engine_outside_ci() {
    let project = TestProject::game().expect("project");
    let config = BuildConfig::default();
    let (pipeline, _) = pipeline(&project, config.clone());

    let changed = pipeline
        .patch_html(&environment(false, &config))
        .expect("patch");

    assert!(!changed);
    let html = project.read("dist/index.html").expect("html");
    assert!(html.contains(LOCAL_ENGINE_URL));
}

#[test]
fn html_switches_to_cache_busted_cdn_in_ci() {
    let project = TestProject::game().expect("project");
    let config = BuildConfig::default();
    let (pipeline, _) = pipeline(&project, config.clone());
    let ci = environment(true, &config);

    assert!(pipeline.patch_html(&ci).expect("patch"));
    let html = project.read("dist/index.html").expect("html");
    assert!(!html.contains(LOCAL_ENGINE_URL));
    assert!(html.contains(&format!("src=\"{}\"", ci.engine_url())));
    assert!(ci.engine_url().starts_with("https://cdn.moduengine.com/modu.min.js?v="));

    // Switching back to local restores the dev URL.
    pipeline
        .patch_html(&environment(false, &config))
        .expect("patch");
    let html = project.read("dist/index.html").expect("html");
    assert!(html.contains(LOCAL_ENGINE_URL));
}

#[test]
fn missing_html_is_an_error() {
    let project = TestProject::new().expect("project");
    project.write("src/game.js", "").expect("write");
    let config = BuildConfig::default();
    let (pipeline, _) = pipeline(&project, config.clone());

    let err = pipeline
        .patch_html(&environment(false, &config))
        .expect_err("missing html");
    assert!(format!("{err:#}").contains("HTML artifact"));
}

/// Receive build events until `done` accepts one, or panic after a timeout.
async fn wait_for(
    rx: &mut broadcast::Receiver<BuildEvent>,
    mut done: impl FnMut(&BuildEvent) -> bool,
) -> BuildEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event");
            if done(&event) {
                return event;
            }
        }
    })
    .await
    .expect("build event within timeout")
}

/// Write outside the watched tree, then rename in, so the poller never sees
/// a half-written file.
fn write_into_src(project: &TestProject, name: &str, contents: &str) {
    let scratch = project
        .write(&format!("scratch/{name}"), contents)
        .expect("write");
    std::fs::rename(scratch, project.path().join("src").join(name)).expect("rename");
}

fn fast_watch_config() -> BuildConfig {
    let mut config = BuildConfig::default();
    config.watch.poll_interval_ms = 50;
    config.watch.debounce_ms = 100;
    config
}

fn staged(project: &TestProject, rel: &str) -> Option<String> {
    std::fs::read_to_string(project.path().join(".modu-build/stage").join(rel)).ok()
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_restages_new_and_removed_files() {
    let project = TestProject::game().expect("project");
    let (mut pipeline, bundler) = pipeline(&project, fast_watch_config());
    pipeline.build_once().await.expect("initial build");

    let (events, mut rx) = broadcast::channel(8);
    let watch = WatchContext::start(pipeline, events).expect("watch");

    // Let the poll watcher take its first snapshot.
    tokio::time::sleep(Duration::from_millis(200)).await;
    write_into_src(&project, "physics.js", "export const r = () => Math.random();\n");

    wait_for(&mut rx, |event| {
        matches!(event, BuildEvent::Rebuilt { .. }) && staged(&project, "physics.js").is_some()
    })
    .await;
    assert_eq!(
        staged(&project, "physics.js").as_deref(),
        Some("import { dRandom } from 'modu-engine';\nexport const r = () => dRandom();\n")
    );

    std::fs::remove_file(project.path().join("src/physics.js")).expect("remove");
    wait_for(&mut rx, |event| {
        matches!(event, BuildEvent::Rebuilt { .. }) && staged(&project, "physics.js").is_none()
    })
    .await;

    watch.dispose().await.expect("dispose");
    assert!(bundler.requests().expect("requests").len() >= 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn watch_reports_failed_rebuild_and_keeps_running() {
    let project = TestProject::game().expect("project");
    let (mut pipeline, _) = pipeline(&project, fast_watch_config());
    pipeline.build_once().await.expect("initial build");

    let (events, mut rx) = broadcast::channel(8);
    let watch = WatchContext::start(pipeline, events).expect("watch");
    tokio::time::sleep(Duration::from_millis(200)).await;

    write_into_src(
        &project,
        "broken.js",
        "import { dSqrt from 'modu-engine';\nMath.random();\n",
    );
    let failed = wait_for(&mut rx, |event| matches!(event, BuildEvent::Failed { .. })).await;
    let BuildEvent::Failed { message } = failed else {
        unreachable!("wait_for only returns failures here");
    };
    assert!(message.contains("malformed import"));

    write_into_src(&project, "broken.js", "export const ok = true;\n");
    wait_for(&mut rx, |event| {
        matches!(event, BuildEvent::Rebuilt { .. })
            && staged(&project, "broken.js").as_deref() == Some("export const ok = true;\n")
    })
    .await;

    watch.dispose().await.expect("dispose");
}
