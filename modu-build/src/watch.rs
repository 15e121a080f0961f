//! Watch mode: rebuild on source changes until disposed.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Event as NotifyEvent, EventKind, PollWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::pipeline::Pipeline;

/// Pending file events buffered between the watcher thread and the loop.
const EVENT_CAPACITY: usize = 256;

/// Outcome of a watch rebuild, broadcast to dev-server clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    Rebuilt { changed: usize, duration_ms: u64 },
    Failed { message: String },
}

/// Source paths touched by one batch of file events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Files that exist now and must be re-staged.
    pub modified: Vec<PathBuf>,
    /// Paths that no longer exist.
    pub removed: Vec<PathBuf>,
}

impl ChangeSet {
    /// Collect changed paths under `source_dir`.
    ///
    /// Classification uses the filesystem state at flush time rather than the
    /// event kind, so a create-then-delete inside one batch counts as removed.
    pub fn from_events(events: &[NotifyEvent], source_dir: &Path) -> Self {
        let mut touched = BTreeSet::new();
        for event in events {
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            for path in &event.paths {
                if path.starts_with(source_dir) && path != source_dir {
                    touched.insert(path.clone());
                }
            }
        }

        let mut changes = ChangeSet::default();
        for path in touched {
            if path.is_file() {
                changes.modified.push(path);
            } else if !path.exists() {
                changes.removed.push(path);
            }
        }
        changes
    }

    pub fn is_empty(&self) -> bool {
        self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modified.len() + self.removed.len()
    }
}

/// Long-lived rebuild loop. Dropping the file watcher and stopping the loop
/// happen together in [`WatchContext::dispose`].
pub struct WatchContext {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl WatchContext {
    /// Watch the pipeline's source dir and rebuild on every debounced batch.
    pub fn start(pipeline: Pipeline, events: broadcast::Sender<BuildEvent>) -> Result<Self> {
        Self::start_with_capacity(pipeline, events, EVENT_CAPACITY)
    }

    fn start_with_capacity(
        pipeline: Pipeline,
        events: broadcast::Sender<BuildEvent>,
        capacity: usize,
    ) -> Result<Self> {
        let source_dir = pipeline.paths().source_dir.clone();
        let watch_config = pipeline.config().watch.clone();
        let (tx, rx) = mpsc::channel::<NotifyEvent>(capacity);
        let overflowed = Arc::new(AtomicBool::new(false));
        let watcher_overflowed = overflowed.clone();

        let mut watcher = PollWatcher::new(
            move |res: Result<NotifyEvent, notify::Error>| {
                if let Ok(event) = res {
                    forward_event(&tx, &watcher_overflowed, event);
                }
            },
            notify::Config::default()
                .with_poll_interval(Duration::from_millis(watch_config.poll_interval_ms)),
        )
        .context("create file watcher")?;
        watcher
            .watch(&source_dir, RecursiveMode::Recursive)
            .with_context(|| format!("watch {}", source_dir.display()))?;
        info!(path = %source_dir.display(), "watching source directory");

        let (shutdown, shutdown_rx) = oneshot::channel();
        let debounce = Duration::from_millis(watch_config.debounce_ms);
        let task = tokio::spawn(watch_loop(
            watcher,
            pipeline,
            WatchInbox { rx, overflowed },
            shutdown_rx,
            events,
            debounce,
        ));
        Ok(Self { shutdown, task })
    }

    /// Stop rebuilding and release the file watcher.
    pub async fn dispose(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("watch task panicked")?;
        debug!("watch context disposed");
        Ok(())
    }
}

/// Hand a watcher event to the loop without blocking the watcher thread.
///
/// A full channel drops the event and raises `overflowed`, which makes the
/// next flush rebuild from scratch.
fn forward_event(tx: &mpsc::Sender<NotifyEvent>, overflowed: &AtomicBool, event: NotifyEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            if !overflowed.swap(true, Ordering::SeqCst) {
                warn!("file event queue full, scheduling a full rebuild");
            }
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

struct WatchInbox {
    rx: mpsc::Receiver<NotifyEvent>,
    overflowed: Arc<AtomicBool>,
}

async fn watch_loop(
    watcher: PollWatcher,
    mut pipeline: Pipeline,
    mut inbox: WatchInbox,
    mut shutdown: oneshot::Receiver<()>,
    events: broadcast::Sender<BuildEvent>,
    debounce: Duration,
) {
    // Owned here so it is dropped when the loop ends.
    let _watcher = watcher;
    let source_dir = pipeline.paths().source_dir.clone();

    // Batch at a fixed interval so an editor's burst of writes is one rebuild.
    let mut pending: Vec<NotifyEvent> = Vec::new();
    let mut flush_tick = tokio::time::interval(debounce);
    flush_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(event) = inbox.rx.recv() => {
                pending.push(event);
            }
            _ = flush_tick.tick() => {
                if inbox.overflowed.swap(false, Ordering::SeqCst) {
                    // Some paths were lost; the batch cannot be trusted.
                    pending.clear();
                    full_rebuild(&mut pipeline, &events).await;
                    continue;
                }
                if pending.is_empty() {
                    continue;
                }
                let changes = ChangeSet::from_events(&pending, &source_dir);
                pending.clear();
                if changes.is_empty() {
                    continue;
                }
                rebuild(&mut pipeline, &changes, &events).await;
            }
        }
    }
}

async fn full_rebuild(pipeline: &mut Pipeline, events: &broadcast::Sender<BuildEvent>) {
    let event = match pipeline.build_once().await {
        Ok(report) => BuildEvent::Rebuilt {
            changed: report.staged,
            duration_ms: report.duration.as_millis() as u64,
        },
        Err(err) => {
            let message = format!("{err:#}");
            warn!(error = %message, "full rebuild failed");
            BuildEvent::Failed { message }
        }
    };
    let _ = events.send(event);
}

async fn rebuild(
    pipeline: &mut Pipeline,
    changes: &ChangeSet,
    events: &broadcast::Sender<BuildEvent>,
) {
    debug!(modified = ?changes.modified, removed = ?changes.removed, "rebuilding");
    let event = match pipeline.rebuild(changes).await {
        Ok(report) => BuildEvent::Rebuilt {
            changed: changes.len(),
            duration_ms: report.duration.as_millis() as u64,
        },
        Err(err) => {
            let message = format!("{err:#}");
            warn!(error = %message, "rebuild failed");
            BuildEvent::Failed { message }
        }
    };
    // No subscribers is fine; the dev server may not be running.
    let _ = events.send(event);
}
