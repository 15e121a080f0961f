//! Static dev server with a live-reload event stream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use futures::stream::Stream;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tower_http::services::ServeDir;
use tracing::{info, warn};

use crate::io::config::ServeConfig;
use crate::io::port::ensure_port_free;
use crate::watch::BuildEvent;

#[derive(Clone)]
struct ServeState {
    events: broadcast::Sender<BuildEvent>,
    closing: watch::Receiver<bool>,
}

#[derive(Serialize)]
struct EventPayload {
    #[serde(rename = "type")]
    event_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    changed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl From<&BuildEvent> for EventPayload {
    fn from(event: &BuildEvent) -> Self {
        match event {
            BuildEvent::Rebuilt {
                changed,
                duration_ms,
            } => EventPayload {
                event_type: "reload",
                changed: Some(*changed),
                duration_ms: Some(*duration_ms),
                message: None,
            },
            BuildEvent::Failed { message } => EventPayload {
                event_type: "build_failed",
                changed: None,
                duration_ms: None,
                message: Some(message.clone()),
            },
        }
    }
}

/// Running dev server; [`DevServer::stop`] shuts it down gracefully.
pub struct DevServer {
    addr: SocketAddr,
    closing: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl DevServer {
    /// Free the configured port, then serve `root` and `/events`.
    pub async fn start(
        config: &ServeConfig,
        root: PathBuf,
        events: broadcast::Sender<BuildEvent>,
    ) -> Result<Self> {
        let bind = config.bind.clone();
        let port = config.port;
        let evicted = tokio::task::spawn_blocking(move || ensure_port_free(&bind, port))
            .await
            .context("port eviction task panicked")?
            .with_context(|| format!("free dev-server port {port}"))?;
        if !evicted.is_empty() {
            warn!(port, evicted = ?evicted, "evicted previous dev-server processes");
        }

        let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
            .parse()
            .with_context(|| format!("parse bind address {}:{}", config.bind, config.port))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let addr = listener.local_addr().context("read bound address")?;

        let (closing, closing_rx) = watch::channel(false);
        let app = router(root.clone(), events, closing_rx.clone());
        let mut shutdown_rx = closing_rx;
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.changed().await;
                })
                .await
                .context("dev server")
        });

        info!(addr = %addr, root = %root.display(), "dev server listening");
        Ok(Self {
            addr,
            closing,
            task,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.closing.send(true);
        self.task.await.context("dev server task panicked")??;
        info!("dev server stopped");
        Ok(())
    }
}

fn router(
    root: PathBuf,
    events: broadcast::Sender<BuildEvent>,
    closing: watch::Receiver<bool>,
) -> Router {
    Router::new()
        .route("/events", get(events_handler))
        .fallback_service(ServeDir::new(root).append_index_html_on_directories(true))
        .with_state(ServeState { events, closing })
}

/// SSE endpoint: `connected` once, then one event per watch rebuild.
async fn events_handler(
    State(state): State<ServeState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();
    let mut closing = state.closing;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        loop {
            if *closing.borrow() {
                break;
            }
            let received = tokio::select! {
                changed = closing.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                received = rx.recv() => received,
            };
            match received {
                Ok(build_event) => {
                    let payload = EventPayload::from(&build_event);
                    if let Ok(json) = serde_json::to_string(&payload) {
                        yield Ok(Event::default().event(payload.event_type).data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
