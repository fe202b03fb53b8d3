// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Listener wiring and process lifecycle.
//!
//! Two listeners share one [`AppState`]:
//!
//! - a raw TCP accept loop for GT06 devices (default port 5000), one
//!   [`DeviceSession`] task per connection
//! - an axum HTTP server for observers (default port 8081): `/` embedded
//!   dashboard, `/ws` WebSocket upgrade, `/health` counters, optional
//!   static files on unmatched paths
//!
//! Shutdown runs in two phases: the first stops both accept paths and
//! closes device sessions (each publishes its offline transition), then
//! the per-IMEI queues drain under the configured grace period; only then
//! does the second phase release observer sessions, so pending updates
//! still reach them.

use crate::config::Config;
use crate::device::DeviceSession;
use crate::dispatch::UpdateDispatcher;
use crate::hub::BroadcastHub;
use crate::observer::ObserverSession;
use crate::registry::DeviceRegistry;
use axum::{
    extract::{State, WebSocketUpgrade},
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared application state.
///
/// Built once in `main` before any listener accepts; every task holds an
/// `Arc`. Tests build a fresh one per case instead of resetting globals.
pub struct AppState {
    pub config: Config,
    pub registry: DeviceRegistry,
    pub hub: Arc<BroadcastHub>,
    pub dispatcher: UpdateDispatcher,
    /// Second shutdown phase: observers leave only after the final drain,
    /// so pending updates still reach them.
    observer_shutdown: watch::Sender<bool>,
}

impl AppState {
    #[must_use]
    pub fn new(config: Config) -> Arc<Self> {
        let hub = Arc::new(BroadcastHub::new());
        let dispatcher = UpdateDispatcher::new(Arc::clone(&hub), config.queue_cap);
        let (observer_shutdown, _) = watch::channel(false);
        Arc::new(Self {
            config,
            registry: DeviceRegistry::new(),
            hub,
            dispatcher,
            observer_shutdown,
        })
    }

    /// Subscribe an observer session to the second shutdown phase.
    #[must_use]
    pub fn subscribe_observer_shutdown(&self) -> watch::Receiver<bool> {
        self.observer_shutdown.subscribe()
    }

    /// Ask all observer sessions to close.
    pub fn close_observers(&self) {
        let _ = self.observer_shutdown.send(true);
    }
}

/// Run the gateway until a shutdown signal arrives.
///
/// Binds both listeners up front so a port conflict fails fast with a
/// non-zero exit instead of a half-running process.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let device_addr = format!("{}:{}", config.bind, config.tcp_port);
    let http_addr = format!("{}:{}", config.bind, config.http_port);

    let device_listener = match TcpListener::bind(&device_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind device port {}: {}", device_addr, e);
            return Err(e.into());
        }
    };
    let http_listener = match TcpListener::bind(&http_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("cannot bind http port {}: {}", http_addr, e);
            return Err(e.into());
        }
    };

    let state = AppState::new(config.clone());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    info!("trakgate-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("device listener: tcp://{}", device_addr);
    info!("observer endpoint: ws://{}/ws", http_addr);
    info!("dashboard: http://{}/", http_addr);

    let accept = tokio::spawn(accept_devices(
        device_listener,
        Arc::clone(&state),
        shutdown_rx.clone(),
    ));

    let app = router(Arc::clone(&state));
    let mut http_shutdown = shutdown_rx.clone();
    let http = tokio::spawn(async move {
        axum::serve(http_listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Phase 1: stop accepting, close device sessions (each enqueues its
    // offline update), then drain the queues with a deadline. The short
    // pause lets sessions reach their teardown before idleness is judged.
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let grace = Duration::from_secs(state.config.shutdown_grace_secs);
    if state.dispatcher.wait_idle(grace).await {
        info!("all queues drained");
    } else {
        warn!("shutdown grace period expired with updates pending");
    }

    // Phase 2: release the observers so the http server can finish.
    state.close_observers();

    let _ = accept.await;
    if let Ok(Err(e)) = http.await {
        warn!("http server error during shutdown: {}", e);
    }
    info!("bye");
    Ok(())
}

/// Accept GT06 device connections until shutdown.
pub async fn accept_devices(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("device listener stopped");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!("device connection from {}", peer);
                    let state = Arc::clone(&state);
                    let session_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        DeviceSession::new().run(socket, state, session_shutdown).await;
                    });
                }
                Err(e) => {
                    warn!("device accept failed: {}", e);
                }
            }
        }
    }
}

/// Build the observer-facing HTTP router.
pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    let mut router = Router::new()
        .route("/", get(serve_dashboard))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler));

    if let Some(dir) = static_dir {
        router = router.fallback_service(ServeDir::new(dir));
    }

    router
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    if state.hub.observer_count() >= state.config.max_observers {
        warn!("observer rejected: max connections reached");
        return (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Too many observers",
        )
            .into_response();
    }

    let shutdown = state.subscribe_observer_shutdown();
    ws.on_upgrade(move |socket| async move {
        ObserverSession::new().run(socket, state, shutdown).await;
    })
    .into_response()
}

/// Health check endpoint.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "devices": state.registry.len(),
        "observers": state.hub.observer_count(),
        "updates_enqueued": state.dispatcher.enqueued(),
        "updates_dropped": state.dispatcher.dropped(),
        "broadcasts": state.hub.broadcasts(),
        "broadcast_failures": state.hub.send_failures(),
    }))
}

/// Serve the embedded observer dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(include_str!("dashboard.html"))
}
