// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Observer WebSocket sessions.
//!
//! On connect the session registers with the broadcast hub, which queues
//! the `initial_state` snapshot as the observer's first message; a forward
//! task then moves hub output from the session's channel onto the socket.
//!
//! Inbound documents of kind `update` or `initial_state` are synthetic
//! ingress (simulation mode): they take exactly the same registry-commit +
//! dispatch-enqueue path a device-originated location does, keyed by the
//! IMEI carried in the payload. Anything else from the observer is ignored.

use crate::protocol::{is_valid_imei, DeviceStateJson, WsMessage};
use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::hub::OBSERVER_CHANNEL_DEPTH;

/// A connected observer.
pub struct ObserverSession {
    /// Short id for log correlation; doubles as the hub key.
    observer_id: String,
}

impl ObserverSession {
    #[must_use]
    pub fn new() -> Self {
        let observer_id = Uuid::new_v4().to_string()[..8].to_string();
        info!("[{}] observer connected", observer_id);
        Self { observer_id }
    }

    /// Run the session until the observer disconnects or shutdown asks
    /// observers to leave (after the final queue drain).
    pub async fn run(
        self,
        socket: WebSocket,
        state: Arc<AppState>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let (mut ws_tx, mut ws_rx) = socket.split();
        let (tx, mut rx) = mpsc::channel::<String>(OBSERVER_CHANNEL_DEPTH);

        // Snapshot first: the hub queues initial_state before the observer
        // joins the broadcast set.
        state
            .hub
            .register(&self.observer_id, tx, &state.registry.snapshot())
            .await;

        // Forward hub output onto the socket.
        let observer_id = self.observer_id.clone();
        let forward = tokio::spawn(async move {
            while let Some(json) = rx.recv().await {
                if ws_tx.send(Message::Text(json)).await.is_err() {
                    debug!("[{}] socket send failed, closing", observer_id);
                    break;
                }
            }
        });

        loop {
            let msg = tokio::select! {
                _ = shutdown.changed() => {
                    info!("[{}] closing for shutdown", self.observer_id);
                    break;
                }
                msg = ws_rx.next() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            match msg {
                Ok(Message::Text(text)) => self.handle_message(&text, &state),
                Ok(Message::Close(_)) => {
                    info!("[{}] observer closed connection", self.observer_id);
                    break;
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Axum answers pings itself.
                }
                Ok(Message::Binary(_)) => {
                    warn!("[{}] binary frames not supported", self.observer_id);
                }
                Err(e) => {
                    info!("[{}] socket error: {}", self.observer_id, e);
                    break;
                }
            }
        }

        state.hub.unregister(&self.observer_id);
        forward.abort();
        info!("[{}] observer session ended", self.observer_id);
    }

    /// Handle one inbound text frame.
    fn handle_message(&self, text: &str, state: &Arc<AppState>) {
        let msg: WsMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("[{}] malformed message dropped: {}", self.observer_id, e);
                return;
            }
        };

        match msg {
            WsMessage::Update { data } => self.ingest(data, state),
            WsMessage::InitialState { data } => {
                for entry in data {
                    self.ingest(entry, state);
                }
            }
            WsMessage::Other => {
                debug!("[{}] ignored message of unknown kind", self.observer_id);
            }
        }
    }

    /// Commit a synthetic update and hand it to the dispatcher.
    fn ingest(&self, json: DeviceStateJson, state: &Arc<AppState>) {
        if !is_valid_imei(&json.imei) {
            warn!(
                "[{}] synthetic update with invalid imei {:?} dropped",
                self.observer_id, json.imei
            );
            return;
        }

        let received = Utc::now();
        let committed = state
            .registry
            .update(&json.imei, |entry| json.merge_into(entry, received));
        state.dispatcher.enqueue(committed);
        debug!(
            "[{}] synthetic update for {} accepted",
            self.observer_id, json.imei
        );
    }
}

impl Default for ObserverSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::DeviceStatus;

    fn app() -> Arc<AppState> {
        AppState::new(Config::for_tests())
    }

    fn session() -> ObserverSession {
        ObserverSession {
            observer_id: "test-obs".into(),
        }
    }

    #[tokio::test]
    async fn synthetic_update_commits_to_registry() {
        let state = app();
        session().handle_message(
            r#"{"type": "update", "data": {"imei": "111111111111111", "lat": 1.5, "lon": 2.5, "speed": 40}}"#,
            &state,
        );

        let entry = state.registry.get("111111111111111").unwrap();
        assert_eq!(entry.lat, Some(1.5));
        assert_eq!(entry.lon, Some(2.5));
        assert_eq!(entry.speed, 40);
        assert_eq!(entry.status, DeviceStatus::Active);
        assert_eq!(state.dispatcher.enqueued(), 1);
    }

    #[tokio::test]
    async fn initial_state_kind_ingests_every_entry() {
        let state = app();
        session().handle_message(
            r#"{"type": "initial_state", "data": [
                {"imei": "111111111111111", "lat": 1.0},
                {"imei": "222222222222222", "lat": 2.0}
            ]}"#,
            &state,
        );

        assert_eq!(state.registry.len(), 2);
        assert_eq!(state.dispatcher.enqueued(), 2);
    }

    #[tokio::test]
    async fn invalid_imei_is_dropped() {
        let state = app();
        session().handle_message(
            r#"{"type": "update", "data": {"imei": "not-an-imei", "lat": 1.0}}"#,
            &state,
        );
        assert!(state.registry.is_empty());
        assert_eq!(state.dispatcher.enqueued(), 0);
    }

    #[tokio::test]
    async fn malformed_json_and_unknown_kind_are_ignored() {
        let state = app();
        session().handle_message("{not json", &state);
        session().handle_message(r#"{"type": "ping"}"#, &state);
        assert!(state.registry.is_empty());
        assert_eq!(state.dispatcher.enqueued(), 0);
    }
}
