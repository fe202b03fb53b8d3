// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Broadcast hub: the set of connected observers.
//!
//! Each observer is represented by the sending half of a bounded channel;
//! a forward task on the observer's side moves messages from the channel
//! onto the WebSocket. The hub serializes each update once and hands the
//! same JSON text to every observer.
//!
//! A failed channel send means the observer's forward task is gone, so the
//! observer is pruned on the spot; the failure never aborts the iteration.
//! The hub imposes no per-device ordering of its own - updates arrive here
//! already serialized per IMEI by the dispatcher.

use crate::protocol::WsMessage;
use crate::registry::DeviceState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Bounded depth of each observer's outbound channel.
pub const OBSERVER_CHANNEL_DEPTH: usize = 256;

/// Observer set plus delivery counters.
#[derive(Debug, Default)]
pub struct BroadcastHub {
    /// Connected observers: observer id -> outbound JSON channel.
    observers: DashMap<String, mpsc::Sender<String>>,

    /// Statistics: broadcast() invocations.
    broadcasts: AtomicU64,

    /// Statistics: per-observer send failures.
    send_failures: AtomicU64,
}

impl BroadcastHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer and deliver its `initial_state` snapshot.
    ///
    /// The snapshot is queued on the channel before the observer joins the
    /// set, so its first message is always the snapshot; broadcasts that
    /// commit during registration are simply not replayed.
    pub async fn register(
        &self,
        observer_id: &str,
        sender: mpsc::Sender<String>,
        snapshot: &[DeviceState],
    ) {
        let initial = WsMessage::initial_state(snapshot);
        match serde_json::to_string(&initial) {
            Ok(json) => {
                if sender.send(json).await.is_err() {
                    warn!("[{}] observer gone before snapshot delivery", observer_id);
                    return;
                }
            }
            Err(e) => {
                warn!("[{}] failed to serialize snapshot: {}", observer_id, e);
                return;
            }
        }

        self.observers.insert(observer_id.to_string(), sender);
        debug!(
            "[{}] observer registered ({} devices in snapshot)",
            observer_id,
            snapshot.len()
        );
    }

    /// Remove an observer; it is never sent to again.
    pub fn unregister(&self, observer_id: &str) {
        if self.observers.remove(observer_id).is_some() {
            debug!("[{}] observer unregistered", observer_id);
        }
    }

    /// Deliver one device update to every observer.
    ///
    /// Individual failures are counted and prune the failing observer, but
    /// never stop delivery to the rest.
    pub async fn broadcast_update(&self, state: &DeviceState) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);

        let json = match serde_json::to_string(&WsMessage::update(state)) {
            Ok(json) => json,
            Err(e) => {
                warn!("failed to serialize update for {}: {}", state.imei, e);
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        // Snapshot the set so no map lock is held across channel sends.
        let targets: Vec<(String, mpsc::Sender<String>)> = self
            .observers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (observer_id, sender) in targets {
            if sender.send(json.clone()).await.is_err() {
                self.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!("[{}] observer send failed, pruning", observer_id);
                self.unregister(&observer_id);
            }
        }
    }

    /// Number of connected observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Get number of broadcast invocations.
    #[must_use]
    pub fn broadcasts(&self) -> u64 {
        self.broadcasts.load(Ordering::Relaxed)
    }

    /// Get number of per-observer send failures.
    #[must_use]
    pub fn send_failures(&self) -> u64 {
        self.send_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::WsMessage;

    fn state(imei: &str, lat: f64) -> DeviceState {
        let mut state = DeviceState::new(imei);
        state.lat = Some(lat);
        state.lon = Some(0.0);
        state
    }

    fn parse(json: &str) -> WsMessage {
        serde_json::from_str(json).unwrap()
    }

    #[tokio::test]
    async fn first_message_is_initial_state() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);

        hub.register("obs-1", tx, &[state("111111111111111", 1.0)])
            .await;
        hub.broadcast_update(&state("111111111111111", 2.0)).await;

        match parse(&rx.recv().await.unwrap()) {
            WsMessage::InitialState { data } => {
                assert_eq!(data.len(), 1);
                assert_eq!(data[0].lat, Some(1.0));
            }
            other => panic!("expected InitialState, got {:?}", other),
        }
        match parse(&rx.recv().await.unwrap()) {
            WsMessage::Update { data } => assert_eq!(data.lat, Some(2.0)),
            other => panic!("expected Update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_all_observers() {
        let hub = BroadcastHub::new();
        let (tx1, mut rx1) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);
        let (tx2, mut rx2) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);
        hub.register("obs-1", tx1, &[]).await;
        hub.register("obs-2", tx2, &[]).await;

        hub.broadcast_update(&state("111111111111111", 5.0)).await;

        for rx in [&mut rx1, &mut rx2] {
            let _initial = rx.recv().await.unwrap();
            match parse(&rx.recv().await.unwrap()) {
                WsMessage::Update { data } => assert_eq!(data.lat, Some(5.0)),
                other => panic!("expected Update, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn closed_observer_is_pruned_without_aborting() {
        let hub = BroadcastHub::new();
        let (tx1, rx1) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);
        let (tx2, mut rx2) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);
        hub.register("dead", tx1, &[]).await;
        hub.register("live", tx2, &[]).await;
        assert_eq!(hub.observer_count(), 2);

        drop(rx1);
        hub.broadcast_update(&state("111111111111111", 9.0)).await;

        assert_eq!(hub.observer_count(), 1);
        assert_eq!(hub.send_failures(), 1);
        let _initial = rx2.recv().await.unwrap();
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let hub = BroadcastHub::new();
        let (tx, mut rx) = mpsc::channel(OBSERVER_CHANNEL_DEPTH);
        hub.register("obs-1", tx, &[]).await;
        let _initial = rx.recv().await.unwrap();

        hub.unregister("obs-1");
        hub.broadcast_update(&state("111111111111111", 1.0)).await;

        assert_eq!(hub.observer_count(), 0);
        assert!(rx.try_recv().is_err());
    }
}
