// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Per-device update dispatch: FIFO queue plus exclusive drainer per IMEI.
//!
//! Devices burst (a simulation can push a point every 100 ms) while
//! broadcast latency varies with the slowest observer. Updating a global
//! map and broadcasting inline would drop or reorder points whenever a
//! burst overlaps a broadcast still in flight. Instead, every ingress path
//! appends to the device's FIFO and returns immediately; a single drainer
//! task per IMEI empties the queue through the hub.
//!
//! Contract, per IMEI:
//! - enqueue never waits on broadcast latency
//! - at most one drainer runs at any instant; different IMEIs drain in
//!   parallel
//! - sequence numbers are assigned under the same lock that appends, so
//!   sequence order equals queue order equals delivery order
//! - the drainer runs until the queue is empty, then clears the draining
//!   flag and exits; an enqueue that observes a running drainer relies on
//!   it
//! - every dequeued update causes exactly one hub invocation; hub-side
//!   failures are counted there and never stall the queue
//!
//! Queues are capped; overflow drops the oldest pending update, counts it
//! and logs at WARN.
//!
//! The queue lock is a plain (non-async) mutex held only for push/pop -
//! never across an `.await`.

use crate::hub::BroadcastHub;
use crate::registry::DeviceState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// A state snapshot waiting to be broadcast.
#[derive(Debug, Clone)]
pub struct QueuedUpdate {
    /// The state as committed to the registry at enqueue time.
    pub state: DeviceState,
    /// Per-IMEI monotonic sequence, assigned at enqueue; starts at 1.
    pub seq: u64,
    /// Process-unique tag for tracing a single update through the logs.
    pub queue_id: String,
}

/// Queue state for one IMEI. All fields live behind one lock.
#[derive(Debug, Default)]
struct ImeiQueue {
    pending: VecDeque<QueuedUpdate>,
    draining: bool,
    next_seq: u64,
}

/// Process-wide dispatcher over all per-IMEI queues.
#[derive(Debug)]
pub struct UpdateDispatcher {
    queues: DashMap<String, Arc<Mutex<ImeiQueue>>>,
    hub: Arc<BroadcastHub>,
    queue_cap: usize,

    /// Statistics: updates accepted.
    enqueued: AtomicU64,

    /// Statistics: oldest-first drops due to the queue cap.
    dropped: AtomicU64,
}

impl UpdateDispatcher {
    #[must_use]
    pub fn new(hub: Arc<BroadcastHub>, queue_cap: usize) -> Self {
        Self {
            queues: DashMap::new(),
            hub,
            queue_cap,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a committed state snapshot to its device's queue.
    ///
    /// Returns immediately; if no drainer is running for the IMEI one is
    /// spawned. Must be called from within a tokio runtime.
    pub fn enqueue(&self, state: DeviceState) {
        let imei = state.imei.clone();
        let slot = self
            .queues
            .entry(imei.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ImeiQueue::default())))
            .clone();

        let (spawn_drainer, overflowed, seq) = {
            let mut queue = slot.lock();
            queue.next_seq += 1;
            let seq = queue.next_seq;

            let overflowed = if queue.pending.len() >= self.queue_cap {
                queue.pending.pop_front();
                true
            } else {
                false
            };

            queue.pending.push_back(QueuedUpdate {
                state,
                seq,
                queue_id: Uuid::new_v4().to_string()[..8].to_string(),
            });

            let spawn_drainer = !queue.draining;
            if spawn_drainer {
                queue.draining = true;
            }
            (spawn_drainer, overflowed, seq)
        };

        self.enqueued.fetch_add(1, Ordering::Relaxed);
        if overflowed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                "queue for {} over cap {}, dropped oldest pending update",
                imei, self.queue_cap
            );
        }
        debug!("enqueued update {} for {}", seq, imei);

        if spawn_drainer {
            let hub = Arc::clone(&self.hub);
            tokio::spawn(drain(imei, slot, hub));
        }
    }

    /// True when no queue holds pending updates and no drainer is running.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queues.iter().all(|entry| {
            let queue = entry.value().lock();
            queue.pending.is_empty() && !queue.draining
        })
    }

    /// Wait until idle or until `grace` elapses. Returns whether the
    /// dispatcher went idle. Used by shutdown to bound the final drain.
    pub async fn wait_idle(&self, grace: Duration) -> bool {
        let deadline = Instant::now() + grace;
        while !self.is_idle() {
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Whether a drainer is currently marked running for `imei`.
    #[must_use]
    pub fn draining(&self, imei: &str) -> bool {
        self.queues
            .get(imei)
            .map(|slot| slot.lock().draining)
            .unwrap_or(false)
    }

    /// Get number of accepted updates.
    #[must_use]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Get number of updates dropped to the queue cap.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Drain one IMEI's queue to empty, then exit.
///
/// Lock, pop one, unlock, broadcast; repeat. The draining flag is cleared
/// under the same lock that proves the queue empty, so a racing enqueue
/// either sees the flag still set (and leaves the work to this task) or
/// sees it clear (and spawns the next drainer).
async fn drain(imei: String, slot: Arc<Mutex<ImeiQueue>>, hub: Arc<BroadcastHub>) {
    debug!("drainer for {} started", imei);
    loop {
        let update = {
            let mut queue = slot.lock();
            match queue.pending.pop_front() {
                Some(update) => update,
                None => {
                    queue.draining = false;
                    break;
                }
            }
        };

        debug!(
            "broadcasting {} seq {} ({})",
            imei, update.seq, update.queue_id
        );
        hub.broadcast_update(&update.state).await;
    }
    debug!("drainer for {} idle", imei);
}
