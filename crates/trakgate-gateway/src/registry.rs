// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Last-known device state, keyed by IMEI.
//!
//! The registry holds one [`DeviceState`] per device ever seen by the
//! process and nothing else: no history, no sockets. Sessions come and go;
//! the entry stays, which is how offline devices remain visible to
//! observers.
//!
//! Writes are atomic at entry granularity (the map's shard lock covers the
//! whole mutation), so [`DeviceRegistry::snapshot`] never observes a
//! half-written state. Ordering across writes is deliberately NOT this
//! module's job - the dispatch queue owns ordering.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use trakgate_proto::packet::LocationPacket;

/// Connectivity status of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    /// A session delivered a packet for this device and is still open.
    Active,
    /// The device's session closed; set only by the session teardown path.
    Offline,
}

impl DeviceStatus {
    /// Wire spelling used in observer JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Offline => "offline",
        }
    }
}

/// Last-known state of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// 15-digit IMEI; immutable for the life of the process.
    pub imei: String,
    /// Latitude in decimal degrees; absent before the first fix, never
    /// cleared once set.
    pub lat: Option<f64>,
    /// Longitude in decimal degrees; same lifecycle as `lat`.
    pub lon: Option<f64>,
    /// Speed in km/h.
    pub speed: u8,
    /// Course in degrees, 0..360.
    pub course: u16,
    /// Satellites in the last fix.
    pub satellites: u8,
    /// Real-time (vs differential) GPS flag from the last fix.
    pub realtime_gps: bool,
    /// Device-reported instant of the last fix.
    pub payload_time: Option<DateTime<Utc>>,
    /// Gateway instant the last packet was parsed.
    pub received_time: Option<DateTime<Utc>>,
    /// Instant of the last registry write for this entry.
    pub last_update: DateTime<Utc>,
    /// Connectivity status.
    pub status: DeviceStatus,
}

impl DeviceState {
    /// Fresh entry for a device that has logged in but not yet reported a
    /// fix.
    #[must_use]
    pub fn new(imei: &str) -> Self {
        Self {
            imei: imei.to_string(),
            lat: None,
            lon: None,
            speed: 0,
            course: 0,
            satellites: 0,
            realtime_gps: false,
            payload_time: None,
            received_time: None,
            last_update: Utc::now(),
            status: DeviceStatus::Active,
        }
    }

    /// Fold a decoded location packet into this entry.
    pub fn apply_location(&mut self, loc: &LocationPacket, received: DateTime<Utc>) {
        self.lat = Some(loc.latitude);
        self.lon = Some(loc.longitude);
        self.speed = loc.speed_kmh;
        self.course = loc.course_deg;
        self.satellites = loc.satellites;
        self.realtime_gps = loc.realtime_gps;
        self.payload_time = Some(loc.fix_time);
        self.received_time = Some(received);
        self.status = DeviceStatus::Active;
    }
}

/// Concurrent map of IMEI to last-known state.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: DashMap<String, DeviceState>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent create: returns the existing entry (re-marked active) or
    /// a fresh one. Prior coordinates survive a re-login.
    pub fn get_or_create(&self, imei: &str) -> DeviceState {
        let mut entry = self
            .devices
            .entry(imei.to_string())
            .or_insert_with(|| DeviceState::new(imei));
        entry.status = DeviceStatus::Active;
        entry.last_update = Utc::now();
        entry.value().clone()
    }

    /// Unconditional replacement of a device's entry.
    pub fn put(&self, mut state: DeviceState) {
        state.last_update = Utc::now();
        self.devices.insert(state.imei.clone(), state);
    }

    /// Atomically mutate (creating if needed) the entry for `imei` and
    /// return the state as written. The closure runs under the entry lock,
    /// so concurrent snapshots see either the old or the new state, never a
    /// partial one.
    pub fn update<F>(&self, imei: &str, mutate: F) -> DeviceState
    where
        F: FnOnce(&mut DeviceState),
    {
        let mut entry = self
            .devices
            .entry(imei.to_string())
            .or_insert_with(|| DeviceState::new(imei));
        mutate(&mut entry);
        entry.last_update = Utc::now();
        entry.value().clone()
    }

    /// Session teardown: flip the entry to offline. Returns the state as
    /// written, or `None` for an IMEI that was never registered.
    pub fn mark_offline(&self, imei: &str) -> Option<DeviceState> {
        let mut entry = self.devices.get_mut(imei)?;
        entry.status = DeviceStatus::Offline;
        entry.last_update = Utc::now();
        Some(entry.value().clone())
    }

    /// Current state of one device.
    #[must_use]
    pub fn get(&self, imei: &str) -> Option<DeviceState> {
        self.devices.get(imei).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every entry, for new-observer onboarding.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceState> {
        self.devices
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
