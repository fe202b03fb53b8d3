// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Observer-facing JSON protocol.
//!
//! One JSON document per WebSocket text frame:
//!
//! ```json
//! // server -> new observer, once
//! {"type": "initial_state", "data": [{"imei": "...", "lat": 28.39, ...}]}
//!
//! // server -> observer, per broadcast
//! {"type": "update", "data": {"imei": "...", "lat": 28.39, ...}}
//!
//! // observer -> server: same document, treated as synthetic ingress
//! {"type": "update", "data": {"imei": "...", "lat": 1.0, ...}}
//! ```
//!
//! Unknown `type` values deserialize to [`WsMessage::Other`] and are
//! ignored by the endpoint.

use crate::registry::{DeviceState, DeviceStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A framed observer message, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Full registry snapshot; an observer's first message.
    InitialState { data: Vec<DeviceStateJson> },

    /// One device changed.
    Update { data: DeviceStateJson },

    /// Anything else; ignored on receive, never sent.
    #[serde(other)]
    Other,
}

/// Wire form of a device's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStateJson {
    pub imei: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course: Option<f64>,

    /// Device-reported fix instant, ISO-8601 UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,

    /// Instant of the last registry write, ISO-8601 UTC.
    #[serde(default, rename = "lastUpdate", skip_serializing_if = "Option::is_none")]
    pub last_update: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl DeviceStateJson {
    /// Wire form of a registry entry.
    #[must_use]
    pub fn from_state(state: &DeviceState) -> Self {
        Self {
            imei: state.imei.clone(),
            lat: state.lat,
            lon: state.lon,
            speed: Some(f64::from(state.speed)),
            course: Some(f64::from(state.course)),
            datetime: state.payload_time,
            last_update: Some(state.last_update),
            status: Some(state.status.as_str().to_string()),
        }
    }

    /// Fold this document into a registry entry (synthetic ingress).
    ///
    /// Present fields overwrite; absent fields leave the entry alone, so an
    /// observer can never clear a coordinate. Out-of-range speed and course
    /// values are clamped/wrapped into the ranges devices can produce. The
    /// entry always comes out active: like a device-originated location,
    /// a synthetic update never takes a device offline - only its session
    /// teardown does.
    pub fn merge_into(&self, state: &mut DeviceState, received: DateTime<Utc>) {
        if let Some(lat) = self.lat {
            state.lat = Some(lat);
        }
        if let Some(lon) = self.lon {
            state.lon = Some(lon);
        }
        if let Some(speed) = self.speed {
            state.speed = speed.clamp(0.0, 255.0) as u8;
        }
        if let Some(course) = self.course {
            state.course = (course.rem_euclid(360.0)) as u16;
        }
        if let Some(datetime) = self.datetime {
            state.payload_time = Some(datetime);
        }
        state.received_time = Some(received);
        state.status = DeviceStatus::Active;
    }
}

impl WsMessage {
    /// Snapshot message for a freshly registered observer.
    #[must_use]
    pub fn initial_state(states: &[DeviceState]) -> Self {
        Self::InitialState {
            data: states.iter().map(DeviceStateJson::from_state).collect(),
        }
    }

    /// Broadcast message for one changed device.
    #[must_use]
    pub fn update(state: &DeviceState) -> Self {
        Self::Update {
            data: DeviceStateJson::from_state(state),
        }
    }
}

/// IMEIs are decimal strings of exactly 15 digits; synthetic ingress that
/// does not respect this is dropped.
#[must_use]
pub fn is_valid_imei(imei: &str) -> bool {
    imei.len() == 15 && imei.bytes().all(|b| b.is_ascii_digit())
}
