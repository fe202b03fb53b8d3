// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! trakgate gateway - real-time GT06 tracker ingestion.
//!
//! Devices stream binary GT06 packets over long-lived TCP sessions; the
//! gateway decodes and acknowledges them, keeps the last-known state per
//! IMEI, and fans updates out to WebSocket observers in strict per-device
//! order. Observers may also inject synthetic updates (simulation mode)
//! through the same pipeline.
//!
//! ```text
//! device bytes -> frame codec -> packet parser -> session (ACK, bind IMEI)
//!   -> registry commit + per-IMEI queue -> drainer -> hub -> observers
//! ```
//!
//! The modules mirror that flow: [`device`] owns sessions, [`registry`]
//! the last-known states, [`dispatch`] the per-IMEI FIFO / exclusive
//! drainer, [`hub`] the observer set, [`observer`] and [`protocol`] the
//! WebSocket side, [`server`] the listeners and lifecycle, [`config`] the
//! flag/env surface. The wire protocol itself lives in `trakgate-proto`.

pub mod config;
pub mod device;
pub mod dispatch;
pub mod hub;
pub mod observer;
pub mod protocol;
pub mod registry;
pub mod server;
