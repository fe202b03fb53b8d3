// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! Device session handling.
//!
//! One session per accepted GT06 TCP connection. The session owns the
//! socket and the IMEI binding; the registry never references the session,
//! so a device stays visible to observers after its socket dies.
//!
//! State machine:
//!
//! ```text
//! NEW -- login-ok --> AUTHENTICATED -- location/heartbeat --> AUTHENTICATED
//!  |                        |
//!  |                        +-- close/error/idle --> CLOSED (mark offline)
//!  +-- close --> CLOSED
//! ```
//!
//! Pre-login location and heartbeat packets are dropped without an ACK. A
//! damaged or undecodable frame skips that frame only; a socket write
//! failure ends the session. Devices retransmit - nothing is retried here.

use crate::server::AppState;
use chrono::Utc;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};
use trakgate_proto::frame::{encode_ack, Frame, FrameCodec, FrameError};
use trakgate_proto::packet::{self, Packet, PROTO_HEARTBEAT, PROTO_LOCATION, PROTO_LOGIN};
use uuid::Uuid;

/// Read buffer size per device connection.
const READ_BUF_LEN: usize = 2048;

/// A live device connection.
pub struct DeviceSession {
    /// Short id for log correlation.
    session_id: String,
    /// Bound after a valid login; `None` while in NEW.
    imei: Option<String>,
    codec: FrameCodec,
}

impl DeviceSession {
    #[must_use]
    pub fn new() -> Self {
        let session_id = Uuid::new_v4().to_string()[..8].to_string();
        Self {
            session_id,
            imei: None,
            codec: FrameCodec::new(),
        }
    }

    /// Run the session until the peer disconnects, the idle timeout fires,
    /// a write fails, or shutdown is signalled. Always leaves the registry
    /// consistent (offline transition + final update when an IMEI was
    /// bound).
    pub async fn run<S>(
        mut self,
        mut stream: S,
        state: Arc<AppState>,
        mut shutdown: watch::Receiver<bool>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let idle = Duration::from_secs(state.config.device_idle_secs);
        let mut buf = [0u8; READ_BUF_LEN];

        loop {
            let read = tokio::select! {
                _ = shutdown.changed() => {
                    info!("[{}] closing for shutdown", self.session_id);
                    break;
                }
                read = timeout(idle, stream.read(&mut buf)) => read,
            };

            let n = match read {
                Err(_) => {
                    info!("[{}] idle timeout, closing", self.session_id);
                    break;
                }
                Ok(Ok(0)) => {
                    info!("[{}] connection closed by peer", self.session_id);
                    break;
                }
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    info!("[{}] read failed: {}", self.session_id, e);
                    break;
                }
            };

            self.codec.feed(&buf[..n]);
            if !self.drain_frames(&mut stream, &state).await {
                break;
            }
        }

        self.teardown(&state);
    }

    /// Decode and handle every complete frame in the codec buffer.
    /// Returns `false` when the session must end (write failure).
    async fn drain_frames<S>(&mut self, stream: &mut S, state: &Arc<AppState>) -> bool
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            match self.codec.next_frame() {
                Ok(Some(frame)) => {
                    if let Err(e) = self.handle_frame(&frame, stream, state).await {
                        info!("[{}] write failed, closing: {}", self.session_id, e);
                        return false;
                    }
                }
                Ok(None) => return true,
                Err(FrameError::Resync { skipped }) => {
                    debug!("[{}] resync: skipped {} bytes", self.session_id, skipped);
                }
                Err(e) => {
                    warn!("[{}] dropped damaged frame: {}", self.session_id, e);
                }
            }
        }
    }

    /// Dispatch one decoded frame. `Err` means the ACK write failed.
    async fn handle_frame<S>(
        &mut self,
        frame: &Frame,
        stream: &mut S,
        state: &Arc<AppState>,
    ) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let packet = match packet::decode(frame, state.config.hemisphere_mode()) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(
                    "[{}] undecodable frame (protocol {:#04X}): {}",
                    self.session_id, frame.protocol, e
                );
                return Ok(());
            }
        };

        match packet {
            Packet::Login(login) => {
                state.registry.get_or_create(&login.imei);
                stream
                    .write_all(&encode_ack(PROTO_LOGIN, login.serial))
                    .await?;
                info!("[{}] device {} logged in", self.session_id, login.imei);
                self.imei = Some(login.imei);
            }
            Packet::Location(loc) => {
                let Some(imei) = self.imei.clone() else {
                    warn!(
                        "[{}] location before login, dropped (serial {})",
                        self.session_id, loc.serial
                    );
                    return Ok(());
                };
                stream
                    .write_all(&encode_ack(PROTO_LOCATION, loc.serial))
                    .await?;

                let received = Utc::now();
                let committed = state
                    .registry
                    .update(&imei, |entry| entry.apply_location(&loc, received));
                state.dispatcher.enqueue(committed);
                debug!(
                    "[{}] {} at {:.5},{:.5}",
                    self.session_id, imei, loc.latitude, loc.longitude
                );
            }
            Packet::Heartbeat { serial } => {
                if self.imei.is_none() {
                    warn!("[{}] heartbeat before login, dropped", self.session_id);
                    return Ok(());
                }
                stream.write_all(&encode_ack(PROTO_HEARTBEAT, serial)).await?;
                debug!("[{}] heartbeat", self.session_id);
            }
            Packet::Unknown { protocol, .. } => {
                warn!(
                    "[{}] unhandled protocol {:#04X}, no ack",
                    self.session_id, protocol
                );
            }
        }

        Ok(())
    }

    /// Publish the offline transition if an IMEI was bound.
    fn teardown(&self, state: &Arc<AppState>) {
        if let Some(imei) = &self.imei {
            if let Some(offline) = state.registry.mark_offline(imei) {
                state.dispatcher.enqueue(offline);
            }
            info!("[{}] device {} offline", self.session_id, imei);
        } else {
            debug!("[{}] session ended before login", self.session_id);
        }
    }
}

impl Default for DeviceSession {
    fn default() -> Self {
        Self::new()
    }
}
