// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! GT06 stream framing codec.
//!
//! TCP delivers bytes, not messages. This codec accumulates socket reads and
//! splits them into GT06 frames:
//!
//! ```text
//! +------+------+--------+----------+---------+----------+--------+------+
//! | 0x78 | 0x78 | length | protocol | payload | serial   | crc    | 0x0D |
//! |      |      | (u8)   | (u8)     | (...)   | (u16 BE) | (u16)  | 0x0A |
//! +------+------+--------+----------+---------+----------+--------+------+
//! ```
//!
//! - `length` counts every byte from `protocol` through `crc` inclusive, so
//!   a frame occupies `length + 5` bytes on the wire.
//! - The CRC (see [`crate::crc`]) covers `length` through `serial` inclusive.
//!
//! The codec keeps any partial tail buffered for the next read and
//! resynchronizes on garbage by scanning forward to the next `0x78 0x78`,
//! without ever discarding a valid prefix that straddles two reads.

use crate::crc::crc16_itu;

/// Frame start marker.
pub const FRAME_PREFIX: [u8; 2] = [0x78, 0x78];

/// Frame end marker.
pub const FRAME_SUFFIX: [u8; 2] = [0x0D, 0x0A];

/// Smallest legal value of the length byte (protocol + serial + crc).
pub const MIN_CONTENT_LEN: u8 = 5;

/// Bytes a frame occupies beyond its length byte's count.
pub const FRAME_OVERHEAD: usize = 5;

/// Wire size of an ACK frame.
pub const ACK_LEN: usize = 10;

/// A complete GT06 frame, decoded from the stream.
///
/// Allocated per inbound packet and consumed immediately; never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw value of the length byte.
    pub length: u8,
    /// Protocol number (0x01 login, 0x12 location, 0x13 heartbeat, ...).
    pub protocol: u8,
    /// Payload bytes between the protocol number and the serial.
    pub payload: Vec<u8>,
    /// Trailing serial number, echoed back in the ACK.
    pub serial: u16,
}

/// Error while splitting the stream into frames.
///
/// Every variant leaves the codec positioned past the offending bytes, so
/// the caller can keep calling [`FrameCodec::next_frame`] on the same
/// session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Leading bytes were not `0x78 0x78`; `skipped` bytes were discarded
    /// scanning forward to the next candidate prefix.
    Resync { skipped: usize },
    /// Length byte below the legal minimum; position is unrecoverable.
    BadLength(u8),
    /// Frame did not end with `0x0D 0x0A`.
    BadTerminator,
    /// Stored CRC did not match the computed one.
    CrcMismatch { expected: u16, found: u16 },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resync { skipped } => {
                write!(f, "resynchronized, skipped {} bytes", skipped)
            }
            Self::BadLength(len) => write!(f, "impossible frame length {}", len),
            Self::BadTerminator => write!(f, "missing 0x0D 0x0A terminator"),
            Self::CrcMismatch { expected, found } => {
                write!(f, "crc mismatch: expected {:#06X}, found {:#06X}", expected, found)
            }
        }
    }
}

impl std::error::Error for FrameError {}

/// Stateful GT06 frame splitter.
///
/// One codec per device session. Feed it raw socket bytes with
/// [`feed`](Self::feed), then drain complete frames with
/// [`next_frame`](Self::next_frame) until it returns `Ok(None)`.
///
/// The codec is pure byte-in/frame-out and carries no per-device protocol
/// state.
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Accumulated, not-yet-consumed stream bytes.
    buf: Vec<u8>,

    /// Read position in `buf`.
    pos: usize,

    /// Statistics: frames decoded.
    frames_decoded: u64,

    /// Statistics: frames rejected (bad length, terminator or CRC).
    frames_rejected: u64,

    /// Statistics: garbage bytes skipped during resync.
    bytes_skipped: u64,
}

impl FrameCodec {
    /// Create an empty codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append raw stream bytes to the accumulator.
    pub fn feed(&mut self, data: &[u8]) {
        // Compact once the consumed prefix dominates the buffer.
        if self.pos > 0 && self.pos > self.buf.len() / 2 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Get number of frames successfully decoded.
    #[must_use]
    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    /// Get number of frames rejected.
    #[must_use]
    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Get total garbage bytes skipped while resynchronizing.
    #[must_use]
    pub fn bytes_skipped(&self) -> u64 {
        self.bytes_skipped
    }

    /// Drop all buffered bytes (e.g. after a session reset).
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    /// Try to extract the next complete frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - a complete, CRC-valid frame
    /// - `Ok(None)` - need more data
    /// - `Err(e)` - the stream was damaged at the current position; the
    ///   offending bytes are already consumed, call again
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        let avail = &self.buf[self.pos..];
        if avail.len() < 2 {
            return Ok(None);
        }

        match find_prefix(avail) {
            Some(0) => {}
            Some(at) => {
                self.pos += at;
                self.bytes_skipped += at as u64;
                return Err(FrameError::Resync { skipped: at });
            }
            None => {
                // No prefix in sight. Keep a lone trailing 0x78: it may be
                // the first half of a prefix split across two reads.
                let keep = usize::from(avail[avail.len() - 1] == FRAME_PREFIX[0]);
                let skip = avail.len() - keep;
                self.pos += skip;
                self.bytes_skipped += skip as u64;
                return Err(FrameError::Resync { skipped: skip });
            }
        }

        if avail.len() < 3 {
            return Ok(None);
        }

        let length = avail[2];
        if length < MIN_CONTENT_LEN {
            // The position cannot hold a frame; drop the prefix and rescan.
            self.pos += 2;
            self.bytes_skipped += 2;
            self.frames_rejected += 1;
            return Err(FrameError::BadLength(length));
        }

        let total = length as usize + FRAME_OVERHEAD;
        if avail.len() < total {
            return Ok(None);
        }

        if avail[total - 2..total] != FRAME_SUFFIX {
            self.pos += total;
            self.frames_rejected += 1;
            return Err(FrameError::BadTerminator);
        }

        let expected = crc16_itu(&avail[2..total - 4]);
        let found = u16::from_be_bytes([avail[total - 4], avail[total - 3]]);
        if expected != found {
            self.pos += total;
            self.frames_rejected += 1;
            return Err(FrameError::CrcMismatch { expected, found });
        }

        let frame = Frame {
            length,
            protocol: avail[3],
            payload: avail[4..total - 6].to_vec(),
            serial: u16::from_be_bytes([avail[total - 6], avail[total - 5]]),
        };

        self.pos += total;
        self.frames_decoded += 1;
        Ok(Some(frame))
    }
}

/// Find the first `0x78 0x78` in `buf`.
fn find_prefix(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == FRAME_PREFIX)
}

/// Encode the ACK for a received frame.
///
/// `0x78 0x78 | 0x05 | protocol | serial | crc | 0x0D 0x0A`, with the CRC
/// over the length byte through the serial, inclusive. The bytes are fully
/// determined by the echoed protocol number and serial.
#[must_use]
pub fn encode_ack(protocol: u8, serial: u16) -> [u8; ACK_LEN] {
    let mut ack = [0u8; ACK_LEN];
    ack[0..2].copy_from_slice(&FRAME_PREFIX);
    ack[2] = MIN_CONTENT_LEN;
    ack[3] = protocol;
    ack[4..6].copy_from_slice(&serial.to_be_bytes());
    let crc = crc16_itu(&ack[2..6]);
    ack[6..8].copy_from_slice(&crc.to_be_bytes());
    ack[8..10].copy_from_slice(&FRAME_SUFFIX);
    ack
}

#[cfg(test)]
mod tests {
    use super::*;

    /// CRC-valid login frame for IMEI 0868022038531725, serial 0x0001.
    const LOGIN: [u8; 18] = [
        0x78, 0x78, 0x0D, 0x01, 0x08, 0x68, 0x02, 0x20, 0x38, 0x53, 0x17, 0x25, 0x00, 0x01, 0xE1,
        0x7C, 0x0D, 0x0A,
    ];

    /// CRC-valid heartbeat frame, serial 0x0003.
    const HEARTBEAT: [u8; 10] = [0x78, 0x78, 0x05, 0x13, 0x00, 0x03, 0xCA, 0xE3, 0x0D, 0x0A];

    #[test]
    fn decode_login_frame() {
        let mut codec = FrameCodec::new();
        codec.feed(&LOGIN);

        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.length, 0x0D);
        assert_eq!(frame.protocol, 0x01);
        assert_eq!(frame.payload, &LOGIN[4..12]);
        assert_eq!(frame.serial, 0x0001);
        assert_eq!(codec.frames_decoded(), 1);
        assert_eq!(codec.pending(), 0);

        // Nothing left.
        assert_eq!(codec.next_frame().unwrap(), None);
    }

    #[test]
    fn decode_two_frames_one_read() {
        let mut codec = FrameCodec::new();
        let mut stream = Vec::new();
        stream.extend_from_slice(&LOGIN);
        stream.extend_from_slice(&HEARTBEAT);
        codec.feed(&stream);

        assert_eq!(codec.next_frame().unwrap().unwrap().protocol, 0x01);
        assert_eq!(codec.next_frame().unwrap().unwrap().protocol, 0x13);
        assert_eq!(codec.next_frame().unwrap(), None);
        assert_eq!(codec.frames_decoded(), 2);
    }

    #[test]
    fn frame_straddles_two_reads() {
        let mut codec = FrameCodec::new();
        codec.feed(&LOGIN[..7]);
        assert_eq!(codec.next_frame().unwrap(), None);

        codec.feed(&LOGIN[7..]);
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.protocol, 0x01);
        assert_eq!(frame.serial, 0x0001);
    }

    #[test]
    fn resync_on_leading_garbage() {
        let mut codec = FrameCodec::new();
        let mut stream = vec![0xFF, 0xFF];
        stream.extend_from_slice(&LOGIN);
        codec.feed(&stream);

        assert_eq!(codec.next_frame(), Err(FrameError::Resync { skipped: 2 }));
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.protocol, 0x01);
        assert_eq!(codec.bytes_skipped(), 2);
    }

    #[test]
    fn resync_keeps_split_prefix() {
        let mut codec = FrameCodec::new();
        // Garbage ending in a single 0x78: the next read completes a prefix.
        codec.feed(&[0xAA, 0xBB, 0x78]);
        assert_eq!(codec.next_frame(), Err(FrameError::Resync { skipped: 2 }));
        assert_eq!(codec.next_frame().unwrap(), None);

        codec.feed(&LOGIN[1..]);
        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.protocol, 0x01);
    }

    #[test]
    fn rejects_impossible_length() {
        let mut codec = FrameCodec::new();
        codec.feed(&[0x78, 0x78, 0x02, 0x01, 0x0D, 0x0A]);

        assert_eq!(codec.next_frame(), Err(FrameError::BadLength(0x02)));
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn rejects_bad_terminator() {
        let mut bytes = LOGIN;
        bytes[16] = 0x00;
        let mut codec = FrameCodec::new();
        codec.feed(&bytes);

        assert_eq!(codec.next_frame(), Err(FrameError::BadTerminator));
        // The damaged frame is consumed; the stream stays usable.
        codec.feed(&HEARTBEAT);
        assert_eq!(codec.next_frame().unwrap().unwrap().protocol, 0x13);
    }

    #[test]
    fn rejects_bad_crc() {
        let mut bytes = LOGIN;
        bytes[14] ^= 0xFF;
        let mut codec = FrameCodec::new();
        codec.feed(&bytes);

        match codec.next_frame() {
            Err(FrameError::CrcMismatch { expected, found }) => {
                assert_eq!(expected, 0xE17C);
                assert_ne!(expected, found);
            }
            other => panic!("expected CrcMismatch, got {:?}", other),
        }
        assert_eq!(codec.frames_rejected(), 1);
    }

    #[test]
    fn login_ack_bytes() {
        let ack = encode_ack(0x01, 0x0001);
        assert_eq!(
            ack,
            [0x78, 0x78, 0x05, 0x01, 0x00, 0x01, 0xD9, 0xDC, 0x0D, 0x0A]
        );
    }

    #[test]
    fn heartbeat_ack_bytes() {
        let ack = encode_ack(0x13, 0x0003);
        assert_eq!(
            ack,
            [0x78, 0x78, 0x05, 0x13, 0x00, 0x03, 0xCA, 0xE3, 0x0D, 0x0A]
        );
    }

    #[test]
    fn ack_round_trips_through_codec() {
        // An ACK is itself a valid frame; decode(encode(ack)) must agree.
        let ack = encode_ack(0x12, 0x0026);
        let mut codec = FrameCodec::new();
        codec.feed(&ack);

        let frame = codec.next_frame().unwrap().unwrap();
        assert_eq!(frame.protocol, 0x12);
        assert_eq!(frame.serial, 0x0026);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn byte_at_a_time_feed() {
        let mut codec = FrameCodec::new();
        let mut got = None;
        for &b in &HEARTBEAT {
            codec.feed(&[b]);
            if let Some(frame) = codec.next_frame().unwrap() {
                got = Some(frame);
            }
        }
        assert_eq!(got.unwrap().protocol, 0x13);
    }
}
