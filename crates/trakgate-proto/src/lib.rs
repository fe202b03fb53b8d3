// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! GT06 wire protocol for trakgate.
//!
//! The GT06 family is the binary protocol spoken by inexpensive vehicle GPS
//! trackers: frames delimited by a `0x78 0x78` prefix and `0x0D 0x0A`
//! suffix, typed by a one-byte protocol number, integrity-checked with
//! CRC-ITU, and acknowledged frame by frame.
//!
//! This crate is the pure byte layer - no sockets, no async, no logging:
//!
//! - [`frame`] - splitting a TCP byte stream into frames, encoding ACKs
//! - [`packet`] - decoding login / location / heartbeat payloads
//! - [`crc`] - the CRC-ITU (CRC-16/X-25) checksum
//!
//! # Example
//!
//! ```
//! use trakgate_proto::frame::{encode_ack, FrameCodec};
//! use trakgate_proto::packet::{self, HemisphereMode, Packet};
//!
//! let mut codec = FrameCodec::new();
//! codec.feed(&[
//!     0x78, 0x78, 0x0D, 0x01, 0x08, 0x68, 0x02, 0x20, 0x38, 0x53, 0x17,
//!     0x25, 0x00, 0x01, 0xE1, 0x7C, 0x0D, 0x0A,
//! ]);
//!
//! let frame = codec.next_frame().unwrap().unwrap();
//! let ack = encode_ack(frame.protocol, frame.serial);
//! match packet::decode(&frame, HemisphereMode::Signed).unwrap() {
//!     Packet::Login(login) => assert_eq!(login.imei, "868022038531725"),
//!     _ => unreachable!(),
//! }
//! assert_eq!(ack[..4], [0x78, 0x78, 0x05, 0x01]);
//! ```

pub mod crc;
pub mod frame;
pub mod packet;

pub use frame::{encode_ack, Frame, FrameCodec, FrameError};
pub use packet::{decode, HemisphereMode, LocationPacket, LoginPacket, Packet, PacketError};
