// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 trakgate.dev

//! GT06 packet decoding.
//!
//! Decodes frame payloads into a closed set of typed records, dispatched on
//! the protocol number:
//!
//! | Protocol | Packet |
//! |----------|--------|
//! | 0x01 | [`Packet::Login`] - BCD-encoded IMEI |
//! | 0x12 | [`Packet::Location`] - UTC fix time, position, speed, course |
//! | 0x13 | [`Packet::Heartbeat`] - keepalive, no fields |
//! | other | [`Packet::Unknown`] - protocol byte carried for logging |
//!
//! The parser performs no I/O. Numeric conversion is exact: raw coordinates
//! are divided by 1,800,000 without prior rounding, so a zero raw value
//! decodes to exactly 0.0.

use crate::frame::Frame;
use chrono::{DateTime, NaiveDate, Utc};

/// Login packet protocol number.
pub const PROTO_LOGIN: u8 = 0x01;

/// Location packet protocol number.
pub const PROTO_LOCATION: u8 = 0x12;

/// Heartbeat packet protocol number.
pub const PROTO_HEARTBEAT: u8 = 0x13;

/// Raw coordinate units per decimal degree.
const DEGREE_SCALE: f64 = 1_800_000.0;

/// Course/status word: low 10 bits are the course.
const COURSE_MASK: u16 = 0x03FF;

/// Course/status word: real-time GPS flag.
const REALTIME_BIT: u16 = 1 << 13;

/// Course/status word: southern-latitude flag (flag-bit hemisphere mode).
const SOUTH_BIT: u16 = 1 << 10;

/// Course/status word: western-longitude flag (flag-bit hemisphere mode).
const WEST_BIT: u16 = 1 << 11;

/// How S/W hemispheres are encoded by the device fleet.
///
/// Most GT06 firmware emits latitude/longitude as signed 32-bit values;
/// some variants emit magnitudes and signal hemisphere through the
/// course/status word instead. There is no way to detect which variant a
/// device speaks, so the deployment chooses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HemisphereMode {
    /// Trust the sign of the raw 32-bit coordinate (the default).
    #[default]
    Signed,
    /// Treat coordinates as magnitudes; course-word bit 10 means south,
    /// bit 11 means west.
    FlagBits,
}

/// A decoded login packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginPacket {
    /// 15-digit decimal IMEI decoded from BCD.
    pub imei: String,
    /// Frame serial, echoed in the ACK.
    pub serial: u16,
}

/// A decoded location packet.
///
/// Course is the low 10 bits of the course/status word reduced modulo 360,
/// so the on-wire maximum of 1023 decodes to 303.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPacket {
    /// GPS fix time reported by the device, UTC.
    pub fix_time: DateTime<Utc>,
    /// Latitude in signed decimal degrees (WGS-84).
    pub latitude: f64,
    /// Longitude in signed decimal degrees (WGS-84).
    pub longitude: f64,
    /// Speed in km/h.
    pub speed_kmh: u8,
    /// Course in degrees, 0..360.
    pub course_deg: u16,
    /// Number of satellites in the fix, 0..15.
    pub satellites: u8,
    /// Real-time (vs differential) GPS flag.
    pub realtime_gps: bool,
    /// Frame serial, echoed in the ACK.
    pub serial: u16,
}

/// A packet decoded from a frame. Closed variant set; the session handler
/// dispatches on the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Login(LoginPacket),
    Location(LocationPacket),
    Heartbeat { serial: u16 },
    Unknown { protocol: u8, serial: u16 },
}

/// Error decoding a frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    /// Payload shorter than the protocol requires.
    ShortPayload {
        protocol: u8,
        expected: usize,
        found: usize,
    },
    /// BCD IMEI did not decode to 15 decimal digits.
    BadImei(String),
    /// Date-time bytes do not form a valid calendar instant.
    BadTimestamp([u8; 6]),
}

impl std::fmt::Display for PacketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortPayload {
                protocol,
                expected,
                found,
            } => write!(
                f,
                "protocol {:#04X}: payload too short, need {} bytes, got {}",
                protocol, expected, found
            ),
            Self::BadImei(digits) => write!(f, "invalid BCD imei {:?}", digits),
            Self::BadTimestamp(raw) => write!(f, "invalid timestamp bytes {:02X?}", raw),
        }
    }
}

impl std::error::Error for PacketError {}

/// Decode a frame into a typed packet.
pub fn decode(frame: &Frame, mode: HemisphereMode) -> Result<Packet, PacketError> {
    match frame.protocol {
        PROTO_LOGIN => decode_login(frame),
        PROTO_LOCATION => decode_location(frame, mode),
        PROTO_HEARTBEAT => Ok(Packet::Heartbeat {
            serial: frame.serial,
        }),
        other => Ok(Packet::Unknown {
            protocol: other,
            serial: frame.serial,
        }),
    }
}

fn decode_login(frame: &Frame) -> Result<Packet, PacketError> {
    if frame.payload.len() < 8 {
        return Err(PacketError::ShortPayload {
            protocol: PROTO_LOGIN,
            expected: 8,
            found: frame.payload.len(),
        });
    }

    let imei = decode_bcd_imei(&frame.payload[..8])?;
    Ok(Packet::Login(LoginPacket {
        imei,
        serial: frame.serial,
    }))
}

/// Decode an 8-byte BCD IMEI.
///
/// Two digits per byte, high nibble first. `0xF` nibbles are padding and
/// skipped wherever they appear. The standard encoding left-pads the 15
/// digits with a zero, so when more than 15 digits decode the leading
/// excess is dropped. Anything that does not leave exactly 15 decimal
/// digits is rejected.
fn decode_bcd_imei(bytes: &[u8]) -> Result<String, PacketError> {
    let mut digits = String::with_capacity(16);
    for &byte in bytes {
        for nibble in [byte >> 4, byte & 0x0F] {
            match nibble {
                0x0F => continue,
                0..=9 => digits.push(char::from(b'0' + nibble)),
                _ => return Err(PacketError::BadImei(format!("{:02X?}", bytes))),
            }
        }
    }

    if digits.len() > 15 {
        digits.drain(..digits.len() - 15);
    }
    if digits.len() != 15 {
        return Err(PacketError::BadImei(digits));
    }
    Ok(digits)
}

fn decode_location(frame: &Frame, mode: HemisphereMode) -> Result<Packet, PacketError> {
    let p = &frame.payload;
    if p.len() < 18 {
        return Err(PacketError::ShortPayload {
            protocol: PROTO_LOCATION,
            expected: 18,
            found: p.len(),
        });
    }

    let fix_time = decode_datetime([p[0], p[1], p[2], p[3], p[4], p[5]])?;
    let satellites = p[6] >> 4;

    let lat_raw = i32::from_be_bytes([p[7], p[8], p[9], p[10]]);
    let lon_raw = i32::from_be_bytes([p[11], p[12], p[13], p[14]]);
    let speed_kmh = p[15];
    let course_word = u16::from_be_bytes([p[16], p[17]]);

    let (latitude, longitude) = match mode {
        HemisphereMode::Signed => (
            f64::from(lat_raw) / DEGREE_SCALE,
            f64::from(lon_raw) / DEGREE_SCALE,
        ),
        HemisphereMode::FlagBits => {
            // Raw values are unsigned magnitudes in this variant.
            let lat = f64::from(lat_raw as u32) / DEGREE_SCALE;
            let lon = f64::from(lon_raw as u32) / DEGREE_SCALE;
            (
                if course_word & SOUTH_BIT != 0 { -lat } else { lat },
                if course_word & WEST_BIT != 0 { -lon } else { lon },
            )
        }
    };

    Ok(Packet::Location(LocationPacket {
        fix_time,
        latitude,
        longitude,
        speed_kmh,
        course_deg: (course_word & COURSE_MASK) % 360,
        satellites,
        realtime_gps: course_word & REALTIME_BIT != 0,
        serial: frame.serial,
    }))
}

/// Decode the 6-byte year-2000 date-time, UTC.
fn decode_datetime(bytes: [u8; 6]) -> Result<DateTime<Utc>, PacketError> {
    NaiveDate::from_ymd_opt(
        2000 + i32::from(bytes[0]),
        u32::from(bytes[1]),
        u32::from(bytes[2]),
    )
    .and_then(|d| {
        d.and_hms_opt(
            u32::from(bytes[3]),
            u32::from(bytes[4]),
            u32::from(bytes[5]),
        )
    })
    .map(|naive| naive.and_utc())
    .ok_or(PacketError::BadTimestamp(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn frame(protocol: u8, payload: &[u8], serial: u16) -> Frame {
        Frame {
            length: (payload.len() + 5) as u8,
            protocol,
            payload: payload.to_vec(),
            serial,
        }
    }

    /// Payload of a 0x12 frame: 2025-06-13 18:30:33, 9 sats, 28.3949 /
    /// 84.1240, 60 km/h, course 135 with the real-time bit set.
    const LOCATION_PAYLOAD: [u8; 18] = [
        0x19, 0x06, 0x0D, 0x12, 0x1E, 0x21, 0x95, 0x03, 0x0B, 0xE3, 0xA4, 0x09, 0x06, 0x88, 0xE0,
        0x3C, 0x20, 0x87,
    ];

    #[test]
    fn login_with_leading_zero_pad() {
        let payload = [0x08, 0x68, 0x02, 0x20, 0x38, 0x53, 0x17, 0x25];
        let packet = decode(&frame(0x01, &payload, 1), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Login(login) => {
                assert_eq!(login.imei, "868022038531725");
                assert_eq!(login.serial, 1);
            }
            other => panic!("expected Login, got {:?}", other),
        }
    }

    #[test]
    fn login_with_trailing_f_pad() {
        // 15 digits followed by one 0xF padding nibble.
        let payload = [0x12, 0x34, 0x56, 0x78, 0x90, 0x12, 0x34, 0x5F];
        let packet = decode(&frame(0x01, &payload, 2), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Login(login) => assert_eq!(login.imei, "123456789012345"),
            other => panic!("expected Login, got {:?}", other),
        }
    }

    #[test]
    fn login_rejects_non_decimal_nibble() {
        let payload = [0x0A, 0x68, 0x02, 0x20, 0x38, 0x53, 0x17, 0x25];
        let err = decode(&frame(0x01, &payload, 1), HemisphereMode::Signed).unwrap_err();
        assert!(matches!(err, PacketError::BadImei(_)));
    }

    #[test]
    fn login_rejects_short_imei() {
        // All-F padding leaves fewer than 15 digits.
        let payload = [0xFF, 0xFF, 0x02, 0x20, 0x38, 0x53, 0x17, 0x25];
        let err = decode(&frame(0x01, &payload, 1), HemisphereMode::Signed).unwrap_err();
        assert!(matches!(err, PacketError::BadImei(_)));
    }

    #[test]
    fn login_rejects_short_payload() {
        let err = decode(&frame(0x01, &[0x08, 0x68], 1), HemisphereMode::Signed).unwrap_err();
        assert!(matches!(err, PacketError::ShortPayload { .. }));
    }

    #[test]
    fn location_fields() {
        let packet = decode(&frame(0x12, &LOCATION_PAYLOAD, 0x26), HemisphereMode::Signed).unwrap();
        let loc = match packet {
            Packet::Location(loc) => loc,
            other => panic!("expected Location, got {:?}", other),
        };

        assert_eq!(
            loc.fix_time,
            Utc.with_ymd_and_hms(2025, 6, 13, 18, 30, 33).unwrap()
        );
        assert_eq!(loc.latitude, 28.3949);
        assert_eq!(loc.longitude, 84.1240);
        assert_eq!(loc.speed_kmh, 60);
        assert_eq!(loc.course_deg, 135);
        assert_eq!(loc.satellites, 9);
        assert!(loc.realtime_gps);
        assert_eq!(loc.serial, 0x26);
    }

    #[test]
    fn location_zero_coordinates_are_exact() {
        let mut payload = LOCATION_PAYLOAD;
        payload[7..15].fill(0);
        let packet = decode(&frame(0x12, &payload, 1), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Location(loc) => {
                assert_eq!(loc.latitude, 0.0);
                assert_eq!(loc.longitude, 0.0);
            }
            other => panic!("expected Location, got {:?}", other),
        }
    }

    #[test]
    fn location_negative_signed_latitude() {
        let mut payload = LOCATION_PAYLOAD;
        // -33.86 degrees = -60948000 raw.
        payload[7..11].copy_from_slice(&(-60_948_000i32).to_be_bytes());
        let packet = decode(&frame(0x12, &payload, 1), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Location(loc) => assert_eq!(loc.latitude, -33.86),
            other => panic!("expected Location, got {:?}", other),
        }
    }

    #[test]
    fn location_course_1023_wraps_to_303() {
        let mut payload = LOCATION_PAYLOAD;
        payload[16..18].copy_from_slice(&0x03FFu16.to_be_bytes());
        let packet = decode(&frame(0x12, &payload, 1), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Location(loc) => {
                assert_eq!(loc.course_deg, 303);
                assert!(!loc.realtime_gps);
            }
            other => panic!("expected Location, got {:?}", other),
        }
    }

    #[test]
    fn location_flag_bit_hemispheres() {
        let mut payload = LOCATION_PAYLOAD;
        // Course 90 with south + west flags set.
        payload[16..18].copy_from_slice(&(0x0400u16 | 0x0800 | 90).to_be_bytes());
        let packet = decode(&frame(0x12, &payload, 1), HemisphereMode::FlagBits).unwrap();
        match packet {
            Packet::Location(loc) => {
                assert_eq!(loc.latitude, -28.3949);
                assert_eq!(loc.longitude, -84.1240);
                assert_eq!(loc.course_deg, 90);
            }
            other => panic!("expected Location, got {:?}", other),
        }

        // Same payload under signed mode keeps the raw signs.
        let packet = decode(&frame(0x12, &payload, 1), HemisphereMode::Signed).unwrap();
        match packet {
            Packet::Location(loc) => {
                assert_eq!(loc.latitude, 28.3949);
                assert_eq!(loc.longitude, 84.1240);
            }
            other => panic!("expected Location, got {:?}", other),
        }
    }

    #[test]
    fn location_rejects_bad_month() {
        let mut payload = LOCATION_PAYLOAD;
        payload[1] = 13;
        let err = decode(&frame(0x12, &payload, 1), HemisphereMode::Signed).unwrap_err();
        assert!(matches!(err, PacketError::BadTimestamp(_)));
    }

    #[test]
    fn location_rejects_short_payload() {
        let err =
            decode(&frame(0x12, &LOCATION_PAYLOAD[..10], 1), HemisphereMode::Signed).unwrap_err();
        assert!(matches!(
            err,
            PacketError::ShortPayload {
                protocol: 0x12,
                expected: 18,
                ..
            }
        ));
    }

    #[test]
    fn heartbeat_and_unknown() {
        assert_eq!(
            decode(&frame(0x13, &[], 3), HemisphereMode::Signed).unwrap(),
            Packet::Heartbeat { serial: 3 }
        );
        assert_eq!(
            decode(&frame(0x8A, &[], 5), HemisphereMode::Signed).unwrap(),
            Packet::Unknown {
                protocol: 0x8A,
                serial: 5
            }
        );
    }
}
