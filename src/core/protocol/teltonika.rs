//! Teltonika Codec8 protocol (1-byte length variant)
//!
//! Login handshake: 2-byte big-endian length followed by an ASCII-digit IMEI,
//! acked with a single `0x01` byte. Data frames: four zero preamble bytes, a
//! 1-byte data length, the Codec8 body, and a 2-byte CRC-16/ARC over the body.
//! The data ack echoes the record count as one byte.
//!
//! GPS fields (lon/lat/alt/angle/sats/speed) are big-endian and mapped
//! unscaled; the FM1200 variant applies degree scaling instead.

use crate::core::checksum::crc16_arc;
use crate::core::error::GatewayError;
use crate::core::protocol::cursor::ByteCursor;
use crate::core::protocol::{FrameOutcome, Login, Protocol};
use crate::core::session::ProtocolSession;
use crate::core::status::{
    CanonicalStatusRecord, DeviceFamily, GpsPosition, RawPayload, VehicleStatus,
};
use crate::core::stream::FrameReader;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::BTreeMap;
use tokio::io::AsyncRead;

/// Codec id this family speaks
const CODEC_8: u8 = 0x08;

/// Login ack byte
pub const LOGIN_ACK: [u8; 1] = [0x01];

// Property ids mapped into the canonical record
const IO_ODOMETER: u8 = 16;
const IO_BATTERY_LEVEL: u8 = 113;
const IO_IGNITION: u8 = 239;
const IO_GREEN_DRIVING: u8 = 253;
const IO_OVERSPEED: u8 = 255;

/// Teltonika Codec8 state machine
#[derive(Debug, Default)]
pub struct Teltonika;

impl Teltonika {
    /// Create the state machine
    pub fn new() -> Self {
        Self
    }
}

/// Width-bucketed IO element maps (1/2/4/8-byte values keyed by property id)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IoElements {
    /// 1-byte properties
    pub one: BTreeMap<u8, u8>,
    /// 2-byte properties
    pub two: BTreeMap<u8, u16>,
    /// 4-byte properties
    pub four: BTreeMap<u8, u32>,
    /// 8-byte properties
    pub eight: BTreeMap<u8, u64>,
}

impl IoElements {
    /// Total number of decoded properties across all widths
    pub fn len(&self) -> usize {
        self.one.len() + self.two.len() + self.four.len() + self.eight.len()
    }

    /// True when no properties were reported
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One decoded Codec8 AVL record, before canonical mapping
#[derive(Debug, Clone, PartialEq)]
pub struct Codec8Record {
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    /// Record priority
    pub priority: u8,
    /// Raw longitude field
    pub longitude: i32,
    /// Raw latitude field
    pub latitude: i32,
    /// Altitude in meters
    pub altitude: u16,
    /// Course in degrees
    pub angle: u16,
    /// Satellites in fix
    pub satellites: u8,
    /// Speed in km/h
    pub speed: u16,
    /// Event property id that triggered the record
    pub event_id: u8,
    /// Width-bucketed IO elements
    pub io: IoElements,
}

impl Codec8Record {
    /// Record timestamp as UTC
    pub fn timestamp(&self) -> Result<DateTime<Utc>, GatewayError> {
        Utc.timestamp_millis_opt(self.timestamp_ms as i64)
            .single()
            .ok_or_else(|| {
                GatewayError::BadPacket(format!("timestamp {} ms out of range", self.timestamp_ms))
            })
    }
}

/// Try to read the shared Teltonika/FM1200 IMEI login from `buf`.
///
/// Returns the IMEI and the number of bytes the handshake occupies, or `None`
/// when the window does not look like an IMEI login.
pub(crate) fn parse_imei_login(buf: &[u8]) -> Option<(String, usize)> {
    if buf.len() < 2 {
        return None;
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    // IMEIs are 15 digits; tolerate shortened test ids but not arbitrary text
    if !(8..=17).contains(&len) || buf.len() < 2 + len {
        return None;
    }
    let imei = &buf[2..2 + len];
    if !imei.iter().all(u8::is_ascii_digit) {
        return None;
    }
    // Safe: all ASCII digits
    Some((String::from_utf8_lossy(imei).into_owned(), 2 + len))
}

/// Parse a Codec8 body: codec id, record count, records, trailing count.
pub(crate) fn parse_codec8_body(data: &[u8]) -> Result<Vec<Codec8Record>, GatewayError> {
    let mut cur = ByteCursor::new(data);

    let codec = cur.take_u8()?;
    if codec != CODEC_8 {
        return Err(GatewayError::BadPacket(format!(
            "unsupported codec id {codec:#04x}"
        )));
    }

    let count = cur.take_u8()? as usize;
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        records.push(parse_record(&mut cur)?);
    }

    let trailing = cur.take_u8()? as usize;
    if trailing != count {
        return Err(GatewayError::BadPacket(format!(
            "record count mismatch: header {count}, trailer {trailing}"
        )));
    }
    if cur.remaining() != 0 {
        return Err(GatewayError::BadPacket(format!(
            "{} unparsed bytes after codec8 body",
            cur.remaining()
        )));
    }

    Ok(records)
}

fn parse_record(cur: &mut ByteCursor<'_>) -> Result<Codec8Record, GatewayError> {
    let timestamp_ms = cur.take_u64()?;
    let priority = cur.take_u8()?;
    let longitude = cur.take_i32()?;
    let latitude = cur.take_i32()?;
    let altitude = cur.take_u16()?;
    let angle = cur.take_u16()?;
    let satellites = cur.take_u8()?;
    let speed = cur.take_u16()?;
    let event_id = cur.take_u8()?;
    let total_io = cur.take_u8()? as usize;

    let io = parse_io_elements(cur)?;
    if io.len() != total_io {
        return Err(GatewayError::BadPacket(format!(
            "io element count mismatch: declared {total_io}, decoded {}",
            io.len()
        )));
    }

    Ok(Codec8Record {
        timestamp_ms,
        priority,
        longitude,
        latitude,
        altitude,
        angle,
        satellites,
        speed,
        event_id,
        io,
    })
}

// Buckets are processed in fixed width order 1 -> 2 -> 4 -> 8; each bucket is
// a 1-byte pair count followed by (property id, N-byte value) pairs. The 4-
// and 8-byte buckets really consume 4 and 8 value bytes.
fn parse_io_elements(cur: &mut ByteCursor<'_>) -> Result<IoElements, GatewayError> {
    let mut io = IoElements::default();

    for _ in 0..cur.take_u8()? {
        let id = cur.take_u8()?;
        io.one.insert(id, cur.take_u8()?);
    }
    for _ in 0..cur.take_u8()? {
        let id = cur.take_u8()?;
        io.two.insert(id, cur.take_u16()?);
    }
    for _ in 0..cur.take_u8()? {
        let id = cur.take_u8()?;
        io.four.insert(id, cur.take_u32()?);
    }
    for _ in 0..cur.take_u8()? {
        let id = cur.take_u8()?;
        io.eight.insert(id, cur.take_u64()?);
    }

    Ok(io)
}

/// Map a decoded record into the canonical model without unit scaling.
fn map_record(
    record: &Codec8Record,
    session: &ProtocolSession,
    raw: &RawPayload,
) -> Result<CanonicalStatusRecord, GatewayError> {
    Ok(CanonicalStatusRecord {
        device_id: session.device_id().to_string(),
        family: DeviceFamily::Teltonika,
        timestamp: record.timestamp()?,
        position: GpsPosition {
            latitude: record.latitude as f64,
            longitude: record.longitude as f64,
            altitude: record.altitude as f64,
            speed: record.speed as f64,
            course: record.angle as f64,
            satellites: record.satellites,
        },
        vehicle: vehicle_status(&record.io),
        battery_level: battery_level(&record.io),
        odometer: odometer(&record.io),
        raw: raw.clone(),
    })
}

/// Shared Teltonika-family IO property mapping
pub(crate) fn vehicle_status(io: &IoElements) -> VehicleStatus {
    VehicleStatus {
        ignition: io.one.get(&IO_IGNITION).map(|&v| v != 0),
        overspeed: io.one.get(&IO_OVERSPEED).map(|&v| v != 0),
        harsh_driving: io.one.get(&IO_GREEN_DRIVING).map(|&v| v != 0),
        charging: None,
        armed: None,
    }
}

pub(crate) fn battery_level(io: &IoElements) -> Option<u8> {
    io.one.get(&IO_BATTERY_LEVEL).copied()
}

pub(crate) fn odometer(io: &IoElements) -> Option<u64> {
    io.four.get(&IO_ODOMETER).map(|&v| v as u64)
}

#[async_trait]
impl<R> Protocol<R> for Teltonika
where
    R: AsyncRead + Send + Unpin,
{
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Teltonika
    }

    async fn probe_login(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Option<Login>, GatewayError> {
        let Some(header) = reader.try_peek(2).await? else {
            return Ok(None);
        };
        let len = u16::from_be_bytes([header[0], header[1]]) as usize;
        if !(8..=17).contains(&len) {
            return Ok(None);
        }
        let Some(window) = reader.try_peek(2 + len).await? else {
            return Ok(None);
        };
        let Some((imei, consumed)) = parse_imei_login(window) else {
            return Ok(None);
        };

        Ok(Some(Login {
            consumed,
            ack: LOGIN_ACK.to_vec(),
            session: ProtocolSession::new(imei, DeviceFamily::Teltonika),
        }))
    }

    async fn read_frame(
        &self,
        reader: &mut FrameReader<R>,
        session: &mut ProtocolSession,
    ) -> Result<FrameOutcome, GatewayError> {
        let preamble = reader.read_exact(4).await?;
        if preamble[..] != [0, 0, 0, 0] {
            return Err(GatewayError::BadPacket(format!(
                "bad preamble {}",
                hex::encode(&preamble)
            )));
        }

        let len = reader.read_exact(1).await?[0] as usize;
        let data = reader.read_exact(len).await?;
        let crc_bytes = reader.read_exact(2).await?;
        let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);

        let got = crc16_arc(&data);
        if got != expected {
            return Err(GatewayError::BadChecksum {
                family: DeviceFamily::Teltonika,
                expected,
                got,
            });
        }

        let decoded = parse_codec8_body(&data)?;

        let mut frame_bytes = Vec::with_capacity(4 + 1 + len + 2);
        frame_bytes.extend_from_slice(&preamble);
        frame_bytes.push(len as u8);
        frame_bytes.extend_from_slice(&data);
        frame_bytes.extend_from_slice(&crc_bytes);
        let raw = RawPayload::new(DeviceFamily::Teltonika, &frame_bytes);

        let count = decoded.len();
        let mut records = Vec::with_capacity(count);
        for record in &decoded {
            records.push(map_record(record, session, &raw)?);
        }

        Ok(FrameOutcome {
            records,
            responses: Vec::new(),
            // Data ack echoes the record count byte
            ack: Some(vec![count as u8]),
        })
    }
}
