//! FM1200 Codec8 variant (4-byte length and CRC framing)
//!
//! Shares the Teltonika IMEI handshake and Codec8 body, but frames with a
//! 4-byte big-endian data length and a 4-byte CRC field whose low 16 bits are
//! CRC-16/ARC. Coordinates are scaled to degrees by 1e7 and the data ack is
//! the record count as a big-endian u32.

use crate::core::checksum::crc16_arc;
use crate::core::error::GatewayError;
use crate::core::protocol::teltonika::{
    battery_level, odometer, parse_codec8_body, parse_imei_login, vehicle_status, Codec8Record,
    LOGIN_ACK,
};
use crate::core::protocol::{FrameOutcome, Login, Protocol};
use crate::core::session::ProtocolSession;
use crate::core::status::{CanonicalStatusRecord, DeviceFamily, GpsPosition, RawPayload};
use crate::core::stream::FrameReader;
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// Divisor turning raw coordinate fields into degrees
const COORDINATE_SCALE: f64 = 10_000_000.0;

/// FM1200 state machine
#[derive(Debug, Default)]
pub struct Fm1200;

impl Fm1200 {
    /// Create the state machine
    pub fn new() -> Self {
        Self
    }
}

fn map_record(
    record: &Codec8Record,
    session: &ProtocolSession,
    raw: &RawPayload,
) -> Result<CanonicalStatusRecord, GatewayError> {
    Ok(CanonicalStatusRecord {
        device_id: session.device_id().to_string(),
        family: DeviceFamily::Fm1200,
        timestamp: record.timestamp()?,
        position: GpsPosition {
            latitude: record.latitude as f64 / COORDINATE_SCALE,
            longitude: record.longitude as f64 / COORDINATE_SCALE,
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

#[async_trait]
impl<R> Protocol<R> for Fm1200
where
    R: AsyncRead + Send + Unpin,
{
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Fm1200
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
            session: ProtocolSession::new(imei, DeviceFamily::Fm1200),
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

        let len_bytes = reader.read_exact(4).await?;
        let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]])
            as usize;
        let data = reader.read_exact(len).await?;
        let crc_bytes = reader.read_exact(4).await?;
        let expected_wide =
            u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        // Only the low half carries the checksum
        let expected = (expected_wide & 0xFFFF) as u16;

        let got = crc16_arc(&data);
        if got != expected {
            return Err(GatewayError::BadChecksum {
                family: DeviceFamily::Fm1200,
                expected,
                got,
            });
        }

        let decoded = parse_codec8_body(&data)?;

        let mut frame_bytes = Vec::with_capacity(4 + 4 + len + 4);
        frame_bytes.extend_from_slice(&preamble);
        frame_bytes.extend_from_slice(&len_bytes);
        frame_bytes.extend_from_slice(&data);
        frame_bytes.extend_from_slice(&crc_bytes);
        let raw = RawPayload::new(DeviceFamily::Fm1200, &frame_bytes);

        let count = decoded.len();
        let mut records = Vec::with_capacity(count);
        for record in &decoded {
            records.push(map_record(record, session, &raw)?);
        }

        Ok(FrameOutcome {
            records,
            responses: Vec::new(),
            ack: Some((count as u32).to_be_bytes().to_vec()),
        })
    }
}
