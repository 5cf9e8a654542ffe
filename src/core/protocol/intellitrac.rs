//! IntelliTrac A-series protocol (dual binary/ASCII)
//!
//! Binary frames carry a transaction id, an encoding byte (0x00 telemetry,
//! 0x02 command text), a message type, a 2-byte data length and the data.
//! There is no checksum; reliability is ack-based. A fixed 8-byte ASCII-mode
//! heartbeat marked `0xFA 0xF8` can arrive on the same stream.
//!
//! Every inbound frame is acked with 6 bytes: transaction id, encoding byte,
//! `0x03`, and a 2-byte status (0x0000 success).

use crate::core::error::GatewayError;
use crate::core::protocol::cursor::ByteCursor;
use crate::core::protocol::{FrameOutcome, Login, Protocol};
use crate::core::session::ProtocolSession;
use crate::core::status::{
    CanonicalStatusRecord, DeviceFamily, DeviceResponse, GpsPosition, RawPayload, VehicleStatus,
};
use crate::core::stream::FrameReader;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::AsyncRead;
use tracing::debug;

const ASCII_MARKER: [u8; 2] = [0xFA, 0xF8];

const ENC_TELEMETRY: u8 = 0x00;
const ENC_COMMAND: u8 = 0x02;

const MSG_LOGIN: u8 = 0x01;
const MSG_POSITION: u8 = 0x02;
const MSG_ACK: u8 = 0x03;
const MSG_TEXT: u8 = 0x04;

const POSITION_LEN: usize = 46;

const STATUS_OK: u16 = 0x0000;

// io bitmask
const IO_IGNITION: u16 = 0x0001;
// vehicle status bitmask
const VS_OVERSPEED: u16 = 0x0001;
const VS_HARSH_ACCEL: u16 = 0x0002;
const VS_HARSH_BRAKE: u16 = 0x0004;

/// IntelliTrac state machine
#[derive(Debug, Default)]
pub struct IntelliTrac;

impl IntelliTrac {
    /// Create the state machine
    pub fn new() -> Self {
        Self
    }
}

/// Modem ids render as decimal zero-padded to 15 digits
fn format_modem_id(id: u64) -> String {
    format!("{id:015}")
}

fn build_ack(txn: u16, encoding: u8) -> Vec<u8> {
    let mut ack = Vec::with_capacity(6);
    ack.extend_from_slice(&txn.to_be_bytes());
    ack.push(encoding);
    ack.push(MSG_ACK);
    ack.extend_from_slice(&STATUS_OK.to_be_bytes());
    ack
}

fn decode_bcd(byte: u8) -> Result<u32, GatewayError> {
    let hi = byte >> 4;
    let lo = byte & 0x0F;
    if hi > 9 || lo > 9 {
        return Err(GatewayError::BadPacket(format!(
            "invalid bcd digit {byte:#04x}"
        )));
    }
    Ok(hi as u32 * 10 + lo as u32)
}

fn decode_bcd_datetime(bytes: &[u8]) -> Result<DateTime<Utc>, GatewayError> {
    Utc.with_ymd_and_hms(
        2000 + decode_bcd(bytes[0])? as i32,
        decode_bcd(bytes[1])?,
        decode_bcd(bytes[2])?,
        decode_bcd(bytes[3])?,
        decode_bcd(bytes[4])?,
        decode_bcd(bytes[5])?,
    )
    .single()
    .ok_or_else(|| GatewayError::BadPacket(format!("invalid datetime {}", hex::encode(bytes))))
}

/// Decode the fixed 46-byte position payload into a canonical record.
fn parse_position(
    data: &[u8],
    session: &ProtocolSession,
    raw: RawPayload,
) -> Result<CanonicalStatusRecord, GatewayError> {
    if data.len() != POSITION_LEN {
        return Err(GatewayError::BadPacket(format!(
            "position payload is {} bytes, want {POSITION_LEN}",
            data.len()
        )));
    }
    let mut cur = ByteCursor::new(data);

    let _modem_id = cur.take_u64()?;
    let datetime = cur.take(6)?.to_vec();
    let timestamp = decode_bcd_datetime(&datetime)?;
    let latitude = cur.take_i32()? as f64 / 1_000_000.0;
    let longitude = cur.take_i32()? as f64 / 1_000_000.0;
    let altitude = cur.take_i24()? as f64;
    let speed = cur.take_u16()? as f64 / 10.0;
    let course = cur.take_u16()? as f64 / 10.0;
    let odometer = cur.take_u32()? as u64;
    let hdop = cur.take_u16()? as f64 / 10.0;
    let satellites = cur.take_u8()?;
    let io = cur.take_u16()?;
    let vehicle = cur.take_u16()?;
    let battery = cur.take_u16()?;
    let event = cur.take_u16()?;
    let _spare = cur.take_u16()?;

    debug!(device = %session.device_id(), event, hdop, "position frame");

    Ok(CanonicalStatusRecord {
        device_id: session.device_id().to_string(),
        family: DeviceFamily::IntelliTrac,
        timestamp,
        position: GpsPosition {
            latitude,
            longitude,
            altitude,
            speed,
            course,
            satellites,
        },
        vehicle: VehicleStatus {
            ignition: Some(io & IO_IGNITION != 0),
            overspeed: Some(vehicle & VS_OVERSPEED != 0),
            harsh_driving: Some(vehicle & (VS_HARSH_ACCEL | VS_HARSH_BRAKE) != 0),
            charging: None,
            armed: None,
        },
        battery_level: Some((battery / 10).min(100) as u8),
        odometer: Some(odometer),
        raw,
    })
}

#[async_trait]
impl<R> Protocol<R> for IntelliTrac
where
    R: AsyncRead + Send + Unpin,
{
    fn family(&self) -> DeviceFamily {
        DeviceFamily::IntelliTrac
    }

    async fn probe_login(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Option<Login>, GatewayError> {
        let Some(head) = reader.try_peek(2).await? else {
            return Ok(None);
        };

        if head == ASCII_MARKER {
            // fixed-size heartbeat doubles as identification
            let Some(frame) = reader.try_peek(8).await? else {
                return Ok(None);
            };
            let modem_id = u32::from_be_bytes([frame[2], frame[3], frame[4], frame[5]]);
            let seq = u16::from_be_bytes([frame[6], frame[7]]);

            let mut session = ProtocolSession::new(
                format_modem_id(modem_id as u64),
                DeviceFamily::IntelliTrac,
            );
            session.ascii_mode = true;

            return Ok(Some(Login {
                consumed: 8,
                ack: build_ack(seq, ENC_TELEMETRY),
                session,
            }));
        }

        let Some(header) = reader.try_peek(6).await? else {
            return Ok(None);
        };
        let txn = u16::from_be_bytes([header[0], header[1]]);
        let encoding = header[2];
        let msg_type = header[3];
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        if encoding != ENC_TELEMETRY || msg_type != MSG_LOGIN || len != 8 {
            return Ok(None);
        }
        let Some(frame) = reader.try_peek(6 + len).await? else {
            return Ok(None);
        };
        let modem_id = u64::from_be_bytes([
            frame[6], frame[7], frame[8], frame[9], frame[10], frame[11], frame[12], frame[13],
        ]);

        Ok(Some(Login {
            consumed: 6 + len,
            ack: build_ack(txn, encoding),
            session: ProtocolSession::new(format_modem_id(modem_id), DeviceFamily::IntelliTrac),
        }))
    }

    async fn read_frame(
        &self,
        reader: &mut FrameReader<R>,
        session: &mut ProtocolSession,
    ) -> Result<FrameOutcome, GatewayError> {
        let head = reader.peek(2).await?;
        if head == ASCII_MARKER {
            let frame = reader.read_exact(8).await?;
            let seq = u16::from_be_bytes([frame[6], frame[7]]);
            debug!(device = %session.device_id(), seq, "ascii heartbeat");
            session.ascii_mode = true;
            return Ok(FrameOutcome {
                records: Vec::new(),
                responses: Vec::new(),
                ack: Some(build_ack(seq, ENC_TELEMETRY)),
            });
        }

        let header = reader.read_exact(6).await?;
        let txn = u16::from_be_bytes([header[0], header[1]]);
        let encoding = header[2];
        let msg_type = header[3];
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let data = reader.read_exact(len).await?;

        let mut frame_bytes = Vec::with_capacity(6 + len);
        frame_bytes.extend_from_slice(&header);
        frame_bytes.extend_from_slice(&data);
        let raw = RawPayload::new(DeviceFamily::IntelliTrac, &frame_bytes);

        match (encoding, msg_type) {
            (ENC_TELEMETRY, MSG_POSITION) => {
                let record = parse_position(&data, session, raw)?;
                Ok(FrameOutcome {
                    records: vec![record],
                    responses: Vec::new(),
                    ack: Some(build_ack(txn, encoding)),
                })
            }
            (ENC_COMMAND, _) | (_, MSG_TEXT) => {
                let content = String::from_utf8_lossy(&data).into_owned();
                let response = DeviceResponse {
                    device_id: session.device_id().to_string(),
                    family: DeviceFamily::IntelliTrac,
                    content,
                    received_at: Utc::now(),
                    raw,
                };
                Ok(FrameOutcome {
                    records: Vec::new(),
                    responses: vec![response],
                    ack: Some(build_ack(txn, encoding)),
                })
            }
            (_, MSG_ACK) => {
                // device-side ack, nothing to store and nothing to answer
                debug!(device = %session.device_id(), txn, "device ack");
                Ok(FrameOutcome::default())
            }
            (ENC_TELEMETRY, MSG_LOGIN) => Err(GatewayError::BadPacket(
                "login frame after session established".to_string(),
            )),
            _ => Err(GatewayError::BadPacket(format!(
                "unknown frame encoding {encoding:#04x} type {msg_type:#04x}"
            ))),
        }
    }
}
