//! GT06 family protocol (Wanway/Concox/TR06)
//!
//! Envelope: start `0x7878` with a 1-byte length or `0x7979` with a 2-byte
//! length, then protocol id, body, serial, CRC-16/X25 and the `0x0D 0x0A`
//! stop bytes. The length counts protocol id through CRC inclusive; the CRC
//! covers the length field through the serial.
//!
//! Some clones ship with broken CRC firmware, so checksum enforcement is
//! configurable and defaults to strict.

use crate::core::checksum::crc16_x25;
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
use tracing::{debug, warn};

const START_SHORT: [u8; 2] = [0x78, 0x78];
const START_LONG: [u8; 2] = [0x79, 0x79];
const STOP: [u8; 2] = [0x0D, 0x0A];

const MSG_LOGIN: u8 = 0x01;
const MSG_GPS: u8 = 0x12;
const MSG_HEARTBEAT: u8 = 0x13;
const MSG_INSTRUCTION: u8 = 0x15;
const MSG_ALARM: u8 = 0x16;
const MSG_LBS: u8 = 0x18;
const MSG_GPS_2: u8 = 0x22;
const MSG_ALARM_2: u8 = 0x26;

// course_status high-byte flags
const FLAG_POSITIONED: u8 = 0x20;
const FLAG_LON_WEST: u8 = 0x10;
const FLAG_LAT_NORTH: u8 = 0x08;

/// GT06 state machine
#[derive(Debug)]
pub struct Gt06 {
    strict_crc: bool,
}

impl Gt06 {
    /// Create the state machine; `strict_crc` rejects frames whose CRC
    /// does not verify
    pub fn new(strict_crc: bool) -> Self {
        Self { strict_crc }
    }
}

impl Default for Gt06 {
    fn default() -> Self {
        Self::new(true)
    }
}

/// One whole inbound envelope, stop bytes excluded from `content`
struct Envelope {
    header: [u8; 2],
    /// Raw length field bytes as they arrived (1 or 2)
    len_field: Vec<u8>,
    /// proto id through CRC inclusive
    content: Vec<u8>,
    raw: Vec<u8>,
}

impl Envelope {
    fn proto(&self) -> u8 {
        self.content[0]
    }

    fn body(&self) -> &[u8] {
        &self.content[1..self.content.len() - 4]
    }

    fn serial(&self) -> u16 {
        let n = self.content.len();
        u16::from_be_bytes([self.content[n - 4], self.content[n - 3]])
    }

    fn crc(&self) -> u16 {
        let n = self.content.len();
        u16::from_be_bytes([self.content[n - 2], self.content[n - 1]])
    }

    /// CRC over the length field through the serial
    fn computed_crc(&self) -> u16 {
        let mut covered = self.len_field.clone();
        covered.extend_from_slice(&self.content[..self.content.len() - 2]);
        crc16_x25(&covered)
    }

    /// Response mirroring this envelope: same length value, proto and serial
    /// with a freshly computed CRC
    fn ack(&self) -> Vec<u8> {
        let mut covered = self.len_field.clone();
        covered.push(self.proto());
        covered.extend_from_slice(&self.serial().to_be_bytes());
        let crc = crc16_x25(&covered);

        let mut out = Vec::with_capacity(4 + covered.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&covered);
        out.extend_from_slice(&crc.to_be_bytes());
        out.extend_from_slice(&STOP);
        out
    }
}

/// Decode the packed 8-byte BCD IMEI: 16 digits with the leading zero dropped
fn decode_bcd_imei(bytes: &[u8]) -> String {
    let digits = hex::encode(bytes);
    match digits.strip_prefix('0') {
        Some(rest) if digits.len() == 16 => rest.to_string(),
        _ => digits,
    }
}

/// Unpack the login timezone field into minutes east of UTC.
///
/// Bits 15..4 carry the offset as hours*100+minutes; bit 3 marks the western
/// hemisphere. `0x4DD8` reads GMT-12:45, so -765.
fn decode_timezone(tz: u16) -> i32 {
    let packed = (tz >> 4) as i32;
    let minutes = (packed / 100) * 60 + packed % 100;
    if tz & 0x0008 != 0 {
        -minutes
    } else {
        minutes
    }
}

/// 6-byte device datetime: year-2000, month, day, hour, minute, second
fn decode_datetime(dt: &[u8]) -> Result<DateTime<Utc>, GatewayError> {
    Utc.with_ymd_and_hms(
        2000 + dt[0] as i32,
        dt[1] as u32,
        dt[2] as u32,
        dt[3] as u32,
        dt[4] as u32,
        dt[5] as u32,
    )
    .single()
    .ok_or_else(|| GatewayError::BadPacket(format!("invalid datetime {}", hex::encode(dt))))
}

/// Battery level bucket 0..=6 scaled to a percentage
fn voltage_percent(level: u8) -> u8 {
    (level.min(6) as u16 * 100 / 6) as u8
}

struct GpsBlock {
    timestamp: DateTime<Utc>,
    satellites: u8,
    latitude: f64,
    longitude: f64,
    speed: u8,
    positioned: bool,
    course: u16,
}

/// Fixed 18-byte GPS block shared by position and alarm frames
fn parse_gps_block(cur: &mut ByteCursor<'_>) -> Result<GpsBlock, GatewayError> {
    let dt = cur.take(6)?.to_vec();
    let timestamp = decode_datetime(&dt)?;
    // high nibble is the gps data length, low nibble the satellite count
    let satellites = cur.take_u8()? & 0x0F;
    let lat_raw = cur.take_u32()?;
    let lon_raw = cur.take_u32()?;
    let speed = cur.take_u8()?;
    let course_status = cur.take_u16()?;

    let hi = (course_status >> 8) as u8;
    let course = ((hi as u16 & 0x03) << 8) | (course_status & 0x00FF);

    let mut latitude = lat_raw as f64 / 30_000.0 / 60.0;
    if hi & FLAG_LAT_NORTH == 0 {
        latitude = -latitude;
    }
    let mut longitude = lon_raw as f64 / 30_000.0 / 60.0;
    if hi & FLAG_LON_WEST != 0 {
        longitude = -longitude;
    }

    Ok(GpsBlock {
        timestamp,
        satellites,
        latitude,
        longitude,
        speed,
        positioned: hi & FLAG_POSITIONED != 0,
        course,
    })
}

struct StatusBlock {
    terminal_info: u8,
    voltage_level: u8,
    #[allow(dead_code)]
    gsm_signal: u8,
}

fn parse_status_block(cur: &mut ByteCursor<'_>) -> Result<StatusBlock, GatewayError> {
    Ok(StatusBlock {
        terminal_info: cur.take_u8()?,
        voltage_level: cur.take_u8()?,
        gsm_signal: cur.take_u8()?,
    })
}

fn terminal_vehicle_status(terminal_info: u8) -> VehicleStatus {
    VehicleStatus {
        ignition: Some(terminal_info & 0x02 != 0),
        overspeed: None,
        harsh_driving: None,
        charging: Some(terminal_info & 0x04 != 0),
        armed: Some(terminal_info & 0x01 != 0),
    }
}

impl Gt06 {
    async fn read_envelope<R>(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Envelope, GatewayError>
    where
        R: AsyncRead + Send + Unpin,
    {
        let header_bytes = reader.read_exact(2).await?;
        let header = [header_bytes[0], header_bytes[1]];
        let len_field: Vec<u8> = match header {
            START_SHORT => reader.read_exact(1).await?.to_vec(),
            START_LONG => reader.read_exact(2).await?.to_vec(),
            _ => {
                return Err(GatewayError::BadPacket(format!(
                    "bad frame start {}",
                    hex::encode(header)
                )))
            }
        };
        let len = match len_field.len() {
            1 => len_field[0] as usize,
            _ => u16::from_be_bytes([len_field[0], len_field[1]]) as usize,
        };
        // proto + serial + crc at minimum
        if len < 5 {
            return Err(GatewayError::BadPacket(format!("frame length {len} too short")));
        }

        let content = reader.read_exact(len).await?.to_vec();
        let stop = reader.read_exact(2).await?;
        if stop[..] != STOP {
            return Err(GatewayError::BadPacket(format!(
                "bad stop bytes {}",
                hex::encode(&stop)
            )));
        }

        let mut raw = Vec::with_capacity(2 + len_field.len() + len + 2);
        raw.extend_from_slice(&header);
        raw.extend_from_slice(&len_field);
        raw.extend_from_slice(&content);
        raw.extend_from_slice(&STOP);

        let envelope = Envelope {
            header,
            len_field,
            content,
            raw,
        };

        let got = envelope.computed_crc();
        let expected = envelope.crc();
        if got != expected {
            if self.strict_crc {
                return Err(GatewayError::BadChecksum {
                    family: DeviceFamily::Gt06,
                    expected,
                    got,
                });
            }
            debug!("accepting frame with bad crc: expected {expected:#06x}, got {got:#06x}");
        }

        Ok(envelope)
    }
}

#[async_trait]
impl<R> Protocol<R> for Gt06
where
    R: AsyncRead + Send + Unpin,
{
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Gt06
    }

    async fn probe_login(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Option<Login>, GatewayError> {
        let Some(head) = reader.try_peek(4).await? else {
            return Ok(None);
        };
        if head[..2] != START_SHORT || head[3] != MSG_LOGIN {
            return Ok(None);
        }
        let len = head[2] as usize;
        // proto + imei(8) + terminal type(2) + timezone(2) + serial(2) + crc(2)
        if len != 17 {
            return Ok(None);
        }
        let total = 2 + 1 + len + 2;
        let Some(frame) = reader.try_peek(total).await? else {
            return Ok(None);
        };
        if frame[total - 2..] != STOP {
            return Ok(None);
        }

        let envelope = Envelope {
            header: START_SHORT,
            len_field: vec![frame[2]],
            content: frame[3..total - 2].to_vec(),
            raw: frame.to_vec(),
        };
        if self.strict_crc && envelope.computed_crc() != envelope.crc() {
            return Ok(None);
        }

        let body = envelope.body();
        let imei = decode_bcd_imei(&body[..8]);
        let timezone = u16::from_be_bytes([body[10], body[11]]);

        let mut session = ProtocolSession::new(imei, DeviceFamily::Gt06);
        session.timezone_offset_minutes = decode_timezone(timezone);

        Ok(Some(Login {
            consumed: total,
            ack: envelope.ack(),
            session,
        }))
    }

    async fn read_frame(
        &self,
        reader: &mut FrameReader<R>,
        session: &mut ProtocolSession,
    ) -> Result<FrameOutcome, GatewayError> {
        let envelope = self.read_envelope(reader).await?;
        let raw = RawPayload::new(DeviceFamily::Gt06, &envelope.raw);
        let mut cur = ByteCursor::new(envelope.body());

        match envelope.proto() {
            MSG_GPS | MSG_GPS_2 => {
                let gps = parse_gps_block(&mut cur)?;
                if !gps.positioned {
                    debug!(device = %session.device_id(), "gps frame without fix");
                }
                let record = CanonicalStatusRecord {
                    device_id: session.device_id().to_string(),
                    family: DeviceFamily::Gt06,
                    timestamp: gps.timestamp,
                    position: GpsPosition {
                        latitude: gps.latitude,
                        longitude: gps.longitude,
                        altitude: 0.0,
                        speed: gps.speed as f64,
                        course: gps.course as f64,
                        satellites: gps.satellites,
                    },
                    vehicle: VehicleStatus::default(),
                    battery_level: None,
                    odometer: None,
                    raw,
                };
                Ok(FrameOutcome {
                    records: vec![record],
                    responses: Vec::new(),
                    ack: None,
                })
            }
            MSG_HEARTBEAT => {
                let status = parse_status_block(&mut cur)?;
                debug!(
                    device = %session.device_id(),
                    battery = voltage_percent(status.voltage_level),
                    "heartbeat, terminal info {:#04x}",
                    status.terminal_info
                );
                Ok(FrameOutcome {
                    records: Vec::new(),
                    responses: Vec::new(),
                    ack: Some(envelope.ack()),
                })
            }
            MSG_ALARM | MSG_ALARM_2 => {
                let gps = parse_gps_block(&mut cur)?;
                // cell tower block: length, mcc, mnc, lac, 3-byte cell id
                let _lbs_len = cur.take_u8()?;
                let mcc = cur.take_u16()?;
                let mnc = cur.take_u8()?;
                let lac = cur.take_u16()?;
                let cell = cur.take_u24()?;
                let status = parse_status_block(&mut cur)?;
                let alarm_code = cur.take_u8()?;
                let _language = cur.take_u8()?;

                debug!(
                    device = %session.device_id(),
                    alarm_code,
                    mcc, mnc, lac, cell,
                    "alarm frame"
                );

                let record = CanonicalStatusRecord {
                    device_id: session.device_id().to_string(),
                    family: DeviceFamily::Gt06,
                    timestamp: gps.timestamp,
                    position: GpsPosition {
                        latitude: gps.latitude,
                        longitude: gps.longitude,
                        altitude: 0.0,
                        speed: gps.speed as f64,
                        course: gps.course as f64,
                        satellites: gps.satellites,
                    },
                    vehicle: terminal_vehicle_status(status.terminal_info),
                    battery_level: Some(voltage_percent(status.voltage_level)),
                    odometer: None,
                    raw,
                };
                Ok(FrameOutcome {
                    records: vec![record],
                    responses: Vec::new(),
                    ack: Some(envelope.ack()),
                })
            }
            MSG_LBS => {
                // cell-only position, nothing to map
                let dt = cur.take(6)?.to_vec();
                let timestamp = decode_datetime(&dt)?;
                let mcc = cur.take_u16()?;
                let mnc = cur.take_u8()?;
                let lac = cur.take_u16()?;
                let cell = cur.take_u24()?;
                debug!(
                    device = %session.device_id(),
                    %timestamp, mcc, mnc, lac, cell,
                    "lbs frame without gps"
                );
                Ok(FrameOutcome::default())
            }
            MSG_INSTRUCTION => {
                let _server_flag = cur.take_u32()?;
                let content_bytes = cur.take(cur.remaining())?;
                let content = String::from_utf8_lossy(content_bytes).into_owned();
                let response = DeviceResponse {
                    device_id: session.device_id().to_string(),
                    family: DeviceFamily::Gt06,
                    content,
                    received_at: Utc::now(),
                    raw,
                };
                Ok(FrameOutcome {
                    records: Vec::new(),
                    responses: vec![response],
                    ack: None,
                })
            }
            MSG_LOGIN => Err(GatewayError::BadPacket(
                "login frame after session established".to_string(),
            )),
            other => {
                warn!(device = %session.device_id(), "unknown gt06 message type {other:#04x}");
                Err(GatewayError::BadPacket(format!(
                    "unknown message type {other:#04x}"
                )))
            }
        }
    }
}
