//! Aquila OBD family protocol (ASCII CSV)
//!
//! Frames are `$$`-prefixed comma-separated lines terminated by `*` and two
//! uppercase hex digits holding the XOR of every byte before the `*`. An
//! optional trailing CR/LF is consumed. Field 15 carries a count-prefixed
//! list of `PID:HEX` OBD-II readings.
//!
//! Identification is in-band (field 1 is the IMEI), so the login probe only
//! validates the first line and consumes nothing; no ack is ever sent.

use crate::core::checksum::xor_checksum;
use crate::core::error::GatewayError;
use crate::core::protocol::{FrameOutcome, Login, Protocol};
use crate::core::session::ProtocolSession;
use crate::core::status::{
    CanonicalStatusRecord, DeviceFamily, GpsPosition, RawPayload, VehicleStatus,
};
use crate::core::stream::FrameReader;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::str::FromStr;
use tokio::io::AsyncRead;
use tracing::{debug, warn};

const PREFIX: &[u8] = b"$$";
const TERMINATOR: u8 = b'*';

/// Minimum CSV field count for a telemetry line
const FIELD_COUNT: usize = 16;

/// Aquila state machine
#[derive(Debug, Default)]
pub struct Aquila;

impl Aquila {
    /// Create the state machine
    pub fn new() -> Self {
        Self
    }
}

/// One decoded Mode-01 OBD reading
#[derive(Debug, Clone, PartialEq)]
pub struct ObdReading {
    /// Parameter id
    pub pid: u8,
    /// Human name from the PID table
    pub name: &'static str,
    /// Value in the unit the table defines
    pub value: f64,
}

/// Decode a raw Mode-01 value per the fixed PID table. Unknown PIDs map to
/// `None` and are dropped by the caller.
fn decode_pid(pid: u8, raw: u32) -> Option<(&'static str, f64)> {
    let decoded = match pid {
        0x04 => ("engine_load_pct", raw as f64 * 100.0 / 255.0),
        0x05 => ("coolant_temp_c", raw as f64 - 40.0),
        0x0C => ("engine_rpm", raw as f64 / 4.0),
        0x0D => ("vehicle_speed_kmh", raw as f64),
        0x0F => ("intake_temp_c", raw as f64 - 40.0),
        0x10 => ("maf_gps", raw as f64 / 100.0),
        0x11 => ("throttle_pct", raw as f64 * 100.0 / 255.0),
        0x1F => ("run_time_s", raw as f64),
        0x2F => ("fuel_level_pct", raw as f64 * 100.0 / 255.0),
        0x42 => ("module_voltage_v", raw as f64 / 1000.0),
        _ => return None,
    };
    Some(decoded)
}

/// Parse the count-prefixed `N;PID:HEX;...` OBD blob. A bare `0` means no
/// readings. The declared count must match the entry count exactly.
fn parse_obd_blob(blob: &str) -> Result<Vec<ObdReading>, GatewayError> {
    let mut parts = blob.split(';');
    let count: usize = parts
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| GatewayError::BadPacket(format!("bad obd count in {blob:?}")))?;

    let entries: Vec<&str> = parts.collect();
    if entries.len() != count {
        return Err(GatewayError::BadPacket(format!(
            "obd blob declares {count} entries, found {}",
            entries.len()
        )));
    }

    let mut readings = Vec::with_capacity(count);
    for entry in entries {
        let (pid_hex, value_hex) = entry
            .split_once(':')
            .ok_or_else(|| GatewayError::BadPacket(format!("bad obd entry {entry:?}")))?;
        let pid = u8::from_str_radix(pid_hex, 16)
            .map_err(|_| GatewayError::BadPacket(format!("bad obd pid {pid_hex:?}")))?;
        let raw = u32::from_str_radix(value_hex, 16)
            .map_err(|_| GatewayError::BadPacket(format!("bad obd value {value_hex:?}")))?;

        match decode_pid(pid, raw) {
            Some((name, value)) => readings.push(ObdReading { pid, name, value }),
            None => warn!(raw, "unknown obd pid {pid:#04x}, dropped"),
        }
    }
    Ok(readings)
}

fn field<'a>(fields: &[&'a str], idx: usize) -> Result<&'a str, GatewayError> {
    fields
        .get(idx)
        .copied()
        .ok_or_else(|| GatewayError::BadPacket(format!("missing csv field {idx}")))
}

fn parse_field<T: FromStr>(fields: &[&str], idx: usize) -> Result<T, GatewayError> {
    field(fields, idx)?
        .parse()
        .map_err(|_| GatewayError::BadPacket(format!("bad csv field {idx}")))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, GatewayError> {
    NaiveDateTime::parse_from_str(s, "%y%m%d%H%M%S")
        .map(|dt| dt.and_utc())
        .map_err(|_| GatewayError::BadPacket(format!("bad timestamp {s:?}")))
}

/// Validate checksum and split one whole line (prefix through checksum
/// digits) into its fields.
fn split_line(line: &[u8]) -> Result<Vec<String>, GatewayError> {
    let star = line
        .iter()
        .position(|&b| b == TERMINATOR)
        .ok_or_else(|| GatewayError::BadPacket("missing line terminator".to_string()))?;
    if line.len() < star + 3 {
        return Err(GatewayError::BadPacket("missing checksum digits".to_string()));
    }

    let digits = std::str::from_utf8(&line[star + 1..star + 3])
        .map_err(|_| GatewayError::BadPacket("non-ascii checksum".to_string()))?;
    let expected = u8::from_str_radix(digits, 16)
        .map_err(|_| GatewayError::BadPacket(format!("bad checksum digits {digits:?}")))?;
    let got = xor_checksum(&line[..star]);
    if got != expected {
        return Err(GatewayError::BadChecksum {
            family: DeviceFamily::Aquila,
            expected: expected as u16,
            got: got as u16,
        });
    }

    let text = std::str::from_utf8(&line[..star])
        .map_err(|_| GatewayError::BadPacket("non-ascii line".to_string()))?;
    Ok(text.split(',').map(str::to_string).collect())
}

fn parse_line(line: &[u8], device_id: &str) -> Result<CanonicalStatusRecord, GatewayError> {
    let owned = split_line(line)?;
    let fields: Vec<&str> = owned.iter().map(String::as_str).collect();
    if fields.len() < FIELD_COUNT {
        return Err(GatewayError::BadPacket(format!(
            "{} csv fields, want at least {FIELD_COUNT}",
            fields.len()
        )));
    }

    let event: u32 = parse_field(&fields, 2)?;
    let latitude: f64 = parse_field(&fields, 3)?;
    let longitude: f64 = parse_field(&fields, 4)?;
    let timestamp = parse_timestamp(field(&fields, 5)?)?;
    let fix_valid = field(&fields, 6)? == "1";
    let speed: f64 = parse_field(&fields, 7)?;
    let course: f64 = parse_field(&fields, 8)?;
    let satellites: u8 = parse_field(&fields, 9)?;
    let altitude: f64 = parse_field(&fields, 10)?;
    let odometer: u64 = parse_field(&fields, 11)?;
    let main_voltage: f64 = parse_field::<u32>(&fields, 12)? as f64 / 10.0;
    let battery: u8 = parse_field(&fields, 13)?;
    let ignition = field(&fields, 14)? == "1";
    let obd = parse_obd_blob(field(&fields, 15)?)?;

    if !fix_valid {
        debug!(device = device_id, "line without gps fix");
    }
    debug!(device = device_id, event, main_voltage, ?obd, "telemetry line");

    Ok(CanonicalStatusRecord {
        device_id: device_id.to_string(),
        family: DeviceFamily::Aquila,
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
            ignition: Some(ignition),
            overspeed: None,
            harsh_driving: None,
            charging: None,
            armed: None,
        },
        battery_level: Some(battery),
        odometer: Some(odometer),
        raw: RawPayload::new(DeviceFamily::Aquila, line),
    })
}

#[async_trait]
impl<R> Protocol<R> for Aquila
where
    R: AsyncRead + Send + Unpin,
{
    fn family(&self) -> DeviceFamily {
        DeviceFamily::Aquila
    }

    async fn probe_login(
        &self,
        reader: &mut FrameReader<R>,
    ) -> Result<Option<Login>, GatewayError> {
        let Some(head) = reader.try_peek(PREFIX.len()).await? else {
            return Ok(None);
        };
        if head != PREFIX {
            return Ok(None);
        }

        let star = match reader.find_byte(TERMINATOR).await {
            Ok(pos) => pos,
            Err(GatewayError::Truncated) | Err(GatewayError::BadPacket(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let Some(line) = reader.try_peek(star + 3).await? else {
            return Ok(None);
        };

        let Ok(fields) = split_line(line) else {
            return Ok(None);
        };
        let Some(imei) = fields.get(1) else {
            return Ok(None);
        };
        if imei.is_empty() || !imei.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }

        // identification is in-band; the line is re-read as a data frame
        Ok(Some(Login {
            consumed: 0,
            ack: Vec::new(),
            session: ProtocolSession::new(imei.clone(), DeviceFamily::Aquila),
        }))
    }

    async fn read_frame(
        &self,
        reader: &mut FrameReader<R>,
        session: &mut ProtocolSession,
    ) -> Result<FrameOutcome, GatewayError> {
        let star = reader.find_byte(TERMINATOR).await?;
        let line = reader.read_exact(star + 3).await?;

        // swallow an optional CR/LF tail
        while let Some(next) = reader.try_peek(1).await? {
            if next[0] == b'\r' || next[0] == b'\n' {
                reader.consume(1);
            } else {
                break;
            }
        }

        let record = parse_line(&line, session.device_id())?;

        Ok(FrameOutcome {
            records: vec![record],
            responses: Vec::new(),
            ack: None,
        })
    }
}
