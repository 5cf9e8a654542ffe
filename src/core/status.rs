//! Canonical status model
//!
//! The normalized telemetry record every protocol family maps into, plus the
//! outbound command-response record for bidirectional protocols. Unit
//! normalization stays inside each protocol module; nothing here rescales.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol family a device speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Teltonika Codec8, 1-byte length framing
    Teltonika,
    /// FM1200 Codec8 variant, 4-byte length framing
    Fm1200,
    /// GT06 family: Wanway, Concox, TR06 variants
    Gt06,
    /// IntelliTrac-A, dual binary/ASCII
    #[serde(rename = "intellitrac")]
    IntelliTrac,
    /// Aquila ASCII-CSV OBD family
    Aquila,
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Teltonika => write!(f, "teltonika"),
            Self::Fm1200 => write!(f, "fm1200"),
            Self::Gt06 => write!(f, "gt06"),
            Self::IntelliTrac => write!(f, "intellitrac"),
            Self::Aquila => write!(f, "aquila"),
        }
    }
}

impl std::str::FromStr for DeviceFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "teltonika" => Ok(Self::Teltonika),
            "fm1200" => Ok(Self::Fm1200),
            "gt06" => Ok(Self::Gt06),
            "intellitrac" => Ok(Self::IntelliTrac),
            "aquila" => Ok(Self::Aquila),
            other => Err(format!("unknown device family {other:?}")),
        }
    }
}

/// GPS fix carried by a telemetry record
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsPosition {
    /// Latitude, in the protocol's normalized unit (degrees unless noted)
    pub latitude: f64,
    /// Longitude, in the protocol's normalized unit
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
    /// Ground speed in km/h
    pub speed: f64,
    /// Course over ground in degrees
    pub course: f64,
    /// Number of satellites used for the fix
    pub satellites: u8,
}

/// Vehicle status flags; absent when the protocol does not report them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VehicleStatus {
    /// Ignition / ACC line state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignition: Option<bool>,
    /// Overspeed flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overspeed: Option<bool>,
    /// Harsh acceleration/braking flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub harsh_driving: Option<bool>,
    /// External power charging flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charging: Option<bool>,
    /// Armed / defence mode flag
    #[serde(skip_serializing_if = "Option::is_none")]
    pub armed: Option<bool>,
}

/// Protocol-tagged copy of the frame bytes a record was decoded from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayload {
    /// Family that produced the frame
    pub family: DeviceFamily,
    /// Hex-encoded frame bytes, kept for audit and replay
    pub bytes_hex: String,
}

impl RawPayload {
    /// Tag raw frame bytes with their protocol family
    pub fn new(family: DeviceFamily, bytes: &[u8]) -> Self {
        Self {
            family,
            bytes_hex: hex::encode(bytes),
        }
    }
}

/// One normalized telemetry record, produced per decoded telemetry frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalStatusRecord {
    /// Device identifier (IMEI-like), fixed at login
    pub device_id: String,
    /// Protocol family tag
    pub family: DeviceFamily,
    /// Fix or report timestamp
    pub timestamp: DateTime<Utc>,
    /// GPS position block
    pub position: GpsPosition,
    /// Vehicle status flags
    pub vehicle: VehicleStatus,
    /// Battery level in percent, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<u8>,
    /// Odometer in meters, when reported
    #[serde(skip_serializing_if = "Option::is_none")]
    pub odometer: Option<u64>,
    /// Raw frame bytes for audit/replay
    pub raw: RawPayload,
}

/// Outbound AT-style command acknowledgement from a bidirectional protocol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    /// Device identifier
    pub device_id: String,
    /// Protocol family tag
    pub family: DeviceFamily,
    /// Response text as reported by the device
    pub content: String,
    /// Gateway receive time
    pub received_at: DateTime<Utc>,
    /// Raw frame bytes
    pub raw: RawPayload,
}
