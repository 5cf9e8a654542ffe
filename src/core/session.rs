//! Per-connection protocol session
//!
//! Established at login and owned exclusively by the connection worker; never
//! shared across connections.

use crate::core::status::DeviceFamily;
use uuid::Uuid;

/// Mutable per-connection state bound at login
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolSession {
    /// Unique connection id, for log correlation
    pub connection_id: Uuid,
    /// Device identifier (IMEI-like); immutable for the connection's lifetime
    device_id: String,
    /// Resolved protocol family
    pub family: DeviceFamily,
    /// Device-reported timezone offset from UTC, in minutes
    pub timezone_offset_minutes: i32,
    /// ASCII sub-mode flag for dual binary/ASCII families
    pub ascii_mode: bool,
}

impl ProtocolSession {
    /// Bind a session at login
    pub fn new(device_id: impl Into<String>, family: DeviceFamily) -> Self {
        Self {
            connection_id: Uuid::new_v4(),
            device_id: device_id.into(),
            family,
            timezone_offset_minutes: 0,
            ascii_mode: false,
        }
    }

    /// Device identifier fixed at login
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}
