//! Storage backend contract
//!
//! The gateway hands every decoded record and command response to a
//! `DeviceStore`. The bundled backend appends JSONL files per device; remote
//! backends implement the same trait.

pub mod file;

pub use file::FileStore;

use crate::core::error::StoreError;
use crate::core::status::{CanonicalStatusRecord, DeviceFamily, DeviceResponse};
use async_trait::async_trait;

/// Narrow storage contract consumed by the dispatch sink and the worker
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Persist one decoded telemetry record
    async fn save_status(&self, record: &CanonicalStatusRecord) -> Result<(), StoreError>;

    /// Persist one device command response
    async fn save_response(&self, response: &DeviceResponse) -> Result<(), StoreError>;

    /// Look up a device id at login time. `None` means unknown; the worker
    /// rejects the connection before any telemetry is read.
    async fn verify_device(&self, device_id: &str) -> Result<Option<DeviceFamily>, StoreError>;

    /// Device model string, when the backend knows one
    async fn fetch_model(&self, device_id: &str) -> Result<Option<String>, StoreError>;
}
