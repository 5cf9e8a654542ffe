//! JSONL file backend
//!
//! One append-only `<device_id>.jsonl` file per device under the data
//! directory, flushed after every line so a crash loses at most the line in
//! flight. Command responses land next to telemetry in
//! `<device_id>.responses.jsonl`.
//!
//! An optional allow-list file backs `verify_device`: one `imei,family` pair
//! per line, `#` comments and blank lines skipped.

use crate::core::error::StoreError;
use crate::core::status::{CanonicalStatusRecord, DeviceFamily, DeviceResponse};
use crate::core::store::DeviceStore;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// File-backed storage
pub struct FileStore {
    data_dir: PathBuf,
    allowlist: Option<HashMap<String, DeviceFamily>>,
    // open append handles, keyed by file name
    handles: Mutex<HashMap<String, File>>,
}

impl FileStore {
    /// Open the backend, creating the data directory. `allowlist_path` is
    /// optional; without it `verify_device` has nothing to answer from and
    /// errors, so device verification must stay disabled.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        allowlist_path: Option<&Path>,
    ) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        tokio::fs::create_dir_all(&data_dir).await?;

        let allowlist = match allowlist_path {
            Some(path) => {
                let text = tokio::fs::read_to_string(path).await?;
                let entries = parse_allowlist(&text);
                info!(entries = entries.len(), path = %path.display(), "allow-list loaded");
                Some(entries)
            }
            None => None,
        };

        Ok(Self {
            data_dir,
            allowlist,
            handles: Mutex::new(HashMap::new()),
        })
    }

    async fn append<T: Serialize>(&self, file_name: &str, item: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(item)?;
        line.push(b'\n');

        let mut handles = self.handles.lock().await;
        if !handles.contains_key(file_name) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.data_dir.join(file_name))
                .await?;
            handles.insert(file_name.to_string(), file);
        }
        // just inserted above when missing
        if let Some(file) = handles.get_mut(file_name) {
            file.write_all(&line).await?;
            file.flush().await?;
        }
        Ok(())
    }
}

fn parse_allowlist(text: &str) -> HashMap<String, DeviceFamily> {
    let mut entries = HashMap::new();
    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((imei, family)) = line.split_once(',') else {
            warn!(line = number + 1, "allow-list line without a family, skipped");
            continue;
        };
        match family.parse::<DeviceFamily>() {
            Ok(family) => {
                entries.insert(imei.trim().to_string(), family);
            }
            Err(e) => warn!(line = number + 1, error = %e, "allow-list line skipped"),
        }
    }
    entries
}

/// Keep file names to the id's safe characters
fn sanitize_id(device_id: &str) -> String {
    device_id
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[async_trait]
impl DeviceStore for FileStore {
    async fn save_status(&self, record: &CanonicalStatusRecord) -> Result<(), StoreError> {
        let file_name = format!("{}.jsonl", sanitize_id(&record.device_id));
        self.append(&file_name, record).await
    }

    async fn save_response(&self, response: &DeviceResponse) -> Result<(), StoreError> {
        let file_name = format!("{}.responses.jsonl", sanitize_id(&response.device_id));
        self.append(&file_name, response).await
    }

    async fn verify_device(&self, device_id: &str) -> Result<Option<DeviceFamily>, StoreError> {
        match &self.allowlist {
            Some(entries) => Ok(entries.get(device_id).copied()),
            // no allow-list configured: every device passes, family unknown
            None => Err(StoreError::Rejected(
                "verification requested without an allow-list".to_string(),
            )),
        }
    }

    async fn fetch_model(&self, _device_id: &str) -> Result<Option<String>, StoreError> {
        Ok(None)
    }
}
