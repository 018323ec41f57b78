//! Metadata Store
//!
//! One JSON sidecar per artifact, named `<artifact>_metadata.json` and kept
//! next to it. Saves merge onto what is already on disk and replace the file
//! atomically (temp file + rename), so readers never see a partial record.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::paths::{completed_name, sidecar_path_for};
use super::types::UploadError;

/// Default approval state of a fresh record
pub const DEFAULT_APPROVAL_STATE: &str = "No";

// ============================================================================
// Record
// ============================================================================

/// Persisted chain-of-custody record for one artifact.
///
/// Every field is optional on the wire: absent fields are skipped when
/// serializing, which is what lets a save leave existing values alone.
/// Unknown keys sent by clients are carried through in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    // Request fields (client, chunk 0)
    #[serde(rename = "folder_name", skip_serializing_if = "Option::is_none")]
    pub folder_name: Option<String>,

    #[serde(rename = "rename_file", skip_serializing_if = "Option::is_none")]
    pub rename_file: Option<bool>,

    /// Name requested by the client for the rename step
    #[serde(rename = "new_filename", skip_serializing_if = "Option::is_none")]
    pub requested_filename: Option<String>,

    // Descriptive fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_of_collection: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_passwords: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_state: Option<String>,

    // Integrity fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_file_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified: Option<bool>,

    // Lineage fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_filename: Option<String>,
    /// Name after the optional rename step
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetadataRecord {
    /// Fill fields readers rely on so they never crash on missing keys
    pub fn with_defaults(mut self) -> Self {
        fn default(field: &mut Option<String>, value: &str) {
            if field.as_deref().map_or(true, str::is_empty) {
                *field = Some(value.to_string());
            }
        }

        default(&mut self.original_filename, "Unknown File");
        default(&mut self.new_filename, "N/A");
        default(&mut self.operation, "Unknown Operation");
        default(&mut self.date_of_collection, "N/A");
        default(&mut self.item_number, "N/A");
        default(&mut self.sub_number, "N/A");
        default(&mut self.approval_state, DEFAULT_APPROVAL_STATE);
        self
    }

    /// Requested rename target, if the client asked for one
    pub fn rename_target(&self) -> Option<&str> {
        if self.rename_file != Some(true) {
            return None;
        }
        self.requested_filename
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// Client-declared digest of the pre-transfer file
    pub fn declared_hash(&self) -> Option<&str> {
        self.original_file_hash
            .as_deref()
            .map(str::trim)
            .filter(|hash| !hash.is_empty())
    }
}

// ============================================================================
// Store
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct MetadataStore;

impl MetadataStore {
    pub fn new() -> Self {
        Self
    }

    /// Merge `record` onto the sidecar of `file_name` and write it
    /// atomically. Returns the merged record as stored.
    pub async fn save(
        &self,
        record: &MetadataRecord,
        folder: &Path,
        file_name: &str,
    ) -> Result<MetadataRecord, UploadError> {
        let sidecar = sidecar_path_for(&folder.join(file_name));

        let mut merged = match tokio::fs::read(&sidecar).await {
            Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
                Ok(Value::Object(existing)) => existing,
                Ok(_) | Err(_) => {
                    tracing::warn!(
                        file_path = %sidecar.display(),
                        "Existing metadata unreadable, replacing it"
                    );
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        let mut update = record.clone();
        update.last_updated = Some(Utc::now());
        if let Value::Object(fields) = serde_json::to_value(&update)? {
            merged.extend(fields);
        }

        let json = serde_json::to_vec_pretty(&merged)?;
        write_atomically(&sidecar, &json).await?;

        tracing::debug!(file_path = %sidecar.display(), "Metadata saved");

        Ok(serde_json::from_value(Value::Object(merged))?)
    }

    /// Load the sidecar for `file_name`, falling back to its
    /// completion-suffixed variant, with reader defaults applied.
    pub async fn load(&self, folder: &Path, file_name: &str) -> Result<MetadataRecord, UploadError> {
        let mut candidates = vec![file_name.to_string()];
        let completed = completed_name(file_name);
        if completed != file_name {
            candidates.push(completed);
        }

        for candidate in &candidates {
            let sidecar = sidecar_path_for(&folder.join(candidate));
            match tokio::fs::read(&sidecar).await {
                Ok(bytes) => {
                    let record: MetadataRecord = serde_json::from_slice(&bytes)?;
                    tracing::debug!(file_path = %sidecar.display(), "Found metadata file");
                    return Ok(record.with_defaults());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(UploadError::MetadataNotFound(file_name.to_string()))
    }

    /// Remove the sidecar of `file_name` if present
    pub async fn discard(&self, folder: &Path, file_name: &str) -> Result<bool, UploadError> {
        let sidecar = sidecar_path_for(&folder.join(file_name));
        match tokio::fs::remove_file(&sidecar).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

async fn write_atomically(path: &Path, contents: &[u8]) -> Result<(), UploadError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::Internal(format!("Invalid sidecar path: {}", path.display())))?;
    let temp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(contents).await?;
        file.flush().await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp, path).await
    }
    .await;

    if let Err(e) = written {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }

    Ok(())
}
