//! Cleanup Manager
//!
//! Removes partial artifacts on cancellation or unrecoverable failure.

use std::io::ErrorKind;
use std::path::Path;

use super::paths::sidecar_path_for;
use super::types::UploadError;

/// What a folder removal found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRemoval {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupManager;

impl CleanupManager {
    pub fn new() -> Self {
        Self
    }

    /// Delete a whole upload folder tree. An absent folder is a success.
    pub async fn remove_upload_folder(&self, folder: &Path) -> Result<FolderRemoval, UploadError> {
        tracing::info!(folder = %folder.display(), "Attempting to delete upload folder");

        match tokio::fs::remove_dir_all(folder).await {
            Ok(()) => {
                tracing::info!(folder = %folder.display(), "Deleted upload folder");
                Ok(FolderRemoval::Deleted)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(folder = %folder.display(), "Upload folder not found");
                Ok(FolderRemoval::NotFound)
            }
            Err(e) => Err(UploadError::Storage(format!(
                "Error deleting folder {}: {}",
                folder.display(),
                e
            ))),
        }
    }

    /// Remove one artifact and its sidecar, then the folder if that left it
    /// empty. Other artifacts in the folder are never touched.
    pub async fn cleanup_failed_artifact(&self, folder: &Path, file_name: &str) -> Result<(), UploadError> {
        let artifact = folder.join(file_name);
        let sidecar = sidecar_path_for(&artifact);

        for path in [&artifact, &sidecar] {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::info!(file_path = %path.display(), "Removed failed upload file"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        if is_empty_dir(folder).await? {
            match tokio::fs::remove_dir(folder).await {
                Ok(()) => tracing::info!(folder = %folder.display(), "Removed empty upload folder"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

async fn is_empty_dir(folder: &Path) -> Result<bool, UploadError> {
    let mut entries = match tokio::fs::read_dir(folder).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e.into()),
    };
    Ok(entries.next_entry().await?.is_none())
}
