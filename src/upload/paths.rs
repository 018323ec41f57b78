//! Naming conventions for artifacts and their sidecars
//!
//! Every rename in the finalize pipeline goes through these helpers so an
//! artifact and its `_metadata.json` sidecar never drift apart.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use super::types::UploadError;

/// Marker appended to the stem of a committed artifact
pub const COMPLETION_SUFFIX: &str = "_complete";

/// Suffix appended to an artifact filename to name its sidecar
pub const SIDECAR_SUFFIX: &str = "_metadata.json";

/// Sidecar path colocated with an artifact path
pub fn sidecar_path_for(artifact: &Path) -> PathBuf {
    let mut name: OsString = artifact
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(SIDECAR_SUFFIX);
    artifact.with_file_name(name)
}

/// Whether a filename already carries the completion suffix
pub fn is_completed_name(file_name: &str) -> bool {
    let path = Path::new(file_name);
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|stem| stem.ends_with(COMPLETION_SUFFIX))
        .unwrap_or(false)
}

/// `report.pdf` -> `report_complete.pdf`; already-tagged names are unchanged
pub fn completed_name(file_name: &str) -> String {
    if is_completed_name(file_name) {
        return file_name.to_string();
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);

    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}{}.{}", stem, COMPLETION_SUFFIX, ext),
        None => format!("{}{}", stem, COMPLETION_SUFFIX),
    }
}

/// Reduce a client filename to a single safe path component.
///
/// Separators become underscores, whitespace becomes underscores, anything
/// outside `[A-Za-z0-9._-]` is dropped and leading/trailing dots and
/// underscores are trimmed. Returns `None` when nothing usable is left.
pub fn secure_filename(name: &str) -> Option<String> {
    let joined = name
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_");

    let cleaned: String = joined
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();

    let trimmed = cleaned.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Resolve a client folder name beneath the storage root.
///
/// Nested relative folders are allowed; absolute paths, `..` and empty
/// names are rejected.
pub fn resolve_upload_folder(root: &Path, folder_name: &str) -> Result<PathBuf, UploadError> {
    let trimmed = folder_name.trim();
    if trimmed.is_empty() {
        return Err(UploadError::Validation("folder_name is required".to_string()));
    }

    let relative = Path::new(trimmed);
    let safe = relative
        .components()
        .all(|c| matches!(c, Component::Normal(_)));
    if !safe {
        return Err(UploadError::Validation(format!(
            "folder_name must be a relative path without '..': {}",
            folder_name
        )));
    }

    Ok(root.join(relative))
}
