//! Upload types for the chunked intake protocol

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use serde::Serialize;
use uuid::Uuid;

use super::metadata::MetadataRecord;

// ============================================================================
// Constants
// ============================================================================

/// Idle time after which an in-flight session is evicted: 5 minutes
pub const SESSION_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default maximum file size: 100GB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 100 * 1024 * 1024 * 1024;

/// Status strings returned to clients
pub const STATUS_CHUNK_RECEIVED: &str = "Chunk received";
pub const STATUS_CHUNK_DUPLICATE: &str = "Chunk already processed";
pub const STATUS_FINALIZE_SUCCESS: &str = "success";
pub const STATUS_FINALIZE_FAILED: &str = "File processing failed";

// ============================================================================
// Session Types
// ============================================================================

/// Identifies one logical upload among the concurrently active ones.
///
/// Derived from the target filename and the declared chunk count, so a
/// client restarting the same transfer lands on the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(file_name: &str, total_chunks: usize) -> Self {
        Self(format!("{}_{}", file_name, total_chunks))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// In-memory state of one in-progress multi-chunk transfer
#[derive(Debug, Clone)]
pub struct UploadSession {
    /// Generation id; changes whenever chunk 0 resets the key
    pub id: Uuid,

    pub key: SessionKey,

    /// Sanitized name of the assembling file
    pub file_name: String,

    /// Declared on chunk 0, immutable afterwards
    pub total_chunks: usize,

    /// Declared on chunk 0; 0 means append mode
    pub chunk_size: u64,

    /// Indices successfully written
    pub received_chunks: HashSet<usize>,

    /// Folder owned by this session until finalize or cleanup
    pub upload_folder: PathBuf,

    /// Client-supplied record, handed to the finalize pipeline
    pub metadata: MetadataRecord,

    pub last_activity: Instant,
}

impl UploadSession {
    pub fn new(
        key: SessionKey,
        file_name: String,
        total_chunks: usize,
        chunk_size: u64,
        upload_folder: PathBuf,
        metadata: MetadataRecord,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            file_name,
            total_chunks,
            chunk_size,
            received_chunks: HashSet::new(),
            upload_folder,
            metadata,
            last_activity: Instant::now(),
        }
    }

    /// Path of the assembling file
    pub fn target_path(&self) -> PathBuf {
        self.upload_folder.join(&self.file_name)
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}

/// Result of looking up a session for a non-initial chunk
#[derive(Debug)]
pub enum SessionLookup {
    Active(UploadSession),
    NotFound,
    Expired,
}

/// Result of recording a written chunk against its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        chunks_received: usize,
        total_chunks: usize,
    },
    AlreadyProcessed,
    NotFound,
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// One chunk as handed over by the HTTP layer
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    /// Client-supplied filename (sanitized by the service)
    pub file_name: String,

    /// Zero-based chunk index
    pub chunk_index: usize,

    pub total_chunks: usize,

    /// Fixed chunk size in bytes, 0 for append mode
    pub chunk_size: u64,

    pub data: Bytes,

    /// Required on chunk 0 only
    pub metadata: Option<MetadataRecord>,
}

/// What happened to a chunk
#[derive(Debug)]
pub enum ChunkOutcome {
    Received {
        chunk_index: usize,
        chunks_received: usize,
        total_chunks: usize,
    },
    AlreadyProcessed {
        chunk_index: usize,
    },
    Finalized(FinalizeOutcome),
}

/// Response for a non-terminal chunk
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkStatusResponse {
    pub status: &'static str,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunks_received: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<usize>,
}

// ============================================================================
// Finalize Types
// ============================================================================

/// Terminal result of a finalize run
#[derive(Debug)]
pub enum FinalizeOutcome {
    Completed(FinalizeReport),
    Failed(FinalizeFailure),
}

impl FinalizeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Body returned when an artifact has been committed
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeReport {
    pub status: &'static str,
    pub file_path: String,
    pub original_filename: String,
    pub new_filename: String,
    pub original_hash: String,
    pub new_hash: String,
    pub verified: bool,
    pub file_size: u64,
    pub success: bool,
    pub metadata: serde_json::Value,
}

/// Body returned when finalize aborted
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeFailure {
    pub status: &'static str,
    pub error: String,
    pub code: &'static str,
    pub file_path: String,
    pub verified: bool,
    pub success: bool,
}

// ============================================================================
// Integrity / Status Types
// ============================================================================

/// Response for the standalone hash endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HashResponse {
    pub hash: String,
    pub algorithm: &'static str,
    pub size: usize,
}

/// Stored verification state of a committed artifact
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub verified: bool,
    pub original_hash: String,
    pub new_hash: String,
    pub final_filename: String,
    pub error: Option<String>,
}

/// Coarse processing state derived from a sidecar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingState {
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStatus {
    pub status: ProcessingState,
    pub completed: bool,
    pub verified: bool,
    pub error: Option<String>,
    pub original_hash: Option<String>,
    pub new_hash: Option<String>,
    pub final_filename: Option<String>,
}

/// Result of a cancellation request
#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub status: &'static str,
    pub message: String,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload folder not configured: {0}")]
    Configuration(String),

    #[error("Invalid upload request: {0}")]
    Validation(String),

    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Upload session expired: {0}")]
    SessionExpired(String),

    #[error("Failed to write chunk after {attempts} attempts: {message}")]
    ChunkWrite { attempts: u32, message: String },

    #[error("File integrity verification failed - hashes do not match (expected {expected}, got {actual})")]
    Integrity { expected: String, actual: String },

    #[error("Destination file already exists: {0}")]
    Collision(String),

    #[error("Failed to rename file after {attempts} attempts: {message}")]
    Rename { attempts: u32, message: String },

    #[error("File too large: {size} bytes (max: {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Metadata file not found for {0}")]
    MetadataNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl UploadError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionExpired(_) => StatusCode::GONE,
            Self::ChunkWrite { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Integrity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Collision(_) => StatusCode::CONFLICT,
            Self::Rename { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::MetadataNotFound(_) => StatusCode::NOT_FOUND,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionExpired(_) => "SESSION_EXPIRED",
            Self::ChunkWrite { .. } => "CHUNK_WRITE_ERROR",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::Collision(_) => "COLLISION_ERROR",
            Self::Rename { .. } => "RENAME_ERROR",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::MetadataNotFound(_) => "METADATA_NOT_FOUND",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether an aborted finalize should delete the artifact.
    ///
    /// Only provably bad or unusable artifacts are removed; a verified file
    /// that could not be renamed stays where it is.
    pub fn discards_artifact(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Integrity { .. })
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for UploadError {
    fn from(err: serde_json::Error) -> Self {
        UploadError::Storage(format!("Invalid metadata JSON: {}", err))
    }
}
