//! Upload Routes
//!
//! HTTP endpoints for the chunked intake protocol.
//!
//! Endpoints:
//! - POST /upload-chunk - Upload one chunk (multipart)
//! - POST /cancel-upload - Cancel an upload and delete its folder
//! - POST /calculate-hash - Hash a whole uploaded blob
//! - POST /calculate-hash-chunk - Feed one chunk of a client-side hash
//! - POST /cancel-hash-calculation - Drop a pending hash calculation
//! - POST /verify-file - Report stored verification state
//! - GET /processing-status - Report finalize progress of an artifact

use std::collections::HashMap;
use std::str::FromStr;

use axum::{
    body::Bytes,
    extract::{Multipart, Query, State},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::upload::{
    CancelResponse, ChunkOutcome, ChunkRequest, ChunkStatusResponse, FinalizeOutcome, HashProgress,
    HashResponse, MetadataRecord, ProcessingStatus, UploadError, VerificationReport,
    STATUS_CHUNK_DUPLICATE, STATUS_CHUNK_RECEIVED,
};

// ============================================================================
// Error Response
// ============================================================================

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: &'static str,
    success: bool,
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Upload request failed");
        } else {
            tracing::warn!(code = self.code(), error = %self, "Upload request rejected");
        }

        let body = Json(ErrorResponse {
            error: self.to_string(),
            code: self.code(),
            success: false,
        });

        (status, body).into_response()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload-chunk", post(upload_chunk))
        .route("/cancel-upload", post(cancel_upload))
        .route("/calculate-hash", post(calculate_hash))
        .route("/calculate-hash-chunk", post(calculate_hash_chunk))
        .route("/cancel-hash-calculation", post(cancel_hash_calculation))
        .route("/verify-file", post(verify_file))
        .route("/processing-status", get(processing_status))
}

// ============================================================================
// Multipart Form
// ============================================================================

/// Uploaded file part plus the text fields of a multipart request
#[derive(Default)]
struct Form {
    file_name: Option<String>,
    file: Option<Bytes>,
    fields: HashMap<String, String>,
}

impl Form {
    async fn read(mut multipart: Multipart) -> Result<Self, UploadError> {
        let mut form = Form::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| UploadError::Validation(format!("Failed to read multipart field: {}", e)))?
        {
            let name = field.name().unwrap_or("").to_string();

            if name == "file" {
                form.file_name = field.file_name().map(|s| s.to_string());
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| UploadError::Validation(format!("Failed to read file data: {}", e)))?;
                form.file = Some(data);
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| UploadError::Validation(format!("Failed to read field {}: {}", name, e)))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Numeric field, `default` when absent
    fn number<T: FromStr>(&self, name: &str, default: T) -> Result<T, UploadError> {
        match self.fields.get(name) {
            None => Ok(default),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| UploadError::Validation(format!("Invalid {}: {}", name, raw))),
        }
    }

    /// Numeric field the client must send
    fn required_number<T: FromStr>(&self, name: &str) -> Result<T, UploadError> {
        let raw = self
            .fields
            .get(name)
            .ok_or_else(|| UploadError::Validation(format!("Missing field: {}", name)))?;
        raw.trim()
            .parse()
            .map_err(|_| UploadError::Validation(format!("Invalid {}: {}", name, raw)))
    }

    fn take_file(&mut self, missing: &str) -> Result<(String, Bytes), UploadError> {
        let data = self
            .file
            .take()
            .ok_or_else(|| UploadError::Validation(missing.to_string()))?;
        let name = self.file_name.take().unwrap_or_default();
        Ok((name, data))
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload-chunk
///
/// Fields: `file`, `chunk`, `totalChunks`, optional `chunkSize`, and on
/// chunk 0 a JSON `metadata` record.
async fn upload_chunk(State(state): State<AppState>, multipart: Multipart) -> Result<Response, UploadError> {
    let mut form = Form::read(multipart).await?;
    let (file_name, data) = form.take_file("No file chunk received")?;

    let metadata = match form.fields.get("metadata") {
        Some(raw) if !raw.trim().is_empty() => Some(
            serde_json::from_str::<MetadataRecord>(raw)
                .map_err(|e| UploadError::Validation(format!("Invalid metadata: {}", e)))?,
        ),
        _ => None,
    };

    let request = ChunkRequest {
        file_name,
        chunk_index: form.required_number("chunk")?,
        total_chunks: form.required_number("totalChunks")?,
        chunk_size: form.number("chunkSize", 0)?,
        data,
        metadata,
    };

    let response = match state.uploads().process_chunk(request).await? {
        ChunkOutcome::Received {
            chunk_index,
            chunks_received,
            total_chunks,
        } => Json(ChunkStatusResponse {
            status: STATUS_CHUNK_RECEIVED,
            chunk_index: Some(chunk_index),
            chunks_received: Some(chunks_received),
            total_chunks: Some(total_chunks),
        })
        .into_response(),
        ChunkOutcome::AlreadyProcessed { chunk_index } => Json(ChunkStatusResponse {
            status: STATUS_CHUNK_DUPLICATE,
            chunk_index: Some(chunk_index),
            chunks_received: None,
            total_chunks: None,
        })
        .into_response(),
        ChunkOutcome::Finalized(FinalizeOutcome::Completed(report)) => Json(report).into_response(),
        // finalize failures are a normal terminal answer, not a transport error
        ChunkOutcome::Finalized(FinalizeOutcome::Failed(failure)) => Json(failure).into_response(),
    };

    Ok(response)
}

#[derive(Debug, Deserialize)]
pub struct CancelUploadRequest {
    pub folder_name: Option<String>,
}

/// POST /cancel-upload
async fn cancel_upload(
    State(state): State<AppState>,
    Json(request): Json<CancelUploadRequest>,
) -> Result<Json<CancelResponse>, UploadError> {
    let folder_name = request
        .folder_name
        .filter(|f| !f.trim().is_empty())
        .ok_or_else(|| UploadError::Validation("No folder name provided".to_string()))?;

    Ok(Json(state.uploads().cancel_upload(&folder_name).await?))
}

/// POST /calculate-hash
async fn calculate_hash(State(state): State<AppState>, multipart: Multipart) -> Result<Json<HashResponse>, UploadError> {
    let mut form = Form::read(multipart).await?;
    let (_, data) = form.take_file("No file received")?;

    Ok(Json(state.uploads().hash_blob(data).await?))
}

/// POST /calculate-hash-chunk
///
/// Fields: `file`, `chunk`, `totalChunks`, `fileSize`. Chunks must arrive
/// in index order; chunk 0 restarts the calculation.
async fn calculate_hash_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<HashProgress>, UploadError> {
    let mut form = Form::read(multipart).await?;
    let (file_name, data) = form.take_file("No chunk received")?;

    let progress = state.uploads().hash_chunk(
        &file_name,
        form.number("fileSize", 0)?,
        form.number("chunk", 0)?,
        form.number("totalChunks", 1)?,
        &data,
    )?;

    Ok(Json(progress))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelHashRequest {
    pub file_id: String,
}

#[derive(Serialize)]
struct CancelHashResponse {
    status: &'static str,
}

/// POST /cancel-hash-calculation
async fn cancel_hash_calculation(
    State(state): State<AppState>,
    Json(request): Json<CancelHashRequest>,
) -> Json<CancelHashResponse> {
    state.uploads().cancel_hash(&request.file_id);
    Json(CancelHashResponse { status: "cancelled" })
}

#[derive(Debug, Deserialize)]
pub struct VerifyFileRequest {
    pub folder_name: String,
    pub filename: String,
    #[serde(default)]
    pub hash: Option<String>,
}

/// POST /verify-file
async fn verify_file(
    State(state): State<AppState>,
    Json(request): Json<VerifyFileRequest>,
) -> Result<Json<VerificationReport>, UploadError> {
    let report = state
        .uploads()
        .verify_artifact(&request.folder_name, &request.filename, request.hash.as_deref())
        .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct ProcessingStatusQuery {
    pub folder_name: String,
    pub filename: String,
}

/// GET /processing-status?folder_name=&filename=
async fn processing_status(
    State(state): State<AppState>,
    Query(query): Query<ProcessingStatusQuery>,
) -> Result<Json<ProcessingStatus>, UploadError> {
    let status = state
        .uploads()
        .processing_status(&query.folder_name, &query.filename)
        .await?;
    Ok(Json(status))
}
