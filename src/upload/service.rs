//! Upload Service
//!
//! Entry point the HTTP layer talks to. Owns one instance of every
//! collaborator and drives a chunk from validation through write, record
//! and, on the last chunk, finalize.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;

use super::chunk_writer::ChunkWriter;
use super::cleanup::{CleanupManager, FolderRemoval};
use super::finalize::{FinalizeJob, FinalizePipeline};
use super::hash::{HashAlgorithm, HashCalculations, HashEngine, HashProgress};
use super::metadata::{MetadataRecord, MetadataStore};
use super::paths::{resolve_upload_folder, secure_filename};
use super::retry::RetryPolicy;
use super::session::SessionRegistry;
use super::types::*;

// ============================================================================
// Settings
// ============================================================================

/// Tunables of the upload engine
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Base folder uploads are placed under; unset rejects every chunk
    pub storage_root: Option<PathBuf>,
    pub max_file_size: u64,
    pub hash_algorithm: HashAlgorithm,
    pub idle_timeout: Duration,
    pub chunk_write_retry: RetryPolicy,
    pub rename_retry: RetryPolicy,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            storage_root: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            hash_algorithm: HashAlgorithm::default(),
            idle_timeout: SESSION_IDLE_TIMEOUT,
            chunk_write_retry: RetryPolicy::chunk_write(),
            rename_retry: RetryPolicy::rename(),
        }
    }
}

impl UploadSettings {
    pub fn with_storage_root(root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: Some(root.into()),
            ..Self::default()
        }
    }
}

// ============================================================================
// Service
// ============================================================================

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<UploadServiceInner>,
}

struct UploadServiceInner {
    registry: SessionRegistry,
    writer: ChunkWriter,
    pipeline: FinalizePipeline,
    metadata: MetadataStore,
    cleanup: CleanupManager,
    hashes: HashEngine,
    calculations: HashCalculations,
    max_file_size: u64,
}

impl UploadService {
    pub fn new(settings: UploadSettings) -> Self {
        let hashes = HashEngine::new(settings.hash_algorithm);
        let metadata = MetadataStore::new();
        let cleanup = CleanupManager::new();

        Self {
            inner: Arc::new(UploadServiceInner {
                registry: SessionRegistry::new(settings.storage_root, settings.idle_timeout),
                writer: ChunkWriter::new(settings.chunk_write_retry),
                pipeline: FinalizePipeline::new(hashes, metadata, cleanup, settings.rename_retry),
                metadata,
                cleanup,
                hashes,
                calculations: HashCalculations::new(hashes),
                max_file_size: settings.max_file_size,
            }),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.inner.hashes.algorithm()
    }

    // ========================================================================
    // Chunk Intake
    // ========================================================================

    /// Accept one chunk. The last chunk of a session runs the finalize
    /// pipeline before returning.
    pub async fn process_chunk(&self, request: ChunkRequest) -> Result<ChunkOutcome, UploadError> {
        let registry = &self.inner.registry;
        registry.storage_root()?;

        if request.total_chunks == 0 {
            return Err(UploadError::Validation("totalChunks must be at least 1".to_string()));
        }
        if request.chunk_index >= request.total_chunks {
            return Err(UploadError::Validation(format!(
                "Chunk index {} out of bounds for {} chunks",
                request.chunk_index, request.total_chunks
            )));
        }
        let file_name = secure_filename(&request.file_name)
            .ok_or_else(|| UploadError::Validation(format!("Invalid filename: {}", request.file_name)))?;

        let key = SessionKey::new(&file_name, request.total_chunks);

        let session = if request.chunk_index == 0 {
            self.check_bounds(0, request.chunk_size, request.data.len())?;
            let metadata = request
                .metadata
                .clone()
                .ok_or_else(|| UploadError::Validation("metadata is required with the first chunk".to_string()))?;
            registry
                .begin_or_reset(key.clone(), &file_name, request.total_chunks, request.chunk_size, metadata)
                .await?
        } else {
            let session = match registry.get_active(&key).await {
                SessionLookup::Active(session) => session,
                SessionLookup::NotFound => return Err(UploadError::SessionNotFound(key.to_string())),
                SessionLookup::Expired => return Err(UploadError::SessionExpired(key.to_string())),
            };
            self.check_bounds(request.chunk_index, session.chunk_size, request.data.len())?;
            session
        };

        let target = session.target_path();
        let lock = registry.file_lock(&target).await;
        let _guard = lock.lock().await;

        // Another request may have finalized or reset the session while we waited
        let Some(session) = registry.current(&key, session.id).await else {
            tracing::debug!(session_key = %key, chunk_index = request.chunk_index, "Session moved on while waiting");
            return Ok(ChunkOutcome::AlreadyProcessed {
                chunk_index: request.chunk_index,
            });
        };
        if session.received_chunks.contains(&request.chunk_index) {
            tracing::warn!(session_key = %key, chunk_index = request.chunk_index, "Chunk already processed");
            return Ok(ChunkOutcome::AlreadyProcessed {
                chunk_index: request.chunk_index,
            });
        }

        // In append mode the end offset depends on what is already on disk
        if session.chunk_size == 0 && request.chunk_index > 0 {
            let written = match tokio::fs::metadata(&target).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
                Err(e) => return Err(e.into()),
            };
            self.check_ceiling(written.saturating_add(request.data.len() as u64))?;
        }

        if request.chunk_index == 0 {
            if let Err(e) = self.store_initial_metadata(&session).await {
                tracing::error!(session_key = %key, error = %e, "Failed to store initial metadata");
                registry.release_generation(&key, session.id).await;
                return Err(e);
            }
        }

        if let Err(e) = self
            .inner
            .writer
            .write_chunk(&target, request.chunk_index, session.chunk_size, &request.data)
            .await
        {
            tracing::error!(
                session_key = %key,
                chunk_index = request.chunk_index,
                error = %e,
                "Chunk write failed, releasing session"
            );
            registry.release_generation(&key, session.id).await;
            return Err(e);
        }

        match registry.record_chunk(&key, session.id, request.chunk_index).await {
            RecordOutcome::Recorded {
                chunks_received,
                total_chunks,
            } if chunks_received == total_chunks => {
                tracing::info!(session_key = %key, "All chunks received, processing file");
                let outcome = self
                    .inner
                    .pipeline
                    .run(FinalizeJob {
                        upload_folder: session.upload_folder.clone(),
                        file_name: session.file_name.clone(),
                        metadata: session.metadata.clone(),
                    })
                    .await;
                registry.release_generation(&key, session.id).await;
                Ok(ChunkOutcome::Finalized(outcome))
            }
            RecordOutcome::Recorded {
                chunks_received,
                total_chunks,
            } => {
                tracing::debug!(
                    session_key = %key,
                    chunk_index = request.chunk_index,
                    chunks_received,
                    total_chunks,
                    "Chunk received"
                );
                Ok(ChunkOutcome::Received {
                    chunk_index: request.chunk_index,
                    chunks_received,
                    total_chunks,
                })
            }
            RecordOutcome::AlreadyProcessed | RecordOutcome::NotFound => Ok(ChunkOutcome::AlreadyProcessed {
                chunk_index: request.chunk_index,
            }),
        }
    }

    /// Reject chunks larger than the declared size or reaching past the
    /// configured file-size ceiling. Append-mode chunks are checked again
    /// under the file lock once the current length is known.
    fn check_bounds(&self, chunk_index: usize, chunk_size: u64, len: usize) -> Result<(), UploadError> {
        let len = len as u64;
        if chunk_size > 0 && len > chunk_size {
            return Err(UploadError::Validation(format!(
                "Chunk of {} bytes exceeds declared chunk size {}",
                len, chunk_size
            )));
        }

        let end = (chunk_index as u64)
            .checked_mul(chunk_size)
            .and_then(|offset| offset.checked_add(len))
            .unwrap_or(u64::MAX);
        self.check_ceiling(end)
    }

    fn check_ceiling(&self, end: u64) -> Result<(), UploadError> {
        let max = self.inner.max_file_size;
        if end > max {
            return Err(UploadError::FileTooLarge { size: end, max });
        }
        Ok(())
    }

    /// Replace any sidecar left by an earlier attempt with the client record
    async fn store_initial_metadata(&self, session: &UploadSession) -> Result<(), UploadError> {
        tokio::fs::create_dir_all(&session.upload_folder).await?;

        let metadata = &self.inner.metadata;
        if metadata.discard(&session.upload_folder, &session.file_name).await? {
            tracing::info!(file_name = %session.file_name, "Discarded stale metadata");
        }

        let record = MetadataRecord {
            original_filename: Some(session.file_name.clone()),
            ..session.metadata.clone()
        };
        metadata
            .save(&record, &session.upload_folder, &session.file_name)
            .await?;
        Ok(())
    }

    // ========================================================================
    // Idle Eviction
    // ========================================================================

    /// Evict idle upload sessions and abandoned hash calculations.
    /// Partial artifacts stay on disk.
    pub async fn evict_idle(&self) -> usize {
        let timeout = self.inner.registry.idle_timeout();
        let sessions = self.inner.registry.evict_expired().await;
        let hashes = self.inner.calculations.evict_idle(timeout);
        if hashes > 0 {
            tracing::info!(count = hashes, "Evicted idle hash calculations");
        }
        sessions + hashes
    }

    /// Start background eviction task
    pub fn start_eviction_task(self, every: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);

            loop {
                interval.tick().await;
                self.evict_idle().await;
            }
        })
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Drop every session under `folder_name` and delete the folder tree.
    /// Cancelling an unknown folder succeeds.
    pub async fn cancel_upload(&self, folder_name: &str) -> Result<CancelResponse, UploadError> {
        let folder = resolve_upload_folder(self.inner.registry.storage_root()?, folder_name)?;

        let released = self.inner.registry.release_folder(&folder).await;
        for (session, lock) in &released {
            // wait out an in-flight write before deleting underneath it
            let _guard = lock.lock().await;
            tracing::info!(session_key = %session.key, "Cancelled upload session");
        }

        let message = match self.inner.cleanup.remove_upload_folder(&folder).await? {
            FolderRemoval::Deleted => "Upload cancelled and folder deleted",
            FolderRemoval::NotFound => "Folder not found",
        };

        Ok(CancelResponse {
            status: "success",
            message: message.to_string(),
        })
    }

    // ========================================================================
    // Integrity Endpoints
    // ========================================================================

    /// Digest of an uploaded blob, no session state involved
    pub async fn hash_blob(&self, data: Bytes) -> Result<HashResponse, UploadError> {
        let engine = self.inner.hashes;
        let size = data.len();
        let hash = tokio::task::spawn_blocking(move || engine.hash_bytes(&data))
            .await
            .map_err(|e| UploadError::Internal(format!("Hash task failed: {}", e)))?;

        Ok(HashResponse {
            hash,
            algorithm: engine.algorithm().as_str(),
            size,
        })
    }

    /// Feed one chunk of a client-side hash calculation
    pub fn hash_chunk(
        &self,
        file_name: &str,
        file_size: u64,
        chunk_index: usize,
        total_chunks: usize,
        data: &[u8],
    ) -> Result<HashProgress, UploadError> {
        let file_name = secure_filename(file_name)
            .ok_or_else(|| UploadError::Validation(format!("Invalid filename: {}", file_name)))?;
        let file_id = HashCalculations::file_id(&file_name, file_size);
        self.inner
            .calculations
            .update(&file_id, chunk_index, total_chunks, data)
    }

    pub fn cancel_hash(&self, file_id: &str) -> bool {
        let cancelled = self.inner.calculations.cancel(file_id);
        if cancelled {
            tracing::info!(file_id = %file_id, "Cancelled hash calculation");
        }
        cancelled
    }

    /// Stored verification state of an artifact. When `supplied_hash` is
    /// given it must also equal the stored final hash.
    pub async fn verify_artifact(
        &self,
        folder_name: &str,
        file_name: &str,
        supplied_hash: Option<&str>,
    ) -> Result<VerificationReport, UploadError> {
        let (record, file_name) = self.load_record(folder_name, file_name).await?;

        let original_hash = record.original_file_hash.clone().unwrap_or_default();
        let new_hash = record.final_file_hash.clone().unwrap_or_default();
        let mut verified = record.verified.unwrap_or(false);
        let mut error = None;

        if !verified {
            error = Some(
                record
                    .processing_error
                    .clone()
                    .unwrap_or_else(|| "Hash verification failed".to_string()),
            );
        } else if let Some(supplied) = supplied_hash.map(str::trim).filter(|h| !h.is_empty()) {
            if !self.inner.hashes.verify(supplied, &new_hash) {
                verified = false;
                error = Some("Supplied hash does not match stored hash".to_string());
            }
        }

        tracing::info!(file_name = %file_name, verified, "Verification completed");

        Ok(VerificationReport {
            verified,
            original_hash,
            new_hash,
            final_filename: record
                .final_filename
                .or(record.current_filename)
                .unwrap_or(file_name),
            error,
        })
    }

    /// Coarse processing state read from the artifact's sidecar
    pub async fn processing_status(&self, folder_name: &str, file_name: &str) -> Result<ProcessingStatus, UploadError> {
        let (record, _) = self.load_record(folder_name, file_name).await?;

        let completed = record.processing_completed == Some(true);
        let status = if completed {
            ProcessingState::Completed
        } else if record.processing_error.is_some() {
            ProcessingState::Error
        } else {
            ProcessingState::Processing
        };

        Ok(ProcessingStatus {
            status,
            completed,
            verified: record.verified.unwrap_or(false),
            error: record.processing_error,
            original_hash: record.original_file_hash,
            new_hash: record.final_file_hash,
            final_filename: record.final_filename,
        })
    }

    async fn load_record(&self, folder_name: &str, file_name: &str) -> Result<(MetadataRecord, String), UploadError> {
        let folder = resolve_upload_folder(self.inner.registry.storage_root()?, folder_name)?;
        let file_name = secure_filename(file_name)
            .ok_or_else(|| UploadError::Validation(format!("Invalid filename: {}", file_name)))?;
        let record = self.inner.metadata.load(&folder, &file_name).await?;
        Ok((record, file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn service(root: &std::path::Path) -> UploadService {
        UploadService::new(UploadSettings {
            chunk_write_retry: RetryPolicy::exponential(3, Duration::ZERO),
            rename_retry: RetryPolicy::fixed(3, Duration::ZERO),
            ..UploadSettings::with_storage_root(root)
        })
    }

    fn chunk(name: &str, index: usize, total: usize, size: u64, data: &'static [u8]) -> ChunkRequest {
        ChunkRequest {
            file_name: name.to_string(),
            chunk_index: index,
            total_chunks: total,
            chunk_size: size,
            data: Bytes::from_static(data),
            metadata: None,
        }
    }

    fn first_chunk(name: &str, total: usize, size: u64, data: &'static [u8], hash: &str) -> ChunkRequest {
        ChunkRequest {
            metadata: Some(MetadataRecord {
                folder_name: Some("case1".to_string()),
                original_file_hash: Some(hash.to_string()),
                ..Default::default()
            }),
            ..chunk(name, 0, total, size, data)
        }
    }

    #[tokio::test]
    async fn test_missing_storage_root_is_configuration_error() {
        let service = UploadService::new(UploadSettings::default());
        let result = service.process_chunk(first_chunk("a.bin", 1, 1, b"a", "x")).await;
        assert!(matches!(result, Err(UploadError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_request_validation() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());

        let out_of_bounds = service.process_chunk(chunk("a.bin", 3, 3, 1, b"a")).await;
        assert!(matches!(out_of_bounds, Err(UploadError::Validation(_))));

        let no_metadata = service.process_chunk(chunk("a.bin", 0, 3, 1, b"a")).await;
        assert!(matches!(no_metadata, Err(UploadError::Validation(_))));

        let oversized = service.process_chunk(first_chunk("a.bin", 3, 1, b"ab", "x")).await;
        assert!(matches!(oversized, Err(UploadError::Validation(_))));

        let no_session = service.process_chunk(chunk("a.bin", 1, 3, 1, b"a")).await;
        assert!(matches!(no_session, Err(UploadError::SessionNotFound(_))));

        assert_eq!(service.registry().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_file_size_ceiling() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadSettings {
            max_file_size: 10,
            ..UploadSettings::with_storage_root(temp_dir.path())
        });

        service
            .process_chunk(first_chunk("big.bin", 3, 6, b"123456", "x"))
            .await
            .unwrap();
        let result = service.process_chunk(chunk("big.bin", 1, 3, 6, b"123456")).await;

        assert!(matches!(result, Err(UploadError::FileTooLarge { size: 12, max: 10 })));
    }

    #[tokio::test]
    async fn test_file_size_ceiling_in_append_mode() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadSettings {
            max_file_size: 10,
            ..UploadSettings::with_storage_root(temp_dir.path())
        });

        service
            .process_chunk(first_chunk("log.bin", 4, 0, b"12345678", "x"))
            .await
            .unwrap();
        let result = service.process_chunk(chunk("log.bin", 1, 4, 0, b"12345678")).await;

        assert!(matches!(result, Err(UploadError::FileTooLarge { size: 16, max: 10 })));
        assert_eq!(
            std::fs::read(temp_dir.path().join("case1").join("log.bin")).unwrap(),
            b"12345678"
        );

        service.process_chunk(chunk("log.bin", 1, 4, 0, b"90")).await.unwrap();
        let result = service.process_chunk(chunk("log.bin", 2, 4, 0, b"x")).await;
        assert!(matches!(result, Err(UploadError::FileTooLarge { size: 11, max: 10 })));
    }

    #[tokio::test]
    async fn test_restart_survives_release_of_older_generation() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadSettings {
            chunk_write_retry: RetryPolicy::fixed(3, Duration::from_millis(100)),
            ..UploadSettings::with_storage_root(temp_dir.path())
        });
        let target = temp_dir.path().join("case1").join("r.bin");

        service
            .process_chunk(first_chunk("r.bin", 3, 4, b"abcd", "x"))
            .await
            .unwrap();

        // a directory in place of the file keeps chunk 1 retrying under the lock
        std::fs::remove_file(&target).unwrap();
        std::fs::create_dir(&target).unwrap();
        let old_writer = tokio::spawn({
            let service = service.clone();
            async move { service.process_chunk(chunk("r.bin", 1, 3, 4, b"efgh")).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let restart = tokio::spawn({
            let service = service.clone();
            async move { service.process_chunk(first_chunk("r.bin", 3, 4, b"ABCD", "x")).await }
        });

        let old = old_writer.await.unwrap();
        assert!(matches!(old, Err(UploadError::ChunkWrite { .. })));
        std::fs::remove_dir(&target).unwrap();

        let restarted = restart.await.unwrap().unwrap();
        assert!(matches!(
            restarted,
            ChunkOutcome::Received {
                chunk_index: 0,
                chunks_received: 1,
                ..
            }
        ));
        assert_eq!(service.registry().session_count().await, 1);

        let next = service.process_chunk(chunk("r.bin", 1, 3, 4, b"EFGH")).await.unwrap();
        assert!(matches!(next, ChunkOutcome::Received { chunks_received: 2, .. }));
        assert_eq!(std::fs::read(&target).unwrap(), b"ABCDEFGH");
    }

    #[tokio::test]
    async fn test_chunk_flow_and_duplicate() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());

        let first = service
            .process_chunk(first_chunk("d.bin", 3, 4, b"abcd", "x"))
            .await
            .unwrap();
        assert!(matches!(
            first,
            ChunkOutcome::Received {
                chunks_received: 1,
                total_chunks: 3,
                ..
            }
        ));

        let sidecar = MetadataStore::new()
            .load(&temp_dir.path().join("case1"), "d.bin")
            .await
            .unwrap();
        assert_eq!(sidecar.original_filename.as_deref(), Some("d.bin"));
        assert_eq!(sidecar.original_file_hash.as_deref(), Some("x"));

        service.process_chunk(chunk("d.bin", 1, 3, 4, b"efgh")).await.unwrap();
        let dup = service.process_chunk(chunk("d.bin", 1, 3, 4, b"zzzz")).await.unwrap();

        assert!(matches!(dup, ChunkOutcome::AlreadyProcessed { chunk_index: 1 }));
        assert_eq!(
            std::fs::read(temp_dir.path().join("case1").join("d.bin")).unwrap(),
            b"abcdefgh"
        );
    }

    #[tokio::test]
    async fn test_write_failure_releases_session() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());
        std::fs::create_dir_all(temp_dir.path().join("case1").join("blocked.bin")).unwrap();

        let result = service
            .process_chunk(first_chunk("blocked.bin", 2, 4, b"abcd", "x"))
            .await;

        assert!(matches!(result, Err(UploadError::ChunkWrite { attempts: 3, .. })));
        assert_eq!(service.registry().session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_upload_removes_folder_and_sessions() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());

        service
            .process_chunk(first_chunk("c.bin", 4, 2, b"ab", "x"))
            .await
            .unwrap();
        assert_eq!(service.registry().session_count().await, 1);

        let cancelled = service.cancel_upload("case1").await.unwrap();
        assert_eq!(cancelled.message, "Upload cancelled and folder deleted");
        assert!(!temp_dir.path().join("case1").exists());
        assert_eq!(service.registry().session_count().await, 0);

        let again = service.cancel_upload("case1").await.unwrap();
        assert_eq!(again.status, "success");
        assert_eq!(again.message, "Folder not found");

        let late = service.process_chunk(chunk("c.bin", 1, 4, 2, b"cd")).await;
        assert!(matches!(late, Err(UploadError::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_status_and_verification_after_commit() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());
        let hash = HashEngine::default().hash_bytes(b"whole");

        let outcome = service
            .process_chunk(first_chunk("w.txt", 1, 0, b"whole", &hash))
            .await
            .unwrap();
        assert!(matches!(outcome, ChunkOutcome::Finalized(ref o) if o.is_success()));

        let status = service.processing_status("case1", "w.txt").await.unwrap();
        assert_eq!(status.status, ProcessingState::Completed);
        assert!(status.verified);
        assert_eq!(status.final_filename.as_deref(), Some("w_complete.txt"));

        let report = service.verify_artifact("case1", "w_complete.txt", Some(&hash)).await.unwrap();
        assert!(report.verified);
        assert_eq!(report.new_hash, hash);
        assert!(report.error.is_none());

        let wrong = service.verify_artifact("case1", "w.txt", Some("deadbeef")).await.unwrap();
        assert!(!wrong.verified);
        assert!(wrong.error.is_some());

        let missing = service.processing_status("case1", "nope.txt").await;
        assert!(matches!(missing, Err(UploadError::MetadataNotFound(_))));
    }

    #[tokio::test]
    async fn test_evict_idle_sweeps_sessions_and_hash_calculations() {
        let temp_dir = TempDir::new().unwrap();
        let service = UploadService::new(UploadSettings {
            idle_timeout: Duration::from_millis(20),
            ..UploadSettings::with_storage_root(temp_dir.path())
        });

        service
            .process_chunk(first_chunk("e.bin", 2, 2, b"ab", "x"))
            .await
            .unwrap();
        service.hash_chunk("e.bin", 4, 0, 2, b"ab").unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(service.evict_idle().await, 2);
        assert_eq!(service.registry().session_count().await, 0);
        assert!(!service.cancel_hash(&HashCalculations::file_id("e.bin", 4)));
        assert!(temp_dir.path().join("case1").join("e.bin").exists());
    }

    #[tokio::test]
    async fn test_hash_endpoints() {
        let temp_dir = TempDir::new().unwrap();
        let service = service(temp_dir.path());

        let blob = service.hash_blob(Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(blob.hash, "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(blob.algorithm, "md5");
        assert_eq!(blob.size, 3);

        assert!(matches!(
            service.hash_chunk("abc.txt", 3, 0, 2, b"ab").unwrap(),
            HashProgress::Processing { .. }
        ));
        assert_eq!(
            service.hash_chunk("abc.txt", 3, 1, 2, b"c").unwrap(),
            HashProgress::Complete {
                final_hash: blob.hash.clone()
            }
        );

        service.hash_chunk("other.txt", 9, 0, 3, b"abc").unwrap();
        assert!(service.cancel_hash(&HashCalculations::file_id("other.txt", 9)));
        assert!(!service.cancel_hash(&HashCalculations::file_id("other.txt", 9)));
    }
}
