//! Upload Session Registry
//!
//! Tracks in-flight uploads with:
//! - One registry-wide lock guarding the session table
//! - One lock per target file serializing its chunk writes and finalize
//! - Idle-timeout eviction (on lookup and from a background task)
//!
//! Lock order is always registry then file; the registry lock is never
//! held while waiting on a file lock.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use super::metadata::MetadataRecord;
use super::paths::resolve_upload_folder;
use super::types::{RecordOutcome, SessionKey, SessionLookup, UploadError, UploadSession};

/// Per-target-file lock
pub type FileLock = Arc<Mutex<()>>;

// ============================================================================
// Session Registry
// ============================================================================

#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<SessionRegistryInner>,
}

struct SessionRegistryInner {
    table: Mutex<SessionTable>,

    /// Base folder uploads are placed under
    storage_root: Option<PathBuf>,

    idle_timeout: Duration,
}

#[derive(Default)]
struct SessionTable {
    sessions: HashMap<SessionKey, UploadSession>,
    file_locks: HashMap<PathBuf, FileLock>,
}

impl SessionTable {
    /// Drop a session and, unless another live session targets the same
    /// file, its file lock.
    fn remove(&mut self, key: &SessionKey) -> Option<UploadSession> {
        let session = self.sessions.remove(key)?;
        let target = session.target_path();
        let shared = self.sessions.values().any(|s| s.target_path() == target);
        if !shared {
            self.file_locks.remove(&target);
        }
        Some(session)
    }
}

impl SessionRegistry {
    pub fn new(storage_root: Option<PathBuf>, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(SessionRegistryInner {
                table: Mutex::new(SessionTable::default()),
                storage_root,
                idle_timeout,
            }),
        }
    }

    pub fn storage_root(&self) -> Result<&Path, UploadError> {
        self.inner
            .storage_root
            .as_deref()
            .ok_or_else(|| UploadError::Configuration("UPLOAD_FOLDER not set in configuration".to_string()))
    }

    pub fn idle_timeout(&self) -> Duration {
        self.inner.idle_timeout
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Start a session for chunk 0, discarding any live session under the
    /// same key. The discarded session's files are left on disk.
    pub async fn begin_or_reset(
        &self,
        key: SessionKey,
        file_name: &str,
        total_chunks: usize,
        chunk_size: u64,
        metadata: MetadataRecord,
    ) -> Result<UploadSession, UploadError> {
        let root = self.storage_root()?;
        let folder_name = metadata
            .folder_name
            .as_deref()
            .ok_or_else(|| UploadError::Validation("metadata.folder_name is required".to_string()))?;
        let upload_folder = resolve_upload_folder(root, folder_name)?;

        let session = UploadSession::new(
            key.clone(),
            file_name.to_string(),
            total_chunks,
            chunk_size,
            upload_folder,
            metadata,
        );

        let mut table = self.inner.table.lock().await;

        // A reset keeps the target's lock so a writer of the old
        // generation still excludes the new one
        if let Some(stale) = table.sessions.remove(&key) {
            let stale_target = stale.target_path();
            if stale_target != session.target_path()
                && !table.sessions.values().any(|s| s.target_path() == stale_target)
            {
                table.file_locks.remove(&stale_target);
            }
            tracing::warn!(
                session_key = %key,
                stale_session = %stale.id,
                chunks_received = stale.received_chunks.len(),
                "Clearing existing upload state"
            );
        }

        table
            .file_locks
            .entry(session.target_path())
            .or_insert_with(|| Arc::new(Mutex::new(())));
        table.sessions.insert(key.clone(), session.clone());

        tracing::info!(
            session_key = %key,
            session_id = %session.id,
            total_chunks,
            chunk_size,
            upload_folder = %session.upload_folder.display(),
            "Created upload session"
        );

        Ok(session)
    }

    /// Look up the live session for a non-initial chunk. An idle session
    /// is evicted and reported as expired.
    pub async fn get_active(&self, key: &SessionKey) -> SessionLookup {
        let mut table = self.inner.table.lock().await;

        let idle = match table.sessions.get(key) {
            None => return SessionLookup::NotFound,
            Some(session) => session.is_idle(self.inner.idle_timeout),
        };

        if idle {
            table.remove(key);
            tracing::warn!(session_key = %key, "Upload session expired");
            return SessionLookup::Expired;
        }

        match table.sessions.get(key) {
            Some(session) => SessionLookup::Active(session.clone()),
            None => SessionLookup::NotFound,
        }
    }

    /// Snapshot of the session under `key` if it is still generation `id`
    pub async fn current(&self, key: &SessionKey, id: uuid::Uuid) -> Option<UploadSession> {
        let table = self.inner.table.lock().await;
        table.sessions.get(key).filter(|s| s.id == id).cloned()
    }

    /// Record a written chunk. Re-recording an index is not an error.
    pub async fn record_chunk(&self, key: &SessionKey, id: uuid::Uuid, chunk_index: usize) -> RecordOutcome {
        let mut table = self.inner.table.lock().await;

        let Some(session) = table.sessions.get_mut(key).filter(|s| s.id == id) else {
            return RecordOutcome::NotFound;
        };

        if !session.received_chunks.insert(chunk_index) {
            return RecordOutcome::AlreadyProcessed;
        }
        session.last_activity = Instant::now();

        RecordOutcome::Recorded {
            chunks_received: session.received_chunks.len(),
            total_chunks: session.total_chunks,
        }
    }

    /// Lock guarding writes to `target`
    pub async fn file_lock(&self, target: &Path) -> FileLock {
        let mut table = self.inner.table.lock().await;
        table
            .file_locks
            .entry(target.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Remove the session under `key` only while it is still generation
    /// `id`. A session installed by a later chunk-0 restart is left alone.
    pub async fn release_generation(&self, key: &SessionKey, id: uuid::Uuid) -> Option<UploadSession> {
        let mut table = self.inner.table.lock().await;
        if table.sessions.get(key).map_or(true, |s| s.id != id) {
            tracing::debug!(session_key = %key, session_id = %id, "Session already replaced, nothing to release");
            return None;
        }
        let released = table.remove(key);
        tracing::info!(session_key = %key, session_id = %id, "Released upload session");
        released
    }

    /// Release every session placed in `folder` (or below it), returning
    /// them with their file locks so the caller can wait out in-flight
    /// writes before touching the disk.
    pub async fn release_folder(&self, folder: &Path) -> Vec<(UploadSession, FileLock)> {
        let mut table = self.inner.table.lock().await;

        let keys: Vec<SessionKey> = table
            .sessions
            .iter()
            .filter(|(_, s)| s.upload_folder.starts_with(folder))
            .map(|(k, _)| k.clone())
            .collect();

        let mut released = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = table
                .sessions
                .get(&key)
                .and_then(|s| table.file_locks.get(&s.target_path()).cloned())
                .unwrap_or_else(|| Arc::new(Mutex::new(())));
            if let Some(session) = table.remove(&key) {
                tracing::info!(session_key = %key, "Released upload session for cancellation");
                released.push((session, lock));
            }
        }
        released
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    pub async fn session_count(&self) -> usize {
        self.inner.table.lock().await.sessions.len()
    }

    pub async fn file_lock_count(&self) -> usize {
        self.inner.table.lock().await.file_locks.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Evict idle sessions. Partial artifacts stay on disk.
    ///
    /// Returns the number of sessions evicted
    pub async fn evict_expired(&self) -> usize {
        let mut table = self.inner.table.lock().await;
        let timeout = self.inner.idle_timeout;

        let expired: Vec<SessionKey> = table
            .sessions
            .iter()
            .filter(|(_, s)| s.is_idle(timeout))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            table.remove(key);
            tracing::debug!(session_key = %key, "Evicted idle upload session");
        }

        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Evicted idle upload sessions");
        }

        expired.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
