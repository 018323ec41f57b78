//! Finalize Pipeline
//!
//! Turns a fully assembled upload into a committed artifact:
//!
//! 1. Assembled - file exists and a declared hash is present
//! 2. Verified - server-side digest equals the declared digest
//! 3. Renamed - optional client-requested name
//! 4. CompletionTagged - `_complete` suffix appended
//! 5. Committed - final record written with `processingCompleted = true`
//!
//! Any failure moves to Aborted: the sidecar is annotated (best effort) and
//! provably bad artifacts are deleted. Artifact and sidecar are renamed in
//! lock-step at every step.

use std::path::{Path, PathBuf};

use chrono::Utc;

use super::cleanup::CleanupManager;
use super::hash::HashEngine;
use super::metadata::{MetadataRecord, MetadataStore};
use super::paths::{completed_name, secure_filename, sidecar_path_for};
use super::retry::{Attempt, RetryError, RetryPolicy};
use super::types::{
    FinalizeFailure, FinalizeOutcome, FinalizeReport, UploadError, STATUS_FINALIZE_FAILED,
    STATUS_FINALIZE_SUCCESS,
};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStage {
    Assembled,
    Verified,
    Renamed,
    CompletionTagged,
    Committed,
    Aborted,
}

/// Input of one finalize run
#[derive(Debug, Clone)]
pub struct FinalizeJob {
    pub upload_folder: PathBuf,
    pub file_name: String,
    pub metadata: MetadataRecord,
}

/// Mutable state threaded through the steps
struct Progress {
    folder: PathBuf,
    current_name: String,
    record: MetadataRecord,
    stage: FinalizeStage,
}

impl Progress {
    fn current_path(&self) -> PathBuf {
        self.folder.join(&self.current_name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FinalizePipeline {
    hashes: HashEngine,
    metadata: MetadataStore,
    cleanup: CleanupManager,
    rename_retry: RetryPolicy,
}

impl FinalizePipeline {
    pub fn new(
        hashes: HashEngine,
        metadata: MetadataStore,
        cleanup: CleanupManager,
        rename_retry: RetryPolicy,
    ) -> Self {
        Self {
            hashes,
            metadata,
            cleanup,
            rename_retry,
        }
    }

    /// Run the pipeline to a terminal state. Callers must hold the file
    /// lock of the assembling file for the whole run.
    pub async fn run(&self, job: FinalizeJob) -> FinalizeOutcome {
        let mut progress = Progress {
            folder: job.upload_folder,
            current_name: job.file_name,
            record: job.metadata,
            stage: FinalizeStage::Assembled,
        };

        tracing::info!(
            file_path = %progress.current_path().display(),
            "Finalizing upload"
        );

        match self.advance(&mut progress).await {
            Ok(report) => {
                tracing::info!(
                    file_path = %report.file_path,
                    hash = %report.new_hash,
                    size = report.file_size,
                    "Upload committed"
                );
                FinalizeOutcome::Completed(report)
            }
            Err(error) => FinalizeOutcome::Failed(self.abort(progress, error).await),
        }
    }

    async fn advance(&self, p: &mut Progress) -> Result<FinalizeReport, UploadError> {
        let declared = self.validate(p).await?;

        let (final_hash, file_size) = self.verify(p, &declared).await?;
        p.stage = FinalizeStage::Verified;

        if let Some(requested) = p.record.rename_target().map(str::to_string) {
            // An unusable target leaves the verified artifact under its upload name
            let new_name = secure_filename(&requested).unwrap_or_else(|| {
                tracing::warn!(new_filename = %requested, "Rename target has no usable characters, skipping rename");
                p.current_name.clone()
            });
            if new_name != p.current_name {
                tracing::info!(new_filename = %new_name, "Renaming file");
                self.move_artifact(p, &new_name).await?;
                p.record.new_filename = Some(new_name.clone());
                p.record.current_filename = Some(new_name);
                p.record = self.metadata.save(&p.record, &p.folder, &p.current_name).await?;
            }
            p.stage = FinalizeStage::Renamed;
        }

        let complete = completed_name(&p.current_name);
        if complete != p.current_name {
            tracing::info!(complete_filename = %complete, "Adding completion suffix");
            self.move_artifact(p, &complete).await?;
        }
        p.record.final_filename = Some(complete.clone());
        p.record.current_filename = Some(complete);
        p.record = self.metadata.save(&p.record, &p.folder, &p.current_name).await?;
        p.stage = FinalizeStage::CompletionTagged;

        p.record.processing_completed = Some(true);
        p.record.completed_at = Some(Utc::now());
        p.record.file_size = Some(file_size);
        p.record.verified = Some(true);
        p.record = self.metadata.save(&p.record, &p.folder, &p.current_name).await?;
        p.stage = FinalizeStage::Committed;

        Ok(FinalizeReport {
            status: STATUS_FINALIZE_SUCCESS,
            file_path: p.current_path().display().to_string(),
            original_filename: p
                .record
                .original_filename
                .clone()
                .unwrap_or_else(|| p.current_name.clone()),
            new_filename: p.current_name.clone(),
            original_hash: declared,
            new_hash: final_hash,
            verified: true,
            file_size,
            success: true,
            metadata: serde_json::to_value(&p.record)?,
        })
    }

    /// Assembled: the file must exist and a declared hash must be present
    async fn validate(&self, p: &mut Progress) -> Result<String, UploadError> {
        let path = p.current_path();
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(UploadError::Validation(format!("File not found: {}", path.display())));
        }

        let declared = p
            .record
            .declared_hash()
            .map(str::to_string)
            .ok_or_else(|| UploadError::Validation("Original file hash is required".to_string()))?;

        p.record.processing_started = Some(Utc::now());
        p.record.original_filename = Some(p.current_name.clone());
        p.record.current_filename = Some(p.current_name.clone());
        p.record.upload_folder = Some(p.folder.display().to_string());
        p.record = self.metadata.save(&p.record, &p.folder, &p.current_name).await?;

        Ok(declared)
    }

    /// Verified: hash what actually landed on storage and compare
    async fn verify(&self, p: &mut Progress, declared: &str) -> Result<(String, u64), UploadError> {
        let path = p.current_path();
        let file_size = tokio::fs::metadata(&path).await?.len();
        let final_hash = self.hashes.hash_file(&path).await?;
        let verified = self.hashes.verify(declared, &final_hash);

        p.record.file_size = Some(file_size);
        p.record.final_file_hash = Some(final_hash.clone());
        p.record.verified = Some(verified);
        p.record = self.metadata.save(&p.record, &p.folder, &p.current_name).await?;

        if !verified {
            tracing::error!(
                file_path = %path.display(),
                expected = %declared,
                actual = %final_hash,
                "Integrity verification failed"
            );
            return Err(UploadError::Integrity {
                expected: declared.to_string(),
                actual: final_hash,
            });
        }

        tracing::info!(file_path = %path.display(), "File verification completed");
        Ok((final_hash, file_size))
    }

    /// Move artifact and sidecar to `new_name`. A taken destination fails
    /// at once; other failures are retried and leave the source intact.
    async fn move_artifact(&self, p: &mut Progress, new_name: &str) -> Result<(), UploadError> {
        let src = p.current_path();
        let dst = p.folder.join(new_name);

        let result = self
            .rename_retry
            .run("rename artifact", |_| rename_pair(&src, &dst))
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    from = %src.display(),
                    to = %dst.display(),
                    "Renamed artifact"
                );
                p.current_name = new_name.to_string();
                Ok(())
            }
            Err(RetryError::Permanent(e)) => Err(e),
            Err(RetryError::Exhausted { attempts, last }) => Err(UploadError::Rename {
                attempts,
                message: last.to_string(),
            }),
        }
    }

    /// Aborted: annotate, clean up if the artifact is unusable, report
    async fn abort(&self, mut p: Progress, error: UploadError) -> FinalizeFailure {
        let failed_at = p.stage;
        p.stage = FinalizeStage::Aborted;

        tracing::error!(
            file_path = %p.current_path().display(),
            stage = ?failed_at,
            error = %error,
            "File processing failed"
        );

        p.record.processing_error = Some(error.to_string());
        p.record.processing_completed = Some(false);
        p.record.error_timestamp = Some(Utc::now());
        if let Err(e) = self.metadata.save(&p.record, &p.folder, &p.current_name).await {
            tracing::warn!(error = %e, "Failed to update metadata with error");
        }

        if error.discards_artifact() {
            if let Err(e) = self
                .cleanup
                .cleanup_failed_artifact(&p.folder, &p.current_name)
                .await
            {
                tracing::error!(error = %e, "Error during cleanup of failed upload");
            }
        }

        FinalizeFailure {
            status: STATUS_FINALIZE_FAILED,
            error: error.to_string(),
            code: error.code(),
            file_path: p.current_path().display().to_string(),
            verified: p.record.verified.unwrap_or(false) && !error.discards_artifact(),
            success: false,
        }
    }
}

/// One rename attempt of an artifact and its sidecar
async fn rename_pair(src: &Path, dst: &Path) -> Result<(), Attempt<UploadError>> {
    let src_sidecar = sidecar_path_for(src);
    let dst_sidecar = sidecar_path_for(dst);

    if exists(dst).await? || exists(&dst_sidecar).await? {
        return Err(Attempt::Permanent(UploadError::Collision(dst.display().to_string())));
    }
    if !exists(src).await? {
        return Err(Attempt::Permanent(UploadError::Rename {
            attempts: 1,
            message: format!("Source file not found: {}", src.display()),
        }));
    }

    tokio::fs::rename(src, dst)
        .await
        .map_err(|e| Attempt::Transient(UploadError::from(e)))?;

    if exists(&src_sidecar).await? {
        if let Err(e) = tokio::fs::rename(&src_sidecar, &dst_sidecar).await {
            tracing::error!(error = %e, "Error renaming metadata file, reverting file rename");
            if let Err(revert) = tokio::fs::rename(dst, src).await {
                tracing::error!(error = %revert, "Failed to revert file rename");
            }
            return Err(Attempt::Transient(UploadError::from(e)));
        }
    }

    Ok(())
}

async fn exists(path: &Path) -> Result<bool, Attempt<UploadError>> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| Attempt::Transient(UploadError::from(e)))
}
