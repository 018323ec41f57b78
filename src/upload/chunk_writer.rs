//! Chunk Writer
//!
//! Places one chunk's bytes at its offset inside the assembling file and
//! forces them to the storage device before reporting success.

use std::io::{self, SeekFrom};
use std::path::Path;

use tokio::fs::OpenOptions;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};

use super::retry::{Attempt, RetryError, RetryPolicy};
use super::types::UploadError;

#[derive(Debug, Clone, Copy)]
pub struct ChunkWriter {
    retry: RetryPolicy,
}

impl ChunkWriter {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Write `data` at `chunk_index * chunk_size`, or append when
    /// `chunk_size` is 0. Chunk 0 creates the parent folder and resets the
    /// file to zero length.
    pub async fn write_chunk(
        &self,
        target: &Path,
        chunk_index: usize,
        chunk_size: u64,
        data: &[u8],
    ) -> Result<(), UploadError> {
        let offset = chunk_offset(chunk_index, chunk_size)?;

        let result = self
            .retry
            .run("write chunk", |_| async move {
                write_once(target, chunk_index, offset, data)
                    .await
                    .map_err(Attempt::Transient)
            })
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    file_path = %target.display(),
                    chunk_index,
                    bytes = data.len(),
                    "Chunk written"
                );
                Ok(())
            }
            Err(RetryError::Exhausted { attempts, last }) => Err(UploadError::ChunkWrite {
                attempts,
                message: last.to_string(),
            }),
            Err(RetryError::Permanent(e)) => Err(UploadError::ChunkWrite {
                attempts: 1,
                message: e.to_string(),
            }),
        }
    }
}

/// Byte offset of a chunk, `None` in append mode
fn chunk_offset(chunk_index: usize, chunk_size: u64) -> Result<Option<u64>, UploadError> {
    if chunk_size == 0 {
        return Ok(None);
    }
    (chunk_index as u64)
        .checked_mul(chunk_size)
        .map(Some)
        .ok_or_else(|| {
            UploadError::Validation(format!(
                "Chunk offset overflows: index {} x size {}",
                chunk_index, chunk_size
            ))
        })
}

async fn write_once(
    target: &Path,
    chunk_index: usize,
    offset: Option<u64>,
    data: &[u8],
) -> io::Result<()> {
    if chunk_index == 0 {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true);
    if chunk_index == 0 {
        options.truncate(true);
    }
    let mut file = options.open(target).await?;

    match offset {
        Some(offset) => file.seek(SeekFrom::Start(offset)).await?,
        None => file.seek(SeekFrom::End(0)).await?,
    };

    file.write_all(data).await?;
    file.flush().await?;
    file.sync_all().await?;

    Ok(())
}
