//! Hash Engine
//!
//! Streaming digest computation over assembled artifacts. MD5 is the
//! default so hashes stay comparable with previously recorded ones; SHA-256
//! can be selected per deployment, but one algorithm is used end to end.

use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::types::UploadError;

/// Block size used when streaming a file through the digest
pub const HASH_BLOCK_SIZE: usize = 8 * 1024;

// ============================================================================
// Algorithm
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unsupported hash algorithm: {}", other)),
        }
    }
}

/// Incremental digest state for either algorithm
pub enum StreamingHasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl StreamingHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Md5 => Self::Md5(md5::Context::new()),
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(data),
            Self::Sha256(hasher) => hasher.update(data),
        }
    }

    /// Lowercase hex digest
    pub fn finalize(self) -> String {
        match self {
            Self::Md5(ctx) => format!("{:x}", ctx.compute()),
            Self::Sha256(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

// ============================================================================
// Hash Engine
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub struct HashEngine {
    algorithm: HashAlgorithm,
}

impl HashEngine {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest of an in-memory buffer
    pub fn hash_bytes(&self, data: &[u8]) -> String {
        let mut hasher = StreamingHasher::new(self.algorithm);
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest of a file, read sequentially in 8 KiB blocks on the blocking pool
    pub async fn hash_file(&self, path: &Path) -> Result<String, UploadError> {
        let algorithm = self.algorithm;
        let owned: PathBuf = path.to_path_buf();

        tracing::debug!(file_path = %path.display(), algorithm = %algorithm, "Calculating file hash");

        let digest = tokio::task::spawn_blocking(move || hash_file_blocking(algorithm, &owned))
            .await
            .map_err(|e| UploadError::Internal(format!("Hash task failed: {}", e)))?
            .map_err(|e| {
                UploadError::Storage(format!("Failed to hash {}: {}", path.display(), e))
            })?;

        tracing::debug!(file_path = %path.display(), hash = %digest, "Hash calculation complete");
        Ok(digest)
    }

    /// Full equality of two digests; the loop always visits every byte.
    pub fn verify(&self, expected: &str, actual: &str) -> bool {
        let a = expected.as_bytes();
        let b = actual.as_bytes();
        if a.len() != b.len() || a.is_empty() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

fn hash_file_blocking(algorithm: HashAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = StreamingHasher::new(algorithm);
    let mut block = [0u8; HASH_BLOCK_SIZE];

    loop {
        let read = file.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }

    Ok(hasher.finalize())
}

// ============================================================================
// Incremental Hash Calculations
// ============================================================================

/// Progress of an incremental hash calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HashProgress {
    #[serde(rename_all = "camelCase")]
    Processing {
        chunks_received: usize,
        total_chunks: usize,
    },
    #[serde(rename_all = "camelCase")]
    Complete {
        final_hash: String,
    },
}

struct PendingHash {
    hasher: StreamingHasher,
    next_index: usize,
    total_chunks: usize,
    last_activity: Instant,
}

/// Running digests fed chunk by chunk, for clients that offload hashing
/// of a local file to the server before the real upload starts.
pub struct HashCalculations {
    engine: HashEngine,
    pending: Mutex<HashMap<String, PendingHash>>,
}

impl HashCalculations {
    pub fn new(engine: HashEngine) -> Self {
        Self {
            engine,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier of a calculation, derived from the filename and its size
    pub fn file_id(file_name: &str, file_size: u64) -> String {
        format!("{}_{}", file_name, file_size)
    }

    /// Feed one chunk. Chunk 0 (re)starts the calculation, already-seen
    /// indices are ignored and chunks must otherwise arrive in order.
    pub fn update(
        &self,
        file_id: &str,
        chunk_index: usize,
        total_chunks: usize,
        data: &[u8],
    ) -> Result<HashProgress, UploadError> {
        if total_chunks == 0 {
            return Err(UploadError::Validation("totalChunks must be at least 1".to_string()));
        }

        let mut pending = self.pending.lock();

        if chunk_index == 0 {
            pending.insert(
                file_id.to_string(),
                PendingHash {
                    hasher: StreamingHasher::new(self.engine.algorithm()),
                    next_index: 0,
                    total_chunks,
                    last_activity: Instant::now(),
                },
            );
        }

        let calc = pending.get_mut(file_id).ok_or_else(|| {
            UploadError::SessionNotFound(format!("Hash calculation session not found: {}", file_id))
        })?;
        calc.last_activity = Instant::now();

        if chunk_index < calc.next_index {
            tracing::warn!(file_id = %file_id, chunk_index, "Duplicate hash chunk ignored");
        } else if chunk_index > calc.next_index {
            return Err(UploadError::Validation(format!(
                "Hash chunk {} arrived out of order (expected {})",
                chunk_index, calc.next_index
            )));
        } else {
            calc.hasher.update(data);
            calc.next_index += 1;
        }

        if calc.next_index < calc.total_chunks {
            return Ok(HashProgress::Processing {
                chunks_received: calc.next_index,
                total_chunks: calc.total_chunks,
            });
        }

        let done = pending
            .remove(file_id)
            .ok_or_else(|| UploadError::Internal("hash calculation vanished".to_string()))?;
        Ok(HashProgress::Complete {
            final_hash: done.hasher.finalize(),
        })
    }

    /// Drop a calculation; returns whether one existed
    pub fn cancel(&self, file_id: &str) -> bool {
        self.pending.lock().remove(file_id).is_some()
    }

    /// Drop calculations no chunk has touched for `timeout`.
    ///
    /// Returns the number of calculations dropped
    pub fn evict_idle(&self, timeout: Duration) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|file_id, calc| {
            let keep = calc.last_activity.elapsed() <= timeout;
            if !keep {
                tracing::debug!(file_id = %file_id, "Evicted idle hash calculation");
            }
            keep
        });
        before - pending.len()
    }
}
