//! Chunked Upload Module
//!
//! Implements reliable intake of large evidence files with:
//! - Positional chunk writes forced to storage before acknowledgement
//! - Server-side digest verification against the client-declared hash
//! - Chain-of-custody metadata kept in a JSON sidecar next to each artifact
//!
//! Protocol Flow:
//! 1. Client sends chunk 0 with the metadata record (folder, declared hash)
//! 2. Client sends the remaining chunks, in any order
//! 3. The last chunk triggers finalize: verify, optional rename, `_complete`
//! 4. Client reads back verification state or processing status

pub mod chunk_writer;
pub mod cleanup;
pub mod finalize;
pub mod hash;
pub mod metadata;
pub mod paths;
pub mod retry;
pub mod service;
pub mod session;
pub mod types;

pub use chunk_writer::ChunkWriter;
pub use cleanup::{CleanupManager, FolderRemoval};
pub use finalize::{FinalizeJob, FinalizePipeline, FinalizeStage};
pub use hash::{HashAlgorithm, HashCalculations, HashEngine, HashProgress};
pub use metadata::{MetadataRecord, MetadataStore};
pub use retry::{Backoff, RetryPolicy};
pub use service::{UploadService, UploadSettings};
pub use session::SessionRegistry;
pub use types::*;
